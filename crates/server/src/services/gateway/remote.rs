use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use super::{into_forest, validate_new_comment, validate_parent, CommentGateway};
use crate::{
    config::RemoteConfig,
    db::models::{AuthorProfile, CommentRecord, CommentView},
    error::{AppError, Result},
    services::thread::{self, Thread},
};

const COMMENT_SELECT: &str =
    "id,file_id,user_id,content,parent_id,created_at,is_deleted,is_pinned";

/// Comment store over the hosted PostgREST endpoint.
pub struct RemoteGateway {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RemoteCommentRow {
    #[serde(flatten)]
    comment: CommentRecord,
    #[serde(default)]
    profiles: Option<AuthorProfile>,
    #[serde(default)]
    comment_likes: Vec<RemoteLikeRow>,
}

#[derive(Debug, Deserialize)]
struct RemoteLikeRow {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct RemoteFileRow {
    user_id: String,
}

impl RemoteCommentRow {
    fn into_view(self, viewer_id: &str) -> CommentView {
        CommentView {
            liked_by_viewer: self.comment_likes.iter().any(|l| l.user_id == viewer_id),
            likes_count: self.comment_likes.len() as i64,
            author: self.profiles,
            comment: self.comment,
        }
    }
}

/// PostgREST `in.(...)` filter over quoted ids. Backslashes and double
/// quotes inside an id are escaped.
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

impl RemoteGateway {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: format!("{}/rest/v1", config.url),
            api_key: config.api_key.clone(),
            http_client,
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            tracing::error!("Remote request failed: {}", e);
            AppError::Remote(format!("Request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Remote API error: HTTP {} - {}", status, body);
            return Err(AppError::Remote(format!("HTTP {status} - {body}")));
        }

        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(|e| {
            tracing::error!("Failed to parse remote response: {}", e);
            AppError::Remote(format!("Malformed response: {e}"))
        })
    }

    /// Live comments on a file.
    async fn file_comments(&self, file_id: &str) -> Result<Vec<CommentRecord>> {
        let file_filter = format!("eq.{file_id}");
        let rows: Vec<CommentRecord> = self
            .fetch(self.request(Method::GET, "comments").query(&[
                ("select", COMMENT_SELECT),
                ("file_id", file_filter.as_str()),
                ("is_deleted", "eq.false"),
            ]))
            .await?;

        Ok(rows.into_iter().filter(|c| !c.is_deleted).collect())
    }
}

#[async_trait]
impl CommentGateway for RemoteGateway {
    fn backend(&self) -> &'static str {
        "remote"
    }

    async fn list(&self, file_id: &str, viewer_id: &str) -> Result<Vec<Thread<CommentView>>> {
        let select = format!(
            "{COMMENT_SELECT},profiles(username,avatar_url),comment_likes(user_id)"
        );
        let file_filter = format!("eq.{file_id}");
        let rows: Vec<RemoteCommentRow> = self
            .fetch(self.request(Method::GET, "comments").query(&[
                ("select", select.as_str()),
                ("file_id", file_filter.as_str()),
                ("is_deleted", "eq.false"),
            ]))
            .await?;

        // Filter again in case the endpoint ignores the soft-delete filter.
        let views: Vec<CommentView> = rows
            .into_iter()
            .filter(|row| !row.comment.is_deleted)
            .map(|row| row.into_view(viewer_id))
            .collect();

        Ok(into_forest(views))
    }

    async fn add(
        &self,
        file_id: &str,
        author_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<CommentRecord> {
        let content = validate_new_comment(file_id, author_id, content)?;

        if let Some(parent_id) = parent_id {
            let parent = self.find(parent_id).await?;
            validate_parent(parent.as_ref(), file_id)?;
        }

        let body = json!({
            "file_id": file_id,
            "user_id": author_id,
            "content": content,
            "parent_id": parent_id,
            "created_at": Utc::now().to_rfc3339(),
            "is_deleted": false,
            "is_pinned": false,
        });

        let created: Vec<CommentRecord> = self
            .fetch(
                self.request(Method::POST, "comments")
                    .header("Prefer", "return=representation")
                    .query(&[("select", COMMENT_SELECT)])
                    .json(&body),
            )
            .await?;

        let comment = created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Remote("Insert returned no row".to_string()))?;

        tracing::debug!(comment_id = %comment.id, file_id, "Comment added");
        Ok(comment)
    }

    async fn delete(&self, comment_id: &str) -> Result<usize> {
        let target = self
            .find(comment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        let siblings = self.file_comments(&target.file_id).await?;
        let mut doomed = thread::descendants(&siblings, comment_id);
        if doomed.is_empty() {
            doomed.push(comment_id.to_string());
        }
        let filter = in_filter(&doomed);

        // Comments go first so a failure leaves the thread as it was. Likes
        // of removed comments are never read again, so their cleanup only
        // warns.
        self.send(
            self.request(Method::DELETE, "comments")
                .query(&[("id", filter.as_str())]),
        )
        .await?;
        if let Err(e) = self
            .send(
                self.request(Method::DELETE, "comment_likes")
                    .query(&[("comment_id", filter.as_str())]),
            )
            .await
        {
            tracing::warn!(comment_id, "Like cleanup after delete failed: {}", e);
        }

        tracing::info!(comment_id, removed = doomed.len(), "Comment thread deleted");
        Ok(doomed.len())
    }

    async fn toggle_like(&self, comment_id: &str, viewer_id: &str) -> Result<bool> {
        if self.find(comment_id).await?.is_none() {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }

        let comment_filter = format!("eq.{comment_id}");
        let user_filter = format!("eq.{viewer_id}");
        let existing: Vec<RemoteLikeRow> = self
            .fetch(self.request(Method::GET, "comment_likes").query(&[
                ("select", "user_id"),
                ("comment_id", comment_filter.as_str()),
                ("user_id", user_filter.as_str()),
            ]))
            .await?;

        let liked = if existing.is_empty() {
            self.send(
                self.request(Method::POST, "comment_likes")
                    .json(&json!({ "comment_id": comment_id, "user_id": viewer_id })),
            )
            .await?;
            true
        } else {
            self.send(self.request(Method::DELETE, "comment_likes").query(&[
                ("comment_id", comment_filter.as_str()),
                ("user_id", user_filter.as_str()),
            ]))
            .await?;
            false
        };

        tracing::debug!(comment_id, viewer_id, liked, "Comment like toggled");
        Ok(liked)
    }

    async fn toggle_pin(&self, comment_id: &str, pinned: bool) -> Result<bool> {
        let id_filter = format!("eq.{comment_id}");
        let updated: Vec<CommentRecord> = self
            .fetch(
                self.request(Method::PATCH, "comments")
                    .header("Prefer", "return=representation")
                    .query(&[
                        ("select", COMMENT_SELECT),
                        ("id", id_filter.as_str()),
                        ("is_deleted", "eq.false"),
                    ])
                    .json(&json!({ "is_pinned": pinned })),
            )
            .await?;

        let comment = updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        tracing::debug!(comment_id, pinned = comment.is_pinned, "Comment pin toggled");
        Ok(comment.is_pinned)
    }

    async fn find(&self, comment_id: &str) -> Result<Option<CommentRecord>> {
        let id_filter = format!("eq.{comment_id}");
        let rows: Vec<CommentRecord> = self
            .fetch(self.request(Method::GET, "comments").query(&[
                ("select", COMMENT_SELECT),
                ("id", id_filter.as_str()),
                ("is_deleted", "eq.false"),
            ]))
            .await?;

        Ok(rows.into_iter().next())
    }

    async fn file_owner(&self, file_id: &str) -> Result<Option<String>> {
        let id_filter = format!("eq.{file_id}");
        let rows: Vec<RemoteFileRow> = self
            .fetch(self.request(Method::GET, "files").query(&[
                ("select", "user_id"),
                ("id", id_filter.as_str()),
            ]))
            .await?;

        Ok(rows.into_iter().next().map(|f| f.user_id))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use axum::{
        extract::{Query, State},
        http::{Method as HttpMethod, StatusCode},
        routing::any,
        Json, Router,
    };
    use serde_json::Value;

    use super::*;
    use crate::services::thread::count_forest;

    /// Requests seen by the fake endpoint, as `METHOD table?k=v&...`.
    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone)]
    struct Fake {
        log: Log,
        responses: Arc<HashMap<String, (StatusCode, Value)>>,
    }

    async fn handle(
        State(fake): State<Fake>,
        method: HttpMethod,
        axum::extract::Path(table): axum::extract::Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        let mut keys: Vec<_> = params.iter().collect();
        keys.sort();
        let query: Vec<String> = keys.iter().map(|(k, v)| format!("{k}={v}")).collect();
        fake.log
            .lock()
            .unwrap()
            .push(format!("{method} {table}?{}", query.join("&")));

        let key = format!("{method} {table}");
        match fake.responses.get(&key) {
            Some((status, body)) => (*status, Json(body.clone())),
            None => (StatusCode::OK, Json(json!([]))),
        }
    }

    async fn serve(responses: Vec<(&str, StatusCode, Value)>) -> (RemoteGateway, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let fake = Fake {
            log: log.clone(),
            responses: Arc::new(
                responses
                    .into_iter()
                    .map(|(k, s, v)| (k.to_string(), (s, v)))
                    .collect(),
            ),
        };
        let app = Router::new()
            .route("/rest/v1/:table", any(handle))
            .with_state(fake);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gateway = RemoteGateway::new(&RemoteConfig {
            url: format!("http://{addr}"),
            api_key: "test-key".to_string(),
        })
        .unwrap();
        (gateway, log)
    }

    fn row(id: &str, parent: Option<&str>, pinned: bool, ts: &str, likers: &[&str]) -> Value {
        json!({
            "id": id,
            "file_id": "file-1",
            "user_id": "bob",
            "content": format!("comment {id}"),
            "parent_id": parent,
            "created_at": ts,
            "is_deleted": false,
            "is_pinned": pinned,
            "profiles": { "username": "bob", "avatar_url": null },
            "comment_likes": likers.iter().map(|u| json!({ "user_id": u })).collect::<Vec<_>>(),
        })
    }

    #[tokio::test]
    async fn list_joins_likes_and_assembles() {
        let (gw, log) = serve(vec![(
            "GET comments",
            StatusCode::OK,
            json!([
                row("2", Some("1"), false, "2024-01-01T00:00:11Z", &[]),
                row("1", None, false, "2024-01-01T00:00:10Z", &["alice", "carol"]),
                row("3", None, true, "2024-01-01T00:00:05Z", &["bob"]),
            ]),
        )])
        .await;

        let forest = gw.list("file-1", "alice").await.unwrap();
        let roots: Vec<&str> = forest.iter().map(|t| t.item.comment.id.as_str()).collect();
        assert_eq!(roots, vec!["3", "1"]);
        assert_eq!(forest[1].replies[0].item.comment.id, "2");
        assert_eq!(count_forest(&forest), 3);

        assert_eq!(forest[1].item.likes_count, 2);
        assert!(forest[1].item.liked_by_viewer);
        assert_eq!(forest[0].item.likes_count, 1);
        assert!(!forest[0].item.liked_by_viewer);
        assert_eq!(
            forest[0].item.author.as_ref().map(|a| a.username.as_str()),
            Some("bob")
        );

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("file_id=eq.file-1"));
        assert!(log[0].contains("is_deleted=eq.false"));
    }

    #[tokio::test]
    async fn remote_failure_is_an_error_not_an_empty_list() {
        let (gw, _log) = serve(vec![(
            "GET comments",
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "message": "down" }),
        )])
        .await;

        let err = gw.list("file-1", "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let gw = RemoteGateway::new(&RemoteConfig {
            url: "http://127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
        })
        .unwrap();
        let err = gw.toggle_pin("c", true).await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
    }

    #[tokio::test]
    async fn add_validates_before_any_request() {
        let (gw, log) = serve(vec![]).await;
        let err = gw.add("file-1", "bob", "  ", None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_returns_created_row() {
        let (gw, log) = serve(vec![(
            "POST comments",
            StatusCode::CREATED,
            json!([{
                "id": "new-id",
                "file_id": "file-1",
                "user_id": "bob",
                "content": "hello",
                "parent_id": null,
                "created_at": "2024-01-01T00:00:00Z",
                "is_deleted": false,
                "is_pinned": false,
            }]),
        )])
        .await;

        let created = gw.add("file-1", "bob", " hello ", None).await.unwrap();
        assert_eq!(created.id, "new-id");
        assert_eq!(created.content, "hello");
        assert!(log.lock().unwrap()[0].starts_with("POST comments"));
    }

    #[tokio::test]
    async fn delete_removes_subtree_and_likes() {
        let (gw, log) = serve(vec![(
            "GET comments",
            StatusCode::OK,
            json!([
                row("1", None, false, "2024-01-01T00:00:10Z", &[]),
                row("2", Some("1"), false, "2024-01-01T00:00:11Z", &[]),
                row("3", Some("2"), false, "2024-01-01T00:00:12Z", &[]),
                row("4", None, false, "2024-01-01T00:00:13Z", &[]),
            ]),
        )])
        .await;

        let removed = gw.delete("1").await.unwrap();
        assert_eq!(removed, 3);

        let log = log.lock().unwrap();
        assert!(log
            .iter()
            .filter(|l| l.starts_with("GET comments"))
            .all(|l| l.contains("is_deleted=eq.false")));
        let deletes: Vec<&String> = log.iter().filter(|l| l.starts_with("DELETE")).collect();
        assert_eq!(deletes.len(), 2);
        assert!(deletes[0].starts_with("DELETE comments?id=in.("));
        assert!(deletes[1].starts_with("DELETE comment_likes?comment_id=in.("));
        for id in ["\"1\"", "\"2\"", "\"3\""] {
            assert!(deletes[0].contains(id));
        }
        assert!(!deletes[0].contains("\"4\""));
    }

    #[tokio::test]
    async fn delete_skips_soft_deleted_replies() {
        let mut hidden = row("2", Some("1"), false, "2024-01-01T00:00:11Z", &[]);
        hidden["is_deleted"] = json!(true);
        let (gw, log) = serve(vec![(
            "GET comments",
            StatusCode::OK,
            json!([row("1", None, false, "2024-01-01T00:00:10Z", &[]), hidden]),
        )])
        .await;

        assert_eq!(gw.delete("1").await.unwrap(), 1);
        let log = log.lock().unwrap();
        let delete = log
            .iter()
            .find(|l| l.starts_with("DELETE comments"))
            .unwrap();
        assert_eq!(delete, "DELETE comments?id=in.(\"1\")");
    }

    #[tokio::test]
    async fn failed_comment_delete_leaves_likes_alone() {
        let (gw, log) = serve(vec![
            (
                "GET comments",
                StatusCode::OK,
                json!([row("1", None, false, "2024-01-01T00:00:10Z", &["alice"])]),
            ),
            (
                "DELETE comments",
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "boom" }),
            ),
        ])
        .await;

        let err = gw.delete("1").await.unwrap_err();
        assert!(matches!(err, AppError::Remote(_)));
        assert!(!log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.starts_with("DELETE comment_likes")));
    }

    #[tokio::test]
    async fn failed_like_cleanup_still_reports_removal() {
        let (gw, _log) = serve(vec![
            (
                "GET comments",
                StatusCode::OK,
                json!([row("1", None, false, "2024-01-01T00:00:10Z", &["alice"])]),
            ),
            (
                "DELETE comment_likes",
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "boom" }),
            ),
        ])
        .await;

        assert_eq!(gw.delete("1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_unknown_comment_is_not_found() {
        let (gw, _log) = serve(vec![]).await;
        let err = gw.delete("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn toggle_like_inserts_when_absent() {
        let (gw, log) = serve(vec![(
            "GET comments",
            StatusCode::OK,
            json!([row("1", None, false, "2024-01-01T00:00:10Z", &[])]),
        )])
        .await;

        assert!(gw.toggle_like("1", "alice").await.unwrap());
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.starts_with("POST comment_likes")));
    }

    #[tokio::test]
    async fn toggle_like_removes_when_present() {
        let (gw, log) = serve(vec![
            (
                "GET comments",
                StatusCode::OK,
                json!([row("1", None, false, "2024-01-01T00:00:10Z", &[])]),
            ),
            (
                "GET comment_likes",
                StatusCode::OK,
                json!([{ "user_id": "alice" }]),
            ),
        ])
        .await;

        assert!(!gw.toggle_like("1", "alice").await.unwrap());
        assert!(log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l == "DELETE comment_likes?comment_id=eq.1&user_id=eq.alice"));
    }

    #[tokio::test]
    async fn toggle_pin_reports_stored_state() {
        let (gw, log) = serve(vec![(
            "PATCH comments",
            StatusCode::OK,
            json!([{
                "id": "1",
                "file_id": "file-1",
                "user_id": "bob",
                "content": "pin me",
                "parent_id": null,
                "created_at": "2024-01-01T00:00:00Z",
                "is_deleted": false,
                "is_pinned": true,
            }]),
        )])
        .await;
        assert!(gw.toggle_pin("1", true).await.unwrap());
        let patch = log.lock().unwrap()[0].clone();
        assert!(patch.starts_with("PATCH comments?"));
        assert!(patch.contains("id=eq.1"));
        assert!(patch.contains("is_deleted=eq.false"));

        let (gw, _log) = serve(vec![]).await;
        let err = gw.toggle_pin("missing", true).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_owner_reads_files_table() {
        let (gw, _log) = serve(vec![(
            "GET files",
            StatusCode::OK,
            json!([{ "user_id": "alice" }]),
        )])
        .await;
        assert_eq!(gw.file_owner("file-1").await.unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn in_filter_quotes_ids() {
        let ids = vec!["a".to_string(), "b\"c".to_string(), r"d\e".to_string()];
        assert_eq!(in_filter(&ids), r#"in.("a","b\"c","d\\e")"#);
    }
}
