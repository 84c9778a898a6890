//! Comment data access, backed either by the local SQLite mirror (demo mode)
//! or by the hosted data service. Callers only see [`CommentGateway`].

mod local;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;

pub use local::LocalGateway;
pub use remote::RemoteGateway;

use crate::{
    config::Config,
    db::{
        models::{CommentRecord, CommentView},
        Database,
    },
    error::{AppError, Result},
    services::thread::{self, Thread},
};

#[async_trait]
pub trait CommentGateway: Send + Sync {
    /// Short name of the backing store, for logs.
    fn backend(&self) -> &'static str;

    /// Assembled, ordered thread forest for a file as seen by `viewer_id`.
    async fn list(&self, file_id: &str, viewer_id: &str) -> Result<Vec<Thread<CommentView>>>;

    async fn add(
        &self,
        file_id: &str,
        author_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<CommentRecord>;

    /// Removes the comment together with every reply below it. Returns how
    /// many comments were removed.
    async fn delete(&self, comment_id: &str) -> Result<usize>;

    /// Flips the viewer's like and returns the new state.
    async fn toggle_like(&self, comment_id: &str, viewer_id: &str) -> Result<bool>;

    async fn toggle_pin(&self, comment_id: &str, pinned: bool) -> Result<bool>;

    async fn find(&self, comment_id: &str) -> Result<Option<CommentRecord>>;

    /// Owner of the file a comment hangs off, if the file is known.
    async fn file_owner(&self, file_id: &str) -> Result<Option<String>>;
}

/// Picks the backing store once at startup: the hosted service when its
/// credentials are configured, otherwise the local mirror.
pub async fn from_config(config: &Config) -> anyhow::Result<Arc<dyn CommentGateway>> {
    if let Some(remote) = &config.remote {
        tracing::info!("Using remote comment store at {}", remote.url);
        return Ok(Arc::new(RemoteGateway::new(remote)?));
    }

    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    if config.seed_demo {
        crate::services::seed::seed_demo(&db).await?;
    }

    tracing::info!("Using local comment store at {}", config.database_url);
    Ok(Arc::new(LocalGateway::new(db)))
}

/// Assembles a file's live comments into the forest both stores return.
fn into_forest(views: Vec<CommentView>) -> Vec<Thread<CommentView>> {
    let total = thread::count_flat(&views);
    let forest = thread::assemble(views);
    debug_assert_eq!(thread::count_forest(&forest), total);
    tracing::debug!(total, roots = forest.len(), "Comment thread assembled");
    forest
}

/// Shared checks applied by both stores before anything is written.
/// Returns the trimmed content to persist.
fn validate_new_comment<'a>(file_id: &str, author_id: &str, content: &'a str) -> Result<&'a str> {
    if file_id.trim().is_empty() {
        return Err(AppError::Validation("File id is required".to_string()));
    }
    if author_id.trim().is_empty() {
        return Err(AppError::Validation("Author id is required".to_string()));
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation(
            "Comment content is required".to_string(),
        ));
    }
    Ok(content)
}

/// A reply must point at a live comment on the same file.
fn validate_parent(parent: Option<&CommentRecord>, file_id: &str) -> Result<()> {
    match parent {
        Some(p) if p.file_id == file_id && !p.is_deleted => Ok(()),
        Some(_) => Err(AppError::Validation(
            "Parent comment belongs to another file".to_string(),
        )),
        None => Err(AppError::Validation(
            "Parent comment not found".to_string(),
        )),
    }
}
