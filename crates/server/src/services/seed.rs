// Demo content for the local store, so demo mode starts with a conversation.

use chrono::{DateTime, Duration, Utc};

use crate::{
    db::{
        models::{File, Profile},
        Database,
    },
    error::Result,
};

pub const DEMO_FILE_ID: &str = "demo-file";

fn profiles() -> Vec<Profile> {
    [
        ("demo-ana", "ana", Some("https://api.dicebear.com/7.x/thumbs/svg?seed=ana")),
        ("demo-bruno", "bruno", None),
        ("demo-carla", "carla", None),
    ]
    .into_iter()
    .map(|(id, username, avatar)| Profile {
        id: id.to_string(),
        username: username.to_string(),
        avatar_url: avatar.map(str::to_string),
    })
    .collect()
}

/// (id, author, parent, content, minutes ago, pinned)
type SeedComment = (
    &'static str,
    &'static str,
    Option<&'static str>,
    &'static str,
    i64,
    bool,
);

const COMMENTS: &[SeedComment] = &[
    ("demo-c1", "demo-ana", None, "Chapter 3 summary is up, corrections welcome.", 300, true),
    ("demo-c2", "demo-bruno", None, "Does this cover the second assessment too?", 120, false),
    ("demo-c3", "demo-carla", Some("demo-c2"), "Only topics 1 to 4.", 90, false),
    ("demo-c4", "demo-bruno", Some("demo-c3"), "Thanks!", 60, false),
];

/// Inserts demo profiles, a file and a short thread. Does nothing when the
/// store already holds comments.
pub async fn seed_demo(db: &Database) -> Result<()> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments")
        .fetch_one(&db.pool)
        .await?;
    if existing > 0 {
        tracing::debug!("Local store already has comments, skipping demo seed");
        return Ok(());
    }

    let now = Utc::now();
    let mut tx = db.pool.begin().await?;

    for profile in profiles() {
        sqlx::query("INSERT OR IGNORE INTO profiles (id, username, avatar_url) VALUES (?, ?, ?)")
            .bind(&profile.id)
            .bind(&profile.username)
            .bind(&profile.avatar_url)
            .execute(&mut *tx)
            .await?;
    }

    let file = File {
        id: DEMO_FILE_ID.to_string(),
        user_id: "demo-ana".to_string(),
        title: "Organic Chemistry - Chapter 3".to_string(),
        created_at: now - Duration::days(1),
    };
    sqlx::query("INSERT OR IGNORE INTO files (id, user_id, title, created_at) VALUES (?, ?, ?, ?)")
        .bind(&file.id)
        .bind(&file.user_id)
        .bind(&file.title)
        .bind(file.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

    for &(id, author, parent, content, minutes_ago, pinned) in COMMENTS {
        let created_at: DateTime<Utc> = now - Duration::minutes(minutes_ago);
        sqlx::query(
            "INSERT INTO comments (id, file_id, user_id, content, parent_id, created_at, likes_count, is_deleted, is_pinned) VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(id)
        .bind(&file.id)
        .bind(author)
        .bind(content)
        .bind(parent)
        .bind(created_at.to_rfc3339())
        .bind(pinned)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("INSERT INTO comment_likes (user_id, comment_id, created_at) VALUES (?, ?, ?)")
        .bind("demo-bruno")
        .bind("demo-c1")
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE comments SET likes_count = likes_count + 1 WHERE id = ?")
        .bind("demo-c1")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(file_id = DEMO_FILE_ID, comments = COMMENTS.len(), "Seeded demo data");
    Ok(())
}
