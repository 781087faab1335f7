//! Issue comment model.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// Comment attributes as normalized from the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentData {
    /// Remote comment ID.
    pub remote_id: i64,

    /// Author login, `None` for deleted accounts.
    pub author_login: Option<String>,

    /// Author avatar URL.
    pub author_avatar_url: Option<String>,

    /// Comment content (Markdown).
    pub body: String,

    /// Remote creation timestamp (Unix).
    pub remote_created_at: i64,

    /// Remote update timestamp (Unix).
    pub remote_updated_at: i64,
}

/// Cached comment row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub issue_id: i64,
    pub remote_id: i64,
    pub author_login: Option<String>,
    pub author_avatar_url: Option<String>,
    pub body: String,
    pub remote_created_at: i64,
    pub remote_updated_at: i64,
    pub synced_at: Option<i64>,
}

/// Insert or refresh a comment by `(issue_id, remote_id)`.
pub async fn upsert_comment(
    conn: &mut SqliteConnection,
    issue_id: i64,
    data: &CommentData,
    synced_at: i64,
) -> Result<i64, sqlx::Error> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM comments WHERE issue_id = ? AND remote_id = ?")
            .bind(issue_id)
            .bind(data.remote_id)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                r#"
                UPDATE comments SET
                    author_login = ?, author_avatar_url = ?, body = ?,
                    remote_created_at = ?, remote_updated_at = ?, synced_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&data.author_login)
            .bind(&data.author_avatar_url)
            .bind(&data.body)
            .bind(data.remote_created_at)
            .bind(data.remote_updated_at)
            .bind(synced_at)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok(id)
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO comments (
                    issue_id, remote_id, author_login, author_avatar_url, body,
                    remote_created_at, remote_updated_at, synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(issue_id)
            .bind(data.remote_id)
            .bind(&data.author_login)
            .bind(&data.author_avatar_url)
            .bind(&data.body)
            .bind(data.remote_created_at)
            .bind(data.remote_updated_at)
            .bind(synced_at)
            .fetch_one(&mut *conn)
            .await?;
            Ok(id)
        }
    }
}

/// Comments of an issue in posting order.
pub async fn list_comments(pool: &DbPool, issue_id: i64) -> Result<Vec<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(
        r#"
        SELECT id, issue_id, remote_id, author_login, author_avatar_url, body,
               remote_created_at, remote_updated_at, synced_at
        FROM comments WHERE issue_id = ?
        ORDER BY remote_created_at, remote_id
        "#,
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await
}
