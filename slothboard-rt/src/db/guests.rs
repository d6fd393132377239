//! Guest voter table access
//!
//! Guest rows are scoped to a single session; the lookup always includes
//! the session id so a guest token from one session can never vote in
//! another.

use chrono::{DateTime, Utc};
use slothboard_common::model::Avatar;
use slothboard_common::Result;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// A persisted guest voter record
#[derive(Debug, Clone)]
pub struct GuestRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub display_name: String,
    pub avatar: Avatar,
    pub created_at: DateTime<Utc>,
}

fn avatar_str(avatar: Avatar) -> String {
    // Serializes to a bare JSON string like "sloth-happy"
    serde_json::to_value(avatar)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "sloth-default".to_string())
}

fn parse_avatar(s: &str) -> Avatar {
    serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_default()
}

/// Mint a new guest scoped to one session
pub async fn create(
    pool: &Pool<Sqlite>,
    session_id: Uuid,
    display_name: &str,
    avatar: Avatar,
) -> Result<GuestRow> {
    let guest = GuestRow {
        id: Uuid::new_v4(),
        session_id,
        display_name: display_name.to_string(),
        avatar,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO guest_voters (id, session_id, display_name, avatar, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(guest.id.to_string())
    .bind(guest.session_id.to_string())
    .bind(&guest.display_name)
    .bind(avatar_str(guest.avatar))
    .bind(guest.created_at)
    .execute(pool)
    .await?;

    Ok(guest)
}

/// Look up a guest within a specific session
pub async fn get_in_session(
    pool: &Pool<Sqlite>,
    session_id: Uuid,
    guest_id: Uuid,
) -> Result<Option<GuestRow>> {
    let row = sqlx::query_as::<_, (String, DateTime<Utc>, String)>(
        "SELECT display_name, created_at, avatar FROM guest_voters
         WHERE id = ? AND session_id = ?",
    )
    .bind(guest_id.to_string())
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(display_name, created_at, avatar)| GuestRow {
        id: guest_id,
        session_id,
        display_name,
        avatar: parse_avatar(&avatar),
        created_at,
    }))
}
