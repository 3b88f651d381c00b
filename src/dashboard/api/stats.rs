//! Stats API
//!
//! Aggregate counters and a recent-activity feed read from the bot database.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use rusqlite::params;
use serde::Serialize;
use std::sync::Arc;

use super::{api_error, ApiError};
use crate::db::{now_ts, Database};
use crate::images::ImageStore;
use crate::todo::TodoStore;
use crate::users::{TelegramUser, UserStore};

const ACTIVITY_PER_KIND: i64 = 5;
const ACTIVITY_LIMIT: usize = 10;
const DESCRIPTION_MAX: usize = 50;

#[derive(Clone)]
pub struct StatsState {
    pub db: Arc<Database>,
}

impl StatsState {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_users: i64,
    /// Users first seen in the last 24 hours
    pub active_users: i64,
    pub total_images: i64,
    pub total_todos: i64,
    pub completed_todos: i64,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActivityItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub user: String,
    pub description: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub activities: Vec<ActivityItem>,
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Stats query failed: {}", e);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Failed to read statistics",
    )
}

fn truncate(text: &str) -> String {
    if text.chars().count() > DESCRIPTION_MAX {
        format!("{}...", text.chars().take(DESCRIPTION_MAX).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Latest images and todo tasks merged, newest first
pub fn recent_activity(db: &Database) -> rusqlite::Result<Vec<ActivityItem>> {
    let conn = db.conn();
    let mut items = Vec::new();

    let sources = [
        (
            "image",
            "SELECT i.prompt, i.created_at, i.user_id, u.username, u.first_name, u.last_name
             FROM generated_images i LEFT JOIN users u ON u.telegram_id = i.user_id
             ORDER BY i.created_at DESC, i.id DESC LIMIT ?1",
        ),
        (
            "todo",
            "SELECT t.title, t.created_at, t.user_id, u.username, u.first_name, u.last_name
             FROM todo_tasks t LEFT JOIN users u ON u.telegram_id = t.user_id
             ORDER BY t.created_at DESC, t.id DESC LIMIT ?1",
        ),
    ];

    for (kind, sql) in sources {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![ACTIVITY_PER_KIND], |row| {
            let text: String = row.get(0)?;
            let user = TelegramUser {
                telegram_id: row.get(2)?,
                username: row.get(3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
            };
            Ok(ActivityItem {
                kind,
                user: user.display_name(),
                description: truncate(&text),
                timestamp: row.get(1)?,
            })
        })?;
        for row in rows {
            items.push(row?);
        }
    }

    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items.truncate(ACTIVITY_LIMIT);
    Ok(items)
}

pub async fn stats_handler(State(state): State<Arc<StatsState>>) -> Result<Json<StatsResponse>, ApiError> {
    let users = UserStore::new(state.db.clone());
    let total_users = users.count_users().map_err(internal)?;
    let active_users = users
        .count_new_users_since(now_ts() - 86_400)
        .map_err(internal)?;
    let total_images = ImageStore::new(state.db.clone()).count_all().map_err(internal)?;
    let (total_todos, completed_todos) = TodoStore::new(state.db.clone())
        .global_counts()
        .map_err(internal)?;

    Ok(Json(StatsResponse {
        total_users,
        active_users,
        total_images,
        total_todos,
        completed_todos,
        last_updated: chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn activity_handler(
    State(state): State<Arc<StatsState>>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let activities = recent_activity(&state.db).map_err(internal)?;
    Ok(Json(ActivityResponse { activities }))
}

/// `/stats` and `/activity`, nested under `/api`
pub fn stats_router(state: Arc<StatsState>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/activity", get(activity_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_description() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(truncate(&long), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn test_activity_merges_and_sorts() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn();
            conn.execute(
                "INSERT INTO users (telegram_id, username, created_at, updated_at) VALUES (1, 'alice', 0, 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO generated_images (user_id, chat_id, prompt, image_url, model, size, created_at)
                 VALUES (1, 1, 'a cat', 'u', 'm', 's', 100)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO todo_lists (user_id, name, is_default, created_at) VALUES (2, 'My Tasks', 1, 0)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO todo_tasks (list_id, user_id, title, created_at, updated_at)
                 VALUES (1, 2, 'buy milk', 200, 200)",
                [],
            )
            .unwrap();
        }

        let items = recent_activity(&db).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, "todo");
        assert_eq!(items[0].user, "user 2");
        assert_eq!(items[1].user, "@alice");
        assert_eq!(items[1].description, "a cat");
    }
}
