//! User and chat registry plus the message log
//!
//! Every incoming message upserts its sender and chat and is appended to
//! `messages`, which feeds mood analysis and activity statistics.

use crate::db::{now_ts, Database};
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelegramUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl TelegramUser {
    /// "@username", else first/last name, else the id
    pub fn display_name(&self) -> String {
        if let Some(ref username) = self.username {
            return format!("@{}", username);
        }
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            format!("user {}", self.telegram_id)
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedMessage {
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub created_at: i64,
}

/// Message counts for one user
#[derive(Debug, Clone, Serialize)]
pub struct UserActivity {
    pub user: TelegramUser,
    pub messages: i64,
}

/// One user's hour-of-day profile
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityProfile {
    pub total_messages: i64,
    /// UTC hour -> message count
    pub hourly: BTreeMap<u32, i64>,
    pub most_active_hour: Option<u32>,
}

/// UTC hours counted as "night" for the night-owl board (22:00 - 06:00)
const NIGHT_HOURS: &str = "('22','23','00','01','02','03','04','05')";

pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert_user(&self, user: &TelegramUser) -> Result<()> {
        let now = now_ts();
        self.db.conn().execute(
            "INSERT INTO users (telegram_id, username, first_name, last_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(telegram_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                updated_at = excluded.updated_at",
            params![user.telegram_id, user.username, user.first_name, user.last_name, now],
        )?;
        Ok(())
    }

    pub fn upsert_chat(&self, chat_id: i64, title: Option<&str>, chat_type: &str) -> Result<()> {
        let now = now_ts();
        self.db.conn().execute(
            "INSERT INTO chats (chat_id, title, chat_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                title = excluded.title,
                chat_type = excluded.chat_type,
                updated_at = excluded.updated_at",
            params![chat_id, title, chat_type, now],
        )?;
        Ok(())
    }

    pub fn get_user(&self, telegram_id: i64) -> Result<Option<TelegramUser>> {
        let user = self
            .db
            .conn()
            .query_row(
                "SELECT telegram_id, username, first_name, last_name FROM users WHERE telegram_id = ?1",
                params![telegram_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Look a user up by @username (case-insensitive, leading @ optional)
    pub fn find_by_username(&self, username: &str) -> Result<Option<TelegramUser>> {
        let username = username.trim_start_matches('@');
        let user = self
            .db
            .conn()
            .query_row(
                "SELECT telegram_id, username, first_name, last_name FROM users
                 WHERE username = ?1 COLLATE NOCASE",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn record_message(
        &self,
        user_id: i64,
        chat_id: i64,
        telegram_message_id: i32,
        text: &str,
        message_type: &str,
    ) -> Result<()> {
        self.record_message_at(user_id, chat_id, telegram_message_id, text, message_type, now_ts())
    }

    pub fn record_message_at(
        &self,
        user_id: i64,
        chat_id: i64,
        telegram_message_id: i32,
        text: &str,
        message_type: &str,
        created_at: i64,
    ) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO messages (telegram_message_id, user_id, chat_id, text, message_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![telegram_message_id, user_id, chat_id, text, message_type, created_at],
        )?;
        Ok(())
    }

    /// A user's recent text messages, newest first
    pub fn recent_messages(
        &self,
        user_id: i64,
        chat_id: Option<i64>,
        days: i64,
        limit: usize,
    ) -> Result<Vec<LoggedMessage>> {
        let since = now_ts() - days * 86_400;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, chat_id, text, created_at FROM messages
             WHERE user_id = ?1 AND created_at >= ?2
               AND (?3 IS NULL OR chat_id = ?3)
               AND message_type = 'text'
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![user_id, since, chat_id, limit as i64], |row| {
            Ok(LoggedMessage {
                user_id: row.get(0)?,
                chat_id: row.get(1)?,
                text: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_users(&self) -> Result<i64> {
        Ok(self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    pub fn count_new_users_since(&self, since: i64) -> Result<i64> {
        Ok(self.db.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?)
    }

    /// Known users who have posted in a chat
    pub fn chat_members(&self, chat_id: i64) -> Result<Vec<TelegramUser>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT u.telegram_id, u.username, u.first_name, u.last_name
             FROM users u JOIN messages m ON m.user_id = u.telegram_id
             WHERE m.chat_id = ?1 AND u.is_active = 1
             ORDER BY u.telegram_id",
        )?;
        let rows = stmt.query_map(params![chat_id], row_to_user)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Top posters in a chat over the last `days`
    pub fn most_active(&self, chat_id: i64, days: i64, limit: usize) -> Result<Vec<UserActivity>> {
        self.ranked_activity(chat_id, days, limit, "")
    }

    /// Top posters between 22:00 and 06:00 UTC
    pub fn night_owls(&self, chat_id: i64, days: i64, limit: usize) -> Result<Vec<UserActivity>> {
        let filter = format!(
            "AND strftime('%H', m.created_at, 'unixepoch') IN {}",
            NIGHT_HOURS
        );
        self.ranked_activity(chat_id, days, limit, &filter)
    }

    fn ranked_activity(
        &self,
        chat_id: i64,
        days: i64,
        limit: usize,
        extra_filter: &str,
    ) -> Result<Vec<UserActivity>> {
        let since = now_ts() - days * 86_400;
        let sql = format!(
            "SELECT u.telegram_id, u.username, u.first_name, u.last_name, COUNT(m.id) AS n
             FROM messages m JOIN users u ON u.telegram_id = m.user_id
             WHERE m.chat_id = ?1 AND m.created_at >= ?2 {}
             GROUP BY u.telegram_id
             ORDER BY n DESC, u.telegram_id
             LIMIT ?3",
            extra_filter
        );
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![chat_id, since, limit as i64], |row| {
            Ok(UserActivity {
                user: row_to_user(row)?,
                messages: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Hour-of-day profile for one user in one chat
    pub fn activity_profile(&self, user_id: i64, chat_id: i64, days: i64) -> Result<ActivityProfile> {
        let since = now_ts() - days * 86_400;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%H', created_at, 'unixepoch') AS INTEGER) AS hour, COUNT(*)
             FROM messages
             WHERE user_id = ?1 AND chat_id = ?2 AND created_at >= ?3
             GROUP BY hour",
        )?;
        let rows = stmt.query_map(params![user_id, chat_id, since], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut profile = ActivityProfile::default();
        for row in rows {
            let (hour, count) = row?;
            profile.total_messages += count;
            profile.hourly.insert(hour, count);
        }
        profile.most_active_hour = profile
            .hourly
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(hour, _)| *hour);
        Ok(profile)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelegramUser> {
    Ok(TelegramUser {
        telegram_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
    })
}

/// Leaderboard reply for /most_active_users and /night_owls
pub fn format_leaderboard(title: &str, rows: &[UserActivity]) -> String {
    if rows.is_empty() {
        return format!("{}\n\nNo activity found in the past 7 days.", title);
    }
    let medals = ["🥇", "🥈", "🥉"];
    let mut out = format!("{}\n\n", title);
    for (i, row) in rows.iter().enumerate() {
        let rank = medals
            .get(i)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("{}.", i + 1));
        out.push_str(&format!(
            "{} {} - {} messages\n",
            rank,
            html_escape(&row.user.display_name()),
            row.messages
        ));
    }
    out.push_str("\n📊 Analysis period: last 7 days");
    out
}

/// Reply for /my_activity
pub fn format_profile(profile: &ActivityProfile) -> String {
    let mut out = format!(
        "👤 <b>Your activity (last 30 days)</b>\n\n💬 Messages: <b>{}</b>\n",
        profile.total_messages
    );
    match profile.most_active_hour {
        Some(hour) => out.push_str(&format!("🕐 Most active hour: <b>{:02}:00 UTC</b>\n", hour)),
        None => out.push_str("🕐 Most active hour: <b>Not available</b>\n"),
    }
    let max = profile.hourly.values().copied().max().unwrap_or(0);
    if max > 0 {
        out.push_str("\n<pre>");
        for (hour, count) in profile.hourly.iter().take(12) {
            let width = ((*count as f64 / max as f64) * 10.0).round() as usize;
            out.push_str(&format!("{:02}:00 {} {}\n", hour, "█".repeat(width.max(1)), count));
        }
        out.push_str("</pre>");
    }
    out
}

/// Minimal escaping for text interpolated into HTML replies
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn user(id: i64, name: &str) -> TelegramUser {
        TelegramUser {
            telegram_id: id,
            username: Some(name.to_string()),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn test_upsert_updates_username() {
        let store = store();
        store.upsert_user(&user(1, "old")).unwrap();
        store.upsert_user(&user(1, "new")).unwrap();
        assert_eq!(store.count_users().unwrap(), 1);
        assert_eq!(store.get_user(1).unwrap().unwrap().username.as_deref(), Some("new"));
        assert_eq!(store.find_by_username("@NEW").unwrap().unwrap().telegram_id, 1);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut u = user(5, "alice");
        assert_eq!(u.display_name(), "@alice");
        u.username = None;
        u.first_name = Some("Alice".into());
        u.last_name = Some("Smith".into());
        assert_eq!(u.display_name(), "Alice Smith");
        u.first_name = None;
        u.last_name = None;
        assert_eq!(u.display_name(), "user 5");
    }

    #[test]
    fn test_recent_messages_window_and_order() {
        let store = store();
        let now = now_ts();
        store.record_message_at(1, 10, 1, "old", "text", now - 5 * 86_400).unwrap();
        store.record_message_at(1, 10, 2, "first", "text", now - 100).unwrap();
        store.record_message_at(1, 10, 3, "second", "text", now - 10).unwrap();
        store.record_message_at(1, 11, 4, "elsewhere", "text", now - 5).unwrap();
        store.record_message_at(2, 10, 5, "other user", "text", now).unwrap();

        let msgs = store.recent_messages(1, Some(10), 3, 20).unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);

        let all_chats = store.recent_messages(1, None, 3, 20).unwrap();
        assert_eq!(all_chats.len(), 3);

        let limited = store.recent_messages(1, None, 3, 1).unwrap();
        assert_eq!(limited[0].text, "elsewhere");
    }

    #[test]
    fn test_most_active_ranking() {
        let store = store();
        store.upsert_user(&user(1, "a")).unwrap();
        store.upsert_user(&user(2, "b")).unwrap();
        for i in 0..3 {
            store.record_message(1, 10, i, "hi", "text").unwrap();
        }
        store.record_message(2, 10, 9, "yo", "text").unwrap();

        let ranked = store.most_active(10, 7, 10).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].user.telegram_id, 1);
        assert_eq!(ranked[0].messages, 3);
        assert_eq!(store.chat_members(10).unwrap().len(), 2);
    }

    #[test]
    fn test_night_owls_filter_hours() {
        let store = store();
        store.upsert_user(&user(1, "owl")).unwrap();
        store.upsert_user(&user(2, "lark")).unwrap();
        let midnight = crate::db::start_of_day_ts();
        // 01:00 UTC today and 12:00 UTC yesterday
        store.record_message_at(1, 10, 1, "late", "text", midnight + 3600).unwrap();
        store.record_message_at(2, 10, 2, "noon", "text", midnight - 12 * 3600).unwrap();

        let owls = store.night_owls(10, 7, 10).unwrap();
        assert_eq!(owls.len(), 1);
        assert_eq!(owls[0].user.telegram_id, 1);
    }

    #[test]
    fn test_activity_profile() {
        let store = store();
        let midnight = crate::db::start_of_day_ts() - 86_400;
        store.record_message_at(1, 10, 1, "a", "text", midnight + 9 * 3600).unwrap();
        store.record_message_at(1, 10, 2, "b", "text", midnight + 9 * 3600 + 60).unwrap();
        store.record_message_at(1, 10, 3, "c", "text", midnight + 20 * 3600).unwrap();

        let profile = store.activity_profile(1, 10, 30).unwrap();
        assert_eq!(profile.total_messages, 3);
        assert_eq!(profile.most_active_hour, Some(9));
        assert_eq!(profile.hourly.get(&20), Some(&1));
        assert!(format_profile(&profile).contains("09:00"));
    }
}
