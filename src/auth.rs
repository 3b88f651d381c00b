//! Access control: admins, bans and authorized group chats
//!
//! Private chats (positive ids) are always allowed. Group chats must be
//! authorized by an admin. Bans are checked before admin rights, and admins
//! themselves cannot be banned.

use crate::db::{now_ts, Database};
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const PERMISSION_ADMIN: &str = "admin";
pub const PERMISSION_BANNED: &str = "banned";

pub const MSG_BANNED: &str = "🚫 You are banned from using this bot.";
pub const MSG_CHANNEL_UNAUTHORIZED: &str =
    "❌ This bot is not authorized in this channel.\nPlease use /request_access to request authorization.";
pub const MSG_USER_UNAUTHORIZED: &str = "❌ You are not authorized to use this bot.";
pub const MSG_ADMIN_ONLY: &str = "🔒 This command is restricted to administrators only.";

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Banned,
    ChannelUnauthorized,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Reply shown when access is denied
    pub fn denial_message(&self) -> Option<&'static str> {
        match self {
            Self::Allowed => None,
            Self::Banned => Some(MSG_BANNED),
            Self::ChannelUnauthorized => Some(MSG_CHANNEL_UNAUTHORIZED),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizedChannel {
    pub chat_id: i64,
    pub title: Option<String>,
    pub authorized_by: i64,
    pub authorized_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessRequest {
    pub id: i64,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub requested_by: i64,
    pub requested_at: i64,
}

pub struct AccessControl {
    db: Arc<Database>,
    config_admins: HashSet<i64>,
}

impl AccessControl {
    pub fn new(db: Arc<Database>, config_admins: &[i64]) -> Self {
        Self {
            db,
            config_admins: config_admins.iter().copied().collect(),
        }
    }

    /// Admins named in the environment, used for notifications
    pub fn config_admins(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.config_admins.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn has_permission(&self, user_id: i64, permission: &str) -> Result<bool> {
        let found = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM user_permissions WHERE user_id = ?1 AND permission = ?2",
                params![user_id, permission],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Grant a permission row. Returns false if it already existed.
    fn grant(&self, user_id: i64, permission: &str, granted_by: i64) -> Result<bool> {
        let changed = self.db.conn().execute(
            "INSERT OR IGNORE INTO user_permissions (user_id, permission, granted_by, granted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, permission, granted_by, now_ts()],
        )?;
        Ok(changed > 0)
    }

    fn revoke(&self, user_id: i64, permission: &str) -> Result<bool> {
        let changed = self.db.conn().execute(
            "DELETE FROM user_permissions WHERE user_id = ?1 AND permission = ?2",
            params![user_id, permission],
        )?;
        Ok(changed > 0)
    }

    pub fn is_admin(&self, user_id: i64) -> Result<bool> {
        if self.config_admins.contains(&user_id) {
            return Ok(true);
        }
        self.has_permission(user_id, PERMISSION_ADMIN)
    }

    pub fn is_banned(&self, user_id: i64) -> Result<bool> {
        self.has_permission(user_id, PERMISSION_BANNED)
    }

    pub fn is_channel_authorized(&self, chat_id: i64) -> Result<bool> {
        if chat_id > 0 {
            return Ok(true);
        }
        let found = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM authorized_channels WHERE chat_id = ?1",
                params![chat_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn check_access(&self, user_id: i64, chat_id: i64) -> Result<AccessDecision> {
        if self.is_banned(user_id)? {
            return Ok(AccessDecision::Banned);
        }
        if self.is_admin(user_id)? {
            return Ok(AccessDecision::Allowed);
        }
        if self.is_channel_authorized(chat_id)? {
            return Ok(AccessDecision::Allowed);
        }
        Ok(AccessDecision::ChannelUnauthorized)
    }

    /// Returns false if the channel was already authorized
    pub fn authorize_channel(&self, chat_id: i64, title: Option<&str>, by: i64) -> Result<bool> {
        let changed = self.db.conn().execute(
            "INSERT OR IGNORE INTO authorized_channels (chat_id, title, authorized_by, authorized_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, title, by, now_ts()],
        )?;
        Ok(changed > 0)
    }

    /// Returns false if the channel was not authorized
    pub fn revoke_channel(&self, chat_id: i64) -> Result<bool> {
        let changed = self.db.conn().execute(
            "DELETE FROM authorized_channels WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_channels(&self) -> Result<Vec<AuthorizedChannel>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT chat_id, title, authorized_by, authorized_at
             FROM authorized_channels ORDER BY authorized_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AuthorizedChannel {
                chat_id: row.get(0)?,
                title: row.get(1)?,
                authorized_by: row.get(2)?,
                authorized_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Ban a user. Admins cannot be banned.
    pub fn ban(&self, user_id: i64, by: i64) -> Result<BanOutcome> {
        if self.is_admin(user_id)? {
            return Ok(BanOutcome::IsAdmin);
        }
        if self.grant(user_id, PERMISSION_BANNED, by)? {
            Ok(BanOutcome::Banned)
        } else {
            Ok(BanOutcome::AlreadyBanned)
        }
    }

    pub fn unban(&self, user_id: i64) -> Result<bool> {
        self.revoke(user_id, PERMISSION_BANNED)
    }

    pub fn make_admin(&self, user_id: i64, by: i64) -> Result<bool> {
        if self.config_admins.contains(&user_id) {
            return Ok(false);
        }
        self.grant(user_id, PERMISSION_ADMIN, by)
    }

    pub fn record_access_request(&self, chat_id: i64, title: Option<&str>, user_id: i64) -> Result<i64> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO access_requests (chat_id, chat_title, requested_by, requested_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, title, user_id, now_ts()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn pending_requests(&self) -> Result<Vec<AccessRequest>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.chat_id, r.chat_title, r.requested_by, r.requested_at
             FROM access_requests r
             LEFT JOIN authorized_channels c ON c.chat_id = r.chat_id
             WHERE c.chat_id IS NULL
             ORDER BY r.requested_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AccessRequest {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                chat_title: row.get(2)?,
                requested_by: row.get(3)?,
                requested_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanOutcome {
    Banned,
    AlreadyBanned,
    IsAdmin,
}

/// Reply for /list_channels
pub fn format_channels(channels: &[AuthorizedChannel]) -> String {
    if channels.is_empty() {
        return "📝 No authorized channels found.".to_string();
    }
    let mut out = String::from("📋 <b>Authorized Channels</b>\n\n");
    for ch in channels {
        out.push_str(&format!("• <code>{}</code>", ch.chat_id));
        if let Some(ref title) = ch.title {
            out.push_str(&format!(" - {}", crate::users::html_escape(title)));
        }
        out.push_str(&format!(" (authorized by {})\n", ch.authorized_by));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl(admins: &[i64]) -> AccessControl {
        AccessControl::new(Arc::new(Database::open_in_memory().unwrap()), admins)
    }

    #[test]
    fn test_private_chat_always_allowed() {
        let acl = acl(&[]);
        assert_eq!(acl.check_access(42, 42).unwrap(), AccessDecision::Allowed);
    }

    #[test]
    fn test_group_requires_authorization() {
        let acl = acl(&[1]);
        let group = -100123;
        assert_eq!(
            acl.check_access(42, group).unwrap(),
            AccessDecision::ChannelUnauthorized
        );
        // Admins bypass channel checks
        assert_eq!(acl.check_access(1, group).unwrap(), AccessDecision::Allowed);

        assert!(acl.authorize_channel(group, Some("Group"), 1).unwrap());
        assert!(!acl.authorize_channel(group, Some("Group"), 1).unwrap());
        assert_eq!(acl.check_access(42, group).unwrap(), AccessDecision::Allowed);

        assert!(acl.revoke_channel(group).unwrap());
        assert!(!acl.revoke_channel(group).unwrap());
        assert!(!acl.check_access(42, group).unwrap().is_allowed());
    }

    #[test]
    fn test_ban_overrides_everything() {
        let acl = acl(&[1]);
        assert_eq!(acl.ban(42, 1).unwrap(), BanOutcome::Banned);
        assert_eq!(acl.ban(42, 1).unwrap(), BanOutcome::AlreadyBanned);
        let decision = acl.check_access(42, 42).unwrap();
        assert_eq!(decision, AccessDecision::Banned);
        assert_eq!(decision.denial_message(), Some(MSG_BANNED));

        assert!(acl.unban(42).unwrap());
        assert!(!acl.unban(42).unwrap());
        assert!(acl.check_access(42, 42).unwrap().is_allowed());
    }

    #[test]
    fn test_admins_cannot_be_banned() {
        let acl = acl(&[1]);
        assert_eq!(acl.ban(1, 1).unwrap(), BanOutcome::IsAdmin);
        assert!(acl.make_admin(7, 1).unwrap());
        assert!(acl.is_admin(7).unwrap());
        assert_eq!(acl.ban(7, 1).unwrap(), BanOutcome::IsAdmin);
        // Config admins are already admins
        assert!(!acl.make_admin(1, 1).unwrap());
    }

    #[test]
    fn test_access_requests_cleared_by_authorization() {
        let acl = acl(&[1]);
        acl.record_access_request(-5, Some("Chat"), 42).unwrap();
        assert_eq!(acl.pending_requests().unwrap().len(), 1);
        acl.authorize_channel(-5, None, 1).unwrap();
        assert!(acl.pending_requests().unwrap().is_empty());
    }

    #[test]
    fn test_format_channels() {
        let acl = acl(&[1]);
        assert!(format_channels(&acl.list_channels().unwrap()).contains("No authorized"));
        acl.authorize_channel(-9, Some("Fans <3"), 1).unwrap();
        let text = format_channels(&acl.list_channels().unwrap());
        assert!(text.contains("-9"));
        assert!(text.contains("Fans &lt;3"));
    }
}
