//! Reminders and the background poller that delivers them
//!
//! Times are stored in UTC. Parsing happens in the user's timezone.

use crate::db::{now_ts, Database};
use crate::error::{BotError, BotResult};
use crate::timezone;
use crate::users::html_escape;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    Hourly,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hourly" | "hour" => Some(Self::Hourly),
            "daily" | "day" => Some(Self::Daily),
            "weekly" | "week" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn interval_secs(&self) -> i64 {
        match self {
            Self::Hourly => 3600,
            Self::Daily => 86_400,
            Self::Weekly => 7 * 86_400,
        }
    }

    /// First occurrence after `now`, stepping from `from`
    pub fn next_after(&self, from: i64, now: i64) -> i64 {
        let step = self.interval_secs();
        if from > now {
            return from;
        }
        let missed = (now - from) / step + 1;
        from + missed * step
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub message: String,
    pub remind_at: i64,
    pub recurrence: Option<Recurrence>,
    pub is_active: bool,
    pub is_sent: bool,
}

/// A reminder ready for delivery
#[derive(Debug, Clone)]
pub struct Notification {
    pub reminder_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
}

/// Parsed `/remind` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderRequest {
    pub remind_at: DateTime<Utc>,
    pub message: String,
    pub recurrence: Option<Recurrence>,
}

static RELATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:in\s+)?(\d+)\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?|w|weeks?)\b")
        .expect("valid regex")
});
static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})\s+(\d{1,2}):(\d{2})\b").expect("valid regex")
});
static TOMORROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^tomorrow\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("valid regex")
});
static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2}):(\d{2})\s*(am|pm)?\b").expect("valid regex"));
static HOUR_AMPM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d{1,2})\s*(am|pm)\b").expect("valid regex"));
static RECURRENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:every\s+(hour|day|week)|(hourly|daily|weekly))\s*$").expect("valid regex")
});

fn hour_24(hour: u32, ampm: Option<&str>) -> Option<u32> {
    let hour = match ampm.map(|s| s.to_lowercase()) {
        Some(ref s) if s == "pm" && hour != 12 => hour + 12,
        Some(ref s) if s == "am" && hour == 12 => 0,
        _ => hour,
    };
    (hour < 24).then_some(hour)
}

fn cap_u32(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

/// Parse the time at the start of `text`, returning it with the rest of the text
pub fn parse_when<'a>(text: &'a str, now: DateTime<Utc>, tz: Tz) -> Option<(DateTime<Utc>, &'a str)> {
    let text = text.trim_start();
    let local_now = now.with_timezone(&tz);

    if let Some(caps) = RELATIVE_RE.captures(text) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let delta = match unit.chars().next()? {
            'm' => ChronoDuration::try_minutes(n),
            'h' => ChronoDuration::try_hours(n),
            'd' => ChronoDuration::try_days(n),
            _ => ChronoDuration::try_weeks(n),
        }?;
        return Some((now.checked_add_signed(delta)?, &text[caps.get(0)?.end()..]));
    }

    if let Some(caps) = DATETIME_RE.captures(text) {
        let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, cap_u32(&caps, 2)?, cap_u32(&caps, 3)?)?;
        let time = NaiveTime::from_hms_opt(cap_u32(&caps, 4)?, cap_u32(&caps, 5)?, 0)?;
        let at = timezone::to_utc(date.and_time(time), tz)?;
        return Some((at, &text[caps.get(0)?.end()..]));
    }

    if let Some(caps) = TOMORROW_RE.captures(text) {
        let hour = hour_24(cap_u32(&caps, 1)?, caps.get(3).map(|m| m.as_str()))?;
        let minute = cap_u32(&caps, 2).unwrap_or(0);
        let date = local_now.date_naive().succ_opt()?;
        let at = timezone::to_utc(date.and_time(NaiveTime::from_hms_opt(hour, minute, 0)?), tz)?;
        return Some((at, &text[caps.get(0)?.end()..]));
    }

    let clock = CLOCK_RE
        .captures(text)
        .and_then(|caps| {
            let hour = hour_24(cap_u32(&caps, 1)?, caps.get(3).map(|m| m.as_str()))?;
            Some((hour, cap_u32(&caps, 2)?, caps.get(0)?.end()))
        })
        .or_else(|| {
            HOUR_AMPM_RE.captures(text).and_then(|caps| {
                let hour = hour_24(cap_u32(&caps, 1)?, caps.get(2).map(|m| m.as_str()))?;
                Some((hour, 0, caps.get(0)?.end()))
            })
        });
    if let Some((hour, minute, end)) = clock {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let today = local_now.date_naive();
        let mut at = timezone::to_utc(today.and_time(time), tz)?;
        if at <= now {
            at = timezone::to_utc(today.succ_opt()?.and_time(time), tz)?;
        }
        return Some((at, &text[end..]));
    }

    None
}

/// Parse `/remind <when> <message> [every day|hour|week]`
pub fn parse_request(text: &str, now: DateTime<Utc>, tz: Tz) -> Result<ReminderRequest, String> {
    let (remind_at, rest) = parse_when(text, now, tz).ok_or_else(|| {
        "❌ Please specify when to remind you.\n\nExamples: <code>in 30m</code>, <code>2h</code>, \
         <code>tomorrow 9am</code>, <code>15:30</code>, <code>2025-01-31 09:00</code>"
            .to_string()
    })?;

    let mut message = rest.trim().to_string();
    let mut recurrence = None;
    if let Some(caps) = RECURRENCE_RE.captures(&message) {
        let word = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
        recurrence = Recurrence::parse(word);
        let start = caps.get(0).map_or(message.len(), |m| m.start());
        message.truncate(start);
    }

    if message.trim().is_empty() {
        return Err("❌ Please specify what to remind you about.\n\nExample: <code>/remind in 30m buy groceries</code>".to_string());
    }
    if remind_at <= now {
        return Err("❌ Reminder time must be in the future!".to_string());
    }
    Ok(ReminderRequest {
        remind_at,
        message: message.trim().to_string(),
        recurrence,
    })
}

pub struct ReminderStore {
    db: Arc<Database>,
}

const REMINDER_COLUMNS: &str = "id, user_id, chat_id, message, remind_at, recurrence, is_active, is_sent";

impl ReminderStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        user_id: i64,
        chat_id: i64,
        message: &str,
        remind_at: i64,
        recurrence: Option<Recurrence>,
    ) -> BotResult<Reminder> {
        if message.trim().is_empty() {
            return Err(BotError::validation("Reminder message cannot be empty"));
        }
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO reminders (user_id, chat_id, message, remind_at, recurrence, is_active, is_sent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6)",
            params![user_id, chat_id, message.trim(), remind_at, recurrence.map(|r| r.as_str()), now_ts()],
        )?;
        let id = conn.last_insert_rowid();
        info!("Reminder {} created for user {} at {}", id, user_id, remind_at);
        Ok(Reminder {
            id,
            user_id,
            chat_id,
            message: message.trim().to_string(),
            remind_at,
            recurrence,
            is_active: true,
            is_sent: false,
        })
    }

    pub fn get(&self, id: i64) -> BotResult<Option<Reminder>> {
        let reminder = self
            .db
            .conn()
            .query_row(
                &format!("SELECT {} FROM reminders WHERE id = ?1", REMINDER_COLUMNS),
                params![id],
                row_to_reminder,
            )
            .optional()?;
        Ok(reminder)
    }

    /// Active reminders, soonest first
    pub fn list(&self, user_id: i64) -> BotResult<Vec<Reminder>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders WHERE user_id = ?1 AND is_active = 1
             ORDER BY remind_at LIMIT ?2",
            REMINDER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id, LIST_LIMIT as i64], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Owner only; false when there was nothing active to cancel
    pub fn cancel(&self, id: i64, user_id: i64) -> BotResult<bool> {
        let changed = self.db.conn().execute(
            "UPDATE reminders SET is_active = 0 WHERE id = ?1 AND user_id = ?2 AND is_active = 1",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn due(&self, now: i64) -> BotResult<Vec<Reminder>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders WHERE is_active = 1 AND remind_at <= ?1 ORDER BY remind_at",
            REMINDER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![now], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// One-off reminders are deactivated; recurring ones move to their next time
    pub fn mark_sent(&self, id: i64, now: i64) -> BotResult<()> {
        let reminder = self
            .get(id)?
            .ok_or_else(|| BotError::not_found(format!("reminder {}", id)))?;
        let conn = self.db.conn();
        match reminder.recurrence {
            Some(recurrence) => {
                let next = recurrence.next_after(reminder.remind_at, now);
                conn.execute(
                    "UPDATE reminders SET remind_at = ?2, is_sent = 1, sent_at = ?3 WHERE id = ?1",
                    params![id, next, now],
                )?;
                debug!("Reminder {} rescheduled to {}", id, next);
            }
            None => {
                conn.execute(
                    "UPDATE reminders SET is_active = 0, is_sent = 1, sent_at = ?2 WHERE id = ?1",
                    params![id, now],
                )?;
            }
        }
        Ok(())
    }

    pub fn count_active(&self) -> BotResult<i64> {
        let count = self.db.conn().query_row(
            "SELECT COUNT(*) FROM reminders WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let recurrence: Option<String> = row.get(5)?;
    Ok(Reminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chat_id: row.get(2)?,
        message: row.get(3)?,
        remind_at: row.get(4)?,
        recurrence: recurrence.as_deref().and_then(Recurrence::parse),
        is_active: row.get(6)?,
        is_sent: row.get(7)?,
    })
}

pub fn notification_text(reminder: &Reminder) -> String {
    let mut text = format!("⏰ <b>Reminder</b>\n\n{}", html_escape(&reminder.message));
    if let Some(r) = reminder.recurrence {
        text.push_str(&format!("\n\n🔁 Repeats {}", r.as_str()));
    }
    text
}

/// Periodically moves due reminders onto the notification channel
pub struct ReminderPoller {
    store: ReminderStore,
    interval: Duration,
    tx: mpsc::Sender<Notification>,
}

impl ReminderPoller {
    pub fn new(db: Arc<Database>, interval: Duration, tx: mpsc::Sender<Notification>) -> Self {
        Self {
            store: ReminderStore::new(db),
            interval,
            tx,
        }
    }

    /// One pass; returns how many notifications were queued
    pub async fn tick(&self, now: i64) -> BotResult<usize> {
        let due = self.store.due(now)?;
        let mut sent = 0;
        for reminder in due {
            let notification = Notification {
                reminder_id: reminder.id,
                chat_id: reminder.chat_id,
                user_id: reminder.user_id,
                text: notification_text(&reminder),
            };
            if self.tx.send(notification).await.is_err() {
                // Receiver gone, leave the rest for the next process
                break;
            }
            self.store.mark_sent(reminder.id, now)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Run until the notification receiver is dropped
    pub async fn run(self) {
        info!("Reminder poller started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if self.tx.is_closed() {
                info!("Reminder poller stopping");
                return;
            }
            match self.tick(now_ts()).await {
                Ok(0) => {}
                Ok(n) => info!("Delivered {} reminder(s)", n),
                Err(e) => error!("Reminder poll failed: {}", e),
            }
        }
    }
}

pub fn format_created(request: &ReminderRequest, id: i64, tz: Tz) -> String {
    let local = request.remind_at.with_timezone(&tz);
    let mut out = format!(
        "✅ <b>Reminder set!</b>\n\n📝 {}\n⏰ {} ({})\n🆔 #{}",
        html_escape(&request.message),
        local.format("%Y-%m-%d %H:%M"),
        tz.name(),
        id
    );
    if let Some(r) = request.recurrence {
        out.push_str(&format!("\n🔁 Repeats {}", r.as_str()));
    }
    out
}

pub fn format_list(reminders: &[Reminder], tz: Tz) -> String {
    if reminders.is_empty() {
        return "⏰ You have no active reminders.\n\nCreate one with <code>/remind in 30m stretch</code>".to_string();
    }
    let mut out = String::from("⏰ <b>Your Reminders</b>\n\n");
    for r in reminders {
        let when = Utc
            .timestamp_opt(r.remind_at, 0)
            .single()
            .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let repeat = r.recurrence.map(|x| format!(" 🔁 {}", x.as_str())).unwrap_or_default();
        out.push_str(&format!(
            "<b>#{}</b> {}{}\n   {}\n",
            r.id,
            when,
            repeat,
            html_escape(&r.message)
        ));
    }
    out.push_str(&format!("\n🌍 Times shown in {}", tz.name()));
    out
}

pub fn usage() -> &'static str {
    "⏰ <b>Reminders</b>\n\n\
     • <code>/remind in 30m stretch</code>\n\
     • <code>/remind 2h call mom</code>\n\
     • <code>/remind 15:30 meeting</code> · <code>/remind 9pm stream</code>\n\
     • <code>/remind tomorrow 9am standup every day</code>\n\
     • <code>/remind 2025-01-31 09:00 rent</code>\n\
     • <code>/reminders</code> · <code>/cancelreminder &lt;id&gt;</code>\n\n\
     Times use your timezone (see <code>/timezone</code>)."
}
