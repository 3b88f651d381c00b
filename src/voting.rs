//! Group polls and quizzes
//!
//! Options are stored as a JSON array on the poll row and each vote stores
//! the chosen option indexes as a JSON array, one row per (poll, user).

use crate::db::{now_ts, Database};
use crate::error::{BotError, BotResult};
use crate::users::html_escape;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;
pub const DEFAULT_DURATION_MINUTES: i64 = 1440;
pub const MAX_DURATION_MINUTES: i64 = 10_080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Single,
    Multiple,
    Anonymous,
    Quiz,
}

impl PollType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multiple => "multiple",
            Self::Anonymous => "anonymous",
            Self::Quiz => "quiz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "multiple" => Some(Self::Multiple),
            "anonymous" => Some(Self::Anonymous),
            "quiz" => Some(Self::Quiz),
            _ => None,
        }
    }

    fn emoji(&self) -> &'static str {
        match self {
            Self::Single => "1️⃣",
            Self::Multiple => "🔢",
            Self::Anonymous => "👤",
            Self::Quiz => "🧠",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Single => "Single Choice",
            Self::Multiple => "Multiple Choice",
            Self::Anonymous => "Anonymous",
            Self::Quiz => "Quiz",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Closed,
    Cancelled,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Parameters for a new poll
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub creator_id: i64,
    pub chat_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub poll_type: PollType,
    pub correct_option: Option<usize>,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Poll {
    pub id: i64,
    pub creator_id: i64,
    pub chat_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub correct_option: Option<usize>,
    pub is_anonymous: bool,
    pub allows_multiple: bool,
    pub duration_minutes: i64,
    pub status: PollStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub closed_at: Option<i64>,
}

impl Poll {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Tallies and the quiz answer stay hidden while a quiz is running
    pub fn results_visible(&self) -> bool {
        self.poll_type != PollType::Quiz || self.status != PollStatus::Active
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollResults {
    pub counts: Vec<i64>,
    /// Option selections across all voters
    pub total_votes: i64,
    pub unique_voters: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserVote {
    pub poll_id: i64,
    pub poll_title: String,
    pub option_ids: Vec<usize>,
    pub voted_at: i64,
}

/// Result of a vote
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    /// True when an earlier vote by the same user was replaced
    pub changed: bool,
    pub results: PollResults,
}

pub struct PollStore {
    db: Arc<Database>,
}

impl PollStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create_poll(&self, new: NewPoll) -> BotResult<Poll> {
        let options: Vec<String> = new
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        if options.len() < MIN_OPTIONS {
            return Err(BotError::validation("Poll must have at least 2 options"));
        }
        if options.len() > MAX_OPTIONS {
            return Err(BotError::validation("Poll cannot have more than 10 options"));
        }
        if new.title.trim().is_empty() {
            return Err(BotError::validation("Poll needs a question"));
        }
        if new.duration_minutes < 1 || new.duration_minutes > MAX_DURATION_MINUTES {
            return Err(BotError::validation("Duration must be between 1 minute and 1 week."));
        }
        let correct_option = match new.poll_type {
            PollType::Quiz => match new.correct_option {
                Some(idx) if idx < options.len() => Some(idx),
                Some(_) => return Err(BotError::validation("Correct option index is invalid")),
                None => return Err(BotError::validation("Quiz polls must have a correct answer")),
            },
            _ => None,
        };

        let now = now_ts();
        let expires_at = now + new.duration_minutes * 60;
        let is_anonymous = new.poll_type == PollType::Anonymous;
        let allows_multiple = new.poll_type == PollType::Multiple;
        let options_json = serde_json::to_string(&options)?;

        let id = {
            let conn = self.db.conn();
            conn.execute(
                "INSERT INTO polls (creator_id, chat_id, title, description, poll_type, options,
                                    correct_option, is_anonymous, allows_multiple, duration_minutes,
                                    status, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11, ?12)",
                params![
                    new.creator_id,
                    new.chat_id,
                    new.title.trim(),
                    new.description,
                    new.poll_type.as_str(),
                    options_json,
                    correct_option.map(|c| c as i64),
                    is_anonymous,
                    allows_multiple,
                    new.duration_minutes,
                    now,
                    expires_at,
                ],
            )?;
            conn.last_insert_rowid()
        };

        info!(poll_id = id, chat_id = new.chat_id, "Poll created");
        self.get_poll(id)?
            .ok_or_else(|| BotError::not_found(format!("poll {}", id)))
    }

    pub fn get_poll(&self, poll_id: i64) -> BotResult<Option<Poll>> {
        let conn = self.db.conn();
        let poll = conn
            .query_row(
                &format!("SELECT {} FROM polls WHERE id = ?1", POLL_COLUMNS),
                params![poll_id],
                row_to_poll,
            )
            .optional()?;
        Ok(poll)
    }

    fn require_poll(&self, poll_id: i64) -> BotResult<Poll> {
        self.get_poll(poll_id)?
            .ok_or_else(|| BotError::validation("Poll not found"))
    }

    fn set_closed(&self, poll_id: i64) -> BotResult<()> {
        self.db.conn().execute(
            "UPDATE polls SET status = 'closed', closed_at = ?2 WHERE id = ?1 AND status = 'active'",
            params![poll_id, now_ts()],
        )?;
        Ok(())
    }

    /// Cast or replace a vote
    pub fn vote(&self, poll_id: i64, user_id: i64, option_ids: &[usize]) -> BotResult<VoteReceipt> {
        let poll = self.require_poll(poll_id)?;
        if poll.status != PollStatus::Active {
            return Err(BotError::validation("Poll is not active"));
        }
        if poll.is_expired(now_ts()) {
            self.set_closed(poll_id)?;
            return Err(BotError::validation("Poll has expired"));
        }

        let mut chosen: Vec<usize> = Vec::new();
        let mut seen = HashSet::new();
        for &id in option_ids {
            if id >= poll.options.len() {
                return Err(BotError::validation(format!("Invalid option ID: {}", id + 1)));
            }
            if seen.insert(id) {
                chosen.push(id);
            }
        }
        if chosen.is_empty() {
            return Err(BotError::validation("Choose at least one option"));
        }
        if !poll.allows_multiple && chosen.len() > 1 {
            return Err(BotError::validation("This poll only allows single choice"));
        }

        let json = serde_json::to_string(&chosen)?;
        let changed = {
            let conn = self.db.conn();
            let existing = conn
                .query_row(
                    "SELECT id FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
                    params![poll_id, user_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            match existing {
                Some(vote_id) => {
                    conn.execute(
                        "UPDATE poll_votes SET option_ids = ?2, voted_at = ?3 WHERE id = ?1",
                        params![vote_id, json, now_ts()],
                    )?;
                    true
                }
                None => {
                    conn.execute(
                        "INSERT INTO poll_votes (poll_id, user_id, option_ids, voted_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![poll_id, user_id, json, now_ts()],
                    )?;
                    false
                }
            }
        };

        Ok(VoteReceipt {
            changed,
            results: self.results(poll_id)?,
        })
    }

    pub fn results(&self, poll_id: i64) -> BotResult<PollResults> {
        let poll = self.require_poll(poll_id)?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT option_ids FROM poll_votes WHERE poll_id = ?1")?;
        let rows = stmt.query_map(params![poll_id], |row| row.get::<_, String>(0))?;

        let mut results = PollResults {
            counts: vec![0; poll.options.len()],
            ..Default::default()
        };
        for row in rows {
            let ids: Vec<usize> = serde_json::from_str(&row?)?;
            results.unique_voters += 1;
            for id in ids {
                if let Some(count) = results.counts.get_mut(id) {
                    *count += 1;
                    results.total_votes += 1;
                }
            }
        }
        Ok(results)
    }

    /// Options chosen by one user, if they voted
    pub fn user_choice(&self, poll_id: i64, user_id: i64) -> BotResult<Vec<usize>> {
        let raw = self
            .db
            .conn()
            .query_row(
                "SELECT option_ids FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
                params![poll_id, user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Close a poll. Only its creator may do this.
    pub fn close_poll(&self, poll_id: i64, user_id: i64) -> BotResult<Poll> {
        let poll = self.require_poll(poll_id)?;
        if poll.creator_id != user_id {
            return Err(BotError::validation("Only the poll creator can close this poll"));
        }
        if poll.status != PollStatus::Active {
            return Err(BotError::validation("Poll is already closed"));
        }
        self.set_closed(poll_id)?;
        info!(poll_id, "Poll closed by creator");
        self.require_poll(poll_id)
    }

    pub fn active_polls(&self, chat_id: i64) -> BotResult<Vec<Poll>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM polls WHERE chat_id = ?1 AND status = 'active' AND expires_at > ?2
             ORDER BY created_at DESC",
            POLL_COLUMNS
        ))?;
        let rows = stmt.query_map(params![chat_id, now_ts()], row_to_poll)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn user_votes(&self, user_id: i64) -> BotResult<Vec<UserVote>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT v.poll_id, p.title, v.option_ids, v.voted_at
             FROM poll_votes v JOIN polls p ON p.id = v.poll_id
             WHERE v.user_id = ?1
             ORDER BY v.voted_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut votes = Vec::new();
        for row in rows {
            let (poll_id, poll_title, raw, voted_at) = row?;
            votes.push(UserVote {
                poll_id,
                poll_title,
                option_ids: serde_json::from_str(&raw)?,
                voted_at,
            });
        }
        Ok(votes)
    }

    /// Close every active poll past its expiry. Returns how many were closed.
    pub fn close_expired(&self) -> BotResult<usize> {
        let now = now_ts();
        let closed = self.db.conn().execute(
            "UPDATE polls SET status = 'closed', closed_at = ?1
             WHERE status = 'active' AND expires_at <= ?1",
            params![now],
        )?;
        if closed > 0 {
            info!(closed, "Closed expired polls");
        }
        Ok(closed)
    }

    #[cfg(test)]
    fn force_expiry(&self, poll_id: i64, expires_at: i64) {
        self.db
            .conn()
            .execute(
                "UPDATE polls SET expires_at = ?2 WHERE id = ?1",
                params![poll_id, expires_at],
            )
            .unwrap();
    }
}

const POLL_COLUMNS: &str = "id, creator_id, chat_id, title, description, poll_type, options, \
     correct_option, is_anonymous, allows_multiple, duration_minutes, status, created_at, \
     expires_at, closed_at";

fn row_to_poll(row: &rusqlite::Row<'_>) -> rusqlite::Result<Poll> {
    let poll_type: String = row.get(5)?;
    let options_json: String = row.get(6)?;
    let status: String = row.get(11)?;
    let options: Vec<String> = serde_json::from_str(&options_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Poll {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        chat_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        poll_type: PollType::parse(&poll_type).unwrap_or(PollType::Single),
        options,
        correct_option: row.get::<_, Option<i64>>(7)?.map(|c| c as usize),
        is_anonymous: row.get(8)?,
        allows_multiple: row.get(9)?,
        duration_minutes: row.get(10)?,
        status: PollStatus::parse(&status).unwrap_or(PollStatus::Closed),
        created_at: row.get(12)?,
        expires_at: row.get(13)?,
        closed_at: row.get(14)?,
    })
}

// ============ Command parsing ============

/// Split on whitespace, keeping "double quoted" or 'single quoted' runs together
pub fn split_quoted(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' || c == '“' || c == '”' => {
                quote = Some(if c == '“' { '”' } else { c });
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    parts.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        parts.push(current);
    }
    parts
}

/// Parse `/poll "Question" "A" "B" [--multiple] [--anonymous] [--quiz=N] [--duration=M]`.
/// `Question | A | B` is accepted too.
pub fn parse_poll_command(args: &str, creator_id: i64, chat_id: i64) -> Result<NewPoll, String> {
    let parts = if args.contains('|') {
        let mut flags = Vec::new();
        let mut fields: Vec<String> = Vec::new();
        for field in args.split('|') {
            let mut words = Vec::new();
            for word in field.split_whitespace() {
                if word.starts_with("--") {
                    flags.push(word.to_string());
                } else {
                    words.push(word);
                }
            }
            fields.push(words.join(" "));
        }
        fields.extend(flags);
        fields
    } else {
        split_quoted(args)
    };

    let (flags, texts): (Vec<String>, Vec<String>) =
        parts.into_iter().partition(|p| p.starts_with("--"));
    let texts: Vec<String> = texts.into_iter().filter(|t| !t.trim().is_empty()).collect();

    if texts.len() < 3 {
        return Err("❌ Please provide a question and at least 2 options in quotes.\n\n\
                    Example: <code>/poll \"Question?\" \"Option 1\" \"Option 2\"</code>"
            .to_string());
    }
    if texts.len() - 1 > MAX_OPTIONS {
        return Err("❌ Maximum 10 options allowed.".to_string());
    }

    let mut poll = NewPoll {
        creator_id,
        chat_id,
        title: texts[0].clone(),
        description: None,
        options: texts[1..].to_vec(),
        poll_type: PollType::Single,
        correct_option: None,
        duration_minutes: DEFAULT_DURATION_MINUTES,
    };

    for flag in flags {
        if flag == "--multiple" {
            poll.poll_type = PollType::Multiple;
        } else if flag == "--anonymous" {
            poll.poll_type = PollType::Anonymous;
        } else if let Some(n) = flag.strip_prefix("--quiz=") {
            let idx: usize = n
                .parse()
                .map_err(|_| "❌ Invalid quiz format. Use --quiz=1 (1-based index).".to_string())?;
            if idx == 0 || idx > poll.options.len() {
                return Err("❌ Invalid correct option index.".to_string());
            }
            poll.poll_type = PollType::Quiz;
            poll.correct_option = Some(idx - 1);
        } else if let Some(n) = flag.strip_prefix("--duration=") {
            let minutes: i64 = n
                .parse()
                .map_err(|_| "❌ Invalid duration format. Use --duration=60 (minutes).".to_string())?;
            if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
                return Err("❌ Duration must be between 1 minute and 1 week.".to_string());
            }
            poll.duration_minutes = minutes;
        } else {
            return Err(format!("❌ Unknown option {}", html_escape(&flag)));
        }
    }

    Ok(poll)
}

pub fn usage() -> &'static str {
    "📊 <b>Create a Poll</b>\n\n\
     <b>Usage:</b> <code>/poll \"Question\" \"Option 1\" \"Option 2\" ...</code>\n\n\
     <b>Options:</b>\n\
     • <code>--multiple</code> multiple choice\n\
     • <code>--anonymous</code> anonymous voting\n\
     • <code>--quiz=2</code> quiz mode, option 2 is correct\n\
     • <code>--duration=60</code> duration in minutes (default 24h)\n\n\
     <b>Example:</b> <code>/poll \"What is 2+2?\" \"3\" \"4\" \"5\" --quiz=2</code>"
}

fn progress_bar(count: i64, total: i64, width: usize) -> (String, f64) {
    let pct = count as f64 / total.max(1) as f64 * 100.0;
    let filled = ((width as f64) * pct / 100.0) as usize;
    let bar = "█".repeat(filled) + &"░".repeat(width.saturating_sub(filled));
    (bar, pct)
}

/// Button label for one option
/// Option button text without tallies
pub fn plain_option_label(option: &str, chosen: bool) -> String {
    let check = if chosen { "✅ " } else { "" };
    format!("{}{}", check, option)
}

pub fn option_label(option: &str, count: i64, total: i64, chosen: bool) -> String {
    let (bar, pct) = progress_bar(count, total, 10);
    let check = if chosen { "✅ " } else { "" };
    format!("{}{} ({}) {} {:.1}%", check, option, count, bar, pct)
}

/// Poll message body
pub fn format_poll(poll: &Poll, results: &PollResults, show_results: bool, now: i64) -> String {
    let status_emoji = match poll.status {
        PollStatus::Active => "🗳️",
        PollStatus::Closed => "🔒",
        PollStatus::Cancelled => "❌",
    };
    let mut out = format!(
        "{} <b>Poll #{}:</b> {}\n{} <b>Type:</b> {}\n",
        status_emoji,
        poll.id,
        html_escape(&poll.title),
        poll.poll_type.emoji(),
        poll.poll_type.label()
    );
    if let Some(ref desc) = poll.description {
        out.push_str(&format!("📝 {}\n", html_escape(desc)));
    }
    out.push_str(&format!(
        "\n📊 <b>Total Votes:</b> {} from {} users\n",
        results.total_votes, results.unique_voters
    ));

    if poll.status == PollStatus::Active {
        let left = poll.expires_at - now;
        if left > 0 {
            out.push_str(&format!("⏰ <b>Time Left:</b> {}h {}m\n", left / 3600, (left % 3600) / 60));
        } else {
            out.push_str("⏰ <b>Status:</b> Expired (closing soon)\n");
        }
    }

    if show_results || poll.status != PollStatus::Active {
        out.push_str("\n<b>Results:</b>\n");
        let max_votes = results.counts.iter().copied().max().unwrap_or(0);
        for (i, option) in poll.options.iter().enumerate() {
            let count = results.counts.get(i).copied().unwrap_or(0);
            let (bar, pct) = progress_bar(count, results.total_votes, 15);
            let crown = if count == max_votes && count > 0 { "👑 " } else { "" };
            out.push_str(&format!(
                "{}<b>{}.</b> {}\n   {} {} votes ({:.1}%)\n\n",
                crown,
                i + 1,
                html_escape(option),
                bar,
                count,
                pct
            ));
        }
        if poll.poll_type == PollType::Quiz {
            if let Some(answer) = poll.correct_option.and_then(|c| poll.options.get(c)) {
                out.push_str(&format!("✅ <b>Correct Answer:</b> {}\n", html_escape(answer)));
            }
        }
    }
    out
}

/// Reply for /polls
pub fn format_poll_list(polls: &[Poll]) -> String {
    if polls.is_empty() {
        return "📊 No active polls in this chat.\n\nCreate one with /poll".to_string();
    }
    let mut out = String::from("📊 <b>Active Polls</b>\n\n");
    for poll in polls {
        out.push_str(&format!(
            "• <b>#{}</b> {} ({} options)\n",
            poll.id,
            html_escape(&poll.title),
            poll.options.len()
        ));
    }
    out.push_str("\nVote with <code>/vote &lt;poll_id&gt; &lt;option&gt;</code>");
    out
}

/// Parse `/vote <poll_id> <n[,n...]>` into a poll id and 0-based options
pub fn parse_vote_command(args: &str) -> Result<(i64, Vec<usize>), String> {
    let usage = "❌ Invalid format. Use: <code>/vote &lt;poll_id&gt; &lt;option_number&gt;</code>";
    let mut parts = args.split_whitespace();
    let poll_id = parts
        .next()
        .and_then(|p| p.trim_start_matches('#').parse::<i64>().ok())
        .ok_or_else(|| usage.to_string())?;
    let raw = parts.next().ok_or_else(|| usage.to_string())?;

    let mut options = Vec::new();
    for piece in raw.split(',') {
        let n: usize = piece.trim().parse().map_err(|_| usage.to_string())?;
        if n == 0 {
            return Err("❌ Option numbers must be positive.".to_string());
        }
        options.push(n - 1);
    }
    Ok((poll_id, options))
}

/// Parse `/quiz Question | correct_number | A | B ...` (1-based answer)
pub fn parse_quiz_command(args: &str, creator_id: i64, chat_id: i64) -> Result<NewPoll, String> {
    let usage = "❌ Use: <code>/quiz Question | correct_number | Option 1 | Option 2 ...</code>";
    let fields: Vec<&str> = args.split('|').map(str::trim).collect();
    if fields.len() < 4 || fields[0].is_empty() {
        return Err(usage.to_string());
    }
    let correct: usize = fields[1].parse().map_err(|_| usage.to_string())?;
    let options: Vec<String> = fields[2..]
        .iter()
        .filter(|o| !o.is_empty())
        .map(|o| o.to_string())
        .collect();
    if options.len() > MAX_OPTIONS {
        return Err("❌ Maximum 10 options allowed.".to_string());
    }
    if correct == 0 || correct > options.len() {
        return Err("❌ Invalid correct option index.".to_string());
    }
    Ok(NewPoll {
        creator_id,
        chat_id,
        title: fields[0].to_string(),
        description: None,
        options,
        poll_type: PollType::Quiz,
        correct_option: Some(correct - 1),
        duration_minutes: DEFAULT_DURATION_MINUTES,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PollStore {
        PollStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn new_poll(poll_type: PollType, options: &[&str]) -> NewPoll {
        NewPoll {
            creator_id: 1,
            chat_id: -100,
            title: "Lunch?".to_string(),
            description: None,
            options: options.iter().map(|s| s.to_string()).collect(),
            poll_type,
            correct_option: None,
            duration_minutes: 60,
        }
    }

    #[test]
    fn test_option_count_bounds() {
        let store = store();
        assert!(store.create_poll(new_poll(PollType::Single, &["only"])).is_err());
        let eleven: Vec<&str> = vec!["x"; 11];
        assert!(store.create_poll(new_poll(PollType::Single, &eleven)).is_err());
        assert!(store.create_poll(new_poll(PollType::Single, &["a", "b"])).is_ok());
    }

    #[test]
    fn test_quiz_requires_valid_answer() {
        let store = store();
        let mut quiz = new_poll(PollType::Quiz, &["3", "4"]);
        assert!(store.create_poll(quiz.clone()).is_err());
        quiz.correct_option = Some(2);
        assert!(store.create_poll(quiz.clone()).is_err());
        quiz.correct_option = Some(1);
        let poll = store.create_poll(quiz).unwrap();
        assert_eq!(poll.correct_option, Some(1));
    }

    #[test]
    fn test_single_choice_vote_replaced() {
        let store = store();
        let poll = store.create_poll(new_poll(PollType::Single, &["a", "b", "c"])).unwrap();

        let first = store.vote(poll.id, 7, &[0]).unwrap();
        assert!(!first.changed);
        assert!(store.vote(poll.id, 7, &[0, 1]).is_err());

        let second = store.vote(poll.id, 7, &[2]).unwrap();
        assert!(second.changed);
        assert_eq!(second.results.counts, vec![0, 0, 1]);
        assert_eq!(second.results.unique_voters, 1);
        assert_eq!(store.user_choice(poll.id, 7).unwrap(), vec![2]);
    }

    #[test]
    fn test_multiple_choice_counts() {
        let store = store();
        let poll = store.create_poll(new_poll(PollType::Multiple, &["a", "b", "c"])).unwrap();
        store.vote(poll.id, 1, &[0, 1, 1]).unwrap();
        store.vote(poll.id, 2, &[1]).unwrap();

        let results = store.results(poll.id).unwrap();
        assert_eq!(results.counts, vec![1, 2, 0]);
        assert_eq!(results.total_votes, 3);
        assert_eq!(results.unique_voters, 2);
        assert!(store.vote(poll.id, 3, &[5]).is_err());
        assert!(store.vote(poll.id, 3, &[]).is_err());
    }

    #[test]
    fn test_expired_poll_auto_closes() {
        let store = store();
        let poll = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        store.force_expiry(poll.id, now_ts() - 1);

        let err = store.vote(poll.id, 7, &[0]).unwrap_err();
        assert!(err.to_string().contains("expired"));
        assert_eq!(store.get_poll(poll.id).unwrap().unwrap().status, PollStatus::Closed);
    }

    #[test]
    fn test_close_only_by_creator() {
        let store = store();
        let poll = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        assert!(store.close_poll(poll.id, 99).is_err());
        let closed = store.close_poll(poll.id, 1).unwrap();
        assert_eq!(closed.status, PollStatus::Closed);
        assert!(closed.closed_at.is_some());
        assert!(store.close_poll(poll.id, 1).is_err());
        assert!(store.vote(poll.id, 7, &[0]).is_err());
    }

    #[test]
    fn test_active_polls_and_cleanup() {
        let store = store();
        let a = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        let b = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        store.force_expiry(a.id, now_ts() - 10);

        let active = store.active_polls(-100).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        assert_eq!(store.close_expired().unwrap(), 1);
        assert_eq!(store.close_expired().unwrap(), 0);
    }

    #[test]
    fn test_user_votes() {
        let store = store();
        let poll = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        store.vote(poll.id, 5, &[1]).unwrap();
        let votes = store.user_votes(5).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].poll_title, "Lunch?");
        assert_eq!(votes[0].option_ids, vec![1]);
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(
            split_quoted(r#""Favorite color?" Red "Dark blue" --multiple"#),
            vec!["Favorite color?", "Red", "Dark blue", "--multiple"]
        );
        assert_eq!(split_quoted(r#"“Smart quotes” ok"#), vec!["Smart quotes", "ok"]);
    }

    #[test]
    fn test_parse_poll_command() {
        let poll = parse_poll_command(r#""What is 2+2?" "3" "4" "5" --quiz=2"#, 1, -1).unwrap();
        assert_eq!(poll.poll_type, PollType::Quiz);
        assert_eq!(poll.correct_option, Some(1));
        assert_eq!(poll.options, vec!["3", "4", "5"]);

        let piped = parse_poll_command("Pizza? | Yes | No --duration=30", 1, -1).unwrap();
        assert_eq!(piped.title, "Pizza?");
        assert_eq!(piped.options, vec!["Yes", "No"]);
        assert_eq!(piped.duration_minutes, 30);

        assert!(parse_poll_command(r#""Q" "A""#, 1, -1).is_err());
        assert!(parse_poll_command(r#""Q" "A" "B" --quiz=3"#, 1, -1).is_err());
        assert!(parse_poll_command(r#""Q" "A" "B" --duration=0"#, 1, -1).is_err());
    }

    #[test]
    fn test_parse_vote_command() {
        assert_eq!(parse_vote_command("3 2").unwrap(), (3, vec![1]));
        assert_eq!(parse_vote_command("#3 1,2").unwrap(), (3, vec![0, 1]));
        assert!(parse_vote_command("3 0").is_err());
        assert!(parse_vote_command("x 1").is_err());
    }

    #[test]
    fn test_results_visible_only_after_quiz_closes() {
        let store = store();
        let mut quiz = new_poll(PollType::Quiz, &["3", "4"]);
        quiz.correct_option = Some(1);
        let quiz = store.create_poll(quiz).unwrap();
        assert!(!quiz.results_visible());
        assert!(store.close_poll(quiz.id, 1).unwrap().results_visible());

        let single = store.create_poll(new_poll(PollType::Single, &["a", "b"])).unwrap();
        assert!(single.results_visible());
    }

    #[test]
    fn test_format_poll_shows_quiz_answer_when_closed() {
        let store = store();
        let mut quiz = new_poll(PollType::Quiz, &["3", "4"]);
        quiz.correct_option = Some(1);
        let poll = store.create_poll(quiz).unwrap();
        store.vote(poll.id, 2, &[1]).unwrap();
        let closed = store.close_poll(poll.id, 1).unwrap();
        let results = store.results(poll.id).unwrap();
        let text = format_poll(&closed, &results, false, now_ts());
        assert!(text.contains("Correct Answer:</b> 4"));
        assert!(text.contains("👑"));
    }
    #[test]
    fn test_parse_quiz_command() {
        let quiz = parse_quiz_command("2+2? | 2 | 3 | 4 | 5", 1, -1).unwrap();
        assert_eq!(quiz.poll_type, PollType::Quiz);
        assert_eq!(quiz.correct_option, Some(1));
        assert_eq!(quiz.options, vec!["3", "4", "5"]);

        assert!(parse_quiz_command("2+2? | 4 | 3 | 4", 1, -1).is_err());
        assert!(parse_quiz_command("2+2? | x | 3 | 4", 1, -1).is_err());
        assert!(parse_quiz_command("2+2? | 1 | 3", 1, -1).is_err());
    }
}
