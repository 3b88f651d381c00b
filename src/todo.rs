//! Personal todo lists
//!
//! Every user gets a default "My Tasks" list on first use. Deleting a task
//! only marks it cancelled; cancelled tasks never show up in listings.

use crate::db::{now_ts, start_of_day_ts, Database};
use crate::error::{BotError, BotResult};
use crate::users::html_escape;
use chrono::{NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_LIST_NAME: &str = "My Tasks";
pub const LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Urgent => "🔴",
            Self::High => "🟠",
            Self::Medium => "🟡",
            Self::Low => "🟢",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" | "progress" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::InProgress => "🔄",
            Self::Completed => "✅",
            Self::Cancelled => "❌",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TodoList {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub task_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub list_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_at: Option<i64>,
    pub tags: Vec<String>,
    pub position: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_at: Option<i64>,
    pub tags: Vec<String>,
}

/// Field changes for `edit`
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub due_at: Option<Option<i64>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TodoStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub overdue: i64,
    pub due_today: i64,
}

impl TodoStats {
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

pub struct TodoStore {
    db: Arc<Database>,
}

const TASK_COLUMNS: &str = "id, list_id, title, description, priority, status, due_at, tags, \
     position, created_at, completed_at";

impl TodoStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Id of the user's default list, creating it if needed
    pub fn ensure_default_list(&self, user_id: i64) -> BotResult<i64> {
        let conn = self.db.conn();
        let existing = conn
            .query_row(
                "SELECT id FROM todo_lists WHERE user_id = ?1 AND is_default = 1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO todo_lists (user_id, name, description, is_default, created_at)
             VALUES (?1, ?2, 'Default task list', 1, ?3)",
            params![user_id, DEFAULT_LIST_NAME, now_ts()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_list(&self, user_id: i64, name: &str, description: Option<&str>) -> BotResult<TodoList> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::validation("List name cannot be empty"));
        }
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO todo_lists (user_id, name, description, is_default, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, name, description, now_ts()],
        )?;
        Ok(TodoList {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
            is_default: false,
            task_count: 0,
        })
    }

    pub fn lists(&self, user_id: i64) -> BotResult<Vec<TodoList>> {
        self.ensure_default_list(user_id)?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT l.id, l.name, l.description, l.is_default,
                    (SELECT COUNT(*) FROM todo_tasks t WHERE t.list_id = l.id AND t.status != 'cancelled')
             FROM todo_lists l WHERE l.user_id = ?1
             ORDER BY l.is_default DESC, l.created_at",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(TodoList {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                is_default: row.get(3)?,
                task_count: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn owns_list(&self, user_id: i64, list_id: i64) -> BotResult<bool> {
        let found = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM todo_lists WHERE id = ?1 AND user_id = ?2",
                params![list_id, user_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Add a task to `list_id`, or to the default list
    pub fn add_task(&self, user_id: i64, list_id: Option<i64>, task: NewTask) -> BotResult<Task> {
        let title = task.title.trim();
        if title.is_empty() {
            return Err(BotError::validation("Please provide a task description."));
        }
        let list_id = match list_id {
            Some(id) => {
                if !self.owns_list(user_id, id)? {
                    return Err(BotError::not_found(format!("list {}", id)));
                }
                id
            }
            None => self.ensure_default_list(user_id)?,
        };

        let now = now_ts();
        let tags = if task.tags.is_empty() {
            None
        } else {
            Some(task.tags.join(","))
        };
        let id = {
            let conn = self.db.conn();
            let position: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM todo_tasks WHERE list_id = ?1",
                params![list_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO todo_tasks (list_id, user_id, title, description, priority, status,
                                         due_at, tags, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?9)",
                params![
                    list_id,
                    user_id,
                    title,
                    task.description,
                    task.priority.unwrap_or(Priority::Medium).as_str(),
                    task.due_at,
                    tags,
                    position,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_task(user_id, id)?
            .ok_or_else(|| BotError::not_found(format!("task {}", id)))
    }

    pub fn get_task(&self, user_id: i64, task_id: i64) -> BotResult<Option<Task>> {
        let task = self
            .db
            .conn()
            .query_row(
                &format!("SELECT {} FROM todo_tasks WHERE id = ?1 AND user_id = ?2", TASK_COLUMNS),
                params![task_id, user_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Open tasks first, then by priority (urgent first), then insertion order
    pub fn tasks(
        &self,
        user_id: i64,
        list_id: Option<i64>,
        status: Option<TaskStatus>,
        include_completed: bool,
    ) -> BotResult<Vec<Task>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM todo_tasks
             WHERE user_id = ?1
               AND status != 'cancelled'
               AND (?2 IS NULL OR list_id = ?2)
               AND (?3 IS NULL OR status = ?3)
               AND (?4 = 1 OR status != 'completed' OR ?3 = 'completed')
             ORDER BY
               CASE status WHEN 'in_progress' THEN 0 WHEN 'pending' THEN 1 ELSE 2 END,
               CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END,
               position
             LIMIT ?5",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                user_id,
                list_id,
                status.map(|s| s.as_str()),
                include_completed,
                LIST_LIMIT as i64
            ],
            row_to_task,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_status(&self, user_id: i64, task_id: i64, status: TaskStatus) -> BotResult<Task> {
        let now = now_ts();
        let completed_at = (status == TaskStatus::Completed).then_some(now);
        let changed = self.db.conn().execute(
            "UPDATE todo_tasks SET status = ?3, updated_at = ?4, completed_at = ?5
             WHERE id = ?1 AND user_id = ?2 AND status != 'cancelled'",
            params![task_id, user_id, status.as_str(), now, completed_at],
        )?;
        if changed == 0 {
            return Err(BotError::not_found(format!("task {}", task_id)));
        }
        self.get_task(user_id, task_id)?
            .ok_or_else(|| BotError::not_found(format!("task {}", task_id)))
    }

    pub fn complete(&self, user_id: i64, task_id: i64) -> BotResult<Task> {
        self.set_status(user_id, task_id, TaskStatus::Completed)
    }

    /// Soft delete
    pub fn delete(&self, user_id: i64, task_id: i64) -> BotResult<Task> {
        self.set_status(user_id, task_id, TaskStatus::Cancelled)
    }

    pub fn edit(&self, user_id: i64, task_id: i64, edit: TaskEdit) -> BotResult<Task> {
        let mut task = self
            .get_task(user_id, task_id)?
            .filter(|t| t.status != TaskStatus::Cancelled)
            .ok_or_else(|| BotError::not_found(format!("task {}", task_id)))?;

        if let Some(title) = edit.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(BotError::validation("Task title cannot be empty"));
            }
            task.title = title;
        }
        if let Some(priority) = edit.priority {
            task.priority = priority;
        }
        if let Some(due) = edit.due_at {
            task.due_at = due;
        }

        self.db.conn().execute(
            "UPDATE todo_tasks SET title = ?3, priority = ?4, due_at = ?5, updated_at = ?6
             WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id, task.title, task.priority.as_str(), task.due_at, now_ts()],
        )?;
        Ok(task)
    }

    pub fn stats(&self, user_id: i64) -> BotResult<TodoStats> {
        let now = now_ts();
        let day_start = start_of_day_ts();
        let day_end = day_start + 86_400;
        let conn = self.db.conn();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(status = 'pending'), 0),
                COALESCE(SUM(status = 'in_progress'), 0),
                COALESCE(SUM(status = 'completed'), 0),
                COALESCE(SUM(status IN ('pending','in_progress') AND due_at IS NOT NULL AND due_at < ?2), 0),
                COALESCE(SUM(status IN ('pending','in_progress') AND due_at >= ?3 AND due_at < ?4), 0)
             FROM todo_tasks WHERE user_id = ?1 AND status != 'cancelled'",
            params![user_id, now, day_start, day_end],
            |row| {
                Ok(TodoStats {
                    total: row.get(0)?,
                    pending: row.get(1)?,
                    in_progress: row.get(2)?,
                    completed: row.get(3)?,
                    overdue: row.get(4)?,
                    due_today: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Task counts across all users, for the dashboard
    pub fn global_counts(&self) -> BotResult<(i64, i64)> {
        let counts = self.db.conn().query_row(
            "SELECT COUNT(*), COALESCE(SUM(status = 'completed'), 0)
             FROM todo_tasks WHERE status != 'cancelled'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let priority: String = row.get(4)?;
    let status: String = row.get(5)?;
    let tags: Option<String> = row.get(7)?;
    Ok(Task {
        id: row.get(0)?,
        list_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        due_at: row.get(6)?,
        tags: tags
            .map(|t| t.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default(),
        position: row.get(8)?,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

// ============ Text parsing ============

static DUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bdue:(\S+)").expect("valid regex"));
static BANGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)(!{1,3})(\s|$)").expect("valid regex"));
static PRIORITY_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|\s)!?(urgent|high|low)(\s|$)").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").expect("valid regex"));
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Parse `due:` values: today, tomorrow, 3d, 2h, 1w or YYYY-MM-DD (end of day UTC)
pub fn parse_due(value: &str, now: i64) -> Option<i64> {
    let value = value.to_lowercase();
    let end_of_day = |ts: i64| {
        let day = Utc.timestamp_opt(ts, 0).single()?.date_naive();
        day.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc().timestamp())
    };

    match value.as_str() {
        "today" => return end_of_day(now),
        "tomorrow" => return end_of_day(now.checked_add(86_400)?),
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        return date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc().timestamp());
    }

    let (split, unit) = value.char_indices().last()?;
    let n: i64 = value[..split].parse().ok()?;
    let unit_secs: i64 = match unit {
        'h' => 3600,
        'd' => 86_400,
        'w' => 7 * 86_400,
        _ => return None,
    };
    let due = n.checked_mul(unit_secs).and_then(|secs| now.checked_add(secs))?;
    // must still be a representable date for display
    Utc.timestamp_opt(due, 0).single().map(|_| due)
}

/// Parse `/todo add` text: `!`/`!!`/`!!!` or a priority word, `#tags`, `due:...`
pub fn parse_task_text(text: &str, now: i64) -> Result<NewTask, String> {
    let mut rest = text.to_string();
    let mut task = NewTask::default();

    if let Some(caps) = DUE_RE.captures(&rest) {
        let raw = caps[1].to_string();
        task.due_at = Some(parse_due(&raw, now).ok_or_else(|| {
            format!(
                "❌ Could not understand due date '{}'. Try today, tomorrow, 3d, 2h or 2025-12-25.",
                html_escape(&raw)
            )
        })?);
        rest = DUE_RE.replace(&rest, " ").into_owned();
    }

    if let Some(caps) = BANGS_RE.captures(&rest) {
        task.priority = Some(match caps[2].len() {
            1 => Priority::Low,
            2 => Priority::High,
            _ => Priority::Urgent,
        });
        rest = BANGS_RE.replace(&rest, " ").into_owned();
    } else if let Some(caps) = PRIORITY_WORD_RE.captures(&rest) {
        task.priority = Priority::parse(&caps[2]);
        rest = PRIORITY_WORD_RE.replace(&rest, " ").into_owned();
    }

    task.tags = TAG_RE
        .captures_iter(&rest)
        .map(|c| c[1].to_lowercase())
        .collect();
    rest = TAG_RE.replace_all(&rest, " ").into_owned();

    task.title = SPACES_RE.replace_all(rest.trim(), " ").into_owned();
    if task.title.is_empty() {
        return Err("❌ Please provide a task description.".to_string());
    }
    Ok(task)
}

fn format_due(due_at: i64, now: i64) -> String {
    let date = Utc
        .timestamp_opt(due_at, 0)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    if due_at < now {
        format!("⚠️ overdue ({})", date)
    } else {
        format!("📅 {}", date)
    }
}

/// Reply for /todos
pub fn format_tasks(tasks: &[Task], stats: &TodoStats, now: i64) -> String {
    if tasks.is_empty() {
        return "📋 <b>Your Todo List</b>\n\nNo tasks found.\n\nUse <code>/todo add &lt;task&gt;</code> to add your first task!".to_string();
    }
    let mut out = String::from("📋 <b>Your Todo List</b>\n\n");
    for task in tasks {
        out.push_str(&format!(
            "{} {} <b>#{}</b> {}",
            task.status.emoji(),
            task.priority.emoji(),
            task.id,
            html_escape(&task.title)
        ));
        if let Some(due) = task.due_at {
            if task.status != TaskStatus::Completed {
                out.push_str(&format!(" {}", format_due(due, now)));
            }
        }
        if !task.tags.is_empty() {
            let tags: Vec<String> = task.tags.iter().map(|t| format!("#{}", t)).collect();
            out.push_str(&format!(" <i>{}</i>", tags.join(" ")));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "\n📊 {} pending · {} in progress · {} done",
        stats.pending, stats.in_progress, stats.completed
    ));
    if stats.overdue > 0 {
        out.push_str(&format!(" · ⚠️ {} overdue", stats.overdue));
    }
    out
}

pub fn format_stats(stats: &TodoStats) -> String {
    format!(
        "📊 <b>Todo Statistics</b>\n\n\
         📝 Total tasks: <b>{}</b>\n\
         ⏳ Pending: <b>{}</b>\n\
         🔄 In progress: <b>{}</b>\n\
         ✅ Completed: <b>{}</b>\n\
         ⚠️ Overdue: <b>{}</b>\n\
         📅 Due today: <b>{}</b>\n\n\
         🎯 Completion rate: <b>{:.1}%</b>",
        stats.total,
        stats.pending,
        stats.in_progress,
        stats.completed,
        stats.overdue,
        stats.due_today,
        stats.completion_rate()
    )
}

pub fn format_lists(lists: &[TodoList]) -> String {
    let mut out = String::from("📚 <b>Your Lists</b>\n\n");
    for list in lists {
        let star = if list.is_default { " ⭐" } else { "" };
        out.push_str(&format!(
            "• <b>#{}</b> {}{} ({} tasks)\n",
            list.id,
            html_escape(&list.name),
            star,
            list.task_count
        ));
    }
    out
}

pub fn usage() -> &'static str {
    "📝 <b>Todo Lists</b>\n\n\
     • <code>/todo add &lt;task&gt;</code> - add a task\n\
     • <code>/todo list [pending|progress|completed]</code> - show tasks\n\
     • <code>/todo done &lt;id&gt;</code> - complete a task\n\
     • <code>/todo start &lt;id&gt;</code> - mark in progress\n\
     • <code>/todo delete &lt;id&gt;</code> - remove a task\n\
     • <code>/todo edit &lt;id&gt; &lt;new text&gt;</code> - change title/priority/due\n\
     • <code>/todo stats</code> · <code>/todo lists</code> · <code>/todo newlist &lt;name&gt;</code>\n\n\
     Priority: <code>!</code> low, <code>!!</code> high, <code>!!!</code> urgent\n\
     Due: <code>due:today</code>, <code>due:tomorrow</code>, <code>due:3d</code>, <code>due:2025-12-25</code>\n\
     Tags: <code>#work #home</code>"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TodoStore {
        TodoStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn task(title: &str, priority: Priority) -> NewTask {
        NewTask {
            title: title.to_string(),
            priority: Some(priority),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_list_created_once() {
        let store = store();
        let a = store.ensure_default_list(1).unwrap();
        let b = store.ensure_default_list(1).unwrap();
        assert_eq!(a, b);
        let lists = store.lists(1).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, DEFAULT_LIST_NAME);
    }

    #[test]
    fn test_positions_increment() {
        let store = store();
        let t1 = store.add_task(1, None, task("one", Priority::Low)).unwrap();
        let t2 = store.add_task(1, None, task("two", Priority::Low)).unwrap();
        assert_eq!(t1.position, 1);
        assert_eq!(t2.position, 2);
    }

    #[test]
    fn test_ordering_by_status_then_priority() {
        let store = store();
        let low = store.add_task(1, None, task("low", Priority::Low)).unwrap();
        let urgent = store.add_task(1, None, task("urgent", Priority::Urgent)).unwrap();
        let medium = store.add_task(1, None, task("medium", Priority::Medium)).unwrap();
        store.set_status(1, medium.id, TaskStatus::InProgress).unwrap();

        let ids: Vec<i64> = store.tasks(1, None, None, true).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![medium.id, urgent.id, low.id]);
    }

    #[test]
    fn test_delete_hides_task() {
        let store = store();
        let t = store.add_task(1, None, task("gone", Priority::Medium)).unwrap();
        store.delete(1, t.id).unwrap();
        assert!(store.tasks(1, None, None, true).unwrap().is_empty());
        // Already cancelled
        assert!(store.delete(1, t.id).is_err());
        assert!(store.complete(1, t.id).is_err());
    }

    #[test]
    fn test_other_users_cannot_touch_task() {
        let store = store();
        let t = store.add_task(1, None, task("mine", Priority::Medium)).unwrap();
        assert!(store.complete(2, t.id).is_err());
        assert!(store.edit(2, t.id, TaskEdit::default()).is_err());
        let other_list = store.ensure_default_list(2).unwrap();
        assert!(store.add_task(1, Some(other_list), task("x", Priority::Low)).is_err());
    }

    #[test]
    fn test_complete_and_stats() {
        let store = store();
        let now = now_ts();
        let done = store.add_task(1, None, task("done", Priority::Medium)).unwrap();
        store
            .add_task(1, None, NewTask { title: "late".into(), due_at: Some(now - 3600), ..Default::default() })
            .unwrap();
        store.add_task(1, None, task("open", Priority::High)).unwrap();
        let completed = store.complete(1, done.id).unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.completed_at.is_some());

        let stats = store.stats(1).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.overdue, 1);
        assert!((stats.completion_rate() - 33.33).abs() < 0.1);

        // Completed tasks hidden unless asked for
        assert_eq!(store.tasks(1, None, None, false).unwrap().len(), 2);
        assert_eq!(store.tasks(1, None, Some(TaskStatus::Completed), false).unwrap().len(), 1);
        assert_eq!(store.global_counts().unwrap(), (3, 1));
    }

    #[test]
    fn test_edit_fields() {
        let store = store();
        let t = store.add_task(1, None, task("old", Priority::Low)).unwrap();
        let edited = store
            .edit(
                1,
                t.id,
                TaskEdit {
                    title: Some("new".into()),
                    priority: Some(Priority::Urgent),
                    due_at: Some(Some(123)),
                },
            )
            .unwrap();
        assert_eq!(edited.title, "new");
        let reloaded = store.get_task(1, t.id).unwrap().unwrap();
        assert_eq!(reloaded.priority, Priority::Urgent);
        assert_eq!(reloaded.due_at, Some(123));
    }

    #[test]
    fn test_custom_list() {
        let store = store();
        let list = store.create_list(1, "Work", None).unwrap();
        store.add_task(1, Some(list.id), task("report", Priority::High)).unwrap();
        store.add_task(1, None, task("groceries", Priority::Low)).unwrap();
        assert_eq!(store.tasks(1, Some(list.id), None, true).unwrap().len(), 1);
        let lists = store.lists(1).unwrap();
        assert_eq!(lists.len(), 2);
        assert!(lists[0].is_default);
        assert!(store.create_list(1, "  ", None).is_err());
    }

    #[test]
    fn test_parse_task_text() {
        let now = 1_700_000_000;
        let t = parse_task_text("!! Finish report due:2d #work #Q4", now).unwrap();
        assert_eq!(t.title, "Finish report");
        assert_eq!(t.priority, Some(Priority::High));
        assert_eq!(t.due_at, Some(now + 2 * 86_400));
        assert_eq!(t.tags, vec!["work", "q4"]);

        let t = parse_task_text("Buy milk urgent", now).unwrap();
        assert_eq!(t.priority, Some(Priority::Urgent));
        assert_eq!(t.title, "Buy milk");

        assert!(parse_task_text("#onlytag", now).is_err());
        assert!(parse_task_text("thing due:someday", now).is_err());
        assert!(parse_task_text("buy milk due:5é", now).is_err());
        assert!(parse_task_text("buy milk due:99999999999999w", now).is_err());
    }

    #[test]
    fn test_parse_due() {
        let now = 1_700_000_000; // 2023-11-14 22:13:20 UTC
        assert_eq!(parse_due("2h", now), Some(now + 7200));
        assert_eq!(parse_due("1w", now), Some(now + 7 * 86_400));
        let today = parse_due("today", now).unwrap();
        assert_eq!(Utc.timestamp_opt(today, 0).unwrap().format("%Y-%m-%d %H:%M").to_string(), "2023-11-14 23:59");
        let tomorrow = parse_due("tomorrow", now).unwrap();
        assert_eq!(tomorrow - today, 86_400);
        assert!(parse_due("2024-12-25", now).is_some());
        assert!(parse_due("x", now).is_none());
        assert!(parse_due("", now).is_none());
        assert!(parse_due("5é", now).is_none());
        assert!(parse_due("é", now).is_none());
        assert!(parse_due("99999999999999w", now).is_none());
        assert!(parse_due("9223372036854775807h", now).is_none());
    }
}
