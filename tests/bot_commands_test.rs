//! Command Routing Integration Tests
//!
//! Drives commands and button presses against a file-backed database
//! without a live Telegram connection.

use async_trait::async_trait;
use communitybot::llm::{ChatMessage, Completion};
use communitybot::telegram::{check_command, execute_callback, execute_command, split_command};
use communitybot::telegram_ui::CallbackAction;
use communitybot::users::TelegramUser;
use communitybot::{BotData, BotResult, CommandContext, Config, Database};
use std::sync::Arc;
use teloxide::types::InlineKeyboardMarkup;
use tempfile::TempDir;

const ADMIN: i64 = 1;
const MEMBER: i64 = 42;
const GROUP: i64 = -100500;

struct CannedCompletion(&'static str);

#[async_trait]
impl Completion for CannedCompletion {
    async fn complete(&self, _system: &str, _messages: &[ChatMessage]) -> BotResult<String> {
        Ok(self.0.to_string())
    }
}

fn create_bot(llm: Option<Arc<dyn Completion>>) -> (BotData, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config {
        db_path: temp_dir.path().join("bot.db"),
        data_dir: temp_dir.path().to_path_buf(),
        casino_data_path: temp_dir.path().join("casino_data.json"),
        admin_user_ids: vec![ADMIN],
        ..Config::default()
    };
    let db = Arc::new(Database::open(&config.db_path).expect("Failed to open database"));
    (BotData::new(config, db, llm, None, None), temp_dir)
}

fn user(id: i64, username: &str) -> TelegramUser {
    TelegramUser {
        telegram_id: id,
        username: Some(username.to_string()),
        first_name: None,
        last_name: None,
    }
}

fn private(id: i64) -> CommandContext {
    CommandContext {
        user: user(id, "member"),
        chat_id: id,
        chat_title: None,
        reply_to: None,
    }
}

fn group(id: i64) -> CommandContext {
    CommandContext {
        user: user(id, "member"),
        chat_id: GROUP,
        chat_title: Some("Test Group".to_string()),
        reply_to: None,
    }
}

async fn run(data: &BotData, ctx: &CommandContext, text: &str) -> String {
    let (cmd, args) = split_command(text).expect("not a command");
    execute_command(data, ctx, &cmd, args)
        .await
        .text
        .unwrap_or_default()
}

#[tokio::test]
async fn test_calculators() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let mines = run(&data, &ctx, "/mines 3 5").await;
    assert!(mines.contains("Multiplier for 3 mines and 5 diamonds"));

    let invalid = run(&data, &ctx, "/mines 20 10").await;
    assert!(invalid.contains("Invalid combination"));

    let b2b = run(&data, &ctx, "/b2b 100 2 10 3").await;
    assert!(b2b.starts_with("<pre>") || b2b.contains("<pre>"));
}

#[tokio::test]
async fn test_unknown_command_only_answered_in_private() {
    let (data, _temp) = create_bot(None);

    let private_reply = execute_command(&data, &private(MEMBER), "/nope", "").await;
    assert!(private_reply.text.unwrap().contains("Unknown command"));

    let group_reply = execute_command(&data, &group(MEMBER), "/nope", "").await;
    assert!(group_reply.is_empty());
}

#[tokio::test]
async fn test_group_access_flow() {
    let (data, _temp) = create_bot(None);
    let member = group(MEMBER);

    let refusal = check_command(&data, &member, "/poll").await.unwrap();
    assert!(refusal.is_some());

    // /request_access stays open in unauthorized groups
    assert!(check_command(&data, &member, "/request_access").await.unwrap().is_none());
    let request = execute_command(&data, &member, "/request_access", "").await;
    assert!(request.admin_notice.unwrap().contains("/grant_access"));

    // Members cannot grant access
    let admin_only = check_command(&data, &member, "/grant_access").await.unwrap();
    assert!(admin_only.is_some());

    let admin = group(ADMIN);
    assert!(check_command(&data, &admin, "/grant_access").await.unwrap().is_none());
    let granted = run(&data, &admin, "/grant_access").await;
    assert!(granted.contains("now authorized"));

    assert!(check_command(&data, &member, "/poll").await.unwrap().is_none());
}

#[tokio::test]
async fn test_poll_vote_by_command_and_button() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let created = execute_command(&data, &ctx, "/poll", "\"Lunch?\" \"Pizza\" \"Sushi\"").await;
    assert!(created.text.unwrap().contains("Lunch?"));
    assert!(created.keyboard.is_some());

    let voted = run(&data, &ctx, "/vote 1 2").await;
    assert!(voted.contains("Vote recorded"));

    let changed = execute_callback(
        &data,
        &ctx.user,
        Some(ctx.chat_id),
        CallbackAction::Vote { poll_id: 1, option: 0 },
    )
    .await;
    assert_eq!(changed.toast.as_deref(), Some("🔄 Vote changed"));
    assert!(changed.edit.is_some());

    let closed = run(&data, &ctx, "/closepoll 1").await;
    assert!(!closed.is_empty());
}

fn button_texts(keyboard: &InlineKeyboardMarkup) -> Vec<String> {
    keyboard
        .inline_keyboard
        .iter()
        .flatten()
        .map(|b| b.text.clone())
        .collect()
}

#[tokio::test]
async fn test_running_quiz_keeps_tallies_hidden() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let created = execute_command(&data, &ctx, "/quiz", "Capital of France? | 1 | Paris | Rome").await;
    assert!(created.keyboard.is_some());

    let voted = execute_command(&data, &ctx, "/vote", "1 1").await;
    let labels = button_texts(&voted.keyboard.expect("vote keyboard"));
    assert!(labels.contains(&"✅ Paris".to_string()));
    assert!(labels.iter().all(|l| !l.contains('%') && !l.contains("(1)")));

    let pressed = execute_callback(
        &data,
        &user(7, "other"),
        Some(ctx.chat_id),
        CallbackAction::Vote { poll_id: 1, option: 1 },
    )
    .await;
    let keyboard = pressed
        .edit
        .and_then(|(_, kb)| kb)
        .or(pressed.markup)
        .expect("refreshed keyboard");
    assert!(button_texts(&keyboard).iter().all(|l| !l.contains('%')));

    let results = execute_callback(&data, &ctx.user, Some(ctx.chat_id), CallbackAction::PollResults(1)).await;
    assert!(results.send.is_none());
}

#[tokio::test]
async fn test_out_of_range_arguments_get_usage_replies() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let mines = run(&data, &ctx, "/mines 4294967295 1").await;
    assert!(mines.contains("Invalid combination"));

    let far = run(&data, &ctx, "/remind in 99999999 d hi").await;
    assert!(far.contains("❌"));
    let farther = run(&data, &ctx, "/remind in 99999999999 w hi").await;
    assert!(farther.contains("❌"));

    let accented = run(&data, &ctx, "/todo add buy milk due:5é").await;
    assert!(accented.contains("Could not understand due date"));
    let huge = run(&data, &ctx, "/todo add buy milk due:99999999999999w").await;
    assert!(huge.contains("Could not understand due date"));
}

#[tokio::test]
async fn test_todo_add_and_complete_by_button() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let added = run(&data, &ctx, "/task Buy milk").await;
    assert!(added.contains("Task added"));
    assert!(added.contains("#1"));

    let list = execute_command(&data, &ctx, "/todos", "").await;
    assert!(list.text.unwrap().contains("Buy milk"));
    assert!(list.keyboard.is_some());

    let done = execute_callback(&data, &ctx.user, Some(ctx.chat_id), CallbackAction::TodoDone(1)).await;
    assert_eq!(done.toast.as_deref(), Some("🎉 Completed #1"));

    // Someone else's task is not found
    let other = execute_callback(&data, &user(7, "other"), Some(7), CallbackAction::TodoDone(1)).await;
    assert!(other.toast.unwrap().starts_with("❌"));
}

#[tokio::test]
async fn test_ask_with_stub_model() {
    let (data, _temp) = create_bot(Some(Arc::new(CannedCompletion("**Hello** there"))));
    let answer = run(&data, &private(MEMBER), "/ask hi").await;
    assert!(answer.contains("<b>Hello</b>"));
}

#[tokio::test]
async fn test_ai_commands_without_key() {
    let (data, _temp) = create_bot(None);
    let answer = run(&data, &private(MEMBER), "/ask hi").await;
    assert!(answer.contains("not configured"));
}

#[tokio::test]
async fn test_reminder_roundtrip() {
    let (data, _temp) = create_bot(None);
    let ctx = private(MEMBER);

    let set = run(&data, &ctx, "/remind in 10 minutes water plants").await;
    assert!(set.contains("water plants"));

    let list = run(&data, &ctx, "/reminders").await;
    assert!(list.contains("water plants"));

    let cancelled = run(&data, &ctx, "/cancelreminder 1").await;
    assert!(cancelled.contains("cancelled"));
}

#[test]
fn test_split_command_strips_bot_name() {
    let (cmd, args) = split_command("/Poll@community_bot \"Q\" \"A\" \"B\"").unwrap();
    assert_eq!(cmd, "/poll");
    assert!(args.starts_with("\"Q\""));
}
