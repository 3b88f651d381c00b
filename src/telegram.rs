//! Telegram bot integration
//!
//! Uses an explicit Dispatcher with a message branch and a callback branch.
//! Every incoming message registers its author and chat and is logged for
//! the activity and mood features. Commands are rate limited, checked against
//! the access rules and then routed.
//!
//! Command and callback handlers produce a [`Reply`] / [`CallbackReply`]
//! which is delivered afterwards, so routing can be exercised without a
//! live bot.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{InlineKeyboardMarkup, InputFile, ParseMode, Update},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::{
    format_channels, AccessControl, AccessDecision, BanOutcome, MSG_ADMIN_ONLY, MSG_BANNED,
    MSG_CHANNEL_UNAUTHORIZED, MSG_USER_UNAUTHORIZED,
};
use crate::casino::{self, CasinoStore};
use crate::config::Config;
use crate::content::{self, ContentClient};
use crate::db::{now_ts, Database};
use crate::error::BotError;
use crate::images::{self, CollectionOwner, GeneratedImage, ImageService, ImageStore};
use crate::llm::{self, ChatHistory, Completion, ImageGenerator, OpenAiClient};
use crate::mines;
use crate::mood;
use crate::progression;
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::reminders::{self, Notification, ReminderPoller, ReminderStore};
use crate::telegram_ui::{
    back_to_casino_menu, casino_menu_keyboard, casino_select_keyboard, gallery_keyboard,
    image_keyboard, poll_keyboard, todo_keyboard, CallbackAction,
};
use crate::timezone::{self, TimezoneStore};
use crate::todo::{self, TaskEdit, TaskStatus, TodoStore};
use crate::users::{format_leaderboard, format_profile, html_escape, TelegramUser, UserStore};
use crate::voting::{self, PollResults, PollStore};

/// Commands answered even in channels that are not authorized yet
const OPEN_COMMANDS: &[&str] = &["/start", "/help", "/request_access"];

const ADMIN_COMMANDS: &[&str] = &[
    "/grant_access",
    "/revoke_access",
    "/channels",
    "/list_channels",
    "/access_requests",
    "/ban",
    "/unban",
    "/make_admin",
    "/casino_load",
];

const AI_COMMANDS: &[&str] = &["/ask", "/mood", "/casinoask"];

const IMAGE_COMMANDS: &[&str] = &["/image", "/draw_me", "/images", "/draw_multiple"];

const GENERIC_FAILURE: &str = "⚠️ Something went wrong. Please try again.";

/// How often expired polls are closed and limiter state is pruned
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Everything the handlers need, injected through `dptree::deps!`
pub struct BotData {
    pub config: Config,
    pub db: Arc<Database>,
    pub users: UserStore,
    pub access: AccessControl,
    pub limits: RateLimits,
    pub polls: PollStore,
    pub todos: TodoStore,
    pub image_store: ImageStore,
    /// Present when an image backend is configured
    pub images: Option<ImageService>,
    pub timezones: TimezoneStore,
    pub reminders: ReminderStore,
    pub casinos: CasinoStore,
    pub llm: Option<Arc<dyn Completion>>,
    pub history: ChatHistory,
    pub content: Option<ContentClient>,
}

impl BotData {
    pub fn new(
        config: Config,
        db: Arc<Database>,
        llm: Option<Arc<dyn Completion>>,
        image_generator: Option<Arc<dyn ImageGenerator>>,
        content: Option<ContentClient>,
    ) -> Self {
        let images = image_generator.map(|generator| {
            ImageService::new(
                db.clone(),
                generator,
                &config.openai_image_model,
                config.daily_image_limit,
                Some(config.images_dir()),
            )
        });

        Self {
            users: UserStore::new(db.clone()),
            access: AccessControl::new(db.clone(), &config.admin_user_ids),
            limits: RateLimits::new(
                config.rate_limit_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
            polls: PollStore::new(db.clone()),
            todos: TodoStore::new(db.clone()),
            image_store: ImageStore::new(db.clone()),
            images,
            timezones: TimezoneStore::new(db.clone()),
            reminders: ReminderStore::new(db.clone()),
            casinos: CasinoStore::new(db.clone()),
            llm,
            history: ChatHistory::new(),
            content,
            config,
            db,
        }
    }

    /// Wire up the OpenAI and RapidAPI clients from configuration
    pub fn from_config(config: Config, db: Arc<Database>) -> Self {
        let openai = OpenAiClient::from_config(&config).map(Arc::new);
        let llm = openai.clone().map(|c| c as Arc<dyn Completion>);
        let generator = openai.map(|c| c as Arc<dyn ImageGenerator>);
        let content = ContentClient::from_config(&config);
        Self::new(config, db, llm, generator, content)
    }

    fn llm(&self) -> Result<&dyn Completion> {
        self.llm
            .as_deref()
            .ok_or_else(|| BotError::Configuration("OPENAI_API_KEY is not set".to_string()).into())
    }

    /// Import the casino seed file when the knowledge base is empty
    pub fn seed_casinos(&self) -> Result<usize> {
        let path = &self.config.casino_data_path;
        if !path.exists() || !self.casinos.all_casinos()?.is_empty() {
            return Ok(0);
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(self.casinos.load_json(&json)?)
    }
}

/// Run Telegram bot with explicit Dispatcher for reliable polling
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let token = config
        .telegram_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN (or TELOXIDE_TOKEN) not set")?;

    info!("Opening database at {}", config.db_path.display());
    let db = Arc::new(Database::open(&config.db_path)?);

    let reminder_interval = Duration::from_secs(config.reminder_poll_secs.max(1));
    let data = Arc::new(BotData::from_config(config, db.clone()));

    if data.llm.is_none() {
        warn!("OPENAI_API_KEY not set: /ask, /mood, /image and /casinoask are disabled");
    }
    if data.content.is_none() {
        info!("RAPIDAPI_KEY/RAPIDAPI_HOST not set: /search is disabled");
    }
    match data.seed_casinos() {
        Ok(0) => {}
        Ok(n) => info!("Seeded {} casinos from {}", n, data.config.casino_data_path.display()),
        Err(e) => warn!("Casino seed failed: {:#}", e),
    }

    let bot = Bot::new(token);

    // Reminder poller -> notifier
    let (tx, mut rx) = mpsc::channel::<Notification>(64);
    tokio::spawn(ReminderPoller::new(db, reminder_interval, tx).run());

    let notify_bot = bot.clone();
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Err(e) = notify_bot
                .send_message(ChatId(notification.chat_id), &notification.text)
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!(
                    "Failed to deliver reminder {} to {}: {}",
                    notification.reminder_id, notification.user_id, e
                );
            }
        }
        warn!("Reminder notifier stopped");
    });

    let maintenance = data.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            ticker.tick().await;
            match maintenance.polls.close_expired() {
                Ok(0) => {}
                Ok(n) => info!("Closed {} expired poll(s)", n),
                Err(e) => warn!("Closing expired polls failed: {}", e),
            }
            for limiter in limiters(&maintenance.limits) {
                limiter.cleanup().await;
            }
        }
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![data])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    warn!("Dispatcher stopped");
    Ok(())
}

fn limiters(limits: &RateLimits) -> [&RateLimiter; 4] {
    [&limits.message, &limits.ai, &limits.image, &limits.admin]
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<BotData>) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
    let text_preview = msg
        .text()
        .unwrap_or("<non-text>")
        .chars()
        .take(50)
        .collect::<String>();

    debug!(
        "Message received: user={}, chat={}, text={:?}",
        user_id, msg.chat.id.0, text_preview
    );

    if let Err(e) = handle_message(&bot, &msg, &data).await {
        error!("Error handling message: {:#}", e);
    }

    Ok(())
}

/// Callback query handler for inline keyboard buttons
async fn callback_handler(bot: Bot, query: CallbackQuery, data: Arc<BotData>) -> ResponseResult<()> {
    let user = telegram_user(&query.from);
    let chat_id = query.message.as_ref().map(|m| m.chat().id);

    let decision = match chat_id {
        Some(chat) => data.access.check_access(user.telegram_id, chat.0),
        None => data
            .access
            .is_banned(user.telegram_id)
            .map(|banned| if banned { AccessDecision::Banned } else { AccessDecision::Allowed }),
    };
    let denial = match decision {
        Ok(AccessDecision::Allowed) => None,
        Ok(AccessDecision::Banned) => Some(MSG_BANNED),
        Ok(AccessDecision::ChannelUnauthorized) => Some(MSG_USER_UNAUTHORIZED),
        Err(e) => {
            error!("Access check failed: {:#}", e);
            Some(GENERIC_FAILURE)
        }
    };
    if let Some(text) = denial {
        bot.answer_callback_query(&query.id).text(text).await?;
        return Ok(());
    }

    let Some(action) = query.data.as_deref().and_then(CallbackAction::decode) else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };

    info!("Callback query: user={}, action={:?}", user.telegram_id, action);

    let reply = execute_callback(&data, &user, chat_id.map(|c| c.0), action).await;

    let mut answer = bot.answer_callback_query(&query.id);
    if let Some(ref toast) = reply.toast {
        answer = answer.text(truncate(toast, 190));
    }
    answer.await?;

    let (Some(chat), Some(message)) = (chat_id, query.message.as_ref()) else {
        return Ok(());
    };

    if let Some((text, keyboard)) = reply.edit {
        let mut edit = bot
            .edit_message_text(chat, message.id(), text)
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            edit = edit.reply_markup(keyboard);
        }
        if let Err(e) = edit.await {
            // Usually "message is not modified" after a refresh
            debug!("Edit after callback failed: {}", e);
        }
    } else if let Some(keyboard) = reply.markup {
        if let Err(e) = bot
            .edit_message_reply_markup(chat, message.id())
            .reply_markup(keyboard)
            .await
        {
            debug!("Keyboard update after callback failed: {}", e);
        }
    }

    if let Some(send) = reply.send {
        if let Err(e) = deliver(&bot, chat, &data, send).await {
            error!("Failed to send callback reply: {:#}", e);
        }
    }

    Ok(())
}

async fn handle_message(bot: &Bot, msg: &Message, data: &BotData) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    let user = telegram_user(from);
    let chat_id = msg.chat.id;
    let chat_title = msg.chat.title().map(str::to_string);

    data.users.upsert_user(&user)?;
    data.users
        .upsert_chat(chat_id.0, chat_title.as_deref(), chat_kind(&msg.chat))?;

    let Some(text) = msg.text() else {
        return Ok(());
    };
    data.users
        .record_message(user.telegram_id, chat_id.0, msg.id.0, text, "text")?;

    let Some((cmd, args)) = split_command(text) else {
        return Ok(());
    };

    let ctx = CommandContext {
        user,
        chat_id: chat_id.0,
        chat_title,
        reply_to: msg
            .reply_to_message()
            .and_then(|m| m.from.as_ref())
            .map(telegram_user),
    };

    if let Some(denied) = check_command(data, &ctx, &cmd).await? {
        bot.send_message(chat_id, denied).parse_mode(ParseMode::Html).await?;
        return Ok(());
    }

    info!("Command {} from user {} in chat {}", cmd, ctx.user.telegram_id, ctx.chat_id);
    let reply = execute_command(data, &ctx, &cmd, args).await;
    deliver(bot, chat_id, data, reply).await
}

fn telegram_user(user: &teloxide::types::User) -> TelegramUser {
    TelegramUser {
        telegram_id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|n| !n.is_empty()),
        last_name: user.last_name.clone(),
    }
}

fn chat_kind(chat: &teloxide::types::Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else {
        "channel"
    }
}

// ============ Replies ============

/// Who sent a command and where
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub user: TelegramUser,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    /// Author of the message the command replied to
    pub reply_to: Option<TelegramUser>,
}

impl CommandContext {
    pub fn is_private(&self) -> bool {
        self.chat_id > 0
    }
}

/// A generated image sent as a photo
#[derive(Debug, Clone)]
pub struct Photo {
    pub image: GeneratedImage,
    pub caption: String,
    pub keyboard: InlineKeyboardMarkup,
}

/// What a command sends back. Text is HTML.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: Option<String>,
    pub keyboard: Option<InlineKeyboardMarkup>,
    pub photos: Vec<Photo>,
    /// Forwarded to every configured admin
    pub admin_notice: Option<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboardMarkup) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.photos.is_empty() && self.admin_notice.is_none()
    }
}

/// Outcome of a button press
#[derive(Debug, Clone, Default)]
pub struct CallbackReply {
    /// Short popup text
    pub toast: Option<String>,
    /// Replace the pressed message's text and keyboard
    pub edit: Option<(String, Option<InlineKeyboardMarkup>)>,
    /// Replace only the keyboard
    pub markup: Option<InlineKeyboardMarkup>,
    /// Send a new message to the chat
    pub send: Option<Reply>,
}

impl CallbackReply {
    fn toast(text: impl Into<String>) -> Self {
        Self {
            toast: Some(text.into()),
            ..Default::default()
        }
    }

    fn edit(text: String, keyboard: InlineKeyboardMarkup) -> Self {
        Self {
            edit: Some((text, Some(keyboard))),
            ..Default::default()
        }
    }
}

async fn deliver(bot: &Bot, chat_id: ChatId, data: &BotData, reply: Reply) -> Result<()> {
    if let Some(text) = reply.text {
        match reply.keyboard {
            Some(keyboard) => {
                bot.send_message(chat_id, text)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard)
                    .await?;
            }
            None => send_long_message(bot, chat_id, &text).await?,
        }
    }

    for photo in reply.photos {
        let input = match photo.image.local_path.as_deref().map(Path::new) {
            Some(path) if path.exists() => InputFile::file(path),
            _ => match reqwest::Url::parse(&photo.image.image_url) {
                Ok(url) => InputFile::url(url),
                Err(e) => {
                    warn!("Bad image URL for image {}: {}", photo.image.id, e);
                    continue;
                }
            },
        };
        if let Err(e) = bot
            .send_photo(chat_id, input)
            .caption(&photo.caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(photo.keyboard.clone())
            .await
        {
            warn!("Failed to send image {}: {}", photo.image.id, e);
            bot.send_message(chat_id, format!("{}\n\n{}", photo.caption, html_escape(&photo.image.image_url)))
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }

    if let Some(notice) = reply.admin_notice {
        for admin in data.access.config_admins() {
            if let Err(e) = bot
                .send_message(ChatId(admin), &notice)
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!("Failed to notify admin {}: {}", admin, e);
            }
        }
    }
    Ok(())
}

/// Send HTML text in chunks of at most 4000 chars, falling back to plain text
/// when Telegram rejects the markup
async fn send_long_message(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    const MAX: usize = 4000;

    if text.is_empty() {
        bot.send_message(chat_id, "(no response)").await?;
        return Ok(());
    }

    for chunk in split_message(text, MAX) {
        if bot
            .send_message(chat_id, chunk)
            .parse_mode(ParseMode::Html)
            .await
            .is_err()
        {
            bot.send_message(chat_id, chunk).await?;
        }
    }
    Ok(())
}

/// Split on char boundaries, preferring the last newline inside each window
fn split_message(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max {
            chunks.push(remaining);
            break;
        }
        let mut split_at = remaining
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(remaining.len());
        if let Some(newline) = remaining[..split_at].rfind('\n') {
            if newline > 0 {
                split_at = newline + 1;
            }
        }
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest;
    }
    chunks
}

/// Convert markdown code blocks in model output to Telegram HTML
fn markdown_to_telegram_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + 100);
    let mut chars = text.chars().peekable();
    let mut in_code_block = false;
    let mut in_inline_code = false;

    while let Some(c) = chars.next() {
        if c == '`' {
            if chars.peek() == Some(&'`') {
                chars.next();
                if chars.peek() == Some(&'`') {
                    chars.next();
                    if in_code_block {
                        result.push_str("</code></pre>");
                        in_code_block = false;
                    } else {
                        // Language tag
                        while let Some(&ch) = chars.peek() {
                            if ch == '\n' {
                                chars.next();
                                break;
                            } else if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        result.push_str("<pre><code>");
                        in_code_block = true;
                    }
                    continue;
                }
                // Two backticks: empty inline code
                continue;
            }

            if !in_code_block {
                result.push_str(if in_inline_code { "</code>" } else { "<code>" });
                in_inline_code = !in_inline_code;
                continue;
            }
        }

        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }

    if in_inline_code {
        result.push_str("</code>");
    }
    if in_code_block {
        result.push_str("</code></pre>");
    }
    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

/// "/cmd@BotName args" -> ("/cmd", "args")
pub fn split_command(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }
    let (head, args) = match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text, ""),
    };
    let cmd = head.split('@').next().unwrap_or(head).to_lowercase();
    if cmd.len() < 2 {
        return None;
    }
    Some((cmd, args))
}

fn parse_id(s: &str) -> Option<i64> {
    s.trim().trim_start_matches('#').parse().ok()
}

fn rate_limited(reset_in: Option<Duration>) -> String {
    format!(
        "⏳ Rate limit exceeded. Please wait {}s before trying again.",
        reset_in.map(|d| d.as_secs().max(1)).unwrap_or(1)
    )
}

/// Rate limits and access rules for a command. `Some(text)` is the refusal.
pub async fn check_command(data: &BotData, ctx: &CommandContext, cmd: &str) -> Result<Option<String>> {
    let uid = ctx.user.telegram_id;

    if !data.limits.message.check(uid).await {
        warn!("Rate limit exceeded for user {}", uid);
        return Ok(Some(rate_limited(data.limits.message.reset_in(uid).await)));
    }

    match data.access.check_access(uid, ctx.chat_id)? {
        AccessDecision::Allowed => {}
        AccessDecision::Banned => return Ok(Some(MSG_BANNED.to_string())),
        AccessDecision::ChannelUnauthorized if !OPEN_COMMANDS.contains(&cmd) => {
            return Ok(Some(MSG_CHANNEL_UNAUTHORIZED.to_string()));
        }
        AccessDecision::ChannelUnauthorized => {}
    }

    let limiter = if ADMIN_COMMANDS.contains(&cmd) {
        if !data.access.is_admin(uid)? {
            return Ok(Some(MSG_ADMIN_ONLY.to_string()));
        }
        Some(&data.limits.admin)
    } else if AI_COMMANDS.contains(&cmd) {
        Some(&data.limits.ai)
    } else if IMAGE_COMMANDS.contains(&cmd) {
        Some(&data.limits.image)
    } else {
        None
    };

    if let Some(limiter) = limiter {
        if !limiter.check(uid).await {
            return Ok(Some(rate_limited(limiter.reset_in(uid).await)));
        }
    }
    Ok(None)
}

fn error_reply(e: &anyhow::Error) -> String {
    e.downcast_ref::<BotError>()
        .map(BotError::user_message)
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}

/// Run a command. Failures become a friendly reply; details go to the log.
pub async fn execute_command(data: &BotData, ctx: &CommandContext, cmd: &str, args: &str) -> Reply {
    match route_command(data, ctx, cmd, args).await {
        Ok(reply) => reply,
        Err(e) => {
            match e.downcast_ref::<BotError>() {
                Some(BotError::Validation(_)) | Some(BotError::NotFound(_)) => {
                    debug!("{} rejected for user {}: {}", cmd, ctx.user.telegram_id, e)
                }
                _ => error!("{} failed for user {}: {:#}", cmd, ctx.user.telegram_id, e),
            }
            Reply::text(error_reply(&e))
        }
    }
}

async fn route_command(data: &BotData, ctx: &CommandContext, cmd: &str, args: &str) -> Result<Reply> {
    match cmd {
        "/start" | "/help" => Ok(Reply::text(help_text())),

        // Calculators
        "/mines" => Ok(Reply::text(mines::handle(args))),
        "/mines_multi" => Ok(Reply::text(
            "ℹ️ /mines_multi has been retired.\n\nUse <code>/mines &lt;target&gt;</code> to search \
             combinations or <code>/mines &lt;mines&gt; &lt;diamonds&gt;</code> for one board.",
        )),
        "/b2b" => Ok(Reply::text(progression::handle(args))),

        // Polls
        "/poll" => create_poll(data, ctx, args, false),
        "/quiz" => create_poll(data, ctx, args, true),
        "/vote" => vote(data, ctx, args),
        "/polls" => Ok(Reply::text(voting::format_poll_list(
            &data.polls.active_polls(ctx.chat_id)?,
        ))),
        "/results" => poll_results(data, ctx, args),
        "/closepoll" => close_poll(data, ctx, args),
        "/myvotes" => my_votes(data, ctx),

        // Todo
        "/todo" => todo_command(data, ctx, args),
        "/todos" => todo_command(data, ctx, &format!("list {}", args)),
        "/task" => todo_command(data, ctx, &format!("add {}", args)),

        // Images
        "/image" | "/draw_me" => generate_images(data, ctx, args, 1).await,
        "/images" | "/draw_multiple" => {
            let (count, prompt) = match args.split_once(char::is_whitespace) {
                Some((n, rest)) if n.parse::<u32>().is_ok() => (n.parse().unwrap_or(2), rest.trim()),
                _ => (2, args),
            };
            generate_images(data, ctx, prompt, count).await
        }
        "/gallery" => gallery(data, ctx, false),
        "/favorites" => gallery(data, ctx, true),
        "/groupgallery" => {
            let images = data.image_store.chat_images(ctx.chat_id, 20)?;
            Ok(Reply::text(images::format_gallery("Group Gallery", &images, None)))
        }
        "/imgstats" => {
            let stats = data
                .image_store
                .stats(ctx.user.telegram_id, data.config.daily_image_limit)?;
            Ok(Reply::text(images::format_stats(&stats)))
        }
        "/collection" | "/collections" => collection_command(data, ctx, args),

        // Time
        "/timezone" => timezone_command(data, ctx, args),
        "/time" => time_command(data, ctx, args),
        "/remind" => remind(data, ctx, args),
        "/reminders" => {
            let tz = data.timezones.get_timezone(ctx.user.telegram_id)?;
            let list = data.reminders.list(ctx.user.telegram_id)?;
            Ok(Reply::text(reminders::format_list(&list, tz)))
        }
        "/cancelreminder" => {
            let id = parse_id(args).ok_or_else(|| BotError::validation("Usage: /cancelreminder <id>"))?;
            Ok(Reply::text(if data.reminders.cancel(id, ctx.user.telegram_id)? {
                format!("✅ Reminder #{} cancelled.", id)
            } else {
                format!("❌ No active reminder #{} found.", id)
            }))
        }

        // AI
        "/ask" => ask(data, ctx, args).await,
        "/clearchat" => {
            data.history.clear(ctx.user.telegram_id);
            Ok(Reply::text("🧹 Conversation history cleared."))
        }
        "/mood" => mood_command(data, ctx).await,

        // Casino
        "/casino" => casino_command(data, args),
        "/bonus" => bonus(data, args),
        "/casinoask" => {
            if args.is_empty() {
                return Ok(Reply::text("Usage: <code>/casinoask &lt;question&gt;</code>"));
            }
            let answer = casino::ask(data.llm()?, &data.casinos, args).await?;
            Ok(Reply::text(markdown_to_telegram_html(&answer)))
        }
        "/casino_load" => {
            let path = &data.config.casino_data_path;
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let n = data.casinos.load_json(&json)?;
            Ok(Reply::text(format!("✅ Loaded {} casinos.", n)))
        }

        "/search" => search(data, args).await,

        // Activity
        "/most_active" | "/most_active_users" => {
            let rows = data.users.most_active(ctx.chat_id, 7, 10)?;
            Ok(Reply::text(format_leaderboard("🏆 <b>Most Active Users</b>", &rows)))
        }
        "/night_owls" => {
            let rows = data.users.night_owls(ctx.chat_id, 7, 10)?;
            Ok(Reply::text(format_leaderboard("🦉 <b>Night Owls</b>", &rows)))
        }
        "/my_activity" => {
            let profile = data.users.activity_profile(ctx.user.telegram_id, ctx.chat_id, 30)?;
            Ok(Reply::text(format_profile(&profile)))
        }

        // Access control
        "/request_access" => request_access(data, ctx),
        "/grant_access" => grant_access(data, ctx, args),
        "/revoke_access" => {
            let chat = parse_id(args).unwrap_or(ctx.chat_id);
            Ok(Reply::text(if data.access.revoke_channel(chat)? {
                format!("✅ Access revoked for <code>{}</code>.", chat)
            } else {
                format!("ℹ️ <code>{}</code> was not authorized.", chat)
            }))
        }
        "/channels" | "/list_channels" => {
            Ok(Reply::text(format_channels(&data.access.list_channels()?)))
        }
        "/access_requests" => access_requests(data),
        "/ban" => {
            let target = resolve_target(data, ctx, args)?;
            Ok(Reply::text(match data.access.ban(target, ctx.user.telegram_id)? {
                BanOutcome::Banned => format!("🚫 User <code>{}</code> has been banned.", target),
                BanOutcome::AlreadyBanned => format!("ℹ️ User <code>{}</code> is already banned.", target),
                BanOutcome::IsAdmin => "❌ Administrators cannot be banned.".to_string(),
            }))
        }
        "/unban" => {
            let target = resolve_target(data, ctx, args)?;
            Ok(Reply::text(if data.access.unban(target)? {
                format!("✅ User <code>{}</code> has been unbanned.", target)
            } else {
                format!("ℹ️ User <code>{}</code> was not banned.", target)
            }))
        }
        "/make_admin" => {
            let target = resolve_target(data, ctx, args)?;
            Ok(Reply::text(if data.access.make_admin(target, ctx.user.telegram_id)? {
                format!("👑 User <code>{}</code> is now an administrator.", target)
            } else {
                format!("ℹ️ User <code>{}</code> is already an administrator.", target)
            }))
        }

        _ if ctx.is_private() => Ok(Reply::text("❓ Unknown command. Use /help to see what I can do.")),
        _ => Ok(Reply::default()),
    }
}

pub fn help_text() -> &'static str {
    "🤖 <b>Community Bot</b>\n\n\
     <b>🎰 Calculators</b>\n\
     /mines &lt;target&gt; or &lt;mines&gt; &lt;diamonds&gt; - mines multipliers\n\
     /b2b &lt;base&gt; &lt;multiplier&gt; &lt;increase%&gt; [rounds] - back-to-back bets\n\n\
     <b>📊 Polls</b>\n\
     /poll Question | A | B - create a poll\n\
     /quiz Question | correct | A | B - create a quiz\n\
     /vote &lt;poll&gt; &lt;option&gt; · /polls · /results &lt;id&gt; · /closepoll &lt;id&gt; · /myvotes\n\n\
     <b>📝 Todo</b>\n\
     /todo add &lt;task&gt; · /todos · /todo done &lt;id&gt; · /todo stats\n\n\
     <b>🎨 Images</b>\n\
     /image &lt;prompt&gt; · /images &lt;n&gt; &lt;prompt&gt;\n\
     /gallery · /groupgallery · /favorites · /imgstats · /collection\n\n\
     <b>🌍 Time</b>\n\
     /timezone · /time [zone] · /remind &lt;when&gt; &lt;text&gt; · /reminders · /cancelreminder &lt;id&gt;\n\n\
     <b>🧠 AI</b>\n\
     /ask &lt;question&gt; · /clearchat · /mood (reply to someone to analyze them)\n\n\
     <b>🎲 Casinos</b>\n\
     /casino [name] · /bonus &lt;casino&gt; &lt;wager&gt; · /casinoask &lt;question&gt;\n\n\
     <b>🔎 Other</b>\n\
     /search &lt;query&gt; · /most_active · /night_owls · /my_activity · /request_access\n\n\
     <b>👑 Admin</b>\n\
     /grant_access · /revoke_access · /channels · /access_requests\n\
     /ban · /unban · /make_admin · /casino_load"
}

// ============ Polls ============

fn empty_results(options: usize) -> PollResults {
    PollResults {
        counts: vec![0; options],
        ..Default::default()
    }
}

fn create_poll(data: &BotData, ctx: &CommandContext, args: &str, quiz: bool) -> Result<Reply> {
    if args.is_empty() {
        return Ok(Reply::text(voting::usage()));
    }
    let parsed = if quiz {
        voting::parse_quiz_command(args, ctx.user.telegram_id, ctx.chat_id)
    } else {
        voting::parse_poll_command(args, ctx.user.telegram_id, ctx.chat_id)
    };
    let new_poll = match parsed {
        Ok(p) => p,
        Err(msg) => return Ok(Reply::text(msg)),
    };

    let poll = data.polls.create_poll(new_poll)?;
    let results = empty_results(poll.options.len());
    Ok(
        Reply::text(voting::format_poll(&poll, &results, false, now_ts()))
            .with_keyboard(poll_keyboard(&poll, &results, &[])),
    )
}

fn vote(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let (poll_id, options) = match voting::parse_vote_command(args) {
        Ok(v) => v,
        Err(msg) => return Ok(Reply::text(msg)),
    };
    let receipt = data.polls.vote(poll_id, ctx.user.telegram_id, &options)?;
    let poll = data
        .polls
        .get_poll(poll_id)?
        .ok_or_else(|| BotError::not_found(format!("poll {}", poll_id)))?;
    let headline = if receipt.changed { "🔄 Vote changed!" } else { "✅ Vote recorded!" };
    Ok(Reply::text(format!(
        "{}\n\n{}",
        headline,
        voting::format_poll(&poll, &receipt.results, poll.results_visible(), now_ts())
    ))
    .with_keyboard(poll_keyboard(&poll, &receipt.results, &options)))
}

fn poll_results(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let poll_id = parse_id(args).ok_or_else(|| BotError::validation("Usage: /results <poll_id>"))?;
    let poll = data
        .polls
        .get_poll(poll_id)?
        .ok_or_else(|| BotError::not_found(format!("poll {}", poll_id)))?;
    let results = data.polls.results(poll_id)?;
    let chosen = data.polls.user_choice(poll_id, ctx.user.telegram_id)?;
    Ok(Reply::text(voting::format_poll(&poll, &results, poll.results_visible(), now_ts()))
        .with_keyboard(poll_keyboard(&poll, &results, &chosen)))
}

fn close_poll(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let poll_id = parse_id(args).ok_or_else(|| BotError::validation("Usage: /closepoll <poll_id>"))?;
    let poll = data.polls.close_poll(poll_id, ctx.user.telegram_id)?;
    let results = data.polls.results(poll_id)?;
    Ok(Reply::text(format!(
        "🔒 Poll closed.\n\n{}",
        voting::format_poll(&poll, &results, true, now_ts())
    )))
}

fn my_votes(data: &BotData, ctx: &CommandContext) -> Result<Reply> {
    let votes = data.polls.user_votes(ctx.user.telegram_id)?;
    if votes.is_empty() {
        return Ok(Reply::text("🗳️ You haven't voted in any polls yet."));
    }
    let mut out = String::from("🗳️ <b>Your Votes</b>\n\n");
    for v in votes.iter().take(20) {
        let options: Vec<String> = v.option_ids.iter().map(|o| (o + 1).to_string()).collect();
        out.push_str(&format!(
            "• <b>#{}</b> {} → option {}\n",
            v.poll_id,
            html_escape(&v.poll_title),
            options.join(", ")
        ));
    }
    Ok(Reply::text(out))
}

// ============ Todo ============

fn todo_list(data: &BotData, user_id: i64, status: Option<TaskStatus>) -> Result<(String, InlineKeyboardMarkup)> {
    let tasks = data.todos.tasks(user_id, None, status, false)?;
    let stats = data.todos.stats(user_id)?;
    Ok((todo::format_tasks(&tasks, &stats, now_ts()), todo_keyboard(&tasks)))
}

fn todo_command(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let uid = ctx.user.telegram_id;
    let (sub, rest) = match args.trim().split_once(char::is_whitespace) {
        Some((s, r)) => (s.to_lowercase(), r.trim()),
        None => (args.trim().to_lowercase(), ""),
    };
    let task_id = || parse_id(rest.split_whitespace().next().unwrap_or("")).ok_or_else(|| {
        BotError::validation(format!("Usage: /todo {} <task_id>", sub))
    });

    match sub.as_str() {
        "" | "list" | "ls" => {
            let (text, keyboard) = todo_list(data, uid, TaskStatus::parse(rest))?;
            Ok(Reply::text(text).with_keyboard(keyboard))
        }
        "add" | "new" => {
            if rest.is_empty() {
                return Ok(Reply::text(todo::usage()));
            }
            let task = match todo::parse_task_text(rest, now_ts()) {
                Ok(t) => t,
                Err(msg) => return Ok(Reply::text(msg)),
            };
            let task = data.todos.add_task(uid, None, task)?;
            Ok(Reply::text(format!(
                "✅ Task added: {} <b>#{}</b> {}",
                task.priority.emoji(),
                task.id,
                html_escape(&task.title)
            )))
        }
        "done" | "complete" => {
            let task = data.todos.complete(uid, task_id()?)?;
            Ok(Reply::text(format!("🎉 Completed <b>#{}</b> {}", task.id, html_escape(&task.title))))
        }
        "start" => {
            let task = data.todos.set_status(uid, task_id()?, TaskStatus::InProgress)?;
            Ok(Reply::text(format!("🔄 Started <b>#{}</b> {}", task.id, html_escape(&task.title))))
        }
        "delete" | "remove" | "rm" => {
            let task = data.todos.delete(uid, task_id()?)?;
            Ok(Reply::text(format!("🗑️ Deleted <b>#{}</b> {}", task.id, html_escape(&task.title))))
        }
        "edit" => {
            let id = task_id()?;
            let text = rest.split_once(char::is_whitespace).map(|(_, t)| t.trim()).unwrap_or("");
            let parsed = match todo::parse_task_text(text, now_ts()) {
                Ok(t) => t,
                Err(msg) => return Ok(Reply::text(msg)),
            };
            let task = data.todos.edit(
                uid,
                id,
                TaskEdit {
                    title: Some(parsed.title),
                    priority: parsed.priority,
                    due_at: parsed.due_at.map(Some),
                },
            )?;
            Ok(Reply::text(format!("✏️ Updated <b>#{}</b> {}", task.id, html_escape(&task.title))))
        }
        "stats" => Ok(Reply::text(todo::format_stats(&data.todos.stats(uid)?))),
        "lists" => {
            data.todos.ensure_default_list(uid)?;
            Ok(Reply::text(todo::format_lists(&data.todos.lists(uid)?)))
        }
        "newlist" => {
            if rest.is_empty() {
                return Err(BotError::validation("Usage: /todo newlist <name>").into());
            }
            let list = data.todos.create_list(uid, rest, None)?;
            Ok(Reply::text(format!("📚 Created list <b>#{}</b> {}", list.id, html_escape(&list.name))))
        }
        _ => Ok(Reply::text(todo::usage())),
    }
}

// ============ Images ============

async fn generate_images(data: &BotData, ctx: &CommandContext, prompt: &str, count: u32) -> Result<Reply> {
    if prompt.trim().is_empty() {
        return Ok(Reply::text(images::usage()));
    }
    let service = data
        .images
        .as_ref()
        .ok_or_else(|| BotError::Configuration("image generation is not configured".to_string()))?;

    let batch = service
        .generate(ctx.user.telegram_id, ctx.chat_id, prompt, count)
        .await?;
    let stats = service.stats(ctx.user.telegram_id)?;

    Ok(Reply {
        text: batch.warning(),
        photos: batch
            .images
            .into_iter()
            .map(|image| Photo {
                caption: images::image_caption(&image, &stats),
                keyboard: image_keyboard(&image),
                image,
            })
            .collect(),
        ..Default::default()
    })
}

fn gallery(data: &BotData, ctx: &CommandContext, favorites_only: bool) -> Result<Reply> {
    let uid = ctx.user.telegram_id;
    let stats = data.image_store.stats(uid, data.config.daily_image_limit)?;
    let (title, list) = if favorites_only {
        ("Your Favorites", data.image_store.favorites(uid)?)
    } else {
        ("Your Gallery", data.image_store.user_images(uid, false, 20)?)
    };
    Ok(Reply::text(images::format_gallery(title, &list, Some(&stats))).with_keyboard(gallery_keyboard()))
}

fn collection_command(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let uid = ctx.user.telegram_id;
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [] | ["list"] => {
            let mut all = data.image_store.collections(CollectionOwner::User(uid))?;
            if !ctx.is_private() {
                all.extend(data.image_store.collections(CollectionOwner::Chat(ctx.chat_id))?);
            }
            Ok(Reply::text(images::format_collections(&all)))
        }
        ["new", name @ ..] if !name.is_empty() => {
            let c = data
                .image_store
                .create_collection(&name.join(" "), CollectionOwner::User(uid))?;
            Ok(Reply::text(format!("📚 Created collection <b>#{}</b> {}", c.id, html_escape(&c.name))))
        }
        ["newgroup", name @ ..] if !name.is_empty() => {
            if ctx.is_private() {
                return Err(BotError::validation("Group collections can only be created in a group").into());
            }
            let c = data
                .image_store
                .create_collection(&name.join(" "), CollectionOwner::Chat(ctx.chat_id))?;
            Ok(Reply::text(format!("👥 Created group collection <b>#{}</b> {}", c.id, html_escape(&c.name))))
        }
        ["add", collection, image] => {
            let (Some(collection), Some(image)) = (parse_id(collection), parse_id(image)) else {
                return Ok(Reply::text(images::usage()));
            };
            Ok(Reply::text(if data.image_store.add_to_collection(collection, image, uid)? {
                format!("✅ Image #{} added to collection #{}.", image, collection)
            } else {
                format!("ℹ️ Image #{} is already in collection #{}.", image, collection)
            }))
        }
        ["show", id] => {
            let id = parse_id(id).ok_or_else(|| BotError::validation("Usage: /collection show <id>"))?;
            let collection = data
                .image_store
                .get_collection(id)?
                .ok_or_else(|| BotError::not_found(format!("collection {}", id)))?;
            let list = data.image_store.collection_images(id)?;
            Ok(Reply::text(images::format_gallery(&html_escape(&collection.name), &list, None)))
        }
        _ => Ok(Reply::text(images::usage())),
    }
}

// ============ Time ============

fn timezone_command(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let uid = ctx.user.telegram_id;
    let now = Utc::now();
    let (sub, rest) = match args.split_once(char::is_whitespace) {
        Some((s, r)) => (s.to_lowercase(), r.trim()),
        None => (args.to_lowercase(), ""),
    };

    match sub.as_str() {
        "" => {
            let tz = data.timezones.get_timezone(uid)?;
            Ok(Reply::text(format!(
                "{}\n\n{}",
                timezone::format_info(&timezone::timezone_info(tz, now)),
                timezone::usage()
            )))
        }
        "set" => {
            if rest.is_empty() {
                return Ok(Reply::text(timezone::usage()));
            }
            let tz = data.timezones.set_timezone(uid, rest)?;
            Ok(Reply::text(format!(
                "✅ Timezone set!\n\n{}",
                timezone::format_info(&timezone::timezone_info(tz, now))
            )))
        }
        "search" => Ok(Reply::text(timezone::format_search(rest, &timezone::search(rest), now))),
        _ => match timezone::parse_tz(args) {
            Some(tz) => Ok(Reply::text(timezone::format_info(&timezone::timezone_info(tz, now)))),
            None => Ok(Reply::text(timezone::format_search(args, &timezone::search(args), now))),
        },
    }
}

fn time_command(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let tz = if args.is_empty() {
        data.timezones.get_timezone(ctx.user.telegram_id)?
    } else {
        timezone::parse_tz(args).ok_or_else(|| {
            BotError::validation(format!("Unknown timezone '{}'. Try /timezone search <city>", args))
        })?
    };
    Ok(Reply::text(timezone::format_info(&timezone::timezone_info(tz, Utc::now()))))
}

fn remind(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    if args.is_empty() {
        return Ok(Reply::text(reminders::usage()));
    }
    let uid = ctx.user.telegram_id;
    let tz = data.timezones.get_timezone(uid)?;
    let request = match reminders::parse_request(args, Utc::now(), tz) {
        Ok(r) => r,
        Err(msg) => return Ok(Reply::text(msg)),
    };
    let reminder = data.reminders.create(
        uid,
        ctx.chat_id,
        &request.message,
        request.remind_at.timestamp(),
        request.recurrence,
    )?;
    Ok(Reply::text(reminders::format_created(&request, reminder.id, tz)))
}

// ============ AI ============

async fn ask(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    if args.is_empty() {
        return Ok(Reply::text(
            "Usage: <code>/ask &lt;question&gt;</code>\n\nI remember the last 10 exchanges. Use /clearchat to start over.",
        ));
    }
    let answer = llm::ask(
        data.llm()?,
        &data.history,
        ctx.user.telegram_id,
        &ctx.user.display_name(),
        args,
    )
    .await?;
    Ok(Reply::text(markdown_to_telegram_html(&answer)))
}

async fn mood_command(data: &BotData, ctx: &CommandContext) -> Result<Reply> {
    let target = ctx.reply_to.as_ref().unwrap_or(&ctx.user);
    let chat_filter = (!ctx.is_private()).then_some(ctx.chat_id);
    let messages = data.users.recent_messages(
        target.telegram_id,
        chat_filter,
        mood::LOOKBACK_DAYS,
        mood::MAX_MESSAGES,
    )?;
    let report = mood::analyze(data.llm()?, &messages).await?;
    Ok(Reply::text(mood::format_report(&target.display_name(), &report)))
}

// ============ Casino ============

fn casino_command(data: &BotData, args: &str) -> Result<Reply> {
    if args.is_empty() {
        return Ok(Reply::text(casino::menu_text()).with_keyboard(casino_menu_keyboard()));
    }
    let name = casino::detect_casino(args).unwrap_or(args);
    match data.casinos.casino(name)? {
        Some(c) => Ok(Reply::text(casino::format_casino(&c)).with_keyboard(back_to_casino_menu())),
        None => {
            let known: Vec<String> = data.casinos.all_casinos()?.into_iter().map(|c| c.name).collect();
            Ok(Reply::text(format!(
                "❌ Casino '{}' not found.\n\nAvailable: {}",
                html_escape(args),
                if known.is_empty() { "none loaded".to_string() } else { html_escape(&known.join(", ")) }
            )))
        }
    }
}

fn bonus(data: &BotData, args: &str) -> Result<Reply> {
    let usage = "💰 Usage: <code>/bonus &lt;casino&gt; &lt;wager&gt;</code>\n\nExample: <code>/bonus Stake 1000</code>";
    let Some((name, wager)) = args.trim().rsplit_once(char::is_whitespace) else {
        return Ok(Reply::text(usage));
    };
    let Ok(wager) = wager.replace(',', "").parse::<f64>() else {
        return Ok(Reply::text(usage));
    };
    if !wager.is_finite() || wager <= 0.0 {
        return Err(BotError::validation("Wager must be a positive number").into());
    }
    let name = casino::detect_casino(name).unwrap_or(name.trim());
    let lines = data.casinos.calculate_bonus(name, wager)?;
    Ok(Reply::text(casino::format_bonus(name, wager, &lines)))
}

// ============ Search ============

async fn search(data: &BotData, args: &str) -> Result<Reply> {
    if args.is_empty() {
        return Ok(Reply::text("🔎 Usage: <code>/search &lt;query&gt;</code>"));
    }
    let client = data
        .content
        .as_ref()
        .ok_or_else(|| BotError::Configuration("content search is not configured".to_string()))?;
    Ok(Reply::text(match client.search(args).await? {
        Some(item) => content::format_item(args, &item),
        None => format!("🔎 No results found for '{}'.", html_escape(args)),
    }))
}

// ============ Access control ============

fn request_access(data: &BotData, ctx: &CommandContext) -> Result<Reply> {
    if ctx.is_private() {
        return Ok(Reply::text("ℹ️ Private chats don't need authorization."));
    }
    if data.access.is_channel_authorized(ctx.chat_id)? {
        return Ok(Reply::text("✅ This channel is already authorized."));
    }
    let request_id = data
        .access
        .record_access_request(ctx.chat_id, ctx.chat_title.as_deref(), ctx.user.telegram_id)?;
    info!("Access request {} for chat {}", request_id, ctx.chat_id);

    let mut reply = Reply::text("📨 Access request sent to the administrators. You'll be able to use the bot here once it is approved.");
    reply.admin_notice = Some(format!(
        "🔔 <b>Access request #{}</b>\n\n\
         Chat: {} (<code>{}</code>)\n\
         From: {} (<code>{}</code>)\n\n\
         Approve with <code>/grant_access {}</code>",
        request_id,
        html_escape(ctx.chat_title.as_deref().unwrap_or("untitled")),
        ctx.chat_id,
        html_escape(&ctx.user.display_name()),
        ctx.user.telegram_id,
        ctx.chat_id
    ));
    Ok(reply)
}

fn grant_access(data: &BotData, ctx: &CommandContext, args: &str) -> Result<Reply> {
    let chat = parse_id(args).unwrap_or(ctx.chat_id);
    if chat > 0 {
        return Ok(Reply::text("ℹ️ Private chats are always authorized. Run this in a group or pass a chat id."));
    }
    let title = if chat == ctx.chat_id { ctx.chat_title.as_deref() } else { None };
    Ok(Reply::text(if data.access.authorize_channel(chat, title, ctx.user.telegram_id)? {
        format!("✅ Channel <code>{}</code> is now authorized.", chat)
    } else {
        format!("ℹ️ Channel <code>{}</code> was already authorized.", chat)
    }))
}

fn access_requests(data: &BotData) -> Result<Reply> {
    let requests = data.access.pending_requests()?;
    if requests.is_empty() {
        return Ok(Reply::text("📭 No pending access requests."));
    }
    let mut out = String::from("📬 <b>Pending Access Requests</b>\n\n");
    for r in requests {
        out.push_str(&format!(
            "• #{} {} (<code>{}</code>) by <code>{}</code>\n",
            r.id,
            html_escape(r.chat_title.as_deref().unwrap_or("untitled")),
            r.chat_id,
            r.requested_by
        ));
    }
    Ok(Reply::text(out))
}

/// Target user from the replied-to message, a numeric id or an @username
fn resolve_target(data: &BotData, ctx: &CommandContext, args: &str) -> Result<i64> {
    if let Some(id) = args.split_whitespace().next().and_then(|a| a.parse::<i64>().ok()) {
        return Ok(id);
    }
    if let Some(name) = args.split_whitespace().next().and_then(|a| a.strip_prefix('@')) {
        return data
            .users
            .find_by_username(name)?
            .map(|u| u.telegram_id)
            .ok_or_else(|| BotError::not_found(format!("user @{}", name)).into());
    }
    ctx.reply_to
        .as_ref()
        .map(|u| u.telegram_id)
        .ok_or_else(|| BotError::validation("Reply to a user or pass their id").into())
}

// ============ Callbacks ============

/// Handle a decoded button press. Errors become a toast.
pub async fn execute_callback(
    data: &BotData,
    user: &TelegramUser,
    chat_id: Option<i64>,
    action: CallbackAction,
) -> CallbackReply {
    match route_callback(data, user, chat_id, action).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Callback failed for user {}: {:#}", user.telegram_id, e);
            CallbackReply::toast(error_reply(&e))
        }
    }
}

async fn route_callback(
    data: &BotData,
    user: &TelegramUser,
    chat_id: Option<i64>,
    action: CallbackAction,
) -> Result<CallbackReply> {
    let uid = user.telegram_id;
    match action {
        CallbackAction::Vote { poll_id, option } => {
            let poll = data
                .polls
                .get_poll(poll_id)?
                .ok_or_else(|| BotError::not_found(format!("poll {}", poll_id)))?;
            let mut choice = vec![option];
            if poll.allows_multiple {
                let mut current = data.polls.user_choice(poll_id, uid)?;
                if let Some(pos) = current.iter().position(|o| *o == option) {
                    current.remove(pos);
                } else {
                    current.push(option);
                }
                if current.is_empty() {
                    return Ok(CallbackReply::toast("Select at least one option"));
                }
                current.sort_unstable();
                choice = current;
            }
            let receipt = data.polls.vote(poll_id, uid, &choice)?;
            let mut reply = poll_view(data, poll_id, uid)?;
            reply.toast = Some(if receipt.changed { "🔄 Vote changed" } else { "✅ Vote recorded" }.to_string());
            Ok(reply)
        }
        CallbackAction::PollRefresh(poll_id) => {
            let mut reply = poll_view(data, poll_id, uid)?;
            reply.toast = Some("🔄 Refreshed".to_string());
            Ok(reply)
        }
        CallbackAction::PollResults(poll_id) => {
            let poll = data
                .polls
                .get_poll(poll_id)?
                .ok_or_else(|| BotError::not_found(format!("poll {}", poll_id)))?;
            if !poll.results_visible() {
                return Ok(CallbackReply::toast("Quiz results are revealed when it closes"));
            }
            let results = data.polls.results(poll_id)?;
            Ok(CallbackReply {
                send: Some(Reply::text(voting::format_poll(&poll, &results, true, now_ts()))),
                ..Default::default()
            })
        }
        CallbackAction::PollClose(poll_id) => {
            data.polls.close_poll(poll_id, uid)?;
            let mut reply = poll_view(data, poll_id, uid)?;
            reply.toast = Some("🔒 Poll closed".to_string());
            Ok(reply)
        }

        CallbackAction::CasinoMenu => Ok(CallbackReply::edit(
            casino::menu_text().to_string(),
            casino_menu_keyboard(),
        )),
        CallbackAction::CasinoInfo => {
            let casinos = data.casinos.all_casinos()?;
            if casinos.is_empty() {
                return Ok(CallbackReply::toast("No casino data loaded yet"));
            }
            Ok(CallbackReply::edit(
                "📊 <b>Select a casino</b>".to_string(),
                casino_select_keyboard(&casinos),
            ))
        }
        CallbackAction::CasinoCalc => Ok(CallbackReply::edit(
            "💰 <b>Bonus Calculator</b>\n\n\
             Send <code>/bonus &lt;casino&gt; &lt;wager&gt;</code>\n\n\
             Example: <code>/bonus Stake 1000</code>"
                .to_string(),
            back_to_casino_menu(),
        )),
        CallbackAction::CasinoCompare => {
            let mut all = Vec::new();
            for summary in data.casinos.all_casinos()? {
                if let Some(c) = data.casinos.casino(&summary.name)? {
                    all.push(c);
                }
            }
            Ok(CallbackReply::edit(casino::format_comparison(&all), back_to_casino_menu()))
        }
        CallbackAction::CasinoSelect(name) => {
            let c = data
                .casinos
                .casino(&name)?
                .ok_or_else(|| BotError::not_found(format!("casino {}", name)))?;
            Ok(CallbackReply::edit(casino::format_casino(&c), back_to_casino_menu()))
        }

        CallbackAction::ImageFavorite(image_id) => {
            let favorite = data.image_store.toggle_favorite(image_id, uid)?;
            let image = data
                .image_store
                .get(image_id)?
                .ok_or_else(|| BotError::not_found(format!("image {}", image_id)))?;
            Ok(CallbackReply {
                toast: Some(if favorite { "⭐ Added to favorites" } else { "Removed from favorites" }.to_string()),
                markup: Some(image_keyboard(&image)),
                ..Default::default()
            })
        }
        CallbackAction::ImageGallery | CallbackAction::ImageFavorites => {
            let ctx = CommandContext {
                user: user.clone(),
                chat_id: chat_id.unwrap_or(uid),
                chat_title: None,
                reply_to: None,
            };
            let favorites = matches!(action, CallbackAction::ImageFavorites);
            Ok(CallbackReply {
                send: Some(gallery(data, &ctx, favorites)?),
                ..Default::default()
            })
        }

        CallbackAction::TodoDone(task_id) => {
            let task = data.todos.complete(uid, task_id)?;
            let (text, keyboard) = todo_list(data, uid, None)?;
            Ok(CallbackReply {
                toast: Some(format!("🎉 Completed #{}", task.id)),
                edit: Some((text, Some(keyboard))),
                ..Default::default()
            })
        }
        CallbackAction::TodoRefresh => {
            let (text, keyboard) = todo_list(data, uid, None)?;
            Ok(CallbackReply::edit(text, keyboard))
        }
    }
}

fn poll_view(data: &BotData, poll_id: i64, user_id: i64) -> Result<CallbackReply> {
    let poll = data
        .polls
        .get_poll(poll_id)?
        .ok_or_else(|| BotError::not_found(format!("poll {}", poll_id)))?;
    let results = data.polls.results(poll_id)?;
    let chosen = data.polls.user_choice(poll_id, user_id)?;
    Ok(CallbackReply::edit(
        voting::format_poll(&poll, &results, false, now_ts()),
        poll_keyboard(&poll, &results, &chosen),
    ))
}
