//! OpenAI client
//!
//! Chat completions back `/ask`, mood analysis and casino Q&A; the images
//! endpoint backs `/image`. Callers depend on the `Completion` and
//! `ImageGenerator` traits so tests can swap in canned responses.

use crate::error::{BotError, BotResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";

/// Exchanges kept per user in `ChatHistory`
pub const MAX_HISTORY_EXCHANGES: usize = 10;

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion backend
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> BotResult<String>;
}

/// Image generation backend, returns the image URL
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, size: &str) -> BotResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u32,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    chat_model: String,
    image_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, chat_model: &str, image_model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            chat_model: chat_model.to_string(),
            image_model: image_model.to_string(),
        }
    }

    /// Create from config, `None` without an API key
    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        config
            .openai_api_key
            .as_deref()
            .map(|key| Self::new(key, &config.openai_chat_model, &config.openai_image_model))
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> BotResult<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(map_status(status, text))
    }
}

/// Map a non-success OpenAI status onto the error kinds the retry policy knows
fn map_status(status: StatusCode, body: String) -> BotError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BotError::RateLimit { retry_after: 2 },
        StatusCode::UNAUTHORIZED => BotError::Authentication(body),
        _ => BotError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> BotResult<String> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage::system(system));
        all.extend_from_slice(messages);

        let request = ChatRequest {
            model: &self.chat_model,
            messages: all,
            max_tokens: 1000,
            temperature: 0.7,
        };

        debug!("Calling OpenAI chat: model={}, messages={}", self.chat_model, messages.len());
        let response: ChatResponse = self.post(OPENAI_CHAT_URL, &request).await?.json().await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| BotError::Api {
                status: 200,
                message: "Empty response from OpenAI".to_string(),
            })?;

        info!(
            "OpenAI response: model={}, len={}, tokens={:?}",
            self.chat_model,
            content.len(),
            response.usage.map(|u| u.total_tokens)
        );
        Ok(content)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate_image(&self, prompt: &str, size: &str) -> BotResult<String> {
        let request = ImageRequest {
            model: &self.image_model,
            prompt,
            size,
            quality: "standard",
            n: 1,
        };
        info!("Generating image: model={}, prompt_len={}", self.image_model, prompt.len());
        let response: ImageResponse = self.post(OPENAI_IMAGES_URL, &request).await?.json().await?;
        response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or_else(|| BotError::Api {
                status: 200,
                message: "No image URL in response".to_string(),
            })
    }
}

/// Exponential backoff around one external call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt` plus up to one `base` of jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base * 2u32.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        exp + self.base.mul_f64(jitter)
    }
}

/// Run `f` until it succeeds, fails permanently or attempts run out
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut f: F) -> BotResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BotResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!("Transient error (attempt {}): {}, retrying in {:?}", attempt + 1, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Per-user conversation memory for `/ask`
#[derive(Default)]
pub struct ChatHistory {
    inner: Mutex<HashMap<i64, Vec<ChatMessage>>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: i64) -> Vec<ChatMessage> {
        self.inner.lock().get(&user_id).cloned().unwrap_or_default()
    }

    /// Append one exchange, dropping the oldest beyond the cap
    pub fn push_exchange(&self, user_id: i64, question: &str, answer: &str) {
        let mut inner = self.inner.lock();
        let history = inner.entry(user_id).or_default();
        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(answer));
        let max = MAX_HISTORY_EXCHANGES * 2;
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }
    }

    pub fn clear(&self, user_id: i64) {
        self.inner.lock().remove(&user_id);
    }

    pub fn len(&self, user_id: i64) -> usize {
        self.inner.lock().get(&user_id).map_or(0, Vec::len)
    }
}

/// System prompt for `/ask`
pub fn assistant_prompt(name: &str) -> String {
    format!(
        "You are a helpful, friendly and knowledgeable assistant in a Telegram community. \
         The user's name is {}. Keep responses concise but informative and use emojis \
         where they fit. Current date: {}",
        name,
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// `/ask` with history and retry
pub async fn ask(
    llm: &dyn Completion,
    history: &ChatHistory,
    user_id: i64,
    name: &str,
    question: &str,
) -> BotResult<String> {
    let mut messages = history.get(user_id);
    messages.push(ChatMessage::user(question));
    let system = assistant_prompt(name);

    let answer = with_retry(RetryPolicy::default(), || llm.complete(&system, &messages)).await?;
    history.push_exchange(user_id, question, &answer);
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    #[async_trait]
    impl Completion for Echo {
        async fn complete(&self, _system: &str, messages: &[ChatMessage]) -> BotResult<String> {
            Ok(format!("{} messages", messages.len()))
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            BotError::RateLimit { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, String::new()),
            BotError::Authentication(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, String::new()),
            BotError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_delay_grows() {
        let policy = fast();
        assert!(policy.delay(0) >= Duration::from_millis(1));
        assert!(policy.delay(0) < Duration::from_millis(2));
        assert!(policy.delay(3) >= Duration::from_millis(8));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(fast(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BotError::RateLimit { retry_after: 1 })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: BotResult<()> = with_retry(fast(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BotError::Api { status: 500, message: String::new() })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: BotResult<()> = with_retry(fast(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BotError::Authentication("bad key".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_history_is_capped() {
        let history = ChatHistory::new();
        for i in 0..15 {
            history.push_exchange(7, &format!("q{}", i), &format!("a{}", i));
        }
        let messages = history.get(7);
        assert_eq!(messages.len(), MAX_HISTORY_EXCHANGES * 2);
        assert_eq!(messages[0], ChatMessage::user("q5"));
        history.clear(7);
        assert_eq!(history.len(7), 0);
    }

    #[tokio::test]
    async fn test_ask_records_exchange() {
        let history = ChatHistory::new();
        let first = ask(&Echo, &history, 1, "Ana", "hi").await.unwrap();
        assert_eq!(first, "1 messages");
        let second = ask(&Echo, &history, 1, "Ana", "again").await.unwrap();
        assert_eq!(second, "3 messages");
        assert_eq!(history.len(1), 4);
    }
}
