//! Mood analysis over a user's recent messages

use crate::error::BotResult;
use crate::llm::{with_retry, ChatMessage, Completion, RetryPolicy};
use crate::users::{html_escape, LoggedMessage};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const LOOKBACK_DAYS: i64 = 3;
pub const MAX_MESSAGES: usize = 20;

const SYSTEM_PROMPT: &str = "You assess the emotional tone of chat messages. \
    Be kind and supportive. Always answer with a single JSON object.";

const FALLBACK_SUGGESTIONS: [&str; 2] = [
    "Keep chatting so there is more to go on next time",
    "Take a short break and check in with yourself",
];

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodReport {
    pub mood: String,
    pub confidence: f64,
    pub analysis: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(skip_deserializing)]
    pub message_count: usize,
}

impl MoodReport {
    fn unknown() -> Self {
        Self {
            mood: "unknown".to_string(),
            confidence: 0.0,
            analysis: "No recent messages found for analysis".to_string(),
            suggestions: Vec::new(),
            message_count: 0,
        }
    }
}

/// Emoji for a mood word; anything unrecognised gets a thinking face
pub fn mood_emoji(mood: &str) -> &'static str {
    match mood.to_lowercase().as_str() {
        "happy" | "joyful" => "😊",
        "excited" => "🤩",
        "content" | "calm" | "relaxed" => "😌",
        "neutral" => "😐",
        "sad" | "depressed" => "😢",
        "angry" => "😠",
        "frustrated" => "😤",
        "anxious" | "worried" | "stressed" => "😰",
        "tired" => "😴",
        "unknown" => "❓",
        _ => "🤔",
    }
}

fn build_prompt(messages: &[LoggedMessage]) -> String {
    let joined = messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze the emotional mood and sentiment of the following {} recent messages from a user.\n\n\
         Messages:\n{}\n\n\
         Respond in JSON format:\n\
         {{\"mood\": \"primary_mood\", \"confidence\": 0.0, \"analysis\": \"brief explanation\", \
         \"suggestions\": [\"suggestion1\", \"suggestion2\"]}}\n\n\
         mood is one word (happy, sad, angry, anxious, excited, neutral, frustrated, content, ...), \
         confidence is between 0.0 and 1.0, give 2-3 supportive suggestions.",
        messages.len(),
        joined
    )
}

/// Read the model's answer, bare JSON or inside a fenced block.
/// Unparseable answers become a neutral report carrying the raw text.
pub fn parse_response(response: &str) -> MoodReport {
    let candidate = FENCED_JSON_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| response.trim());

    match serde_json::from_str::<MoodReport>(candidate) {
        Ok(mut report) => {
            report.confidence = report.confidence.clamp(0.0, 1.0);
            report.mood = report.mood.trim().to_lowercase();
            report
        }
        Err(e) => {
            debug!("Mood response was not JSON: {}", e);
            MoodReport {
                mood: "neutral".to_string(),
                confidence: 0.5,
                analysis: response.chars().take(200).collect(),
                suggestions: FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
                message_count: 0,
            }
        }
    }
}

/// Analyze up to `MAX_MESSAGES` messages, newest first as logged
pub async fn analyze(llm: &dyn Completion, messages: &[LoggedMessage]) -> BotResult<MoodReport> {
    if messages.is_empty() {
        return Ok(MoodReport::unknown());
    }
    let messages = &messages[..messages.len().min(MAX_MESSAGES)];
    let prompt = vec![ChatMessage::user(build_prompt(messages))];

    let response = with_retry(RetryPolicy::default(), || llm.complete(SYSTEM_PROMPT, &prompt)).await?;
    let mut report = parse_response(&response);
    report.message_count = messages.len();
    info!("Mood analysis: mood={}, messages={}", report.mood, report.message_count);
    Ok(report)
}

pub fn format_report(name: &str, report: &MoodReport) -> String {
    let mut out = format!(
        "{} <b>Mood analysis for {}</b>\n\n\
         Mood: <b>{}</b>\n\
         Confidence: <b>{:.0}%</b>\n\
         Messages analyzed: {} (last {} days)\n\n\
         {}",
        mood_emoji(&report.mood),
        html_escape(name),
        html_escape(&report.mood),
        report.confidence * 100.0,
        report.message_count,
        LOOKBACK_DAYS,
        html_escape(&report.analysis)
    );
    if !report.suggestions.is_empty() {
        out.push_str("\n\n💡 <b>Suggestions</b>\n");
        for s in &report.suggestions {
            out.push_str(&format!("• {}\n", html_escape(s)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl Completion for Canned {
        async fn complete(&self, _system: &str, _messages: &[ChatMessage]) -> BotResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn msg(text: &str) -> LoggedMessage {
        LoggedMessage {
            user_id: 1,
            chat_id: 1,
            text: text.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_parse_bare_json() {
        let report = parse_response(
            r#"{"mood":"Happy","confidence":1.7,"analysis":"upbeat","suggestions":["keep going"]}"#,
        );
        assert_eq!(report.mood, "happy");
        assert_eq!(report.confidence, 1.0);
        assert_eq!(report.suggestions, vec!["keep going"]);
    }

    #[test]
    fn test_parse_fenced_json() {
        let report = parse_response(
            "Here you go:\n```json\n{\"mood\":\"anxious\",\"confidence\":0.6,\"analysis\":\"worried\"}\n```",
        );
        assert_eq!(report.mood, "anxious");
        assert!(report.suggestions.is_empty());
    }

    #[test]
    fn test_parse_fallback() {
        let long = "x".repeat(300);
        let report = parse_response(&long);
        assert_eq!(report.mood, "neutral");
        assert_eq!(report.confidence, 0.5);
        assert_eq!(report.analysis.len(), 200);
        assert_eq!(report.suggestions.len(), 2);
    }

    #[tokio::test]
    async fn test_no_messages_is_unknown() {
        let report = analyze(&Canned("{}"), &[]).await.unwrap();
        assert_eq!(report.mood, "unknown");
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.message_count, 0);
    }

    #[tokio::test]
    async fn test_analyze_counts_messages() {
        let llm = Canned(r#"{"mood":"excited","confidence":0.9,"analysis":"lots of !"}"#);
        let messages: Vec<_> = (0..25).map(|i| msg(&format!("message {}!", i))).collect();
        let report = analyze(&llm, &messages).await.unwrap();
        assert_eq!(report.mood, "excited");
        assert_eq!(report.message_count, MAX_MESSAGES);
        assert!(format_report("Ana", &report).contains("🤩"));
    }

    #[test]
    fn test_emoji_defaults() {
        assert_eq!(mood_emoji("SAD"), "😢");
        assert_eq!(mood_emoji("bewildered"), "🤔");
    }
}
