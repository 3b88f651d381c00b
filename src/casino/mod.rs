//! Casino knowledge base: stored VIP data, bonus formulas and LLM Q&A

pub mod formula;
pub mod store;

pub use store::{BonusLine, CasinoData, CasinoStore, CasinoSummary};

use crate::error::BotResult;
use crate::llm::{with_retry, ChatMessage, Completion, RetryPolicy};
use crate::users::html_escape;
use serde_json::json;

const SYSTEM_PROMPT: &str = "You are a casino information specialist. Give clear, accurate \
    information about casino features, bonuses and VIP systems. Use emojis where they help. \
    For calculations, show your work step by step. If the information is not in the provided \
    context, say so plainly.";

/// Keywords that identify each casino in free text
const CASINO_KEYWORDS: &[(&str, &[&str])] = &[
    ("BC.GAME", &["bc", "bc.game", "bcgame"]),
    ("Stake", &["stake", "stakes"]),
    ("Shuffle", &["shuffle", "shfl"]),
    ("LuckyBird", &["luckybird", "lucky bird"]),
    ("Gamba", &["gamba"]),
];

/// Which casino a question is about. Single-word keywords must match a whole
/// word so "bc" does not fire on "abc".
pub fn detect_casino(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .collect();

    CASINO_KEYWORDS.iter().find_map(|(casino, keywords)| {
        keywords
            .iter()
            .any(|k| {
                if k.contains(' ') {
                    lower.contains(k)
                } else {
                    words.contains(k)
                }
            })
            .then_some(*casino)
    })
}

/// JSON context handed to the model
pub fn build_context(store: &CasinoStore, question: &str) -> BotResult<serde_json::Value> {
    if let Some(name) = detect_casino(question) {
        if let Some(data) = store.casino(name)? {
            return Ok(json!({ "type": "casino_specific", "casino": data }));
        }
    }
    let casinos = store.all_casinos()?;
    Ok(json!({ "type": "casino_list", "casinos": casinos }))
}

/// Answer a free-form question from stored casino data
pub async fn ask(llm: &dyn Completion, store: &CasinoStore, question: &str) -> BotResult<String> {
    let context = build_context(store, question)?;
    let prompt = vec![ChatMessage::user(format!(
        "Using the following casino information:\n{}\n\nAnswer this question: {}",
        serde_json::to_string_pretty(&context)?,
        question
    ))];
    with_retry(RetryPolicy::default(), || llm.complete(SYSTEM_PROMPT, &prompt)).await
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

pub fn format_casino(data: &CasinoData) -> String {
    let mut out = format!("🎰 <b>{}</b>\n", html_escape(&data.summary.name));
    if let Some(ref d) = data.summary.description {
        out.push_str(&format!("{}\n", html_escape(d)));
    }
    if let Some(ref w) = data.summary.website {
        out.push_str(&format!("🌐 {}\n", html_escape(w)));
    }

    if !data.tiers.is_empty() {
        out.push_str("\n👑 <b>VIP Tiers</b>\n");
        for tier in &data.tiers {
            out.push_str(&format!(
                "• <b>{}</b>{}\n",
                html_escape(&tier.name),
                tier.level_range
                    .as_deref()
                    .map(|r| format!(" ({})", html_escape(r)))
                    .unwrap_or_default()
            ));
            for level in &tier.levels {
                out.push_str(&format!(
                    "   {}: bonus {} · XP {}\n",
                    html_escape(&level.level_name),
                    level.bonus_amount.as_deref().unwrap_or("-"),
                    level.xp_requirement.as_deref().unwrap_or("-")
                ));
            }
        }
    }

    if !data.features.is_empty() {
        out.push_str("\n🎁 <b>Features</b>\n");
        for f in &data.features {
            out.push_str(&format!("• <b>{}</b>", html_escape(&f.name)));
            if let Some(ref d) = f.description {
                out.push_str(&format!(": {}", html_escape(d)));
            }
            out.push('\n');
        }
    }

    if !data.general_info.is_empty() {
        out.push_str("\nℹ️ <b>General</b>\n");
        for (k, v) in &data.general_info {
            out.push_str(&format!("• {}: {}\n", html_escape(k), html_escape(v)));
        }
    }
    out
}

pub fn format_bonus(casino: &str, wager: f64, lines: &[BonusLine]) -> String {
    if lines.is_empty() {
        return format!(
            "💰 No bonus formulas are stored for <b>{}</b>.",
            html_escape(casino)
        );
    }
    let mut out = format!(
        "💰 <b>{} bonuses for a {} wager</b>\n\n",
        html_escape(casino),
        format_amount(wager)
    );
    for line in lines {
        out.push_str(&format!(
            "• {}: <b>{}</b> <i>({})</i>\n",
            html_escape(&line.feature),
            format_amount(line.value),
            html_escape(&line.formula)
        ));
    }
    out
}

pub fn format_comparison(casinos: &[CasinoData]) -> String {
    if casinos.is_empty() {
        return "🎯 No casino data loaded yet.".to_string();
    }
    let mut out = String::from("🎯 <b>Casino Comparison</b>\n\n");
    for c in casinos {
        out.push_str(&format!(
            "<b>{}</b>: {} tiers · {} features\n",
            html_escape(&c.summary.name),
            c.tiers.len(),
            c.features.len()
        ));
    }
    out
}

pub fn menu_text() -> &'static str {
    "🎰 <b>Casino Information Center</b>\n\n\
     What would you like to know about?\n\n\
     • Use the buttons below to navigate\n\
     • Or ask directly: <code>/casinoask what's the weekly bonus at Stake?</code>\n\
     • Bonus calculator: <code>/bonus Stake 1000</code>"
}

#[cfg(test)]
mod tests {
    use super::store::tests::seeded;
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[test]
    fn test_detect_casino() {
        assert_eq!(detect_casino("What's the rakeback on BC.Game?"), Some("BC.GAME"));
        assert_eq!(detect_casino("bc level 23 weekly"), Some("BC.GAME"));
        assert_eq!(detect_casino("Is stake better?"), Some("Stake"));
        assert_eq!(detect_casino("lucky bird daily"), Some("LuckyBird"));
        assert_eq!(detect_casino("shfl token"), Some("Shuffle"));
        assert_eq!(detect_casino("abc def"), None);
        assert_eq!(detect_casino("hello"), None);
    }

    struct Recorder {
        last_prompt: Mutex<String>,
    }

    #[async_trait]
    impl Completion for Recorder {
        async fn complete(&self, _system: &str, messages: &[ChatMessage]) -> BotResult<String> {
            *self.last_prompt.lock() = messages[0].content.clone();
            Ok("answer".to_string())
        }
    }

    #[tokio::test]
    async fn test_ask_uses_detected_casino() {
        let store = seeded();
        let llm = Recorder { last_prompt: Mutex::new(String::new()) };
        let answer = ask(&llm, &store, "stake weekly bonus?").await.unwrap();
        assert_eq!(answer, "answer");
        let prompt = llm.last_prompt.lock().clone();
        assert!(prompt.contains("casino_specific"));
        assert!(prompt.contains("Weekly Bonus"));

        ask(&llm, &store, "which casino is best?").await.unwrap();
        assert!(llm.last_prompt.lock().contains("casino_list"));
    }

    #[test]
    fn test_formatting() {
        let store = seeded();
        let stake = store.casino("Stake").unwrap().unwrap();
        let text = format_casino(&stake);
        assert!(text.contains("Bronze 1"));
        assert!(text.contains("Curacao"));

        let lines = store.calculate_bonus("Stake", 1000.0).unwrap();
        let text = format_bonus("Stake", 1000.0, &lines);
        assert!(text.contains("<b>500</b>"));
        assert!(format_bonus("Gamba", 1.0, &[]).contains("No bonus formulas"));
    }
}
