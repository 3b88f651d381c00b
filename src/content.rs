//! Media search through a RapidAPI endpoint
//!
//! Providers disagree on response shape, so results are normalised from
//! whatever JSON comes back.

use crate::error::{BotError, BotResult};
use crate::users::html_escape;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub url: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Clone)]
pub struct ContentClient {
    client: Client,
    api_key: String,
    host: String,
}

impl ContentClient {
    pub fn new(api_key: &str, host: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.to_string(),
            host: host.to_string(),
        }
    }

    /// Create from config; needs both key and host
    pub fn from_config(config: &crate::config::Config) -> Option<Self> {
        match (config.rapidapi_key.as_deref(), config.rapidapi_host.as_deref()) {
            (Some(key), Some(host)) => Some(Self::new(key, host)),
            _ => None,
        }
    }

    pub async fn search(&self, query: &str) -> BotResult<Option<ContentItem>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BotError::validation("Please tell me what to search for."));
        }
        let url = format!("https://{}/search", self.host);
        debug!("Content search on {}: {}", self.host, query);

        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.host)
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Content search failed: {} {}", status, text);
            return Err(BotError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        let body: Value = response.json().await?;
        Ok(normalize(&body))
    }
}

fn str_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First usable item from a list, a `results`/`data` wrapper, or a bare object
pub fn normalize(body: &Value) -> Option<ContentItem> {
    let item = match body {
        Value::Array(items) => items.first()?,
        Value::Object(map) => match map.get("results").or_else(|| map.get("data")) {
            Some(Value::Array(items)) => items.first()?,
            _ => body,
        },
        _ => return None,
    };

    let url = str_field(item, &["video_url", "url", "link", "mp4"])?;
    Some(ContentItem {
        url,
        title: str_field(item, &["title", "name"]),
        thumbnail: str_field(item, &["thumbnail", "thumb", "image"]),
    })
}

pub fn format_item(query: &str, item: &ContentItem) -> String {
    let title = item.title.as_deref().unwrap_or(query);
    format!(
        "🔎 <b>{}</b>\n\n{}",
        html_escape(title),
        html_escape(&item.url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_list() {
        let body = json!([
            {"title": "First", "video_url": "https://v/1", "thumbnail": "https://t/1"},
            {"title": "Second", "url": "https://v/2"}
        ]);
        let item = normalize(&body).unwrap();
        assert_eq!(item.url, "https://v/1");
        assert_eq!(item.title.as_deref(), Some("First"));
        assert_eq!(item.thumbnail.as_deref(), Some("https://t/1"));
    }

    #[test]
    fn test_normalize_url_fallbacks() {
        assert_eq!(normalize(&json!({"link": "https://l"})).unwrap().url, "https://l");
        assert_eq!(normalize(&json!({"mp4": "https://m.mp4", "url": ""})).unwrap().url, "https://m.mp4");
        assert_eq!(
            normalize(&json!({"results": [{"url": "https://r"}]})).unwrap().url,
            "https://r"
        );
    }

    #[test]
    fn test_normalize_nothing_usable() {
        assert!(normalize(&json!([])).is_none());
        assert!(normalize(&json!({"title": "no url"})).is_none());
        assert!(normalize(&json!("text")).is_none());
        assert!(normalize(&json!({"data": []})).is_none());
    }

    #[test]
    fn test_format_escapes() {
        let item = ContentItem {
            url: "https://x?a=1&b=2".into(),
            title: None,
            thumbnail: None,
        };
        let text = format_item("cats <3", &item);
        assert!(text.contains("cats &lt;3"));
        assert!(text.contains("a=1&amp;b=2"));
    }
}
