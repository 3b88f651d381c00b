//! Recent commits from the GitHub REST API

use crate::error::{BotError, BotResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const GITHUB_API: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RELEASE_LIMIT: usize = 10;
const MESSAGE_MAX: usize = 100;

/// One commit as shown in the rollback list
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Release {
    pub sha: String,
    pub full_sha: String,
    pub message: String,
    pub author: String,
    pub date: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct GithubCommit {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub date: String,
}

impl From<GithubCommit> for Release {
    fn from(c: GithubCommit) -> Self {
        let message = c
            .commit
            .message
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(MESSAGE_MAX)
            .collect();
        let (author, date) = c
            .commit
            .author
            .map(|a| (a.name, a.date))
            .unwrap_or_default();
        Release {
            sha: c.sha.chars().take(8).collect(),
            full_sha: c.sha,
            message,
            author,
            date,
            url: c.html_url,
        }
    }
}

/// Newest first, capped at ten
pub fn normalize(commits: Vec<GithubCommit>) -> Vec<Release> {
    commits
        .into_iter()
        .take(RELEASE_LIMIT)
        .map(Release::from)
        .collect()
}

#[derive(Clone)]
pub struct ReleasesClient {
    client: Client,
    base_url: String,
    repo: String,
    token: Option<String>,
}

impl ReleasesClient {
    /// `repo` is "owner/name"
    pub fn new(repo: &str, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("communitybot/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: GITHUB_API.to_string(),
            repo: repo.to_string(),
            token,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn recent(&self) -> BotResult<Vec<Release>> {
        let url = format!("{}/repos/{}/commits", self.base_url, self.repo);
        debug!("Fetching commits from {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(&[("per_page", RELEASE_LIMIT)]);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("GitHub commits request failed: {} {}", status, text);
            return Err(BotError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let commits: Vec<GithubCommit> = response.json().await?;
        Ok(normalize(commits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sha: &str, message: &str) -> serde_json::Value {
        serde_json::json!({
            "sha": sha,
            "html_url": format!("https://github.com/o/r/commit/{}", sha),
            "commit": {
                "message": message,
                "author": {"name": "Dana", "date": "2024-05-01T12:00:00Z"}
            }
        })
    }

    #[test]
    fn test_normalize_shapes_commit() {
        let raw = serde_json::json!([sample(
            "0123456789abcdef0123456789abcdef01234567",
            "Fix poll expiry\n\nLonger body text"
        )]);
        let commits: Vec<GithubCommit> = serde_json::from_value(raw).unwrap();
        let releases = normalize(commits);

        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.sha, "01234567");
        assert_eq!(r.full_sha.len(), 40);
        assert_eq!(r.message, "Fix poll expiry");
        assert_eq!(r.author, "Dana");
        assert_eq!(r.date, "2024-05-01T12:00:00Z");
        assert!(r.url.ends_with(&r.full_sha));
    }

    #[test]
    fn test_normalize_caps_and_truncates() {
        let long = "x".repeat(150);
        let raw: Vec<serde_json::Value> = (0..15)
            .map(|i| sample(&format!("{:040x}", i), &long))
            .collect();
        let commits: Vec<GithubCommit> =
            serde_json::from_value(serde_json::Value::Array(raw)).unwrap();
        let releases = normalize(commits);

        assert_eq!(releases.len(), 10);
        assert_eq!(releases[0].message.len(), 100);
    }

    #[test]
    fn test_missing_author() {
        let raw = serde_json::json!([{
            "sha": "abcdef0123",
            "html_url": "u",
            "commit": {"message": "m", "author": null}
        }]);
        let commits: Vec<GithubCommit> = serde_json::from_value(raw).unwrap();
        let releases = normalize(commits);
        assert_eq!(releases[0].author, "");
        assert_eq!(releases[0].sha, "abcdef01");
    }
}
