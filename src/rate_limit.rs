//! Per-user sliding-window rate limiting

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Sliding-window limiter keyed by Telegram user id
pub struct RateLimiter {
    /// Max requests per window
    max_requests: usize,
    window: Duration,
    /// Per-user request timestamps, oldest first
    entries: RwLock<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn prune(&self, stamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a request if the user is under the limit. Returns true if allowed.
    pub async fn check(&self, user_id: i64) -> bool {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let stamps = entries.entry(user_id).or_default();
        self.prune(stamps, now);

        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Requests left in the current window
    pub async fn remaining(&self, user_id: i64) -> usize {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&user_id) {
            Some(stamps) => {
                self.prune(stamps, Instant::now());
                self.max_requests.saturating_sub(stamps.len())
            }
            None => self.max_requests,
        }
    }

    /// Time until the oldest request leaves the window, if the user is limited
    pub async fn reset_in(&self, user_id: i64) -> Option<Duration> {
        let mut entries = self.entries.write().await;
        let stamps = entries.get_mut(&user_id)?;
        let now = Instant::now();
        self.prune(stamps, now);
        if stamps.len() < self.max_requests {
            return None;
        }
        stamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Drop users with no requests inside the window
    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, stamps| {
            self.prune(stamps, now);
            !stamps.is_empty()
        });
    }
}

/// Limiters for the different kinds of work the bot does
pub struct RateLimits {
    pub message: RateLimiter,
    pub ai: RateLimiter,
    pub image: RateLimiter,
    pub admin: RateLimiter,
}

impl RateLimits {
    pub fn new(message_requests: usize, message_window: Duration) -> Self {
        let minute = Duration::from_secs(60);
        Self {
            message: RateLimiter::new(message_requests, message_window),
            ai: RateLimiter::new(10, minute),
            image: RateLimiter::new(5, minute),
            admin: RateLimiter::new(100, minute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_enforced() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check(1).await);
        assert!(limiter.check(1).await);
        assert!(limiter.check(1).await);
        assert!(!limiter.check(1).await);
        assert_eq!(limiter.remaining(1).await, 0);
        assert!(limiter.reset_in(1).await.is_some());

        // Other users are independent
        assert!(limiter.check(2).await);
        assert_eq!(limiter.remaining(2).await, 2);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.check(7).await);
        assert!(!limiter.check(7).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.check(7).await);
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_users() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check(9).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.cleanup().await;
        assert!(limiter.entries.read().await.is_empty());
        assert_eq!(limiter.remaining(9).await, 5);
        assert!(limiter.reset_in(9).await.is_none());
    }
}
