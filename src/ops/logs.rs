//! Live journal fan-out
//!
//! A single `journalctl -f` child feeds a broadcast channel; every
//! websocket client holds its own receiver.

use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1000;
const RESPAWN_DELAY: Duration = Duration::from_secs(5);

pub struct LogFollower {
    service: String,
    tx: broadcast::Sender<String>,
    started: Mutex<bool>,
}

impl LogFollower {
    pub fn new(service: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            service: service.into(),
            tx,
            started: Mutex::new(false),
        }
    }

    /// Receiver for live lines; the follower starts on first use
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        let rx = self.tx.subscribe();
        self.ensure_started();
        rx
    }

    pub fn publish(&self, line: String) {
        // No receivers is fine; lines are dropped until someone connects.
        let _ = self.tx.send(line);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn ensure_started(&self) {
        let mut started = self.started.lock();
        if *started {
            return;
        }
        *started = true;

        let service = self.service.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = follow(&service, &tx).await {
                    warn!("journalctl follower for {} failed: {}", service, e);
                }
                tokio::time::sleep(RESPAWN_DELAY).await;
            }
        });
        info!("Started journal follower for {}", self.service);
    }
}

async fn follow(service: &str, tx: &broadcast::Sender<String>) -> std::io::Result<()> {
    let mut child = Command::new("journalctl")
        .args(["-u", service, "-f", "--no-pager", "-n", "0"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Ok(());
    };
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            let _ = tx.send(line.to_string());
        }
    }

    let status = child.wait().await?;
    debug!("journalctl exited with {}", status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_fans_out() {
        let follower = LogFollower::new("communitybot-test");
        let mut a = follower.tx.subscribe();
        let mut b = follower.tx.subscribe();

        follower.publish("hello".to_string());

        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
        assert_eq!(follower.receiver_count(), 2);
    }

    #[test]
    fn test_publish_without_receivers() {
        let follower = LogFollower::new("communitybot-test");
        follower.publish("dropped".to_string());
        assert_eq!(follower.receiver_count(), 0);
    }
}
