use std::time::Duration;

use tracing::warn;

use crate::kv::KeyValueStore;

/// Counts attempts per subject (usually a client IP) inside a fixed expiry window.
///
/// Backend failures never block a caller; they are logged and the attempt is allowed.
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    scope: &'static str,
    max_attempts: i64,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(scope: &'static str, max_attempts: i64, window: Duration) -> Self {
        Self {
            scope,
            max_attempts,
            window,
        }
    }

    fn key(&self, subject: &str) -> String {
        format!("{}_attempts:{}", self.scope, subject)
    }

    pub async fn is_blocked(&self, kv: &dyn KeyValueStore, subject: &str) -> bool {
        let key = self.key(subject);
        match kv.get(&key).await {
            Ok(Some(value)) => value
                .parse::<i64>()
                .map(|count| count >= self.max_attempts)
                .unwrap_or(false),
            Ok(None) => false,
            Err(err) => {
                warn!(key = %key, error = %err, "rate limiter lookup failed; allowing request");
                false
            }
        }
    }

    pub async fn record_attempt(&self, kv: &dyn KeyValueStore, subject: &str) {
        let key = self.key(subject);
        match kv.incr(&key).await {
            Ok(1) => {
                if let Err(err) = kv.expire(&key, self.window).await {
                    warn!(key = %key, error = %err, "failed to set rate limiter window");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(key = %key, error = %err, "failed to record attempt"),
        }
    }

    pub async fn reset(&self, kv: &dyn KeyValueStore, subject: &str) {
        let key = self.key(subject);
        if let Err(err) = kv.delete(&key).await {
            warn!(key = %key, error = %err, "failed to reset attempt counter");
        }
    }
}
