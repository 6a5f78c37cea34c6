use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StateToken {
    expires_at: Instant,
    metadata: Option<serde_json::Value>,
}

/// One-time CSRF tokens for the OAuth authorization step. A token is
/// consumable exactly once and expires after a fixed TTL even if never
/// consumed; a periodic sweep keeps the map from growing unbounded.
pub struct StateTokenManager {
    tokens: Mutex<HashMap<String, StateToken>>,
    ttl: Duration,
}

impl Default for StateTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mint a fresh token carrying optional metadata to hand back on
    /// consumption.
    pub fn create(&self, metadata: Option<serde_json::Value>) -> String {
        let token = Uuid::new_v4().to_string();
        let entry = StateToken {
            expires_at: Instant::now() + self.ttl,
            metadata,
        };

        let mut tokens = self.tokens.lock().expect("state token lock");
        tokens.insert(token.clone(), entry);
        token
    }

    #[must_use]
    pub fn is_valid(&self, token: &str) -> bool {
        let tokens = self.tokens.lock().expect("state token lock");
        tokens
            .get(token)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Consume exactly once: returns the stored metadata and removes the
    /// token. Unknown, already-consumed, or expired tokens yield `None`.
    pub fn consume(&self, token: &str) -> Option<Option<serde_json::Value>> {
        let mut tokens = self.tokens.lock().expect("state token lock");
        let entry = tokens.remove(token)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.metadata)
    }

    /// Drop expired entries. Called by the background sweep but usable
    /// directly.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.lock().expect("state token lock");
        let before = tokens.len();
        tokens.retain(|_, entry| entry.expires_at > now);
        before - tokens.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().expect("state token lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let removed = self.sweep();
                if removed > 0 {
                    debug!("swept {removed} expired state tokens");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_consume_round_trip() {
        let manager = StateTokenManager::new();
        let metadata = serde_json::json!({"redirect": "/done"});

        let token = manager.create(Some(metadata.clone()));
        let consumed = manager.consume(&token);

        assert_eq!(consumed, Some(Some(metadata)));
    }

    #[test]
    fn test_second_consume_returns_none() {
        let manager = StateTokenManager::new();
        let token = manager.create(None);

        assert!(manager.consume(&token).is_some());
        assert!(manager.consume(&token).is_none());
    }

    #[test]
    fn test_unknown_token_is_invalid() {
        let manager = StateTokenManager::new();
        assert!(!manager.is_valid("nope"));
        assert!(manager.consume("nope").is_none());
    }

    #[test]
    fn test_expired_token_not_consumable() {
        let manager = StateTokenManager::with_ttl(Duration::ZERO);
        let token = manager.create(None);

        assert!(!manager.is_valid(&token));
        assert!(manager.consume(&token).is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let expired = StateTokenManager::with_ttl(Duration::ZERO);
        expired.create(None);
        expired.create(None);
        assert_eq!(expired.sweep(), 2);
        assert!(expired.is_empty());

        let live = StateTokenManager::new();
        live.create(None);
        assert_eq!(live.sweep(), 0);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_tokens_are_unique() {
        let manager = StateTokenManager::new();
        let a = manager.create(None);
        let b = manager.create(None);
        assert_ne!(a, b);
    }
}
