//! Ephemeral OAuth state for PKCE flows.
//!
//! TikTok's `state` parameter must be unguessable and the PKCE verifier must
//! never reach the browser, so pending flows are kept in an in-process map
//! keyed by an opaque state token. Entries are single-use and expire after
//! ten minutes; the map is lost on restart, which simply forces the user to
//! restart the connect flow.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A pending PKCE flow: which business started it and its code verifier.
#[derive(Clone, Debug)]
pub struct PkceStateEntry {
    pub business_id: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, PkceStateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// `expiry_seconds` — how long states remain valid (default 600).
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    /// Registers a pending flow and returns the opaque state token.
    pub fn create_state(&self, business_id: &str, code_verifier: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let entry = PkceStateEntry {
            business_id: business_id.to_string(),
            code_verifier: code_verifier.to_string(),
            created_at: Utc::now(),
        };

        let mut states = self.states.lock().unwrap();
        states.insert(token.clone(), entry);

        token
    }

    /// Validates and consumes a state token (single-use).
    pub fn validate_and_consume(&self, token: &str) -> Option<PkceStateEntry> {
        let mut states = self.states.lock().unwrap();
        let entry = states.remove(token)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }
        Some(entry)
    }

    /// Drops expired entries; called periodically.
    pub fn cleanup_expired(&self) {
        let mut states = self.states.lock().unwrap();
        let now = Utc::now();
        states.retain(|_, entry| now - entry.created_at <= self.expiry_duration);
    }

    pub fn count(&self) -> usize {
        self.states.lock().unwrap().len()
    }
}

/// Background task to periodically clean up expired states.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(
            "OAuth state cleanup complete, {} states remaining",
            manager.count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_flow_roundtrip() {
        let manager = StateManager::new(600);

        let token_a = manager.create_state("biz-1", "verifier-a");
        let token_b = manager.create_state("biz-2", "verifier-b");
        assert_ne!(token_a, token_b);
        assert_eq!(manager.count(), 2);

        // Consuming one flow leaves the other intact
        let entry = manager.validate_and_consume(&token_b).unwrap();
        assert_eq!(entry.business_id, "biz-2");
        assert_eq!(entry.code_verifier, "verifier-b");
        assert_eq!(manager.count(), 1);

        let entry = manager.validate_and_consume(&token_a).unwrap();
        assert_eq!(entry.business_id, "biz-1");
    }

    #[test]
    fn test_token_consumed_at_most_once() {
        let manager = StateManager::new(600);
        let token = manager.create_state("biz-1", "v");

        assert!(manager.validate_and_consume(&token).is_some());
        // Replay of the same token and a token that never existed both fail
        assert!(manager.validate_and_consume(&token).is_none());
        assert!(manager.validate_and_consume("never-issued").is_none());
    }

    #[test]
    fn test_cleanup_interleaved_with_consume() {
        let manager = StateManager::new(1);
        let fresh = manager.create_state("biz-fresh", "v1");
        let stale = manager.create_state("biz-stale", "v2");

        // Consuming before expiry works and survives a cleanup pass
        manager.cleanup_expired();
        assert!(manager.validate_and_consume(&fresh).is_some());

        std::thread::sleep(std::time::Duration::from_secs(2));
        manager.cleanup_expired();
        assert_eq!(manager.count(), 0);

        // Expired entry is gone whether or not cleanup ran first
        assert!(manager.validate_and_consume(&stale).is_none());
    }

    #[test]
    fn test_expired_token_rejected_even_without_cleanup() {
        let manager = StateManager::new(1);
        let token = manager.create_state("biz-1", "v");

        std::thread::sleep(std::time::Duration::from_secs(2));
        // Still in the map (no cleanup ran), but consume checks age itself
        assert_eq!(manager.count(), 1);
        assert!(manager.validate_and_consume(&token).is_none());
    }
}
