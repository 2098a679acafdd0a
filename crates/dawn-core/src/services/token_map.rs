//! Reconnection-token table.
//!
//! Maps a client-visible token (hex-encoded 16 random bytes) to a session
//! id. The table is small and fixed: 16 entries, LRU-evicted on overflow. A
//! token whose session has since been destroyed simply fails the lookup and
//! the client falls through to a fresh `init`.

use std::sync::Mutex;
use std::time::Instant;

use rand::RngCore;
use thiserror::Error;

/// Fixed table size.
const TOKEN_SLOTS: usize = 16;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("secure randomness unavailable")]
    NoEntropy,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    token: String,
    session_id: u64,
    created_at: Instant,
}

/// Fixed-size LRU table of reconnection tokens.
pub struct ReconnectTokens {
    entries: Mutex<Vec<TokenEntry>>,
}

impl ReconnectTokens {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(TOKEN_SLOTS)),
        }
    }

    /// Mint a token for `session_id`, evicting the oldest entry when full.
    pub fn issue(&self, session_id: u64) -> Result<String, TokenError> {
        let mut raw = [0u8; 16];
        rand::rngs::OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|_| TokenError::NoEntropy)?;
        let token: String = raw.iter().map(|b| format!("{b:02x}")).collect();

        let mut entries = self.entries.lock().unwrap();
        // a session re-issuing replaces its previous mapping
        entries.retain(|e| e.session_id != session_id);
        if entries.len() >= TOKEN_SLOTS {
            let victim = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(i, _)| i)
                .unwrap_or(0);
            entries.remove(victim);
        }
        entries.push(TokenEntry {
            token: token.clone(),
            session_id,
            created_at: Instant::now(),
        });
        Ok(token)
    }

    /// Resolve a token to its session id.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<u64> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.token == token)
            .map(|e| e.session_id)
    }

    /// Drop the mapping for a destroyed session.
    pub fn forget_session(&self, session_id: u64) {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.session_id != session_id);
    }
}

impl Default for ReconnectTokens {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_lookup() {
        let tokens = ReconnectTokens::new();
        let t = tokens.issue(7).unwrap();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(tokens.lookup(&t), Some(7));
        assert_eq!(tokens.lookup("feedfacefeedfacefeedfacefeedface"), None);
    }

    #[test]
    fn test_reissue_invalidates_previous_token() {
        let tokens = ReconnectTokens::new();
        let first = tokens.issue(7).unwrap();
        let second = tokens.issue(7).unwrap();
        assert_eq!(tokens.lookup(&first), None);
        assert_eq!(tokens.lookup(&second), Some(7));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let tokens = ReconnectTokens::new();
        let first = tokens.issue(0).unwrap();
        for i in 1..=TOKEN_SLOTS as u64 {
            tokens.issue(i).unwrap();
        }
        assert_eq!(tokens.lookup(&first), None);
        assert_eq!(tokens.entries.lock().unwrap().len(), TOKEN_SLOTS);
    }

    #[test]
    fn test_forget_session() {
        let tokens = ReconnectTokens::new();
        let t = tokens.issue(3).unwrap();
        tokens.forget_session(3);
        assert_eq!(tokens.lookup(&t), None);
    }
}
