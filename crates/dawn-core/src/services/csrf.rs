//! CSRF token issuance and single-use enforcement.
//!
//! A token is `base64url(nonce(16) || unix_seconds(8 BE) || hmac_sha256)`,
//! keyed by a per-process secret drawn from the OS RNG at startup. The
//! nonce ring records the last 1024 consumed nonces; verification extracts
//! the nonce, the login handler records it *before* checking credentials so
//! a replayed token is rejected regardless of credential outcome.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 16;
/// Ring capacity; a power of two.
const RING_CAPACITY: usize = 1024;
/// HMAC-SHA256 tag length.
const TAG_LEN: usize = 32;
/// Timestamp field length.
const TS_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsrfError {
    #[error("token malformed")]
    Malformed,

    #[error("token signature invalid")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token already used")]
    Replayed,

    #[error("secure randomness unavailable")]
    NoEntropy,
}

/// Circular record of recently consumed nonces.
struct NonceRing {
    entries: Vec<[u8; NONCE_LEN]>,
    next: usize,
}

impl NonceRing {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(RING_CAPACITY),
            next: 0,
        }
    }

    /// Constant-time membership test.
    fn contains(&self, nonce: &[u8; NONCE_LEN]) -> bool {
        let mut found = 0u8;
        for entry in &self.entries {
            found |= entry.as_slice().ct_eq(nonce.as_slice()).unwrap_u8();
        }
        found == 1
    }

    fn record(&mut self, nonce: [u8; NONCE_LEN]) {
        if self.entries.len() < RING_CAPACITY {
            self.entries.push(nonce);
        } else {
            self.entries[self.next] = nonce;
        }
        self.next = (self.next + 1) & (RING_CAPACITY - 1);
    }
}

/// Issues HMAC-bound, time-limited, single-use CSRF tokens.
pub struct CsrfProtect {
    key: [u8; 32],
    ring: Mutex<NonceRing>,
    ttl: Duration,
}

impl CsrfProtect {
    /// Create with a key drawn from the OS RNG. Fails (rather than falling
    /// back to weak randomness) when the secure source is unavailable.
    pub fn new(ttl: Duration) -> Result<Self, CsrfError> {
        let mut key = [0u8; 32];
        rand::rngs::OsRng
            .try_fill_bytes(&mut key)
            .map_err(|_| CsrfError::NoEntropy)?;
        Ok(Self {
            key,
            ring: Mutex::new(NonceRing::new()),
            ttl,
        })
    }

    /// Issue a fresh token.
    pub fn issue(&self) -> Result<String, CsrfError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| CsrfError::NoEntropy)?;
        Ok(self.encode(&nonce, unix_now()))
    }

    fn encode(&self, nonce: &[u8; NONCE_LEN], issued_at: u64) -> String {
        let mut body = Vec::with_capacity(NONCE_LEN + TS_LEN + TAG_LEN);
        body.extend_from_slice(nonce);
        body.extend_from_slice(&issued_at.to_be_bytes());
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(&body[..NONCE_LEN + TS_LEN]);
        body.extend_from_slice(&mac.finalize().into_bytes());
        URL_SAFE_NO_PAD.encode(body)
    }

    /// Verify a token's signature and age, returning its nonce. Replay
    /// checking is a separate step so the caller controls when the nonce is
    /// recorded.
    pub fn verify(&self, token: &str) -> Result<[u8; NONCE_LEN], CsrfError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CsrfError::Malformed)?;
        if raw.len() != NONCE_LEN + TS_LEN + TAG_LEN {
            return Err(CsrfError::Malformed);
        }

        let (body, tag) = raw.split_at(NONCE_LEN + TS_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| CsrfError::BadSignature)?;

        let mut ts = [0u8; TS_LEN];
        ts.copy_from_slice(&body[NONCE_LEN..]);
        let issued_at = u64::from_be_bytes(ts);
        let now = unix_now();
        if now.saturating_sub(issued_at) > self.ttl.as_secs() {
            return Err(CsrfError::Expired);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&body[..NONCE_LEN]);
        Ok(nonce)
    }

    /// Consume a verified nonce. Returns `Err(Replayed)` when the nonce has
    /// been seen before; otherwise records it (single-use enforcement).
    pub fn consume(&self, nonce: &[u8; NONCE_LEN]) -> Result<(), CsrfError> {
        let mut ring = self.ring.lock().unwrap();
        if ring.contains(nonce) {
            return Err(CsrfError::Replayed);
        }
        ring.record(*nonce);
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
