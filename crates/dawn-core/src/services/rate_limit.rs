//! In-memory rate limiting with IPv6 /64 normalization.
//!
//! A limiter holds a fixed slot table (32 slots). Each slot records a
//! normalized client IP, a count, the window start, and the last access.
//! `check` is the only mutating observer; collisions evict the slot with the
//! oldest `last_access`.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed slot count per limiter.
const SLOT_COUNT: usize = 32;

#[derive(Debug, Clone)]
struct Slot {
    ip: String,
    count: u32,
    window_start: Instant,
    last_access: Instant,
}

/// Normalize a peer address for rate limiting.
///
/// IPv4 addresses pass through unchanged. IPv6 addresses are reduced to
/// their /64 prefix so a client cannot sidestep limits by rotating hosts
/// within one subnet. Unparseable input passes through verbatim (it still
/// forms a consistent key).
#[must_use]
pub fn normalize_ip(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Ok(IpAddr::V6(v6)) => {
            let seg = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", seg[0], seg[1], seg[2], seg[3])
        }
        Err(_) => ip.to_string(),
    }
}

/// Fixed-size sliding-window rate limiter keyed by normalized IP.
pub struct RateLimiter {
    slots: Mutex<Vec<Slot>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(SLOT_COUNT)),
            max_requests,
            window,
        }
    }

    /// Record one request from `ip` and return whether it is allowed.
    ///
    /// Atomic per call: the slot's `last_access` is refreshed on every
    /// check, a live window increments the count, an expired window restarts
    /// with count 1, and a new IP claims a slot (evicting the
    /// least-recently-accessed entry when the table is full).
    pub fn check(&self, ip: &str) -> bool {
        self.check_at(ip, Instant::now())
    }

    /// `check` with an explicit clock, for deterministic tests.
    pub fn check_at(&self, ip: &str, now: Instant) -> bool {
        let key = normalize_ip(ip);
        let mut slots = self.slots.lock().unwrap();

        if let Some(slot) = slots.iter_mut().find(|s| s.ip == key) {
            slot.last_access = now;
            if now.duration_since(slot.window_start) < self.window {
                slot.count += 1;
                return slot.count <= self.max_requests;
            }
            slot.count = 1;
            slot.window_start = now;
            return true;
        }

        let fresh = Slot {
            ip: key,
            count: 1,
            window_start: now,
            last_access: now,
        };
        if slots.len() < SLOT_COUNT {
            slots.push(fresh);
        } else {
            // evict the least-recently-accessed slot
            let victim = slots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.last_access)
                .map(|(i, _)| i)
                .unwrap_or(0);
            slots[victim] = fresh;
        }
        true
    }

    /// Clear the entry for `ip` (successful login resets its budget).
    pub fn reset(&self, ip: &str) {
        let key = normalize_ip(ip);
        self.slots.lock().unwrap().retain(|s| s.ip != key);
    }
}
