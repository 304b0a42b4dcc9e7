use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;

/// Admission gate keyed by client id. Implementations must be safe to call
/// from concurrent request handlers.
pub trait RateLimit: Send + Sync {
    fn try_acquire(&self, client_key: &str) -> bool;
}

/// Used when no limit is configured.
pub struct Unlimited;

impl RateLimit for Unlimited {
    fn try_acquire(&self, _client_key: &str) -> bool {
        true
    }
}

/// Fixed-window counter per client key. The window is the current wall-clock
/// minute; counts from previous minutes are discarded on rollover.
pub struct MinuteWindowLimiter {
    rpm: u32,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    minute: u64,
    counts: HashMap<String, u32>,
}

impl MinuteWindowLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            rpm,
            state: Mutex::new(WindowState::default()),
        }
    }

    fn acquire_at(&self, client_key: &str, minute: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.minute != minute {
            state.minute = minute;
            state.counts.clear();
        }
        let count = state.counts.entry(client_key.to_string()).or_insert(0);
        if self.rpm == 0 || *count >= self.rpm {
            return false;
        }
        *count += 1;
        true
    }
}

impl RateLimit for MinuteWindowLimiter {
    fn try_acquire(&self, client_key: &str) -> bool {
        let minute = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() / 60)
            .unwrap_or(0);
        self.acquire_at(client_key, minute)
    }
}

pub fn from_config(config: &RateLimitConfig) -> Arc<dyn RateLimit> {
    match config.rpm {
        Some(rpm) => Arc::new(MinuteWindowLimiter::new(rpm)),
        None => Arc::new(Unlimited),
    }
}
