//! Sliding-window admission control per (source_type, target_host) key.
//!
//! Denial never blocks the caller: it returns a wait hint so the scheduler
//! can defer the item instead of stalling the pass. The window arena hands
//! out one locked window per key, so unrelated targets never contend on a
//! shared lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dragnet_common::{Config, SourceType};

/// Window length and request ceiling for one target.
#[derive(Debug, Clone, Copy)]
pub struct RateConfig {
    pub ceiling: usize,
    pub window: Duration,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug, Default)]
struct Window {
    stamps: VecDeque<Instant>,
}

pub struct RateLimiter {
    defaults: HashMap<SourceType, RateConfig>,
    /// Per-key overrides, keyed by the full `source:host` string.
    overrides: HashMap<String, RateConfig>,
    /// Outer lock is held only to fetch or insert the per-key window.
    windows: Mutex<HashMap<String, Arc<Mutex<Window>>>>,
}

impl RateLimiter {
    pub fn from_config(config: &Config) -> Self {
        let web = RateConfig {
            ceiling: config.web_rate_ceiling,
            window: config.web_rate_window,
        };
        let api = RateConfig {
            ceiling: config.api_rate_ceiling,
            window: config.api_rate_window,
        };
        let mut defaults = HashMap::new();
        defaults.insert(SourceType::WebSearch, web);
        defaults.insert(SourceType::Paper, api);
        defaults.insert(SourceType::Government, api);
        Self {
            defaults,
            overrides: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Tighten or loosen the window for one specific target.
    pub fn with_override(mut self, key: &str, config: RateConfig) -> Self {
        self.overrides.insert(key.to_string(), config);
        self
    }

    /// Check admission for one request against the target's window.
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Admission at an explicit instant. Tests drive this directly.
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let config = self.config_for(key);
        let window = self.window_for(key);

        // Single authoritative counter per key: prune-then-count under the
        // per-key lock so concurrent checks cannot over-admit.
        let mut guard = window.lock().expect("rate window lock poisoned");
        while let Some(front) = guard.stamps.front() {
            if now.duration_since(*front) >= config.window {
                guard.stamps.pop_front();
            } else {
                break;
            }
        }

        if guard.stamps.len() < config.ceiling {
            guard.stamps.push_back(now);
            return Admission::Allowed;
        }

        // Window is full: the oldest stamp leaving the window frees a slot.
        let oldest = *guard.stamps.front().expect("full window has a front");
        let retry_after = config
            .window
            .saturating_sub(now.duration_since(oldest))
            .max(Duration::from_millis(1));
        Admission::Denied { retry_after }
    }

    fn config_for(&self, key: &str) -> RateConfig {
        if let Some(c) = self.overrides.get(key) {
            return *c;
        }
        let prefix = key.split(':').next().unwrap_or_default();
        SourceType::from_str_loose(prefix)
            .and_then(|s| self.defaults.get(&s).copied())
            .unwrap_or(RateConfig {
                ceiling: 10,
                window: Duration::from_secs(60),
            })
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<Window>> {
        let mut windows = self.windows.lock().expect("rate arena lock poisoned");
        windows.entry(key.to_string()).or_default().clone()
    }
}
