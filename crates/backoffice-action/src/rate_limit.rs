//! Sliding-window rate limiter per action category.
//!
//! Counters live in memory for the lifetime of the process; a restart
//! resets every window. Limits are enforced per process, not across agents.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use backoffice_core::config::RateLimitConfig;
use tracing::debug;

/// Default sliding window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Per-category check-and-increment limiter.
///
/// A category without a configured limit is unlimited.
pub struct RateLimiter {
    limits: HashMap<String, u32>,
    categories: BTreeMap<String, String>,
    window: Duration,
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with the given category limits and a one-hour window.
    pub fn new<I, K>(limits: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<String>,
    {
        Self {
            limits: limits.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            categories: BTreeMap::new(),
            window: DEFAULT_WINDOW,
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Map action names to the category they count against.
    pub fn with_categories(mut self, categories: BTreeMap<String, String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.limits.clone())
            .with_window(Duration::from_secs(config.window_secs))
            .with_categories(config.categories.clone())
    }

    /// Record an event for `category` if it is under its limit.
    ///
    /// Returns `false` without recording when the window is full.
    pub fn check(&self, category: &str) -> bool {
        self.check_at(category, Instant::now())
    }

    pub fn check_at(&self, category: &str, now: Instant) -> bool {
        let Some(&limit) = self.limits.get(category) else {
            return true;
        };
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let window = events.entry(category.to_string()).or_default();
        self.prune(window, now);

        if window.len() >= limit as usize {
            debug!(category, limit, "Rate limit reached");
            return false;
        }
        window.push_back(now);
        true
    }

    /// [`check`](Self::check) against the category `action` maps to.
    /// Unmapped actions are their own category.
    pub fn check_action(&self, action: &str) -> bool {
        self.check(self.category_for(action))
    }

    pub fn category_for<'a>(&'a self, action: &'a str) -> &'a str {
        self.categories
            .get(action)
            .map(String::as_str)
            .unwrap_or(action)
    }

    /// Events left in the current window. `None` means unlimited.
    pub fn remaining(&self, category: &str) -> Option<u32> {
        self.remaining_at(category, Instant::now())
    }

    pub fn remaining_at(&self, category: &str, now: Instant) -> Option<u32> {
        let limit = *self.limits.get(category)?;
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let used = match events.get_mut(category) {
            Some(window) => {
                self.prune(window, now);
                window.len() as u32
            }
            None => 0,
        };
        Some(limit.saturating_sub(used))
    }

    pub fn limit(&self, category: &str) -> Option<u32> {
        self.limits.get(category).copied()
    }

    fn prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}
