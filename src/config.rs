//! Engine configuration.
//!
//! ## Environment
//!
//! - `TIMELINE_DAILY_POST_QUOTA`: posts plus replies allowed per calendar day (default: 5)
//! - `TIMELINE_MAX_POST_CHARS`: maximum post length in characters (default: 777)
//! - `TIMELINE_MAX_HANDLE_CHARS`: maximum handle length in characters (default: 14)
//!
//! Unset or unparsable variables fall back to the defaults.

use serde::{Deserialize, Serialize};

/// Default daily quota shared by posts and replies.
pub const DEFAULT_DAILY_POST_QUOTA: usize = 5;

/// Default post length limit.
pub const DEFAULT_MAX_POST_CHARS: usize = 777;

/// Default handle length limit.
pub const DEFAULT_MAX_HANDLE_CHARS: usize = 14;

/// Limits applied by the composer and the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Posts plus replies allowed per calendar day.
    pub daily_post_quota: usize,
    /// Maximum post length in characters.
    pub max_post_chars: usize,
    /// Maximum handle length in characters.
    pub max_handle_chars: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            daily_post_quota: DEFAULT_DAILY_POST_QUOTA,
            max_post_chars: DEFAULT_MAX_POST_CHARS,
            max_handle_chars: DEFAULT_MAX_HANDLE_CHARS,
        }
    }
}

impl TimelineConfig {
    /// Load from `TIMELINE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str, default: usize| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            daily_post_quota: read("TIMELINE_DAILY_POST_QUOTA", defaults.daily_post_quota),
            max_post_chars: read("TIMELINE_MAX_POST_CHARS", defaults.max_post_chars),
            max_handle_chars: read("TIMELINE_MAX_HANDLE_CHARS", defaults.max_handle_chars),
        }
    }
}
