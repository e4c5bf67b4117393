//! Daily posting quota.
//!
//! Evaluation is pure: it only sees the posts and replies the caller has
//! already fetched, so it is exactly as fresh as those collections.

use chrono::{Local, NaiveDate, TimeZone};

use crate::config::{TimelineConfig, DEFAULT_DAILY_POST_QUOTA};
use crate::types::Post;

/// Posts and replies created on one calendar day.
#[derive(Debug, Clone)]
pub struct RateWindow<'a> {
    day: NaiveDate,
    entries: Vec<&'a Post>,
}

impl<'a> RateWindow<'a> {
    /// Collect entries whose creation date in `tz` is `day`.
    pub fn collect<Tz: TimeZone>(posts: &'a [Post], replies: &'a [Post], day: NaiveDate, tz: &Tz) -> Self {
        let entries = posts
            .iter()
            .chain(replies)
            .filter(|p| p.created_at.with_timezone(tz).date_naive() == day)
            .collect();
        Self { day, entries }
    }

    /// The evaluated day.
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Entries on that day.
    pub fn entries(&self) -> &[&'a Post] {
        &self.entries
    }

    /// Number of entries on that day.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was created that day.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed per-day quota shared by posts and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    quota: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_POST_QUOTA)
    }
}

impl RateLimiter {
    /// Create a limiter with an explicit quota.
    pub fn new(quota: usize) -> Self {
        Self { quota }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &TimelineConfig) -> Self {
        Self::new(config.daily_post_quota)
    }

    /// The quota.
    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Whether another post fits in today's quota, in the local timezone.
    pub fn can_post_today(&self, posts: &[Post], replies: &[Post], today: NaiveDate) -> bool {
        self.can_post_on(posts, replies, today, &Local)
    }

    /// Whether another post fits in the quota for `day` as seen in `tz`.
    pub fn can_post_on<Tz: TimeZone>(&self, posts: &[Post], replies: &[Post], day: NaiveDate, tz: &Tz) -> bool {
        self.allows(&RateWindow::collect(posts, replies, day, tz))
    }

    /// Posts left for `day` as seen in `tz`.
    pub fn remaining_on<Tz: TimeZone>(&self, posts: &[Post], replies: &[Post], day: NaiveDate, tz: &Tz) -> usize {
        self.quota.saturating_sub(RateWindow::collect(posts, replies, day, tz).len())
    }

    /// Whether a window still has room.
    pub fn allows(&self, window: &RateWindow<'_>) -> bool {
        window.len() < self.quota
    }
}
