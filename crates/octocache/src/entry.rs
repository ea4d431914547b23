//! Cache entries and their freshness rules.
//!
//! Timestamps are wall-clock (`OffsetDateTime`) so that entries written by one
//! process can be judged fresh or stale by another.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::options::{EntryOptions, Priority};

/// A value together with its expiration metadata.
///
/// An entry is *fresh* until `created_at + duration`. After that it is
/// *stale*; a stale entry is still physically retained until
/// `created_at + physical_duration` when fail-safe is enabled, and may then be
/// served if a population fails.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: OffsetDateTime,
    pub duration: Duration,
    pub physical_duration: Duration,
    pub priority: Priority,
    pub fail_safe: bool,
}

/// Entry with an encoded payload, as held by the stores.
pub type RawEntry = CacheEntry<Arc<Vec<u8>>>;

impl<T> CacheEntry<T> {
    /// Create an entry created now with the given options.
    pub fn new(value: T, options: &EntryOptions) -> Self {
        Self {
            value,
            created_at: OffsetDateTime::now_utc(),
            duration: options.duration,
            physical_duration: options.physical_duration(),
            priority: options.priority,
            fail_safe: options.fail_safe,
        }
    }

    /// Override the creation time.
    pub fn created_at(mut self, at: OffsetDateTime) -> Self {
        self.created_at = at;
        self
    }

    /// Time elapsed since creation (zero if the clock moved backwards).
    pub fn age(&self, now: OffsetDateTime) -> Duration {
        let elapsed = now - self.created_at;
        if elapsed.is_negative() {
            Duration::ZERO
        } else {
            elapsed.unsigned_abs()
        }
    }

    /// Whether the entry is logically expired at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.age(now) >= self.duration
    }

    /// Remaining physical lifetime, `None` once the entry should be gone.
    pub fn remaining_physical(&self, now: OffsetDateTime) -> Option<Duration> {
        self.physical_duration
            .checked_sub(self.age(now))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Whether a hit at `now` should trigger a background refresh.
    pub fn needs_eager_refresh(&self, threshold: Option<f32>, now: OffsetDateTime) -> bool {
        let Some(threshold) = threshold else {
            return false;
        };
        let age = self.age(now);
        age < self.duration
            && age.as_secs_f64() >= self.duration.as_secs_f64() * f64::from(threshold)
    }
}

impl<T: Clone> CacheEntry<T> {
    /// A copy of a stale entry that is considered fresh for `throttle`, so
    /// that a failing source is not hit on every read.
    pub fn throttled(&self, throttle: Duration, now: OffsetDateTime) -> Self {
        let retained = self.remaining_physical(now).unwrap_or(Duration::ZERO);
        Self {
            value: self.value.clone(),
            created_at: now,
            duration: throttle,
            physical_duration: retained.max(throttle),
            priority: self.priority,
            fail_safe: self.fail_safe,
        }
    }
}
