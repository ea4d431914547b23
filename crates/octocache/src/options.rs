//! Entry options: how long a value lives, how hard it is kept, and how
//! failures are masked.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Eviction priority of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    NeverRemove,
}

impl Priority {
    /// Parse a priority name (`low`, `normal`, `high`, `never_remove`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "never_remove" | "neverremove" => Some(Self::NeverRemove),
            _ => None,
        }
    }
}

/// Resolved options for a single cache operation.
///
/// A fresh value is built for every operation; options are never shared
/// between operations.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOptions {
    /// Logical lifetime of the entry.
    pub duration: Duration,
    /// Eviction priority in the local tier.
    pub priority: Priority,
    /// Serve a stale value when population fails.
    pub fail_safe: bool,
    /// Fraction of `duration` after which a hit triggers a background refresh.
    pub eager_refresh_threshold: Option<f32>,
    /// How long an expired entry is physically retained for fail-safe use.
    pub fail_safe_max_duration: Duration,
    /// Lifetime given to a stale value re-served after a failed population.
    pub fail_safe_throttle_duration: Duration,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5 * 60),
            priority: Priority::Normal,
            fail_safe: true,
            eager_refresh_threshold: Some(0.5),
            fail_safe_max_duration: Duration::from_secs(24 * 60 * 60),
            fail_safe_throttle_duration: Duration::from_secs(30),
        }
    }
}

impl EntryOptions {
    /// Set the logical duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Enable or disable fail-safe.
    pub fn with_fail_safe(mut self, enabled: bool) -> Self {
        self.fail_safe = enabled;
        self
    }

    /// Set the eager refresh threshold. Values outside `(0, 1)` disable it.
    pub fn with_eager_refresh_threshold(mut self, threshold: Option<f32>) -> Self {
        self.eager_refresh_threshold = threshold.filter(|t| *t > 0.0 && *t < 1.0);
        self
    }

    /// Set how long expired entries are kept for fail-safe use.
    pub fn with_fail_safe_max_duration(mut self, duration: Duration) -> Self {
        self.fail_safe_max_duration = duration;
        self
    }

    /// Set the lifetime of a stale value re-served after a failure.
    pub fn with_fail_safe_throttle_duration(mut self, duration: Duration) -> Self {
        self.fail_safe_throttle_duration = duration;
        self
    }

    /// How long a store should physically keep an entry written with these
    /// options.
    pub fn physical_duration(&self) -> Duration {
        if self.fail_safe {
            self.duration.max(self.fail_safe_max_duration)
        } else {
            self.duration
        }
    }

    /// Apply per-call overrides on top of these options.
    pub fn apply(mut self, overrides: &EntryOverrides) -> Self {
        if let Some(duration) = overrides.duration {
            self.duration = duration;
        }
        if let Some(priority) = overrides.priority {
            self.priority = priority;
        }
        self
    }

    /// Merge options set by a factory. They always win.
    pub fn merge_pending(mut self, pending: PendingOptions) -> Self {
        if let Some(duration) = pending.duration {
            self.duration = duration;
        }
        if let Some(priority) = pending.priority {
            self.priority = priority;
        }
        self
    }
}

/// Per-call overrides supplied by the caller of `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOverrides {
    pub duration: Option<Duration>,
    pub priority: Option<Priority>,
}

impl EntryOverrides {
    /// No overrides; the cache defaults apply.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Whether any field is overridden.
    pub fn is_empty(&self) -> bool {
        self.duration.is_none() && self.priority.is_none()
    }
}

/// Options requested by a factory during population, merged at commit time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingOptions {
    pub duration: Option<Duration>,
    pub priority: Option<Priority>,
}
