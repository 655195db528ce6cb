//! Per-entry expiration policy.
//!
//! The cache asks an [`Expiry`] how long an entry may live each time the
//! entry is created, overwritten, or read. The answer is a [`Duration`]
//! measured from that moment; [`Duration::MAX`] means the entry never expires.

use std::time::{Duration, Instant};

use chrono::TimeDelta;

use crate::record::Record;

/// Computes how long a cache entry may live after each kind of access.
pub trait Expiry<V>: Send + Sync {
    /// Lifetime of an entry that was just inserted under a fresh key.
    fn expire_after_create(&self, key: &str, value: &V, now: Instant) -> Duration;

    /// Lifetime of an entry whose value was just overwritten.
    ///
    /// `current` is what remained of the previous lifetime.
    fn expire_after_update(&self, key: &str, value: &V, now: Instant, current: Duration)
    -> Duration;

    /// Lifetime of an entry that was just read.
    ///
    /// `current` is what remains of the lifetime before this read.
    fn expire_after_read(&self, key: &str, value: &V, now: Instant, current: Duration) -> Duration;
}

/// Expiry driven by each record's own inactivity window.
///
/// Creating or overwriting a record restarts its countdown from the record's
/// `max_inactive_interval`. Reading leaves the countdown untouched, so only
/// saving a modified record keeps it alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionExpiry;

impl Expiry<Record> for SessionExpiry {
    fn expire_after_create(&self, _key: &str, value: &Record, _now: Instant) -> Duration {
        interval_to_duration(value.max_inactive_interval())
    }

    fn expire_after_update(
        &self,
        _key: &str,
        value: &Record,
        _now: Instant,
        _current: Duration,
    ) -> Duration {
        interval_to_duration(value.max_inactive_interval())
    }

    fn expire_after_read(
        &self,
        _key: &str,
        _value: &Record,
        _now: Instant,
        current: Duration,
    ) -> Duration {
        current
    }
}

/// Convert a signed inactivity window into a cache lifetime.
///
/// Negative windows map to [`Duration::MAX`] (never expires).
pub fn interval_to_duration(interval: TimeDelta) -> Duration {
    interval.to_std().unwrap_or(Duration::MAX)
}

/// The instant at which a cache entry expires, if ever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never passes.
    pub const NEVER: Deadline = Deadline(None);

    /// The deadline `lifetime` after `now`. Lifetimes too large to represent never pass.
    pub fn after(now: Instant, lifetime: Duration) -> Self {
        Self(now.checked_add(lifetime))
    }

    /// Time left before the deadline, or [`Duration::MAX`] if it never passes.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.0 {
            None => Duration::MAX,
            Some(at) => at.saturating_duration_since(now),
        }
    }

    /// Whether the deadline has been reached as of `now`.
    pub fn has_passed(&self, now: Instant) -> bool {
        matches!(self.0, Some(at) if now >= at)
    }

    /// The underlying instant, if any.
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }
}
