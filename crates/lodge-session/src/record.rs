//! The stored session record.
//!
//! A [`Record`] is the canonical unit held by the repository's cache. Callers
//! never touch the cached instance directly: every [`Session`](crate::Session)
//! handed out works on its own clone, and every write-back stores a fresh one.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::config::DEFAULT_MAX_INACTIVE_INTERVAL_SECS;

/// A session record: identity, timestamps, inactivity window and attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique identifier among live records. Changes only through [`Record::change_id`].
    id: String,

    /// When the record was created. Never changes.
    creation_time: DateTime<Utc>,

    /// When the record was last accessed, as reported by the caller.
    last_accessed_time: DateTime<Utc>,

    /// Inactivity window. Negative means the record never expires.
    max_inactive_interval: TimeDelta,

    /// Attribute values keyed by name.
    attributes: HashMap<String, Value>,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    /// Create a record with a random id and the default 30 minute window.
    pub fn new() -> Self {
        Self::with_id(generate_id())
    }

    /// Create a record with the given id and the default 30 minute window.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed_time: now,
            max_inactive_interval: TimeDelta::seconds(DEFAULT_MAX_INACTIVE_INTERVAL_SECS),
            attributes: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the id with a freshly generated one and return it.
    pub fn change_id(&mut self) -> String {
        self.id = generate_id();
        self.id.clone()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.last_accessed_time
    }

    pub fn set_last_accessed_time(&mut self, at: DateTime<Utc>) {
        self.last_accessed_time = at;
    }

    pub fn max_inactive_interval(&self) -> TimeDelta {
        self.max_inactive_interval
    }

    pub fn set_max_inactive_interval(&mut self, interval: TimeDelta) {
        self.max_inactive_interval = interval;
    }

    /// Get an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Names of all attributes currently set, in no particular order.
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    /// Set an attribute. A JSON `null` removes the attribute instead.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if value.is_null() {
            self.attributes.remove(&name);
        } else {
            self.attributes.insert(name, value);
        }
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Whether the inactivity window has elapsed as of now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the inactivity window has elapsed as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.max_inactive_interval < TimeDelta::zero() {
            return false;
        }
        now - self.max_inactive_interval >= self.last_accessed_time
    }
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
