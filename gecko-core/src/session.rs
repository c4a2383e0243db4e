//! # Session
//!
//! The unit of work: one event's lifecycle from trigger intake to the output
//! callback.
//!
//! A session is created by the invoker, shared as `Arc<Session>` between the
//! dispatcher and exactly one stage task at a time, and dropped once the
//! output stage has handed the outbound payload to the completion callback.
//!
//! Attributes and outbound fields sit behind their own locks so that
//! observers (e.g. debug logging) can snapshot them while a stage handler is
//! writing.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::{Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

/// Event payload: a JSON object.
pub type Payload = Map<String, Value>;

/// One-shot callback receiving the final outbound payload.
pub type OnCompleted = Box<dyn FnOnce(Payload) + Send + 'static>;

/// Value stored in the session attribute map.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A wall-clock instant.
    Timestamp(DateTime<Utc>),
    /// Time elapsed since the session was created.
    Elapsed(Duration),
    /// Arbitrary diagnostic metadata.
    Value(Value),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            AttrValue::Elapsed(d) => write!(f, "{d:?}"),
            AttrValue::Value(v) => write!(f, "{v}"),
        }
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(ts: DateTime<Utc>) -> Self {
        AttrValue::Timestamp(ts)
    }
}

impl From<Duration> for AttrValue {
    fn from(d: Duration) -> Self {
        AttrValue::Elapsed(d)
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Value(v)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Value(Value::String(s.to_string()))
    }
}

/// Insertion-ordered, thread-safe attribute map.
#[derive(Debug, Default)]
pub struct Attributes {
    entries: RwLock<Vec<(String, AttrValue)>>,
}

impl Attributes {
    /// Insert or replace `key`. Replacing keeps the original position.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Look up a single attribute.
    pub fn get(&self, key: &str) -> Option<AttrValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Returns `true` if `key` has been recorded.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Copy of all attributes in insertion order.
    pub fn snapshot(&self) -> Vec<(String, AttrValue)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded attributes.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the event as the trigger submitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Topic the trigger published under.
    pub topic: String,
    /// Raw event data.
    pub data: Payload,
}

/// Result fields accumulated by stage handlers.
///
/// Fields can be added or overwritten but never removed.
#[derive(Debug)]
pub struct Outbound {
    topic: String,
    data: Mutex<Payload>,
}

impl Outbound {
    fn new(topic: String) -> Self {
        Self {
            topic,
            data: Mutex::new(Payload::new()),
        }
    }

    /// Topic of the response.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Add (or overwrite) a result field.
    pub fn add_field(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Read a single result field.
    pub fn field(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Copy of the current result fields.
    pub fn snapshot(&self) -> Payload {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Per-event unit of work flowing through the dispatch stages.
pub struct Session {
    id: i64,
    created_at: DateTime<Utc>,
    started: Instant,
    attributes: Attributes,
    inbound: Inbound,
    outbound: Outbound,
    on_completed: Mutex<Option<OnCompleted>>,
}

impl Session {
    /// Create a session for an inbound event.
    pub fn new(id: i64, topic: impl Into<String>, data: Payload, on_completed: OnCompleted) -> Self {
        let topic = topic.into();
        Self {
            id,
            created_at: Utc::now(),
            started: Instant::now(),
            attributes: Attributes::default(),
            outbound: Outbound::new(topic.clone()),
            inbound: Inbound { topic, data },
            on_completed: Mutex::new(Some(on_completed)),
        }
    }

    /// Unique id stamped at intake.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Routing topic.
    pub fn topic(&self) -> &str {
        &self.inbound.topic
    }

    /// Wall-clock creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Monotonic time elapsed since creation.
    pub fn escaped(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record an attribute. Never fails.
    pub fn add_attribute(&self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key, value);
    }

    /// The attribute map.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The event as submitted.
    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    /// The accumulated result.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Returns `true` once the completion callback has been taken.
    pub fn is_completed(&self) -> bool {
        self.on_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Hand the outbound payload to the completion callback.
    ///
    /// The callback is taken out before it runs, so it fires at most once
    /// even if it panics. Returns `false` if it had already fired.
    pub fn complete(&self) -> bool {
        let callback = self
            .on_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(self.outbound.snapshot());
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("topic", &self.inbound.topic)
            .field("created_at", &self.created_at)
            .field("attributes", &self.attributes)
            .field("completed", &self.is_completed())
            .finish()
    }
}
