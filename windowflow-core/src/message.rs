//! [StreamEvent] is the unit of ingestion, it is immutable once created and cheap to clone. The
//! engine owns it from `ingest` till the window(s) it was assigned to are fired, and the
//! [crate::aggregator::Aggregator] only borrows it. [WindowResult] is what gets emitted when a
//! window fires.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::Error;
use crate::Result;
use crate::config::WindowKindTag;

/// Partition key used for events which do not carry a key.
pub const GLOBAL_KEY: &str = "__global__";

/// Timestamped event flowing into the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// id of the event
    id: String,
    /// event time in milliseconds since epoch
    event_time: i64,
    /// type tag of the event
    event_type: String,
    /// opaque payload
    payload: Bytes,
    /// partition key, [GLOBAL_KEY] if absent
    key: Option<Arc<str>>,
}

impl StreamEvent {
    pub fn new(id: impl Into<String>, event_time: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            event_time,
            event_type: String::new(),
            payload: payload.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_time(&self) -> i64 {
        self.event_time
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Key used for routing and grouping, falls back to [GLOBAL_KEY].
    pub fn partition_key(&self) -> Arc<str> {
        match &self.key {
            Some(key) => Arc::clone(key),
            None => Arc::from(GLOBAL_KEY),
        }
    }

    /// Validates the event and returns its partition key.
    pub(crate) fn validate(&self) -> Result<Arc<str>> {
        if self.event_time < 0 {
            return Err(Error::Validation(format!(
                "event {} has negative event time {}",
                self.id, self.event_time
            )));
        }
        if let Some(key) = &self.key
            && key.trim().is_empty()
        {
            return Err(Error::Validation(format!(
                "event {} has an empty partition key",
                self.id
            )));
        }
        Ok(self.partition_key())
    }
}

/// Result of a fired window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult<T> {
    /// partition key of the window
    pub key: Arc<str>,
    /// start of the window (inclusive)
    pub start: i64,
    /// end of the window, exclusive for tumbling and sliding, the latest event time for session
    pub end: i64,
    pub kind: WindowKindTag,
    /// number of events the window buffered
    pub event_count: usize,
    /// output of the aggregator
    pub aggregated: T,
}

impl<T> WindowResult<T> {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end)
    }
}
