//! Windowed stream processing engine. Events carrying an event time and an optional partition key
//! are grouped into Tumbling, Sliding or Session windows per key, and every fired window is
//! reduced by an [Aggregator] into a [WindowResult].
//!
//! ```text
//!  ingest --hash(key)--> [shard queue] --> Shard(assign -> store -> trigger) --> [output queue] --> poll_result
//! ```

pub use crate::aggregator::{Aggregator, CountAggregator};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{
    EngineSettings, Settings, TimeDomain, WindowConfig, WindowKind, WindowKindTag,
};
pub use crate::error::{Error, Result};
pub use crate::message::{GLOBAL_KEY, StreamEvent, WindowResult};
pub use crate::metrics::{MetricsSnapshot, WindowMetrics};
pub use crate::processor::{ProcessorBuilder, ProcessorState, WindowedStreamProcessor};

/// Reduces the events of a fired window.
pub mod aggregator;

/// Processing time sources.
pub mod clock;

/// Window and engine configuration, including loading it from the environment.
pub mod config;

mod error;

/// Events and fired window results.
pub mod message;

/// Engine counters.
pub mod metrics;

/// Processor lifecycle, sharding and the shard loop.
pub mod processor;

/// Per key window state.
pub mod store;

/// When windows fire.
pub mod trigger;

/// Assigns events to windows.
pub mod windower;
