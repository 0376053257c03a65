//! Window and engine configuration. [WindowConfig] is validated once when it is built, an invalid
//! combination never reaches the engine. [Settings] can be loaded from `WINDOWFLOW_*` environment
//! variables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;
use crate::Result;

const DEFAULT_ALLOWED_LATENESS_MILLIS: u64 = 5000;
const DEFAULT_NUM_SHARDS: usize = 1;
const DEFAULT_INGEST_QUEUE_CAPACITY: usize = 500;
const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 500;
const DEFAULT_INGEST_TIMEOUT_MILLIS: u64 = 1000;
const DEFAULT_TICK_INTERVAL_MILLIS: u64 = 100;

pub const ENV_WINDOW_TYPE: &str = "WINDOWFLOW_WINDOW_TYPE";
pub const ENV_SIZE_MS: &str = "WINDOWFLOW_SIZE_MS";
pub const ENV_SLIDE_MS: &str = "WINDOWFLOW_SLIDE_MS";
pub const ENV_SESSION_TIMEOUT_MS: &str = "WINDOWFLOW_SESSION_TIMEOUT_MS";
pub const ENV_ALLOWED_LATENESS_MS: &str = "WINDOWFLOW_ALLOWED_LATENESS_MS";
pub const ENV_NUM_SHARDS: &str = "WINDOWFLOW_NUM_SHARDS";
pub const ENV_INGEST_QUEUE_CAPACITY: &str = "WINDOWFLOW_INGEST_QUEUE_CAPACITY";
pub const ENV_OUTPUT_QUEUE_CAPACITY: &str = "WINDOWFLOW_OUTPUT_QUEUE_CAPACITY";
pub const ENV_INGEST_TIMEOUT_MS: &str = "WINDOWFLOW_INGEST_TIMEOUT_MS";
pub const ENV_TICK_INTERVAL_MS: &str = "WINDOWFLOW_TICK_INTERVAL_MS";
pub const ENV_TIME_DOMAIN: &str = "WINDOWFLOW_TIME_DOMAIN";

/// Converts a [Duration] to milliseconds as used by the window arithmetic.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// The kind of window along with the parameters that only make sense for that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Fixed size, non-overlapping windows.
    Tumbling { size: Duration },
    /// Fixed size windows starting every `slide`.
    Sliding { size: Duration, slide: Duration },
    /// Per key windows closed by an inactivity gap larger than `timeout`.
    Session { timeout: Duration },
}

/// Tag identifying the window kind on emitted results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKindTag {
    Tumbling,
    Sliding,
    Session,
}

impl fmt::Display for WindowKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKindTag::Tumbling => write!(f, "tumbling"),
            WindowKindTag::Sliding => write!(f, "sliding"),
            WindowKindTag::Session => write!(f, "session"),
        }
    }
}

impl WindowKind {
    pub fn tag(&self) -> WindowKindTag {
        match self {
            WindowKind::Tumbling { .. } => WindowKindTag::Tumbling,
            WindowKind::Sliding { .. } => WindowKindTag::Sliding,
            WindowKind::Session { .. } => WindowKindTag::Session,
        }
    }
}

/// Validated window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    kind: WindowKind,
    /// Grace period after the window end before the window is fired. Only applies to Tumbling and
    /// Sliding windows.
    allowed_lateness: Duration,
}

impl WindowConfig {
    /// Creates and validates a new [WindowConfig].
    pub fn new(kind: WindowKind, allowed_lateness: Duration) -> Result<Self> {
        match kind {
            WindowKind::Tumbling { size } => {
                if size.is_zero() {
                    return Err(Error::Config(
                        "size_ms must be greater than 0 for tumbling window".to_string(),
                    ));
                }
            }
            WindowKind::Sliding { size, slide } => {
                if size.is_zero() {
                    return Err(Error::Config(
                        "size_ms must be greater than 0 for sliding window".to_string(),
                    ));
                }
                if slide.is_zero() {
                    return Err(Error::Config(
                        "slide_ms must be greater than 0 for sliding window".to_string(),
                    ));
                }
                if slide > size {
                    return Err(Error::Config(format!(
                        "slide_ms ({}) must not be greater than size_ms ({})",
                        slide.as_millis(),
                        size.as_millis()
                    )));
                }
            }
            WindowKind::Session { timeout } => {
                if timeout.is_zero() {
                    return Err(Error::Config(
                        "session_timeout_ms must be greater than 0 for session window".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            kind,
            allowed_lateness,
        })
    }

    pub fn tumbling(size: Duration) -> Result<Self> {
        Self::new(
            WindowKind::Tumbling { size },
            Duration::from_millis(DEFAULT_ALLOWED_LATENESS_MILLIS),
        )
    }

    /// Sliding window, `slide` defaults to `size` which degenerates to a tumbling window.
    pub fn sliding(size: Duration, slide: Option<Duration>) -> Result<Self> {
        Self::new(
            WindowKind::Sliding {
                size,
                slide: slide.unwrap_or(size),
            },
            Duration::from_millis(DEFAULT_ALLOWED_LATENESS_MILLIS),
        )
    }

    pub fn session(timeout: Duration) -> Result<Self> {
        Self::new(
            WindowKind::Session { timeout },
            Duration::from_millis(DEFAULT_ALLOWED_LATENESS_MILLIS),
        )
    }

    pub fn with_allowed_lateness(mut self, allowed_lateness: Duration) -> Self {
        self.allowed_lateness = allowed_lateness;
        self
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn allowed_lateness(&self) -> Duration {
        self.allowed_lateness
    }
}

/// The clock used by the trigger policy to decide whether a window is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeDomain {
    /// "now" is read from the configured [crate::clock::Clock].
    #[default]
    ProcessingTime,
    /// "now" is the maximum event time observed by the shard.
    EventTime,
}

impl FromStr for TimeDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "processing" | "processing_time" => Ok(TimeDomain::ProcessingTime),
            "event" | "event_time" => Ok(TimeDomain::EventTime),
            other => Err(Error::Config(format!("unknown time domain '{other}'"))),
        }
    }
}

/// Runtime tunables of the engine, independent of the window strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of shards, each owns a disjoint slice of the keys.
    pub num_shards: usize,
    /// Capacity of each shard's ingestion queue.
    pub ingest_queue_capacity: usize,
    /// Capacity of the output queue shared by all the shards.
    pub output_queue_capacity: usize,
    /// How long `ingest` waits for room in a full queue before giving up.
    pub ingest_timeout: Duration,
    /// Interval of the periodic trigger check.
    pub tick_interval: Duration,
    pub time_domain: TimeDomain,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            num_shards: DEFAULT_NUM_SHARDS,
            ingest_queue_capacity: DEFAULT_INGEST_QUEUE_CAPACITY,
            output_queue_capacity: DEFAULT_OUTPUT_QUEUE_CAPACITY,
            ingest_timeout: Duration::from_millis(DEFAULT_INGEST_TIMEOUT_MILLIS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MILLIS),
            time_domain: TimeDomain::default(),
        }
    }
}

impl EngineSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::Config("num_shards must be greater than 0".to_string()));
        }
        if self.ingest_queue_capacity == 0 || self.output_queue_capacity == 0 {
            return Err(Error::Config(
                "queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::Config(
                "tick_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub window: WindowConfig,
    pub engine: EngineSettings,
}

fn parse_env<T>(env_vars: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Debug,
{
    env_vars
        .get(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                Error::Config(format!("Parsing {name}(set to '{value}'): {e:?}"))
            })
        })
        .transpose()
}

fn parse_env_millis(env_vars: &HashMap<String, String>, name: &str) -> Result<Option<Duration>> {
    Ok(parse_env::<u64>(env_vars, name)?.map(Duration::from_millis))
}

/// This implementation is to load settings from env variables
impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let window_type = env_vars.get(ENV_WINDOW_TYPE).ok_or_else(|| {
            Error::Config(format!("Environment variable {ENV_WINDOW_TYPE} is not set"))
        })?;

        let size = parse_env_millis(&env_vars, ENV_SIZE_MS)?;
        let allowed_lateness = parse_env_millis(&env_vars, ENV_ALLOWED_LATENESS_MS)?
            .unwrap_or(Duration::from_millis(DEFAULT_ALLOWED_LATENESS_MILLIS));

        let kind = match window_type.trim().to_lowercase().as_str() {
            "tumbling" | "fixed" => WindowKind::Tumbling {
                size: size.ok_or_else(|| {
                    Error::Config(format!("{ENV_SIZE_MS} is required for tumbling window"))
                })?,
            },
            "sliding" => {
                let size = size.ok_or_else(|| {
                    Error::Config(format!("{ENV_SIZE_MS} is required for sliding window"))
                })?;
                WindowKind::Sliding {
                    size,
                    slide: parse_env_millis(&env_vars, ENV_SLIDE_MS)?.unwrap_or(size),
                }
            }
            "session" => WindowKind::Session {
                timeout: parse_env_millis(&env_vars, ENV_SESSION_TIMEOUT_MS)?.ok_or_else(
                    || {
                        Error::Config(format!(
                            "{ENV_SESSION_TIMEOUT_MS} is required for session window"
                        ))
                    },
                )?,
            },
            other => {
                return Err(Error::Config(format!(
                    "Unknown window type '{other}' set in {ENV_WINDOW_TYPE}"
                )));
            }
        };

        let window = WindowConfig::new(kind, allowed_lateness)?;

        let mut engine = EngineSettings::default();
        if let Some(num_shards) = parse_env(&env_vars, ENV_NUM_SHARDS)? {
            engine.num_shards = num_shards;
        }
        if let Some(capacity) = parse_env(&env_vars, ENV_INGEST_QUEUE_CAPACITY)? {
            engine.ingest_queue_capacity = capacity;
        }
        if let Some(capacity) = parse_env(&env_vars, ENV_OUTPUT_QUEUE_CAPACITY)? {
            engine.output_queue_capacity = capacity;
        }
        if let Some(timeout) = parse_env_millis(&env_vars, ENV_INGEST_TIMEOUT_MS)? {
            engine.ingest_timeout = timeout;
        }
        if let Some(interval) = parse_env_millis(&env_vars, ENV_TICK_INTERVAL_MS)? {
            engine.tick_interval = interval;
        }
        if let Some(time_domain) = env_vars.get(ENV_TIME_DOMAIN) {
            engine.time_domain = time_domain.parse()?;
        }
        engine.validate()?;

        Ok(Settings { window, engine })
    }
}
