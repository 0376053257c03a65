use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    /// Malformed event. Never surfaced to the caller, it is converted into a drop counter.
    #[error("Validation Error - {0}")]
    Validation(String),

    /// Event arrived after every window it belongs to has been closed. Never surfaced to the
    /// caller, it is converted into a drop counter.
    #[error("Late Event Error - event_time={event_time} key={key}")]
    LateEvent { event_time: i64, key: String },

    #[error("Queue Full Error - {0}")]
    QueueFull(String),

    #[error("Processor is stopped, not accepting events")]
    Stopped,

    #[error("Shard Error - {0}")]
    Shard(String),
}
