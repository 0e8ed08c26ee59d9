use thiserror::Error;

/// Validation and contract errors exposed by `tickguard-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instrument id cannot be empty")]
    EmptyInstrument,
    #[error("instrument id length {len} exceeds max {max}")]
    InstrumentTooLong { len: usize, max: usize },
    #[error("instrument id contains invalid character '{ch}' at index {index}")]
    InstrumentInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Errors raised while loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config field '{field}' must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("config field '{field}' is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("config field '{field}' exceeds the maximum of {max_ms} ms")]
    DurationTooLong { field: &'static str, max_ms: u64 },
}

/// Failure reported by a processing task action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("processing action for '{instrument}' failed: {message}")]
    Action { instrument: String, message: String },

    #[error("processing action for '{instrument}' panicked: {message}")]
    Panicked { instrument: String, message: String },

    #[error("failed to start processing worker: {0}")]
    WorkerSpawn(String),
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
