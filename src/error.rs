//! Error types for the kiosk concierge

use thiserror::Error;

/// Result type alias for concierge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the kiosk concierge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera or microphone denied or missing
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// Face-analysis model failed to load or answer
    #[error("face model failure: {0}")]
    ModelLoad(String),

    /// Speech recognition engine error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Recognizer handle exists but cannot start yet
    #[error("speech recognizer not ready")]
    RecognizerNotReady,

    /// Remote response service failure
    #[error("remote call failed: {0}")]
    RemoteCall(String),

    /// Audio failed to start or play
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Image decode/encode error
    #[error("image error: {0}")]
    Image(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Failure classes that decide how the orchestrator degrades
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Camera/mic denied or missing: degrade the feature, continue
    SensorUnavailable,
    /// Face model failed: disable face features only
    ModelLoadFailure,
    /// Speech engine error: stop listening, schedule retry
    RecognitionError,
    /// Network/service error: fallback utterance
    RemoteCallFailure,
    /// Audio failed: treat as immediate completion
    PlaybackError,
    /// Anything else (config, storage, codec)
    Internal,
}

impl Error {
    /// Classify this error into the degradation taxonomy
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SensorUnavailable(_) => ErrorKind::SensorUnavailable,
            Self::ModelLoad(_) => ErrorKind::ModelLoadFailure,
            Self::Recognition(_) | Self::RecognizerNotReady => ErrorKind::RecognitionError,
            Self::RemoteCall(_) | Self::Http(_) => ErrorKind::RemoteCallFailure,
            Self::Playback(_) | Self::Audio(_) => ErrorKind::PlaybackError,
            Self::Config(_)
            | Self::Image(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Toml(_)
            | Self::Sqlite(_) => ErrorKind::Internal,
        }
    }
}
