use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop the lightshow as a whole (bad configuration, a broken
/// playlist) or that a caller must decide how to handle.
#[derive(Debug, Error)]
pub enum LightshowError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid playlist {path:?} at line {line}: {reason}")]
    Playlist {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("Playlist {0:?} contains no songs")]
    EmptyPlaylist(PathBuf),
    #[error("Unsupported audio source {path:?}: {reason}")]
    UnsupportedSource { path: PathBuf, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = LightshowError> = std::result::Result<T, E>;
