//! Synchronizes a bank of light channels to the frequency content of music.
//!
//! Audio is read chunk by chunk, split into per-channel frequency bands and
//! turned into brightness relative to each channel's rolling statistics.
//! Levels computed for a song are cached next to it and replayed on later
//! plays.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod lights;
pub mod monitor;
pub mod persist;
pub mod playlist;
pub mod preshow;
pub mod state;

pub use config::Config;
pub use engine::{EngineHandle, PlayOutcome, PlaybackEngine, PlaybackState};
pub use error::{LightshowError, Result};
pub use monitor::AudioInputMonitor;
