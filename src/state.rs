//! Control state shared between the engine and outside actors (web front
//! end, SMS handler, operators editing the file by hand).
//!
//! `play_now` may be set by anyone and is cleared only by the engine;
//! `song_to_play` and `current_song` are written by the engine. Writes are
//! last-writer-wins.

use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::Result;
use crate::persist::{write_atomic, FileLock};

pub trait ControlState: Send + Sync {
    /// 1-based playlist index requested for immediate play, 0 for none.
    fn play_now(&self) -> Result<u32>;
    fn set_play_now(&self, value: u32) -> Result<()>;

    /// Sequential playlist cursor (0-based).
    fn song_to_play(&self) -> Result<usize>;
    fn set_song_to_play(&self, value: usize) -> Result<()>;

    /// Index of the song being played.
    fn current_song(&self) -> Result<usize>;
    fn set_current_song(&self, value: usize) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlValues {
    #[serde(deserialize_with = "lenient_play_now")]
    pub play_now: u32,
    pub song_to_play: usize,
    pub current_song: usize,
}

/// Accept whatever other writers leave in `play_now`: integers and numeric
/// strings are taken as is, anything negative or unparseable means none.
fn lenient_play_now<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        serde_json::Value::Null => Some(0),
        _ => None,
    };
    match parsed.and_then(|n| u32::try_from(n).ok()) {
        Some(index) => Ok(index),
        None => {
            warn!("Ignoring play_now value {}", value);
            Ok(0)
        }
    }
}

/// Durable control state kept as a small JSON document.
pub struct FileControlState {
    path: PathBuf,
}

impl FileControlState {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current values; a missing file reads as all zeros.
    pub fn read(&self) -> Result<ControlValues> {
        let _lock = FileLock::shared(&self.path)?;
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> Result<ControlValues> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(ControlValues::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ControlValues::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update<F: FnOnce(&mut ControlValues)>(&self, f: F) -> Result<()> {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut values = self.read_unlocked()?;
        f(&mut values);
        let json = serde_json::to_vec_pretty(&values)?;
        write_atomic(&self.path, &json)?;
        debug!("Control state {:?} now {:?}", self.path, values);
        Ok(())
    }
}

impl ControlState for FileControlState {
    fn play_now(&self) -> Result<u32> {
        Ok(self.read()?.play_now)
    }

    fn set_play_now(&self, value: u32) -> Result<()> {
        self.update(|v| v.play_now = value)
    }

    fn song_to_play(&self) -> Result<usize> {
        Ok(self.read()?.song_to_play)
    }

    fn set_song_to_play(&self, value: usize) -> Result<()> {
        self.update(|v| v.song_to_play = value)
    }

    fn current_song(&self) -> Result<usize> {
        Ok(self.read()?.current_song)
    }

    fn set_current_song(&self, value: usize) -> Result<()> {
        self.update(|v| v.current_song = value)
    }
}

/// In-process control state for a single-process deployment and tests.
#[derive(Debug, Default)]
pub struct MemoryControlState {
    play_now: AtomicU32,
    song_to_play: AtomicUsize,
    current_song: AtomicUsize,
}

impl MemoryControlState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlState for MemoryControlState {
    fn play_now(&self) -> Result<u32> {
        Ok(self.play_now.load(Ordering::SeqCst))
    }

    fn set_play_now(&self, value: u32) -> Result<()> {
        self.play_now.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn song_to_play(&self) -> Result<usize> {
        Ok(self.song_to_play.load(Ordering::SeqCst))
    }

    fn set_song_to_play(&self, value: usize) -> Result<()> {
        self.song_to_play.store(value, Ordering::SeqCst);
        Ok(())
    }

    fn current_song(&self) -> Result<usize> {
        Ok(self.current_song.load(Ordering::SeqCst))
    }

    fn set_current_song(&self, value: usize) -> Result<()> {
        self.current_song.store(value, Ordering::SeqCst);
        Ok(())
    }
}
