//! Lightshow configuration
//!
//! Built once at startup and shared read-only with every component.
//! Stored as JSON; every section falls back to defaults so a partial file
//! only needs the settings that differ.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::LightshowError;

/// Placeholder accepted in playlist and song paths.
pub const HOME_PLACEHOLDER: &str = "$SYNCHRONIZED_LIGHTS_HOME";
pub const HOME_ENV: &str = "SYNCHRONIZED_LIGHTS_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hardware: HardwareConfig,
    pub audio_processing: AudioProcessingConfig,
    pub lightshow: LightshowConfig,
    pub monitor: MonitorConfig,
    /// Installation directory substituted for `$SYNCHRONIZED_LIGHTS_HOME`
    #[serde(skip)]
    pub home_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub channel_count: usize,
    /// Zero-based channels with intensity (PWM) control; all others are on/off
    pub pwm_channels: Vec<usize>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            channel_count: 8,
            pwm_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProcessingConfig {
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// 1-based band index per physical channel
    pub custom_channel_mapping: Option<Vec<usize>>,
    /// Explicit band boundaries in Hz
    pub custom_channel_frequencies: Option<Vec<f32>>,
    /// Frames per chunk
    pub chunk_size: usize,
    pub fm: FmConfig,
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            min_frequency: 20.0,
            max_frequency: 15000.0,
            custom_channel_mapping: None,
            custom_channel_frequencies: None,
            chunk_size: 2048,
            fm: FmConfig::default(),
        }
    }
}

/// Pipe audio to a low-power FM transmitter instead of the local device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FmConfig {
    pub enabled: bool,
    /// Carrier frequency in MHz
    pub frequency: f32,
    pub stereo: bool,
    pub program: String,
}

impl Default for FmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 100.0,
            stereo: true,
            program: format!("{}/bin/pifm", HOME_PLACEHOLDER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Playlist,
    AudioIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightshowConfig {
    pub mode: Mode,
    pub playlist_path: String,
    pub randomize_playlist: bool,
    /// Replay cached levels when present; caches are regenerated either way
    pub read_cache: bool,
    /// Durable control state shared with other processes
    pub state_path: String,
    pub audio_in_sample_rate: u32,
    pub audio_in_channels: u16,
    pub audio_in_card: String,
    /// Stats used before a song has a cache
    pub prior_mean: f32,
    pub prior_std: f32,
}

impl Default for LightshowConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Playlist,
            playlist_path: "/home/pi/music/.playlist".to_string(),
            randomize_playlist: false,
            read_cache: true,
            state_path: format!("{}/config/state.json", HOME_PLACEHOLDER),
            audio_in_sample_rate: 44100,
            audio_in_channels: 2,
            audio_in_card: "default".to_string(),
            prior_mean: 12.0,
            prior_std: 1.5,
        }
    }
}

/// Live-input tuning. The thresholds are empirical and kept adjustable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples per rolling statistics refresh
    pub window: usize,
    /// A channel whose mean falls below this is considered silent
    pub low_energy: f32,
    /// More than this share of silent channels means no source is connected
    pub silent_fraction: f32,
    /// Mean forced onto every channel while disconnected
    pub disconnected_mean: f32,
    pub prior_mean: f32,
    pub prior_std: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 250,
            low_energy: 10.0,
            silent_fraction: 0.5,
            disconnected_mean: 20.0,
            prior_mean: 12.0,
            prior_std: 0.5,
        }
    }
}

impl Config {
    /// Load from a JSON file and pick up the home directory from the environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let mut config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.home_dir = std::env::var_os(HOME_ENV).map(PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the home directory from the environment.
    pub fn from_env() -> Self {
        Self {
            home_dir: std::env::var_os(HOME_ENV).map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), LightshowError> {
        let ap = &self.audio_processing;
        if self.hardware.channel_count == 0 {
            return Err(LightshowError::Config("channel_count must be at least 1".into()));
        }
        if let Some(&bad) = self
            .hardware
            .pwm_channels
            .iter()
            .find(|&&c| c >= self.hardware.channel_count)
        {
            return Err(LightshowError::Config(format!(
                "pwm channel {} is outside 0..{}",
                bad, self.hardware.channel_count
            )));
        }
        if !(ap.min_frequency > 0.0 && ap.max_frequency > ap.min_frequency) {
            return Err(LightshowError::Config(format!(
                "frequency range {}..{} is invalid",
                ap.min_frequency, ap.max_frequency
            )));
        }
        if ap.chunk_size == 0 {
            return Err(LightshowError::Config("chunk_size must be at least 1".into()));
        }
        if self.monitor.window == 0 {
            return Err(LightshowError::Config("monitor window must be at least 1".into()));
        }
        Ok(())
    }

    /// Expand `$SYNCHRONIZED_LIGHTS_HOME` in an operator-supplied path.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        match &self.home_dir {
            Some(home) if raw.contains(HOME_PLACEHOLDER) => {
                PathBuf::from(raw.replace(HOME_PLACEHOLDER, &home.to_string_lossy()))
            }
            _ => PathBuf::from(raw),
        }
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.resolve_path(&self.lightshow.playlist_path)
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve_path(&self.lightshow.state_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"hardware": {"channel_count": 4}, "lightshow": {"mode": "audio-in"}}"#)
                .unwrap();
        assert_eq!(config.hardware.channel_count, 4);
        assert_eq!(config.lightshow.mode, Mode::AudioIn);
        assert_eq!(config.audio_processing.chunk_size, 2048);
        assert_eq!(config.monitor.window, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_frequency_range() {
        let mut config = Config::default();
        config.audio_processing.min_frequency = 500.0;
        config.audio_processing.max_frequency = 100.0;
        assert!(matches!(config.validate(), Err(LightshowError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_pwm_channel_out_of_range() {
        let mut config = Config::default();
        config.hardware.pwm_channels = vec![8];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_path_expands_home() {
        let config = Config {
            home_dir: Some(PathBuf::from("/opt/lightshow")),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_path("$SYNCHRONIZED_LIGHTS_HOME/music/a.mp3"),
            PathBuf::from("/opt/lightshow/music/a.mp3")
        );
        assert_eq!(config.resolve_path("/tmp/b.wav"), PathBuf::from("/tmp/b.wav"));
    }
}
