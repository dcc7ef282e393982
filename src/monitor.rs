//! Drives the lights from a live capture device instead of a file.
//!
//! There is no cache to derive statistics from, so the monitor keeps a window
//! of recent energy vectors and recomputes mean and standard deviation each
//! time the window fills. When most channels look like line noise the input
//! is treated as unplugged and every mean is pushed high so the lights rest
//! off.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::{bands_for_config, CaptureDevice, CaptureError, FrequencyBand, SpectralAnalyzer, StreamFormat};
use crate::config::{Config, MonitorConfig};
use crate::lights::{BrightnessController, Hardware, RollingStats};

pub struct AudioInputMonitor<H: Hardware> {
    settings: MonitorConfig,
    controller: BrightnessController<H>,
    analyzer: Box<dyn SpectralAnalyzer + Send>,
    bands: Vec<FrequencyBand>,
    chunk_size: usize,
    stats: RollingStats,
    recent: Vec<Vec<f32>>,
    disconnected: bool,
}

impl<H: Hardware> AudioInputMonitor<H> {
    pub fn new(config: &Config, hardware: H, analyzer: Box<dyn SpectralAnalyzer + Send>) -> crate::error::Result<Self> {
        let channel_count = hardware.channel_count();
        let bands = bands_for_config(&config.audio_processing, channel_count)?;
        let settings = config.monitor.clone();
        Ok(Self {
            stats: RollingStats::with_priors(channel_count, settings.prior_mean, settings.prior_std),
            recent: Vec::with_capacity(settings.window),
            settings,
            controller: BrightnessController::new(hardware),
            analyzer,
            bands,
            chunk_size: config.audio_processing.chunk_size,
            disconnected: false,
        })
    }

    pub fn stats(&self) -> &RollingStats {
        &self.stats
    }

    /// Whether the last statistics refresh judged the input unplugged.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn hardware(&self) -> &H {
        self.controller.hardware()
    }

    /// Analyze one captured chunk and update the lights. Returns the
    /// brightness per channel, or `None` when the chunk was discarded.
    pub fn process_chunk(&mut self, chunk: &[u8], format: StreamFormat) -> Option<Vec<f32>> {
        let levels = match self
            .analyzer
            .analyze(chunk, self.chunk_size, format.sample_rate, &self.bands, format.channels)
        {
            Ok(levels) => levels,
            Err(e) => {
                debug!("skipping update: {}", e);
                return None;
            }
        };
        if !levels.iter().all(|v| v.is_finite()) {
            debug!("Non-finite levels, skipping chunk");
            return None;
        }

        let brightness = self.controller.update(&levels, &self.stats);
        self.recent.push(levels);
        if self.recent.len() >= self.settings.window {
            self.refresh_stats();
        }
        Some(brightness)
    }

    fn refresh_stats(&mut self) {
        self.stats.refresh_from_rows(&self.recent);
        self.recent.clear();

        let channel_count = self.stats.channel_count();
        let quiet = self
            .stats
            .mean
            .iter()
            .filter(|&&mean| mean < self.settings.low_energy)
            .count();
        let disconnected = quiet as f32 > channel_count as f32 * self.settings.silent_fraction;
        if disconnected {
            debug!("no input detected, turning all lights off");
            self.stats.mean.fill(self.settings.disconnected_mean);
        } else {
            debug!("std: {:?}, mean: {:?}", self.stats.std, self.stats.mean);
        }
        if disconnected != self.disconnected {
            info!("Audio input {}", if disconnected { "lost" } else { "detected" });
        }
        self.disconnected = disconnected;
    }

    /// Read and process chunks until `stop` is raised or the device goes
    /// away. Read timeouts are skipped.
    pub fn run(&mut self, capture: &mut dyn CaptureDevice, stop: &AtomicBool) -> Result<()> {
        let format = capture.format();
        info!(
            "Running in audio-in mode: {} Hz, {} channels",
            format.sample_rate, format.channels
        );
        let result = loop {
            if stop.load(Ordering::SeqCst) {
                break Ok(());
            }
            match capture.read_chunk() {
                Ok(chunk) => {
                    self.process_chunk(&chunk, format);
                }
                Err(CaptureError::Timeout(waited)) => warn!("No audio input for {:?}", waited),
                Err(e @ CaptureError::Disconnected) => break Err(anyhow!(e)),
            }
        };
        self.controller.all_off();
        info!("Stopping audio-in mode");
        result
    }
}
