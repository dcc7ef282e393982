use log::debug;
use serde::{Deserialize, Serialize};

use super::Hardware;

/// Floor applied to a channel's standard deviation before dividing by it.
const MIN_STD: f32 = 1e-6;

/// Per-channel mean and standard deviation of the energy levels.
///
/// Brightness is expressed relative to these, so every channel uses its
/// full range whatever the absolute loudness of its band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl RollingStats {
    /// Fixed starting guesses, used until real data is available.
    pub fn with_priors(channel_count: usize, mean: f32, std: f32) -> Self {
        Self {
            mean: vec![mean; channel_count],
            std: vec![std; channel_count],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.mean.len()
    }

    /// Recompute from `rows` (one energy vector each), per channel over the
    /// positive samples only: zero and below is silence. A channel without
    /// any positive sample keeps its current value.
    pub fn refresh_from_rows<R: AsRef<[f32]>>(&mut self, rows: &[R]) {
        for channel in 0..self.channel_count() {
            let samples: Vec<f32> = rows
                .iter()
                .filter_map(|row| row.as_ref().get(channel).copied())
                .filter(|&v| v > 0.0)
                .collect();
            if let Some((mean, std)) = mean_std(&samples) {
                self.mean[channel] = mean;
                self.std[channel] = std;
            }
        }
    }

    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R], priors: RollingStats) -> Self {
        let mut stats = priors;
        stats.refresh_from_rows(rows);
        stats
    }
}

/// Population mean and standard deviation.
fn mean_std(samples: &[f32]) -> Option<(f32, f32)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    Some((mean, variance.sqrt()))
}

/// Brightness for one channel: 0.0 at half a standard deviation below the
/// mean, 1.0 at three quarters of one above it, linear in between.
pub fn brightness(level: f32, mean: f32, std: f32) -> f32 {
    let std = std.max(MIN_STD);
    let value = (level - mean + 0.5 * std) / (1.25 * std);
    value.clamp(0.0, 1.0)
}

/// Drives the hardware from energy levels and the current statistics.
pub struct BrightnessController<H: Hardware> {
    hardware: H,
}

impl<H: Hardware> BrightnessController<H> {
    pub fn new(hardware: H) -> Self {
        Self { hardware }
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn channel_count(&self) -> usize {
        self.hardware.channel_count()
    }

    /// Apply one chunk's levels. On/off channels light above half
    /// brightness; intensity channels get the brightness as duty cycle.
    /// Returns the computed brightness per channel.
    pub fn update(&mut self, levels: &[f32], stats: &RollingStats) -> Vec<f32> {
        let count = self
            .hardware
            .channel_count()
            .min(levels.len())
            .min(stats.channel_count());
        let mut out = Vec::with_capacity(count);
        for channel in 0..count {
            let value = brightness(levels[channel], stats.mean[channel], stats.std[channel]);
            if self.hardware.is_intensity_capable(channel) {
                self.hardware.set_on(channel, Some(value));
            } else if value > 0.5 {
                self.hardware.set_on(channel, None);
            } else {
                self.hardware.set_off(channel);
            }
            out.push(value);
        }
        out
    }

    pub fn all_off(&mut self) {
        debug!("Turning all {} channels off", self.hardware.channel_count());
        for channel in 0..self.hardware.channel_count() {
            self.hardware.set_off(channel);
        }
    }
}
