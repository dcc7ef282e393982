use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::AudioProcessingConfig;
use crate::error::{LightshowError, Result};

/// Frequency interval in Hz whose energy drives one output channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub low: f32,
    pub high: f32,
}

impl FrequencyBand {
    pub fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

/// Split `min_frequency..max_frequency` into one band per output channel.
///
/// Bands grow geometrically so each channel covers the same number of
/// octaves. With a `custom_mapping` of length `channel_count` the bands are
/// computed for `max(custom_mapping)` logical channels and physical channel
/// `i` takes band `custom_mapping[i] - 1`. `custom_frequencies` replaces the
/// geometric boundaries when it provides enough of them.
pub fn calculate_channel_frequency(
    min_frequency: f32,
    max_frequency: f32,
    channel_count: usize,
    custom_mapping: Option<&[usize]>,
    custom_frequencies: Option<&[f32]>,
) -> Result<Vec<FrequencyBand>> {
    if channel_count == 0 {
        return Err(LightshowError::Config("channel count must be at least 1".into()));
    }
    if !(min_frequency > 0.0 && max_frequency > min_frequency) {
        return Err(LightshowError::Config(format!(
            "frequency range {}..{} is invalid",
            min_frequency, max_frequency
        )));
    }

    let mapping = custom_mapping.filter(|m| m.len() == channel_count);
    let channel_length = match mapping {
        Some(m) => {
            debug!("Custom channel mapping is being used: {:?}", m);
            if let Some(&bad) = m.iter().find(|&&index| index == 0) {
                return Err(LightshowError::Config(format!(
                    "custom channel mapping index {} is not 1-based",
                    bad
                )));
            }
            m.iter().copied().max().unwrap_or(channel_count)
        }
        None => channel_count,
    };

    debug!("Calculating frequencies for {} channels", channel_length);
    let octaves = (max_frequency / min_frequency).log2();
    let octaves_per_channel = octaves / channel_length as f32;
    debug!("Octaves in selected frequency range: {}", octaves);

    let limits: Vec<f32> = match custom_frequencies.filter(|f| f.len() > channel_length) {
        Some(frequencies) => {
            debug!("Custom channel frequencies are being used");
            frequencies.to_vec()
        }
        None => {
            let step = 10f32.powf(3.0 / (10.0 * (1.0 / octaves_per_channel)));
            let mut limits = Vec::with_capacity(channel_length + 1);
            limits.push(min_frequency);
            for _ in 0..channel_length {
                let last = limits[limits.len() - 1];
                limits.push(last * step);
            }
            limits
        }
    };

    let mut bands = Vec::with_capacity(channel_length);
    for (i, pair) in limits.windows(2).take(channel_length).enumerate() {
        let band = FrequencyBand::new(pair[0], pair[1]);
        if !(band.low > 0.0 && band.low < band.high) {
            return Err(LightshowError::Config(format!(
                "channel {} band {}..{} is not increasing",
                i, band.low, band.high
            )));
        }
        debug!("Channel {} is {:6.2} to {:6.2}", i, band.low, band.high);
        bands.push(band);
    }

    match mapping {
        Some(m) => Ok(m
            .iter()
            .map(|&index| {
                let band = bands[index - 1];
                debug!("Mapped channel {} will hold {:.2}..{:.2}", index - 1, band.low, band.high);
                band
            })
            .collect()),
        None => Ok(bands),
    }
}

/// Bands for the configured channel count and overrides.
pub fn bands_for_config(config: &AudioProcessingConfig, channel_count: usize) -> Result<Vec<FrequencyBand>> {
    calculate_channel_frequency(
        config.min_frequency,
        config.max_frequency,
        channel_count,
        config.custom_channel_mapping.as_deref(),
        config.custom_channel_frequencies.as_deref(),
    )
}
