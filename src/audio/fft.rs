use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::{AnalysisError, FrequencyBand, SpectralAnalyzer};

/// Band power analyzer: Hann window, forward FFT, then `log10` of the summed
/// power of the bins falling inside each band.
///
/// Samples keep their raw 16-bit scale, which puts typical music levels
/// around 10-15 for a 2048 frame chunk.
pub struct FftLevelAnalyzer {
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>, Vec<f32>)>,
}

impl FftLevelAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
        }
    }

    fn hann_window(size: usize) -> Vec<f32> {
        if size < 2 {
            return vec![1.0; size];
        }
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    fn plan_for(&mut self, chunk_size: usize) -> (Arc<dyn Fft<f32>>, &[f32]) {
        if !matches!(&self.plan, Some((size, _, _)) if *size == chunk_size) {
            self.plan = None;
        }
        let planner = &mut self.planner;
        let (_, fft, window) = self.plan.get_or_insert_with(|| {
            (chunk_size, planner.plan_fft_forward(chunk_size), Self::hann_window(chunk_size))
        });
        (Arc::clone(fft), window.as_slice())
    }

    /// Interleaved S16LE to mono by averaging each frame's channels.
    fn mono_samples(chunk: &[u8], channels: u16) -> Result<Vec<f32>, AnalysisError> {
        let channels = channels as usize;
        if channels == 0 {
            return Err(AnalysisError::MalformedChunk("zero input channels".into()));
        }
        let frame_bytes = 2 * channels;
        if chunk.is_empty() || chunk.len() % frame_bytes != 0 {
            return Err(AnalysisError::MalformedChunk(format!(
                "{} bytes is not a whole number of {} byte frames",
                chunk.len(),
                frame_bytes
            )));
        }
        Ok(chunk
            .chunks_exact(frame_bytes)
            .map(|frame| {
                let sum: f32 = frame
                    .chunks_exact(2)
                    .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32)
                    .sum();
                sum / channels as f32
            })
            .collect())
    }

    /// Bin index of `frequency` for a `chunk_size` point transform.
    fn bin_index(frequency: f32, chunk_size: usize, sample_rate: u32) -> usize {
        (chunk_size as f32 * frequency / sample_rate as f32) as usize
    }
}

impl Default for FftLevelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralAnalyzer for FftLevelAnalyzer {
    fn analyze(
        &mut self,
        chunk: &[u8],
        chunk_size: usize,
        sample_rate: u32,
        bands: &[FrequencyBand],
        channels: u16,
    ) -> Result<Vec<f32>, AnalysisError> {
        if sample_rate == 0 || chunk_size == 0 {
            return Err(AnalysisError::MalformedChunk("zero sample rate or chunk size".into()));
        }
        let samples = Self::mono_samples(chunk, channels)?;
        if samples.len() > chunk_size {
            return Err(AnalysisError::OversizedChunk {
                frames: samples.len(),
                chunk_size,
            });
        }

        let (fft, full_window) = self.plan_for(chunk_size);
        // Short final chunks get a window of their own length, then zero padding
        let short_window;
        let window = if samples.len() == chunk_size {
            full_window
        } else {
            short_window = Self::hann_window(samples.len());
            short_window.as_slice()
        };
        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        buffer.resize(chunk_size, Complex::new(0.0, 0.0));
        fft.process(&mut buffer);

        let half = chunk_size / 2;
        let power: Vec<f32> = buffer[..half].iter().map(|c| c.norm_sqr()).collect();

        Ok(bands
            .iter()
            .map(|band| {
                // Every band covers at least one bin, however narrow it is
                let low = Self::bin_index(band.low, chunk_size, sample_rate).min(half.saturating_sub(1));
                let high = Self::bin_index(band.high, chunk_size, sample_rate).max(low + 1).min(half);
                let total: f32 = power[low..high].iter().sum();
                total.log10()
            })
            .collect())
    }

    fn analyzer_type(&self) -> &'static str {
        "FFT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_chunk(frequency: f32, sample_rate: u32, frames: usize, channels: u16) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(frames * channels as usize * 2);
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = ((2.0 * std::f32::consts::PI * frequency * t).sin() * 12000.0) as i16;
            for _ in 0..channels {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn test_energy_lands_in_matching_band() {
        let bands = [
            FrequencyBand::new(50.0, 200.0),
            FrequencyBand::new(200.0, 2000.0),
            FrequencyBand::new(2000.0, 8000.0),
        ];
        let chunk = sine_chunk(1000.0, 44100, 2048, 2);
        let mut analyzer = FftLevelAnalyzer::new();
        let levels = analyzer.analyze(&chunk, 2048, 44100, &bands, 2).unwrap();
        assert_eq!(levels.len(), 3);
        assert!(levels[1] > levels[0] + 2.0, "levels {:?}", levels);
        assert!(levels[1] > levels[2] + 2.0, "levels {:?}", levels);
    }

    #[test]
    fn test_silence_is_not_finite() {
        let bands = [FrequencyBand::new(100.0, 1000.0)];
        let chunk = vec![0u8; 1024 * 2];
        let mut analyzer = FftLevelAnalyzer::new();
        let levels = analyzer.analyze(&chunk, 1024, 44100, &bands, 1).unwrap();
        assert!(!levels[0].is_finite());
    }

    #[test]
    fn test_short_final_chunk_is_padded() {
        let bands = [FrequencyBand::new(200.0, 2000.0)];
        let chunk = sine_chunk(1000.0, 44100, 700, 1);
        let mut analyzer = FftLevelAnalyzer::new();
        let levels = analyzer.analyze(&chunk, 2048, 44100, &bands, 1).unwrap();
        assert!(levels[0].is_finite());
    }

    #[test]
    fn test_narrow_low_bands_stay_finite() {
        use crate::audio::calculate_channel_frequency;

        let bands = calculate_channel_frequency(20.0, 15000.0, 24, None, None).unwrap();
        // Deterministic broadband noise so every bin carries some power
        let mut seed: u32 = 0x2545_f491;
        let chunk: Vec<u8> = (0..2048)
            .flat_map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let value = ((seed >> 16) as i16 / 2).to_le_bytes();
                [value[0], value[1], value[0], value[1]]
            })
            .collect();
        let mut analyzer = FftLevelAnalyzer::new();
        let levels = analyzer.analyze(&chunk, 2048, 44100, &bands, 2).unwrap();
        assert_eq!(levels.len(), 24);
        assert!(levels.iter().all(|l| l.is_finite()), "levels {:?}", levels);
    }

    #[test]
    fn test_malformed_chunks_are_rejected() {
        let bands = [FrequencyBand::new(200.0, 2000.0)];
        let mut analyzer = FftLevelAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(&[0u8; 3], 1024, 44100, &bands, 1),
            Err(AnalysisError::MalformedChunk(_))
        ));
        assert!(matches!(
            analyzer.analyze(&[0u8; 4096], 512, 44100, &bands, 1),
            Err(AnalysisError::OversizedChunk { .. })
        ));
    }
}
