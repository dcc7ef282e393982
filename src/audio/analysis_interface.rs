use thiserror::Error;

use super::FrequencyBand;

/// A chunk the analyzer could not make sense of. Always transient: the
/// caller drops the chunk and carries on with the next one.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Malformed audio chunk: {0}")]
    MalformedChunk(String),
    #[error("Chunk of {frames} frames exceeds analysis size {chunk_size}")]
    OversizedChunk { frames: usize, chunk_size: usize },
}

/// Turns one chunk of interleaved S16LE audio into an energy value per band.
///
/// Implementations may return non-finite values (for example the log of a
/// silent band); callers decide what to do with those.
///
/// # Example
/// ```rust,no_run
/// use lightshow::audio::{FftLevelAnalyzer, FrequencyBand, SpectralAnalyzer};
///
/// let mut analyzer = FftLevelAnalyzer::new();
/// let bands = [FrequencyBand::new(20.0, 200.0), FrequencyBand::new(200.0, 2000.0)];
/// let chunk = vec![0u8; 2048 * 4];
/// let levels = analyzer.analyze(&chunk, 2048, 44100, &bands, 2)?;
/// assert_eq!(levels.len(), 2);
/// # Ok::<(), lightshow::audio::AnalysisError>(())
/// ```
pub trait SpectralAnalyzer {
    fn analyze(
        &mut self,
        chunk: &[u8],
        chunk_size: usize,
        sample_rate: u32,
        bands: &[FrequencyBand],
        channels: u16,
    ) -> Result<Vec<f32>, AnalysisError>;

    /// Identification string for logging ("FFT", ...).
    fn analyzer_type(&self) -> &'static str;
}
