use anyhow::Result;
use log::{info, warn};
use std::path::Path;

use super::{open_source, FrequencyBand, SpectralAnalyzer, SpectralCache};

/// What one prescan produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrescanSummary {
    pub rows: usize,
    /// Chunks the analyzer rejected; stored as zero rows.
    pub failed_chunks: usize,
}

/// Generates `.sync` caches ahead of time, without playing anything.
pub struct PrescanProcessor {
    analyzer: Box<dyn SpectralAnalyzer + Send>,
    bands: Vec<FrequencyBand>,
    chunk_size: usize,
}

impl PrescanProcessor {
    pub fn new(analyzer: Box<dyn SpectralAnalyzer + Send>, bands: Vec<FrequencyBand>, chunk_size: usize) -> Self {
        Self {
            analyzer,
            bands,
            chunk_size,
        }
    }

    /// Analyze `path` chunk by chunk and write its cache, replacing any
    /// existing one.
    pub fn prescan_file(&mut self, path: &Path) -> Result<PrescanSummary> {
        info!("Pre-scanning audio file: {:?}", path);
        let mut source = open_source(path)?;
        let format = source.format();
        let channel_count = self.bands.len();
        let mut cache = SpectralCache::disabled(SpectralCache::cache_path(path), channel_count);
        let mut failed_chunks = 0;

        while let Some(chunk) = source.read_chunk(self.chunk_size)? {
            match self
                .analyzer
                .analyze(&chunk, self.chunk_size, format.sample_rate, &self.bands, format.channels)
            {
                Ok(levels) => cache.append(&levels),
                Err(e) => {
                    warn!("Chunk {} of {:?} not analyzed: {}", cache.rows().len(), path, e);
                    failed_chunks += 1;
                    cache.append(&vec![0.0; channel_count]);
                }
            }
            if cache.rows().len() % 1000 == 0 {
                info!("Pre-scanned {} chunks ({:.1}s)", cache.rows().len(), source.position_seconds());
            }
        }

        let rows = cache.rows().len();
        cache.close()?;
        info!("Pre-scan complete: {} chunks, {} failed", rows, failed_chunks);
        Ok(PrescanSummary { rows, failed_chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::tests::write_tone;
    use crate::audio::FftLevelAnalyzer;

    #[test]
    fn test_prescan_writes_replayable_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(&dir.path().join("song.wav"), 2500, 1, 8000);
        let bands = vec![FrequencyBand::new(100.0, 1000.0), FrequencyBand::new(1000.0, 3000.0)];

        let mut prescan = PrescanProcessor::new(Box::new(FftLevelAnalyzer::new()), bands, 1024);
        let summary = prescan.prescan_file(&path).unwrap();
        assert_eq!(summary, PrescanSummary { rows: 3, failed_chunks: 0 });

        let mut cache = SpectralCache::open(&path, 2);
        assert!(cache.is_valid());
        assert_eq!(cache.rows().len(), 3);
        assert!(cache.next(0).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_prescan_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut prescan = PrescanProcessor::new(
            Box::new(FftLevelAnalyzer::new()),
            vec![FrequencyBand::new(100.0, 1000.0)],
            1024,
        );
        assert!(prescan.prescan_file(&dir.path().join("missing.wav")).is_err());
        assert!(!SpectralCache::cache_path(&dir.path().join("missing.wav")).exists());
    }
}
