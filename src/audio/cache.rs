use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::persist::write_atomic;

/// Per-chunk energy levels previously computed for one audio source.
///
/// The cache lives next to the source as `.<file name>.sync`: comma
/// separated text, one row per chunk, one column per output channel.
/// A cache is only replayed when every row has exactly the expected number
/// of columns; anything else is treated as missing and regenerated.
pub struct SpectralCache {
    path: PathBuf,
    channel_count: usize,
    rows: Vec<Vec<f32>>,
    valid: bool,
}

/// Map non-finite levels to 0.0. Applied on every read and write so a
/// silent chunk (log of zero power) never reaches the statistics as -inf.
pub fn sanitize_level(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl SpectralCache {
    /// Location of the cache belonging to `source`.
    pub fn cache_path(source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        source.with_file_name(format!(".{}.sync", name))
    }

    /// Open the cache for `source`. A missing or mismatched cache is not an
    /// error; it yields an empty, invalid cache that will be rebuilt.
    pub fn open(source: &Path, channel_count: usize) -> Self {
        Self::open_at(Self::cache_path(source), channel_count)
    }

    pub fn open_at(path: PathBuf, channel_count: usize) -> Self {
        let mut cache = Self::disabled(path, channel_count);
        match Self::read_rows(&cache.path) {
            Ok(rows) if rows.is_empty() => {
                warn!("Cached sync data {:?} is empty, one will be generated", cache.path);
            }
            Ok(rows) if rows.iter().all(|r| r.len() == channel_count) => {
                info!("Found valid cached levels in {:?} ({} rows)", cache.path, rows.len());
                cache.rows = rows;
                cache.valid = true;
            }
            Ok(_) => {
                warn!(
                    "Cached sync data {:?} doesn't match {} channels, regenerating",
                    cache.path, channel_count
                );
            }
            Err(e) => {
                warn!("Cached sync data {:?} not found or unreadable ({}), one will be generated", cache.path, e);
            }
        }
        cache
    }

    /// A cache that never replays but is still written at `close`.
    pub fn disabled(path: PathBuf, channel_count: usize) -> Self {
        Self {
            path,
            channel_count,
            rows: Vec::new(),
            valid: false,
        }
    }

    fn read_rows(path: &Path) -> Result<Vec<Vec<f32>>> {
        let text = std::fs::read_to_string(path)?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                line.split(',')
                    .map(|field| {
                        field
                            .trim()
                            .parse::<f32>()
                            .map(sanitize_level)
                            .with_context(|| format!("row {}: bad value {:?}", i, field))
                    })
                    .collect()
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Rows held for this session: the replayable matrix while valid, or
    /// everything accumulated so far.
    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// Replay row `row`. Running past the end demotes the cache so the rest
    /// of the session is analyzed and the file rewritten at close.
    pub fn next(&mut self, row: usize) -> Option<&[f32]> {
        if !self.valid {
            return None;
        }
        if row < self.rows.len() {
            return Some(&self.rows[row]);
        }
        warn!("Ran out of cached levels at row {}, will update the cache", row);
        self.valid = false;
        None
    }

    /// Record a computed row.
    pub fn append(&mut self, levels: &[f32]) {
        debug_assert_eq!(levels.len(), self.channel_count);
        self.rows.push(levels.iter().copied().map(sanitize_level).collect());
    }

    /// Persist the accumulated rows unless the session replayed a valid
    /// cache throughout. Returns whether the file was written.
    pub fn close(self) -> Result<bool> {
        if self.valid {
            debug!("Cache {:?} was valid, leaving it untouched", self.path);
            return Ok(false);
        }
        let mut text = String::new();
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| sanitize_level(*v).to_string()).collect();
            text.push_str(&line.join(","));
            text.push('\n');
        }
        write_atomic(&self.path, text.as_bytes())
            .with_context(|| format!("Failed to write cache {:?}", self.path))?;
        info!("Cached sync data written to {:?} [{} rows]", self.path, self.rows.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_matrix(path: &Path, rows: &[Vec<f32>]) {
        let mut cache = SpectralCache::disabled(path.to_path_buf(), rows[0].len());
        for row in rows {
            cache.append(row);
        }
        assert!(cache.close().unwrap());
    }

    #[test]
    fn test_cache_path_is_hidden_sibling() {
        assert_eq!(
            SpectralCache::cache_path(Path::new("/music/song.mp3")),
            PathBuf::from("/music/.song.mp3.sync")
        );
    }

    #[test]
    fn test_round_trip_replays_all_rows_then_misses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        let rows = vec![vec![1.5, 2.25, 3.0], vec![4.0, 5.125, 6.0]];
        write_matrix(&SpectralCache::cache_path(&source), &rows);

        let mut cache = SpectralCache::open(&source, 3);
        assert!(cache.is_valid());
        assert_eq!(cache.next(0), Some(&rows[0][..]));
        assert_eq!(cache.next(1), Some(&rows[1][..]));
        assert_eq!(cache.next(2), None);
        assert!(!cache.is_valid());
        assert_eq!(cache.next(0), None);
    }

    #[test]
    fn test_column_mismatch_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        write_matrix(&SpectralCache::cache_path(&source), &[vec![1.0, 2.0, 3.0]]);

        let cache = SpectralCache::open(&source, 4);
        assert!(!cache.is_valid());
        assert!(cache.rows().is_empty());
    }

    #[test]
    fn test_missing_and_garbled_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        assert!(!SpectralCache::open(&source, 2).is_valid());

        std::fs::write(SpectralCache::cache_path(&source), "1.0,abc\n").unwrap();
        assert!(!SpectralCache::open(&source, 2).is_valid());
    }

    #[test]
    fn test_non_finite_values_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        std::fs::write(SpectralCache::cache_path(&source), "inf,-inf\nNaN,2.5\n").unwrap();

        let cache = SpectralCache::open(&source, 2);
        assert!(cache.is_valid());
        assert_eq!(cache.rows().to_vec(), vec![vec![0.0f32, 0.0], vec![0.0, 2.5]]);

        let mut fresh = SpectralCache::disabled(dir.path().join("out.sync"), 2);
        fresh.append(&[f32::NEG_INFINITY, 1.0]);
        fresh.close().unwrap();
        let text = std::fs::read_to_string(dir.path().join("out.sync")).unwrap();
        assert_eq!(text, "0,1\n");
    }

    #[test]
    fn test_exhausted_cache_rewrites_mixed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        write_matrix(&SpectralCache::cache_path(&source), &[vec![1.0, 1.0]]);

        let mut cache = SpectralCache::open(&source, 2);
        assert!(cache.next(0).is_some());
        assert!(cache.next(1).is_none());
        cache.append(&[2.0, 2.0]);
        assert!(cache.close().unwrap());

        let reopened = SpectralCache::open(&source, 2);
        assert_eq!(reopened.rows().to_vec(), vec![vec![1.0f32, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_valid_cache_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.wav");
        write_matrix(&SpectralCache::cache_path(&source), &[vec![1.0], vec![2.0]]);

        let mut cache = SpectralCache::open(&source, 1);
        cache.next(0);
        assert!(!cache.close().unwrap());
    }
}
