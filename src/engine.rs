//! The playback state machine.
//!
//! A session runs `Idle -> Opening -> Playing -> Stopping -> Idle` on the
//! calling thread. Per chunk it decodes, writes the audio to the sink, replays
//! or computes the energy levels and only then updates the lights, so the
//! lights never run ahead of the audio handed to the sink. Other threads
//! interact through an [`EngineHandle`].

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::audio::{
    bands_for_config, open_source, AudioSource, FrequencyBand, OutputSink, SinkFactory, SpectralAnalyzer,
    SpectralCache, StreamFormat,
};
use crate::config::Config;
use crate::lights::{BrightnessController, Hardware, RollingStats};
use crate::playlist::PlaylistStore;
use crate::preshow::{Preshow, PreshowOutcome};
use crate::state::ControlState;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const IDLE_SONG_NAME: &str = "No song playing";

/// What observers see of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub name: String,
    pub path: String,
    /// Seconds into the song; -1 when idle.
    pub position: f64,
    /// Seconds; -1 when idle or unknown.
    pub duration: f64,
    pub playing: bool,
    pub stop_requested: bool,
}

impl PlaybackState {
    pub fn idle() -> Self {
        Self {
            name: IDLE_SONG_NAME.to_string(),
            path: String::new(),
            position: -1.0,
            duration: -1.0,
            playing: false,
            stop_requested: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.name == IDLE_SONG_NAME && self.path.is_empty() && !self.playing
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Why a song stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Finished,
    Stopped,
    /// A play-now request is pending; the next selection should honor it.
    PlayNow,
}

struct EngineShared {
    state: Mutex<PlaybackState>,
    stop_requested: AtomicBool,
    /// Inside the chunk loop.
    playing: AtomicBool,
    /// Inside `play` or `play_playlist`, including between songs.
    active: AtomicBool,
}

impl EngineShared {
    fn state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Raises a flag for as long as it lives, including on early returns.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable, thread-safe view of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Ask the engine to stop and block until it has. The request is sampled
    /// once per chunk, so this returns within about one chunk's worth of
    /// audio plus the poll interval.
    pub fn stop(&self) {
        info!("Stopping");
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        while self.shared.active.load(Ordering::SeqCst) || self.shared.playing.load(Ordering::SeqCst) {
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        *self.shared.state() = PlaybackState::idle();
        self.shared.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PlaybackState {
        let mut state = self.shared.state().clone();
        state.playing = self.shared.playing.load(Ordering::SeqCst);
        state.stop_requested = self.shared.stop_requested.load(Ordering::SeqCst);
        state
    }
}

pub struct PlaybackEngine<H: Hardware> {
    config: Arc<Config>,
    controller: BrightnessController<H>,
    analyzer: Box<dyn SpectralAnalyzer + Send>,
    sinks: Box<dyn SinkFactory + Send>,
    preshow: Box<dyn Preshow>,
    control: Arc<dyn ControlState>,
    bands: Vec<FrequencyBand>,
    shared: Arc<EngineShared>,
    rng: StdRng,
}

impl<H: Hardware> PlaybackEngine<H> {
    pub fn new(
        config: Arc<Config>,
        hardware: H,
        analyzer: Box<dyn SpectralAnalyzer + Send>,
        sinks: Box<dyn SinkFactory + Send>,
        preshow: Box<dyn Preshow>,
        control: Arc<dyn ControlState>,
    ) -> crate::error::Result<Self> {
        let bands = bands_for_config(&config.audio_processing, hardware.channel_count())?;
        info!(
            "Playback engine ready: {} channels, {} analysis, chunk size {}",
            bands.len(),
            analyzer.analyzer_type(),
            config.audio_processing.chunk_size
        );
        Ok(Self {
            config,
            controller: BrightnessController::new(hardware),
            analyzer,
            sinks,
            preshow,
            control,
            bands,
            shared: Arc::new(EngineShared {
                state: Mutex::new(PlaybackState::idle()),
                stop_requested: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                active: AtomicBool::new(false),
            }),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn hardware(&self) -> &H {
        self.controller.hardware()
    }

    /// Play a single file.
    pub fn play(&mut self, path: &Path) -> Result<PlayOutcome> {
        let shared = Arc::clone(&self.shared);
        let _active = FlagGuard::raise(&shared.active);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.play_song(path, &name, false)
    }

    /// Select and play songs from `playlist` until stopped.
    ///
    /// A song that cannot be played is logged and skipped. A playlist error
    /// ends the loop, as does a run of failures as long as the playlist.
    pub fn play_playlist(&mut self, playlist: &Path) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let _active = FlagGuard::raise(&shared.active);
        let store = PlaylistStore::new(playlist);
        let randomize = self.config.lightshow.randomize_playlist;
        let mut failures = 0;

        while !shared.stop_requested.load(Ordering::SeqCst) {
            let selection = store.select_next(self.control.as_ref(), randomize, &mut self.rng)?;
            let path = self.config.resolve_path(&selection.song.path);
            debug!("Selected song {} ({:?})", selection.index + 1, selection.reason);
            match self.play_song(&path, &selection.song.name, true) {
                Ok(PlayOutcome::Stopped) => break,
                Ok(_) => failures = 0,
                Err(e) => {
                    error!("Unable to play {:?}: {:#}", path, e);
                    failures += 1;
                    let songs = store.load()?.len();
                    if failures >= songs {
                        return Err(anyhow!("{} songs in a row failed to play from {:?}", failures, playlist));
                    }
                }
            }
        }
        Ok(())
    }

    /// Play one song. With `from_playlist` a play now request raised during
    /// the preshow hands control back to the playlist; otherwise the request
    /// is cleared and the song plays.
    fn play_song(&mut self, path: &Path, name: &str, from_playlist: bool) -> Result<PlayOutcome> {
        // Opening
        if self.control.play_now()? == 0 {
            if self.preshow.execute(self.control.as_ref())? == PreshowOutcome::PlayNowInterrupt {
                info!("Preshow interrupted by a play now request");
                if from_playlist {
                    return Ok(PlayOutcome::PlayNow);
                }
                self.control.set_play_now(0)?;
            }
        } else {
            self.control.set_play_now(0)?;
        }

        let mut source = open_source(path)?;
        let format = source.format();
        *self.shared.state() = PlaybackState {
            name: name.to_string(),
            path: path.display().to_string(),
            position: 0.0,
            duration: source.duration().unwrap_or(-1.0),
            playing: false,
            stop_requested: false,
        };
        let mut sink = self
            .sinks
            .open(format)
            .with_context(|| format!("Failed to open audio output for {:?}", path))?;

        let channel_count = self.controller.channel_count();
        let mut cache = if self.config.lightshow.read_cache {
            SpectralCache::open(path, channel_count)
        } else {
            SpectralCache::disabled(SpectralCache::cache_path(path), channel_count)
        };
        let priors = RollingStats::with_priors(
            channel_count,
            self.config.lightshow.prior_mean,
            self.config.lightshow.prior_std,
        );
        let stats = if cache.is_valid() {
            RollingStats::from_rows(cache.rows(), priors)
        } else {
            priors
        };
        debug!("std: {:?}, mean: {:?}", stats.std, stats.mean);

        info!("Playing: {} ({:?})", name, path);
        let streamed = self.stream(source.as_mut(), sink.as_mut(), &mut cache, &stats, format);

        // Stopping
        let drain = matches!(streamed, Ok(PlayOutcome::Finished));
        if let Err(e) = sink.close(drain) {
            warn!("Failed to release audio output: {:#}", e);
        }
        self.controller.all_off();
        *self.shared.state() = PlaybackState::idle();
        match streamed {
            Ok(outcome) => {
                cache.close()?;
                Ok(outcome)
            }
            Err(e) => {
                // Keep the rows analyzed before the failure
                if let Err(close_err) = cache.close() {
                    warn!("Failed to write sync cache for {:?}: {:#}", path, close_err);
                }
                Err(e)
            }
        }
    }

    fn stream(
        &mut self,
        source: &mut dyn AudioSource,
        sink: &mut dyn OutputSink,
        cache: &mut SpectralCache,
        stats: &RollingStats,
        format: StreamFormat,
    ) -> Result<PlayOutcome> {
        let shared = Arc::clone(&self.shared);
        let _playing = FlagGuard::raise(&shared.playing);
        let chunk_size = self.config.audio_processing.chunk_size;
        let mut row = 0;

        loop {
            let chunk = match source.read_chunk(chunk_size)? {
                Some(chunk) => chunk,
                None => return Ok(PlayOutcome::Finished),
            };
            sink.write(&chunk)?;

            let levels = match cache.next(row).map(|cached| cached.to_vec()) {
                Some(cached) => Some(cached),
                None => self.compute_levels(&chunk, chunk_size, format, cache, row),
            };
            match levels {
                Some(levels) if levels.iter().all(|v| v.is_finite()) => {
                    self.controller.update(&levels, stats);
                }
                Some(_) => debug!("Non-finite levels in chunk {}, holding lights", row),
                None => {}
            }
            row += 1;
            shared.state().position = source.position_seconds();

            if shared.stop_requested.load(Ordering::SeqCst) {
                return Ok(PlayOutcome::Stopped);
            }
            if self.control.play_now()? > 0 {
                info!("Play now request pending, ending current song");
                return Ok(PlayOutcome::PlayNow);
            }
        }
    }

    /// Analyze one chunk and record the result in the cache. A rejected
    /// chunk is stored as zeros so later rows stay aligned with the audio.
    fn compute_levels(
        &mut self,
        chunk: &[u8],
        chunk_size: usize,
        format: StreamFormat,
        cache: &mut SpectralCache,
        row: usize,
    ) -> Option<Vec<f32>> {
        match self
            .analyzer
            .analyze(chunk, chunk_size, format.sample_rate, &self.bands, format.channels)
        {
            Ok(levels) => {
                cache.append(&levels);
                Some(levels)
            }
            Err(e) => {
                warn!("Skipping chunk {}: {}", row, e);
                cache.append(&vec![0.0; self.bands.len()]);
                None
            }
        }
    }
}
