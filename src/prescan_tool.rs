use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use lightshow::audio::{bands_for_config, FftLevelAnalyzer, PrescanProcessor, SpectralCache};
use lightshow::playlist::PlaylistStore;
use lightshow::Config;

#[derive(Parser)]
#[command(name = "prescan-tool")]
#[command(about = "Pre-generate cached light levels so songs start replaying on first play")]
struct Args {
    /// Audio files to pre-scan (MP3, WAV, M4A, OGG, etc.)
    #[arg()]
    input_files: Vec<PathBuf>,

    /// Pre-scan every song of this playlist as well
    #[arg(short, long)]
    playlist: Option<PathBuf>,

    /// JSON configuration file; must match the one used for playback
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip songs that already have a cache for the configured channel count
    #[arg(long)]
    skip_existing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    let channel_count = config.hardware.channel_count;
    let bands = bands_for_config(&config.audio_processing, channel_count)?;

    let mut files = args.input_files.clone();
    if let Some(playlist) = &args.playlist {
        let songs = PlaylistStore::new(playlist).load()?.songs;
        info!("Playlist {:?}: {} songs", playlist, songs.len());
        files.extend(songs.iter().map(|song| config.resolve_path(&song.path)));
    }
    if files.is_empty() {
        bail!("Nothing to pre-scan: pass audio files and/or --playlist");
    }

    let mut processor = PrescanProcessor::new(
        Box::new(FftLevelAnalyzer::new()),
        bands,
        config.audio_processing.chunk_size,
    );

    let mut failed = 0;
    for file in &files {
        if args.skip_existing && SpectralCache::open(file, channel_count).is_valid() {
            info!("Keeping existing cache for {:?}", file);
            continue;
        }
        match processor.prescan_file(file) {
            Ok(summary) => info!(
                "{:?}: {} chunks cached in {:?}",
                file,
                summary.rows,
                SpectralCache::cache_path(file)
            ),
            Err(e) => {
                error!("Failed to pre-scan {:?}: {:#}", file, e);
                failed += 1;
            }
        }
    }

    info!("Pre-scan complete: {} of {} files cached", files.len() - failed, files.len());
    if failed > 0 {
        bail!("{} files could not be pre-scanned", failed);
    }
    Ok(())
}
