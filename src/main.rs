use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lightshow::audio::{ConfiguredSinks, CpalCapture, FftLevelAnalyzer, StreamFormat};
use lightshow::config::Mode;
use lightshow::lights::SimulatedHardware;
use lightshow::preshow::NoPreshow;
use lightshow::state::FileControlState;
use lightshow::{AudioInputMonitor, Config, PlaybackEngine};

#[derive(Parser)]
#[command(name = "synchronized-lights")]
#[command(about = "Play music and flash lights in time with it")]
struct Args {
    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Playlist to play instead of the configured one
    #[arg(long, conflicts_with = "file")]
    playlist: Option<PathBuf>,

    /// Play a single audio file and exit
    #[arg(long)]
    file: Option<PathBuf>,

    /// Replay cached levels when available (overrides the config)
    #[arg(long)]
    readcache: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    if let Some(read_cache) = args.readcache {
        config.lightshow.read_cache = read_cache;
    }
    let config = Arc::new(config);

    let hardware = SimulatedHardware::new(config.hardware.channel_count, &config.hardware.pwm_channels);
    if config.lightshow.mode == Mode::AudioIn && args.file.is_none() {
        run_audio_in(config, hardware).await
    } else {
        run_playback(config, hardware, args).await
    }
}

async fn run_playback(config: Arc<Config>, hardware: SimulatedHardware, args: Args) -> Result<()> {
    let state_path = config.state_path();
    if let Some(parent) = state_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let control = Arc::new(FileControlState::new(state_path));
    let mut engine = PlaybackEngine::new(
        Arc::clone(&config),
        hardware,
        Box::new(FftLevelAnalyzer::new()),
        Box::new(ConfiguredSinks::new(Arc::clone(&config))),
        Box::new(NoPreshow),
        control,
    )?;
    let handle = engine.handle();

    let mut session = tokio::task::spawn_blocking(move || match args.file {
        Some(file) => engine.play(&file).map(|outcome| info!("Finished: {:?}", outcome)),
        None => {
            let playlist = args.playlist.unwrap_or_else(|| config.playlist_path());
            info!("Playing playlist {:?}", playlist);
            engine.play_playlist(&playlist)
        }
    });

    tokio::select! {
        result = &mut session => return finish(result.context("Playback task panicked")?),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    tokio::task::spawn_blocking(move || handle.stop()).await?;
    finish(session.await.context("Playback task panicked")?)
}

async fn run_audio_in(config: Arc<Config>, hardware: SimulatedHardware) -> Result<()> {
    let settings = &config.lightshow;
    let format = StreamFormat {
        sample_rate: settings.audio_in_sample_rate,
        channels: settings.audio_in_channels,
    };
    let mut capture = CpalCapture::open(&settings.audio_in_card, format, config.audio_processing.chunk_size)?;
    let mut monitor = AudioInputMonitor::new(&config, hardware, Box::new(FftLevelAnalyzer::new()))?;
    let stop = Arc::new(AtomicBool::new(false));

    println!("Running in audio-in mode, use Ctrl+C to stop");
    let stop_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_signal.store(true, Ordering::SeqCst);
        }
    });

    // cpal streams are not Send, so the capture loop stays on this thread
    tokio::task::block_in_place(|| monitor.run(&mut capture, &stop))
}

fn finish(result: Result<()>) -> Result<()> {
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
