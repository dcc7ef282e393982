pub mod analysis_interface;
pub mod cache;
pub mod capture;
pub mod fft;
pub mod frequency;
pub mod output;
pub mod prescan;
pub mod source;

pub use analysis_interface::{AnalysisError, SpectralAnalyzer};
pub use cache::{sanitize_level, SpectralCache};
pub use capture::{CaptureDevice, CaptureError, CpalCapture};
pub use fft::FftLevelAnalyzer;
pub use frequency::{bands_for_config, calculate_channel_frequency, FrequencyBand};
pub use output::{
    ConfiguredSinks, DeviceSink, DiscardingSinks, FmTransmitterSink, NullSink, OutputSink, SinkFactory,
};
pub use prescan::{PrescanProcessor, PrescanSummary};
pub use source::{open_source, AudioSource, DecodedSource, StreamFormat, WavSource};
