use anyhow::Result;
use log::{info, warn};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::LightshowError;

/// Sample rate and channel layout of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A decoded song delivered as interleaved S16LE chunks.
pub trait AudioSource {
    fn format(&self) -> StreamFormat;

    /// Total length in seconds, when the container says.
    fn duration(&self) -> Option<f64>;

    /// Frames handed out so far.
    fn position_frames(&self) -> u64;

    /// Next chunk of up to `frames` frames; `None` at end of stream.
    fn read_chunk(&mut self, frames: usize) -> Result<Option<Vec<u8>>>;

    fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.format().sample_rate.max(1) as f64
    }
}

/// Open `path` with the WAV reader for `.wav` files and the general decoder
/// for everything else.
pub fn open_source(path: &Path) -> Result<Box<dyn AudioSource>> {
    let is_wav = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    let source: Box<dyn AudioSource> = if is_wav {
        Box::new(WavSource::open(path)?)
    } else {
        Box::new(DecodedSource::open(path)?)
    };
    let format = source.format();
    info!(
        "Opened {:?}: {} Hz, {} channels, {:?} s",
        path,
        format.sample_rate,
        format.channels,
        source.duration()
    );
    Ok(source)
}

fn unsupported(path: &Path, reason: impl ToString) -> LightshowError {
    LightshowError::UnsupportedSource {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// 16-bit integer PCM WAV files.
pub struct WavSource {
    reader: hound::WavReader<BufReader<File>>,
    format: StreamFormat,
    position: u64,
    truncated: bool,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| unsupported(path, e))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(unsupported(
                path,
                format!("{:?} {}-bit samples, expected 16-bit integer", spec.sample_format, spec.bits_per_sample),
            )
            .into());
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(unsupported(path, "empty stream format").into());
        }
        Ok(Self {
            format: StreamFormat {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
            },
            reader,
            position: 0,
            truncated: false,
        })
    }
}

impl AudioSource for WavSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn duration(&self) -> Option<f64> {
        Some(self.reader.duration() as f64 / self.format.sample_rate as f64)
    }

    fn position_frames(&self) -> u64 {
        self.position
    }

    fn read_chunk(&mut self, frames: usize) -> Result<Option<Vec<u8>>> {
        if self.truncated {
            return Ok(None);
        }
        let wanted = frames * self.format.channels as usize;
        let mut samples = Vec::with_capacity(wanted);
        for sample in self.reader.samples::<i16>().take(wanted) {
            match sample {
                Ok(value) => samples.push(value),
                // The header promised more data than the file holds
                Err(hound::Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!("WAV data ends early after {} frames", self.position);
                    self.truncated = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Drop a trailing partial frame from a truncated file
        let whole = samples.len() - samples.len() % self.format.channels as usize;
        if whole == 0 {
            return Ok(None);
        }
        self.position += (whole / self.format.channels as usize) as u64;
        Ok(Some(samples_to_bytes(&samples[..whole])))
    }
}

/// Any format the rodio decoder understands (MP3, OGG, FLAC, AAC/M4A...).
pub struct DecodedSource {
    decoder: Decoder<BufReader<File>>,
    format: StreamFormat,
    duration: Option<f64>,
    position: u64,
}

impl DecodedSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let decoder = Decoder::new(file).map_err(|e| unsupported(path, e))?;
        let format = StreamFormat {
            sample_rate: decoder.sample_rate(),
            channels: decoder.channels(),
        };
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(unsupported(path, "empty stream format").into());
        }
        let duration = decoder.total_duration().map(|d| d.as_secs_f64());
        Ok(Self {
            decoder,
            format,
            duration,
            position: 0,
        })
    }
}

impl AudioSource for DecodedSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn position_frames(&self) -> u64 {
        self.position
    }

    fn read_chunk(&mut self, frames: usize) -> Result<Option<Vec<u8>>> {
        let channels = self.format.channels as usize;
        let samples: Vec<i16> = self.decoder.by_ref().take(frames * channels).collect();
        let whole = samples.len() - samples.len() % channels;
        if whole == 0 {
            return Ok(None);
        }
        self.position += (whole / channels) as u64;
        Ok(Some(samples_to_bytes(&samples[..whole])))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Write a 16-bit WAV of `frames` frames holding a 440 Hz tone.
    pub(crate) fn write_tone(path: &Path, frames: usize, channels: u16, sample_rate: u32) -> PathBuf {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_wav_source_chunks_cover_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(&dir.path().join("tone.wav"), 1000, 2, 8000);

        let mut source = open_source(&path).unwrap();
        assert_eq!(source.format(), StreamFormat { sample_rate: 8000, channels: 2 });
        assert_eq!(source.duration(), Some(0.125));

        let first = source.read_chunk(400).unwrap().unwrap();
        assert_eq!(first.len(), 400 * 4);
        let second = source.read_chunk(400).unwrap().unwrap();
        assert_eq!(second.len(), 400 * 4);
        let last = source.read_chunk(400).unwrap().unwrap();
        assert_eq!(last.len(), 200 * 4);
        assert!(source.read_chunk(400).unwrap().is_none());
        assert_eq!(source.position_frames(), 1000);
        assert_eq!(source.position_seconds(), 0.125);
    }

    /// Cut `bytes` off the end of `path`.
    pub(crate) fn truncate_by(path: &Path, bytes: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - bytes).unwrap();
    }

    #[test]
    fn test_truncated_wav_ends_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tone(&dir.path().join("cut.wav"), 768, 2, 8000);
        truncate_by(&path, 1);

        let mut source = open_source(&path).unwrap();
        assert_eq!(source.read_chunk(256).unwrap().unwrap().len(), 256 * 4);
        assert_eq!(source.read_chunk(256).unwrap().unwrap().len(), 256 * 4);
        // The last frame lost a byte, so only whole frames before it come back
        assert_eq!(source.read_chunk(256).unwrap().unwrap().len(), 255 * 4);
        assert!(source.read_chunk(256).unwrap().is_none());
        assert_eq!(source.position_frames(), 767);
    }

    #[test]
    fn test_float_wav_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        let err = open_source(&path).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<LightshowError>(),
            Some(LightshowError::UnsupportedSource { .. })
        ));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(open_source(&path).is_err());
    }
}
