use anyhow::{Context, Result};
use log::{info, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use super::StreamFormat;
use crate::config::Config;

/// Chunks queued on the device before `write` blocks. Keeps the lights at
/// most one chunk ahead of what is audible.
const MAX_QUEUED_CHUNKS: usize = 1;

fn backlog_full(sink: &Sink) -> bool {
    sink.len() > MAX_QUEUED_CHUNKS
}

/// Where decoded audio goes. Chosen once per song and fixed for the session.
pub trait OutputSink {
    /// Deliver one interleaved S16LE chunk, blocking while the device is busy.
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Release the sink. `drain` lets queued audio finish playing first.
    fn close(&mut self, drain: bool) -> Result<()>;
}

/// Opens the output sink for a song once its format is known.
pub trait SinkFactory {
    fn open(&mut self, format: StreamFormat) -> Result<Box<dyn OutputSink>>;
}

/// Local audio device or FM transmitter, per configuration.
pub struct ConfiguredSinks {
    config: Arc<Config>,
}

impl ConfiguredSinks {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl SinkFactory for ConfiguredSinks {
    fn open(&mut self, format: StreamFormat) -> Result<Box<dyn OutputSink>> {
        let fm = &self.config.audio_processing.fm;
        if fm.enabled {
            let program = self.config.resolve_path(&fm.program);
            info!("Sending output as FM transmission at {} MHz via {:?}", fm.frequency, program);
            let sink = FmTransmitterSink::spawn(
                Command::new(program),
                fm.frequency,
                format.sample_rate,
                fm.stereo,
            )?;
            Ok(Box::new(sink))
        } else {
            Ok(Box::new(DeviceSink::open(format)?))
        }
    }
}

/// Default playback device through rodio.
pub struct DeviceSink {
    #[allow(dead_code)]
    stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
    format: StreamFormat,
}

impl DeviceSink {
    pub fn open(format: StreamFormat) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default().context("No output device available")?;
        let sink = Sink::try_new(&handle).context("Failed to create playback sink")?;
        Ok(Self {
            stream,
            _handle: handle,
            sink,
            format,
        })
    }
}

impl OutputSink for DeviceSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let samples: Vec<i16> = chunk
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.sink
            .append(SamplesBuffer::new(self.format.channels, self.format.sample_rate, samples));
        while backlog_full(&self.sink) {
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn close(&mut self, drain: bool) -> Result<()> {
        if drain {
            self.sink.sleep_until_end();
        } else {
            self.sink.stop();
        }
        Ok(())
    }
}

/// Pipes raw audio into a transmitter program's stdin, invoked as
/// `<program> - <MHz> <sample rate> stereo|mono`.
pub struct FmTransmitterSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FmTransmitterSink {
    pub fn spawn(mut command: Command, frequency: f32, sample_rate: u32, stereo: bool) -> Result<Self> {
        let mut child = command
            .arg("-")
            .arg(frequency.to_string())
            .arg(sample_rate.to_string())
            .arg(if stereo { "stereo" } else { "mono" })
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .context("Failed to start FM transmitter")?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin })
    }
}

impl OutputSink for FmTransmitterSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("FM transmitter pipe already closed")?;
        stdin.write_all(chunk).context("FM transmitter pipe closed")?;
        Ok(())
    }

    fn close(&mut self, drain: bool) -> Result<()> {
        // Closing stdin lets the transmitter finish what it has buffered
        drop(self.stdin.take());
        if drain {
            self.child.wait()?;
        } else if let Err(e) = self.child.kill() {
            warn!("FM transmitter already exited: {}", e);
        } else {
            self.child.wait()?;
        }
        Ok(())
    }
}

/// Discards audio. Used when only the levels matter (cache generation).
#[derive(Debug, Default)]
pub struct NullSink {
    pub bytes_written: usize,
}

impl OutputSink for NullSink {
    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes_written += chunk.len();
        Ok(())
    }

    fn close(&mut self, _drain: bool) -> Result<()> {
        Ok(())
    }
}

/// Hands out a `NullSink` for every song.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingSinks;

impl SinkFactory for DiscardingSinks {
    fn open(&mut self, _format: StreamFormat) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(NullSink::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts_bytes() {
        let mut sink = NullSink::default();
        sink.write(&[0u8; 64]).unwrap();
        sink.write(&[0u8; 16]).unwrap();
        sink.close(true).unwrap();
        assert_eq!(sink.bytes_written, 80);
    }

    #[test]
    fn test_device_backlog_is_one_chunk() {
        let (sink, _queue) = Sink::new_idle();
        assert!(!backlog_full(&sink));
        sink.append(SamplesBuffer::new(1, 8000, vec![0i16; 256]));
        assert!(!backlog_full(&sink));
        sink.append(SamplesBuffer::new(1, 8000, vec![0i16; 256]));
        assert!(backlog_full(&sink));
    }

    #[cfg(unix)]
    #[test]
    fn test_fm_sink_pipes_into_child() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("captured.raw");
        // `sh -c 'cat > file' <args...>` swallows the transmitter arguments
        let mut command = Command::new("sh");
        command.arg("-c").arg(format!("cat > '{}'", out.display())).arg("pifm");
        let mut sink = FmTransmitterSink::spawn(command, 101.1, 44100, true).unwrap();
        sink.write(&[1, 2, 3, 4]).unwrap();
        sink.write(&[5, 6]).unwrap();
        sink.close(true).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }
}
