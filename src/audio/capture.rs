use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{info, warn};
use std::time::Duration;
use thiserror::Error;

use super::StreamFormat;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No audio arrived within {0:?}")]
    Timeout(Duration),
    #[error("Capture stream closed")]
    Disconnected,
}

/// A live input delivering fixed-size interleaved S16LE chunks.
pub trait CaptureDevice {
    fn format(&self) -> StreamFormat;

    /// Block for the next chunk. `Timeout` is transient; `Disconnected` ends
    /// the capture.
    fn read_chunk(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// Capture through cpal. The stream callback forwards samples over a
/// channel and `read_chunk` reassembles them into whole chunks.
pub struct CpalCapture {
    #[allow(dead_code)]
    stream: Stream,
    receiver: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    chunk_samples: usize,
    format: StreamFormat,
    timeout: Duration,
}

impl CpalCapture {
    /// Open `card` ("default" or a device name) at the requested format.
    pub fn open(card: &str, format: StreamFormat, chunk_frames: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = if card == "default" {
            host.default_input_device()
        } else {
            host.input_devices()?
                .find(|d| d.name().map(|n| n == card).unwrap_or(false))
        }
        .ok_or_else(|| anyhow!("No input device named {:?}", card))?;

        info!("Using audio device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        let sample_format = device
            .default_input_config()
            .map_err(|e| anyhow!("Failed to get default input config: {}", e))?
            .sample_format();
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let (sender, receiver) = crossbeam_channel::unbounded();
        let stream = Self::create_input_stream(&device, &config, sample_format, sender)?;
        stream.play()?;

        Ok(Self {
            stream,
            receiver,
            pending: Vec::new(),
            chunk_samples: chunk_frames * format.channels as usize,
            format,
            timeout: Duration::from_secs(1),
        })
    }

    fn create_input_stream(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        sender: Sender<Vec<i16>>,
    ) -> Result<Stream> {
        info!(
            "Creating input stream with {} channels at {} Hz ({:?})",
            config.channels, config.sample_rate.0, sample_format
        );
        let on_error = |err: cpal::StreamError| warn!("Audio stream error: {}", err);
        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if sender.send(data.to_vec()).is_err() {
                        warn!("Failed to send audio data");
                    }
                },
                on_error,
                None,
            )?,
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    if sender.send(samples).is_err() {
                        warn!("Failed to send audio data");
                    }
                },
                on_error,
                None,
            )?,
            other => return Err(anyhow!("Unsupported capture sample format {:?}", other)),
        };
        Ok(stream)
    }
}

impl CaptureDevice for CpalCapture {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read_chunk(&mut self) -> Result<Vec<u8>, CaptureError> {
        while self.pending.len() < self.chunk_samples {
            match self.receiver.recv_timeout(self.timeout) {
                Ok(samples) => self.pending.extend_from_slice(&samples),
                Err(RecvTimeoutError::Timeout) => return Err(CaptureError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }
        let chunk: Vec<i16> = self.pending.drain(..self.chunk_samples).collect();
        Ok(chunk.iter().flat_map(|s| s.to_le_bytes()).collect())
    }
}
