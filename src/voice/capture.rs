//! Microphone input
//!
//! `cpal` streams are not `Send` on every platform, so each tap owns its
//! stream on a dedicated thread and forwards sample chunks over a channel.
//! Closing the tap stops the stream and joins the thread before returning.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Whether the host exposes a default input device
#[must_use]
pub fn input_available() -> bool {
    cpal::default_host().default_input_device().is_some()
}

fn input_config(device: &Device) -> Result<StreamConfig> {
    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
    };

    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .collect();

    let supported = configs
        .iter()
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| configs.iter().find(|c| supports_rate(c)))
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

/// Live microphone tap
///
/// Chunks of mono `f32` samples at [`SAMPLE_RATE`] arrive on the receiver
/// returned by [`MicrophoneTap::open`].
pub struct MicrophoneTap {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneTap {
    /// Open the default input device and start streaming
    ///
    /// # Errors
    ///
    /// Returns `EngineStart` if the device cannot be opened or started
    pub fn open() -> Result<(Self, mpsc::UnboundedReceiver<Vec<f32>>)> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("wordy-mic".to_string())
            .spawn(move || {
                let stream = match build_stream(chunk_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Block until closed or the tap is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("microphone tap closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((
                Self {
                    stop: Some(stop_tx),
                    thread: Some(thread),
                },
                chunk_rx,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::EngineStart(e.to_string()))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::EngineStart("microphone thread exited".to_string()))
            }
        }
    }

    /// Stop the stream and wait for the device to be released
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("microphone thread panicked");
        }
    }
}

impl Drop for MicrophoneTap {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_stream(chunks: mpsc::UnboundedSender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let config = input_config(&device)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels,
        "microphone tap opened"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let chunk = downmix(data, channels);
                let _ = chunks.send(chunk);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, -0.5, 0.5], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_wav_header() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 3);
    }
}
