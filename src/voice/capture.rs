//! Microphone capture for realtime transcription

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, watch};

use super::resample::StreamResampler;
use crate::{Error, Result};

/// Sample rate sent to the transcriber (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Audio per chunk handed to the transcriber
const CHUNK_MS: u32 = 100;

/// Samples per chunk at [`SAMPLE_RATE`]
const CHUNK_SAMPLES: usize = (SAMPLE_RATE * CHUNK_MS / 1000) as usize;

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Streams 16kHz mono PCM16 chunks from the default input device
///
/// cpal streams are not `Send`, so the stream lives on its own thread for
/// its whole life. Chunks arrive on the channel given to [`spawn`](Self::spawn);
/// the thread exits when shutdown is signalled or the receiver is dropped.
pub struct MicrophoneStream {
    handle: JoinHandle<()>,
}

impl MicrophoneStream {
    /// Open the microphone and start streaming
    ///
    /// # Errors
    ///
    /// Returns error if no input device can be opened
    pub fn spawn(chunks: mpsc::Sender<Vec<u8>>, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || capture_thread(&chunks, &shutdown, &ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(Error::Audio("microphone thread exited during startup".to_string())),
        }
    }

    /// Whether the capture thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the capture thread to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("microphone thread panicked");
        }
    }
}

struct InputDevice {
    device: cpal::Device,
    config: StreamConfig,
}

fn open_input() -> Result<InputDevice> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    // Prefer capturing at the target rate; otherwise take the device default
    // and convert
    let exact = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    let config = match exact {
        Some(supported) => supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
        None => device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config(),
    };

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "microphone opened"
    );

    Ok(InputDevice { device, config })
}

fn capture_thread(
    chunks: &mpsc::Sender<Vec<u8>>,
    shutdown: &watch::Receiver<bool>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let started = open_input().and_then(|input| {
        let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
        let sink = Arc::clone(&buffer);

        let stream = input
            .device
            .build_input_stream(
                &input.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "microphone stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let resampler = StreamResampler::new(input.config.sample_rate.0, SAMPLE_RATE)?;
        Ok((stream, buffer, resampler, usize::from(input.config.channels)))
    });

    let (stream, buffer, mut resampler, channels) = match started {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    tracing::info!("microphone streaming");
    let mut pending: Vec<f32> = Vec::new();

    'capture: while !*shutdown.borrow() {
        std::thread::sleep(POLL_INTERVAL);

        let raw = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        if raw.is_empty() {
            continue;
        }

        match resampler.push(&downmix(&raw, channels)) {
            Ok(samples) => pending.extend(samples),
            Err(e) => {
                tracing::warn!(error = %e, "dropping microphone audio");
                continue;
            }
        }

        while pending.len() >= CHUNK_SAMPLES {
            let chunk: Vec<f32> = pending.drain(..CHUNK_SAMPLES).collect();
            if chunks.blocking_send(to_pcm16_le(&chunk)).is_err() {
                break 'capture;
            }
        }
    }

    drop(stream);
    tracing::info!("microphone stopped");
}

/// Average interleaved frames down to one channel
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Encode samples as 16-bit little-endian PCM
#[must_use]
pub fn to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}
