//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::broadcast;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Microphone chunk period
pub const CHUNK_MS: u64 = 100;

/// One published microphone chunk
pub type AudioChunk = Arc<[f32]>;

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns `SensorUnavailable` if no microphone can be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::SensorUnavailable("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::SensorUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::SensorUnavailable("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

/// Shared microphone fan-out
///
/// A background thread owns the capture stream and publishes fixed-period
/// chunks to every subscriber (recognizer, interruption monitor).
pub struct MicrophoneTap {
    sender: broadcast::Sender<AudioChunk>,
    running: Arc<AtomicBool>,
}

impl MicrophoneTap {
    /// Open the microphone and start publishing
    ///
    /// # Errors
    ///
    /// Returns `SensorUnavailable` if the microphone cannot be opened
    pub fn start() -> Result<Self> {
        let (sender, _) = broadcast::channel(64);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread_sender = sender.clone();
        let thread_running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("microphone".into())
            .spawn(move || {
                let started = AudioCapture::new().and_then(|mut c| c.start().map(|()| c));
                let mut capture = match started {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(CHUNK_MS));
                    let samples = capture.take_buffer();
                    if !samples.is_empty() {
                        // No subscribers is fine
                        let _ = thread_sender.send(samples.into());
                    }
                }
                capture.stop();
            })
            .map_err(|e| Error::Audio(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| Error::SensorUnavailable("microphone thread exited".to_string()))??;

        tracing::info!("microphone tap running");
        Ok(Self { sender, running })
    }

    /// Subscribe to microphone chunks
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AudioChunk> {
        self.sender.subscribe()
    }

    /// Publishing side, for components that subscribe on demand
    #[must_use]
    pub fn sender(&self) -> broadcast::Sender<AudioChunk> {
        self.sender.clone()
    }
}

impl Drop for MicrophoneTap {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
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
            // Convert f32 [-1.0, 1.0] to i16
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
