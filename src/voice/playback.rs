//! Audio playback to speakers
//!
//! cpal streams are not `Send`, so each clip plays on a dedicated thread that
//! owns its stream. The caller keeps a [`PlaybackHandle`] to poll progress
//! and stop early.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A clip in flight
pub trait PlaybackHandle: Send {
    /// Current output level in [0, 1]
    fn level(&self) -> f32;

    /// True once the clip has played out, failed, or been stopped
    fn is_finished(&self) -> bool;

    /// Halt output immediately
    fn stop(&self);
}

/// Something that can play clips
pub trait AudioOutput: Send + Sync {
    /// Begin playing a clip
    ///
    /// # Errors
    ///
    /// Returns `Playback` if the output cannot be started
    fn play(&self, clip: AudioClip) -> Result<Box<dyn PlaybackHandle>>;
}

#[derive(Default)]
struct Progress {
    level: AtomicU32,
    finished: AtomicBool,
    stopped: AtomicBool,
}

impl Progress {
    fn set_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }
}

struct ThreadHandle {
    progress: Arc<Progress>,
}

impl PlaybackHandle for ThreadHandle {
    fn level(&self) -> f32 {
        f32::from_bits(self.progress.level.load(Ordering::Relaxed))
    }

    fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.progress.stopped.store(true, Ordering::Release);
        self.progress.set_level(0.0);
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::SensorUnavailable("no output device available".to_string()))?;

        let config: StreamConfig = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .into();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Device sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play a clip and wait for it to finish
    ///
    /// # Errors
    ///
    /// Returns error if playback fails to start
    pub async fn play_to_end(&self, clip: AudioClip) -> Result<()> {
        let handle = self.play(clip)?;
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }
}

impl AudioOutput for AudioPlayback {
    fn play(&self, clip: AudioClip) -> Result<Box<dyn PlaybackHandle>> {
        let device_rate = self.config.sample_rate.0;
        let samples = if clip.sample_rate == device_rate || clip.is_empty() {
            clip.samples
        } else {
            resample_audio(&clip.samples, clip.sample_rate, device_rate)?
        };

        let progress = Arc::new(Progress::default());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let config = self.config.clone();
        let thread_progress = Arc::clone(&progress);

        std::thread::Builder::new()
            .name("playback".into())
            .spawn(move || run_stream(&config, samples, &thread_progress, &ready_tx))
            .map_err(|e| Error::Playback(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Playback("playback thread exited".to_string()))??;

        Ok(Box::new(ThreadHandle { progress }))
    }
}

#[allow(clippy::needless_pass_by_value)]
fn run_stream(
    config: &StreamConfig,
    samples: Vec<f32>,
    progress: &Arc<Progress>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match build_stream(config, samples, progress) {
        Ok(stream) => stream,
        Err(e) => {
            progress.finished.store(true, Ordering::Release);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !progress.finished.load(Ordering::Acquire) && !progress.stopped.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    progress.set_level(0.0);
    progress.finished.store(true, Ordering::Release);
    tracing::debug!("playback complete");
}

fn build_stream(
    config: &StreamConfig,
    samples: Vec<f32>,
    progress: &Arc<Progress>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let callback_progress = Arc::clone(progress);
    let error_progress = Arc::clone(progress);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if callback_progress.stopped.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let start = position;
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if position < samples.len() {
                        position += 1;
                    }
                }

                callback_progress.set_level(rms(&samples[start..position]));
                if position >= samples.len() {
                    callback_progress.finished.store(true, Ordering::Release);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                error_progress.finished.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;
    Ok(stream)
}

/// RMS energy of a sample block
#[allow(clippy::cast_precision_loss)]
pub(crate) fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Decode a response payload (WAV or MP3) to mono samples
///
/// # Errors
///
/// Returns error if the payload is empty or cannot be decoded
pub fn decode_audio(data: &[u8]) -> Result<AudioClip> {
    if data.is_empty() {
        return Err(Error::Audio("empty audio payload".to_string()));
    }

    let clip = if data.starts_with(b"RIFF") {
        decode_wav(data)?
    } else {
        decode_mp3(data)?
    };

    if clip.is_empty() {
        return Err(Error::Audio("audio payload has no samples".to_string()));
    }
    Ok(clip)
}

fn decode_wav(data: &[u8]) -> Result<AudioClip> {
    let reader = hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    Ok(AudioClip::new(downmix(&interleaved, channels), spec.sample_rate))
}

/// Decode MP3 bytes to mono f32 samples
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let data: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&data, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(AudioClip::new(samples, sample_rate))
}

#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample audio using rubato
///
/// # Errors
///
/// Returns error if the resampler rejects the rates
#[allow(clippy::cast_possible_truncation)]
pub fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::new();
    for chunk in samples.chunks(chunk_size) {
        // Last chunk is zero-padded to a full block
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        block.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    // Drop the tail produced by padding
    let expected = samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate).max(1);
    output.truncate(usize::try_from(expected).unwrap_or(usize::MAX));

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_decode_wav_round_trip() {
        let samples: Vec<f32> = (0..1600).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
        let wav = samples_to_wav(&samples, 16000).unwrap();

        let clip = decode_audio(&wav).unwrap();
        assert_eq!(clip.sample_rate, 16000);
        assert_eq!(clip.samples.len(), 1600);
        assert!((clip.samples[0] - 0.25).abs() < 0.001);
        assert_eq!(clip.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(decode_audio(&[]).is_err());
        assert!(decode_audio(b"not audio at all").is_err());
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[0.2, 0.4, -1.0, 1.0], 2), vec![0.3, 0.0]);
    }

    #[test]
    fn test_resample_doubles_length() {
        let samples = vec![0.1f32; 4096];
        let out = resample_audio(&samples, 16000, 32000).unwrap();
        assert_eq!(out.len(), 8192);
    }
}
