//! Voice processing module
//!
//! Handles microphone capture, utterance segmentation, cloud speech
//! recognition, and playback of response audio.

mod capture;
mod playback;
mod recognizer;
mod stt;
mod vad;

pub use capture::{AudioCapture, AudioChunk, CHUNK_MS, MicrophoneTap, SAMPLE_RATE, samples_to_wav};
pub use playback::{
    AudioClip, AudioOutput, AudioPlayback, PlaybackHandle, decode_audio, resample_audio,
};
pub use recognizer::{CloudRecognizer, RecognitionEvent, RecognitionSink, SpeechRecognizer};
pub use stt::{SpeechToText, SttProvider};
pub use vad::{DEFAULT_ENERGY_THRESHOLD, SegmenterState, UtteranceSegmenter};

/// RMS energy of a sample block
#[must_use]
pub fn energy(samples: &[f32]) -> f32 {
    playback::rms(samples)
}
