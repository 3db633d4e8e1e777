//! Energy-based utterance segmentation
//!
//! Splits the microphone stream into utterances: speech starts when chunk
//! energy crosses the threshold and ends after a run of silence.

use super::capture::SAMPLE_RATE;
use super::playback::rms;

/// Default energy threshold to consider speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Hard cap on one utterance
const MAX_UTTERANCE_SAMPLES: usize = SAMPLE_RATE as usize * 15;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Speaking,
}

/// Cuts a chunk stream into utterances
#[derive(Debug)]
pub struct UtteranceSegmenter {
    threshold: f32,
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed one chunk; returns a finished utterance when one completes
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = rms(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let complete = self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES + self.silence_counter;

                if complete || self.speech_buffer.len() >= MAX_UTTERANCE_SAMPLES {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                    let utterance = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(utterance);
                }

                // Too much silence without enough speech: a click or cough
                if self.silence_counter > SILENCE_SAMPLES {
                    tracing::trace!("speech too short, discarding");
                    self.reset();
                }
                None
            }
        }
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(amplitude: f32) -> Vec<f32> {
        vec![amplitude; 1600]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(rms(&[0.0f32; 100]) < 0.001);
        assert!(rms(&[0.5f32; 100]) > 0.4);
    }

    #[test]
    fn test_utterance_ends_after_silence() {
        let mut segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);

        for _ in 0..5 {
            assert!(segmenter.push(&chunk(0.3)).is_none());
        }
        assert_eq!(segmenter.state(), SegmenterState::Speaking);

        let mut utterance = None;
        for _ in 0..6 {
            utterance = utterance.or_else(|| segmenter.push(&chunk(0.0)));
        }

        let utterance = utterance.expect("utterance should complete");
        assert!(utterance.len() >= 5 * 1600);
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_short_blip_discarded() {
        let mut segmenter = UtteranceSegmenter::new(DEFAULT_ENERGY_THRESHOLD);
        segmenter.push(&chunk(0.3));
        for _ in 0..10 {
            assert!(segmenter.push(&chunk(0.0)).is_none());
        }
        assert_eq!(segmenter.state(), SegmenterState::Idle);
    }
}
