//! Lip-sync drive value for the avatar renderer
//!
//! The value is mouth-openness in [0, 1]. While real audio plays it follows
//! the output level; for silent speech it follows a text-length envelope.

use std::f32::consts::TAU;
use std::time::Duration;

/// Estimated speaking time per character of text
pub const MS_PER_CHAR: u64 = 65;

/// Shortest silent utterance
const MIN_SPEECH: Duration = Duration::from_millis(800);

/// Output level that maps to a fully open mouth
const LEVEL_GAIN: f32 = 4.0;

/// Exponential smoothing factor per update
const SMOOTHING: f32 = 0.5;

/// Syllable rate of the synthetic envelope
const SYLLABLES_PER_SEC: f32 = 4.0;

/// Estimated duration of speaking `text` with no audio
#[must_use]
pub fn speech_duration(text: &str) -> Duration {
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    Duration::from_millis(chars.saturating_mul(MS_PER_CHAR)).max(MIN_SPEECH)
}

/// Mouth-openness driver
#[derive(Debug, Clone, Default)]
pub struct LipSync {
    value: f32,
}

impl LipSync {
    #[must_use]
    pub const fn new() -> Self {
        Self { value: 0.0 }
    }

    #[must_use]
    pub const fn value(&self) -> f32 {
        self.value
    }

    /// Follow a live playback level
    pub fn follow_level(&mut self, level: f32) {
        let target = (level * LEVEL_GAIN).clamp(0.0, 1.0);
        self.value += (target - self.value) * SMOOTHING;
    }

    /// Drive from the heuristic envelope, `elapsed` into a `total` utterance
    #[allow(clippy::cast_precision_loss)]
    pub fn animate(&mut self, elapsed: Duration, total: Duration) {
        if elapsed >= total {
            self.value = 0.0;
            return;
        }
        let phase = elapsed.as_secs_f32() * SYLLABLES_PER_SEC * TAU;
        self.value = (0.15 + 0.6 * phase.sin().abs()).clamp(0.0, 1.0);
    }

    /// Close the mouth
    pub const fn reset(&mut self) {
        self.value = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_scales_with_text() {
        assert_eq!(speech_duration("salam"), MIN_SPEECH);
        assert_eq!(
            speech_duration(&"a".repeat(100)),
            Duration::from_millis(6500)
        );
        // Counts characters, not bytes
        assert_eq!(speech_duration(&"ə".repeat(20)), Duration::from_millis(1300));
    }

    #[test]
    fn test_value_stays_in_range() {
        let mut lip = LipSync::new();
        for level in [0.0, 0.1, 0.5, 3.0] {
            lip.follow_level(level);
            assert!((0.0..=1.0).contains(&lip.value()));
        }

        let total = Duration::from_secs(2);
        for ms in (0..2500).step_by(50) {
            lip.animate(Duration::from_millis(ms), total);
            assert!((0.0..=1.0).contains(&lip.value()));
        }
        assert!(lip.value().abs() < f32::EPSILON);
    }

    #[test]
    fn test_reset_zeroes() {
        let mut lip = LipSync::new();
        lip.follow_level(1.0);
        assert!(lip.value() > 0.0);
        lip.reset();
        assert!(lip.value().abs() < f32::EPSILON);
    }
}
