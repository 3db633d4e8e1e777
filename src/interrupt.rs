//! Interruption (barge-in) detection while the assistant speaks

use std::time::Duration;

/// Barge-in parameters
#[derive(Debug, Clone, Copy)]
pub struct InterruptConfig {
    /// Disable to let the assistant always finish
    pub enabled: bool,
    /// Chunk RMS energy that counts as voiced
    pub energy_threshold: f32,
    /// Voiced time needed before interrupting
    pub min_speech: Duration,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 0.08,
            min_speech: Duration::from_millis(200),
        }
    }
}

/// Debounces microphone energy into a single interruption signal
#[derive(Debug, Clone)]
pub struct InterruptionMonitor {
    config: InterruptConfig,
    armed: bool,
    voiced: Duration,
}

impl InterruptionMonitor {
    #[must_use]
    pub const fn new(config: InterruptConfig) -> Self {
        Self {
            config,
            armed: false,
            voiced: Duration::ZERO,
        }
    }

    /// Start watching (entering Speaking)
    pub fn arm(&mut self) {
        self.armed = self.config.enabled;
        self.voiced = Duration::ZERO;
    }

    /// Stop watching (leaving Speaking)
    pub const fn disarm(&mut self) {
        self.armed = false;
        self.voiced = Duration::ZERO;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed the energy of one microphone chunk
    ///
    /// Returns true exactly once per armed period, when enough consecutive
    /// voiced audio has accumulated. The monitor disarms itself on firing.
    pub fn observe(&mut self, energy: f32, chunk: Duration) -> bool {
        if !self.armed {
            return false;
        }

        if energy < self.config.energy_threshold {
            self.voiced = Duration::ZERO;
            return false;
        }

        self.voiced += chunk;
        if self.voiced >= self.config.min_speech {
            tracing::debug!(voiced_ms = self.voiced.as_millis(), "barge-in detected");
            self.disarm();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: Duration = Duration::from_millis(100);

    #[test]
    fn test_fires_after_sustained_speech() {
        let mut monitor = InterruptionMonitor::new(InterruptConfig::default());
        monitor.arm();

        assert!(!monitor.observe(0.3, CHUNK));
        assert!(monitor.observe(0.3, CHUNK));
        assert!(!monitor.is_armed());
        assert!(!monitor.observe(0.3, CHUNK));
    }

    #[test]
    fn test_gap_resets_debounce() {
        let mut monitor = InterruptionMonitor::new(InterruptConfig::default());
        monitor.arm();

        assert!(!monitor.observe(0.3, CHUNK));
        assert!(!monitor.observe(0.01, CHUNK));
        assert!(!monitor.observe(0.3, CHUNK));
        assert!(monitor.observe(0.3, CHUNK));
    }

    #[test]
    fn test_ignored_when_disarmed_or_disabled() {
        let mut monitor = InterruptionMonitor::new(InterruptConfig::default());
        assert!(!monitor.observe(0.9, Duration::from_secs(1)));

        let mut disabled = InterruptionMonitor::new(InterruptConfig {
            enabled: false,
            ..InterruptConfig::default()
        });
        disabled.arm();
        assert!(!disabled.observe(0.9, Duration::from_secs(1)));
    }
}
