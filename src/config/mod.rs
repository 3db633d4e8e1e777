//! Configuration management for the kiosk concierge
//!
//! Values resolve env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::interrupt::InterruptConfig;
use crate::matcher::{DEFAULT_MATCH_THRESHOLD, MatchPolicy};
use crate::session::SessionTimings;
use crate::store::MatchSettings;
use crate::turn::TurnTexts;
use crate::vision::CaptureConfig;
use crate::voice::{DEFAULT_ENERGY_THRESHOLD, SttProvider};
use crate::{Error, Result};

/// Default HTTP API port
pub const DEFAULT_PORT: u16 = 18800;

/// Post-speech settle delay bounds
const MIN_SETTLE: Duration = Duration::from_millis(300);
const MAX_SETTLE: Duration = Duration::from_millis(500);

/// Kiosk concierge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (customer database)
    pub data_dir: PathBuf,

    pub camera: CameraConfig,

    pub face: FaceConfig,

    pub speech: SpeechConfig,

    pub response: ResponseConfig,

    pub interrupt: InterruptConfig,

    /// Local greeting and apology utterances
    pub texts: TurnTexts,

    pub api_server: ApiServerConfig,
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub enabled: bool,
    /// JPEG snapshot endpoint
    pub snapshot_url: Option<String>,
    /// Capture-mode sampling period
    pub tick: Duration,
}

/// Face analysis and matching configuration
#[derive(Debug, Clone)]
pub struct FaceConfig {
    /// Face-analysis sidecar base URL
    pub analyzer_url: Option<String>,
    pub capture: CaptureConfig,
    pub matching: MatchSettings,
    /// Presence-watch sampling period (zero disables)
    pub presence_interval: Duration,
    /// Consecutive empty presence samples before the customer counts as gone
    pub absence_frames: u32,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// BCP-47 tag
    pub language: String,
    pub provider: SttProvider,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timings: SessionTimings,
    pub vad_threshold: f32,
}

/// Remote response service configuration
#[derive(Debug, Clone)]
pub struct ResponseConfig {
    pub webhook_url: Option<String>,
    pub api_key: Option<SecretString>,
    /// Bound on the Processing mode
    pub timeout: Duration,
    /// Past turns sent as context
    pub history_turns: usize,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub enabled: bool,
    /// Port to listen on
    pub port: u16,
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn millis(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is out of range
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is out of range
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_sources(
        fc: file::ConciergeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Determine data directory (~/.local/share/kiosk/concierge on Linux)
        let data_dir = env("CONCIERGE_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                directories::BaseDirs::new().map_or_else(
                    || PathBuf::from("."),
                    |d| d.data_dir().join("kiosk").join("concierge"),
                )
            });

        let camera = CameraConfig {
            enabled: env_parse(&env, "CONCIERGE_CAMERA_ENABLED")
                .or(fc.camera.enabled)
                .unwrap_or(true),
            snapshot_url: env("CONCIERGE_CAMERA_URL").or(fc.camera.snapshot_url),
            tick: millis(
                env_parse(&env, "CONCIERGE_CAMERA_TICK_MS").or(fc.camera.tick_ms),
                100,
            ),
        };

        let defaults = CaptureConfig::default();
        let face = FaceConfig {
            analyzer_url: env("CONCIERGE_FACE_URL").or(fc.face.analyzer_url),
            capture: CaptureConfig {
                min_face_size: fc.face.min_face_size.unwrap_or(defaults.min_face_size),
                frames_threshold: env_parse(&env, "CONCIERGE_FACE_FRAMES")
                    .or(fc.face.frames_threshold)
                    .unwrap_or(defaults.frames_threshold),
                padding: fc.face.padding.unwrap_or(defaults.padding),
                ..defaults
            },
            matching: MatchSettings {
                threshold: env_parse(&env, "CONCIERGE_MATCH_THRESHOLD")
                    .or(fc.face.match_threshold)
                    .unwrap_or(DEFAULT_MATCH_THRESHOLD),
                policy: env("CONCIERGE_MATCH_POLICY")
                    .or(fc.face.match_policy)
                    .map_or_else(MatchPolicy::default, |p| MatchPolicy::from_name(&p)),
                staleness: chrono::Duration::minutes(
                    env_parse(&env, "CONCIERGE_STALENESS_MINUTES")
                        .or(fc.face.staleness_minutes)
                        .unwrap_or(30),
                ),
            },
            presence_interval: millis(fc.face.presence_interval_ms, 1000),
            absence_frames: fc.face.absence_frames.unwrap_or(3),
        };

        let provider_name = env("CONCIERGE_STT_PROVIDER")
            .or(fc.speech.provider)
            .unwrap_or_else(|| "whisper".to_string());
        let provider = SttProvider::from_name(&provider_name)
            .ok_or_else(|| Error::Config(format!("unknown STT provider: {provider_name}")))?;
        let provider_key = match provider {
            SttProvider::Whisper => env("OPENAI_API_KEY"),
            SttProvider::Deepgram => env("DEEPGRAM_API_KEY"),
        };

        let speech = SpeechConfig {
            enabled: env_parse(&env, "CONCIERGE_SPEECH_ENABLED")
                .or(fc.speech.enabled)
                .unwrap_or(true),
            language: env("CONCIERGE_LANGUAGE")
                .or(fc.speech.language)
                .unwrap_or_else(|| "az-AZ".to_string()),
            provider,
            model: env("CONCIERGE_STT_MODEL")
                .or(fc.speech.model)
                .unwrap_or_else(|| match provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            api_key: provider_key.or(fc.speech.api_key).map(SecretString::from),
            timings: SessionTimings {
                settle: millis(fc.speech.settle_ms, 400),
                recognition_retry: millis(fc.speech.retry_ms, 500),
            },
            vad_threshold: fc.speech.vad_threshold.unwrap_or(DEFAULT_ENERGY_THRESHOLD),
        };

        let response = ResponseConfig {
            webhook_url: env("CONCIERGE_WEBHOOK_URL").or(fc.response.webhook_url),
            api_key: env("CONCIERGE_WEBHOOK_KEY")
                .or(fc.response.api_key)
                .map(SecretString::from),
            timeout: millis(
                env_parse(&env, "CONCIERGE_RESPONSE_TIMEOUT_MS").or(fc.response.timeout_ms),
                10_000,
            ),
            history_turns: fc.response.history_turns.unwrap_or(10),
        };

        let interrupt_defaults = InterruptConfig::default();
        let interrupt = InterruptConfig {
            enabled: fc.interrupt.enabled.unwrap_or(interrupt_defaults.enabled),
            energy_threshold: fc
                .interrupt
                .energy_threshold
                .unwrap_or(interrupt_defaults.energy_threshold),
            min_speech: fc
                .interrupt
                .min_speech_ms
                .map_or(interrupt_defaults.min_speech, Duration::from_millis),
        };

        let default_texts = TurnTexts::default();
        let texts = TurnTexts {
            new_customer: fc.greeting.new_customer.unwrap_or(default_texts.new_customer),
            returning: fc.greeting.returning.unwrap_or(default_texts.returning),
            apology: fc.greeting.apology.unwrap_or(default_texts.apology),
        };

        // API server config (env > toml > default)
        let api_server = ApiServerConfig {
            enabled: fc.server.enabled.unwrap_or(true),
            port: env_parse(&env, "CONCIERGE_API_PORT")
                .or_else(|| env_parse(&env, "PORT"))
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        let config = Self {
            data_dir,
            camera,
            face,
            speech,
            response,
            interrupt,
            texts,
            api_server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first bad value
    pub fn validate(&self) -> Result<()> {
        let threshold = self.face.matching.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(Error::Config(format!("match threshold must be positive, got {threshold}")));
        }
        if self.face.capture.frames_threshold == 0 {
            return Err(Error::Config("face frames threshold must be at least 1".to_string()));
        }
        if self.face.capture.padding < 0.0 {
            return Err(Error::Config("face padding must not be negative".to_string()));
        }
        if self.face.matching.staleness < chrono::Duration::zero() {
            return Err(Error::Config("staleness must not be negative".to_string()));
        }
        if self.camera.tick.is_zero() {
            return Err(Error::Config("camera tick must be positive".to_string()));
        }
        if self.response.timeout.is_zero() {
            return Err(Error::Config("response timeout must be positive".to_string()));
        }
        let settle = self.speech.timings.settle;
        if settle < MIN_SETTLE || settle > MAX_SETTLE {
            return Err(Error::Config(format!(
                "settle delay must be {}-{} ms, got {} ms",
                MIN_SETTLE.as_millis(),
                MAX_SETTLE.as_millis(),
                settle.as_millis()
            )));
        }
        if self.speech.language.trim().is_empty() {
            return Err(Error::Config("speech language must be set".to_string()));
        }

        for (name, value) in [
            ("camera snapshot URL", &self.camera.snapshot_url),
            ("face analyzer URL", &self.face.analyzer_url),
            ("response webhook URL", &self.response.webhook_url),
        ] {
            if let Some(raw) = value {
                url::Url::parse(raw)
                    .map_err(|e| Error::Config(format!("invalid {name} '{raw}': {e}")))?;
            }
        }

        Ok(())
    }

    /// Path of the customer database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("customers.db")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(fc: file::ConciergeConfigFile, vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(file::ConciergeConfigFile::default(), &[]).unwrap();

        assert!((config.face.matching.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.face.matching.policy, MatchPolicy::FirstMatch);
        assert_eq!(config.face.matching.staleness, chrono::Duration::minutes(30));
        assert_eq!(config.face.capture.frames_threshold, 5);
        assert_eq!(config.camera.tick, Duration::from_millis(100));
        assert_eq!(config.speech.language, "az-AZ");
        assert_eq!(config.speech.timings.settle, Duration::from_millis(400));
        assert_eq!(config.response.timeout, Duration::from_secs(10));
        assert_eq!(config.api_server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: file::ConciergeConfigFile = toml::from_str(
            r#"
            [face]
            match_threshold = 0.5
            match_policy = "nearest"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        let config = load(fc, &[("CONCIERGE_MATCH_THRESHOLD", "0.45")]).unwrap();
        assert!((config.face.matching.threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(config.face.matching.policy, MatchPolicy::Nearest);
        assert_eq!(config.api_server.port, 9000);
    }

    #[test]
    fn test_rejects_bad_values() {
        for var in [
            ("CONCIERGE_MATCH_THRESHOLD", "0"),
            ("CONCIERGE_FACE_FRAMES", "0"),
            ("CONCIERGE_WEBHOOK_URL", "not a url"),
            ("CONCIERGE_STT_PROVIDER", "vosk"),
        ] {
            let result = load(file::ConciergeConfigFile::default(), &[var]);
            assert!(result.is_err(), "{var:?} accepted");
        }
    }

    #[test]
    fn test_settle_window() {
        let with_settle = |ms: u64| {
            let mut fc = file::ConciergeConfigFile::default();
            fc.speech.settle_ms = Some(ms);
            load(fc, &[])
        };

        assert!(with_settle(300).is_ok());
        assert!(with_settle(500).is_ok());
        assert!(with_settle(0).is_err());
        assert!(with_settle(1500).is_err());
    }
}
