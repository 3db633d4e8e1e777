//! TOML configuration file loading
//!
//! Supports `~/.config/kiosk/concierge/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConciergeConfigFile {
    /// Data directory override
    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub camera: CameraFileConfig,

    #[serde(default)]
    pub face: FaceFileConfig,

    #[serde(default)]
    pub speech: SpeechFileConfig,

    #[serde(default)]
    pub response: ResponseFileConfig,

    #[serde(default)]
    pub interrupt: InterruptFileConfig,

    #[serde(default)]
    pub greeting: GreetingFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Camera source
#[derive(Debug, Default, Deserialize)]
pub struct CameraFileConfig {
    pub enabled: Option<bool>,
    /// JPEG snapshot endpoint
    pub snapshot_url: Option<String>,
    /// Capture tick in milliseconds
    pub tick_ms: Option<u64>,
}

/// Face analysis and matching
#[derive(Debug, Default, Deserialize)]
pub struct FaceFileConfig {
    /// Face-analysis sidecar base URL
    pub analyzer_url: Option<String>,
    pub match_threshold: Option<f32>,
    /// "first_match" or "nearest"
    pub match_policy: Option<String>,
    pub frames_threshold: Option<u32>,
    pub padding: Option<f32>,
    pub min_face_size: Option<f32>,
    pub staleness_minutes: Option<i64>,
    /// Presence check interval in milliseconds (0 disables)
    pub presence_interval_ms: Option<u64>,
    pub absence_frames: Option<u32>,
}

/// Speech recognition
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub enabled: Option<bool>,
    /// BCP-47 language tag (e.g. "az-AZ")
    pub language: Option<String>,
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub settle_ms: Option<u64>,
    pub retry_ms: Option<u64>,
    pub vad_threshold: Option<f32>,
}

/// Remote response service
#[derive(Debug, Default, Deserialize)]
pub struct ResponseFileConfig {
    pub webhook_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Past turns sent as context
    pub history_turns: Option<usize>,
}

/// Barge-in detection
#[derive(Debug, Default, Deserialize)]
pub struct InterruptFileConfig {
    pub enabled: Option<bool>,
    pub energy_threshold: Option<f32>,
    pub min_speech_ms: Option<u64>,
}

/// Local utterances
#[derive(Debug, Default, Deserialize)]
pub struct GreetingFileConfig {
    pub new_customer: Option<String>,
    pub returning: Option<String>,
    pub apology: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub enabled: Option<bool>,
    /// API server port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConciergeConfigFile::default()` if the file doesn't exist or
/// can't be parsed.
pub fn load_config_file() -> ConciergeConfigFile {
    config_file_path().map_or_else(ConciergeConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path
pub fn load_from(path: &Path) -> ConciergeConfigFile {
    if !path.exists() {
        return ConciergeConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConciergeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConciergeConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/kiosk/concierge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("kiosk")
            .join("concierge")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let parsed: ConciergeConfigFile = toml::from_str(
            r#"
            [face]
            match_policy = "nearest"
            staleness_minutes = 45

            [greeting]
            returning = "Welcome back!"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.face.match_policy.as_deref(), Some("nearest"));
        assert_eq!(parsed.face.staleness_minutes, Some(45));
        assert_eq!(parsed.greeting.returning.as_deref(), Some("Welcome back!"));
        assert!(parsed.camera.snapshot_url.is_none());
    }

    #[test]
    fn test_bad_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "face = [not toml").unwrap();

        let parsed = load_from(&path);
        assert!(parsed.face.match_threshold.is_none());
    }
}
