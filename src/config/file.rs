//! TOML configuration file loading
//!
//! Supports `~/.config/salin/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SalinConfigFile {
    /// Live session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Wake and sleep phrases
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Audio device configuration
    #[serde(default)]
    pub audio: AudioFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// API key for the hosted speech model
    pub api_key: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-12-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,

    /// Replacement system instruction
    pub system_instruction: Option<String>,

    /// WebSocket endpoint override
    pub endpoint: Option<String>,
}

/// Wake/sleep phrase configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub wake_phrases: Option<Vec<String>>,
    pub sleep_phrases: Option<Vec<String>>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Microphone sample rate in Hz
    pub capture_sample_rate: Option<u32>,

    /// Speaker sample rate in Hz
    pub playback_sample_rate: Option<u32>,

    /// Samples per capture frame
    pub frame_size: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SalinConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SalinConfigFile {
    config_file_path().map_or_else(SalinConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `SalinConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> SalinConfigFile {
    if !path.exists() {
        return SalinConfigFile::default();
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
                SalinConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SalinConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/salin/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("salin").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let file: SalinConfigFile = toml::from_str(
            r#"
            [session]
            voice = "Puck"

            [wake]
            wake_phrases = ["hey salin"]
            "#,
        )
        .unwrap();

        assert_eq!(file.session.voice.as_deref(), Some("Puck"));
        assert!(file.session.model.is_none());
        assert_eq!(file.wake.wake_phrases, Some(vec!["hey salin".to_string()]));
        assert!(file.audio.frame_size.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_file_from(&dir.path().join("absent.toml"));
        assert!(file.session.api_key.is_none());
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session\nvoice = ").unwrap();

        let file = load_config_file_from(&path);
        assert!(file.session.voice.is_none());
    }
}
