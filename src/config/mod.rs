//! Configuration management for Salin

pub mod file;

use secrecy::SecretString;

use crate::session::LiveConfig;
use crate::{Error, Result};

use file::SalinConfigFile;

/// Default live model identifier
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default live API WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Phrases that wake the assistant
pub const DEFAULT_WAKE_PHRASES: &[&str] = &["hey salin", "hey sali", "hello salin"];

/// Phrases that put the assistant back to sleep
pub const DEFAULT_SLEEP_PHRASES: &[&str] = &[
    "satisfied with my translation",
    "thank you salin",
    "thank you sali",
    "go to sleep",
];

/// Default translator persona and wake/sleep protocol
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are 'Salin', a friendly bilingual translator.

CURRENT STATE: You start in SILENT STANDBY (Sleeping).

WAKE PROTOCOL:
- Listen ONLY for \"Hey Salin\" or \"Hey Sali\".
- IGNORE all other speech while in STANDBY.
- When woken, say: \"Gising na ako! Ready to translate.\" or \"Salin is awake! How can I help?\"

ACTIVE PROTOCOL:
- Translate English to Filipino and Filipino to English instantly.
- Speak naturally and lively.

SLEEP PROTOCOL:
- If the user says \"I'm satisfied with my translation\", \"Thank you Salin\", or \"Thank you Sali\", you MUST stop translating.
- Acknowledge with: \"Sige, rest muna ako. Say 'Hey Salin' if you need me again!\"
- Immediately enter SILENT STANDBY and stop all further translation until the wake phrase is heard again.";

/// Salin configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Live session setup sent on open
    pub session: LiveConfig,

    /// API key for the hosted model
    pub api_key: Option<SecretString>,

    /// WebSocket endpoint of the live API
    pub endpoint: String,

    /// Wake/sleep phrase configuration
    pub wake: WakeConfig,

    /// Audio device configuration
    pub audio: AudioConfig,
}

/// Wake/sleep phrase configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeConfig {
    /// Lower-cased phrases that wake the assistant
    pub wake_phrases: Vec<String>,

    /// Lower-cased phrases that put it to sleep
    pub sleep_phrases: Vec<String>,
}

impl WakeConfig {
    /// Build from raw phrase lists, normalizing case and whitespace
    #[must_use]
    pub fn new(wake_phrases: Vec<String>, sleep_phrases: Vec<String>) -> Self {
        Self {
            wake_phrases: normalize_phrases(wake_phrases),
            sleep_phrases: normalize_phrases(sleep_phrases),
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            DEFAULT_SLEEP_PHRASES.iter().map(ToString::to_string).collect(),
        )
    }
}

/// Audio device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Microphone sample rate (16kHz for speech)
    pub capture_sample_rate: u32,

    /// Speaker sample rate (matches the model's speech output)
    pub playback_sample_rate: u32,

    /// Samples per capture frame
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: crate::voice::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: crate::voice::PLAYBACK_SAMPLE_RATE,
            frame_size: crate::voice::FRAME_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > toml > default.
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn from_sources<F>(fc: SalinConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.session.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let session = LiveConfig {
            model: env("SALIN_MODEL")
                .or(fc.session.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("SALIN_VOICE")
                .or(fc.session.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            system_instruction: env("SALIN_SYSTEM_INSTRUCTION")
                .or(fc.session.system_instruction)
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            input_transcription: true,
            output_transcription: true,
        };

        let endpoint = env("SALIN_ENDPOINT")
            .or(fc.session.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let defaults = WakeConfig::default();
        let wake = WakeConfig::new(
            env("SALIN_WAKE_PHRASES")
                .map(|s| split_list(&s))
                .or(fc.wake.wake_phrases)
                .unwrap_or(defaults.wake_phrases),
            env("SALIN_SLEEP_PHRASES")
                .map(|s| split_list(&s))
                .or(fc.wake.sleep_phrases)
                .unwrap_or(defaults.sleep_phrases),
        );

        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            capture_sample_rate: fc
                .audio
                .capture_sample_rate
                .unwrap_or(audio_defaults.capture_sample_rate),
            playback_sample_rate: fc
                .audio
                .playback_sample_rate
                .unwrap_or(audio_defaults.playback_sample_rate),
            frame_size: fc.audio.frame_size.unwrap_or(audio_defaults.frame_size),
        };

        let config = Self {
            session,
            api_key,
            endpoint,
            wake,
            audio,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the pipeline relies on
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.session.model.trim().is_empty() {
            return Err(Error::Config("model identifier is empty".to_string()));
        }
        if self.wake.wake_phrases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }
        if self.audio.frame_size == 0 {
            return Err(Error::Config("frame size must be positive".to_string()));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(Error::Config("sample rates must be positive".to_string()));
        }
        Ok(())
    }
}

/// Split a comma-separated list
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(ToString::to_string).collect()
}

/// Trim, lower-case and drop empty phrases
fn normalize_phrases(phrases: Vec<String>) -> Vec<String> {
    phrases
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}
