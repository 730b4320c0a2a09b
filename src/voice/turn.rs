//! Wake/turn state machine
//!
//! Transcript fragments from the live session accumulate per turn. The input
//! side is scanned for wake and sleep phrases on every fragment; a turn
//! boundary commits whatever was accumulated as history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WakeConfig;

/// Whether the assistant is currently translating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeState {
    /// Standby: user speech is not recorded
    #[default]
    Asleep,
    /// Translating
    Awake,
}

/// A wake state change caused by an input fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeTransition {
    /// A wake phrase was heard while asleep
    Woke { phrase: String },
    /// A sleep phrase was heard while awake
    Slept { phrase: String },
}

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Model,
}

/// A committed line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionEntry {
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptionEntry {
    fn new(speaker: Speaker, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            speaker,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Text accumulated during the current turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptBuffer {
    /// Lower-cased user speech
    pub input: String,
    /// Model speech
    pub output: String,
}

impl TranscriptBuffer {
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}

/// Tracks wake state and assembles transcript entries per turn
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    config: WakeConfig,
    state: WakeState,
    buffer: TranscriptBuffer,
}

impl TurnStateMachine {
    #[must_use]
    pub fn new(config: WakeConfig) -> Self {
        tracing::debug!(
            wake_phrases = ?config.wake_phrases,
            sleep_phrases = ?config.sleep_phrases,
            "turn state machine initialized"
        );
        Self {
            config,
            state: WakeState::Asleep,
            buffer: TranscriptBuffer::default(),
        }
    }

    /// Append a user transcript fragment and apply any wake/sleep transition
    ///
    /// Phrases are matched against the whole accumulated input, so a phrase
    /// split across fragments is still detected. A transition clears the
    /// input buffer so the phrase cannot fire twice or be committed.
    pub fn push_input(&mut self, fragment: &str) -> Option<WakeTransition> {
        self.buffer.input.push_str(&fragment.to_lowercase());

        let transition = match self.state {
            WakeState::Asleep => find_phrase(&self.buffer.input, &self.config.wake_phrases)
                .map(|phrase| WakeTransition::Woke { phrase }),
            WakeState::Awake => find_phrase(&self.buffer.input, &self.config.sleep_phrases)
                .map(|phrase| WakeTransition::Slept { phrase }),
        };

        if let Some(transition) = &transition {
            self.state = match transition {
                WakeTransition::Woke { .. } => WakeState::Awake,
                WakeTransition::Slept { .. } => WakeState::Asleep,
            };
            self.buffer.input.clear();
            tracing::info!(?transition, "wake state changed");
        }
        transition
    }

    /// Append a model transcript fragment
    pub fn push_output(&mut self, fragment: &str) {
        self.buffer.output.push_str(fragment);
    }

    /// Close the turn, returning the entries it produced
    ///
    /// User text is kept only while awake; model text is always kept so the
    /// assistant's own sleep acknowledgement lands in history.
    pub fn complete_turn(&mut self) -> Vec<TranscriptionEntry> {
        let mut entries = Vec::with_capacity(2);

        let user_text = self.buffer.input.trim();
        if !user_text.is_empty() {
            if self.state == WakeState::Awake {
                entries.push(TranscriptionEntry::new(Speaker::User, user_text.to_string()));
            } else {
                tracing::debug!(chars = user_text.len(), "discarding speech heard in standby");
            }
        }

        let model_text = self.buffer.output.trim();
        if !model_text.is_empty() {
            entries.push(TranscriptionEntry::new(Speaker::Model, model_text.to_string()));
        }

        self.buffer.clear();
        entries
    }

    /// Return to standby with empty buffers
    pub fn reset(&mut self) {
        self.state = WakeState::Asleep;
        self.buffer.clear();
    }

    #[must_use]
    pub const fn state(&self) -> WakeState {
        self.state
    }

    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.state == WakeState::Awake
    }

    #[must_use]
    pub const fn buffer(&self) -> &TranscriptBuffer {
        &self.buffer
    }
}

/// First configured phrase contained in `text`
fn find_phrase(text: &str, phrases: &[String]) -> Option<String> {
    phrases.iter().find(|p| text.contains(p.as_str())).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnStateMachine {
        TurnStateMachine::new(WakeConfig::default())
    }

    fn awake_machine() -> TurnStateMachine {
        let mut m = machine();
        m.push_input("hey salin");
        assert!(m.is_awake());
        m
    }

    #[test]
    fn test_starts_asleep() {
        let m = machine();
        assert_eq!(m.state(), WakeState::Asleep);
        assert_eq!(m.buffer(), &TranscriptBuffer::default());
    }

    #[test]
    fn test_wake_phrase_split_across_fragments() {
        let mut m = machine();

        assert_eq!(m.push_input("hey "), None);
        assert_eq!(m.state(), WakeState::Asleep);

        let transition = m.push_input("Salin, translate this");
        assert_eq!(
            transition,
            Some(WakeTransition::Woke {
                phrase: "hey salin".to_string()
            })
        );
        assert_eq!(m.state(), WakeState::Awake);
        assert_eq!(m.buffer().input, "");
    }

    #[test]
    fn test_wake_phrase_while_awake_is_noop() {
        let mut m = awake_machine();

        assert_eq!(m.push_input("hey salin again"), None);
        assert!(m.is_awake());
        assert_eq!(m.buffer().input, "hey salin again");

        let entries = m.complete_turn();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "hey salin again");
    }

    #[test]
    fn test_sleep_phrase_while_asleep_is_noop() {
        let mut m = machine();
        assert_eq!(m.push_input("thank you salin"), None);
        assert_eq!(m.state(), WakeState::Asleep);
        assert_eq!(m.buffer().input, "thank you salin");
    }

    #[test]
    fn test_sleep_keeps_model_acknowledgement() {
        let mut m = awake_machine();
        m.push_output("Sige, rest muna ako.");

        let transition = m.push_input("thank you salin");
        assert!(matches!(transition, Some(WakeTransition::Slept { .. })));
        assert_eq!(m.state(), WakeState::Asleep);
        assert_eq!(m.buffer().input, "");

        let entries = m.complete_turn();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].speaker, Speaker::Model);
        assert_eq!(entries[0].text, "Sige, rest muna ako.");
    }

    #[test]
    fn test_standby_speech_not_recorded() {
        let mut m = machine();
        m.push_input("what's the weather like");
        m.push_output("  ");

        assert!(m.complete_turn().is_empty());
        assert_eq!(m.buffer(), &TranscriptBuffer::default());
    }

    #[test]
    fn test_awake_turn_commits_user_then_model() {
        let mut m = awake_machine();
        m.push_input("  Good morning ");
        m.push_input("po");
        m.push_output("Magandang umaga ");
        m.push_output("po!");

        let entries = m.complete_turn();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[0].text, "good morning po");
        assert_eq!(entries[1].speaker, Speaker::Model);
        assert_eq!(entries[1].text, "Magandang umaga po!");
        assert_ne!(entries[0].id, entries[1].id);
        assert_eq!(m.buffer(), &TranscriptBuffer::default());
    }

    #[test]
    fn test_wake_fires_once_per_occurrence() {
        let mut m = machine();
        let mut wakes = 0;
        for fragment in ["hey", " sal", "in", " hey salin", " hey"] {
            if matches!(m.push_input(fragment), Some(WakeTransition::Woke { .. })) {
                wakes += 1;
            }
        }
        assert_eq!(wakes, 1);
    }

    #[test]
    fn test_reset_returns_to_standby() {
        let mut m = awake_machine();
        m.push_output("partial");
        m.reset();

        assert_eq!(m.state(), WakeState::Asleep);
        assert_eq!(m.buffer(), &TranscriptBuffer::default());
    }
}
