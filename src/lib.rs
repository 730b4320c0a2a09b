//! Salin - voice-driven bilingual translation assistant
//!
//! The core bridges a live microphone feed, a bidirectional session with a
//! hosted speech model, and a speaker playback pipeline, while tracking a
//! wake/sleep state derived from transcribed speech.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  frames   ┌─────────────┐  blobs   ┌──────────────┐
//! │ Microphone ├──────────►│   Capture   ├─────────►│              │
//! └────────────┘           └─────────────┘          │   Session    │
//!                                                    │   channel    │
//! ┌────────────┐  buffers  ┌─────────────┐  audio   │              │
//! │  Speaker   │◄──────────┤  Playback   │◄─────────┤  (live API)  │
//! └────────────┘           └─────────────┘          │              │
//!                          ┌─────────────┐  text    │              │
//!                          │  Wake/turn  │◄─────────┤              │
//!                          └──────┬──────┘          └──────────────┘
//!                                 ▼
//!                    status, wake state, history
//! ```

pub mod assistant;
pub mod config;
pub mod error;
pub mod session;
pub mod voice;

pub use assistant::{Assistant, AssistantState, SessionStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use session::{LiveConfig, LiveConnector, ServerEvent, SessionConnector};
pub use voice::{CpalDevices, Speaker, TranscriptionEntry, WakeState};
