//! Voice processing module
//!
//! Handles microphone capture, PCM encoding, gapless playback scheduling and
//! the wake/turn state machine driven by live transcripts.

pub mod capture;
pub mod codec;
mod device;
pub mod playback;
pub mod turn;

pub use capture::{CaptureStream, CapturePipeline, CapturedFrame, rms, samples_to_wav};
pub use codec::{AudioBuffer, AudioFrame, EncodedBlob, decode, decode_audio_data, encode};
pub use device::{AudioDevices, CpalDevices};
pub use playback::{PlaybackHandle, PlaybackId, PlaybackScheduler, PlaybackSink, SpeakerOutput};
pub use turn::{
    Speaker, TranscriptBuffer, TranscriptionEntry, TurnStateMachine, WakeState, WakeTransition,
};

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech from the live model
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per capture frame
pub const FRAME_SIZE: usize = 4096;
