//! Audio device seam

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture::CaptureStream;
use super::playback::{PlaybackId, PlaybackSink, SpeakerOutput};
use crate::Result;

/// Opens the microphone and speaker for a session
///
/// Opening may wait on the host (device setup, a permission prompt), so both
/// operations are async and must not block the runtime.
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// Start streaming fixed-size frames from the microphone
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Microphone`] if access is denied or no device exists
    async fn open_microphone(&self, sample_rate: u32, frame_size: usize) -> Result<CaptureStream>;

    /// Open a playback sink that reports finished chunks on `completions`
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened
    async fn open_speaker(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn PlaybackSink>>;
}

/// Default host devices through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalDevices;

#[async_trait]
impl AudioDevices for CpalDevices {
    async fn open_microphone(&self, sample_rate: u32, frame_size: usize) -> Result<CaptureStream> {
        CaptureStream::open_default(sample_rate, frame_size).await
    }

    async fn open_speaker(
        &self,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(SpeakerOutput::open_default(sample_rate, completions).await?))
    }
}
