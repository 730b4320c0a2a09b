//! PCM codec between float samples and the live session wire encoding
//!
//! Outbound frames are quantized to 16-bit little-endian PCM and base64
//! encoded. Inbound speech arrives the same way and is unpacked back into
//! float buffers for playback.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// One capture frame of mono float samples in [-1, 1]
pub type AudioFrame = Vec<f32>;

/// Encoded audio ready to hand to the session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    /// Base64 of 16-bit signed little-endian PCM
    pub data: String,

    /// MIME-like tag, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Decoded audio ready to be scheduled on a speaker
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate or channel count is zero, or the
    /// sample count is not a whole number of frames
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(Error::Decode(format!(
                "invalid buffer format: {sample_rate} Hz, {channels} channels"
            )));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(Error::Decode(format!(
                "{} samples do not fill {channels} channels",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Collapse to a single channel by averaging each frame
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples;
        }
        let channels = usize::from(self.channels);
        self.samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Quantize a float frame to 16-bit PCM and wrap it for the wire
#[must_use]
pub fn encode(frame: &[f32], sample_rate: u32) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }

    EncodedBlob {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={sample_rate}"),
    }
}

/// Unpack a base64 payload into raw bytes
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload)
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))
}

/// Interpret raw bytes as 16-bit little-endian PCM and build a playable buffer
///
/// Empty input yields a zero-length buffer.
///
/// # Errors
///
/// Returns error if the byte count is not a whole number of samples or frames
pub async fn decode_audio_data(
    bytes: Vec<u8>,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd PCM payload length: {} bytes",
            bytes.len()
        )));
    }

    let samples = tokio::task::spawn_blocking(move || {
        bytes
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
            .collect::<Vec<f32>>()
    })
    .await
    .map_err(|e| Error::Decode(format!("decode task failed: {e}")))?;

    AudioBuffer::new(samples, sample_rate, channels)
}

/// Scale a [-1, 1] float sample to i16, clipping out-of-range input
#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}
