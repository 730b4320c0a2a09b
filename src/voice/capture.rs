//! Audio capture from microphone
//!
//! The cpal input stream lives on its own thread because cpal streams are not
//! `Send`. The callback slices incoming samples into fixed-size frames and
//! hands them to the async side over an unbounded channel, so the audio
//! thread never blocks on the session.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::codec::{AudioFrame, EncodedBlob, encode};
use crate::{Error, Result};

/// A live stream of fixed-size microphone frames
///
/// Dropping the stream stops the underlying device.
pub struct CaptureStream {
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    stop: Option<std_mpsc::Sender<()>>,
}

impl CaptureStream {
    /// Wrap an existing frame channel (no device attached)
    #[must_use]
    pub const fn from_receiver(frames: mpsc::UnboundedReceiver<AudioFrame>) -> Self {
        Self { frames, stop: None }
    }

    /// Wait for the next frame; `None` once the device has stopped
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }

    /// Open the default input device and start streaming frames
    ///
    /// # Errors
    ///
    /// Returns [`Error::Microphone`] if no usable input device can be opened
    pub async fn open_default(sample_rate: u32, frame_size: usize) -> Result<Self> {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("salin-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sample_rate, frame_size, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the owning CaptureStream is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })
            .map_err(|e| Error::Microphone(format!("failed to spawn capture thread: {e}")))?;

        // Device setup (and any permission prompt) happens off the runtime
        ready_rx
            .await
            .map_err(|_| Error::Microphone("capture thread exited during setup".to_string()))??;

        Ok(Self {
            frames: frame_rx,
            stop: Some(stop_tx),
        })
    }

    /// Whether a physical device backs this stream
    #[must_use]
    pub const fn is_device_backed(&self) -> bool {
        self.stop.is_some()
    }
}

/// Build and start the cpal input stream on the current thread
fn build_input_stream(
    sample_rate: u32,
    frame_size: usize,
    frames: mpsc::UnboundedSender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Microphone("no input device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Microphone(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: any channel count, downmixed in the callback
            device
                .supported_input_configs()
                .ok()?
                .find(|c| supports_rate(c))
        })
        .ok_or_else(|| Error::Microphone("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        frame_size,
        "audio capture initialized"
    );

    let mut framer = Framer::new(frame_size);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in framer.push(data, channels) {
                    // Receiver gone means the session is tearing down
                    if frames.send(frame).is_err() {
                        return;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Microphone(e.to_string()))?;

    stream.play().map_err(|e| Error::Microphone(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok(stream)
}

/// Accumulates device callbacks into fixed-size mono frames
struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn push(&mut self, data: &[f32], channels: usize) -> Vec<AudioFrame> {
        if channels <= 1 {
            self.pending.extend_from_slice(data);
        } else {
            self.pending.extend(
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        let mut ready = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            ready.push(std::mem::replace(&mut self.pending, rest));
        }
        ready
    }
}

/// One processed capture frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RMS amplitude of the frame
    pub volume: f32,

    /// Wire encoding of the frame
    pub blob: EncodedBlob,
}

/// Turns raw frames into volume readings and encoded blobs
#[derive(Debug, Clone, Copy)]
pub struct CapturePipeline {
    sample_rate: u32,
}

impl CapturePipeline {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Measure and encode one frame
    #[must_use]
    pub fn process(&self, frame: &[f32]) -> CapturedFrame {
        CapturedFrame {
            volume: rms(frame),
            blob: encode(frame, self.sample_rate),
        }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Root-mean-square amplitude of a frame
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
