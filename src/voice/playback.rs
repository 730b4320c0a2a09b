//! Gapless playback of synthesized speech
//!
//! [`PlaybackScheduler`] places each decoded chunk right after the previous
//! one on the sink's clock and tracks every chunk still playing, so a barge-in
//! can cancel them all at once. [`SpeakerOutput`] is the cpal-backed sink: a
//! small mixer whose clock is the number of frames rendered so far.

use std::collections::BTreeMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::codec::AudioBuffer;
use crate::{Error, Result};

/// Identifies one scheduled chunk
pub type PlaybackId = u64;

/// A playback device with start-time semantics
///
/// Implementations report each chunk that plays to its end exactly once on
/// the completion channel they were created with. Stopped chunks are never
/// reported.
pub trait PlaybackSink: Send {
    /// Current position of the playback clock in seconds
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start at `start_time` on the playback clock
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the buffer
    fn start(&mut self, id: PlaybackId, buffer: AudioBuffer, start_time: f64) -> Result<()>;

    /// Stop a chunk immediately, without a completion report
    fn stop(&mut self, id: PlaybackId);

    /// Release the device
    fn close(&mut self);
}

/// One chunk scheduled on the sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,

    /// Start time on the sink clock, in seconds
    pub start_time: f64,

    /// Length of the chunk in seconds
    pub duration: f64,
}

impl PlaybackHandle {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Schedules speech chunks back to back on a [`PlaybackSink`]
pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    active: BTreeMap<PlaybackId, PlaybackHandle>,
    next_playback_time: f64,
    next_id: PlaybackId,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            active: BTreeMap::new(),
            next_playback_time: 0.0,
            next_id: 1,
        }
    }

    /// Schedule a chunk to start once the previous one ends
    ///
    /// # Errors
    ///
    /// Returns error if the sink rejects the buffer; nothing is tracked then
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Result<PlaybackHandle> {
        let start_time = self.next_playback_time.max(self.sink.current_time());
        let duration = buffer.duration();
        let id = self.next_id;

        self.sink.start(id, buffer, start_time)?;

        self.next_id += 1;
        self.next_playback_time = start_time + duration;

        let handle = PlaybackHandle {
            id,
            start_time,
            duration,
        };
        self.active.insert(id, handle);

        tracing::trace!(id, start_time, duration, active = self.active.len(), "chunk scheduled");
        Ok(handle)
    }

    /// Record natural completion of a chunk
    ///
    /// Returns `false` if the chunk was no longer tracked (already finished
    /// or cancelled by an interruption).
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if removed {
            tracing::trace!(id, active = self.active.len(), "chunk finished");
        }
        removed
    }

    /// Cancel every chunk in flight and reset the clock
    ///
    /// Returns the number of chunks stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            self.sink.stop(id);
        }
        self.next_playback_time = 0.0;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Cancel everything and release the sink
    pub fn close(&mut self) {
        self.interrupt();
        self.sink.close();
    }

    /// Whether any chunk is still playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Earliest start time for the next chunk
    #[must_use]
    pub const fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    /// Chunks currently in flight, in scheduling order
    pub fn active(&self) -> impl Iterator<Item = &PlaybackHandle> {
        self.active.values()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// A chunk queued in the mixer
struct Voice {
    id: PlaybackId,
    samples: Vec<f32>,
    start_frame: u64,
    cursor: usize,
}

/// Sample-clock mixer shared between the sink and the audio thread
struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    completions: mpsc::UnboundedSender<PlaybackId>,
}

impl Mixer {
    fn new(sample_rate: u32, completions: mpsc::UnboundedSender<PlaybackId>) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
            completions,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn add(&mut self, id: PlaybackId, buffer: AudioBuffer, start_time: f64) {
        let start_frame = (start_time.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.voices.push(Voice {
            id,
            samples: buffer.into_mono(),
            start_frame,
            cursor: 0,
        });
    }

    fn remove(&mut self, id: PlaybackId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fill an interleaved output block and report finished voices
    fn render(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let now = self.frames_rendered;
            let mut mixed = 0.0_f32;

            for voice in &mut self.voices {
                if voice.start_frame <= now && voice.cursor < voice.samples.len() {
                    mixed += voice.samples[voice.cursor];
                    voice.cursor += 1;
                }
            }

            for sample in frame.iter_mut() {
                *sample = mixed.clamp(-1.0, 1.0);
            }
            self.frames_rendered += 1;
        }

        let completions = &self.completions;
        let rendered = self.frames_rendered;
        self.voices.retain(|voice| {
            let finished = voice.cursor >= voice.samples.len() && voice.start_frame <= rendered;
            if finished {
                let _ = completions.send(voice.id);
            }
            !finished
        });
    }
}

/// Plays scheduled buffers on the default output device
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    stop: Option<std_mpsc::Sender<()>>,
}

impl SpeakerOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub async fn open_default(
        sample_rate: u32,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, completions)));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let thread_mixer = Arc::clone(&mixer);
        thread::Builder::new()
            .name("salin-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, thread_mixer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("playback thread exited during setup".to_string()))??;

        Ok(Self {
            mixer,
            stop: Some(stop_tx),
        })
    }
}

impl PlaybackSink for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.current_time())
    }

    fn start(&mut self, id: PlaybackId, buffer: AudioBuffer, start_time: f64) -> Result<()> {
        if self.stop.is_none() {
            return Err(Error::Audio("playback device closed".to_string()));
        }
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?;
        mixer.add(id, buffer, start_time);
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(id);
        }
    }

    fn close(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.clear();
        }
        // Dropping the sender releases the playback thread
        self.stop.take();
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build and start the cpal output stream on the current thread
fn build_output_stream(sample_rate: u32, mixer: Arc<Mutex<Mixer>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| c.channels() == 2 && supports_rate(c))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Ok(mut mixer) = mixer.lock() {
                    mixer.render(data, channels);
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}
