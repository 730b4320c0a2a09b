//! Shared test utilities
//!
//! Hardware-free stand-ins for the audio devices and the remote session.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use salin::config::file::SalinConfigFile;
use salin::session::{EventStream, OutboundQueue};
use salin::voice::{
    AudioBuffer, AudioDevices, AudioFrame, CaptureStream, PlaybackId, PlaybackSink,
};
use salin::{AssistantState, Config, Error, LiveConfig, Result, ServerEvent, SessionConnector};

/// Default configuration with no file and no environment
#[must_use]
pub fn test_config() -> Config {
    Config::from_sources(SalinConfigFile::default(), |_| None).expect("default config is valid")
}

/// What the fake speaker has been asked to do
#[derive(Debug, Default)]
pub struct SpeakerLog {
    /// (id, start time, duration)
    pub started: Vec<(PlaybackId, f64, f64)>,
    pub stopped: Vec<PlaybackId>,
    pub closed: usize,
    pub clock: f64,
    completions: Option<mpsc::UnboundedSender<PlaybackId>>,
}

/// Playback sink with a manual clock
pub struct FakeSink {
    log: Arc<Mutex<SpeakerLog>>,
}

impl FakeSink {
    #[must_use]
    pub fn new(log: Arc<Mutex<SpeakerLog>>) -> Self {
        Self { log }
    }
}

impl PlaybackSink for FakeSink {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().clock
    }

    fn start(&mut self, id: PlaybackId, buffer: AudioBuffer, start_time: f64) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .started
            .push((id, start_time, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

/// Audio devices backed by channels the test controls
#[derive(Default)]
pub struct FakeDevices {
    pub fail_microphone: bool,
    pub speaker: Arc<Mutex<SpeakerLog>>,
    mic: Mutex<Option<mpsc::UnboundedSender<AudioFrame>>>,
    pub microphone_opens: AtomicUsize,
}

impl FakeDevices {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn without_microphone() -> Arc<Self> {
        Arc::new(Self {
            fail_microphone: true,
            ..Self::default()
        })
    }

    /// Feed a frame into the open microphone
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        self.mic
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Whether the current microphone stream has been released
    #[must_use]
    pub fn microphone_released(&self) -> bool {
        self.mic
            .lock()
            .unwrap()
            .as_ref()
            .is_none_or(mpsc::UnboundedSender::is_closed)
    }

    /// Report natural completion of a chunk
    pub fn finish_chunk(&self, id: PlaybackId) {
        if let Some(tx) = &self.speaker.lock().unwrap().completions {
            let _ = tx.send(id);
        }
    }

    /// Advance the fake playback clock
    pub fn set_clock(&self, seconds: f64) {
        self.speaker.lock().unwrap().clock = seconds;
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn open_microphone(
        &self,
        _sample_rate: u32,
        _frame_size: usize,
    ) -> Result<CaptureStream> {
        if self.fail_microphone {
            return Err(Error::Microphone("permission denied".to_string()));
        }
        self.microphone_opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.mic.lock().unwrap() = Some(tx);
        Ok(CaptureStream::from_receiver(rx))
    }

    async fn open_speaker(
        &self,
        _sample_rate: u32,
        completions: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn PlaybackSink>> {
        self.speaker.lock().unwrap().completions = Some(completions);
        Ok(Box::new(FakeSink::new(Arc::clone(&self.speaker))))
    }
}

/// Session connector driven by the test
#[derive(Default)]
pub struct ScriptedConnector {
    pub fail: bool,
    pub opens: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
    outbound: Mutex<Option<OutboundQueue>>,
    config: Mutex<Option<LiveConfig>>,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Push an event as if the server sent it
    ///
    /// Returns `false` once the session has been torn down.
    pub fn emit(&self, event: ServerEvent) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// End the event stream without a close message
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }

    /// Take the outbound queue handed to the last open
    pub fn take_outbound(&self) -> Option<OutboundQueue> {
        self.outbound.lock().unwrap().take()
    }

    /// Config passed to the last open
    pub fn last_config(&self) -> Option<LiveConfig> {
        self.config.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn open(&self, config: &LiveConfig, outbound: OutboundQueue) -> Result<EventStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::SessionOpen("handshake rejected".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        *self.outbound.lock().unwrap() = Some(outbound);
        *self.config.lock().unwrap() = Some(config.clone());
        Ok(EventStream::new(rx))
    }
}

/// Wait until the observed state satisfies `predicate`
pub async fn wait_for<F>(rx: &mut watch::Receiver<AssistantState>, predicate: F) -> AssistantState
where
    F: FnMut(&AssistantState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("assistant dropped")
        .clone()
}

/// Base64 PCM payload of `samples` 16-bit samples
#[must_use]
pub fn pcm_payload(samples: usize, value: i16) -> String {
    use base64::Engine;

    let bytes: Vec<u8> = std::iter::repeat_n(value.to_le_bytes(), samples)
        .flatten()
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Poll `condition` until it holds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
