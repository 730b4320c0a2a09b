//! Session orchestrator
//!
//! [`Assistant`] owns the session lifecycle. `start()` acquires the devices,
//! opens the live session and spawns a single task that owns every piece of
//! per-session state; that task is the only place events are handled, so
//! capture frames, server events and playback completions never race each
//! other. Observers read [`AssistantState`] through a watch channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::Result;
use crate::config::Config;
use crate::session::{
    EventStream, ServerEvent, SessionConnector, SessionSender, outbound_channel,
};
use crate::voice::{
    AudioDevices, AudioFrame, CapturePipeline, CaptureStream, PlaybackId, PlaybackScheduler,
    TranscriptionEntry, TurnStateMachine, WakeTransition, decode, decode_audio_data,
};

/// Lifecycle of the live session as seen from outside
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    /// Badge text for a status indicator
    #[must_use]
    pub const fn label(self, is_awake: bool) -> &'static str {
        match (self, is_awake) {
            (Self::Connected, true) => "Awake",
            (Self::Connected, false) => "Standby",
            _ => "Offline",
        }
    }

    /// Whether a session is starting or running
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

/// Everything an observer can see
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantState {
    pub status: SessionStatus,
    pub is_speaking: bool,
    pub is_awake: bool,

    /// RMS of the latest microphone frame
    pub volume: f32,

    /// Committed transcript, oldest first
    pub history: Vec<TranscriptionEntry>,
}

/// A running session task
struct ActiveSession {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    config: Config,
    connector: Arc<dyn SessionConnector>,
    devices: Arc<dyn AudioDevices>,
    state: watch::Sender<AssistantState>,

    /// Bumped by every start and stop; stale work compares against it
    generation: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply `update` only if `generation` still owns the state
    fn publish<F>(&self, generation: u64, update: F)
    where
        F: FnOnce(&mut AssistantState) -> bool,
    {
        self.state.send_if_modified(|state| self.is_current(generation) && update(state));
    }
}

/// Voice translation assistant
#[derive(Clone)]
pub struct Assistant {
    inner: Arc<Inner>,
}

impl Assistant {
    #[must_use]
    pub fn new(
        config: Config,
        connector: Arc<dyn SessionConnector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (state, _) = watch::channel(AssistantState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                devices,
                state,
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AssistantState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn state(&self) -> AssistantState {
        self.inner.state.borrow().clone()
    }

    /// Start a session
    ///
    /// Does nothing if a session is already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone, speaker or session cannot be opened.
    /// The status is `Error` afterwards and nothing is left running.
    pub async fn start(&self) -> Result<()> {
        let mut generation = 0;
        let claimed = self.inner.state.send_if_modified(|state| {
            if state.status.is_active() {
                return false;
            }
            generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.status = SessionStatus::Connecting;
            state.is_speaking = false;
            state.is_awake = false;
            state.volume = 0.0;
            true
        });
        if !claimed {
            tracing::debug!("session already active, ignoring start");
            return Ok(());
        }

        // Reap a session task that ended on its own
        let stale = self.inner.active.lock().await.take();
        if let Some(stale) = stale {
            let _ = stale.task.await;
        }

        match self.open_session(generation).await {
            Ok(Some(context)) => {
                let mut active = self.inner.active.lock().await;
                if !self.inner.is_current(generation) {
                    tracing::debug!("session stopped while starting");
                    drop(active);
                    context.teardown(Outcome::Stopped).await;
                    return Ok(());
                }

                let (shutdown, shutdown_rx) = oneshot::channel();
                let task = tokio::spawn(context.run(shutdown_rx));
                *active = Some(ActiveSession { shutdown, task });
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "failed to start session");
                self.inner.publish(generation, |state| {
                    state.status = SessionStatus::Error;
                    true
                });
                Err(e)
            }
        }
    }

    /// Acquire devices and open the remote session
    ///
    /// Returns `None` if a stop arrived while devices or the handshake were pending.
    async fn open_session(&self, generation: u64) -> Result<Option<SessionContext>> {
        let config = &self.inner.config;

        let mic = self
            .inner
            .devices
            .open_microphone(config.audio.capture_sample_rate, config.audio.frame_size)
            .await?;

        let (completions_tx, completions) = mpsc::unbounded_channel();
        let sink = self
            .inner
            .devices
            .open_speaker(config.audio.playback_sample_rate, completions_tx)
            .await?;
        let mut scheduler = PlaybackScheduler::new(sink);

        if !self.inner.is_current(generation) {
            scheduler.close();
            return Ok(None);
        }

        let (sender, outbound) = outbound_channel();
        let events = match self.inner.connector.open(&config.session, outbound).await {
            Ok(events) => events,
            Err(e) => {
                scheduler.close();
                return Err(e);
            }
        };

        if !self.inner.is_current(generation) {
            scheduler.close();
            drop(sender);
            events.close().await;
            return Ok(None);
        }

        tracing::info!(
            model = %config.session.model,
            capture_rate = config.audio.capture_sample_rate,
            playback_rate = config.audio.playback_sample_rate,
            "session opened, waiting for setup"
        );

        Ok(Some(SessionContext {
            inner: Arc::downgrade(&self.inner),
            generation,
            opened: false,
            mic,
            pipeline: CapturePipeline::new(config.audio.capture_sample_rate),
            sender: Some(sender),
            events,
            scheduler,
            completions,
            turn: TurnStateMachine::new(config.wake.clone()),
            playback_rate: config.audio.playback_sample_rate,
        }))
    }

    /// Stop the session and release every device
    ///
    /// Safe to call in any state, any number of times.
    #[allow(clippy::float_cmp)]
    pub async fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let active = self.inner.active.lock().await.take();
        if let Some(active) = active {
            let _ = active.shutdown.send(());
            if let Err(e) = active.task.await {
                tracing::warn!(error = %e, "session task did not exit cleanly");
            }
        }

        self.inner.state.send_if_modified(|state| {
            let changed = state.status != SessionStatus::Idle
                || state.is_speaking
                || state.is_awake
                || state.volume != 0.0;
            state.status = SessionStatus::Idle;
            state.is_speaking = false;
            state.is_awake = false;
            state.volume = 0.0;
            changed
        });
        tracing::info!("session stopped");
    }
}

/// Why a session task ended
#[derive(Debug)]
enum Outcome {
    /// Explicit stop
    Stopped,
    /// Remote closed the session
    Closed,
    /// Runtime failure
    Failed(String),
}

/// All per-session state, owned by the session task
///
/// Holds the assistant weakly: once every [`Assistant`] handle is gone the
/// shutdown sender drops with it and the task winds down.
struct SessionContext {
    inner: Weak<Inner>,
    generation: u64,
    /// Setup acknowledged by the server
    opened: bool,
    mic: CaptureStream,
    pipeline: CapturePipeline,
    sender: Option<SessionSender>,
    events: EventStream,
    scheduler: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<PlaybackId>,
    turn: TurnStateMachine,
    playback_rate: u32,
}

impl SessionContext {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break Outcome::Stopped,

                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(outcome) = self.handle_event(event).await {
                            break outcome;
                        }
                    }
                    None => break self.closed_outcome(),
                },

                Some(id) = self.completions.recv() => self.handle_completion(id),

                frame = self.mic.next_frame() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => break Outcome::Failed("microphone stream ended".to_string()),
                },
            }
        };

        self.teardown(outcome).await;
    }

    /// A close before setup completes means the session never opened
    fn closed_outcome(&self) -> Outcome {
        if self.opened {
            Outcome::Closed
        } else {
            Outcome::Failed("session closed before setup completed".to_string())
        }
    }

    /// Returns an outcome when the event ends the session
    async fn handle_event(&mut self, event: ServerEvent) -> Option<Outcome> {
        match event {
            ServerEvent::Opened => {
                tracing::info!("session connected");
                self.opened = true;
                self.publish(|state| {
                    state.status = SessionStatus::Connected;
                    true
                });
            }
            ServerEvent::AudioChunk(payload) => self.play_chunk(&payload).await,
            ServerEvent::InputFragment(text) => {
                tracing::trace!(%text, "input fragment");
                if let Some(transition) = self.turn.push_input(&text) {
                    let awake = matches!(transition, WakeTransition::Woke { .. });
                    self.publish(|state| {
                        state.is_awake = awake;
                        true
                    });
                }
            }
            ServerEvent::OutputFragment(text) => {
                tracing::trace!(%text, "output fragment");
                self.turn.push_output(&text);
            }
            ServerEvent::TurnComplete => {
                let entries = self.turn.complete_turn();
                if !entries.is_empty() {
                    tracing::debug!(count = entries.len(), "turn committed");
                    self.publish(|state| {
                        state.history.extend(entries);
                        true
                    });
                }
            }
            ServerEvent::Interrupted => {
                self.scheduler.interrupt();
                self.sync_speaking();
            }
            ServerEvent::Error(cause) => {
                tracing::error!(%cause, "session failed");
                return Some(Outcome::Failed(cause));
            }
            ServerEvent::Closed => {
                let outcome = self.closed_outcome();
                if let Outcome::Failed(cause) = &outcome {
                    tracing::error!(%cause, "session rejected");
                } else {
                    tracing::info!("session closed by remote");
                }
                return Some(outcome);
            }
        }
        None
    }

    /// Decode and schedule one speech chunk; a bad chunk is dropped alone
    async fn play_chunk(&mut self, payload: &str) {
        let bytes = match decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable audio chunk");
                return;
            }
        };

        let buffer = match decode_audio_data(bytes, self.playback_rate, 1).await {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed audio chunk");
                return;
            }
        };
        if buffer.is_empty() {
            return;
        }

        if let Err(e) = self.scheduler.schedule(buffer) {
            tracing::warn!(error = %e, "failed to schedule audio chunk");
        }
        self.sync_speaking();
    }

    fn handle_completion(&mut self, id: PlaybackId) {
        if self.scheduler.complete(id) {
            self.sync_speaking();
        }
    }

    #[allow(clippy::float_cmp)]
    fn handle_frame(&mut self, frame: &AudioFrame) {
        let captured = self.pipeline.process(frame);
        let volume = captured.volume;

        if let Some(sender) = &self.sender {
            sender.send(captured.blob);
        }

        self.publish(|state| {
            if state.volume == volume {
                return false;
            }
            state.volume = volume;
            true
        });
    }

    fn sync_speaking(&self) {
        let speaking = self.scheduler.is_speaking();
        self.publish(|state| {
            if state.is_speaking == speaking {
                return false;
            }
            state.is_speaking = speaking;
            true
        });
    }

    fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut AssistantState) -> bool,
    {
        if let Some(inner) = self.inner.upgrade() {
            inner.publish(self.generation, update);
        }
    }

    /// Release everything this session holds
    async fn teardown(mut self, outcome: Outcome) {
        self.scheduler.close();
        // Ending the outbound queue lets the connector close the channel cleanly
        self.sender.take();
        self.turn.reset();

        let status = match &outcome {
            Outcome::Stopped => None,
            Outcome::Closed => Some(SessionStatus::Idle),
            Outcome::Failed(_) => Some(SessionStatus::Error),
        };
        tracing::debug!(?outcome, "session torn down");

        if let Some(status) = status {
            self.publish(|state| {
                state.status = status;
                state.is_speaking = false;
                state.is_awake = false;
                state.volume = 0.0;
                true
            });
        }

        let Self { mic, events, .. } = self;
        drop(mic);
        events.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(SessionStatus::Connected.label(true), "Awake");
        assert_eq!(SessionStatus::Connected.label(false), "Standby");
        assert_eq!(SessionStatus::Connecting.label(true), "Offline");
        assert_eq!(SessionStatus::Idle.label(false), "Offline");
        assert_eq!(SessionStatus::Error.label(true), "Offline");
    }

    #[test]
    fn test_active_statuses() {
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Connected.is_active());
        assert!(!SessionStatus::Idle.is_active());
        assert!(!SessionStatus::Error.is_active());
    }

    #[test]
    fn test_state_serializes_for_observers() {
        let state = AssistantState {
            status: SessionStatus::Connected,
            is_awake: true,
            ..AssistantState::default()
        };
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["status"], "connected");
        assert_eq!(json["is_awake"], true);
        assert_eq!(json["history"], serde_json::json!([]));
    }
}
