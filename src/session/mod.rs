//! Live session channel
//!
//! The remote speech model is reached through a [`SessionConnector`]. Opening
//! a session hands the connector an [`OutboundQueue`] of encoded audio and
//! returns an [`EventStream`] of [`ServerEvent`]s. The wire adapter translates
//! raw server payloads into this closed event set so nothing downstream
//! depends on the wire shape.

mod live;
pub mod wire;

pub use live::LiveConnector;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::voice::EncodedBlob;

/// Model setup sent when a session opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// System instruction text
    pub system_instruction: String,

    /// Request transcripts of user speech
    pub input_transcription: bool,

    /// Request transcripts of model speech
    pub output_transcription: bool,
}

/// Events pushed by the remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Setup acknowledged; audio may flow
    Opened,
    /// Base64 PCM speech from the model
    AudioChunk(String),
    /// Transcript of user speech
    InputFragment(String),
    /// Transcript of model speech
    OutputFragment(String),
    /// The model finished its turn
    TurnComplete,
    /// User barged in over model speech
    Interrupted,
    /// Transport or protocol failure; terminal
    Error(String),
    /// Remote closed the session
    Closed,
}

/// Sending half of the outbound audio queue
///
/// Sends never block and are never dropped while the session is alive:
/// anything queued before the session is open is delivered once it is.
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::UnboundedSender<EncodedBlob>,
}

impl SessionSender {
    /// Queue an encoded frame for the session
    ///
    /// Returns `false` if the session has already gone away.
    pub fn send(&self, blob: EncodedBlob) -> bool {
        if self.tx.send(blob).is_err() {
            tracing::trace!("session gone, dropping audio frame");
            return false;
        }
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the outbound audio queue, consumed by the connector
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<EncodedBlob>,
}

impl OutboundQueue {
    /// Next queued frame; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<EncodedBlob> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued
    pub fn try_recv(&mut self) -> Option<EncodedBlob> {
        self.rx.try_recv().ok()
    }
}

/// Create a linked sender and outbound queue
#[must_use]
pub fn outbound_channel() -> (SessionSender, OutboundQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SessionSender { tx }, OutboundQueue { rx })
}

/// How long [`EventStream::close`] waits for the connector to finish
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Stream of server events for one session
///
/// Dropping the stream aborts the connector's tasks, so no event can arrive
/// after teardown. [`EventStream::close`] gives them a moment to say goodbye
/// to the server first.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl EventStream {
    #[must_use]
    pub const fn new(rx: mpsc::UnboundedReceiver<ServerEvent>) -> Self {
        Self {
            rx,
            tasks: Vec::new(),
        }
    }

    /// Tie a background task's lifetime to this stream
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Next event; `None` once the connector has stopped
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Wait up to [`CLOSE_GRACE`] for the connector's tasks, then abort them
    ///
    /// The outbound queue should already be closed so the writer can send
    /// its close frame.
    pub async fn close(mut self) {
        self.rx.close();

        let tasks = std::mem::take(&mut self.tasks);
        if tasks.is_empty() {
            return;
        }

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(CLOSE_GRACE, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::debug!("session tasks still running after close, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens live sessions with the remote model
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session, draining `outbound` into it once the setup is accepted
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SessionOpen`] if the connection cannot be established
    async fn open(&self, config: &LiveConfig, outbound: OutboundQueue) -> Result<EventStream>;
}
