use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// One unit of binary audio data in transit
///
/// Fragments are immutable and cheap to clone; the payload is never inspected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment(Arc<[u8]>);

impl Fragment {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Fragment {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for Fragment {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

/// Commands for the Recorder service
pub enum RecorderCommand {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
}

/// Mic button state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Idle,
    Recording,
    Processing,
}

/// Events pushed by the server as JSON text frames
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Processing,
    Transcript { text: String },
    AssistantDelta { text: String },
    /// Base64 encoded audio (MP3)
    AudioChunk { data: String },
    Done,
    AudioChunkReceived { size: usize },
    ResetAck,
    Error { message: String },
    #[serde(other)]
    Unknown,
}

/// Control events sent to the server as JSON text frames
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Stop,
    Reset,
}

/// Everything the reader side of the channel reports
#[derive(Debug)]
pub enum ChannelEvent {
    Server(ServerEvent),
    Closed,
}

/// Notification from a playback sink that the last append has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkReady;
