use std::fmt;

/// User-facing status line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Recording,
    Processing,
    MicrophoneDenied,
    ConnectionClosed,
    PlaybackUnsupported,
    ServerError(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => f.write_str("Tap the mic to begin speaking."),
            Status::Recording => f.write_str("Recording... Speak naturally."),
            Status::Processing => f.write_str("Processing your response..."),
            Status::MicrophoneDenied => f.write_str("Microphone access denied."),
            Status::ConnectionClosed => f.write_str("Connection closed. Reload to reconnect."),
            Status::PlaybackUnsupported => {
                f.write_str("Audio playback is not supported on this device.")
            }
            Status::ServerError(message) => write!(f, "Server error: {}", message),
        }
    }
}

/// Updates the session pushes to whatever renders the UI
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiEvent {
    Status(Status),
    Transcript(String),
    ReplyDelta(String),
    ReplyDone,
}
