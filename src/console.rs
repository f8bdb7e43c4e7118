use crate::status::UiEvent;
use std::io::Write;
use tokio::sync::mpsc;

/// Render UI events to stdout until the session goes away
///
/// Logs go to stderr, so stdout only ever carries what the user should read.
pub async fn render(mut rx: mpsc::UnboundedReceiver<UiEvent>) {
    let mut in_reply = false;

    while let Some(event) = rx.recv().await {
        let mut out = std::io::stdout().lock();
        let result = match event {
            UiEvent::Status(status) => {
                if in_reply {
                    in_reply = false;
                    let _ = writeln!(out);
                }
                writeln!(out, "[{}]", status)
            }
            UiEvent::Transcript(text) => writeln!(out, "You: {}", text.trim()),
            UiEvent::ReplyDelta(delta) => {
                let prefix = if in_reply { "" } else { "Assistant: " };
                in_reply = true;
                write!(out, "{}{}", prefix, delta)
            }
            UiEvent::ReplyDone => {
                if in_reply {
                    in_reply = false;
                    writeln!(out)
                } else {
                    Ok(())
                }
            }
        };

        if let Err(e) = result.and_then(|_| out.flush()) {
            tracing::warn!("Failed to write to console: {}", e);
        }
    }
}
