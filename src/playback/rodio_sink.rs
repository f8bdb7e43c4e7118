use super::media::{MediaReader, MediaStream};
use super::sink::FragmentSink;
use crate::messages::{Fragment, SinkReady};
use anyhow::Result;
use rodio::{OutputStream, OutputStreamBuilder};
use tokio::sync::{mpsc, oneshot};

enum SinkCommand {
    Append(Fragment),
    EndOfStream,
    Discard,
}

enum PlayerCommand {
    Play(MediaReader),
    Stop,
}

/// Streaming playback sink on the default output device
///
/// Two dedicated threads back the sink. The append thread writes fragments
/// into the current turn's `MediaStream` and acknowledges each one with a
/// `SinkReady`. The player thread owns the rodio output and starts decoding a
/// turn as soon as its first fragment is appended, so audio plays while the
/// rest is still arriving. A new turn replaces whatever the previous one was
/// still playing; a discarded turn is silenced.
pub struct RodioSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
}

impl RodioSink {
    /// Open the default output device, failing if playback is unavailable
    pub async fn open(ready_tx: mpsc::UnboundedSender<SinkReady>) -> Result<Self> {
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();

        std::thread::spawn(move || {
            let mut stream = match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(anyhow::anyhow!(
                        "Failed to open audio output: {}",
                        e
                    )));
                    return;
                }
            };
            stream.log_on_drop(false);

            run_player(stream, player_rx);
        });

        opened_rx
            .await
            .map_err(|e| anyhow::anyhow!("Playback thread exited during startup: {}", e))??;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || run_appender(rx, ready_tx, player_tx));

        tracing::info!("Audio playback ready");
        Ok(Self { tx })
    }
}

fn run_appender(
    mut rx: mpsc::UnboundedReceiver<SinkCommand>,
    ready_tx: mpsc::UnboundedSender<SinkReady>,
    player_tx: mpsc::UnboundedSender<PlayerCommand>,
) {
    let mut current: Option<MediaStream> = None;

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            SinkCommand::Append(fragment) => {
                let media = current.get_or_insert_with(|| {
                    let (media, reader) = MediaStream::new();
                    if player_tx.send(PlayerCommand::Play(reader)).is_err() {
                        tracing::warn!("Player thread is gone, reply audio will not play");
                    }
                    media
                });
                media.push(fragment.as_bytes());

                if ready_tx.send(SinkReady).is_err() {
                    break;
                }
            }
            SinkCommand::EndOfStream => {
                // Dropping the writer lets the decoder reach end of file
                current = None;
            }
            SinkCommand::Discard => {
                current = None;
                let _ = player_tx.send(PlayerCommand::Stop);
            }
        }
    }

    tracing::debug!("Playback append thread exiting");
}

fn run_player(stream: OutputStream, mut rx: mpsc::UnboundedReceiver<PlayerCommand>) {
    let mut playing: Option<rodio::Sink> = None;

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            PlayerCommand::Play(reader) => {
                if let Some(previous) = playing.take() {
                    if !previous.empty() {
                        tracing::debug!("Cutting off previous reply playback");
                    }
                }

                // Blocks until the decoder has seen enough of the stream to start
                match rodio::play(stream.mixer(), reader) {
                    Ok(sink) => playing = Some(sink),
                    Err(e) => tracing::warn!("Failed to play reply audio: {}", e),
                }
            }
            PlayerCommand::Stop => {
                if let Some(sink) = playing.take() {
                    sink.stop();
                }
            }
        }
    }

    tracing::debug!("Playback thread exiting");
}

impl FragmentSink for RodioSink {
    fn append(&mut self, fragment: Fragment) -> Result<()> {
        self.tx
            .send(SinkCommand::Append(fragment))
            .map_err(|e| anyhow::anyhow!("Failed to send append command: {}", e))
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.tx
            .send(SinkCommand::EndOfStream)
            .map_err(|e| anyhow::anyhow!("Failed to send end of stream command: {}", e))
    }

    fn discard(&mut self) -> Result<()> {
        self.tx
            .send(SinkCommand::Discard)
            .map_err(|e| anyhow::anyhow!("Failed to send discard command: {}", e))
    }
}
