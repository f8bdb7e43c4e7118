use crate::channel::{self, WsWriter};
use crate::config::Config;
use crate::input;
use crate::messages::{ChannelEvent, Fragment, SinkReady};
use crate::playback::RodioSink;
use crate::services::{Recorder, RecorderHandle};
use crate::session::{Session, SessionOptions};
use crate::status::UiEvent;

use anyhow::Result;
use tokio::sync::mpsc;

pub struct App {
    session: Session<WsWriter, RecorderHandle, RodioSink>,
    channel_rx: mpsc::Receiver<ChannelEvent>,
    ready_rx: mpsc::UnboundedReceiver<SinkReady>,
    toggle_rx: mpsc::Receiver<()>,
}

impl App {
    pub async fn new(config: Config, ui: mpsc::UnboundedSender<UiEvent>) -> Result<Self> {
        let (fragment_tx, fragment_rx) = mpsc::channel(100);
        let recorder = Self::setup_audio_pipeline(&config, fragment_tx);

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let sink = Self::setup_playback(&config, ready_tx).await;

        let (writer, channel_rx) = channel::connect(&config.server_url).await?;
        let toggle_rx = Self::setup_toggle();

        let session = Session::new(
            writer,
            recorder,
            fragment_rx,
            sink,
            ui,
            SessionOptions {
                reset_on_record: config.reset_on_record,
            },
        );

        Ok(Self {
            session,
            channel_rx,
            ready_rx,
            toggle_rx,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tracing::trace!("Main loop: waiting for event");
            tokio::select! {
                toggle = self.toggle_rx.recv() => match toggle {
                    Some(()) => {
                        if let Err(e) = self.session.handle_toggle().await {
                            tracing::error!("Error handling toggle: {:#}", e);
                        }
                    }
                    None => {
                        tracing::info!("Input closed, shutting down");
                        break;
                    }
                },

                Some(fragment) = self.session.next_fragment() => {
                    if let Err(e) = self.session.on_capture_fragment(fragment).await {
                        tracing::error!("Error sending audio fragment: {:#}", e);
                    }
                }

                event = self.channel_rx.recv() => match event {
                    Some(ChannelEvent::Server(event)) => {
                        if let Err(e) = self.session.on_server_event(event) {
                            tracing::error!("Error handling server event: {:#}", e);
                        }
                    }
                    Some(ChannelEvent::Closed) | None => {
                        self.session.on_channel_closed().await;
                        break;
                    }
                },

                Some(SinkReady) = self.ready_rx.recv() => {
                    if let Err(e) = self.session.on_sink_ready() {
                        tracing::error!("Error feeding playback: {:#}", e);
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn setup_audio_pipeline(config: &Config, fragment_tx: mpsc::Sender<Fragment>) -> RecorderHandle {
        // Create and spawn Recorder (using spawn_local because it's !Send)
        let (recorder_tx, recorder_rx) = mpsc::channel(10);
        let recorder = Recorder::new(
            config.audio_format(),
            config.capture_interval(),
            recorder_rx,
            fragment_tx,
        );
        tokio::task::spawn_local(recorder.run());

        RecorderHandle::new(recorder_tx)
    }

    async fn setup_playback(
        config: &Config,
        ready_tx: mpsc::UnboundedSender<SinkReady>,
    ) -> Option<RodioSink> {
        if !config.playback {
            tracing::info!("Playback disabled by config");
            return None;
        }

        match RodioSink::open(ready_tx).await {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::warn!("Playback unavailable: {:#}", e);
                None
            }
        }
    }

    fn setup_toggle() -> mpsc::Receiver<()> {
        let (toggle_tx, toggle_rx) = mpsc::channel(10);
        input::spawn_toggle_reader(toggle_tx);
        toggle_rx
    }
}
