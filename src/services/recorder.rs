use crate::audio::{ActiveCapture, AudioCapture, AudioFormat, FragmentEncoder};
use crate::messages::{Fragment, RecorderCommand};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Something that can be switched on and off to produce capture fragments
#[async_trait(?Send)]
pub trait Microphone {
    async fn start(&self) -> Result<()>;

    /// Stop capturing; every fragment captured so far has been delivered on return
    async fn stop(&self) -> Result<()>;
}

/// Coordinates audio capture and fragment encoding
///
/// This service:
/// - Manages AudioCapture lifecycle
/// - Receives sample chunks via channel, one per capture interval
/// - Encodes each chunk into a fragment and forwards it to the session
/// - Handles start/stop commands
///
/// Note: This service holds cpal::Stream which is !Send, so it must be spawned
/// on a LocalSet using tokio::task::spawn_local.
pub struct Recorder {
    format: AudioFormat,
    interval: Duration,
    cmd_rx: mpsc::Receiver<RecorderCommand>,
    audio_rx: mpsc::Receiver<Vec<f32>>,
    audio_tx: mpsc::Sender<Vec<f32>>,
    fragment_tx: mpsc::Sender<Fragment>,
    encoder: FragmentEncoder,
    capture: Option<ActiveCapture>,
    recording: bool,
}

impl Recorder {
    pub fn new(
        format: AudioFormat,
        interval: Duration,
        cmd_rx: mpsc::Receiver<RecorderCommand>,
        fragment_tx: mpsc::Sender<Fragment>,
    ) -> Self {
        let (audio_tx, audio_rx) = mpsc::channel(100);
        Self {
            format,
            interval,
            cmd_rx,
            audio_rx,
            audio_tx,
            fragment_tx,
            encoder: FragmentEncoder::new(format),
            capture: None,
            recording: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                // Receive and forward sample chunks (only when recording)
                Some(chunk) = self.audio_rx.recv(), if self.recording => {
                    if let Err(e) = self.forward_chunk(&chunk).await {
                        tracing::error!("Failed to forward audio chunk: {}", e);
                        self.recording = false;
                    }
                }
            }
        }

        tracing::debug!("Recorder exiting");
    }

    async fn forward_chunk(&mut self, samples: &[f32]) -> Result<()> {
        let fragment = self.encoder.encode(samples)?;
        tracing::trace!("Captured fragment of {} bytes", fragment.len());
        self.fragment_tx
            .send(fragment)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send fragment: {}", e))
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Start(reply) => {
                if self.recording {
                    let _ = reply.send(Ok(()));
                    return;
                }

                self.encoder = FragmentEncoder::new(self.format);
                // Leftovers from a recording that failed midway
                while self.audio_rx.try_recv().is_ok() {}

                let result =
                    match AudioCapture::start(self.format, self.interval, self.audio_tx.clone()) {
                        Ok(capture) => {
                            self.capture = Some(capture);
                            self.recording = true;
                            tracing::info!("Recording started");
                            Ok(())
                        }
                        Err(e) => {
                            tracing::error!("Failed to start capture: {:#}", e);
                            Err(e)
                        }
                    };

                let _ = reply.send(result);
            }

            RecorderCommand::Stop(reply) => {
                self.recording = false;
                let Some(capture) = self.capture.take() else {
                    let _ = reply.send(Ok(()));
                    return;
                };

                let result = self.finish_capture(capture).await;
                let _ = reply.send(result);

                tracing::info!("Recording stopped");
            }
        }
    }

    /// Stop the device and forward everything it captured, in order
    async fn finish_capture(&mut self, capture: ActiveCapture) -> Result<()> {
        let mut bridge = capture.stop();
        let mut result = Ok(());

        // Keep forwarding ticks until the bridge hands back its remainder
        let remainder = loop {
            tokio::select! {
                biased;

                joined = &mut bridge => break joined.unwrap_or_else(|e| {
                    tracing::error!("Capture bridge failed: {}", e);
                    Vec::new()
                }),

                Some(chunk) = self.audio_rx.recv() => {
                    if let Err(e) = self.forward_chunk(&chunk).await {
                        tracing::error!("Failed to forward audio chunk during stop: {}", e);
                        result = Err(e);
                    }
                }
            }
        };

        // Chunks the bridge sent before it saw the stop signal
        while let Ok(chunk) = self.audio_rx.try_recv() {
            if let Err(e) = self.forward_chunk(&chunk).await {
                tracing::error!("Failed to forward audio chunk during drain: {}", e);
                result = Err(e);
            }
        }

        if !remainder.is_empty() {
            tracing::debug!("Forwarding final {} samples", remainder.len());
            if let Err(e) = self.forward_chunk(&remainder).await {
                tracing::error!("Failed to forward final audio chunk: {}", e);
                result = Err(e);
            }
        }

        result
    }
}

/// Handle for communicating with the Recorder
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    pub fn new(tx: mpsc::Sender<RecorderCommand>) -> Self {
        Self { tx }
    }

    async fn request(&self, make: fn(oneshot::Sender<Result<()>>) -> RecorderCommand) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send recorder command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive recorder response: {}", e))?
    }
}

#[async_trait(?Send)]
impl Microphone for RecorderHandle {
    async fn start(&self) -> Result<()> {
        self.request(RecorderCommand::Start).await
    }

    async fn stop(&self) -> Result<()> {
        self.request(RecorderCommand::Stop).await
    }
}
