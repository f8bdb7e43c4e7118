use super::format::AudioFormat;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use ringbuf::{HeapRb, traits::*};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub struct AudioCapture;

/// A running capture: the cpal stream plus the task bridging it to the channel
pub struct ActiveCapture {
    stream: cpal::Stream,
    stop_tx: oneshot::Sender<()>,
    bridge: JoinHandle<Vec<f32>>,
}

impl ActiveCapture {
    /// Stop the device and tell the bridge to hand back what it has not sent yet
    ///
    /// The returned task resolves to the samples captured since the last tick.
    pub fn stop(self) -> JoinHandle<Vec<f32>> {
        drop(self.stream);
        let _ = self.stop_tx.send(());
        self.bridge
    }
}

impl AudioCapture {
    /// Start audio capture
    ///
    /// Returns the capture, which must be kept alive for audio capture to continue.
    /// Every `interval`, whatever was captured since the last tick is sent via chunk_tx.
    pub fn start(
        format: AudioFormat,
        interval: Duration,
        chunk_tx: mpsc::Sender<Vec<f32>>,
    ) -> Result<ActiveCapture> {
        // Room for a few intervals in case the bridge falls behind
        let capacity = format.samples_for_duration(interval.as_secs_f32() * 8.0);
        let ring = HeapRb::<f32>::new(capacity.max(1));
        let (mut producer, consumer) = ring.split();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input audio device available")?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    producer.push_slice(data);
                },
                move |err| {
                    tracing::error!("Audio stream error: {}", err);
                },
                None,
            )
            .context("Failed to build input stream")?;

        stream.play().context("Failed to start audio stream")?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let bridge =
            tokio::task::spawn_local(Self::bridge_task(consumer, chunk_tx, interval, stop_rx));

        tracing::info!("Audio capture started");
        Ok(ActiveCapture {
            stream,
            stop_tx,
            bridge,
        })
    }

    async fn bridge_task(
        mut consumer: impl Consumer<Item = f32>,
        tx: mpsc::Sender<Vec<f32>>,
        interval: Duration,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> Vec<f32> {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let chunk = drain(&mut consumer);
                    if chunk.is_empty() {
                        continue;
                    }

                    if tx.send(chunk).await.is_err() {
                        tracing::debug!("Capture bridge exiting, receiver gone");
                        return Vec::new();
                    }
                }

                _ = &mut stop_rx => break,
            }
        }

        tracing::debug!("Capture bridge flushing on stop");
        drain(&mut consumer)
    }
}

/// Pop everything currently in the ring
fn drain(consumer: &mut impl Consumer<Item = f32>) -> Vec<f32> {
    let mut chunk = vec![0.0f32; consumer.occupied_len()];
    let n = consumer.pop_slice(&mut chunk);
    chunk.truncate(n);
    chunk
}
