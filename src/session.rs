use crate::channel::Outbound;
use crate::messages::{AppState, ClientEvent, Fragment, ServerEvent};
use crate::playback::{FragmentSink, PlaybackBuffer};
use crate::services::Microphone;
use crate::status::{Status, UiEvent};
use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tokio::sync::mpsc;

pub struct SessionOptions {
    /// Ask the server to drop buffered audio before each recording
    pub reset_on_record: bool,
}

/// One conversation with the server
///
/// Owns everything the event handlers touch: the mic state machine, the
/// outbound channel, the microphone, capture fragments not yet sent, and the
/// playback buffer (absent when playback is unavailable). All handlers are
/// called from a single event loop.
pub struct Session<O, M, S> {
    state: AppState,
    outbound: O,
    microphone: M,
    fragments: mpsc::Receiver<Fragment>,
    playback: Option<PlaybackBuffer<S>>,
    ui: mpsc::UnboundedSender<UiEvent>,
    options: SessionOptions,
    transcript: String,
    reply: String,
    closed: bool,
}

impl<O: Outbound, M: Microphone, S: FragmentSink> Session<O, M, S> {
    pub fn new(
        outbound: O,
        microphone: M,
        fragments: mpsc::Receiver<Fragment>,
        sink: Option<S>,
        ui: mpsc::UnboundedSender<UiEvent>,
        options: SessionOptions,
    ) -> Self {
        let session = Self {
            state: AppState::Idle,
            outbound,
            microphone,
            fragments,
            playback: sink.map(PlaybackBuffer::new),
            ui,
            options,
            transcript: String::new(),
            reply: String::new(),
            closed: false,
        };

        if session.playback.is_none() {
            session.set_status(Status::PlaybackUnsupported);
        }
        session.set_status(Status::Idle);
        session
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        self.fragments.recv().await
    }

    /// Mic button pressed
    pub async fn handle_toggle(&mut self) -> Result<()> {
        tracing::debug!("handle_toggle: current state = {:?}", self.state);

        if self.closed {
            tracing::debug!("Connection closed, ignoring toggle");
            return Ok(());
        }

        match self.state {
            AppState::Idle => self.start_recording().await?,
            AppState::Recording => self.stop_recording().await?,
            AppState::Processing => tracing::debug!("Already processing, ignoring toggle"),
        }

        Ok(())
    }

    async fn start_recording(&mut self) -> Result<()> {
        tracing::info!("Starting recording");

        // A denied mic must leave the reply in progress and the server buffer alone
        if let Err(e) = self.microphone.start().await {
            tracing::warn!("Microphone unavailable: {:#}", e);
            self.set_status(Status::MicrophoneDenied);
            return Ok(());
        }

        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }

        if self.options.reset_on_record {
            if let Err(e) = self.outbound.send_event(ClientEvent::Reset).await {
                let _ = self.microphone.stop().await;
                return Err(e);
            }
        }
        self.transcript.clear();
        self.reply.clear();

        self.state = AppState::Recording;
        self.set_status(Status::Recording);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<()> {
        tracing::info!("Stopping recording");

        if let Err(e) = self.microphone.stop().await {
            tracing::error!("Failed to stop microphone cleanly: {:#}", e);
        }

        // Everything captured must reach the server ahead of the stop event
        while let Ok(fragment) = self.fragments.try_recv() {
            self.outbound.send_audio(fragment).await?;
        }

        self.state = AppState::Processing;
        if let Some(playback) = self.playback.as_mut() {
            if let Err(e) = playback.reset() {
                tracing::warn!("Failed to discard previous reply audio: {:#}", e);
            }
        }

        self.outbound.send_event(ClientEvent::Stop).await?;
        self.set_status(Status::Processing);
        Ok(())
    }

    /// A fragment arrived from the capture side
    pub async fn on_capture_fragment(&mut self, fragment: Fragment) -> Result<()> {
        if self.state != AppState::Recording {
            tracing::debug!("Dropping {} byte fragment, not recording", fragment.len());
            return Ok(());
        }

        self.outbound.send_audio(fragment).await
    }

    pub fn on_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::Processing => {
                // Already shown when the stop event went out
                if self.state != AppState::Processing {
                    self.set_status(Status::Processing);
                }
            }

            ServerEvent::Transcript { text } => {
                tracing::info!("Transcript: {}", text);
                self.transcript = text.clone();
                self.emit(UiEvent::Transcript(text));
            }

            ServerEvent::AssistantDelta { text } => {
                self.reply.push_str(&text);
                self.emit(UiEvent::ReplyDelta(text));
            }

            ServerEvent::AudioChunk { data } => self.on_audio_chunk(&data)?,

            ServerEvent::Done => {
                tracing::info!("Reply complete: {}", self.reply.trim());
                self.emit(UiEvent::ReplyDone);

                if let Some(playback) = self.playback.as_mut() {
                    playback.finish()?;
                }

                if self.state == AppState::Processing {
                    self.state = AppState::Idle;
                    self.set_status(Status::Idle);
                }
            }

            ServerEvent::Error { message } => {
                tracing::warn!("Server reported an error: {}", message);
                if self.state == AppState::Processing {
                    self.state = AppState::Idle;
                }
                self.set_status(Status::ServerError(message));
            }

            ServerEvent::AudioChunkReceived { size } => {
                tracing::trace!("Server received {} bytes", size);
            }

            ServerEvent::ResetAck => tracing::debug!("Server reset acknowledged"),

            ServerEvent::Unknown => tracing::debug!("Ignoring unknown server event"),
        }

        Ok(())
    }

    fn on_audio_chunk(&mut self, data: &str) -> Result<()> {
        let Some(playback) = self.playback.as_mut() else {
            tracing::trace!("Playback disabled, ignoring audio chunk");
            return Ok(());
        };

        let bytes = match STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Ignoring undecodable audio chunk: {}", e);
                return Ok(());
            }
        };

        if bytes.is_empty() {
            tracing::debug!("Ignoring empty audio chunk");
            return Ok(());
        }

        playback.submit_or_enqueue(Fragment::from(bytes))
    }

    /// The playback sink finished its last append
    pub fn on_sink_ready(&mut self) -> Result<()> {
        match self.playback.as_mut() {
            Some(playback) => playback.on_sink_ready(),
            None => Ok(()),
        }
    }

    /// The server went away; there is no reconnect
    pub async fn on_channel_closed(&mut self) {
        tracing::info!("Connection closed");
        self.closed = true;

        if self.state == AppState::Recording {
            if let Err(e) = self.microphone.stop().await {
                tracing::warn!("Failed to stop microphone: {:#}", e);
            }
        }

        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }

        self.state = AppState::Idle;
        self.set_status(Status::ConnectionClosed);
    }

    fn set_status(&self, status: Status) {
        tracing::debug!("Status: {}", status);
        self.emit(UiEvent::Status(status));
    }

    fn emit(&self, event: UiEvent) {
        // The console may already be gone during shutdown
        let _ = self.ui.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::buffer::tests::RecordingSink;
    use async_trait::async_trait;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug, PartialEq)]
    enum Sent {
        Audio(Fragment),
        Event(ClientEvent),
    }

    #[derive(Clone, Default)]
    struct FakeOutbound {
        sent: Rc<RefCell<Vec<Sent>>>,
    }

    #[async_trait(?Send)]
    impl Outbound for FakeOutbound {
        async fn send_audio(&mut self, fragment: Fragment) -> Result<()> {
            self.sent.borrow_mut().push(Sent::Audio(fragment));
            Ok(())
        }

        async fn send_event(&mut self, event: ClientEvent) -> Result<()> {
            self.sent.borrow_mut().push(Sent::Event(event));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeMic {
        deny: Rc<Cell<bool>>,
        running: Rc<Cell<bool>>,
    }

    #[async_trait(?Send)]
    impl Microphone for FakeMic {
        async fn start(&self) -> Result<()> {
            if self.deny.get() {
                anyhow::bail!("permission denied");
            }
            self.running.set(true);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.running.set(false);
            Ok(())
        }
    }

    struct Harness {
        session: Session<FakeOutbound, FakeMic, RecordingSink>,
        outbound: FakeOutbound,
        mic: FakeMic,
        fragment_tx: mpsc::Sender<Fragment>,
        ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    }

    impl Harness {
        fn new(mic: FakeMic, sink: Option<RecordingSink>) -> Self {
            let outbound = FakeOutbound::default();
            let (fragment_tx, fragment_rx) = mpsc::channel(16);
            let (ui_tx, ui_rx) = mpsc::unbounded_channel();
            let session = Session::new(
                outbound.clone(),
                mic.clone(),
                fragment_rx,
                sink,
                ui_tx,
                SessionOptions {
                    reset_on_record: true,
                },
            );

            Self {
                session,
                outbound,
                mic,
                fragment_tx,
                ui_rx,
            }
        }

        fn with_playback() -> Self {
            Self::new(FakeMic::default(), Some(RecordingSink::default()))
        }

        fn ui_events(&mut self) -> Vec<UiEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.ui_rx.try_recv() {
                events.push(event);
            }
            events
        }

        fn sent(&self) -> Vec<Sent> {
            self.outbound.sent.borrow_mut().drain(..).collect()
        }

        fn sink(&self) -> &RecordingSink {
            self.session.playback.as_ref().unwrap().sink()
        }

        fn complete_append(&mut self) {
            self.session.playback.as_mut().unwrap().sink_mut().complete();
            self.session.on_sink_ready().unwrap();
        }
    }

    fn audio_chunk(bytes: &[u8]) -> ServerEvent {
        ServerEvent::AudioChunk {
            data: STANDARD.encode(bytes),
        }
    }

    #[tokio::test]
    async fn starts_idle() {
        let mut h = Harness::with_playback();

        assert_eq!(h.session.state(), AppState::Idle);
        assert_eq!(h.ui_events(), vec![UiEvent::Status(Status::Idle)]);
    }

    #[tokio::test]
    async fn toggle_starts_recording() {
        let mut h = Harness::with_playback();
        h.ui_events();

        h.session.handle_toggle().await.unwrap();

        assert_eq!(h.session.state(), AppState::Recording);
        assert!(h.mic.running.get());
        assert_eq!(h.sent(), vec![Sent::Event(ClientEvent::Reset)]);
        assert_eq!(h.ui_events(), vec![UiEvent::Status(Status::Recording)]);
    }

    #[tokio::test]
    async fn denied_microphone_stays_idle() {
        let mic = FakeMic::default();
        mic.deny.set(true);
        let mut h = Harness::new(mic, Some(RecordingSink::default()));
        h.ui_events();

        h.session.handle_toggle().await.unwrap();

        assert_eq!(h.session.state(), AppState::Idle);
        assert!(h.sent().is_empty());
        assert_eq!(h.ui_events(), vec![UiEvent::Status(Status::MicrophoneDenied)]);
    }

    #[tokio::test]
    async fn denied_microphone_leaves_reply_playing() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.session.on_server_event(audio_chunk(b"A")).unwrap();
        h.session.on_server_event(audio_chunk(b"B")).unwrap();
        h.session.on_server_event(ServerEvent::Done).unwrap();
        h.sent();

        h.mic.deny.set(true);
        h.session.handle_toggle().await.unwrap();
        h.complete_append();

        assert!(h.sent().is_empty());
        assert_eq!(
            h.sink().appended,
            vec![Fragment::from(&b"A"[..]), Fragment::from(&b"B"[..])]
        );
    }

    #[tokio::test]
    async fn stop_flushes_audio_before_stop_event() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.sent();

        h.session
            .on_capture_fragment(Fragment::from(&b"one"[..]))
            .await
            .unwrap();
        h.fragment_tx.send(Fragment::from(&b"two"[..])).await.unwrap();

        h.session.handle_toggle().await.unwrap();

        assert_eq!(h.session.state(), AppState::Processing);
        assert!(!h.mic.running.get());
        assert_eq!(
            h.sent(),
            vec![
                Sent::Audio(Fragment::from(&b"one"[..])),
                Sent::Audio(Fragment::from(&b"two"[..])),
                Sent::Event(ClientEvent::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn toggle_while_processing_is_ignored() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.sent();

        h.session.handle_toggle().await.unwrap();

        assert_eq!(h.session.state(), AppState::Processing);
        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn fragments_outside_recording_are_dropped() {
        let mut h = Harness::with_playback();

        h.session
            .on_capture_fragment(Fragment::from(&b"late"[..]))
            .await
            .unwrap();

        assert!(h.sent().is_empty());
    }

    #[tokio::test]
    async fn reply_audio_plays_in_order_and_turn_ends() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.ui_events();

        h.session
            .on_server_event(ServerEvent::Transcript {
                text: "I work in a bank.".into(),
            })
            .unwrap();
        h.session
            .on_server_event(ServerEvent::AssistantDelta {
                text: "Thank you. ".into(),
            })
            .unwrap();
        for chunk in [b"A", b"B", b"C"] {
            h.session.on_server_event(audio_chunk(chunk)).unwrap();
        }
        h.session.on_server_event(ServerEvent::Done).unwrap();

        assert_eq!(h.sink().appended, vec![Fragment::from(&b"A"[..])]);
        assert_eq!(h.session.state(), AppState::Idle);

        h.complete_append();
        h.complete_append();
        assert_eq!(h.sink().ends, 0);
        h.complete_append();

        assert_eq!(
            h.sink().appended,
            vec![
                Fragment::from(&b"A"[..]),
                Fragment::from(&b"B"[..]),
                Fragment::from(&b"C"[..]),
            ]
        );
        assert_eq!(h.sink().ends, 1);
        assert_eq!(
            h.ui_events(),
            vec![
                UiEvent::Transcript("I work in a bank.".into()),
                UiEvent::ReplyDelta("Thank you. ".into()),
                UiEvent::ReplyDone,
                UiEvent::Status(Status::Idle),
            ]
        );
    }

    #[tokio::test]
    async fn bad_audio_chunks_are_skipped() {
        let mut h = Harness::with_playback();

        h.session
            .on_server_event(ServerEvent::AudioChunk {
                data: "%%% not base64".into(),
            })
            .unwrap();
        h.session
            .on_server_event(ServerEvent::AudioChunk { data: String::new() })
            .unwrap();

        assert!(h.sink().appended.is_empty());
    }

    #[tokio::test]
    async fn recording_again_stops_previous_reply() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.session.on_server_event(audio_chunk(b"A")).unwrap();
        h.session.on_server_event(audio_chunk(b"B")).unwrap();
        h.session.on_server_event(ServerEvent::Done).unwrap();

        h.session.handle_toggle().await.unwrap();
        h.complete_append();

        assert_eq!(h.sink().appended, vec![Fragment::from(&b"A"[..])]);
        assert_eq!(h.sink().ends, 0);
        assert_eq!(h.session.playback.as_ref().unwrap().pending_len(), 1);
    }

    #[tokio::test]
    async fn interrupted_reply_is_not_replayed_next_turn() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.session.on_server_event(audio_chunk(b"OLD1")).unwrap();
        h.session.on_server_event(audio_chunk(b"OLD2")).unwrap();
        h.session.on_server_event(ServerEvent::Done).unwrap();

        // Tap again while the reply is still draining, then stop for a new one
        h.session.handle_toggle().await.unwrap();
        h.complete_append();
        h.session.handle_toggle().await.unwrap();

        h.session.on_server_event(audio_chunk(b"NEW")).unwrap();
        h.complete_append();
        h.session.on_server_event(ServerEvent::Done).unwrap();

        assert_eq!(h.sink().played, vec![b"NEW".to_vec()]);
    }

    #[tokio::test]
    async fn playback_unsupported_ignores_audio() {
        let mut h = Harness::new(FakeMic::default(), None);

        assert_eq!(
            h.ui_events(),
            vec![
                UiEvent::Status(Status::PlaybackUnsupported),
                UiEvent::Status(Status::Idle),
            ]
        );

        h.session.on_server_event(audio_chunk(b"A")).unwrap();
        h.session.on_server_event(ServerEvent::Done).unwrap();
        h.session.on_sink_ready().unwrap();
    }

    #[tokio::test]
    async fn server_error_returns_to_idle() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.session.handle_toggle().await.unwrap();
        h.ui_events();

        h.session
            .on_server_event(ServerEvent::Error {
                message: "quota exceeded".into(),
            })
            .unwrap();

        assert_eq!(h.session.state(), AppState::Idle);
        assert_eq!(
            h.ui_events(),
            vec![UiEvent::Status(Status::ServerError("quota exceeded".into()))]
        );
    }

    #[tokio::test]
    async fn channel_close_stops_everything() {
        let mut h = Harness::with_playback();
        h.session.handle_toggle().await.unwrap();
        h.ui_events();

        h.session.on_channel_closed().await;

        assert!(h.session.is_closed());
        assert!(!h.mic.running.get());
        assert_eq!(h.session.state(), AppState::Idle);
        assert_eq!(h.ui_events(), vec![UiEvent::Status(Status::ConnectionClosed)]);

        h.sent();
        h.session.handle_toggle().await.unwrap();
        assert!(h.sent().is_empty());
        assert!(!h.mic.running.get());
    }
}
