//! The voice agent session controller.
//!
//! Owns the full lifecycle of one conversation: handshake, audio-time
//! accounting, fragment reconciliation, segment emission, turn detection
//! and shutdown. The controller has-a transport and has-a emitter;
//! background tasks hold weak references so nothing keeps a dropped
//! client alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use colloquy_audio::AudioBuffer;
use colloquy_events::{AgentEvent, EventEmitter, Subscription};
use colloquy_protocol::{
    ClientMessage, LanguagePackInfo, RecognitionResult, ServerMessage, TranscriptMetadata,
};
use colloquy_segments::{
    AnnotationFlags, DiarizationFocusConfig, FragmentKind, FragmentReconciler, SegmentView,
    SpeechFragment, ViewConfig,
};
use colloquy_transport::{
    ApiKeyAuth, AuthProvider, Transport, WsTransport, WsTransportConfig,
};
use colloquy_turn::{
    EndOfUtteranceMode, SmartTurnPredicate, TurnDetector, TurnTaskProcessor,
};
use serde_json::json;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

use crate::config::{TextInputFlags, VoiceAgentConfig};
use crate::ClientError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_FINALIZE_GRACE: Duration = Duration::from_millis(250);
const METRICS_INTERVAL: Duration = Duration::from_secs(10);
const SMART_TURN_TASK: &str = "smart_turn";
/// Fade applied to smart-turn audio slices to avoid edge artefacts.
const SMART_TURN_FADE: f64 = 0.01;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug)]
struct SessionState {
    connected: bool,
    ready_for_audio: bool,
    total_audio_bytes: u64,
    total_audio_seconds: f64,
    session_start: DateTime<Utc>,
    last_ttfb_ms: f64,
    session_id: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connected: false,
            ready_for_audio: false,
            total_audio_bytes: 0,
            total_audio_seconds: 0.0,
            session_start: Utc::now(),
            last_ttfb_ms: 0.0,
            session_id: None,
        }
    }
}

#[derive(Default)]
struct FragmentState {
    reconciler: FragmentReconciler,
    current_view: Option<SegmentView>,
    focus: DiarizationFocusConfig,
    language_pack: LanguagePackInfo,
}

#[derive(Debug, Default)]
struct VadState {
    is_speaking: bool,
    current_speaker: Option<String>,
}

struct ClientInner {
    config: VoiceAgentConfig,
    transport_config: WsTransportConfig,
    auth: Arc<dyn AuthProvider>,
    emitter: EventEmitter,
    detector: TurnDetector,
    turn: TurnTaskProcessor,
    predicate: StdMutex<Option<Arc<dyn SmartTurnPredicate>>>,
    audio_buffer: Option<Arc<AudioBuffer>>,
    transport: StdMutex<Option<Arc<dyn Transport>>>,
    session: StdMutex<SessionState>,
    vad: StdMutex<VadState>,
    fragments: TokioMutex<FragmentState>,
    end_of_transcript: Notify,
    shutting_down: AtomicBool,
    background: StdMutex<Vec<JoinHandle<()>>>,
}

/// Client for one live voice agent conversation.
///
/// Create it inside a Tokio runtime, register handlers with `on`/`once`,
/// then `connect` and stream audio with `send_audio`.
pub struct VoiceAgentClient {
    inner: Arc<ClientInner>,
}

impl VoiceAgentClient {
    /// Create a client authenticating with a bearer API key.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, config: VoiceAgentConfig) -> Result<Self> {
        Self::with_auth(url, Arc::new(ApiKeyAuth::new(api_key)), config)
    }

    /// Create a client with a caller-supplied credential provider.
    pub fn with_auth(
        url: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
        config: VoiceAgentConfig,
    ) -> Result<Self> {
        config.validate()?;

        let audio_buffer = if config.enable_audio_buffer
            || config.end_of_utterance_mode == EndOfUtteranceMode::SmartTurn
        {
            // The buffer stores integer PCM; float input is accounted per
            // 16-bit sample for slicing purposes.
            let width = match config.audio_encoding.bytes_per_sample() {
                1 => 1,
                _ => 2,
            };
            Some(Arc::new(AudioBuffer::new(
                config.sample_rate,
                config.audio_buffer_frame_size,
                width,
                config.audio_buffer_seconds,
            )?))
        } else {
            None
        };

        let (turn, done_rx) = TurnTaskProcessor::new("voice-agent");
        let inner = Arc::new(ClientInner {
            detector: TurnDetector::new(config.detector_config()),
            transport_config: WsTransportConfig {
                url: url.into(),
                app: None,
            },
            auth,
            emitter: EventEmitter::new(),
            turn,
            predicate: StdMutex::new(None),
            audio_buffer,
            transport: StdMutex::new(None),
            session: StdMutex::new(SessionState::default()),
            vad: StdMutex::new(VadState::default()),
            fragments: TokioMutex::new(FragmentState::default()),
            end_of_transcript: Notify::new(),
            shutting_down: AtomicBool::new(false),
            background: StdMutex::new(Vec::new()),
            config,
        });

        tokio::spawn(turn_done_listener(Arc::downgrade(&inner), done_rx));
        Ok(Self { inner })
    }

    /// Install the acoustic turn predicate used in smart-turn mode.
    pub fn set_turn_predicate(&self, predicate: Arc<dyn SmartTurnPredicate>) {
        *self.inner.predicate.lock().unwrap() = Some(predicate);
    }

    // --- Subscriptions ---

    pub fn on<F>(&self, event: AgentEvent, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.emitter.on(event, handler)
    }

    pub fn once<F>(&self, event: AgentEvent, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.inner.emitter.once(event, handler)
    }

    pub fn off(&self, subscription: Subscription) -> bool {
        self.inner.emitter.off(subscription)
    }

    pub fn remove_all_listeners(&self) {
        self.inner.emitter.remove_all_listeners();
    }

    // --- Lifecycle ---

    /// Connect to the service and wait for the recognition-started
    /// acknowledgement (bounded at five seconds).
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_disconnected()?;
        let transport =
            WsTransport::connect(self.inner.transport_config.clone(), self.inner.auth.as_ref())
                .await?;
        self.connect_with(Arc::new(transport)).await
    }

    /// Run the session over an already-established transport.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.inner.ensure_disconnected()?;

        transport
            .send_control(ClientMessage::StartRecognition {
                audio_format: self.inner.config.audio_format(),
                transcription_config: self.inner.config.transcription_config(),
            })
            .await?;

        let (session_id, language_pack) = self.await_recognition_started(&transport).await?;

        {
            let mut session = self.inner.session.lock().unwrap();
            session.connected = true;
            session.ready_for_audio = true;
            session.total_audio_bytes = 0;
            session.total_audio_seconds = 0.0;
            session.session_start = Utc::now();
            session.last_ttfb_ms = 0.0;
            session.session_id = session_id.clone();
        }
        {
            let mut fragments = self.inner.fragments.lock().await;
            fragments.reconciler.clear();
            fragments.current_view = None;
            fragments.focus = self.inner.config.diarization_focus.clone();
            fragments.language_pack = language_pack.clone();
        }
        *self.inner.vad.lock().unwrap() = VadState::default();
        self.inner.shutting_down.store(false, Ordering::Release);
        *self.inner.transport.lock().unwrap() = Some(transport.clone());

        let weak = Arc::downgrade(&self.inner);
        let mut background = self.inner.background.lock().unwrap();
        background.push(tokio::spawn(receive_loop(weak.clone(), transport)));
        background.push(tokio::spawn(metrics_loop(weak)));
        drop(background);

        self.inner.emitter.emit(
            AgentEvent::RecognitionStarted,
            json!({
                "id": session_id,
                "language_pack_info": language_pack,
            }),
        );
        Ok(())
    }

    async fn await_recognition_started(
        &self,
        transport: &Arc<dyn Transport>,
    ) -> Result<(Option<String>, LanguagePackInfo)> {
        let deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::HandshakeTimeout(HANDSHAKE_TIMEOUT));
            }
            let message = tokio::time::timeout(remaining, transport.receive())
                .await
                .map_err(|_| ClientError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;

            match message {
                ServerMessage::RecognitionStarted {
                    id,
                    language_pack_info,
                } => return Ok((id, language_pack_info.unwrap_or_default())),
                ServerMessage::Error { kind, reason } => {
                    self.inner
                        .emitter
                        .emit(AgentEvent::Error, json!({ "type": kind, "reason": &reason }));
                    return Err(ClientError::Rejected(reason));
                }
                ServerMessage::Info { kind, reason } => {
                    self.inner
                        .emitter
                        .emit(AgentEvent::Info, json!({ "type": kind, "reason": reason }));
                }
                ServerMessage::Warning { kind, reason } => {
                    self.inner
                        .emitter
                        .emit(AgentEvent::Warning, json!({ "type": kind, "reason": reason }));
                }
                other => {
                    tracing::debug!(message = ?other, "ignoring_message_before_acknowledgement");
                }
            }
        }
    }

    /// Send the end-of-stream terminator, wait for outstanding work up to
    /// a five-second grace and close the transport. Safe to call twice.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock().unwrap();
            if !session.connected {
                return Ok(());
            }
            session.ready_for_audio = false;
        }
        self.inner.shutting_down.store(true, Ordering::Release);

        let transport = self.inner.transport.lock().unwrap().clone();
        if let Some(transport) = transport {
            let _ = transport
                .send_control(ClientMessage::EndOfStream {
                    last_seq_no: transport.last_audio_seq(),
                })
                .await;

            let inner = self.inner.clone();
            let grace = async move {
                inner.end_of_transcript.notified().await;
                while inner.turn.has_pending_tasks() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            };
            if tokio::time::timeout(DISCONNECT_GRACE, grace).await.is_err() {
                tracing::warn!("disconnect grace expired with outstanding work");
            }
            let _ = transport.close().await;
        }

        self.inner.teardown().await;
        // Subscriptions do not survive an orderly disconnect.
        self.inner.emitter.remove_all_listeners();
        Ok(())
    }

    // --- Audio and text input ---

    /// Forward an audio frame. Frames sent before recognition is
    /// acknowledged are dropped silently so a caller racing the handshake
    /// does not error.
    pub async fn send_audio(&self, payload: &[u8]) -> Result<()> {
        let ready = {
            let session = self.inner.session.lock().unwrap();
            session.connected && session.ready_for_audio
        };
        if !ready {
            tracing::debug!(bytes = payload.len(), "dropping_audio_not_ready");
            return Ok(());
        }

        let transport = self
            .inner
            .transport
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        transport.send_audio(payload.to_vec()).await?;

        {
            let mut session = self.inner.session.lock().unwrap();
            session.total_audio_bytes += payload.len() as u64;
            session.total_audio_seconds +=
                payload.len() as f64 * self.inner.config.seconds_per_byte();
        }
        if let Some(buffer) = &self.inner.audio_buffer {
            buffer.put_bytes(payload).await;
        }
        Ok(())
    }

    /// Emit an immediate text turn without producing transcription
    /// output. The turn counter advances as if the text had been spoken.
    pub fn send_text_input(&self, text: &str, flags: TextInputFlags) {
        if flags.interrupt_response {
            self.inner.emitter.emit(
                AgentEvent::Info,
                json!({ "type": "interrupt_requested", "reason": "text input interrupts response" }),
            );
        }

        let turn_id = self.inner.turn.turn_id();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.inner.emitter.emit(
            AgentEvent::AddSegment,
            json!({
                "segments": [{
                    "speaker_id": serde_json::Value::Null,
                    "text": text,
                    "language": self.inner.config.language,
                    "timestamp": timestamp,
                    "is_active": true,
                    "annotations": ["has_final", "ends_with_final"],
                    "source": "text_input",
                }],
            }),
        );
        self.inner
            .emitter
            .emit(AgentEvent::EndOfTurn, json!({ "turn_id": turn_id }));
        self.inner.turn.complete_turn();
    }

    /// Ask for the current partial prefix to be committed. A hint, not a
    /// guarantee: the service gets `ttl` (default 250 ms) to flush finals
    /// before the local view is finalized.
    pub async fn finalize(&self, ttl: Option<Duration>) -> Result<()> {
        let transport = self
            .inner
            .transport
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        transport.send_control(ClientMessage::Finalize).await?;

        self.inner.turn.start_turn();
        self.inner
            .turn
            .update_timer(ttl.unwrap_or(DEFAULT_FINALIZE_GRACE));
        Ok(())
    }

    /// Request speaker enrolment data; results arrive on the
    /// `speakers_result` event.
    pub async fn get_speakers(&self) -> Result<()> {
        let transport = self
            .inner
            .transport
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        transport.send_control(ClientMessage::GetSpeakers).await?;
        Ok(())
    }

    /// Replace the diarization focus configuration, effective for the
    /// next inbound batch.
    pub async fn update_diarization_config(&self, config: DiarizationFocusConfig) {
        self.inner.fragments.lock().await.focus = config;
    }

    // --- Introspection ---

    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().unwrap().connected
    }

    pub fn is_ready_for_audio(&self) -> bool {
        self.inner.session.lock().unwrap().ready_for_audio
    }

    pub fn turn_id(&self) -> u64 {
        self.inner.turn.turn_id()
    }

    pub fn total_audio_seconds(&self) -> f64 {
        self.inner.session.lock().unwrap().total_audio_seconds
    }

    pub fn last_ttfb_ms(&self) -> f64 {
        self.inner.session.lock().unwrap().last_ttfb_ms
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().unwrap().session_id.clone()
    }
}

impl ClientInner {
    fn ensure_disconnected(&self) -> Result<()> {
        if self.session.lock().unwrap().connected {
            return Err(ClientError::AlreadyConnected);
        }
        Ok(())
    }

    fn view_config(&self, state: &FragmentState) -> ViewConfig {
        ViewConfig {
            word_delimiter: state.language_pack.word_delimiter.clone(),
            emit_sentences: self.config.emit_sentences,
            focus_speakers: state.focus.focus_speakers.clone(),
            base_time: self.session.lock().unwrap().session_start,
        }
    }

    async fn dispatch(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::AddPartialTranscript { metadata, results } => {
                self.handle_transcript(metadata, results, false).await;
            }
            ServerMessage::AddTranscript { metadata, results } => {
                self.handle_transcript(metadata, results, true).await;
            }
            ServerMessage::EndOfUtterance { .. } => {
                tracing::debug!("server_end_of_utterance");
                if self.detector.mode() == EndOfUtteranceMode::Fixed {
                    self.finish_turn(self.turn.turn_id()).await;
                }
            }
            ServerMessage::EndOfTranscript => {
                self.end_of_transcript.notify_one();
            }
            ServerMessage::SpeakersResult { speakers } => {
                self.emitter
                    .emit(AgentEvent::SpeakersResult, json!({ "speakers": speakers }));
            }
            ServerMessage::Info { kind, reason } => {
                self.emitter
                    .emit(AgentEvent::Info, json!({ "type": kind, "reason": reason }));
            }
            ServerMessage::Warning { kind, reason } => {
                self.emitter
                    .emit(AgentEvent::Warning, json!({ "type": kind, "reason": reason }));
            }
            ServerMessage::Error { kind, reason } => {
                // Server-reported errors are fatal for the session.
                self.emitter
                    .emit(AgentEvent::Error, json!({ "type": kind, "reason": reason }));
                self.shutting_down.store(true, Ordering::Release);
                let transport = self.transport.lock().unwrap().clone();
                if let Some(transport) = transport {
                    let _ = transport.close().await;
                }
                self.teardown().await;
            }
            ServerMessage::RecognitionStarted { .. } | ServerMessage::AudioAdded { .. } => {}
        }
    }

    async fn handle_transcript(
        self: &Arc<Self>,
        metadata: TranscriptMetadata,
        results: Vec<RecognitionResult>,
        is_final: bool,
    ) {
        let passthrough = json!({ "metadata": &metadata, "results": &results });
        self.emitter.emit(
            if is_final {
                AgentEvent::AddTranscript
            } else {
                AgentEvent::AddPartialTranscript
            },
            passthrough,
        );

        let (outcome, focus_speakers) = {
            let mut state = self.fragments.lock().await;
            let focus = state.focus.clone();
            let total = self.session.lock().unwrap().total_audio_seconds;
            let outcome = state
                .reconciler
                .apply(&metadata, &results, is_final, &focus, total);
            (outcome, focus.focus_speakers)
        };

        // Speaker VAD runs on partial words only.
        if !is_final {
            for (event, payload) in self.vad_events(&outcome.added, &focus_speakers) {
                self.emitter.emit(event, payload);
            }
        }

        if let Some(ttfb) = outcome.ttfb_ms {
            self.session.lock().unwrap().last_ttfb_ms = ttfb;
            self.emitter
                .emit(AgentEvent::TtfbMetrics, json!({ "ttfb": ttfb }));
        }

        if !outcome.has_fragments {
            return;
        }
        self.process_fragments().await;
    }

    /// Rebuild the segment view, emit this cycle's segments and reconcile
    /// the end-of-utterance timer with the view diff.
    async fn process_fragments(self: &Arc<Self>) {
        let (view, diff) = {
            let mut state = self.fragments.lock().await;
            let config = self.view_config(&state);
            let view = SegmentView::build(state.reconciler.fragments(), &config);
            let diff = view.compare(state.current_view.as_ref());
            state.current_view = Some(view.clone());
            (view, diff)
        };

        if view.segment_count() == 0 {
            return;
        }

        self.emit_segments(false).await;

        if let Some(delay) = self.detector.finalize_delay(diff, &view) {
            self.turn.start_turn();
            self.turn.update_timer(Duration::from_secs_f64(delay));

            if self.detector.mode() == EndOfUtteranceMode::SmartTurn {
                self.schedule_smart_turn(delay, &view);
            }
        }
    }

    /// Emit finals then interims for the current view; finals advance the
    /// trim watermark and leave the list.
    async fn emit_segments(self: &Arc<Self>, finalize: bool) {
        let mut state = self.fragments.lock().await;
        let Some(view) = state.current_view.as_ref() else {
            return;
        };
        if view.segment_count() == 0 {
            return;
        }

        let (finals, interims): (Vec<_>, Vec<_>) = if finalize {
            (view.segments.clone(), Vec::new())
        } else {
            view.segments.iter().cloned().partition(|s| {
                s.annotation
                    .intersects(AnnotationFlags::ENDS_WITH_FINAL | AnnotationFlags::ENDS_WITH_EOS)
            })
        };

        if let Some(last) = finals.last() {
            let watermark = last.end_time();
            let payload: Vec<_> = finals.iter().map(|s| s.to_payload()).collect();
            self.emitter
                .emit(AgentEvent::AddSegment, json!({ "segments": payload }));
            state.reconciler.advance_watermark(watermark);
        }
        if !interims.is_empty() {
            let payload: Vec<_> = interims.iter().map(|s| s.to_payload()).collect();
            self.emitter
                .emit(AgentEvent::AddInterimSegment, json!({ "segments": payload }));
        }

        let config = self.view_config(&state);
        state.current_view = Some(SegmentView::build(state.reconciler.fragments(), &config));
    }

    /// Invoked when every task of the current turn has completed.
    async fn finish_turn(self: &Arc<Self>, turn_id: u64) {
        if self.turn.turn_id() != turn_id {
            return;
        }
        self.emit_segments(true).await;
        self.emitter
            .emit(AgentEvent::EndOfTurn, json!({ "turn_id": turn_id }));
        self.turn.complete_turn();
    }

    /// Run the acoustic predicate over the tail of the audio buffer; at
    /// most one invocation is in flight per view diff.
    fn schedule_smart_turn(self: &Arc<Self>, pending_delay: f64, view: &SegmentView) {
        let Some(buffer) = self.audio_buffer.clone() else {
            return;
        };
        let Some(predicate) = self.predicate.lock().unwrap().clone() else {
            return;
        };

        let end = self.session.lock().unwrap().total_audio_seconds;
        let start = (end - self.config.smart_turn_audio_seconds).max(0.0);
        let language = view
            .last_active_segment()
            .map(|s| s.language.clone())
            .unwrap_or_else(|| self.config.language.clone());
        let turn = self.turn.clone();
        let detector = self.detector.clone();

        self.turn.schedule(SMART_TURN_TASK, async move {
            let audio = buffer.get_frames(start, end, SMART_TURN_FADE).await;
            if audio.is_empty() {
                return;
            }
            match predicate.predict(&audio, &language).await {
                Ok(prediction) if prediction.is_complete() => {
                    tracing::debug!(
                        probability = prediction.probability,
                        "smart_turn_complete"
                    );
                    turn.update_timer(Duration::ZERO);
                }
                Ok(prediction) => {
                    tracing::debug!(
                        probability = prediction.probability,
                        "smart_turn_incomplete"
                    );
                    turn.update_timer(Duration::from_secs_f64(
                        detector.extended_delay(pending_delay),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "smart_turn_prediction_failed");
                }
            }
        });
    }

    /// Diarization-aware speech start/end detection from in-focus partial
    /// words.
    fn vad_events(
        &self,
        added: &[SpeechFragment],
        focus_speakers: &[String],
    ) -> Vec<(AgentEvent, serde_json::Value)> {
        let mut events = Vec::new();
        let diarization = self.config.enable_diarization;

        let partial_words: Vec<&SpeechFragment> = added
            .iter()
            .filter(|f| {
                f.kind == FragmentKind::Word
                    && !f.is_final
                    && (!diarization
                        || focus_speakers.is_empty()
                        || f.speaker
                            .as_ref()
                            .is_some_and(|s| focus_speakers.contains(s)))
            })
            .collect();
        let has_valid_partial = !partial_words.is_empty();

        let mut vad = self.vad.lock().unwrap();
        let previous_speaker = vad.current_speaker.clone();
        let speaker = partial_words
            .last()
            .and_then(|f| f.speaker.clone())
            .or_else(|| previous_speaker.clone());
        let speaker_changed = previous_speaker.is_some() && speaker != previous_speaker;

        // With diarization on, a speaker switch mid-speech emits an
        // ended/started pair so clients can show who holds the floor.
        if diarization && speaker.is_some() && vad.is_speaking && speaker_changed {
            events.push((
                AgentEvent::SpeakerEnded,
                vad_payload(previous_speaker.as_deref(), false),
            ));
            events.push((AgentEvent::SpeakerStarted, vad_payload(speaker.as_deref(), true)));
        }
        vad.current_speaker = speaker.clone();

        if has_valid_partial == vad.is_speaking {
            return events;
        }

        vad.is_speaking = !vad.is_speaking;
        events.push((
            if vad.is_speaking {
                AgentEvent::SpeakerStarted
            } else {
                AgentEvent::SpeakerEnded
            },
            vad_payload(speaker.as_deref(), vad.is_speaking),
        ));
        if !vad.is_speaking {
            vad.current_speaker = None;
        }
        events
    }

    async fn handle_connection_error(self: &Arc<Self>, error: colloquy_transport::TransportError) {
        tracing::warn!(error = %error, "connection_error");
        self.emitter.emit(
            AgentEvent::Error,
            json!({ "type": "connection_error", "reason": error.to_string() }),
        );
        self.teardown().await;
    }

    /// Force the session into disconnected and discard per-session state.
    async fn teardown(self: &Arc<Self>) {
        {
            let mut session = self.session.lock().unwrap();
            session.connected = false;
            session.ready_for_audio = false;
        }
        {
            let mut fragments = self.fragments.lock().await;
            fragments.reconciler.clear();
            fragments.current_view = None;
        }
        *self.vad.lock().unwrap() = VadState::default();
        self.turn.reset();
        *self.transport.lock().unwrap() = None;
        let mut background = self.background.lock().unwrap();
        for task in background.drain(..) {
            task.abort();
        }
    }
}

fn vad_payload(speaker: Option<&str>, is_active: bool) -> serde_json::Value {
    json!({ "status": { "speaker_id": speaker, "is_active": is_active } })
}

async fn turn_done_listener(weak: Weak<ClientInner>, mut done_rx: mpsc::UnboundedReceiver<u64>) {
    while let Some(turn_id) = done_rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.finish_turn(turn_id).await;
    }
}

async fn receive_loop(weak: Weak<ClientInner>, transport: Arc<dyn Transport>) {
    loop {
        let message = transport.receive().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match message {
            Ok(message) => inner.dispatch(message).await,
            Err(_) if inner.shutting_down.load(Ordering::Acquire) => return,
            Err(error) => {
                inner.handle_connection_error(error).await;
                return;
            }
        }
    }
}

/// Emits session metrics every ten seconds while anyone is listening.
async fn metrics_loop(weak: Weak<ClientInner>) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.emitter.listener_count(AgentEvent::Metrics) == 0 {
            continue;
        }
        let (total_seconds, total_bytes, last_ttfb) = {
            let session = inner.session.lock().unwrap();
            (
                session.total_audio_seconds,
                session.total_audio_bytes,
                session.last_ttfb_ms,
            )
        };
        inner.emitter.emit(
            AgentEvent::Metrics,
            json!({
                "total_time": (total_seconds * 1000.0).round() / 1000.0,
                "total_bytes": total_bytes,
                "last_ttfb": last_ttfb,
            }),
        );
    }
}
