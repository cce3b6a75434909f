//! End-to-end conversation flows over a scripted transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use colloquy_client::{
    AgentEvent, ClientError, DiarizationFocusConfig, FocusMode, SmartTurnPredicate,
    TextInputFlags, Transport, TurnPrediction, VoiceAgentClient, VoiceAgentConfig,
};
use colloquy_protocol::{
    Alternative, AttachesTo, ClientMessage, RecognitionResult, ResultKind, ServerMessage,
    TranscriptMetadata,
};
use colloquy_transport::TransportError;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as TokioMutex};

// --- Scripted transport ---

struct FakeTransport {
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    inbound_rx: TokioMutex<mpsc::UnboundedReceiver<ServerMessage>>,
    controls: StdMutex<Vec<ClientMessage>>,
    audio_frames: StdMutex<Vec<Vec<u8>>>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx,
            inbound_rx: TokioMutex::new(inbound_rx),
            controls: StdMutex::new(Vec::new()),
            audio_frames: StdMutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn push(&self, message: ServerMessage) {
        self.inbound_tx.send(message).expect("inbound channel open");
    }

    fn sent_controls(&self) -> Vec<ClientMessage> {
        self.controls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_control(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.controls.lock().unwrap().push(message);
        Ok(())
    }

    async fn send_audio(&self, frame: Vec<u8>) -> Result<u64, TransportError> {
        self.audio_frames.lock().unwrap().push(frame);
        Ok(self.seq.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn receive(&self) -> Result<ServerMessage, TransportError> {
        let mut inbound = self.inbound_rx.lock().await;
        inbound.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn last_audio_seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

// --- Message builders ---

fn word(content: &str, speaker: &str, start: f64, end: f64) -> RecognitionResult {
    RecognitionResult {
        kind: ResultKind::Word,
        start_time: start,
        end_time: end,
        is_eos: false,
        attaches_to: None,
        alternatives: vec![Alternative {
            content: content.to_string(),
            confidence: 0.95,
            language: Some("en".to_string()),
            speaker: Some(speaker.to_string()),
            tags: Vec::new(),
        }],
    }
}

fn full_stop(speaker: &str, at: f64) -> RecognitionResult {
    RecognitionResult {
        kind: ResultKind::Punctuation,
        start_time: at,
        end_time: at,
        is_eos: true,
        attaches_to: Some(AttachesTo::Previous),
        alternatives: vec![Alternative {
            content: ".".to_string(),
            confidence: 1.0,
            language: Some("en".to_string()),
            speaker: Some(speaker.to_string()),
            tags: Vec::new(),
        }],
    }
}

fn metadata(start: f64, end: f64) -> TranscriptMetadata {
    TranscriptMetadata {
        start_time: start,
        end_time: end,
        transcript: String::new(),
    }
}

fn partial(results: Vec<RecognitionResult>, end: f64) -> ServerMessage {
    ServerMessage::AddPartialTranscript {
        metadata: metadata(0.0, end),
        results,
    }
}

fn transcript(results: Vec<RecognitionResult>, end: f64) -> ServerMessage {
    ServerMessage::AddTranscript {
        metadata: metadata(0.0, end),
        results,
    }
}

fn recognition_started() -> ServerMessage {
    ServerMessage::RecognitionStarted {
        id: Some("session-1".to_string()),
        language_pack_info: None,
    }
}

// --- Event capture ---

type Events = Arc<StdMutex<Vec<(&'static str, Value)>>>;

fn capture_events(client: &VoiceAgentClient) -> Events {
    let events: Events = Arc::new(StdMutex::new(Vec::new()));
    for (event, label) in [
        (AgentEvent::RecognitionStarted, "recognition_started"),
        (AgentEvent::AddInterimSegment, "add_interim_segment"),
        (AgentEvent::AddSegment, "add_segment"),
        (AgentEvent::SpeakerStarted, "speaker_started"),
        (AgentEvent::SpeakerEnded, "speaker_ended"),
        (AgentEvent::EndOfTurn, "end_of_turn"),
        (AgentEvent::TtfbMetrics, "ttfb_metrics"),
        (AgentEvent::Error, "error"),
    ] {
        let sink = events.clone();
        client.on(event, move |payload| {
            sink.lock().unwrap().push((label, payload.clone()));
        });
    }
    events
}

fn labels(events: &Events) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|(l, _)| *l).collect()
}

fn segment_texts(events: &Events, label: &str) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|(l, _)| *l == label)
        .flat_map(|(_, payload)| {
            payload["segments"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|s| s["text"].as_str().unwrap_or_default().to_string())
        })
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

async fn connected_client(
    config: VoiceAgentConfig,
) -> (VoiceAgentClient, Arc<FakeTransport>, Events) {
    let client = VoiceAgentClient::new("wss://rt.invalid/v2", "test-key", config).unwrap();
    let events = capture_events(&client);
    let transport = FakeTransport::new();
    transport.push(recognition_started());
    client.connect_with(transport.clone()).await.unwrap();
    (client, transport, events)
}

// --- Tests ---

#[tokio::test]
async fn test_connect_emits_recognition_started() {
    let (client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    assert!(client.is_connected());
    assert!(client.is_ready_for_audio());
    assert_eq!(labels(&events), vec!["recognition_started"]);
    assert!(matches!(
        transport.sent_controls()[0],
        ClientMessage::StartRecognition { .. }
    ));
}

#[tokio::test]
async fn test_second_connect_fails_while_connected() {
    let (client, _transport, _events) = connected_client(VoiceAgentConfig::fixed()).await;

    let second = FakeTransport::new();
    second.push(recognition_started());
    assert!(matches!(
        client.connect_with(second).await,
        Err(ClientError::AlreadyConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout() {
    let client =
        VoiceAgentClient::new("wss://rt.invalid/v2", "test-key", VoiceAgentConfig::fixed())
            .unwrap();
    let transport = FakeTransport::new();

    // No acknowledgement ever arrives.
    let result = client.connect_with(transport).await;
    assert!(matches!(result, Err(ClientError::HandshakeTimeout(_))));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_audio_before_ready_is_dropped() {
    let client =
        VoiceAgentClient::new("wss://rt.invalid/v2", "test-key", VoiceAgentConfig::fixed())
            .unwrap();

    // Prebuffered speech racing the handshake must not error.
    client.send_audio(&[0u8; 640]).await.unwrap();
    assert_eq!(client.total_audio_seconds(), 0.0);
}

#[tokio::test]
async fn test_audio_accounting_and_sequence() {
    let (client, transport, _events) = connected_client(VoiceAgentConfig::fixed()).await;

    // 0.5 s of 16 kHz 16-bit audio in 100 ms frames.
    for _ in 0..5 {
        client.send_audio(&[0u8; 3200]).await.unwrap();
    }

    assert!((client.total_audio_seconds() - 0.5).abs() < 1e-9);
    assert_eq!(transport.last_audio_seq(), 5);
}

/// S1: single speaker, fixed mode with a server end-of-utterance.
#[tokio::test]
async fn test_single_speaker_fixed_turn() {
    let (client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    transport.push(partial(vec![word("Hello", "S1", 0.6, 0.9)], 0.9));
    transport.push(partial(
        vec![word("Hello", "S1", 0.6, 0.9), word("world", "S1", 0.9, 1.1)],
        1.1,
    ));
    transport.push(transcript(
        vec![
            word("Hello", "S1", 0.6, 0.9),
            word("world", "S1", 0.9, 1.1),
            full_stop("S1", 1.2),
        ],
        1.2,
    ));
    transport.push(ServerMessage::EndOfUtterance { metadata: None });

    wait_until(|| labels(&events).contains(&"end_of_turn")).await;

    assert_eq!(
        segment_texts(&events, "add_interim_segment"),
        vec!["Hello", "Hello world"]
    );
    assert_eq!(segment_texts(&events, "add_segment"), vec!["Hello world."]);

    let recorded = events.lock().unwrap();
    let (_, end_of_turn) = recorded.iter().find(|(l, _)| *l == "end_of_turn").unwrap();
    assert_eq!(end_of_turn["turn_id"], 0);
    drop(recorded);
    assert_eq!(client.turn_id(), 1);
}

/// S2: two speakers with retain-focus on S1.
#[tokio::test]
async fn test_two_speakers_retain_focus() {
    let config = VoiceAgentConfig {
        enable_diarization: true,
        diarization_focus: DiarizationFocusConfig {
            focus_speakers: vec!["S1".to_string()],
            ignore_speakers: Vec::new(),
            focus_mode: FocusMode::Retain,
        },
        ..VoiceAgentConfig::fixed()
    };
    let (_client, transport, events) = connected_client(config).await;

    transport.push(transcript(
        vec![
            word("Yes", "S1", 0.2, 0.5),
            full_stop("S1", 0.5),
            word("No", "S2", 0.8, 1.1),
            full_stop("S2", 1.1),
        ],
        1.1,
    ));

    wait_until(|| !segment_texts(&events, "add_segment").is_empty()).await;

    let recorded = events.lock().unwrap();
    let (_, payload) = recorded.iter().find(|(l, _)| *l == "add_segment").unwrap();
    let segments = payload["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["text"], "Yes.");
    assert_eq!(segments[0]["is_active"], true);
    assert_eq!(segments[1]["text"], "No.");
    assert_eq!(segments[1]["is_active"], false);
}

/// S4: reserved speaker labels never reach the event stream.
#[tokio::test]
async fn test_reserved_speaker_suppression() {
    let (_client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    transport.push(transcript(
        vec![
            word("ignore", "__ASSISTANT__", 0.1, 0.3),
            word("me", "__ASSISTANT__", 0.3, 0.5),
            word("hello", "S1", 0.8, 1.1),
        ],
        1.1,
    ));

    wait_until(|| !segment_texts(&events, "add_segment").is_empty()).await;

    let finals = segment_texts(&events, "add_segment");
    assert_eq!(finals, vec!["hello"]);
    assert!(segment_texts(&events, "add_interim_segment")
        .iter()
        .all(|t| !t.contains("ignore")));
}

/// S6: external mode finalizes only on request.
#[tokio::test]
async fn test_external_finalize() {
    let (client, transport, events) = connected_client(VoiceAgentConfig::external()).await;

    transport.push(partial(
        vec![word("Welcome", "S1", 0.2, 0.5), word("to", "S1", 0.5, 0.7)],
        0.7,
    ));
    wait_until(|| !segment_texts(&events, "add_interim_segment").is_empty()).await;
    assert!(!labels(&events).contains(&"end_of_turn"));

    let started = std::time::Instant::now();
    client.finalize(None).await.unwrap();
    transport.push(transcript(
        vec![
            word("Welcome", "S1", 0.2, 0.5),
            word("to", "S1", 0.5, 0.7),
            word("Speechmatics", "S1", 0.7, 1.3),
        ],
        1.3,
    ));

    wait_until(|| labels(&events).contains(&"end_of_turn")).await;
    assert!(started.elapsed() < Duration::from_millis(500));

    let finals = segment_texts(&events, "add_segment");
    assert!(finals.contains(&"Welcome to Speechmatics".to_string()));
    assert!(transport
        .sent_controls()
        .iter()
        .any(|m| matches!(m, ClientMessage::Finalize)));
}

/// Replaying a final batch is idempotent: no duplicate finals emitted.
#[tokio::test]
async fn test_duplicate_final_echo() {
    let (_client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    let batch = vec![
        word("Hello", "S1", 0.6, 0.9),
        word("world", "S1", 0.9, 1.1),
        full_stop("S1", 1.2),
    ];
    transport.push(transcript(batch.clone(), 1.2));
    wait_until(|| !segment_texts(&events, "add_segment").is_empty()).await;

    transport.push(transcript(batch, 1.2));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(segment_texts(&events, "add_segment"), vec!["Hello world."]);
}

#[tokio::test]
async fn test_speaker_vad_events() {
    let config = VoiceAgentConfig {
        enable_diarization: true,
        ..VoiceAgentConfig::fixed()
    };
    let (_client, transport, events) = connected_client(config).await;

    transport.push(partial(vec![word("Hello", "S1", 0.2, 0.5)], 0.5));
    wait_until(|| labels(&events).contains(&"speaker_started")).await;

    // A partial with no valid words ends the speech run.
    transport.push(partial(Vec::new(), 0.8));
    wait_until(|| labels(&events).contains(&"speaker_ended")).await;

    let recorded = events.lock().unwrap();
    let (_, started) = recorded
        .iter()
        .find(|(l, _)| *l == "speaker_started")
        .unwrap();
    assert_eq!(started["status"]["speaker_id"], "S1");
    assert_eq!(started["status"]["is_active"], true);
}

#[tokio::test]
async fn test_ttfb_metric_emitted() {
    let (client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    // 2 s of audio sent, first partial covers up to 1.5 s: 500 ms TTFB.
    for _ in 0..20 {
        client.send_audio(&[0u8; 3200]).await.unwrap();
    }
    transport.push(partial(vec![word("Hello", "S1", 1.2, 1.5)], 1.5));

    wait_until(|| labels(&events).contains(&"ttfb_metrics")).await;
    assert!((client.last_ttfb_ms() - 500.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_server_error_terminates_session() {
    let (client, transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    transport.push(ServerMessage::Error {
        kind: Some("quota_exceeded".to_string()),
        reason: "out of quota".to_string(),
    });

    wait_until(|| labels(&events).contains(&"error")).await;
    wait_until(|| !client.is_connected()).await;
}

#[tokio::test]
async fn test_disconnect_sends_end_of_stream_and_is_idempotent() {
    let (client, transport, _events) = connected_client(VoiceAgentConfig::fixed()).await;

    for _ in 0..3 {
        client.send_audio(&[0u8; 3200]).await.unwrap();
    }
    transport.push(ServerMessage::EndOfTranscript);

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    assert!(transport.sent_controls().iter().any(|m| matches!(
        m,
        ClientMessage::EndOfStream { last_seq_no: 3 }
    )));

    // Second disconnect is a no-op.
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_text_input_emits_immediate_turn() {
    let (client, _transport, events) = connected_client(VoiceAgentConfig::fixed()).await;

    client.send_text_input("book a table", TextInputFlags::default());

    assert_eq!(segment_texts(&events, "add_segment"), vec!["book a table"]);
    assert!(labels(&events).contains(&"end_of_turn"));
    assert_eq!(client.turn_id(), 1);
}

struct AlwaysComplete;

#[async_trait]
impl SmartTurnPredicate for AlwaysComplete {
    async fn predict(
        &self,
        _audio: &[u8],
        _language: &str,
    ) -> colloquy_turn::Result<TurnPrediction> {
        Ok(TurnPrediction {
            probability: 0.97,
            threshold: 0.8,
        })
    }
}

/// A complete acoustic verdict short-circuits the adaptive timer.
#[tokio::test]
async fn test_smart_turn_short_circuit() {
    let client = VoiceAgentClient::new(
        "wss://rt.invalid/v2",
        "test-key",
        VoiceAgentConfig::smart_turn(),
    )
    .unwrap();
    client.set_turn_predicate(Arc::new(AlwaysComplete));
    let events = capture_events(&client);
    let transport = FakeTransport::new();
    transport.push(recognition_started());
    client.connect_with(transport.clone()).await.unwrap();

    // One second of audio so the rolling buffer has a window to slice.
    for _ in 0..10 {
        client.send_audio(&[1u8; 3200]).await.unwrap();
    }
    transport.push(partial(vec![word("done", "S1", 0.2, 0.6)], 0.6));

    // Without the model the adaptive timer would hold for >1 s; the
    // complete verdict collapses it.
    let started = std::time::Instant::now();
    wait_until(|| labels(&events).contains(&"end_of_turn")).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}
