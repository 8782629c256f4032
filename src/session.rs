//! # Session Adapter
//!
//! Bridges the external real-time session transport (rooms, tracks,
//! participants, data channel) onto the stream-processing pipeline. The
//! transport itself is an external collaborator: this module only sees its
//! boundary (a stream of [`RoomEvent`]s in, a [`DataPublisher`] out) and
//! everything else about room lifecycle and media negotiation stays on the
//! other side of that line.
//!
//! ## Responsibilities:
//! - Spawn one stream processor per subscribed **audio** track (other
//!   track kinds are ignored)
//! - Route `set_language` control messages into the session's language
//!   state, acknowledging actual changes with a status payload
//! - Publish transcript events as `transcription` data payloads to all
//!   participants
//! - Drop per-participant state on disconnect

use crate::language::LanguageState;
use crate::pipeline::{
    ChannelFrameSource, PipelineCounters, StreamProcessor, StreamSettings, TranscriptEvent,
    TranscriptSink,
};
use crate::recognizer::RecognizerService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Kind filter for subscribed tracks; only audio is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events the session transport delivers at the boundary.
///
/// Frames arrive as raw PCM (16kHz mono 16-bit little-endian) on a
/// per-track channel; closing that channel signals track end.
pub enum RoomEvent {
    /// A participant's track became available for consumption
    TrackSubscribed {
        identity: String,
        kind: TrackKind,
        frames: mpsc::Receiver<Vec<u8>>,
    },

    /// A data-channel message scoped to the sending identity
    DataReceived { identity: String, payload: Vec<u8> },

    /// The participant left; their sources are gone
    ParticipantDisconnected { identity: String },
}

/// Outbound half of the transport boundary: reliable delivery of a data
/// payload to all session participants.
#[async_trait]
pub trait DataPublisher: Send + Sync {
    async fn publish_data(&self, payload: Vec<u8>);
}

/// Control messages carried on the session data channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ControlMessage {
    #[serde(rename = "set_language")]
    SetLanguage { code: String },
}

/// Payloads published back into the session.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum SessionPayload {
    #[serde(rename = "transcription")]
    Transcription {
        text: String,
        participant: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        latency_ms: u64,
    },

    #[serde(rename = "status")]
    Status { message: String },
}

/// Transcript sink that publishes into the session data channel.
struct PublisherSink {
    publisher: Arc<dyn DataPublisher>,
}

#[async_trait]
impl TranscriptSink for PublisherSink {
    async fn emit(&self, event: TranscriptEvent) {
        let payload = SessionPayload::Transcription {
            text: event.text,
            participant: event.source,
            language: Some(event.language),
            latency_ms: event.latency_ms,
        };

        match serde_json::to_vec(&payload) {
            Ok(bytes) => self.publisher.publish_data(bytes).await,
            Err(e) => warn!("Failed to encode transcription payload: {}", e),
        }
    }
}

/// One agent per session: consumes room events, owns the session-mode
/// language state, fans subscribed audio tracks out to stream processors.
pub struct SessionAgent {
    settings: StreamSettings,
    recognizer: Arc<RecognizerService>,
    languages: Arc<LanguageState>,
    publisher: Arc<dyn DataPublisher>,
    counters: PipelineCounters,
}

impl SessionAgent {
    pub fn new(
        settings: StreamSettings,
        recognizer: Arc<RecognizerService>,
        languages: Arc<LanguageState>,
        publisher: Arc<dyn DataPublisher>,
        counters: PipelineCounters,
    ) -> Self {
        Self {
            settings,
            recognizer,
            languages,
            publisher,
            counters,
        }
    }

    /// Consume room events until the transport closes the channel.
    pub async fn run(self, mut events: mpsc::Receiver<RoomEvent>) {
        info!("Session agent started");

        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::TrackSubscribed {
                    identity,
                    kind,
                    frames,
                } => self.handle_track(identity, kind, frames),
                RoomEvent::DataReceived { identity, payload } => {
                    self.handle_control(&identity, &payload).await;
                }
                RoomEvent::ParticipantDisconnected { identity } => {
                    self.languages.remove(&identity);
                    info!(participant = %identity, "Participant disconnected");
                }
            }
        }

        info!("Session agent stopped");
    }

    fn handle_track(&self, identity: String, kind: TrackKind, frames: mpsc::Receiver<Vec<u8>>) {
        if kind != TrackKind::Audio {
            debug!(participant = %identity, "Ignoring non-audio track");
            return;
        }

        info!(participant = %identity, "Transcribing subscribed audio track");

        let sink = Arc::new(PublisherSink {
            publisher: self.publisher.clone(),
        });
        let processor = StreamProcessor::new(
            identity,
            self.settings.clone(),
            self.recognizer.clone(),
            self.languages.clone(),
            sink,
            self.counters.clone(),
        );

        tokio::spawn(processor.run(ChannelFrameSource::new(frames)));
    }

    async fn handle_control(&self, identity: &str, payload: &[u8]) {
        match serde_json::from_slice::<ControlMessage>(payload) {
            Ok(ControlMessage::SetLanguage { code }) => {
                if self.languages.is_current(identity, &code) {
                    debug!(participant = %identity, code = %code, "Language unchanged");
                    return;
                }

                self.languages.set(identity, &code);
                info!(participant = %identity, code = %code, "Language switched");

                let ack = SessionPayload::Status {
                    message: format!("Language set to {}", code),
                };
                if let Ok(bytes) = serde_json::to_vec(&ack) {
                    self.publisher.publish_data(bytes).await;
                }
            }
            Err(e) => {
                // Malformed control traffic is ignored, never fatal
                warn!(participant = %identity, error = %e, "Ignoring malformed control message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{ModelSize, RecognizerSettings, SpeechEngine};
    use anyhow::Result;
    use std::time::Duration;
    use tokio::time::timeout;

    struct StaticEngine(&'static str);

    impl SpeechEngine for StaticEngine {
        fn transcribe(&mut self, _: &[f32], _: Option<&str>, _: f64) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn name(&self) -> String {
            "static".to_string()
        }
    }

    struct ChannelPublisher {
        sender: mpsc::UnboundedSender<serde_json::Value>,
    }

    #[async_trait]
    impl DataPublisher for ChannelPublisher {
        async fn publish_data(&self, payload: Vec<u8>) {
            let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            let _ = self.sender.send(value);
        }
    }

    fn agent_under_test(
        reply: &'static str,
    ) -> (
        mpsc::Sender<RoomEvent>,
        mpsc::UnboundedReceiver<serde_json::Value>,
        Arc<LanguageState>,
    ) {
        let recognizer = Arc::new(RecognizerService::with_engine(
            RecognizerSettings {
                model_size: ModelSize::Tiny,
                min_silence_ms: 1000,
                vad_threshold: 0.3,
                no_speech_threshold: 0.6,
            },
            Box::new(StaticEngine(reply)),
        ));
        let languages = Arc::new(LanguageState::new("en"));
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let publisher = Arc::new(ChannelPublisher { sender: publish_tx });

        let agent = SessionAgent::new(
            StreamSettings {
                chunk_duration_secs: 1.0,
                sample_rate: 16000,
                silence_threshold: 500,
            },
            recognizer,
            languages.clone(),
            publisher,
            PipelineCounters::default(),
        );

        let (event_tx, event_rx) = mpsc::channel(16);
        tokio::spawn(agent.run(event_rx));

        (event_tx, publish_rx, languages)
    }

    fn loud_frame(n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| if i % 2 == 0 { 1000i16 } else { -1000 })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    #[tokio::test]
    async fn test_audio_track_produces_transcription_payload() {
        let (events, mut published, _) = agent_under_test("good morning");

        let (frame_tx, frame_rx) = mpsc::channel(16);
        events
            .send(RoomEvent::TrackSubscribed {
                identity: "alice".to_string(),
                kind: TrackKind::Audio,
                frames: frame_rx,
            })
            .await
            .unwrap();

        frame_tx.send(loud_frame(16000)).await.unwrap();

        let payload = timeout(Duration::from_secs(2), published.recv())
            .await
            .expect("payload within deadline")
            .expect("payload expected");

        assert_eq!(payload["type"], "transcription");
        assert_eq!(payload["text"], "good morning");
        assert_eq!(payload["participant"], "alice");
        assert_eq!(payload["language"], "en");
        assert!(payload["latency_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_non_audio_tracks_are_ignored() {
        let (events, mut published, _) = agent_under_test("nope");

        let (frame_tx, frame_rx) = mpsc::channel(16);
        events
            .send(RoomEvent::TrackSubscribed {
                identity: "alice".to_string(),
                kind: TrackKind::Video,
                frames: frame_rx,
            })
            .await
            .unwrap();

        frame_tx.send(loud_frame(16000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(published.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_language_acknowledged_once() {
        let (events, mut published, languages) = agent_under_test("hola");

        let control = br#"{"type":"set_language","code":"es"}"#.to_vec();
        events
            .send(RoomEvent::DataReceived {
                identity: "alice".to_string(),
                payload: control.clone(),
            })
            .await
            .unwrap();

        let ack = timeout(Duration::from_secs(1), published.recv())
            .await
            .expect("ack within deadline")
            .expect("ack expected");
        assert_eq!(ack["type"], "status");
        assert_eq!(ack["message"], "Language set to es");
        assert_eq!(languages.resolve("alice"), "es");

        // Repeating the same code changes nothing and is not re-acked
        events
            .send(RoomEvent::DataReceived {
                identity: "alice".to_string(),
                payload: control,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(published.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_control_is_ignored() {
        let (events, mut published, languages) = agent_under_test("text");

        events
            .send(RoomEvent::DataReceived {
                identity: "alice".to_string(),
                payload: b"this is not json".to_vec(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(published.try_recv().is_err());
        assert_eq!(languages.resolve("alice"), "en");
    }

    #[tokio::test]
    async fn test_disconnect_drops_language_override() {
        let (events, _published, languages) = agent_under_test("text");

        languages.set("alice", "fr");
        events
            .send(RoomEvent::ParticipantDisconnected {
                identity: "alice".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(languages.resolve("alice"), "en");
    }
}
