//! # WebSocket Transcription Handler
//!
//! Socket-mode delivery: clients connect to `/ws/transcribe` and push
//! base64-encoded PCM frames as JSON text messages; transcripts come back
//! as JSON on the same socket. Each connection is exactly one audio source
//! driven by its own stream processor.
//!
//! ## WebSocket Protocol:
//! - **Client → Server**: `{"type": "audio", "data": "<base64 PCM>"}` or
//!   `{"type": "set_language", "code": "es"}`
//! - **Server → Client**: `{"type": "transcription", "text": "...",
//!   "isFinal": true, "latency_ms": 420}`
//! - Malformed messages are answered with an error frame and the stream
//!   continues; they are never fatal to the connection
//!
//! ## Actor Model:
//! Each connection is an Actix actor. The actor task only decodes and
//! forwards frames; chunking, gating and inference happen in the shared
//! pipeline, so a slow transcription never blocks the socket reader.

use crate::pipeline::{ChannelFrameSource, StreamProcessor, TranscriptEvent, TranscriptSink};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any client traffic before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames buffered between the socket reader and the stream processor.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Messages exchanged with socket-mode clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketMessage {
    /// Base64-encoded PCM audio chunk from the client
    #[serde(rename = "audio")]
    Audio { data: String },

    /// Language selection for this connection's source
    #[serde(rename = "set_language")]
    SetLanguage { code: String },

    /// Transcription result from the server
    #[serde(rename = "transcription")]
    Transcription {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
        latency_ms: u64,
    },

    /// Error report for a malformed client message
    #[serde(rename = "error")]
    Error { message: String },
}

/// Decode the base64 payload of an audio message into raw PCM bytes.
fn decode_audio_payload(data: &str) -> Result<Vec<u8>, String> {
    BASE64_STANDARD
        .decode(data)
        .map_err(|e| format!("Invalid base64 audio data: {}", e))
}

/// WebSocket actor driving one socket-mode audio source.
pub struct TranscribeSocket {
    /// Identity of this connection's audio source
    source_id: String,

    /// Shared application state
    state: web::Data<AppState>,

    /// Sender half of the frame channel; dropping it stops the processor
    frames: Option<mpsc::Sender<Vec<u8>>>,

    /// Last time the client showed signs of life
    last_heartbeat: Instant,
}

impl TranscribeSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            source_id: Uuid::new_v4().to_string(),
            state,
            frames: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Forward one decoded PCM frame to the stream processor.
    ///
    /// Uses `try_send` so a saturated pipeline never blocks the socket
    /// reader; an overflowing frame is dropped with a warning, which only
    /// costs that slice of audio.
    fn forward_frame(&self, frame: Vec<u8>) {
        let Some(frames) = &self.frames else {
            return;
        };

        match frames.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(source = %self.source_id, "Frame channel full, dropping audio frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(source = %self.source_id, "Frame channel closed, frame dropped");
            }
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        let error_msg = SocketMessage::Error {
            message: message.to_string(),
        };
        if let Ok(json) = serde_json::to_string(&error_msg) {
            ctx.text(json);
        }
        warn!(source = %self.source_id, "Socket error: {}", message);
    }
}

/// Transcript sink that routes events back to the connection's actor.
///
/// `do_send` on a stopped actor silently drops the message, which is
/// exactly the contract for events of an already-stopped source.
struct SocketSink {
    addr: Addr<TranscribeSocket>,
}

#[async_trait]
impl TranscriptSink for SocketSink {
    async fn emit(&self, event: TranscriptEvent) {
        self.addr.do_send(SendTranscript(event));
    }
}

/// Message carrying a finished transcript to the WebSocket actor.
#[derive(Message)]
#[rtype(result = "()")]
struct SendTranscript(TranscriptEvent);

impl Actor for TranscribeSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(source = %self.source_id, "Socket-mode connection started");
        self.state.increment_active_streams();

        // Heartbeat: ping on an interval, drop clients that stay silent
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(source = %act.source_id, "Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        // One stream processor per connection, fed through a channel so
        // the actor never waits on the pipeline
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.frames = Some(frame_tx);

        let processor = StreamProcessor::new(
            self.source_id.clone(),
            self.state.get_config().stream_settings(),
            self.state.recognizer.clone(),
            self.state.socket_languages.clone(),
            std::sync::Arc::new(SocketSink {
                addr: ctx.address(),
            }),
            self.state.pipeline_counters.clone(),
        );
        tokio::spawn(processor.run(ChannelFrameSource::new(frame_rx)));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(source = %self.source_id, "Socket-mode connection stopped");

        // Closing the frame channel terminates the processor; any
        // in-flight inference finishes and its event is dropped
        self.frames = None;
        self.state.socket_languages.remove(&self.source_id);
        self.state.decrement_active_streams();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscribeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();

                match serde_json::from_str::<SocketMessage>(&text) {
                    Ok(SocketMessage::Audio { data }) => match decode_audio_payload(&data) {
                        Ok(frame) => self.forward_frame(frame),
                        Err(err) => self.send_error(ctx, &err),
                    },
                    Ok(SocketMessage::SetLanguage { code }) => {
                        info!(source = %self.source_id, code = %code, "Language switched");
                        self.state.socket_languages.set(&self.source_id, code);
                    }
                    Ok(_) => {
                        self.send_error(ctx, "Unexpected message type from client");
                    }
                    Err(err) => {
                        self.send_error(ctx, &format!("Invalid JSON: {}", err));
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "Binary frames are not part of this protocol");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(source = %self.source_id, "Socket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(source = %self.source_id, "Socket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendTranscript> for TranscribeSocket {
    type Result = ();

    fn handle(&mut self, msg: SendTranscript, ctx: &mut Self::Context) {
        let event = msg.0;
        let message = SocketMessage::Transcription {
            text: event.text,
            is_final: true,
            latency_ms: event.latency_ms,
        };

        if let Ok(json) = serde_json::to_string(&message) {
            ctx.text(json);
        }
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a [`TranscribeSocket`] actor.
pub async fn transcribe_socket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();

    if app_state.active_streams() >= config.performance.max_concurrent_streams as u32 {
        warn!("Rejecting socket connection, stream limit reached");
        return Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": "Maximum concurrent streams reached"
        })));
    }

    info!(
        "New socket-mode connection from {:?}",
        req.connection_info().peer_addr()
    );

    ws::start(TranscribeSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_message_round_trip() {
        let payload = BASE64_STANDARD.encode([0u8, 1, 2, 3]);
        let json = format!(r#"{{"type":"audio","data":"{}"}}"#, payload);

        match serde_json::from_str::<SocketMessage>(&json).unwrap() {
            SocketMessage::Audio { data } => {
                assert_eq!(decode_audio_payload(&data).unwrap(), vec![0u8, 1, 2, 3]);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_set_language_message_parses() {
        let json = r#"{"type":"set_language","code":"es"}"#;
        match serde_json::from_str::<SocketMessage>(json).unwrap() {
            SocketMessage::SetLanguage { code } => assert_eq!(code, "es"),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_transcription_serializes_with_is_final_key() {
        let message = SocketMessage::Transcription {
            text: "hello".to_string(),
            is_final: true,
            latency_ms: 42,
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"transcription""#));
        assert!(json.contains(r#""isFinal":true"#));
        assert!(json.contains(r#""latency_ms":42"#));
    }

    #[test]
    fn test_bad_base64_is_rejected() {
        assert!(decode_audio_payload("not-valid-base64!!!").is_err());
    }
}
