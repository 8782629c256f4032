//! # Live Transcribe Backend
//!
//! Real-time speech-to-text worker. Audio from concurrent participants is
//! chunked into fixed-duration windows, gated for silence, transcribed by
//! a single shared Whisper instance, filtered for recognizer artifacts,
//! and republished as transcript messages with per-participant language
//! selection.
//!
//! ## Delivery Modes:
//! Two transports share one processing pipeline:
//! - **Socket mode** ([`websocket`]): clients push base64 PCM frames over
//!   a WebSocket served by this binary
//! - **Session mode** ([`session`]): a real-time session transport (rooms,
//!   tracks, data channel) delivers frames and control messages through
//!   the boundary traits in that module; the transport itself lives
//!   outside this crate
//!
//! ## Architecture:
//! - **audio**: chunk buffering and the silence gate
//! - **pipeline**: the per-source stream processor both adapters run
//! - **recognizer**: the shared Whisper service, serialized inference,
//!   hallucination filtering
//! - **language**: per-source language selection state
//! - **config / state / error / health / middleware / handlers**: the
//!   HTTP surface and service plumbing

pub mod audio;       // Chunk buffer and silence gate
pub mod config;      // Configuration management (config.rs)
pub mod error;       // Error handling types (error.rs)
pub mod handlers;    // HTTP request handlers (handlers/ directory)
pub mod health;      // Health check endpoints (health.rs)
pub mod language;    // Per-source language state
pub mod middleware;  // Custom middleware (middleware/ directory)
pub mod pipeline;    // Stream processor and capability traits
pub mod recognizer;  // Shared Whisper service and filtering
pub mod session;     // Session-mode transport adapter
pub mod state;       // Application state management (state.rs)
pub mod websocket;   // Socket-mode WebSocket adapter
