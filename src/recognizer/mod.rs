//! # Recognizer Module
//!
//! Speech-to-text for the transcription pipeline using Whisper via the
//! Candle-rs framework (pure Rust, no FFI to whisper.cpp).
//!
//! ## Key Components:
//! - **Model**: loading and greedy decoding of the configured Whisper
//!   variant
//! - **Service**: the process-wide shared handle that serializes inference
//!   and absorbs failures
//! - **Hallucination Filter**: pure classification of recognizer artifacts
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, good balance for development
//! - **small**: ~244MB, better accuracy (default here)
//! - **medium**: ~769MB, slower than real-time on modest CPUs
//! - **large**: ~1550MB, not practical for this pipeline

pub mod filter;    // Hallucination blocklist classifier
pub mod model;     // Whisper loading and decoding
pub mod service;   // Shared, serialized inference service

pub use filter::filter_hallucinations;
pub use model::ModelSize;
pub use service::{RecognizerService, RecognizerSettings, SpeechEngine};
