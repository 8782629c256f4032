//! # Audio Processing Module
//!
//! Byte-level audio handling for the transcription pipeline: accumulating
//! raw PCM frames into fixed-duration analysis windows and gating out
//! silent windows before they cost an inference pass.
//!
//! ## Key Components:
//! - **Chunk Buffer**: per-source accumulation with sample-aligned cuts
//! - **Silence Gate**: integer-domain peak amplitude pre-filter
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod chunk;    // Accumulation buffer and analysis windows
pub mod gate;     // Peak-amplitude silence gate
