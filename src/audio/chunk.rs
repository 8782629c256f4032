//! # Chunk Buffer
//!
//! Accumulates raw PCM bytes per audio source and cuts fixed-duration
//! analysis windows out of the stream. This is the byte-accounting heart of
//! the pipeline: frames of arbitrary size go in, windows of a fixed size
//! come out, and whatever doesn't fill a window yet is retained for the
//! next cut.
//!
//! ## Key Properties:
//! - **Conservation**: bytes returned across all windows plus the retained
//!   remainder always equals the bytes pushed
//! - **Sample alignment**: a cut never splits a 16-bit sample; window byte
//!   counts are always even
//! - **Single owner**: one stream processor owns one buffer, so no locking
//!   is needed here
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit signed PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Bytes per 16-bit PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Compute the window threshold in bytes for a chunk duration.
///
/// ## Calculation:
/// threshold = duration_secs × sample_rate × 2 bytes per sample
///
/// ## Example:
/// 1.0s at 16kHz = 32,000 bytes; 3.0s at 16kHz = 96,000 bytes.
pub fn window_threshold_bytes(chunk_duration_secs: f64, sample_rate: u32) -> usize {
    (chunk_duration_secs * sample_rate as f64) as usize * BYTES_PER_SAMPLE
}

/// An immutable fixed-length slice of 16-bit signed samples.
///
/// Produced by [`ChunkBuffer::try_take_window`], consumed exactly once by
/// the gate/inference path. The byte count is always even: a cut is rounded
/// down to the last whole sample and carried bytes prepend the next window.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    samples: Vec<i16>,
}

impl AnalysisWindow {
    /// Parse little-endian PCM bytes into a window.
    ///
    /// The input length must be even; callers guarantee this by cutting on
    /// sample boundaries.
    fn from_pcm_bytes(data: &[u8]) -> Self {
        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE);

        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        Self { samples }
    }

    /// The raw 16-bit samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Window length in bytes (always even).
    pub fn byte_len(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE
    }

    /// Whether the window contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Window duration in seconds at the given sample rate.
    pub fn duration_seconds(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate as f64
    }

    /// Convert to normalized 32-bit floats for inference.
    ///
    /// ## Conversion:
    /// Scales from the i16 range [-32768, 32767] to [-1.0, 1.0] by dividing
    /// by 32768, the format the recognizer expects.
    pub fn to_normalized(&self) -> Vec<f32> {
        self.samples.iter().map(|&sample| {
            sample as f32 / 32768.0
        }).collect()
    }
}

/// Per-source accumulation buffer that yields fixed-size analysis windows.
///
/// ## Contract:
/// - [`push`](Self::push) appends raw bytes unconditionally
/// - [`try_take_window`](Self::try_take_window) cuts a window once enough
///   bytes have accumulated, retaining the remainder as the new buffer
///
/// No error conditions; this is purely byte accounting.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    /// Accumulated bytes not yet cut into a window
    pending: Vec<u8>,
}

impl ChunkBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Append raw PCM bytes from an incoming frame.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Number of bytes accumulated but not yet cut.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Cut a window if enough bytes have accumulated.
    ///
    /// ## Behavior:
    /// - Below `threshold_bytes`: returns `None`, buffer untouched
    /// - At or above: cuts at the threshold rounded down to a whole sample,
    ///   returns that prefix as the window, keeps the rest as the new
    ///   accumulation buffer
    ///
    /// ## Example:
    /// 48,000 bytes accumulated with a 32,000-byte threshold yields one
    /// 32,000-byte window and retains 16,000 bytes.
    pub fn try_take_window(&mut self, threshold_bytes: usize) -> Option<AnalysisWindow> {
        if self.pending.len() < threshold_bytes {
            return None;
        }

        // Round down to the last whole sample so a cut never splits one
        let cut = (threshold_bytes / BYTES_PER_SAMPLE) * BYTES_PER_SAMPLE;
        if cut == 0 {
            return None;
        }

        let remainder = self.pending.split_off(cut);
        let window_bytes = std::mem::replace(&mut self.pending, remainder);

        Some(AnalysisWindow::from_pcm_bytes(&window_bytes))
    }

    /// Drop everything accumulated (source ended mid-window).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_threshold_calculation() {
        assert_eq!(window_threshold_bytes(1.0, 16000), 32_000);
        assert_eq!(window_threshold_bytes(3.0, 16000), 96_000);
        assert_eq!(window_threshold_bytes(1.5, 16000), 48_000);
    }

    #[test]
    fn test_below_threshold_returns_none() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(&[0u8; 100]);

        assert!(buffer.try_take_window(200).is_none());
        // Buffer must be left untouched
        assert_eq!(buffer.pending_bytes(), 100);
    }

    #[test]
    fn test_one_and_a_half_seconds_yields_one_window() {
        // 48,000 bytes (1.5s at 16kHz/16-bit) against a 1.0s threshold
        let mut buffer = ChunkBuffer::new();
        buffer.push(&vec![1u8; 48_000]);

        let window = buffer.try_take_window(32_000).expect("window expected");
        assert_eq!(window.byte_len(), 32_000);
        assert_eq!(buffer.pending_bytes(), 16_000);

        // The remainder alone is below threshold
        assert!(buffer.try_take_window(32_000).is_none());
    }

    #[test]
    fn test_byte_conservation_across_windows() {
        let mut buffer = ChunkBuffer::new();
        let threshold = 320;
        let mut pushed = 0usize;
        let mut taken = 0usize;

        // Push frames of awkward sizes and drain after each push
        for size in [100usize, 250, 64, 700, 2, 330, 158] {
            buffer.push(&vec![7u8; size]);
            pushed += size;

            while let Some(window) = buffer.try_take_window(threshold) {
                assert_eq!(window.byte_len() % 2, 0);
                taken += window.byte_len();
            }
        }

        assert_eq!(taken + buffer.pending_bytes(), pushed);
    }

    #[test]
    fn test_window_parses_little_endian_samples() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(&pcm_bytes(&[100, -200, 32767, -32768]));

        let window = buffer.try_take_window(8).unwrap();
        assert_eq!(window.samples(), &[100, -200, 32767, -32768]);
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn test_normalization_range() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(&pcm_bytes(&[0, 16384, -16384, 32767, -32768]));

        let window = buffer.try_take_window(10).unwrap();
        let floats = window.to_normalized();

        assert_eq!(floats[0], 0.0);
        assert!((floats[1] - 0.5).abs() < 1e-6);
        assert!((floats[2] + 0.5).abs() < 1e-6);
        assert!(floats[3] < 1.0 && floats[3] > 0.99);
        assert_eq!(floats[4], -1.0);
    }

    #[test]
    fn test_clear_drops_remainder() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(&[0u8; 500]);
        buffer.clear();
        assert_eq!(buffer.pending_bytes(), 0);
    }
}
