//! # Silence Gate
//!
//! Cheap amplitude pre-filter that keeps obviously silent windows away from
//! the recognizer. Inference is the expensive operation in this pipeline,
//! so this check runs on the raw integer samples before any floating-point
//! conversion or dispatch.
//!
//! The threshold trades false negatives on quiet speech against wasted
//! inference on background noise; observed useful values sit between 50
//! and 800.

use crate::audio::chunk::AnalysisWindow;

/// Amplitude gate applied to every analysis window.
#[derive(Debug, Clone, Copy)]
pub struct SilenceGate {
    /// Minimum peak absolute sample value for a window to pass
    threshold: i32,
}

impl SilenceGate {
    pub fn new(threshold: i32) -> Self {
        Self { threshold }
    }

    /// Peak absolute sample value across the window (0 if empty).
    ///
    /// Widened to i32 before taking the absolute value so that
    /// `i16::MIN` doesn't overflow.
    pub fn peak_amplitude(window: &AnalysisWindow) -> i32 {
        window
            .samples()
            .iter()
            .map(|&sample| (sample as i32).abs())
            .max()
            .unwrap_or(0)
    }

    /// Whether the window is loud enough to be worth transcribing.
    pub fn passes(&self, window: &AnalysisWindow) -> bool {
        Self::peak_amplitude(window) >= self.threshold
    }
}
