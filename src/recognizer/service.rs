//! # Recognizer Service
//!
//! Owns the one loaded acoustic model and keeps it safe under concurrent
//! callers. Every stream processor in the process transcribes through this
//! service; an internal async mutex guarantees at most one inference runs
//! against the shared model at a time (the model keeps decoder state and is
//! not reentrant).
//!
//! ## Failure Policy:
//! Inference never raises to callers. Any internal failure is logged and
//! surfaced as an empty string so that one bad window cannot take down a
//! source's stream. A failed model load leaves the service unloaded and
//! `transcribe` returns empty output indefinitely; there is no automatic
//! retry.
//!
//! ## Inner VAD:
//! In addition to the outer amplitude gate, the service runs a cheap
//! voice-activity pass on the normalized samples (frame-energy runs) and
//! the model itself scores a no-speech probability on the first decode
//! step. Defense in depth: the outer gate is an integer peak check, this
//! layer is float/model aware.

use crate::recognizer::model::{ModelSize, WhisperModel};
use anyhow::Result;
use candle_core::Device;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Milliseconds per VAD analysis frame.
const VAD_FRAME_MS: usize = 30;

/// Shortest voiced run that counts as speech.
const MIN_SPEECH_MS: usize = 150;

/// RMS level treated as full speech confidence (≈ -34 dBFS).
const SPEECH_RMS_REFERENCE: f32 = 0.02;

/// Samples per second the pipeline feeds in.
const SAMPLE_RATE: usize = 16000;

/// Tunable recognizer behavior (see the config module for defaults).
#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    /// Which Whisper variant to load
    pub model_size: ModelSize,

    /// Trailing silence longer than this is trimmed before decoding (ms)
    pub min_silence_ms: u64,

    /// Per-frame voice confidence floor, 0.0..1.0
    pub vad_threshold: f64,

    /// Model no-speech probability above which a window yields no text
    pub no_speech_threshold: f64,
}

/// Abstraction over the loaded model so tests can substitute a mock.
pub trait SpeechEngine: Send {
    /// Transcribe normalized samples, returning raw recognizer text.
    fn transcribe(
        &mut self,
        samples: &[f32],
        language: Option<&str>,
        no_speech_threshold: f64,
    ) -> Result<String>;

    /// Human-readable engine name for diagnostics.
    fn name(&self) -> String;
}

impl SpeechEngine for WhisperModel {
    fn transcribe(
        &mut self,
        samples: &[f32],
        language: Option<&str>,
        no_speech_threshold: f64,
    ) -> Result<String> {
        WhisperModel::transcribe(self, samples, language, no_speech_threshold)
    }

    fn name(&self) -> String {
        format!("whisper-{}", self.size())
    }
}

/// The process-wide recognizer handle shared by all stream processors.
pub struct RecognizerService {
    /// The loaded engine, if any. The mutex is the single global critical
    /// section around inference.
    engine: Mutex<Option<Box<dyn SpeechEngine>>>,

    settings: RecognizerSettings,

    /// Inference calls currently executing (0 or 1 by construction)
    inflight: AtomicUsize,

    /// Highest concurrent inference count ever observed
    peak_inflight: AtomicUsize,

    /// Completed inference calls since startup
    completed: AtomicU64,
}

impl RecognizerService {
    /// Create an unloaded service. Call [`load`](Self::load) before use.
    pub fn new(settings: RecognizerSettings) -> Self {
        Self {
            engine: Mutex::new(None),
            settings,
            inflight: AtomicUsize::new(0),
            peak_inflight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Create a service around an already-built engine.
    ///
    /// Used by tests with a mock engine; also usable with a preloaded
    /// [`WhisperModel`].
    pub fn with_engine(settings: RecognizerSettings, engine: Box<dyn SpeechEngine>) -> Self {
        Self {
            engine: Mutex::new(Some(engine)),
            settings,
            inflight: AtomicUsize::new(0),
            peak_inflight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Load the acoustic model if not already resident.
    ///
    /// Idempotent and safe to call concurrently: callers serialize on the
    /// engine lock, and a call that finds the model already loaded logs
    /// and returns. A load failure is logged and leaves the service
    /// unloaded; it is not raised.
    pub async fn load(&self) {
        let mut guard = self.engine.lock().await;

        if let Some(engine) = guard.as_ref() {
            info!("Model already loaded (cached): {}", engine.name());
            return;
        }

        info!("Loading {} model...", self.settings.model_size);
        match WhisperModel::load(self.settings.model_size, Device::Cpu).await {
            Ok(model) => {
                *guard = Some(Box::new(model));
                info!("Model loaded successfully");
            }
            Err(e) => {
                error!("Failed to load model: {:#}", e);
            }
        }
    }

    /// Whether a model is currently resident.
    pub async fn is_loaded(&self) -> bool {
        self.engine.lock().await.is_some()
    }

    /// Name of the loaded engine, for health reporting.
    pub async fn engine_name(&self) -> Option<String> {
        self.engine.lock().await.as_ref().map(|e| e.name())
    }

    /// Transcribe one window of normalized samples.
    ///
    /// ## Behavior:
    /// - Unloaded service → `""`
    /// - Window judged speech-free by the energy VAD → `""`, no decode
    /// - Inference failure → logged, `""`
    /// - Otherwise the trimmed recognizer text
    ///
    /// Concurrent callers queue on the internal lock; at most one
    /// inference executes at a time.
    pub async fn transcribe(&self, samples: &[f32], language: &str) -> String {
        // Cheap float-domain VAD before taking the inference lock
        let Some(speech) = trim_for_speech(samples, &self.settings) else {
            debug!("Window rejected by energy VAD");
            return String::new();
        };

        let mut guard = self.engine.lock().await;
        let Some(engine) = guard.as_mut() else {
            debug!("Transcribe called with no model loaded");
            return String::new();
        };

        let inflight = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inflight.fetch_max(inflight, Ordering::SeqCst);

        let result = engine.transcribe(
            speech,
            Some(language),
            self.settings.no_speech_threshold,
        );

        self.inflight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                error!("Transcription error: {:#}", e);
                String::new()
            }
        }
    }

    /// Highest inference concurrency observed since startup.
    pub fn peak_inflight(&self) -> usize {
        self.peak_inflight.load(Ordering::SeqCst)
    }

    /// Completed inference calls since startup.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Energy VAD over the window.
///
/// Returns the slice to decode (with long trailing silence trimmed), or
/// `None` when no voiced run reaches the minimum speech duration.
fn trim_for_speech<'a>(samples: &'a [f32], settings: &RecognizerSettings) -> Option<&'a [f32]> {
    let frame_len = SAMPLE_RATE * VAD_FRAME_MS / 1000;
    if frame_len == 0 || samples.is_empty() {
        return None;
    }

    let voiced: Vec<bool> = samples
        .chunks(frame_len)
        .map(|frame| {
            let energy: f32 = frame.iter().map(|s| s * s).sum();
            let rms = (energy / frame.len() as f32).sqrt();
            let confidence = (rms / SPEECH_RMS_REFERENCE).min(1.0);
            confidence as f64 >= settings.vad_threshold
        })
        .collect();

    let min_speech_frames = (MIN_SPEECH_MS / VAD_FRAME_MS).max(1);

    // Longest voiced run decides whether this window has speech at all
    let mut run = 0usize;
    let mut longest = 0usize;
    for &is_voiced in &voiced {
        if is_voiced {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    if longest < min_speech_frames {
        return None;
    }

    // Trim trailing silence beyond the configured tolerance; decoding long
    // silent tails is where hallucinations come from
    let keep_silence_frames = (settings.min_silence_ms as usize / VAD_FRAME_MS).max(1);
    let last_voiced = voiced.iter().rposition(|&v| v).unwrap_or(0);
    let end_frame = (last_voiced + 1 + keep_silence_frames).min(voiced.len());
    let end = (end_frame * frame_len).min(samples.len());

    Some(&samples[..end])
}
