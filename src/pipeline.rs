//! # Stream Processor
//!
//! Drives one audio source end-to-end: pulls raw PCM frames, accumulates
//! them into analysis windows, gates silence, resolves the source's
//! language, runs inference off the hot path, filters hallucinations, and
//! emits transcript events.
//!
//! ## Per-source flow:
//! streaming (frames → buffer) → window ready → gating (peak check) →
//! inferring (spawned task) → emitting (filter + event) → streaming.
//! The processor stops when its frame source ends; an in-flight inference
//! for a stopped source completes and its event is simply dropped by the
//! sink, never an error.
//!
//! ## Transport independence:
//! Both delivery modes (session and socket) run this exact processor,
//! parameterized over the [`FrameSource`] and [`TranscriptSink`] capability
//! traits. The adapters translate transport events into those traits and
//! nothing else, so the chunking/gating/filtering logic exists once.

use crate::audio::chunk::{window_threshold_bytes, AnalysisWindow, ChunkBuffer};
use crate::audio::gate::SilenceGate;
use crate::language::LanguageState;
use crate::recognizer::{filter_hallucinations, RecognizerService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// One transcript produced from one analysis window.
///
/// Handed to the adapter immediately after filtering; not retained.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    /// Non-empty transcribed text
    pub text: String,

    /// Identity of the audio source that produced it
    pub source: String,

    /// Language the window was transcribed with
    pub language: String,

    /// Window-ready to filter-complete, in milliseconds
    pub latency_ms: u64,
}

/// Where a processor's raw audio frames come from.
#[async_trait]
pub trait FrameSource: Send {
    /// Next raw PCM frame, or `None` when the source has ended.
    ///
    /// May wait indefinitely; the wait is bounded only by disconnect.
    async fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Where a processor's transcript events go.
///
/// Implementations deliver to their transport and swallow delivery
/// failures for sources that have already stopped.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn emit(&self, event: TranscriptEvent);
}

/// Frame source backed by an in-process channel.
///
/// Both adapters decode transport frames on their own task and push the
/// raw bytes through one of these; closing the sender stops the processor.
pub struct ChannelFrameSource {
    stream: ReceiverStream<Vec<u8>>,
}

impl ChannelFrameSource {
    pub fn new(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            stream: ReceiverStream::new(receiver),
        }
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.stream.next().await
    }
}

/// Pipeline-wide counters, shared with the app state for /metrics.
#[derive(Debug, Clone, Default)]
pub struct PipelineCounters {
    /// Windows cut from accumulation buffers
    pub windows_ready: Arc<AtomicU64>,

    /// Windows discarded by the silence gate
    pub windows_gated: Arc<AtomicU64>,

    /// Transcript events emitted after filtering
    pub transcripts_emitted: Arc<AtomicU64>,
}

/// Tunables for one processor instance (shared across all of them).
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Analysis window duration in seconds
    pub chunk_duration_secs: f64,

    /// Input sample rate in Hz
    pub sample_rate: u32,

    /// Minimum peak amplitude for a window to reach inference
    pub silence_threshold: i32,
}

impl StreamSettings {
    fn threshold_bytes(&self) -> usize {
        window_threshold_bytes(self.chunk_duration_secs, self.sample_rate)
    }
}

/// Orchestrates one audio source. Exactly one processor owns one source's
/// accumulation buffer; there is no concurrent mutation.
pub struct StreamProcessor {
    identity: String,
    settings: StreamSettings,
    threshold_bytes: usize,
    gate: SilenceGate,
    buffer: ChunkBuffer,
    recognizer: Arc<RecognizerService>,
    languages: Arc<LanguageState>,
    sink: Arc<dyn TranscriptSink>,
    counters: PipelineCounters,
    frames_seen: u64,
}

impl StreamProcessor {
    pub fn new(
        identity: impl Into<String>,
        settings: StreamSettings,
        recognizer: Arc<RecognizerService>,
        languages: Arc<LanguageState>,
        sink: Arc<dyn TranscriptSink>,
        counters: PipelineCounters,
    ) -> Self {
        let threshold_bytes = settings.threshold_bytes();
        let gate = SilenceGate::new(settings.silence_threshold);
        Self {
            identity: identity.into(),
            settings,
            threshold_bytes,
            gate,
            buffer: ChunkBuffer::new(),
            recognizer,
            languages,
            sink,
            counters,
            frames_seen: 0,
        }
    }

    /// Run until the frame source ends.
    ///
    /// This task only pulls frames and performs integer-domain work;
    /// inference runs on spawned tasks so a slow transcription never
    /// stalls intake for this source or any other.
    pub async fn run(mut self, mut frames: impl FrameSource) {
        info!(source = %self.identity, "Stream processor started");

        while let Some(frame) = frames.next_frame().await {
            if self.frames_seen == 0 {
                debug!(
                    source = %self.identity,
                    frame_bytes = frame.len(),
                    window_bytes = self.threshold_bytes,
                    "First audio frame received"
                );
            }
            self.frames_seen += 1;

            self.buffer.push(&frame);

            // Drain every completed window so the buffer never carries more
            // than one window's worth of unconsumed bytes
            while let Some(window) = self.buffer.try_take_window(self.threshold_bytes) {
                self.dispatch_window(window);
            }
        }

        info!(
            source = %self.identity,
            frames = self.frames_seen,
            "Stream processor stopped"
        );
    }

    /// Gate one window and, if it passes, send it to inference.
    fn dispatch_window(&self, window: AnalysisWindow) {
        let ready_at = Instant::now();
        self.counters.windows_ready.fetch_add(1, Ordering::Relaxed);

        let peak = SilenceGate::peak_amplitude(&window);
        debug!(
            source = %self.identity,
            peak,
            duration_s = window.duration_seconds(self.settings.sample_rate),
            "Analysis window ready"
        );

        if !self.gate.passes(&window) {
            self.counters.windows_gated.fetch_add(1, Ordering::Relaxed);
            debug!(source = %self.identity, peak, "Window below silence threshold, discarded");
            return;
        }

        // Language is resolved now, not at push time, so a change that
        // arrived mid-buffer applies to this completed window
        let language = self.languages.resolve(&self.identity);
        let samples = window.to_normalized();

        let recognizer = self.recognizer.clone();
        let sink = self.sink.clone();
        let counters = self.counters.clone();
        let identity = self.identity.clone();

        tokio::spawn(async move {
            let raw = recognizer.transcribe(&samples, &language).await;
            let text = filter_hallucinations(&raw);
            let latency_ms = ready_at.elapsed().as_millis() as u64;

            if text.is_empty() {
                debug!(source = %identity, latency_ms, "Window produced no transcript");
                return;
            }

            debug!(source = %identity, latency_ms, chars = text.len(), "Transcript ready");
            counters.transcripts_emitted.fetch_add(1, Ordering::Relaxed);

            sink.emit(TranscriptEvent {
                text,
                source: identity,
                language,
                latency_ms,
            })
            .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{ModelSize, RecognizerSettings, SpeechEngine};
    use anyhow::Result;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    fn settings_1s() -> StreamSettings {
        StreamSettings {
            chunk_duration_secs: 1.0,
            sample_rate: 16000,
            silence_threshold: 500,
        }
    }

    fn recognizer_settings() -> RecognizerSettings {
        RecognizerSettings {
            model_size: ModelSize::Tiny,
            min_silence_ms: 1000,
            vad_threshold: 0.3,
            no_speech_threshold: 0.6,
        }
    }

    /// Engine that records every call's language and returns fixed text.
    struct RecordingEngine {
        calls: Arc<AtomicUsize>,
        languages: Arc<Mutex<Vec<String>>>,
        reply: &'static str,
    }

    impl SpeechEngine for RecordingEngine {
        fn transcribe(&mut self, _: &[f32], language: Option<&str>, _: f64) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.languages
                .lock()
                .unwrap()
                .push(language.unwrap_or("none").to_string());
            Ok(self.reply.to_string())
        }

        fn name(&self) -> String {
            "recording".to_string()
        }
    }

    fn recording_recognizer(
        reply: &'static str,
    ) -> (Arc<RecognizerService>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let languages = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            calls: calls.clone(),
            languages: languages.clone(),
            reply,
        };
        let recognizer = Arc::new(RecognizerService::with_engine(
            recognizer_settings(),
            Box::new(engine),
        ));
        (recognizer, calls, languages)
    }

    /// Sink that forwards events into a channel for assertions.
    struct ChannelSink {
        sender: mpsc::UnboundedSender<TranscriptEvent>,
    }

    #[async_trait]
    impl TranscriptSink for ChannelSink {
        async fn emit(&self, event: TranscriptEvent) {
            // A closed receiver means the source is gone; dropping the
            // event is the contract
            let _ = self.sender.send(event);
        }
    }

    fn channel_sink() -> (Arc<dyn TranscriptSink>, mpsc::UnboundedReceiver<TranscriptEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink { sender }), receiver)
    }

    /// 16-bit PCM bytes with the given amplitude, `n` samples long.
    fn pcm_frame(amplitude: i16, n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    fn spawn_processor(
        identity: &str,
        recognizer: Arc<RecognizerService>,
        languages: Arc<LanguageState>,
        sink: Arc<dyn TranscriptSink>,
    ) -> mpsc::Sender<Vec<u8>> {
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let processor = StreamProcessor::new(
            identity,
            settings_1s(),
            recognizer,
            languages,
            sink,
            PipelineCounters::default(),
        );
        tokio::spawn(processor.run(ChannelFrameSource::new(frame_rx)));
        frame_tx
    }

    #[tokio::test]
    async fn test_loud_window_produces_transcript() {
        let (recognizer, calls, _) = recording_recognizer("hello world");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, mut events) = channel_sink();

        let frames = spawn_processor("alice", recognizer, languages, sink);

        // 1.5s of loud audio: exactly one 1.0s window, 0.5s retained
        frames.send(pcm_frame(1000, 24000)).await.unwrap();

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within deadline")
            .expect("event expected");

        assert_eq!(event.text, "hello world");
        assert_eq!(event.source, "alice");
        assert_eq!(event.language, "en");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The 0.5s remainder alone must not trigger another window
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_silent_windows_never_reach_recognizer() {
        let (recognizer, calls, _) = recording_recognizer("should not appear");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, mut events) = channel_sink();

        let frames = spawn_processor("bob", recognizer, languages, sink);

        // Three full windows of pure silence
        for _ in 0..3 {
            frames.send(vec![0u8; 32000]).await.unwrap();
        }
        drop(frames);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_language_override_applies_per_source() {
        let (recognizer, _, seen_languages) = recording_recognizer("hola");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, mut events) = channel_sink();

        // Source A switched to Spanish before its window completes
        languages.set("a", "es");

        let frames_a = spawn_processor("a", recognizer.clone(), languages.clone(), sink.clone());
        let frames_b = spawn_processor("b", recognizer, languages, sink);

        frames_a.send(pcm_frame(1000, 16000)).await.unwrap();
        frames_b.send(pcm_frame(1000, 16000)).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event within deadline")
                .expect("event expected");
            received.push((event.source.clone(), event.language.clone()));
        }
        received.sort();

        assert_eq!(
            received,
            vec![
                ("a".to_string(), "es".to_string()),
                ("b".to_string(), "en".to_string()),
            ]
        );

        let mut langs = seen_languages.lock().unwrap().clone();
        langs.sort();
        assert_eq!(langs, vec!["en".to_string(), "es".to_string()]);
    }

    #[tokio::test]
    async fn test_hallucinations_are_not_emitted() {
        let (recognizer, calls, _) = recording_recognizer("Thank you.");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, mut events) = channel_sink();

        let frames = spawn_processor("carol", recognizer, languages, sink);
        frames.send(pcm_frame(1000, 16000)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Inference ran, but the artifact was filtered out
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_after_source_stop_are_dropped() {
        let (recognizer, _, _) = recording_recognizer("late result");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, events) = channel_sink();

        let frames = spawn_processor("dave", recognizer, languages, sink);
        frames.send(pcm_frame(1000, 16000)).await.unwrap();

        // Receiver goes away before the inference task emits; the send
        // fails silently and nothing panics
        drop(events);
        drop(frames);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_counters_track_gating() {
        let (recognizer, _, _) = recording_recognizer("text");
        let languages = Arc::new(LanguageState::new("en"));
        let (sink, _events) = channel_sink();

        let counters = PipelineCounters::default();
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let processor = StreamProcessor::new(
            "eve",
            settings_1s(),
            recognizer,
            languages,
            sink,
            counters.clone(),
        );
        let handle = tokio::spawn(processor.run(ChannelFrameSource::new(frame_rx)));

        // One silent window, one loud window
        frame_tx.send(vec![0u8; 32000]).await.unwrap();
        frame_tx.send(pcm_frame(1000, 16000)).await.unwrap();
        drop(frame_tx);
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counters.windows_ready.load(Ordering::Relaxed), 2);
        assert_eq!(counters.windows_gated.load(Ordering::Relaxed), 1);
        assert_eq!(counters.transcripts_emitted.load(Ordering::Relaxed), 1);
    }
}
