//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and WebSocket actor:
//! configuration, request metrics, the process-wide recognizer service,
//! the socket-mode language state, and the pipeline counters.
//!
//! ## Thread Safety Pattern:
//! Mutable data sits behind `Arc<RwLock<T>>`: many readers or one writer,
//! no data races. Reads clone and release the lock immediately so no
//! handler holds it across an await point.
//!
//! ## Rust Concepts:
//! - **Arc**: shared ownership across handlers and spawned tasks
//! - **RwLock**: concurrent reads, exclusive writes
//! - **Arc<RwLock<T>>**: the standard combination for shared mutable
//!   state in a multi-threaded server

use crate::config::AppConfig;
use crate::language::LanguageState;
use crate::pipeline::PipelineCounters;
use crate::recognizer::RecognizerService;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request/pipeline metrics (updated by middleware and processors)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The one recognizer instance both delivery modes share
    pub recognizer: Arc<RecognizerService>,

    /// Socket-mode language selection (session mode keeps its own)
    pub socket_languages: Arc<LanguageState>,

    /// Counters fed by every stream processor
    pub pipeline_counters: PipelineCounters,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and audio streams.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since server start
    pub request_count: u64,

    /// Total errors encountered since server start
    pub error_count: u64,

    /// Currently connected audio streams (both modes)
    pub active_streams: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create a new state around a validated configuration and a built
    /// recognizer service.
    pub fn new(config: AppConfig, recognizer: Arc<RecognizerService>) -> Self {
        let socket_languages = Arc::new(LanguageState::new(
            config.recognizer.default_language.clone(),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            recognizer,
            socket_languages,
            pipeline_counters: PipelineCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (middleware, every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (any failed request).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A new audio stream connected (either mode).
    pub fn increment_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_streams += 1;
    }

    /// An audio stream ended. Guarded against underflow.
    pub fn decrement_active_streams(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_streams > 0 {
            metrics.active_streams -= 1;
        }
    }

    /// Current number of connected audio streams.
    pub fn active_streams(&self) -> u32 {
        self.metrics.read().unwrap().active_streams
    }

    /// Snapshot of current metrics for the /metrics endpoint.
    ///
    /// Clones under a read lock so serialization happens lock-free.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_streams: metrics.active_streams,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
