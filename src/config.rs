//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_AUDIO_SILENCE_THRESHOLD, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Tuning note:
//! The audio and recognizer thresholds here were tuned empirically against
//! one deployment's model and microphones. They are defaults to re-tune,
//! not behavioral contracts. See the ranges documented on each field.

use crate::pipeline::StreamSettings;
use crate::recognizer::{ModelSize, RecognizerSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Broken into logical groups (server, audio, recognizer, performance) so
/// each can be overridden independently via file or environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio pipeline configuration.
///
/// ## Fields:
/// - `sample_rate`: input rate in Hz; the pipeline and model expect 16000
/// - `channels`: input channel count; must be 1 (mono)
/// - `chunk_duration_secs`: analysis window length; observed useful range
///   1.0–3.0s (32,000–96,000 bytes per window at 16kHz/16-bit)
/// - `silence_threshold`: minimum peak amplitude for a window to reach
///   inference; observed useful range 50–800
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub chunk_duration_secs: f64,
    pub silence_threshold: i32,
}

/// Recognizer configuration.
///
/// ## Fields:
/// - `model`: Whisper variant ("tiny", "base", "small", "medium", "large")
/// - `default_language`: language used for sources without an override
/// - `min_silence_ms`: trailing silence tolerated before the VAD trims
/// - `vad_threshold`: per-frame voice confidence floor (0.0–1.0)
/// - `no_speech_threshold`: model no-speech probability above which a
///   window yields no text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    pub model: String,
    pub default_language: String,
    pub min_silence_ms: u64,
    pub vad_threshold: f64,
    pub no_speech_threshold: f64,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum concurrently processed audio sources
    pub max_concurrent_streams: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16000,        // The rate the model is trained on
                channels: 1,               // Mono audio
                chunk_duration_secs: 3.0,  // 96,000-byte windows
                silence_threshold: 500,    // Middle of the useful 50-800 range
            },
            recognizer: RecognizerConfig {
                model: "small".to_string(),
                default_language: "en".to_string(),
                min_silence_ms: 1000,
                vad_threshold: 0.3,
                no_speech_threshold: 0.6,
            },
            performance: PerformanceConfig {
                max_concurrent_streams: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the bare HOST and PORT variables used by deployment
    ///    platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup beats failing on the first
    /// audio frame.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono audio is supported (channels = 1, got {})",
                self.audio.channels
            ));
        }

        if !(0.1..=30.0).contains(&self.audio.chunk_duration_secs) {
            return Err(anyhow::anyhow!(
                "Chunk duration must be between 0.1 and 30 seconds, got {}",
                self.audio.chunk_duration_secs
            ));
        }

        if self.audio.silence_threshold < 0 {
            return Err(anyhow::anyhow!("Silence threshold cannot be negative"));
        }

        if !(0.0..=1.0).contains(&self.recognizer.vad_threshold) {
            return Err(anyhow::anyhow!("VAD threshold must be between 0.0 and 1.0"));
        }

        if !(0.0..=1.0).contains(&self.recognizer.no_speech_threshold) {
            return Err(anyhow::anyhow!(
                "No-speech threshold must be between 0.0 and 1.0"
            ));
        }

        self.recognizer
            .model
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid model size: {}", e))?;

        if self.performance.max_concurrent_streams == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent streams must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Stream-processor settings derived from the audio group.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            chunk_duration_secs: self.audio.chunk_duration_secs,
            sample_rate: self.audio.sample_rate,
            silence_threshold: self.audio.silence_threshold,
        }
    }

    /// Recognizer-service settings derived from the recognizer group.
    ///
    /// Fails only on an unparseable model name, which `validate` already
    /// rejects at startup.
    pub fn recognizer_settings(&self) -> Result<RecognizerSettings> {
        Ok(RecognizerSettings {
            model_size: self.recognizer.model.parse()?,
            min_silence_ms: self.recognizer.min_silence_ms,
            vad_threshold: self.recognizer.vad_threshold,
            no_speech_threshold: self.recognizer.no_speech_threshold,
        })
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example,
    /// `{"audio": {"silence_threshold": 200}}` retunes the gate and leaves
    /// everything else alone. The updated configuration is re-validated
    /// before being accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = channels as u8;
            }
            if let Some(secs) = audio.get("chunk_duration_secs").and_then(|v| v.as_f64()) {
                self.audio.chunk_duration_secs = secs;
            }
            if let Some(threshold) = audio.get("silence_threshold").and_then(|v| v.as_i64()) {
                self.audio.silence_threshold = threshold as i32;
            }
        }

        if let Some(recognizer) = partial.get("recognizer") {
            if let Some(model) = recognizer.get("model").and_then(|v| v.as_str()) {
                self.recognizer.model = model.to_string();
            }
            if let Some(lang) = recognizer.get("default_language").and_then(|v| v.as_str()) {
                self.recognizer.default_language = lang.to_string();
            }
            if let Some(ms) = recognizer.get("min_silence_ms").and_then(|v| v.as_u64()) {
                self.recognizer.min_silence_ms = ms;
            }
            if let Some(threshold) = recognizer.get("vad_threshold").and_then(|v| v.as_f64()) {
                self.recognizer.vad_threshold = threshold;
            }
            if let Some(threshold) = recognizer.get("no_speech_threshold").and_then(|v| v.as_f64()) {
                self.recognizer.no_speech_threshold = threshold;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(streams) = performance
                .get("max_concurrent_streams")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_streams = streams as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.recognizer.model, "small");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.chunk_duration_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recognizer.model = "enormous".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recognizer.vad_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_update_retunes_gate() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"silence_threshold": 50}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.silence_threshold, 50);
        // Other fields unchanged
        assert_eq!(config.audio.chunk_duration_secs, 3.0);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        let json = r#"{"recognizer": {"model": "bogus"}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let config = AppConfig::default();

        let stream = config.stream_settings();
        assert_eq!(stream.sample_rate, 16000);
        assert_eq!(stream.silence_threshold, 500);

        let recognizer = config.recognizer_settings().unwrap();
        assert_eq!(recognizer.model_size, ModelSize::Small);
        assert_eq!(recognizer.min_silence_ms, 1000);
    }
}
