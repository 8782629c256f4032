//! # Whisper Model
//!
//! Loading and decoding for the single Whisper instance this service runs,
//! implemented with Candle-rs (pure Rust, no whisper.cpp FFI).
//!
//! ## Loading Process:
//! 1. Download model files from HuggingFace if not cached locally
//! 2. Load tokenizer and configuration
//! 3. Initialize weights on the target device
//!
//! ## Decode Policy (fixed, not caller-configurable):
//! - Greedy decoding: minimal search width, chosen for latency
//! - No conditioning on previous text: each window decodes independently
//! - Timestamps suppressed
//! - Repetition cut-off to stop degenerate loops
//! - No-speech probability check at the first decode step; windows the
//!   model itself judges speech-free return empty text without a full
//!   decode pass

use anyhow::{anyhow, Result};
use candle_core::{D, Device, IndexOp, Tensor};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use tokenizers::Tokenizer;

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// Smaller models transcribe faster with less memory but lower accuracy;
/// for a real-time pipeline "tiny" and "small" are the practical choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace model repository for this size.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Approximate resident size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Maximum tokens emitted per window before the decode loop gives up.
const MAX_DECODE_TOKENS: usize = 224;

/// A loaded Whisper model ready for transcription.
///
/// Not reentrant: `transcribe` takes `&mut self` (the decoder keeps a KV
/// cache), which is why the owning service serializes callers.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    size: ModelSize,

    // Special tokens resolved from the tokenizer at load time
    sot_token: u32,
    eot_token: u32,
    transcribe_token: u32,
    no_timestamps_token: u32,
    no_speech_token: Option<u32>,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace.
    ///
    /// ## Parameters:
    /// - **size**: which model variant to load
    /// - **device**: device to load weights on (CPU/GPU)
    ///
    /// Files are cached by hf-hub; repeated loads hit the local cache.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| anyhow!("Failed to create HuggingFace API client: {}", e))?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", size.repo_name(), e))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", size.repo_name(), e))?;
        let weights_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", size.repo_name(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(config.num_mel_bins as usize);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let sot_token = token_id(&tokenizer, m::SOT_TOKEN)?;
        let eot_token = token_id(&tokenizer, m::EOT_TOKEN)?;
        let transcribe_token = token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?;
        let no_timestamps_token = token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?;
        let no_speech_token = m::NO_SPEECH_TOKENS
            .iter()
            .find_map(|token| token_id(&tokenizer, token).ok());

        let load_time = start_time.elapsed();
        tracing::info!("Whisper {} model loaded in {:.2}s", size, load_time.as_secs_f64());

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            size,
            sot_token,
            eot_token,
            transcribe_token,
            no_timestamps_token,
            no_speech_token,
        })
    }

    /// The size variant this model was loaded as.
    pub fn size(&self) -> ModelSize {
        self.size
    }

    /// Transcribe normalized audio samples to text.
    ///
    /// ## Parameters:
    /// - **audio_data**: 32-bit float samples in [-1.0, 1.0] at 16kHz mono
    /// - **language**: optional ISO-639 hint; an unrecognized code is
    ///   logged and decoding proceeds without a language token
    /// - **no_speech_threshold**: probability above which the window is
    ///   treated as containing no speech and returns `""`
    pub fn transcribe(
        &mut self,
        audio_data: &[f32],
        language: Option<&str>,
        no_speech_threshold: f64,
    ) -> Result<String> {
        if audio_data.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        // Whisper operates on 30s windows; pad or truncate to that length
        let mut samples = vec![0.0f32; m::N_SAMPLES];
        let copy_len = audio_data.len().min(m::N_SAMPLES);
        samples[..copy_len].copy_from_slice(&audio_data[..copy_len]);

        let mel = audio::pcm_to_mel(&self.config, &samples, &self.mel_filters);
        let mel_len = mel.len();
        let num_mel_bins = self.config.num_mel_bins as usize;
        let mel = Tensor::from_vec(
            mel,
            (1, num_mel_bins, mel_len / num_mel_bins),
            &self.device,
        )?;

        let audio_features = self.model.encoder.forward(&mel, true)?;

        // Prompt: SOT, optional language, task, timestamp suppression
        let mut tokens = vec![self.sot_token];
        if let Some(lang) = language {
            match self.language_token(lang) {
                Some(lang_token) => tokens.push(lang_token),
                None => {
                    tracing::warn!("No token for language '{}', decoding without a hint", lang);
                }
            }
        }
        tokens.push(self.transcribe_token);
        tokens.push(self.no_timestamps_token);

        let prompt_len = tokens.len();
        let mut output_tokens: Vec<u32> = Vec::new();

        for i in 0..MAX_DECODE_TOKENS {
            let token_tensor = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self
                .model
                .decoder
                .forward(&token_tensor, &audio_features, i == 0)?;

            // On the first step, ask the model itself whether this window
            // contains speech at all (inner, model-aware VAD)
            if i == 0 {
                if let Some(no_speech_token) = self.no_speech_token {
                    let sot_logits = self
                        .model
                        .decoder
                        .final_linear(&ys.i((..1, ..1))?)?
                        .i(0)?
                        .i(0)?;
                    let no_speech_prob = softmax(&sot_logits, D::Minus1)?
                        .i(no_speech_token as usize)?
                        .to_scalar::<f32>()? as f64;

                    if no_speech_prob > no_speech_threshold {
                        tracing::debug!(
                            "Window rejected by model VAD (no-speech prob {:.2})",
                            no_speech_prob
                        );
                        return Ok(String::new());
                    }
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;

            // Greedy: fixed minimal-width search for latency
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.eot_token || next_token >= self.sot_token {
                break;
            }
            if is_repetitive(&output_tokens, next_token) {
                tracing::debug!("Decode stopped on repetition after {} tokens", output_tokens.len());
                break;
            }

            tokens.push(next_token);
            output_tokens.push(next_token);

            if tokens.len() - prompt_len >= self.config.max_target_positions / 2 {
                break;
            }
        }

        let text = self
            .tokenizer
            .decode(&output_tokens, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(text.trim().to_string())
    }

    /// Tokenizer id for a language code, if the model knows it.
    fn language_token(&self, language: &str) -> Option<u32> {
        let tag = format!("<|{}|>", language.to_lowercase());
        self.tokenizer.token_to_id(&tag)
    }
}

/// Look up a special token by its textual form.
fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Token '{}' missing from tokenizer", token))
}

/// Stop condition for degenerate decode loops.
///
/// Catches both a token repeated three times in a row and a repeating
/// 3-token pattern, the two failure shapes greedy decoding produces on
/// noisy windows.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    if tokens.len() >= 2 {
        let n = tokens.len();
        if tokens[n - 1] == new_token && tokens[n - 2] == new_token {
            return true;
        }
    }

    if tokens.len() >= 5 {
        let n = tokens.len();
        let candidate = [tokens[n - 2], tokens[n - 1], new_token];
        let previous = [tokens[n - 5], tokens[n - 4], tokens[n - 3]];
        if candidate == previous {
            return true;
        }
    }

    false
}

/// Build a triangular mel filter bank matching Whisper's front end.
///
/// Filters are laid out row-major as (num_mel_bins, n_fft/2 + 1), the
/// shape `audio::pcm_to_mel` multiplies against the power spectrum.
fn mel_filter_bank(num_mel_bins: usize) -> Vec<f32> {
    let n_freqs = m::N_FFT / 2 + 1;
    let sample_rate = m::SAMPLE_RATE as f32;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_low = hz_to_mel(0.0);
    let mel_high = hz_to_mel(sample_rate / 2.0);

    // num_mel_bins + 2 evenly spaced points on the mel scale define the
    // triangle edges
    let hz_points: Vec<f32> = (0..num_mel_bins + 2)
        .map(|i| {
            let mel = mel_low + (mel_high - mel_low) * i as f32 / (num_mel_bins + 1) as f32;
            mel_to_hz(mel)
        })
        .collect();

    let freq_of_bin = |bin: usize| bin as f32 * sample_rate / m::N_FFT as f32;

    let mut filters = vec![0.0f32; num_mel_bins * n_freqs];
    for mel_bin in 0..num_mel_bins {
        let left = hz_points[mel_bin];
        let center = hz_points[mel_bin + 1];
        let right = hz_points[mel_bin + 2];

        for freq_bin in 0..n_freqs {
            let freq = freq_of_bin(freq_bin);
            let weight = if freq <= left || freq >= right {
                0.0
            } else if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };
            filters[mel_bin * n_freqs + freq_bin] = weight.max(0.0);
        }
    }

    filters
}
