//! whisper.cpp engines via whisper-rs bindings, one GGML model per tier.

use std::path::{Path, PathBuf};

use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{clean_transcript, EngineError, EngineLoader, ModelTier, SpeechEngine};
use crate::config::EngineConfig;

/// Sample rate the Whisper models were trained on.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// A loaded GGML model for one tier.
pub struct WhisperEngine {
    context: WhisperContext,
    language: String,
    threads: i32,
}

impl WhisperEngine {
    pub fn load(model_path: &Path, config: &EngineConfig) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelNotFound(model_path.to_path_buf()));
        }

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu = config.gpu_enabled;

        let model_path_str = model_path.to_str().ok_or_else(|| {
            EngineError::LoadFailed("invalid model path encoding".to_string())
        })?;
        let context = WhisperContext::new_with_params(model_path_str, ctx_params)
            .map_err(|e| EngineError::LoadFailed(format!("{e:?}")))?;

        Ok(Self {
            context,
            language: config.language.clone(),
            threads: config.threads.max(1) as i32,
        })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, EngineError> {
        let samples = if sample_rate != WHISPER_SAMPLE_RATE && sample_rate != 0 {
            resample(samples, sample_rate, WHISPER_SAMPLE_RATE)
        } else {
            samples.to_vec()
        };

        let mut state = self
            .context
            .create_state()
            .map_err(|e| EngineError::InferenceFailed(format!("creating state: {e:?}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_language(Some(self.language.as_str()));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .map_err(|e| EngineError::InferenceFailed(format!("{e:?}")))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            let segment_text = segment.to_str().map_err(|e| {
                EngineError::InferenceFailed(format!("extracting segment text: {e:?}"))
            })?;
            text.push_str(segment_text);
        }

        Ok(clean_transcript(&text))
    }
}

/// Loads the per-tier GGML files from a single models directory.
pub struct WhisperLoader {
    models_dir: PathBuf,
    config: EngineConfig,
}

impl WhisperLoader {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let models_dir = config.resolve_models_dir()?;
        Ok(Self { models_dir, config })
    }
}

impl EngineLoader for WhisperLoader {
    fn load(&self, tier: ModelTier) -> Result<Box<dyn SpeechEngine>, EngineError> {
        let model_path = self.models_dir.join(tier.model_file());
        info!(%tier, path = %model_path.display(), "loading model");
        let engine = WhisperEngine::load(&model_path, &self.config)?;
        Ok(Box::new(engine))
    }
}

/// Linear-interpolation resampling, good enough for speech input.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let src_idx_floor = src_idx.floor() as usize;
        let frac = src_idx - src_idx_floor as f64;

        let sample = if src_idx_floor + 1 < samples.len() {
            let s0 = samples[src_idx_floor] as f64;
            let s1 = samples[src_idx_floor + 1] as f64;
            (s0 * (1.0 - frac) + s1 * frac) as f32
        } else if src_idx_floor < samples.len() {
            samples[src_idx_floor]
        } else {
            0.0
        };

        result.push(sample);
    }

    result
}
