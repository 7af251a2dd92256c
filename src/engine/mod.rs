//! Speech engine abstraction and model tiers.

mod whisper;

pub use whisper::{WhisperEngine, WhisperLoader};

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Inference model tiers, ordered by accuracy and cost. `Medium` has no
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModelTier {
    Tiny,
    Small,
    Medium,
}

impl ModelTier {
    /// The next tier up, if any.
    pub fn upgraded(self) -> Option<ModelTier> {
        match self {
            ModelTier::Tiny => Some(ModelTier::Small),
            ModelTier::Small => Some(ModelTier::Medium),
            ModelTier::Medium => None,
        }
    }

    /// GGML model file name for this tier.
    pub fn model_file(self) -> &'static str {
        match self {
            ModelTier::Tiny => "ggml-tiny.en.bin",
            ModelTier::Small => "ggml-small.en.bin",
            ModelTier::Medium => "ggml-medium.en.bin",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Tiny => write!(f, "tiny"),
            ModelTier::Small => write!(f, "small"),
            ModelTier::Medium => write!(f, "medium"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file not found at {0}")]
    ModelNotFound(PathBuf),
    #[error("failed to load model: {0}")]
    LoadFailed(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// An opaque speech-to-text capability: hand it a sample buffer, get text.
/// Implementations block; callers run them on a blocking task.
pub trait SpeechEngine: Send + Sync {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, EngineError>;
}

/// Creates engines on demand, one per tier.
pub trait EngineLoader: Send + Sync + 'static {
    fn load(&self, tier: ModelTier) -> Result<Box<dyn SpeechEngine>, EngineError>;
}

/// Strip `[...]` annotation spans emitted by the engine (blank-audio and
/// music markers, for instance) and collapse the surrounding whitespace.
pub fn clean_transcript(text: &str) -> String {
    let mut out = text.to_string();
    while let (Some(open), Some(close)) = (out.find('['), out.find(']')) {
        if open < close {
            out.replace_range(open..=close, "");
        } else {
            break;
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable engine stubs shared by the registry and session tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::{EngineError, EngineLoader, ModelTier, SpeechEngine};

    pub(crate) struct StubEngine {
        pub reply: String,
        pub delay: Duration,
    }

    impl SpeechEngine for StubEngine {
        fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String, EngineError> {
            std::thread::sleep(self.delay);
            Ok(self.reply.clone())
        }
    }

    pub(crate) struct StubLoader {
        pub load_delay: Duration,
        pub transcribe_delay: Duration,
        pub fail: Vec<ModelTier>,
        pub loads: AtomicUsize,
    }

    impl StubLoader {
        pub fn instant() -> Self {
            Self {
                load_delay: Duration::ZERO,
                transcribe_delay: Duration::ZERO,
                fail: Vec::new(),
                loads: AtomicUsize::new(0),
            }
        }

        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl EngineLoader for StubLoader {
        fn load(&self, tier: ModelTier) -> Result<Box<dyn SpeechEngine>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.load_delay);
            if self.fail.contains(&tier) {
                return Err(EngineError::LoadFailed(format!("no model for {tier}")));
            }
            Ok(Box::new(StubEngine {
                reply: format!("transcript from {tier}"),
                delay: self.transcribe_delay,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_chain_stops_at_medium() {
        assert_eq!(ModelTier::Tiny.upgraded(), Some(ModelTier::Small));
        assert_eq!(ModelTier::Small.upgraded(), Some(ModelTier::Medium));
        assert_eq!(ModelTier::Medium.upgraded(), None);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(ModelTier::Tiny < ModelTier::Small);
        assert!(ModelTier::Small < ModelTier::Medium);
    }

    #[test]
    fn test_clean_transcript_strips_annotations() {
        assert_eq!(clean_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(
            clean_transcript(" hello [MUSIC] world "),
            "hello world"
        );
        assert_eq!(
            clean_transcript("[a] one [b] two [c]"),
            "one two"
        );
    }

    #[test]
    fn test_clean_transcript_leaves_unmatched_brackets() {
        assert_eq!(clean_transcript("left [ open"), "left [ open");
        assert_eq!(clean_transcript("close ] first [ then"), "close ] first [ then");
    }

    #[test]
    fn test_clean_transcript_collapses_whitespace() {
        assert_eq!(clean_transcript("  spaced   out\ttext "), "spaced out text");
    }
}
