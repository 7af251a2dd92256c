//! Noise-adaptive live transcription: an energy-based noisy/quiet monitor
//! drives a scheduling loop that re-transcribes the accumulating recording,
//! escalating to larger Whisper models while the speaker pauses.

pub mod capture;
pub mod config;
pub mod engine;
pub mod noise_monitor;
pub mod registry;
pub mod scheduler;
pub mod segments;
pub mod session;

// Re-export key components for easier access
pub use capture::{MicCapture, SampleSource};
pub use config::{read_app_config, AppConfig};
pub use engine::{EngineLoader, ModelTier, SpeechEngine, WhisperLoader};
pub use noise_monitor::{NoiseState, NoiseStateMonitor};
pub use registry::TierRegistry;
pub use scheduler::TranscriptionActivity;
pub use segments::NoiseInterval;
pub use session::RecordingSession;
