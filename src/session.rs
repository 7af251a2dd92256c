//! Recording session lifecycle and the observable surface around it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::SampleSource;
use crate::config::AppConfig;
use crate::engine::{EngineLoader, ModelTier};
use crate::noise_monitor::{LogEntry, NoiseStateMonitor};
use crate::registry::TierRegistry;
use crate::scheduler::{TranscriptionActivity, TranscriptionScheduler};
use crate::segments::{latest_noisy_end, project_intervals, NoiseInterval};

/// Recording lifecycle. Readers observe the active flag and the start/end
/// instants through this single value, so no torn combination of the two is
/// possible.
#[derive(Debug, Clone, Copy)]
pub enum RecordingPhase {
    Idle,
    Recording { started_at: Instant },
    Stopped { started_at: Instant, ended_at: Instant },
}

impl RecordingPhase {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingPhase::Recording { .. })
    }

    /// Start time while a recording is active.
    pub fn started_at(&self) -> Option<Instant> {
        match self {
            RecordingPhase::Recording { started_at } => Some(*started_at),
            _ => None,
        }
    }

    /// Projection bounds: recording start and the instant the last open
    /// interval closes against.
    fn bounds(&self, now: Instant) -> Option<(Instant, Instant)> {
        match *self {
            RecordingPhase::Idle => None,
            RecordingPhase::Recording { started_at } => Some((started_at, now)),
            RecordingPhase::Stopped {
                started_at,
                ended_at,
            } => Some((started_at, ended_at)),
        }
    }
}

/// Owns one sample source, one noise monitor, and the transcription state
/// for a recording. Reused across recordings: `Tiny` stays resident between
/// them, while `Small` and `Medium` are unloaded on stop to bound memory.
pub struct RecordingSession {
    config: AppConfig,
    source: Arc<dyn SampleSource>,
    registry: Arc<TierRegistry>,
    monitor: Arc<Mutex<NoiseStateMonitor>>,
    phase: Arc<RwLock<RecordingPhase>>,
    activities: Arc<RwLock<Vec<TranscriptionActivity>>>,
    current: Arc<Mutex<Option<TranscriptionActivity>>>,
    transcript_tx: broadcast::Sender<String>,
    tick_handle: Option<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl RecordingSession {
    /// Build a session and start warming the `Tiny` engine so the first
    /// scheduling cycle never waits on a cold load. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn SampleSource>,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        let registry = Arc::new(TierRegistry::new(loader));
        registry.preload(ModelTier::Tiny);

        let monitor = Arc::new(Mutex::new(NoiseStateMonitor::new(config.monitor.clone())));
        let (transcript_tx, _) = broadcast::channel(64);

        Self {
            config,
            source,
            registry,
            monitor,
            phase: Arc::new(RwLock::new(RecordingPhase::Idle)),
            activities: Arc::new(RwLock::new(Vec::new())),
            current: Arc::new(Mutex::new(None)),
            transcript_tx,
            tick_handle: None,
            scheduler_handle: None,
        }
    }

    /// Begin a recording: reset the monitor, open the capture, and spawn
    /// the sample ticker and the transcription loop.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.phase.read().is_recording() {
            bail!("recording already active");
        }

        let started_at = Instant::now();
        self.activities.write().clear();
        *self.current.lock() = None;
        self.monitor.lock().reset(started_at);

        self.source.start_capture()?;
        *self.phase.write() = RecordingPhase::Recording { started_at };

        // Overlapped with the scheduler's warm-up delay.
        self.registry.preload(ModelTier::Small);

        self.tick_handle = Some(self.spawn_ticker());
        self.scheduler_handle = Some(
            TranscriptionScheduler::new(
                self.config.scheduler.clone(),
                self.registry.clone(),
                self.source.clone(),
                self.phase.clone(),
                self.monitor.clone(),
                self.activities.clone(),
                self.current.clone(),
                self.transcript_tx.clone(),
            )
            .start(),
        );

        info!("recording started");
        Ok(())
    }

    /// End the recording. The ticker and the scheduler observe the phase
    /// change and wind down on their own; an in-flight transcription result
    /// is discarded rather than published.
    pub fn stop(&mut self) {
        let stopped = {
            let mut phase = self.phase.write();
            match *phase {
                RecordingPhase::Recording { started_at } => {
                    *phase = RecordingPhase::Stopped {
                        started_at,
                        ended_at: Instant::now(),
                    };
                    true
                }
                _ => false,
            }
        };
        if !stopped {
            warn!("stop requested while not recording");
            return;
        }

        self.source.stop_capture();
        *self.current.lock() = None;
        self.registry.unload(ModelTier::Small);
        self.registry.unload(ModelTier::Medium);
        self.tick_handle = None;
        self.scheduler_handle = None;

        info!("recording stopped");
    }

    pub fn is_recording(&self) -> bool {
        self.phase.read().is_recording()
    }

    /// The noisy/quiet intervals observed so far, the last one closed
    /// against "now" while still recording.
    pub fn intervals(&self) -> Vec<NoiseInterval> {
        let Some((started_at, closed_at)) = self.phase.read().bounds(Instant::now()) else {
            return Vec::new();
        };
        let events = self.monitor.lock().events().to_vec();
        project_intervals(&events, started_at, closed_at)
    }

    /// End of the most recent noisy interval, if any.
    pub fn latest_noisy_end(&self) -> Option<f64> {
        latest_noisy_end(&self.intervals())
    }

    /// Completed transcription requests, ordered by completion.
    pub fn activities(&self) -> Vec<TranscriptionActivity> {
        self.activities.read().clone()
    }

    /// The in-flight request, if one exists.
    pub fn current_activity(&self) -> Option<TranscriptionActivity> {
        self.current.lock().clone()
    }

    /// Per-tick threshold diagnostics from the noise monitor.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.monitor.lock().log_entries().to_vec()
    }

    /// Text of the most recently completed transcription.
    pub fn best_transcription(&self) -> String {
        self.activities
            .read()
            .last()
            .and_then(|activity| activity.text.clone())
            .unwrap_or_default()
    }

    /// Subscribe to completed transcription text.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<String> {
        self.transcript_tx.subscribe()
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let phase = self.phase.clone();
        let monitor = self.monitor.clone();
        let source = self.source.clone();
        let period = Duration::from_secs_f64(self.config.monitor.update_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !phase.read().is_recording() {
                    break;
                }
                let power = source.current_power();
                monitor.lock().update_power_level(power);
            }
        })
    }
}
