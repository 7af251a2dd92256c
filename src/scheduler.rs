//! The transcription decision loop.
//!
//! One cycle per pass: pick a tier, check eligibility, and when everything
//! lines up re-transcribe the whole recording from time zero. The loop never
//! runs more than one request at a time and only escalates tiers, never
//! downgrades them, within a recording.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capture::SampleSource;
use crate::config::SchedulerConfig;
use crate::engine::ModelTier;
use crate::noise_monitor::NoiseStateMonitor;
use crate::registry::TierRegistry;
use crate::segments::{latest_noisy_end, project_intervals};
use crate::session::RecordingPhase;

/// One transcription request over a window of the recording. A provisional
/// copy (no id, no text) sits in the session's "current" slot while the
/// request is in flight; the completed record is appended to the activity
/// log in completion order.
#[derive(Debug, Clone)]
pub struct TranscriptionActivity {
    pub id: Option<Uuid>,
    /// Window bounds in seconds relative to recording start. The start is
    /// always zero: every request re-covers the full buffer.
    pub window_start: f64,
    pub window_end: f64,
    pub requested_at: Instant,
    pub completed_at: Option<Instant>,
    pub tier: ModelTier,
    pub text: Option<String>,
}

pub struct TranscriptionScheduler {
    config: SchedulerConfig,
    registry: Arc<TierRegistry>,
    source: Arc<dyn SampleSource>,
    phase: Arc<RwLock<RecordingPhase>>,
    monitor: Arc<Mutex<NoiseStateMonitor>>,
    activities: Arc<RwLock<Vec<TranscriptionActivity>>>,
    current: Arc<Mutex<Option<TranscriptionActivity>>>,
    transcript_tx: broadcast::Sender<String>,
}

impl TranscriptionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SchedulerConfig,
        registry: Arc<TierRegistry>,
        source: Arc<dyn SampleSource>,
        phase: Arc<RwLock<RecordingPhase>>,
        monitor: Arc<Mutex<NoiseStateMonitor>>,
        activities: Arc<RwLock<Vec<TranscriptionActivity>>>,
        current: Arc<Mutex<Option<TranscriptionActivity>>>,
        transcript_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            config,
            registry,
            source,
            phase,
            monitor,
            activities,
            current,
            transcript_tx,
        }
    }

    /// Spawn the decision loop. It exits on its own once the recording
    /// phase leaves `Recording`.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        // Let the initial audio accumulate before the first request.
        tokio::time::sleep(Duration::from_secs_f64(self.config.transcribe_delay_secs)).await;

        let retry = Duration::from_millis(self.config.retry_interval_ms);
        let mut tier = ModelTier::Tiny;

        loop {
            let Some(started_at) = self.phase.read().started_at() else {
                break;
            };

            let candidate = next_tier(
                tier,
                self.last_completed_window_end(),
                self.current_noisy_end(started_at),
                self.config.model_upgrade_delay_secs,
            );

            // Ineligible cycles back off without advancing any state.
            let Some(engine) = self.registry.request(candidate) else {
                tokio::time::sleep(retry).await;
                continue;
            };
            if !engine.try_begin() {
                tokio::time::sleep(retry).await;
                continue;
            }
            let window_end = started_at.elapsed().as_secs_f64();
            let Some(samples) = self.source.samples(0.0, window_end) else {
                engine.finish();
                tokio::time::sleep(retry).await;
                continue;
            };

            tier = candidate;
            let requested_at = Instant::now();
            if self.phase.read().is_recording() {
                *self.current.lock() = Some(TranscriptionActivity {
                    id: None,
                    window_start: 0.0,
                    window_end,
                    requested_at,
                    completed_at: None,
                    tier: candidate,
                    text: None,
                });
            }

            let sample_rate = self.source.sample_rate();
            let engine_for_task = engine.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                engine_for_task.transcribe(&samples, sample_rate)
            })
            .await;
            engine.finish();

            match outcome {
                Ok(Ok(text)) => {
                    if self.phase.read().is_recording() {
                        self.activities.write().push(TranscriptionActivity {
                            id: Some(Uuid::new_v4()),
                            window_start: 0.0,
                            window_end,
                            requested_at,
                            completed_at: Some(Instant::now()),
                            tier: candidate,
                            text: Some(text.clone()),
                        });
                        *self.current.lock() = None;
                        let _ = self.transcript_tx.send(text);
                    } else {
                        debug!("discarding transcription that completed after stop");
                    }
                }
                Ok(Err(e)) => {
                    // No per-request retry: the next cycle re-issues over a
                    // larger window.
                    warn!(error = %e, tier = %candidate, "transcription failed");
                    if self.phase.read().is_recording() {
                        *self.current.lock() = None;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "transcription task failed");
                    if self.phase.read().is_recording() {
                        *self.current.lock() = None;
                    }
                }
            }
        }

        debug!("transcription loop exited");
    }

    fn last_completed_window_end(&self) -> Option<f64> {
        self.activities.read().last().map(|a| a.window_end)
    }

    fn current_noisy_end(&self, started_at: Instant) -> Option<f64> {
        let events = self.monitor.lock().events().to_vec();
        let intervals = project_intervals(&events, started_at, Instant::now());
        latest_noisy_end(&intervals)
    }
}

/// Escalate one step when the last completed window ended at least
/// `upgrade_delay` seconds after the end of the most recent noisy interval,
/// meaning the previous request already covered everything the speaker said
/// and they have stayed quiet since.
fn next_tier(
    tier: ModelTier,
    last_window_end: Option<f64>,
    latest_noisy_end: Option<f64>,
    upgrade_delay: f64,
) -> ModelTier {
    match (last_window_end, latest_noisy_end) {
        (Some(window_end), Some(noisy_end)) if window_end - noisy_end >= upgrade_delay => {
            tier.upgraded().unwrap_or(tier)
        }
        _ => tier,
    }
}
