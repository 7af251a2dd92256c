//! Tier-keyed cache of loaded inference engines.
//!
//! Loads run on blocking tasks and are idempotent: requesting a tier that is
//! already loading or loaded is a no-op. A failed load is recorded once and
//! the tier stays unavailable instead of being retried every cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::engine::{EngineError, EngineLoader, ModelTier, SpeechEngine};

/// A loaded engine plus its single-flight flag.
pub struct TierEngine {
    tier: ModelTier,
    engine: Box<dyn SpeechEngine>,
    busy: AtomicBool,
}

impl TierEngine {
    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the engine for one request. Returns false when a request is
    /// already mid-flight.
    pub fn try_begin(&self) -> bool {
        !self.busy.swap(true, Ordering::AcqRel)
    }

    /// Release the claim taken by `try_begin`.
    pub fn finish(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, EngineError> {
        self.engine.transcribe(samples, sample_rate)
    }
}

enum TierSlot {
    Loading,
    Ready(Arc<TierEngine>),
    Failed,
}

pub struct TierRegistry {
    loader: Arc<dyn EngineLoader>,
    slots: Arc<Mutex<HashMap<ModelTier, TierSlot>>>,
}

impl TierRegistry {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch the engine for `tier` if it is ready. A vacant tier kicks off a
    /// background load and returns None until the load completes.
    pub fn request(&self, tier: ModelTier) -> Option<Arc<TierEngine>> {
        let mut slots = self.slots.lock();
        match slots.get(&tier) {
            Some(TierSlot::Ready(engine)) => Some(engine.clone()),
            Some(TierSlot::Loading) | Some(TierSlot::Failed) => None,
            None => {
                slots.insert(tier, TierSlot::Loading);
                drop(slots);
                self.spawn_load(tier);
                None
            }
        }
    }

    /// Kick off a load without waiting for it. No-op when the tier is
    /// already loading, loaded, or failed.
    pub fn preload(&self, tier: ModelTier) {
        let mut slots = self.slots.lock();
        if slots.contains_key(&tier) {
            return;
        }
        slots.insert(tier, TierSlot::Loading);
        drop(slots);
        self.spawn_load(tier);
    }

    pub fn is_loaded(&self, tier: ModelTier) -> bool {
        matches!(self.slots.lock().get(&tier), Some(TierSlot::Ready(_)))
    }

    /// Drop the engine for `tier`. Safe while a request is in flight: the
    /// in-flight Arc keeps the engine alive until the request completes and
    /// its result is discarded.
    pub fn unload(&self, tier: ModelTier) {
        if self.slots.lock().remove(&tier).is_some() {
            info!(%tier, "engine unloaded");
        }
    }

    fn spawn_load(&self, tier: ModelTier) {
        let loader = self.loader.clone();
        let slots = self.slots.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || loader.load(tier)).await;

            let mut slots = slots.lock();
            // Unloaded while loading: drop the engine instead of
            // resurrecting the slot.
            if !matches!(slots.get(&tier), Some(TierSlot::Loading)) {
                return;
            }
            match result {
                Ok(Ok(engine)) => {
                    info!(
                        %tier,
                        elapsed_secs = started.elapsed().as_secs_f32(),
                        "engine ready"
                    );
                    slots.insert(
                        tier,
                        TierSlot::Ready(Arc::new(TierEngine {
                            tier,
                            engine,
                            busy: AtomicBool::new(false),
                        })),
                    );
                }
                Ok(Err(e)) => {
                    error!(%tier, error = %e, "engine load failed");
                    slots.insert(tier, TierSlot::Failed);
                }
                Err(e) => {
                    error!(%tier, error = %e, "engine load task failed");
                    slots.insert(tier, TierSlot::Failed);
                }
            }
        });
    }
}
