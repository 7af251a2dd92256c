//! Microphone capture and the sample source abstraction.
//!
//! The capture keeps the whole recording's mono PCM in memory so the
//! scheduler can re-read arbitrary windows of it, and derives a normalized
//! power reading from the most recent samples for the noise monitor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use tracing::{error, info};

/// Provides power readings and PCM windows for the active recording.
/// `current_power` is polled once per monitor tick; `samples` extracts the
/// window handed to the inference engine.
pub trait SampleSource: Send + Sync {
    fn start_capture(&self) -> anyhow::Result<()>;
    fn stop_capture(&self);
    /// Normalized power in [0, 1] over the most recent readings.
    fn current_power(&self) -> f32;
    /// Native sample rate of the PCM returned by `samples`.
    fn sample_rate(&self) -> u32;
    /// Mono PCM in [-1, 1] covering `[start_secs, end_secs)` of the
    /// recording, clamped to what has been captured so far. None when
    /// nothing is available yet.
    fn samples(&self, start_secs: f64, end_secs: f64) -> Option<Vec<f32>>;
}

const MIN_DECIBELS: f32 = -80.0;

/// Map an RMS amplitude onto the normalized power curve the monitor is
/// tuned against: dBFS clamped at -80 and squashed through
/// ((db + 80) / 80)^2.
fn power_from_rms(rms: f32) -> f32 {
    if rms <= 0.0 {
        return 0.0;
    }
    let decibels = 20.0 * rms.log10();
    let clamped = decibels.max(MIN_DECIBELS);
    if clamped == MIN_DECIBELS {
        0.0
    } else {
        ((clamped + 80.0) / 80.0).powi(2)
    }
}

struct CaptureShared {
    /// Mono PCM accumulated since capture start.
    samples: Mutex<Vec<f32>>,
    /// Actual device rate, stored once the stream is open.
    sample_rate: AtomicU32,
    capturing: AtomicBool,
}

/// Captures from the default input device. cpal streams are not `Send`, so
/// a dedicated thread owns the stream for the lifetime of the capture and
/// is parked until `stop_capture`.
pub struct MicCapture {
    shared: Arc<CaptureShared>,
    /// Horizon of the power reading, one monitor tick's worth of audio.
    power_window_secs: f64,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl MicCapture {
    pub fn new(power_window_secs: f64) -> Self {
        Self {
            shared: Arc::new(CaptureShared {
                samples: Mutex::new(Vec::new()),
                sample_rate: AtomicU32::new(0),
                capturing: AtomicBool::new(false),
            }),
            power_window_secs,
            stop_tx: Mutex::new(None),
        }
    }
}

impl SampleSource for MicCapture {
    fn start_capture(&self) -> anyhow::Result<()> {
        if self.shared.capturing.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("capture already running"));
        }
        self.shared.samples.lock().clear();

        let shared = self.shared.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();

        thread::spawn(move || {
            let stream = match open_input_stream(&shared) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    shared.capturing.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Parked until stop; a disconnected sender unblocks us too.
            let _ = stop_rx.recv();
            drop(stream);
            shared.capturing.store(false, Ordering::SeqCst);
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                *self.stop_tx.lock() = Some(stop_tx);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.shared.capturing.store(false, Ordering::SeqCst);
                Err(anyhow!("timed out waiting for the audio device"))
            }
        }
    }

    fn stop_capture(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
    }

    fn current_power(&self) -> f32 {
        let rate = self.shared.sample_rate.load(Ordering::SeqCst);
        if rate == 0 {
            return 0.0;
        }
        let samples = self.shared.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        let window = ((self.power_window_secs * rate as f64) as usize).max(1);
        let tail = &samples[samples.len().saturating_sub(window)..];
        let mean_square = tail.iter().map(|s| s * s).sum::<f32>() / tail.len() as f32;
        power_from_rms(mean_square.sqrt())
    }

    fn sample_rate(&self) -> u32 {
        self.shared.sample_rate.load(Ordering::SeqCst)
    }

    fn samples(&self, start_secs: f64, end_secs: f64) -> Option<Vec<f32>> {
        let rate = self.shared.sample_rate.load(Ordering::SeqCst);
        if rate == 0 {
            return None;
        }
        let samples = self.shared.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let start = (start_secs.max(0.0) * rate as f64) as usize;
        let end = ((end_secs * rate as f64) as usize).min(samples.len());
        if start >= end {
            return None;
        }
        Some(samples[start..end].to_vec())
    }
}

fn open_input_stream(shared: &Arc<CaptureShared>) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no input device available"))?;
    let supported = device
        .default_input_config()
        .context("querying default input config")?;
    let channels = supported.channels() as usize;
    shared
        .sample_rate
        .store(supported.sample_rate().0, Ordering::SeqCst);

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = supported.sample_rate().0,
        channels,
        "capturing from input device"
    );

    let config = supported.config();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, shared.clone())?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, shared.clone())?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, channels, shared.clone())?,
        other => return Err(anyhow!("sample format not supported: {other:?}")),
    };
    stream.play().context("starting input stream")?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    shared: Arc<CaptureShared>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_fn = |err| error!("input stream error: {err}");
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut samples = shared.samples.lock();
            for frame in data.chunks(channels) {
                let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                samples.push(sum / channels as f32);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_rms_maps_to_one() {
        assert!((power_from_rms(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_silence_maps_to_zero() {
        assert_eq!(power_from_rms(0.0), 0.0);
        // Below the -80 dB floor.
        assert_eq!(power_from_rms(1e-6), 0.0);
    }

    #[test]
    fn test_mid_level_follows_the_curve() {
        // -20 dBFS: ((−20 + 80) / 80)^2 = 0.5625
        assert!((power_from_rms(0.1) - 0.5625).abs() < 1e-4);
    }

    #[test]
    fn test_power_is_monotonic_in_rms() {
        let mut last = 0.0;
        for i in 1..=100 {
            let power = power_from_rms(i as f32 / 100.0);
            assert!(power >= last);
            last = power;
        }
    }
}
