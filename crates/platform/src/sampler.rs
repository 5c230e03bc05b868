//! Background power sampler.
//!
//! A [`PowerSampler`] owns exactly one worker thread for its whole lifetime.
//! The worker wakes every interval, takes a [`PowerReading`] when sampling is
//! enabled, and folds it into a running mean and an exponential moving
//! average. The caller drives it with [`start`](PowerSampler::start),
//! [`pause`](PowerSampler::pause), [`resume`](PowerSampler::resume) and
//! [`stop`](PowerSampler::stop) from any thread.
//!
//! [`PowerReading`]: crate::PowerReading

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::counter::{CounterSource, SysfsSource};
use crate::error::SamplerError;
use crate::lifecycle::Lifecycle;
use crate::power::{PowerCounters, PowerStats};

/// How the moving average treats the very first sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovingAverageSeed {
    /// Always apply `moving = (moving + sample) / 2`, starting from zero.
    #[default]
    Recurrence,
    /// Start the moving average at the first sample, then apply the recurrence.
    FirstSample,
}

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// Sleep between sample attempts, whether or not sampling is enabled.
    pub interval: Duration,
    pub counters: PowerCounters,
    pub seed: MovingAverageSeed,
}

impl SamplerOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            counters: PowerCounters::default(),
            seed: MovingAverageSeed::default(),
        }
    }

    pub fn counters(mut self, counters: PowerCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn seed(mut self, seed: MovingAverageSeed) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Aggregates {
    count: u64,
    total: f64,
    moving: f64,
}

impl Aggregates {
    fn record(&mut self, watts: f64, seed: MovingAverageSeed) {
        let first = self.count == 0;
        self.count += 1;
        self.total += watts;
        self.moving = match seed {
            MovingAverageSeed::FirstSample if first => watts,
            _ => (self.moving + watts) / 2.0,
        };
    }

    fn average(&self) -> f64 {
        self.total / self.count.max(1) as f64
    }
}

/// State touched by both the caller and the worker.
#[derive(Debug, Default)]
struct SamplerState {
    lifecycle: Lifecycle,
    // count, total and moving are updated together so getters never see a
    // total that disagrees with its count.
    aggregates: Mutex<Aggregates>,
    skipped: AtomicU64,
}

impl SamplerState {
    fn aggregates(&self) -> MutexGuard<'_, Aggregates> {
        self.aggregates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sample<S: CounterSource>(
        &self,
        source: &S,
        counters: &PowerCounters,
        seed: MovingAverageSeed,
    ) {
        match counters.read(source) {
            Ok(reading) => {
                let watts = reading.watts();
                self.aggregates().record(watts, seed);
                trace!(watts, "power sample");
            }
            Err(e) => {
                let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
                if skipped == 1 {
                    warn!(error = %e, "power counters unreadable, skipping samples");
                } else {
                    debug!(error = %e, skipped, "skipped power sample");
                }
            }
        }
    }
}

/// Periodically samples USB and battery power on a dedicated thread.
///
/// Dropping the sampler stops and joins the worker.
pub struct PowerSampler {
    state: Arc<SamplerState>,
    interval: Duration,
    wake: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PowerSampler {
    /// Spawns a sampler reading the default sysfs counters.
    pub fn new(interval: Duration) -> Result<Self, SamplerError> {
        Self::with_source(SamplerOptions::new(interval), SysfsSource)
    }

    pub fn with_source<S>(options: SamplerOptions, source: S) -> Result<Self, SamplerError>
    where
        S: CounterSource + 'static,
    {
        let SamplerOptions {
            interval,
            counters,
            seed,
        } = options;

        if interval.is_zero() {
            return Err(SamplerError::ZeroInterval);
        }

        let state = Arc::new(SamplerState::default());
        let (wake, sleeper) = mpsc::channel::<()>();

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("power-sampler".into())
            .spawn(move || {
                run(&worker_state, &source, &counters, seed, interval, &sleeper);
            })
            .map_err(SamplerError::Spawn)?;

        debug!(interval_us = interval.as_micros() as u64, "power sampler spawned");

        Ok(Self {
            state,
            interval,
            wake: Some(wake),
            worker: Some(worker),
        })
    }

    pub fn start(&self) {
        self.state.lifecycle.enable();
    }

    pub fn resume(&self) {
        self.state.lifecycle.enable();
    }

    /// Disables sampling. Aggregates are kept.
    pub fn pause(&self) {
        self.state.lifecycle.disable();
    }

    /// Terminates the worker and waits for it to exit.
    ///
    /// Safe to call repeatedly; only the first call does anything. A stopped
    /// sampler cannot be restarted.
    pub fn stop(&mut self) {
        if self.state.lifecycle.terminate() {
            debug!("stopping power sampler");
        }

        if let Some(wake) = self.wake.take() {
            let _ = wake.send(());
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("power sampler thread panicked");
            }
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.state.lifecycle.is_sampling()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lifecycle.is_terminated()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Mean power in watts over every sample taken; zero before the first.
    pub fn avg_power(&self) -> f64 {
        self.state.aggregates().average()
    }

    /// Exponential moving average in watts.
    pub fn moving_power(&self) -> f64 {
        self.state.aggregates().moving
    }

    pub fn sample_count(&self) -> u64 {
        self.state.aggregates().count
    }

    pub fn skipped_samples(&self) -> u64 {
        self.state.skipped.load(Ordering::Relaxed)
    }

    /// All aggregates from a single lock acquisition.
    pub fn stats(&self) -> PowerStats {
        let aggregates = *self.state.aggregates();
        PowerStats {
            avg_power_watts: aggregates.average(),
            moving_power_watts: aggregates.moving,
            samples: aggregates.count,
            skipped: self.skipped_samples(),
        }
    }
}

impl Drop for PowerSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PowerSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerSampler")
            .field("interval", &self.interval)
            .field("sampling", &self.is_sampling())
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}

fn run<S: CounterSource>(
    state: &SamplerState,
    source: &S,
    counters: &PowerCounters,
    seed: MovingAverageSeed,
    interval: Duration,
    sleeper: &mpsc::Receiver<()>,
) {
    loop {
        if state.lifecycle.is_terminated() {
            break;
        }

        if state.lifecycle.is_sampling() {
            state.sample(source, counters, seed);
        }

        match sleeper.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    trace!("power sampler exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::StaticCounterSource;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(1);

    fn synthetic_source(counters: &PowerCounters) -> Arc<StaticCounterSource> {
        let source = Arc::new(StaticCounterSource::new());
        source.set(counters.usb_current.primary(), "2000000");
        source.set(counters.usb_voltage.primary(), "5000000");
        source.set(counters.battery_current.primary(), "1000000");
        source.set(counters.battery_voltage.primary(), "4000000");
        source
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_aggregates_recurrence_from_zero() {
        let mut aggregates = Aggregates::default();
        aggregates.record(14.0, MovingAverageSeed::Recurrence);
        assert_eq!(aggregates.count, 1);
        assert_eq!(aggregates.average(), 14.0);
        assert_eq!(aggregates.moving, 7.0);

        aggregates.record(6.0, MovingAverageSeed::Recurrence);
        assert_eq!(aggregates.average(), 10.0);
        assert_eq!(aggregates.moving, 6.5);
    }

    #[test]
    fn test_aggregates_first_sample_seed() {
        let mut aggregates = Aggregates::default();
        aggregates.record(14.0, MovingAverageSeed::FirstSample);
        assert_eq!(aggregates.moving, 14.0);

        aggregates.record(6.0, MovingAverageSeed::FirstSample);
        assert_eq!(aggregates.moving, 10.0);
    }

    #[test]
    fn test_average_without_samples_is_zero() {
        assert_eq!(Aggregates::default().average(), 0.0);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = PowerSampler::new(Duration::ZERO).unwrap_err();
        assert!(matches!(err, SamplerError::ZeroInterval));
    }

    #[test]
    fn test_idle_sampler_reports_zero() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let mut sampler =
            PowerSampler::with_source(SamplerOptions::new(TICK).counters(counters), source)
                .unwrap();

        thread::sleep(Duration::from_millis(10));
        assert_eq!(sampler.sample_count(), 0);
        assert_eq!(sampler.avg_power(), 0.0);
        assert_eq!(sampler.moving_power(), 0.0);
        sampler.stop();
    }

    #[test]
    fn test_synthetic_counters_average_fourteen_watts() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let mut sampler =
            PowerSampler::with_source(SamplerOptions::new(TICK).counters(counters), source)
                .unwrap();

        sampler.start();
        assert!(wait_until(|| sampler.sample_count() >= 3));
        sampler.pause();
        sampler.stop();

        let stats = sampler.stats();
        assert_eq!(stats.avg_power_watts, 14.0);
        assert!(stats.moving_power_watts > 0.0 && stats.moving_power_watts <= 14.0);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_first_sample_seed_holds_constant_power() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let options = SamplerOptions::new(TICK)
            .counters(counters)
            .seed(MovingAverageSeed::FirstSample);
        let mut sampler = PowerSampler::with_source(options, source).unwrap();

        sampler.start();
        assert!(wait_until(|| sampler.sample_count() >= 2));
        sampler.stop();

        assert_eq!(sampler.moving_power(), 14.0);
    }

    #[test]
    fn test_pause_freezes_sample_count() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let mut sampler =
            PowerSampler::with_source(SamplerOptions::new(TICK).counters(counters), source)
                .unwrap();

        sampler.start();
        assert!(wait_until(|| sampler.sample_count() >= 2));
        sampler.pause();
        sampler.pause();
        // let a sample that was already in flight land
        thread::sleep(Duration::from_millis(20));
        let paused = sampler.sample_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sampler.sample_count(), paused);
        assert!(!sampler.is_sampling());

        sampler.resume();
        assert!(wait_until(|| sampler.sample_count() > paused));
        sampler.stop();
    }

    #[test]
    fn test_unreadable_counters_are_skipped() {
        let source = Arc::new(StaticCounterSource::new());
        let mut sampler = PowerSampler::with_source(SamplerOptions::new(TICK), source).unwrap();

        sampler.start();
        assert!(wait_until(|| sampler.skipped_samples() >= 3));
        sampler.stop();

        assert_eq!(sampler.sample_count(), 0);
        assert_eq!(sampler.avg_power(), 0.0);
    }

    #[test]
    fn test_stop_joins_worker() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let mut sampler = PowerSampler::with_source(
            SamplerOptions::new(TICK).counters(counters),
            Arc::clone(&source),
        )
        .unwrap();

        sampler.start();
        assert!(wait_until(|| sampler.sample_count() >= 1));
        sampler.stop();

        // the worker's clone of the source is released once it has exited
        assert_eq!(Arc::strong_count(&source), 1);
        let stopped = sampler.sample_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sampler.sample_count(), stopped);
        assert!(sampler.is_stopped());
    }

    #[test]
    fn test_stop_is_idempotent_and_works_before_start() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let mut sampler =
            PowerSampler::with_source(SamplerOptions::new(TICK).counters(counters), source)
                .unwrap();

        sampler.stop();
        sampler.stop();
        sampler.start();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(sampler.sample_count(), 0);
    }

    #[test]
    fn test_stop_wakes_sleeping_worker() {
        let mut sampler = PowerSampler::with_source(
            SamplerOptions::new(Duration::from_secs(60)),
            Arc::new(StaticCounterSource::new()),
        )
        .unwrap();

        let started = Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_terminates_worker() {
        let counters = PowerCounters::default();
        let source = synthetic_source(&counters);
        let sampler = PowerSampler::with_source(
            SamplerOptions::new(TICK).counters(counters),
            Arc::clone(&source),
        )
        .unwrap();
        sampler.start();

        drop(sampler);
        assert_eq!(Arc::strong_count(&source), 1);
    }
}
