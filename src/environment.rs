// The simulation driver — advances a simulated clock and pumps per-tick
// state updates across every registered auctioneer's agents. Grounded on
// `pythonmatcher/environment.py`'s `SimulationEnvironment`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use crate::auctioneer::Auctioneer;
use crate::telemetry::TelemetrySink;

/// Simulated (not wall-clock) time together with the stop flag a caller can
/// raise from outside `run()`.
pub struct Environment {
    current_time: DateTime<Utc>,
    stop_time: DateTime<Utc>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    auctioneers: Vec<Auctioneer>,
}

impl Environment {
    pub fn new(start_time: DateTime<Utc>, stop_time: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            current_time: start_time,
            stop_time,
            interval,
            stop: Arc::new(AtomicBool::new(false)),
            auctioneers: Vec::new(),
        }
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn register_auctioneer(&mut self, auctioneer: Auctioneer) {
        self.auctioneers.push(auctioneer);
    }

    pub fn auctioneers(&self) -> &[Auctioneer] {
        &self.auctioneers
    }

    /// A cloneable handle that can raise `stop()` from outside the running
    /// loop (e.g. a signal handler installed by `main`).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Raises the stop flag. The current tick completes; the loop exits on
    /// the next boundary rather than being interrupted mid-tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Advances `current_time` by `interval` between ticks. On each tick,
    /// every registered auctioneer fans a state update out to its agents in
    /// registration order; the clock only advances once that tick's
    /// fan-out (including any repricing) has fully settled. Halts when
    /// `current_time` passes `stop_time` or `stop()` has been raised.
    pub async fn run(&mut self, telemetry: &TelemetrySink, rng: &mut dyn RngCore) {
        let interval_secs = self.interval.num_milliseconds() as f64 / 1000.0;
        while self.current_time <= self.stop_time && !self.stop.load(Ordering::SeqCst) {
            let mut samples = Vec::new();
            for auctioneer in self.auctioneers.iter_mut() {
                samples.extend(auctioneer.tick(self.current_time, interval_secs, rng));
            }
            telemetry.write_points(samples).await;
            self.current_time += self.interval;
        }
    }
}
