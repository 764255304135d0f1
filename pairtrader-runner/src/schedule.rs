//! Cycle scheduler.
//!
//! Runs one cycle per interval. After an unhealthy cycle the next wait grows
//! as `interval * 2^failures`, capped at `max_backoff`, with ±10% jitter so a
//! fleet of bots does not retry in lockstep. A healthy cycle resets it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ScheduleSection;
use crate::cycle::{CycleMode, Trader};

const JITTER: f64 = 0.1;
const STOP_POLL: Duration = Duration::from_millis(200);

/// Exponential backoff state across cycles.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// Backoff starting at `interval`; `max` is raised to `interval` if smaller.
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            failures: 0,
        }
    }

    /// Consecutive unhealthy cycles so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a cycle outcome and return the un-jittered wait before the next.
    pub fn record(&mut self, healthy: bool) -> Duration {
        if healthy {
            self.failures = 0;
            return self.interval;
        }
        self.failures = self.failures.saturating_add(1);
        let factor = 2u32.saturating_pow(self.failures.min(31));
        self.interval.saturating_mul(factor).min(self.max)
    }
}

/// Spread `base` by up to ±10%.
pub fn jittered<R: Rng>(base: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range(1.0 - JITTER..=1.0 + JITTER);
    base.mul_f64(factor)
}

/// Counts from one `run_loop`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub cycles: u64,
    pub unhealthy_cycles: u64,
    pub failed_cycles: u64,
    pub fills: u64,
}

/// Run cycles until `stop` is set or `max_cycles` (when non-zero) is reached.
pub fn run_loop(trader: &Trader, schedule: &ScheduleSection, stop: &AtomicBool) -> LoopSummary {
    let mut rng = rand::thread_rng();
    let mut backoff = Backoff::new(schedule.interval(), schedule.max_backoff());
    let mut summary = LoopSummary::default();

    info!(
        pair = %trader.config().pair,
        interval_secs = schedule.interval_secs,
        max_cycles = schedule.max_cycles,
        "scheduler started"
    );

    while !stop.load(Ordering::SeqCst) {
        summary.cycles += 1;
        let healthy = match trader.run_cycle(Utc::now(), CycleMode::Execute) {
            Ok(report) => {
                if report.execution.filled_trade().is_some() {
                    summary.fills += 1;
                }
                if !report.is_healthy() {
                    summary.unhealthy_cycles += 1;
                }
                report.is_healthy()
            }
            Err(e) => {
                error!(error = %e, "cycle failed");
                summary.failed_cycles += 1;
                false
            }
        };

        if schedule.max_cycles > 0 && summary.cycles >= schedule.max_cycles {
            break;
        }

        let wait = jittered(backoff.record(healthy), &mut rng);
        if backoff.failures() > 0 {
            info!(failures = backoff.failures(), wait_secs = wait.as_secs_f64(), "backing off");
        }
        sleep_unless_stopped(wait, stop);
    }

    info!(
        cycles = summary.cycles,
        fills = summary.fills,
        failed = summary.failed_cycles,
        "scheduler stopped"
    );
    summary
}

/// Sleep for `wait`, waking early if `stop` is set.
pub fn sleep_unless_stopped(wait: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + wait;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(30), Duration::from_secs(600));
        assert_eq!(b.record(false), Duration::from_secs(60));
        assert_eq!(b.record(false), Duration::from_secs(120));
        assert_eq!(b.record(false), Duration::from_secs(240));
        assert_eq!(b.record(false), Duration::from_secs(480));
        assert_eq!(b.record(false), Duration::from_secs(600));
        for _ in 0..100 {
            assert_eq!(b.record(false), Duration::from_secs(600));
        }
    }

    #[test]
    fn success_resets_backoff() {
        let mut b = Backoff::new(Duration::from_secs(30), Duration::from_secs(600));
        b.record(false);
        b.record(false);
        assert_eq!(b.record(true), Duration::from_secs(30));
        assert_eq!(b.failures(), 0);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_secs(100);
        for _ in 0..1000 {
            let d = jittered(base, &mut rng);
            assert!(
                d >= Duration::from_millis(89_999) && d <= Duration::from_millis(110_001),
                "{d:?}"
            );
        }
    }

    #[test]
    fn stop_flag_cuts_sleep_short() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        sleep_unless_stopped(Duration::from_secs(60), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn backoff_wait_stays_between_interval_and_cap(
            interval_secs in 1u64..3_600,
            max_secs in 1u64..86_400,
            outcomes in proptest::collection::vec(any::<bool>(), 1..64),
        ) {
            let interval = Duration::from_secs(interval_secs);
            let mut b = Backoff::new(interval, Duration::from_secs(max_secs));
            let cap = Duration::from_secs(max_secs).max(interval);
            for healthy in outcomes {
                let wait = b.record(healthy);
                prop_assert!(wait >= interval);
                prop_assert!(wait <= cap);
                if healthy {
                    prop_assert_eq!(wait, interval);
                }
            }
        }
    }
}
