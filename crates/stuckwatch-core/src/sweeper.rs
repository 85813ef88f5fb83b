//! Background worker that drives [`Monitor::sweep`] on a fixed cadence.
//!
//! One sweeper per monitor. The worker sleeps in short chunks so `stop`
//! returns promptly even with long intervals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::monitor::{Monitor, SweepOutcome};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[inline]
fn sweep_interval(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}

/// Handle to the running sweep thread. Stops the thread on drop.
#[derive(Debug)]
pub struct Sweeper {
    monitor: Arc<Monitor>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the `stuck-sweeper` thread.
    ///
    /// Fails with [`Error::AlreadyRunning`] if this monitor already has a
    /// sweeper, or [`Error::WorkerSpawn`] if the OS refuses the thread.
    pub fn start(monitor: Arc<Monitor>, interval: Duration) -> Result<Self> {
        if !monitor.attach_sweeper() {
            return Err(Error::AlreadyRunning);
        }

        let interval = sweep_interval(interval);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_monitor = Arc::clone(&monitor);
        let worker_shutdown = Arc::clone(&shutdown);

        let spawned = std::thread::Builder::new()
            .name("stuck-sweeper".into())
            .spawn(move || sweep_loop(&worker_monitor, &worker_shutdown, interval));

        match spawned {
            Ok(handle) => Ok(Self {
                monitor,
                shutdown,
                worker: Some(handle),
            }),
            Err(e) => {
                monitor.detach_sweeper();
                Err(Error::WorkerSpawn(e))
            }
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("stuck sweeper thread panicked");
            }
            self.monitor.detach_sweeper();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_loop(monitor: &Monitor, shutdown: &AtomicBool, interval: Duration) {
    tracing::info!(
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        stuck_threshold_secs = monitor.stuck_threshold(),
        hogging_threshold_secs = monitor.hogging_threshold(),
        "stuck sweeper started"
    );

    loop {
        if shutdown.load(Ordering::Acquire) {
            tracing::info!("stuck sweeper shutting down");
            return;
        }

        if let SweepOutcome::Completed(summary) = monitor.sweep() {
            if summary.notify_failures > 0 {
                tracing::warn!(
                    failures = summary.notify_failures,
                    "sweep completed with listener failures"
                );
            }
        }

        // Sleep in small increments to allow quick shutdown.
        let mut remaining = interval;
        while !remaining.is_zero() {
            if shutdown.load(Ordering::Acquire) {
                tracing::info!("stuck sweeper shutting down");
                return;
            }
            let chunk = remaining.min(SHUTDOWN_POLL);
            std::thread::sleep(chunk);
            remaining = remaining.saturating_sub(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::MonitorConfig;
    use crate::record::WorkId;
    use std::time::Instant;

    fn monitor(clock: &Arc<ManualClock>) -> Arc<Monitor> {
        Arc::new(
            Monitor::builder(MonitorConfig {
                stuck_threshold_secs: 3,
                hogging_threshold_secs: 1,
                ..MonitorConfig::default()
            })
            .clock(Arc::clone(clock) as Arc<dyn Clock>)
            .build(),
        )
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn interval_has_floor() {
        assert_eq!(sweep_interval(Duration::ZERO), MIN_INTERVAL);
        assert_eq!(sweep_interval(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn background_sweeps_promote_work() {
        let clock = Arc::new(ManualClock::new(0));
        let m = monitor(&clock);
        let _h = m.begin(WorkId(1), "/slow");
        clock.set(5_000);

        let mut sweeper = Sweeper::start(Arc::clone(&m), Duration::from_millis(10)).unwrap();
        assert!(sweeper.is_running());
        assert!(wait_until(Duration::from_secs(5), || m.stuck_thread_count() == 1));
        sweeper.stop();
        assert!(!sweeper.is_running());
        assert!(m.metrics().sweeps_total >= 1);
    }

    #[test]
    fn second_sweeper_is_rejected_until_first_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let m = monitor(&clock);
        let first = Sweeper::start(Arc::clone(&m), Duration::from_secs(60)).unwrap();
        let err = Sweeper::start(Arc::clone(&m), Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.error_type(), "ALREADY_RUNNING");
        assert!(m.has_sweeper());

        drop(first);
        assert!(!m.has_sweeper());
        let _again = Sweeper::start(m, Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn stop_is_prompt_with_long_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let mut sweeper = Sweeper::start(monitor(&clock), Duration::from_secs(3_600)).unwrap();
        let started = Instant::now();
        sweeper.stop();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
