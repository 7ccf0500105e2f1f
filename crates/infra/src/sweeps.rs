//! Background sweeps: lot expiry and reservation expiry.
//!
//! Each sweep runs on its own named thread, on a fixed cadence plus an
//! on-demand trigger. Failures are logged and retried with bounded
//! exponential backoff; they never reach the caller.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use stockledger_core::{DomainError, DomainResult};

use crate::lots::LotRegistry;
use crate::reservations::ReservationManager;

/// One unit of periodic maintenance. Returns how many records it touched.
pub trait SweepJob: Send + Sync + 'static {
    fn run(&self) -> DomainResult<usize>;
}

/// Marks lots past their expiry date as expired.
pub struct LotExpirySweep(pub Arc<LotRegistry>);

impl SweepJob for LotExpirySweep {
    fn run(&self) -> DomainResult<usize> {
        Ok(self.0.sweep_expired(Utc::now().date_naive())?.len())
    }
}

/// Expires active reservations past their `expires_at`.
pub struct ReservationExpirySweep(pub Arc<ReservationManager>);

impl SweepJob for ReservationExpirySweep {
    fn run(&self) -> DomainResult<usize> {
        Ok(self.0.expire_due(Utc::now())?.len())
    }
}

#[derive(Debug, Clone)]
pub struct SweepRunner {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl SweepRunner {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }

    /// Spawn the sweep thread. The job runs once at startup.
    pub fn spawn<J: SweepJob>(&self, name: &'static str, job: Arc<J>) -> DomainResult<SweepHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweep_loop(name, cfg, shutdown_rx, trigger_rx, job))
            .map_err(|e| DomainError::persistence(format!("failed to spawn {name} thread: {e}")))?;

        Ok(SweepHandle {
            name,
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

/// Handle to a running sweep (trigger + shutdown).
#[derive(Debug)]
pub struct SweepHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SweepHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request an immediate run. Coalesced with any run already pending.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_loop<J: SweepJob>(
    name: &'static str,
    cfg: SweepRunner,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    job: Arc<J>,
) {
    info!(sweep = name, interval_secs = cfg.interval.as_secs(), "sweep started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;

        match job.run() {
            Ok(0) => {
                failures = 0;
                debug!(sweep = name, "nothing to sweep");
            }
            Ok(n) => {
                failures = 0;
                info!(sweep = name, swept = n, "sweep completed");
            }
            Err(e) => {
                warn!(sweep = name, error = %e, "sweep failed");
                failures += 1;
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(sweep = name, "sweep stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
        fail_first: usize,
    }

    impl SweepJob for Counting {
        fn run(&self) -> DomainResult<usize> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(DomainError::persistence("store unavailable"))
            } else {
                Ok(1)
            }
        }
    }

    fn wait_for(job: &Counting, at_least: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if job.runs.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn runs_at_startup_and_on_trigger() {
        let job = Arc::new(Counting { runs: AtomicUsize::new(0), fail_first: 0 });
        let handle = SweepRunner::every(Duration::from_secs(3600))
            .spawn("test-sweep", job.clone())
            .unwrap();

        assert!(wait_for(&job, 1));
        handle.trigger();
        assert!(wait_for(&job, 2));
        handle.shutdown();
    }

    #[test]
    fn failures_are_retried_with_backoff() {
        let job = Arc::new(Counting { runs: AtomicUsize::new(0), fail_first: 2 });
        let mut runner = SweepRunner::every(Duration::from_secs(3600));
        runner.base_backoff = Duration::from_millis(10);
        let handle = runner.spawn("retry-sweep", job.clone()).unwrap();

        assert!(wait_for(&job, 3));
        handle.shutdown();
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), Duration::from_millis(250));
        assert_eq!(backoff(base, 3), Duration::from_millis(1000));
        assert_eq!(backoff(base, 30), Duration::from_millis(10_000));
    }
}
