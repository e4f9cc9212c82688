// Named periodic cycles with at most one running instance each

use chrono::{FixedOffset, Weekday};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, next_weekly_fire};
use crate::error::{OrchestratorError, OrchestratorResult};

pub type CycleFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire every period, first one period after start.
    Every(Duration),
    /// Fire on `weekday` at `hour:00` in the reference timezone.
    Weekly {
        weekday: Weekday,
        hour: u32,
        offset: FixedOffset,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub name: String,
    pub running: bool,
    pub runs: u64,
    pub skipped: u64,
}

struct Cycle {
    name: String,
    job: CycleFn,
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
}

impl Cycle {
    /// Run the job unless an earlier instance is still going.
    async fn fire(self: Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(cycle = %self.name, "Previous run still in progress, skipping tick");
            return;
        }

        let cycle = self.clone();
        tokio::spawn(async move {
            debug!(cycle = %cycle.name, "Cycle started");
            let outcome = AssertUnwindSafe((cycle.job)()).catch_unwind().await;
            cycle.running.store(false, Ordering::Release);
            match outcome {
                Ok(()) => {
                    cycle.runs.fetch_add(1, Ordering::Relaxed);
                    debug!(cycle = %cycle.name, "Cycle finished");
                }
                Err(_) => error!(cycle = %cycle.name, "Cycle panicked, will run again next tick"),
            }
        });
    }
}

pub struct CycleScheduler {
    clock: Arc<dyn Clock>,
    cycles: Mutex<HashMap<String, Arc<Cycle>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CycleScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cycles: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register `name` and start its timer. Each name may be registered once.
    pub fn register<F>(&self, name: &str, trigger: Trigger, job: F) -> OrchestratorResult<()>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let cycle = {
            let mut cycles = self.cycles.lock().unwrap_or_else(|p| p.into_inner());
            if cycles.contains_key(name) {
                return Err(OrchestratorError::DuplicateCycle(name.to_string()));
            }
            let cycle = Arc::new(Cycle {
                name: name.to_string(),
                job: Arc::new(job),
                running: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            });
            cycles.insert(name.to_string(), cycle.clone());
            cycle
        };

        let handle = match trigger {
            Trigger::Every(period) => tokio::spawn(Self::run_every(cycle, period)),
            Trigger::Weekly {
                weekday,
                hour,
                offset,
            } => tokio::spawn(Self::run_weekly(cycle, self.clock.clone(), weekday, hour, offset)),
        };
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
        info!(cycle = %name, ?trigger, "Registered cycle");
        Ok(())
    }

    /// Fire a registered cycle out of band, respecting its running guard.
    pub async fn fire_now(&self, name: &str) -> bool {
        let cycle = self
            .cycles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned();
        match cycle {
            Some(cycle) => {
                cycle.fire().await;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> Vec<CycleStats> {
        let cycles = self.cycles.lock().unwrap_or_else(|p| p.into_inner());
        let mut stats: Vec<CycleStats> = cycles
            .values()
            .map(|c| CycleStats {
                name: c.name.clone(),
                running: c.running.load(Ordering::Acquire),
                runs: c.runs.load(Ordering::Relaxed),
                skipped: c.skipped.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Stop every timer. Runs already in flight finish on their own.
    pub fn shutdown(&self) {
        for handle in self
            .handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }

    async fn run_every(cycle: Arc<Cycle>, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            cycle.clone().fire().await;
        }
    }

    async fn run_weekly(
        cycle: Arc<Cycle>,
        clock: Arc<dyn Clock>,
        weekday: Weekday,
        hour: u32,
        offset: FixedOffset,
    ) {
        loop {
            let now = clock.now();
            let next = next_weekly_fire(now, offset, weekday, hour);
            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
            debug!(cycle = %cycle.name, next = %next, "Waiting for weekly slot");
            tokio::time::sleep(wait).await;
            cycle.clone().fire().await;
        }
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::test_now;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> CycleScheduler {
        CycleScheduler::new(Arc::new(ManualClock::new(test_now())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_fires_on_period() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler
            .register("tick", Trigger::Every(Duration::from_secs(60)), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(155)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = scheduler();
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        scheduler
            .register("slow", Trigger::Every(Duration::from_secs(10)), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(25)).await;
                }
                .boxed()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(38)).await;
        // Fired at 10s and ran until 35s; ticks at 20s and 30s were skipped.
        assert_eq!(started.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats[0].skipped, 2);
        assert_eq!(stats[0].runs, 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let scheduler = scheduler();
        let noop = || async {}.boxed();
        scheduler
            .register("healing", Trigger::Every(Duration::from_secs(900)), noop)
            .unwrap();
        let err = scheduler
            .register("healing", Trigger::Every(Duration::from_secs(900)), noop)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateCycle(name) if name == "healing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_weekly_waits_for_slot() {
        // Friday 07:00 at UTC-5; Sunday 03:00 is 44 hours away.
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler
            .register(
                "selection",
                Trigger::Weekly {
                    weekday: Weekday::Sun,
                    hour: 3,
                    offset: FixedOffset::west_opt(5 * 3600).unwrap(),
                },
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed()
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(43 * 3600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_runs_again() {
        let scheduler = scheduler();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        scheduler
            .register("flaky", Trigger::Every(Duration::from_secs(10)), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first run blows up");
                    }
                }
                .boxed()
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let stats = scheduler.stats();
        assert_eq!(stats[0].runs, 1);
        assert_eq!(stats[0].skipped, 0);
        assert!(!stats[0].running);
    }

    #[tokio::test]
    async fn test_fire_now_unknown_cycle() {
        assert!(!scheduler().fire_now("missing").await);
    }
}
