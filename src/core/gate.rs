//! Process-wide concurrency gate for work-item launches.
//!
//! A counting semaphore bounds how many items execute at once, and launches
//! are spaced at least `stagger` apart. Every launch runs in its own task, so
//! callers never block on the gate. [`ConcurrencyGate::wait_idle`] lets a
//! short-lived process finish its queued launches before exiting.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GateConfig;

pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    stagger: Duration,
    next_slot: Mutex<Option<Instant>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts one launch as in flight until dropped, even if the task is
/// cancelled or its work panics.
struct InFlight(Arc<ConcurrencyGate>);

impl InFlight {
    fn enter(gate: &Arc<ConcurrencyGate>) -> Self {
        gate.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gate))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize, stagger: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            stagger,
            next_slot: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.max_concurrent_jobs, config.stagger())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a running item.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Launches queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once every launch so far, and any it launched in turn, has ended.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Run `work` in a new task once a permit is free and the stagger since
    /// the previous launch has elapsed. The permit is held until `work` ends.
    pub fn launch<F>(self: &Arc<Self>, label: String, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let in_flight = InFlight::enter(self);
        tokio::spawn(async move {
            let gate = Arc::clone(&in_flight.0);
            let _permit = match gate.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(item = %label, "Concurrency gate closed, dropping launch");
                    return;
                }
            };
            gate.wait_for_slot().await;
            debug!(item = %label, "Launching work item");
            work.await;
        })
    }

    /// Reserve the next launch slot and sleep until it arrives.
    async fn wait_for_slot(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.stagger);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_concurrency() {
        let gate = Arc::new(ConcurrencyGate::new(2, Duration::from_secs(1)));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                gate.launch(format!("job-{i}"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launches_are_staggered() {
        let gate = Arc::new(ConcurrencyGate::new(5, Duration::from_secs(8)));
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let origin = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let started = started.clone();
                gate.launch(format!("job-{i}"), async move {
                    started.lock().unwrap().push(Instant::now());
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = started.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 3);
        assert!(times[0] - origin < Duration::from_secs(1));
        assert!(times[1] - times[0] >= Duration::from_secs(8));
        assert!(times[2] - times[1] >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_covers_queued_and_running_items() {
        let gate = Arc::new(ConcurrencyGate::new(1, Duration::from_secs(2)));
        gate.wait_idle().await;

        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let finished = finished.clone();
            gate.launch(format!("job-{i}"), async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(gate.in_flight(), 3);

        gate.wait_idle().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_item_still_leaves_gate_idle() {
        let gate = Arc::new(ConcurrencyGate::new(1, Duration::ZERO));
        let handle = gate.launch("job-bad".to_string(), async {
            panic!("render crashed");
        });
        assert!(handle.await.is_err());
        gate.wait_idle().await;
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let gate = ConcurrencyGate::new(0, Duration::ZERO);
        assert_eq!(gate.capacity(), 1);
    }
}
