use crate::config::{RefreshTarget, ScheduleConfig};
use crate::scheduler::{RefreshCycle, RefreshScheduler, SchedulerState};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct Worker {
    target: RefreshTarget,
    state: watch::Receiver<SchedulerState>,
    handle: JoinHandle<()>,
}

/// Owns one background refresh task per target.
pub struct PipelineSupervisor<C> {
    cycle: Arc<C>,
    backoff: Duration,
    stagger: Duration,
    workers: Vec<Worker>,
}

impl<C: RefreshCycle> PipelineSupervisor<C> {
    pub fn new(cycle: Arc<C>, schedule: &ScheduleConfig) -> Self {
        Self {
            cycle,
            backoff: schedule.backoff(),
            stagger: schedule.stagger(),
            workers: Vec::new(),
        }
    }

    /// Spawns a scheduler for every target without waiting on any of them.
    /// The i-th target's first cycle is held back by `i * stagger` so the
    /// exchange does not see every request at once.
    pub fn start(&mut self, targets: &[RefreshTarget]) {
        for target in targets {
            let delay = self.stagger * self.workers.len() as u32;
            let scheduler = RefreshScheduler::new(target.clone(), Arc::clone(&self.cycle), self.backoff)
                .with_start_delay(delay);
            let state = scheduler.subscribe();

            debug!(%target, delay_ms = delay.as_millis() as u64, "spawning refresh worker");
            let handle = tokio::spawn(async move {
                let target = scheduler.target().clone();
                match scheduler.run().await {
                    Ok(()) => debug!(%target, "refresh worker finished"),
                    Err(e) => debug!(
                        %target,
                        stage = ?e.stage(),
                        error = %e,
                        "refresh worker finished after failure"
                    ),
                }
            });

            self.workers.push(Worker {
                target: target.clone(),
                state,
                handle,
            });
        }
        info!(workers = self.workers.len(), "refresh workers started");
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Latest state of every worker, in start order.
    pub fn states(&self) -> Vec<(RefreshTarget, SchedulerState)> {
        self.workers
            .iter()
            .map(|w| (w.target.clone(), *w.state.borrow()))
            .collect()
    }

    /// Cancels every worker and waits for the tasks to wind down.
    pub async fn shutdown(self) {
        for worker in &self.workers {
            worker.handle.abort();
        }
        let count = self.workers.len();
        join_all(self.workers.into_iter().map(|w| w.handle)).await;
        info!(workers = count, "refresh workers stopped");
    }
}
