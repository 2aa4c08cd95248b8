//! Per-target refresh loop.
//!
//! `Pending -> Running(Fetching) -> Running(Forecasting) -> Running(Publishing)
//! -> Sleeping -> Running(Fetching) -> ...`, forever. A failure in any stage
//! jumps straight to `Sleeping` with the backoff delay. A target with a zero
//! refresh interval runs one cycle and ends in `Finished`.

use crate::config::RefreshTarget;
use crate::error::CycleError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Forecasting,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Pending,
    Running(Stage),
    Sleeping { after: Outcome, delay: Duration },
    Finished(Outcome),
}

pub type StateSender = watch::Sender<SchedulerState>;

/// One fetch -> forecast -> publish pass for a target. Implementations
/// report stage changes through `state`.
pub trait RefreshCycle: Send + Sync + 'static {
    fn run_cycle(
        &self,
        target: &RefreshTarget,
        state: &StateSender,
    ) -> impl Future<Output = Result<(), CycleError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub refresh_interval: Duration,
    pub backoff: Duration,
}

impl SchedulePolicy {
    /// Delay before the next cycle, or `None` when the target is one-shot.
    pub fn next_delay(&self, outcome: Outcome) -> Option<Duration> {
        if self.refresh_interval.is_zero() {
            return None;
        }
        Some(match outcome {
            Outcome::Success => self.refresh_interval,
            Outcome::Failure => self.backoff,
        })
    }
}

pub struct RefreshScheduler<C> {
    target: RefreshTarget,
    cycle: Arc<C>,
    policy: SchedulePolicy,
    start_delay: Duration,
    state: StateSender,
}

impl<C: RefreshCycle> RefreshScheduler<C> {
    pub fn new(target: RefreshTarget, cycle: Arc<C>, backoff: Duration) -> Self {
        let policy = SchedulePolicy {
            refresh_interval: Duration::from_secs(target.refresh_interval_secs),
            backoff,
        };
        let (state, _) = watch::channel(SchedulerState::Pending);
        Self {
            target,
            cycle,
            policy,
            start_delay: Duration::ZERO,
            state,
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn target(&self) -> &RefreshTarget {
        &self.target
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    async fn run_cycle(&self) -> Result<(), CycleError> {
        self.state.send_replace(SchedulerState::Running(Stage::Fetching));
        self.cycle.run_cycle(&self.target, &self.state).await
    }

    /// Drives the target until the process exits. Returns only for one-shot
    /// targets, with that single cycle's result.
    pub async fn run(self) -> Result<(), CycleError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        loop {
            let result = self.run_cycle().await;
            let outcome = match &result {
                Ok(()) => {
                    info!(symbol = %self.target.symbol, period = %self.target.period, "forecast refreshed");
                    Outcome::Success
                }
                Err(e) => {
                    warn!(
                        symbol = %self.target.symbol,
                        period = %self.target.period,
                        stage = ?e.stage(),
                        error = %e,
                        "refresh cycle failed"
                    );
                    Outcome::Failure
                }
            };

            let Some(delay) = self.policy.next_delay(outcome) else {
                self.state.send_replace(SchedulerState::Finished(outcome));
                return result;
            };

            self.state
                .send_replace(SchedulerState::Sleeping { after: outcome, delay });
            tokio::time::sleep(delay).await;
        }
    }
}
