//! Delayed, periodic and daily callbacks built on the [`Scheduler`].
//!
//! Every timer is a one-shot job that sleeps, fires and, for recurring
//! timers, submits the next one-shot job. Callbacks receive the instant the
//! timer fired.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use tokio::sync::watch;

use homehub_domain::error::SchedulerError;
use homehub_domain::time::{Timestamp, delay_until, next_daily_occurrence, now};

use crate::callback::Callback;
use crate::scheduler::Scheduler;

/// Cancels the timer it was returned for. Dropping it does not cancel.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl TimerHandle {
    /// Stop the timer. A callback that is already running is not interrupted.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

#[derive(Clone)]
pub struct Timer {
    scheduler: Scheduler,
}

#[derive(Debug, Clone, Copy)]
enum Recurrence {
    Once,
    Every {
        interval: Duration,
        wait_for_completion: bool,
    },
    /// `target` is the deadline this arming fires at.
    Daily {
        time_of_day: NaiveTime,
        target: Timestamp,
    },
}

struct Armed {
    callback: Callback<Timestamp>,
    recurrence: Recurrence,
    cancel: Arc<watch::Sender<bool>>,
}

impl Timer {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Fire `callback` once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchedulerError`] when the job cannot be submitted.
    pub fn schedule_after(
        &self,
        delay: Duration,
        callback: Callback<Timestamp>,
    ) -> Result<TimerHandle, SchedulerError> {
        self.start(callback, Recurrence::Once, delay)
    }

    /// Fire `callback` once at `at`, or immediately if `at` is in the past.
    ///
    /// # Errors
    ///
    /// Returns a [`SchedulerError`] when the job cannot be submitted.
    pub fn schedule_at(
        &self,
        at: Timestamp,
        callback: Callback<Timestamp>,
    ) -> Result<TimerHandle, SchedulerError> {
        self.start(callback, Recurrence::Once, delay_until(now(), at))
    }

    /// Fire `callback` every `interval`, the first time after one interval.
    ///
    /// With `wait_for_completion` the next interval starts once the callback
    /// has returned, so runs never overlap. Without it, each run is its own
    /// job and slow callbacks may overlap.
    ///
    /// # Errors
    ///
    /// Returns a [`SchedulerError`] when the job cannot be submitted.
    pub fn periodic(
        &self,
        interval: Duration,
        callback: Callback<Timestamp>,
        wait_for_completion: bool,
    ) -> Result<TimerHandle, SchedulerError> {
        let recurrence = Recurrence::Every {
            interval,
            wait_for_completion,
        };
        self.start(callback, recurrence, interval)
    }

    /// Fire `callback` every day at `time_of_day` (UTC).
    ///
    /// # Errors
    ///
    /// Returns a [`SchedulerError`] when the job cannot be submitted.
    pub fn daily(
        &self,
        time_of_day: NaiveTime,
        callback: Callback<Timestamp>,
    ) -> Result<TimerHandle, SchedulerError> {
        let from = now();
        let target = next_daily_occurrence(from, time_of_day);
        let recurrence = Recurrence::Daily {
            time_of_day,
            target,
        };
        self.start(callback, recurrence, delay_until(from, target))
    }

    fn start(
        &self,
        callback: Callback<Timestamp>,
        recurrence: Recurrence,
        delay: Duration,
    ) -> Result<TimerHandle, SchedulerError> {
        let (cancel, _) = watch::channel(false);
        let cancel = Arc::new(cancel);
        let armed = Arc::new(Armed {
            callback,
            recurrence,
            cancel: Arc::clone(&cancel),
        });
        arm(&self.scheduler, armed, delay)?;
        Ok(TimerHandle { cancel })
    }
}

fn arm(scheduler: &Scheduler, armed: Arc<Armed>, delay: Duration) -> Result<(), SchedulerError> {
    let next = scheduler.clone();
    scheduler.submit(async move {
        let mut cancelled = armed.cancel.subscribe();
        if *cancelled.borrow_and_update() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancelled.changed() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
        armed.fire(&next).await;
        Ok(())
    })
}

impl Armed {
    async fn fire(self: Arc<Self>, scheduler: &Scheduler) {
        let fired_at = now();
        match self.recurrence {
            Recurrence::Once => self.invoke(fired_at).await,
            Recurrence::Every {
                interval,
                wait_for_completion: true,
            } => {
                self.invoke(fired_at).await;
                self.rearm(scheduler, interval);
            }
            Recurrence::Every {
                interval,
                wait_for_completion: false,
            } => {
                self.submit(scheduler, fired_at);
                self.rearm(scheduler, interval);
            }
            Recurrence::Daily {
                time_of_day,
                target,
            } => {
                self.submit(scheduler, fired_at);
                // The sleep may end before the wall clock reaches `target`;
                // the next deadline must still be strictly after it.
                let next = next_daily_occurrence(fired_at.max(target), time_of_day);
                let rearmed = Arc::new(Armed {
                    callback: Arc::clone(&self.callback),
                    recurrence: Recurrence::Daily {
                        time_of_day,
                        target: next,
                    },
                    cancel: Arc::clone(&self.cancel),
                });
                rearmed.rearm(scheduler, delay_until(now(), next));
            }
        }
    }

    async fn invoke(&self, fired_at: Timestamp) {
        if let Err(err) = (self.callback)(fired_at).await {
            tracing::warn!(%err, "timer callback failed");
        }
    }

    fn submit(&self, scheduler: &Scheduler, fired_at: Timestamp) {
        if let Err(err) = scheduler.submit((self.callback)(fired_at)) {
            tracing::warn!(%err, "failed to schedule timer callback");
        }
    }

    fn rearm(self: Arc<Self>, scheduler: &Scheduler, delay: Duration) {
        if *self.cancel.borrow() {
            return;
        }
        if let Err(err) = arm(scheduler, self, delay) {
            tracing::warn!(%err, "failed to re-arm timer");
        }
    }
}
