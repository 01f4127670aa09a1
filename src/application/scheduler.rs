//! C11 — Scheduler: event-driven recurring/one-shot/daily task runner
//! (spec.md §4.11). Each task runs in its own tokio task so a panic in one
//! callback cannot take down another; re-scheduling a name cancels the prior
//! task first.

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type AsyncTask = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

struct TaskHandle {
    cancel: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, cancel: oneshot::Sender<()>, join: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        if let Some(prior) = tasks.insert(name.to_string(), TaskHandle { cancel, join }) {
            let _ = prior.cancel.send(());
            prior.join.abort();
        }
    }

    pub fn schedule_recurring<F, Fut>(&self, name: &str, interval: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: AsyncTask = Arc::new(move || Box::pin(f()));
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let task_name = name.to_string();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; consume it before the loop
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        task().await;
                    }
                    _ = &mut cancel_rx => {
                        info!(task = %task_name, "Scheduler: recurring task cancelled");
                        break;
                    }
                }
            }
        });
        self.insert(name, cancel_tx, join);
    }

    pub fn schedule_once<F, Fut>(&self, name: &str, delay: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let task_name = name.to_string();
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    f().await;
                }
                _ = &mut cancel_rx => {
                    info!(task = %task_name, "Scheduler: one-shot task cancelled before firing");
                }
            }
        });
        self.insert(name, cancel_tx, join);
    }

    /// Runs `f` every day at `hour:minute` UTC, handling a missed slot (the
    /// target time already passed today) by running on the next occurrence.
    pub fn schedule_daily<F, Fut>(&self, name: &str, hour: u32, minute: u32, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: AsyncTask = Arc::new(move || Box::pin(f()));
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let task_name = name.to_string();
        let join = tokio::spawn(async move {
            loop {
                let Some(sleep_for) = duration_until_next(hour, minute) else {
                    error!(task = %task_name, hour, minute, "Scheduler: invalid daily time, aborting task");
                    return;
                };
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {
                        task().await;
                    }
                    _ = &mut cancel_rx => {
                        info!(task = %task_name, "Scheduler: daily task cancelled");
                        return;
                    }
                }
            }
        });
        self.insert(name, cancel_tx, join);
    }

    pub fn cancel(&self, name: &str) -> bool {
        let handle = self.tasks.lock().expect("scheduler lock poisoned").remove(name);
        match handle {
            Some(handle) => {
                let _ = handle.cancel.send(());
                handle.join.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let handles: Vec<TaskHandle> = self.tasks.lock().expect("scheduler lock poisoned").drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.cancel.send(());
            handle.join.abort();
        }
    }

    /// Cancels every task and waits up to `timeout` for them to unwind.
    pub async fn shutdown(&self, timeout: Duration) {
        let handles: Vec<TaskHandle> = self.tasks.lock().expect("scheduler lock poisoned").drain().map(|(_, h)| h).collect();
        let (cancels, joins): (Vec<_>, Vec<_>) = handles.into_iter().map(|h| (h.cancel, h.join)).unzip();
        for cancel in cancels {
            let _ = cancel.send(());
        }
        for join in joins {
            let _ = tokio::time::timeout(timeout, join).await;
        }
    }
}

fn duration_until_next(hour: u32, minute: u32) -> Option<Duration> {
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let now = Utc::now();
    let today_target = now.date_naive().and_time(target_time).and_utc();
    let next = if today_target > now {
        today_target
    } else {
        today_target + ChronoDuration::days(1)
    };
    (next - now).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn recurring_task_fires_and_cancel_stops_it() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        scheduler.schedule_recurring("tick", StdDuration::from_millis(10), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(StdDuration::from_millis(55)).await;
        scheduler.cancel("tick");
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn rescheduling_same_name_cancels_prior_task() {
        let scheduler = Scheduler::new();
        let first_count = Arc::new(AtomicUsize::new(0));
        let c1 = first_count.clone();
        scheduler.schedule_recurring("dup", StdDuration::from_millis(5), move || {
            let c1 = c1.clone();
            async move {
                c1.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(StdDuration::from_millis(15)).await;

        let second_count = Arc::new(AtomicUsize::new(0));
        let c2 = second_count.clone();
        scheduler.schedule_recurring("dup", StdDuration::from_millis(5), move || {
            let c2 = c2.clone();
            async move {
                c2.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        scheduler.cancel_all();
        assert!(second_count.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn duration_until_next_handles_missed_slot() {
        let d = duration_until_next(23, 59).unwrap();
        assert!(d <= StdDuration::from_secs(86400));
    }
}
