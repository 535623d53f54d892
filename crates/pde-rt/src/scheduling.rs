//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Runtime helpers supporting the engine."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receiver side of the scheduler's shutdown broadcast.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested or the scheduler is gone.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns the engine's background tasks.
///
/// Periodic tasks use fixed-delay scheduling: the next run starts `period`
/// after the previous one finished, so a slow run never overlaps with the
/// next one. Shutdown stops every loop at its next await point without
/// waiting for in-flight work to finish.
#[derive(Debug)]
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of tasks spawned and not yet joined.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run `task` every `period`, first run one period from now.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut signal = self.shutdown_signal();
        let task_name = name.to_owned();
        self.spawn(name, async move {
            loop {
                tokio::select! {
                    _ = signal.triggered() => break,
                    _ = tokio::time::sleep(period) => {}
                }
                tokio::select! {
                    _ = signal.triggered() => break,
                    _ = task() => {}
                }
            }
            debug!(task = %task_name, "periodic task stopped");
        });
    }

    /// Spawn a long-running task that is aborted at its next await point on shutdown.
    pub fn spawn<Fut>(&self, name: &str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut signal = self.shutdown_signal();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = signal.triggered() => {}
                _ = fut => {}
            }
        });
        debug!(task = %name, "scheduled task");
        self.tasks.lock().push((name.to_owned(), handle));
    }

    /// Signal every task to stop and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            if let Err(err) = handle.await {
                warn!(task = %name, error = %err, "task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn periodic_task_waits_one_period_between_runs() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.spawn_periodic("count", Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        assert_eq!(scheduler.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_never_overlap() {
        let scheduler = Scheduler::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (flight, seen) = (in_flight.clone(), max_seen.clone());
        scheduler.spawn_periodic("slow", Duration::from_secs(1), move || {
            let (flight, seen) = (flight.clone(), seen.clone());
            async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.shutdown().await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_pending_work() {
        let scheduler = Scheduler::new();
        let signal = scheduler.shutdown_signal();
        scheduler.spawn("forever", std::future::pending());
        assert!(!signal.is_triggered());

        scheduler.shutdown().await;
        assert!(signal.is_triggered());
        assert!(scheduler.is_shutting_down());
    }
}
