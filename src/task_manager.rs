//! Tracks the background tasks of a running service.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type NamedHandle = (&'static str, JoinHandle<()>);

/// Spawns named tasks and joins them on shutdown.
///
/// Every task receives the same shutdown signal through `shutdown_rx()`.
/// `shutdown` fires the signal, waits up to a grace period for the tasks to
/// finish and aborts the ones that do not.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<NamedHandle>>>,
    shutdown_tx: Arc<watch::Sender<()>>,
    shutdown_rx: watch::Receiver<()>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Spawns a new task and keeps its handle.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Returns a receiver that changes once shutdown begins.
    pub fn shutdown_rx(&self) -> watch::Receiver<()> {
        self.shutdown_rx.clone()
    }

    /// Signals shutdown without waiting for the tasks.
    pub fn signal_shutdown(&self) {
        // Receivers held by tasks keep the channel open.
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the task spawned as `name` to finish on its own.
    ///
    /// Returns `false` if no such task is tracked.
    pub async fn join(&self, name: &'static str) -> bool {
        let handle = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            match handles.iter().position(|(task_name, _)| *task_name == name) {
                Some(index) => handles.remove(index).1,
                None => return false,
            }
        };
        if let Err(e) = handle.await {
            error!(task_name = name, error = %e, "Task panicked.");
        } else {
            debug!(task_name = name, "Task finished.");
        }
        true
    }

    /// Signals shutdown and waits up to `grace` for every task.
    pub async fn shutdown(self, grace: Duration) {
        self.signal_shutdown();
        let handles: Vec<NamedHandle> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(tasks = handles.len(), "Waiting for tasks to complete...");

        let names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        let joined = tokio::time::timeout(grace, join_all(handles.into_iter().map(|(_, h)| h))).await;
        let Ok(results) = joined else {
            warn!(grace_ms = grace.as_millis() as u64, "Tasks did not finish in time, aborting.");
            for (name, abort) in names.iter().zip(aborts) {
                if !abort.is_finished() {
                    warn!(task_name = name, "Aborting task.");
                    abort.abort();
                }
            }
            return;
        };

        let mut panicked = 0;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name = name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name = name, error = %e, "Task panicked during shutdown.");
                    panicked += 1;
                }
            }
        }
        if panicked == 0 {
            info!("All tasks shut down gracefully.");
        }
    }
}
