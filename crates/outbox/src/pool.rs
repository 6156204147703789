//! Supervised pool of long-lived background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs named background tasks, restarting any that exit or panic while the
/// pool is still live, and stopping all of them on shutdown.
///
/// Tasks are expected to watch [`WorkerPool::token`] (or a child of it) and
/// return once it is cancelled.
pub struct WorkerPool {
    token: CancellationToken,
    restart_delay: Duration,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            restart_delay: Duration::from_secs(1),
            tasks: Vec::new(),
        }
    }

    /// Delay before a crashed task is started again (default 1 s).
    pub fn with_restart_delay(mut self, restart_delay: Duration) -> Self {
        self.restart_delay = restart_delay;
        self
    }

    /// The token whose cancellation stops the pool.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of supervised tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Supervises a task. `factory` is invoked for the first start and for
    /// every restart.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();
        let restart_delay = self.restart_delay;
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut restarts: u64 = 0;
            loop {
                if token.is_cancelled() {
                    break;
                }

                tracing::info!(worker = %task_name, restarts, "starting worker");
                let run = tokio::spawn(factory());
                let result = run.await;

                if token.is_cancelled() {
                    break;
                }
                match result {
                    Ok(()) => {
                        tracing::warn!(worker = %task_name, "worker exited unexpectedly, restarting")
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(worker = %task_name, "worker panicked, restarting")
                    }
                    Err(e) => {
                        tracing::error!(worker = %task_name, error = %e, "worker aborted, restarting")
                    }
                }
                restarts += 1;
                metrics::counter!("worker_restarts_total", "worker" => task_name.clone())
                    .increment(1);

                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(restart_delay) => {}
                }
            }
            tracing::info!(worker = %task_name, "worker supervisor stopped");
        });

        self.tasks.push((name, handle));
    }

    /// Cancels the token and waits for every task to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let results = futures_util::future::join_all(handles).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(worker = %name, error = %e, "worker supervisor ended abnormally");
            }
        }
        tracing::info!(workers = names.len(), "worker pool shut down");
    }
}
