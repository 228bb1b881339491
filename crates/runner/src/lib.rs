//! A concurrent worker runner with graceful shutdown.
//!
//! Each funnelcast binary hosts a handful of long-running loops (a consumer,
//! a scheduling loop, a health server). The runner executes them
//! concurrently, cancels everything when one fails or a shutdown signal
//! arrives, and then executes cleanup closers under a timeout.
//!
//! # Example
//!
//! ```no_run
//! use funnelcast_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("heartbeat", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("tick");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("releasing resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A worker process: receives a cancellation token, runs until cancelled.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// A cleanup function executed after every process has stopped.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

pub struct Runner {
    processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add a worker process under a name used in shutdown logging.
    ///
    /// Processes run concurrently. If any returns an error, every other
    /// process is cancelled and closers run.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Add an already-boxed worker process (for components that hand back
    /// their run closures, e.g. `Materializer::into_runner_processes`).
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push((name.into(), process));
        self
    }

    /// Add a cleanup function. Closers execute after all processes stop,
    /// regardless of outcome; every closer is attempted even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run every process until completion or shutdown, then run closers and
    /// exit the process with the appropriate code.
    pub async fn run(self) {
        let token = self.cancellation_token;
        let closer_timeout = self.closer_timeout;
        let closers = self.closers;
        let mut join_set = JoinSet::new();

        for (name, process) in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        spawn_signal_handlers(token.clone());

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "worker process completed");
                }
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, error = %format!("{err:#}"), "worker process failed");
                        first_error = Some(err);
                        token.cancel();
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "worker process panicked");
                    if !token.is_cancelled() {
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Give the remaining processes a chance to drain after cancellation.
        join_set.shutdown().await;

        if !closers.is_empty() {
            tracing::info!(timeout_secs = closer_timeout.as_secs(), "running closers");
            if tokio::time::timeout(closer_timeout, run_closers(closers))
                .await
                .is_err()
            {
                tracing::error!(timeout_secs = closer_timeout.as_secs(), "closers timed out");
            }
        }

        if let Some(err) = first_error {
            tracing::error!(error = %format!("{err:#}"), "exiting with error");
            std::process::exit(1);
        }
        tracing::info!("exiting normally");
        std::process::exit(0);
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install ctrl-c handler");
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM");
                    token.cancel();
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(async move { closer().await });
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok(Ok(())) => tracing::debug!("closer completed"),
            Ok(Err(err)) => tracing::error!(error = %format!("{err:#}"), "closer failed"),
            Err(err) => tracing::error!(error = %err, "closer panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn closers_all_execute() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut closers: Vec<Closer> = Vec::new();
        for _ in 0..3 {
            let calls = calls.clone();
            closers.push(Box::new(move || {
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }));
        }

        run_closers(closers).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn closers_continue_past_failures() {
        let calls = Arc::new(AtomicUsize::new(0));

        let failing: Closer = Box::new(|| Box::pin(async { Err(anyhow::anyhow!("boom")) }));
        let succeeding: Closer = {
            let calls = calls.clone();
            Box::new(move || {
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        run_closers(vec![failing, succeeding]).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn process_stops_on_cancellation() {
        let token = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        let process_token = token.clone();
        let process_stopped = stopped.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = process_token.cancelled() => {
                    process_stopped.fetch_add(1, Ordering::SeqCst);
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            }
        });

        token.cancel();
        handle.await.unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
