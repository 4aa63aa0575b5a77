//! Tokio runtime for the `backpocket` binary plus one process-wide
//! cancellation token.
use anyhow::{Context, Result};
use backpocket_config::RuntimeConfig;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct BackpocketHandle {
    inner: Handle,
    cancel: CancellationToken,
}

pub struct BackpocketRuntime {
    runtime: Runtime,
    cancel: CancellationToken,
    grace: Duration,
}

impl BackpocketRuntime {
    /// Multi-threaded runtime named and sized from the `runtime` config section.
    ///
    /// ```
    /// use backpocket_config::RuntimeConfig;
    /// use backpocket_runtime::BackpocketRuntime;
    ///
    /// let cfg = RuntimeConfig { worker_threads: Some(1), ..RuntimeConfig::default() };
    /// let runtime = BackpocketRuntime::from_config(&cfg).unwrap();
    /// assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
    /// runtime.shutdown();
    /// ```
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let mut runtime = Self::build(&cfg.thread_name, cfg.worker_threads)?;
        runtime.grace = Duration::from_secs(cfg.shutdown_grace_secs);
        Ok(runtime)
    }

    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);
        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }
        let runtime = builder
            .build()
            .with_context(|| format!("building tokio runtime {thread_name}"))?;
        Ok(Self {
            runtime,
            cancel: CancellationToken::new(),
            grace: Duration::from_secs(5),
        })
    }

    pub fn handle(&self) -> BackpocketHandle {
        BackpocketHandle {
            inner: self.runtime.handle().clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Cancel the shared token, then give in-flight tasks the configured grace.
    pub fn shutdown(self) {
        self.cancel.cancel();
        self.runtime.shutdown_timeout(self.grace);
    }
}

impl BackpocketHandle {
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// Token cancelled on shutdown or Ctrl-C.
    ///
    /// ```
    /// use backpocket_runtime::BackpocketRuntime;
    ///
    /// let runtime = BackpocketRuntime::build("cancel-example", Some(1)).unwrap();
    /// let token = runtime.handle().cancellation();
    /// assert!(!token.is_cancelled());
    /// runtime.shutdown();
    /// assert!(token.is_cancelled());
    /// ```
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the shared token on the first Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        self.inner.spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    match res {
                        Ok(()) => tracing::info!("runtime.ctrl_c"),
                        Err(err) => tracing::warn!(error = %err, "runtime.ctrl_c.unavailable"),
                    }
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_tasks_observe_cancellation() {
        let runtime = BackpocketRuntime::build("rt-test", Some(1)).unwrap();
        let handle = runtime.handle();
        let token = handle.cancellation();
        let waiter = handle.spawn(async move {
            token.cancelled().await;
            "stopped"
        });
        handle.cancellation().cancel();
        assert_eq!(runtime.block_on(waiter).unwrap(), "stopped");
        runtime.shutdown();
    }

    #[test]
    fn ctrl_c_watcher_exits_when_cancelled_elsewhere() {
        let runtime = BackpocketRuntime::build("rt-test", Some(1)).unwrap();
        let handle = runtime.handle();
        let watcher = handle.cancel_on_ctrl_c();
        handle.cancellation().cancel();
        runtime.block_on(watcher).unwrap();
        runtime.shutdown();
    }
}
