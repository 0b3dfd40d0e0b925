//! Shared start/stop bookkeeping for nodes and servers.
//!
//! State moves `Stopped -> Starting -> Running -> Stopping -> Stopped`. Workers are
//! spawned through [`Lifecycle::spawn`] and receive a [`ShutdownSignal`]; `stop`
//! raises the signal, waits for the workers up to a deadline and aborts the rest.

use log::{debug, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Resolves once the owning lifecycle is stopping.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for shutdown. A dropped sender counts as shutdown.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}

pub struct Lifecycle {
    name: String,
    state: watch::Sender<NodeState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(NodeState::Stopped);
        Self {
            name: name.into(),
            state,
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    /// Moves `Stopped -> Starting` and hands out the signal for the new run.
    ///
    /// Returns `None`, and logs, when the lifecycle is not stopped.
    pub fn begin_start(&self) -> Option<ShutdownSignal> {
        let started = self.state.send_if_modified(|state| {
            if *state == NodeState::Stopped {
                *state = NodeState::Starting;
                true
            } else {
                false
            }
        });
        if !started {
            warn!("{}: start ignored, node is {:?}", self.name, self.state());
            return None;
        }
        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);
        Some(ShutdownSignal { rx })
    }

    /// Completes a start begun with [`begin_start`](Self::begin_start).
    pub fn mark_running(&self) {
        self.state.send_replace(NodeState::Running);
        debug!("{}: running", self.name);
    }

    /// Rolls back a start that failed half way: aborts whatever was spawned.
    pub fn abort_start(&self) {
        self.shutdown.lock().take();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.state.send_replace(NodeState::Stopped);
    }

    /// Spawns a worker owned by this lifecycle.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.lock().push(handle);
    }

    /// Signals every worker and waits for them.
    ///
    /// Workers still running after `timeout` are aborted. Calling `stop` on a
    /// stopped or stopping lifecycle does nothing.
    pub async fn stop(&self, timeout: Option<Duration>) {
        if self.begin_stop() {
            self.stop_workers(timeout).await;
            self.finish_stop();
        }
    }

    /// Moves `Starting | Running -> Stopping` and raises the shutdown signal.
    ///
    /// Returns `false` when there is nothing to stop. Owners that stop other
    /// components alongside their own workers call this, then
    /// [`stop_workers`](Self::stop_workers) and [`finish_stop`](Self::finish_stop).
    pub fn begin_stop(&self) -> bool {
        let stopping = self.state.send_if_modified(|state| match state {
            NodeState::Starting | NodeState::Running => {
                *state = NodeState::Stopping;
                true
            }
            _ => false,
        });
        if stopping {
            debug!("{}: stopping", self.name);
            if let Some(tx) = self.shutdown.lock().take() {
                let _ = tx.send(true);
            }
        }
        stopping
    }

    /// Waits for the spawned workers until the deadline, then aborts the rest.
    pub async fn stop_workers(&self, timeout: Option<Duration>) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        let deadline = timeout.map(|t| Instant::now() + t);
        for mut handle in handles {
            let finished = match deadline {
                Some(deadline) => timeout_at(deadline, &mut handle).await.is_ok(),
                None => {
                    let _ = (&mut handle).await;
                    true
                }
            };
            if !finished {
                warn!("{}: worker did not stop in time, aborting", self.name);
                handle.abort();
            }
        }
    }

    pub fn finish_stop(&self) {
        self.state.send_replace(NodeState::Stopped);
        debug!("{}: stopped", self.name);
    }

    /// Waits until the lifecycle is stopped, or until `limit` elapses.
    ///
    /// Returns `true` when the lifecycle is stopped.
    pub async fn join(&self, limit: Option<Duration>) -> bool {
        let mut rx = self.state.subscribe();
        let stopped = async move {
            let _ = rx.wait_for(|state| *state == NodeState::Stopped).await;
        };
        match limit {
            Some(limit) => timeout(limit, stopped).await.is_ok(),
            None => {
                stopped.await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.stop(Some(Duration::from_millis(10))).await;
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_is_ignored() {
        let lifecycle = Lifecycle::new("test");
        assert!(lifecycle.begin_start().is_some());
        assert!(lifecycle.begin_start().is_none());
        lifecycle.mark_running();
        assert!(lifecycle.begin_start().is_none());
        assert!(lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_workers_observe_shutdown() {
        let lifecycle = Lifecycle::new("test");
        let mut signal = lifecycle.begin_start().unwrap();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        lifecycle.spawn(async move {
            signal.wait().await;
            flag.store(true, Ordering::SeqCst);
        });
        lifecycle.mark_running();

        lifecycle.stop(Some(Duration::from_secs(1))).await;
        assert!(exited.load(Ordering::SeqCst));
        assert!(!lifecycle.is_running());
        assert!(lifecycle.join(Some(Duration::from_millis(10))).await);

        // Re-entrant stop stays a no-op.
        lifecycle.stop(Some(Duration::from_secs(1))).await;
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_unresponsive_worker_is_aborted() {
        let lifecycle = Lifecycle::new("test");
        let _signal = lifecycle.begin_start().unwrap();
        lifecycle.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        lifecycle.mark_running();

        let started = Instant::now();
        lifecycle.stop(Some(Duration::from_millis(50))).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(lifecycle.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_join_times_out_while_running() {
        let lifecycle = Lifecycle::new("test");
        let _signal = lifecycle.begin_start().unwrap();
        lifecycle.mark_running();
        assert!(!lifecycle.join(Some(Duration::from_millis(20))).await);
        lifecycle.stop(None).await;
        assert!(lifecycle.join(None).await);
    }
}
