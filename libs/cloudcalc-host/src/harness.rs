//! Listener fan-out with fail-fast structured cancellation.
//!
//! Every listener runs on its own task of one [`JoinSet`] and observes the
//! same [`CancellationToken`]. The first listener to fail (error, panic, or
//! returning before shutdown was requested) cancels the token, the harness
//! joins all remaining tasks, and [`Harness::run`] returns that first error.

use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt as _;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Unstarted,
    Binding,
    Serving(SocketAddr),
    /// Active without a bound address, e.g. an outbound probe loop.
    Running,
    Stopped,
    Failed(String),
}

impl ListenerState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => f.write_str("unstarted"),
            Self::Binding => f.write_str("binding"),
            Self::Serving(addr) => write!(f, "serving on {addr}"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Observable [`ListenerState`] owned by a listener.
///
/// The listener drives transitions; anyone may [`subscribe`](Self::subscribe)
/// or wait for the bound address.
#[derive(Debug)]
pub struct ListenerStatus {
    tx: watch::Sender<ListenerState>,
}

impl Default for ListenerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerStatus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ListenerState::Unstarted);
        Self { tx }
    }

    pub fn set(&self, state: ListenerState) {
        self.tx.send_replace(state);
    }

    #[must_use]
    pub fn current(&self) -> ListenerState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.tx.subscribe()
    }

    /// Wait until the listener is serving and return its bound address.
    ///
    /// # Errors
    /// Returns the terminal state if the listener stopped or failed first.
    pub async fn wait_serving(&self) -> Result<SocketAddr, ListenerState> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, ListenerState::Serving(_)) || s.is_terminal())
            .await
            .map_or(ListenerState::Stopped, |s| s.clone());
        match state {
            ListenerState::Serving(addr) => Ok(addr),
            other => Err(other),
        }
    }
}

/// A long-running unit of the process (RPC server, diagnostics pages, probe loop).
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn status(&self) -> &ListenerStatus;

    /// Run until `cancel` fires. Returning early, with or without an error,
    /// is treated as a failure by the [`Harness`]. A listener that finishes
    /// its work cancels the token itself before returning `Ok(())`.
    async fn serve(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Runs a set of listeners under one cancellation token.
pub struct Harness {
    cancel: CancellationToken,
    listeners: Vec<Arc<dyn Listener>>,
}

impl Harness {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run all listeners until shutdown or the first failure.
    ///
    /// # Errors
    /// Returns the first listener failure after every listener has stopped.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();
        for listener in self.listeners {
            let cancel = self.cancel.clone();
            tracing::debug!(listener = listener.name(), "spawning listener");
            tasks.spawn(supervise(listener, cancel));
        }

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(anyhow!("listener task failed to join: {e}")));
            let Err(err) = result else {
                continue;
            };
            if first_error.is_none() {
                tracing::error!(error = %format!("{err:#}"), "listener failed; shutting down");
                self.cancel.cancel();
                first_error = Some(err);
            } else {
                tracing::warn!(error = %format!("{err:#}"), "additional listener failure during shutdown");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::info!("all listeners stopped");
                Ok(())
            }
        }
    }
}

async fn supervise(listener: Arc<dyn Listener>, cancel: CancellationToken) -> anyhow::Result<()> {
    let name = listener.name();
    let outcome = AssertUnwindSafe(Arc::clone(&listener).serve(cancel.clone()))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(())) if cancel.is_cancelled() => {
            tracing::info!(listener = name, "listener stopped");
            return Ok(());
        }
        Ok(Ok(())) => Err(anyhow!("listener `{name}` exited before shutdown was requested")),
        Ok(Err(e)) => Err(e.context(format!("listener `{name}` failed"))),
        Err(_) => Err(anyhow!("listener `{name}` panicked")),
    };

    if let Err(e) = &result
        && !listener.status().current().is_terminal()
    {
        listener.status().set(ListenerState::Failed(format!("{e:#}")));
    }
    result
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    enum Behaviour {
        RunUntilCancelled,
        FailAfter(Duration),
        ReturnEarly,
        Panic,
    }

    struct TestListener {
        name: &'static str,
        behaviour: Behaviour,
        status: ListenerStatus,
        saw_cancel: AtomicBool,
    }

    impl TestListener {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                status: ListenerStatus::new(),
                saw_cancel: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Listener for TestListener {
        fn name(&self) -> &'static str {
            self.name
        }

        fn status(&self) -> &ListenerStatus {
            &self.status
        }

        async fn serve(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
            self.status.set(ListenerState::Serving("127.0.0.1:1".parse()?));
            match self.behaviour {
                Behaviour::RunUntilCancelled => {
                    cancel.cancelled().await;
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    self.status.set(ListenerState::Stopped);
                    Ok(())
                }
                Behaviour::FailAfter(d) => {
                    tokio::time::sleep(d).await;
                    anyhow::bail!("address already in use")
                }
                Behaviour::ReturnEarly => Ok(()),
                Behaviour::Panic => panic!("listener blew up"),
            }
        }
    }

    #[tokio::test]
    async fn test_clean_cancellation_is_ok() {
        let cancel = CancellationToken::new();
        let a = TestListener::new("a", Behaviour::RunUntilCancelled);
        let b = TestListener::new("b", Behaviour::RunUntilCancelled);
        let harness = Harness::new(cancel.clone()).with(a.clone()).with(b.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        harness.run().await.unwrap();
        assert!(a.saw_cancel.load(Ordering::SeqCst));
        assert!(b.saw_cancel.load(Ordering::SeqCst));
        assert_eq!(a.status.current(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let cancel = CancellationToken::new();
        let healthy = TestListener::new("diagnostics", Behaviour::RunUntilCancelled);
        let failing = TestListener::new("grpc", Behaviour::FailAfter(Duration::from_millis(10)));
        let harness = Harness::new(cancel.clone())
            .with(healthy.clone())
            .with(failing.clone());

        let err = tokio::time::timeout(Duration::from_secs(2), harness.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(format!("{err:#}").contains("listener `grpc` failed"));
        assert!(format!("{err:#}").contains("address already in use"));
        assert!(cancel.is_cancelled());
        assert!(healthy.saw_cancel.load(Ordering::SeqCst));
        assert!(matches!(failing.status.current(), ListenerState::Failed(_)));
    }

    #[tokio::test]
    async fn test_early_return_is_a_failure() {
        let cancel = CancellationToken::new();
        let sibling = TestListener::new("diagnostics", Behaviour::RunUntilCancelled);
        let early = TestListener::new("grpc", Behaviour::ReturnEarly);

        let err = Harness::new(cancel)
            .with(sibling)
            .with(early)
            .run()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exited before shutdown"));
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_reported() {
        let cancel = CancellationToken::new();
        let sibling = TestListener::new("diagnostics", Behaviour::RunUntilCancelled);
        let panicking = TestListener::new("probe", Behaviour::Panic);

        let err = Harness::new(cancel.clone())
            .with(sibling.clone())
            .with(panicking)
            .run()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("listener `probe` panicked"));
        assert!(sibling.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_harness_returns_immediately() {
        Harness::new(CancellationToken::new()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_serving_reports_terminal_state() {
        let status = ListenerStatus::new();
        status.set(ListenerState::Failed("bind: address in use".to_owned()));
        assert_eq!(
            status.wait_serving().await,
            Err(ListenerState::Failed("bind: address in use".to_owned()))
        );

        let status = ListenerStatus::new();
        let addr: SocketAddr = "127.0.0.1:9998".parse().unwrap();
        status.set(ListenerState::Serving(addr));
        assert_eq!(status.wait_serving().await, Ok(addr));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ListenerState::Unstarted.to_string(), "unstarted");
        assert_eq!(
            ListenerState::Serving("0.0.0.0:9998".parse().unwrap()).to_string(),
            "serving on 0.0.0.0:9998"
        );
    }
}
