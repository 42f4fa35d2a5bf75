//! Termination signals mapped onto the harness cancellation token.

use std::fmt;
use std::future::Future;
use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    #[cfg(unix)]
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            #[cfg(unix)]
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Spawn a task that cancels `cancel` on Ctrl+C or SIGTERM.
///
/// The task also ends by itself once `cancel` fires for any other reason.
#[must_use = "dropping the handle detaches the signal task"]
pub fn cancel_on_shutdown(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(cancel_when(next_signal(), cancel))
}

async fn cancel_when<F>(trigger: F, cancel: CancellationToken)
where
    F: Future<Output = io::Result<ShutdownSignal>>,
{
    tokio::select! {
        () = cancel.cancelled() => {}
        received = trigger => match received {
            Ok(signal) => {
                tracing::info!(%signal, "shutdown signal received; stopping listeners");
                cancel.cancel();
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for shutdown signals");
            }
        },
    }
}

#[cfg(unix)]
async fn next_signal() -> io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| ShutdownSignal::Interrupt),
        _ = terminate.recv() => Ok(ShutdownSignal::Terminate),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await.map(|()| ShutdownSignal::Interrupt)
}
