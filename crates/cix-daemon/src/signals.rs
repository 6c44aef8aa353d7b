//! Termination signals.
//!
//! Any of them stops the read loop; queued work is then drained and dirty
//! zones saved exactly as for a `shutdown` request.

use tracing::{info, warn};

/// Signal that stopped the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP: the controlling editor went away
    Hangup,
}

/// Resolves once the first stop signal arrives.
pub async fn wait_for_shutdown() {
    let signal = next_stop_signal().await;
    info!(signal = ?signal, "Stop signal received");
}

/// The first stop signal delivered to the process.
///
/// A signal whose handler cannot be installed is logged and never fires.
#[cfg(unix)]
pub async fn next_stop_signal() -> StopSignal {
    use tokio::signal::unix::SignalKind;

    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => StopSignal::Interrupt,
        _ = delivered(SignalKind::terminate(), "SIGTERM") => StopSignal::Terminate,
        _ = delivered(SignalKind::hangup(), "SIGHUP") => StopSignal::Hangup,
    }
}

#[cfg(not(unix))]
pub async fn next_stop_signal() -> StopSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    StopSignal::Interrupt
}

#[cfg(unix)]
async fn delivered(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(signal = name, error = %e, "Cannot listen for signal");
            std::future::pending::<()>().await;
        }
    }
}
