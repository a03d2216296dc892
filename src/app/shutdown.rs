//! # Termination signals that end [`App::run`](crate::App::run).
//!
//! | Platform | Signals                                  |
//! |----------|------------------------------------------|
//! | Unix     | `SIGINT`, `SIGTERM` (orchestrator stop), `SIGQUIT` |
//! | Other    | Ctrl-C                                   |
//!
//! The signal that fired is reported as the `reason` of the
//! `ShutdownRequested` event.

/// Signal that asked the process to terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// `SIGINT` or Ctrl-C.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGQUIT`.
    Quit,
}

impl ShutdownSignal {
    /// Conventional signal name, e.g. `SIGTERM`.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        }
    }
}

/// Waits for the first termination signal.
///
/// Listeners are registered per call. Fails only if one cannot be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let fired = tokio::select! {
        _ = interrupt.recv() => ShutdownSignal::Interrupt,
        _ = terminate.recv() => ShutdownSignal::Terminate,
        _ = quit.recv() => ShutdownSignal::Quit,
    };
    Ok(fired)
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_use_signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.as_label(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.as_label(), "SIGTERM");
        assert_eq!(ShutdownSignal::Quit.as_label(), "SIGQUIT");
    }
}
