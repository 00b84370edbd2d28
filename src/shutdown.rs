//! Process shutdown signals: Ctrl-C everywhere, SIGTERM on Unix.

use tracing::info;

/// Installed shutdown handlers.
///
/// Once installed, SIGTERM no longer terminates the process; the owner is
/// expected to cancel the responder and let it flush.
pub struct ShutdownSignal {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            sigterm: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the first shutdown signal.
    pub async fn recv(self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = self.sigterm;
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Received SIGINT (Ctrl+C)");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        Ok(())
    }
}
