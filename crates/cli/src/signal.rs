use anyhow::Result;
use tokio::signal;
use tracing::info;

/// Resolve on Ctrl+C, or SIGTERM on unix
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let mut sigterm = unix_signal(SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Ctrl+C received");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl+C received");
    }

    Ok(())
}
