use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Token cancelled when the process receives SIGTERM or SIGINT.
///
/// The sweep loop and the inbound acceptor watch it; once it fires the
/// daemon stops sweeping and drains every live channel before exit.
/// Handler installation happens before this returns, so a failure surfaces
/// at startup rather than on the first signal.
pub fn shutdown_token() -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "Shutdown requested, draining the fleet");
        trigger.cancel();
    });

    Ok(token)
}
