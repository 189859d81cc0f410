use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `cancelation` on Ctrl-C. Returns without cancelling if the token was already
/// cancelled by someone else, e.g. the tracker after its input closed.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal {e:?}");
                return;
            }
            info!("Shutdown requested");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
