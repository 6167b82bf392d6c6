use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::store::SessionStore;

/// Keeps the access token fresh.
///
/// Every `interval` the loop checks whether the session expires within
/// `margin` and refreshes it if so. Aborting the handle stops the loop.
pub fn spawn_refresh_loop(
    store: Arc<SessionStore>,
    interval: Duration,
    margin: Duration,
) -> JoinHandle<()> {
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::seconds(60));

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let due = store
                .session()
                .is_some_and(|session| session.expires_within(margin));
            if !due {
                continue;
            }

            debug!("Access token close to expiry, refreshing");
            if let Err(e) = store.refresh().await {
                warn!("Token refresh failed: {}", e);
            }
        }
    })
}
