//! Token-loss watchdog.
//!
//! Runs only on the generator node. The ticker itself carries no state: it
//! posts [`Event::WatchdogTick`] into the engine's channel on a period equal
//! to the circulation bound, and the engine decides whether the token has
//! actually gone missing. That keeps the lost-token decision inside the
//! single owner of `last_token_seen`.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::engine::Event;

/// Conservative upper bound on one full token circulation, also used as the
/// tick period: six hold times plus a three-second margin.
pub fn circulation_bound(hold: Duration) -> Duration {
    hold * 6 + Duration::from_secs(3)
}

/// Tick until shutdown or until the engine goes away.
pub async fn run(hold: Duration, events: mpsc::Sender<Event>, mut shutdown: watch::Receiver<bool>) {
    let period = circulation_bound(hold);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and carries no information.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if events.send(Event::WatchdogTick).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("watchdog stopped");
}
