//! Background task loops.
//!
//! Two timed tasks surround the analytical core: capture (markets in,
//! suggestions out, optional auto-placed bets) and settlement (pending bets
//! against closed markets). Both observe a shutdown flag at every scheduling
//! boundary and exit cleanly; an upstream failure skips the cycle and the
//! next tick retries.

use crate::cloud::CloudMirror;
use crate::config::Config;
use crate::notify::WebhookNotifier;
use crate::scrapers::capture::OddsCapture;
use crate::settle::BetSettler;
use crate::store::TennisStore;
use crate::suggest::BetSuggester;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

/// Markets whose start time is this far past get purged each cycle.
const STALE_UPCOMING_HOURS: i64 = 12;

/// Control handles owned by the interactive task.
pub struct EngineControl {
    pub shutdown: watch::Sender<bool>,
    pub auto_mode: watch::Sender<bool>,
}

impl EngineControl {
    pub fn new(auto_mode: bool) -> (Self, watch::Receiver<bool>, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (auto_tx, auto_rx) = watch::channel(auto_mode);
        (
            Self {
                shutdown: shutdown_tx,
                auto_mode: auto_tx,
            },
            shutdown_rx,
            auto_rx,
        )
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn set_auto_mode(&self, enabled: bool) {
        let _ = self.auto_mode.send(enabled);
    }
}

/// Capture task: every interval, pull markets, run the suggester, and in
/// auto mode place the suggested bets.
pub async fn capture_polling(
    capture: Arc<OddsCapture>,
    store: Arc<TennisStore>,
    config: Config,
    notifier: Option<Arc<WebhookNotifier>>,
    cloud: Option<Arc<CloudMirror>>,
    auto_mode: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(config.capture_interval_minutes * 60));
    info!(
        "capture task started ({}m interval)",
        config.capture_interval_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("capture task: shutdown observed, exiting");
                    return Ok(());
                }
                continue;
            }
        }

        info!("Capturing...");
        let summary = match capture.capture_cycle().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    "Upstream unavailable, retrying in {}m: {}",
                    config.capture_interval_minutes, e
                );
                continue;
            }
        };

        let suggester = BetSuggester::new(&store, &config);
        let candidates = match suggester.suggest() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("suggestion pass failed: {}", e);
                continue;
            }
        };
        info!(
            "Analyzed {} markets, {} value bets",
            summary.captured,
            candidates.len()
        );

        if *auto_mode.borrow() && !candidates.is_empty() {
            match suggester.auto_add_bets(&candidates) {
                Ok(added) => {
                    for bet in &added {
                        if let Some(notifier) = &notifier {
                            notifier.bet_placed(bet).await;
                        }
                        if let Some(cloud) = &cloud {
                            cloud.sync_bet(bet).await;
                        }
                    }
                }
                Err(e) => warn!("auto bet placement failed: {}", e),
            }
        }

        if let Err(e) = store.delete_stale_upcoming(STALE_UPCOMING_HOURS) {
            warn!("stale market purge failed: {}", e);
        }
    }
}

/// Settlement task: every interval, check pending bets against market state.
pub async fn settlement_polling(
    settler: Arc<BetSettler>,
    config: Config,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(config.capture_interval_minutes * 60));
    info!(
        "settlement task started ({}m interval)",
        config.capture_interval_minutes
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("settlement task: shutdown observed, exiting");
                    return Ok(());
                }
                continue;
            }
        }

        match settler.settle_pending().await {
            Ok(summary) => {
                if summary.checked > 0 {
                    info!(
                        "settlement: {} checked, {} settled, {} live, {} open",
                        summary.checked, summary.settled, summary.went_live, summary.still_open
                    );
                }
            }
            Err(e) => warn!(
                "Upstream unavailable, retrying in {}m: {}",
                config.capture_interval_minutes, e
            ),
        }
    }
}

/// Daily housekeeping: SQLite maintenance.
pub async fn housekeeping_polling(
    store: Arc<TennisStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(86_400));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
        }
        if let Err(e) = store.optimize() {
            warn!("database maintenance failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags_propagate() {
        let (control, shutdown_rx, auto_rx) = EngineControl::new(false);
        assert!(!*shutdown_rx.borrow());
        assert!(!*auto_rx.borrow());

        control.set_auto_mode(true);
        assert!(*auto_rx.borrow());

        control.stop();
        assert!(*shutdown_rx.borrow());
    }
}
