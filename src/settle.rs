//! Bet settlement.
//!
//! Walks pending bets, relocates each bet's market on the exchange by player
//! names, and resolves Win/Loss/Void once the market closes. P&L applies the
//! exchange commission on winnings. Settlement is exactly-once: the store
//! update is a no-op for an already-settled bet.

use crate::cloud::CloudMirror;
use crate::config::Config;
use crate::models::{Bet, BetResult};
use crate::notify::WebhookNotifier;
use crate::resolver::{last_name, same_last_name};
use crate::scrapers::exchange::{ExchangeApi, MarketCatalogueEntry};
use crate::store::TennisStore;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Serialize)]
pub struct SettlementSummary {
    pub checked: usize,
    pub settled: usize,
    pub went_live: usize,
    pub still_open: usize,
    pub not_found: usize,
}

/// Deterministic P&L for a settled bet.
pub fn settlement_pl(result: BetResult, stake: f64, odds: f64, commission: f64) -> f64 {
    match result {
        BetResult::Win => stake * (odds - 1.0) * (1.0 - commission),
        BetResult::Loss => -stake,
        BetResult::Void => 0.0,
    }
}

/// Win or Loss by last-name comparison between the bet's selection and the
/// market's winning runner.
pub fn determine_result(selection: &str, winner_name: &str) -> BetResult {
    if same_last_name(selection, winner_name) {
        BetResult::Win
    } else {
        BetResult::Loss
    }
}

/// Split "Alpha One vs Beta Two" into the two sides.
fn split_description(description: &str) -> Option<(String, String)> {
    let (p1, p2) = description.split_once(" vs ")?;
    let (p1, p2) = (p1.trim(), p2.trim());
    if p1.is_empty() || p2.is_empty() {
        return None;
    }
    Some((p1.to_string(), p2.to_string()))
}

/// Pick the catalogue entry whose two runners cover both players.
fn find_market<'a>(
    markets: &'a [MarketCatalogueEntry],
    p1: &str,
    p2: &str,
) -> Option<&'a MarketCatalogueEntry> {
    let p1_last = last_name(p1);
    let p2_last = last_name(p2);
    markets.iter().find(|market| {
        if market.runners.len() != 2 {
            return false;
        }
        let names: Vec<String> = market
            .runners
            .iter()
            .map(|r| last_name(&r.runner_name))
            .collect();
        names.contains(&p1_last) && names.contains(&p2_last)
    })
}

pub struct BetSettler {
    store: Arc<TennisStore>,
    exchange: Arc<dyn ExchangeApi>,
    notifier: Option<Arc<WebhookNotifier>>,
    cloud: Option<Arc<CloudMirror>>,
    commission_rate: f64,
}

impl BetSettler {
    pub fn new(
        store: Arc<TennisStore>,
        exchange: Arc<dyn ExchangeApi>,
        notifier: Option<Arc<WebhookNotifier>>,
        cloud: Option<Arc<CloudMirror>>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            exchange,
            notifier,
            cloud,
            commission_rate: config.commission_rate,
        }
    }

    /// One settlement sweep over all pending bets. Errors on a single bet
    /// leave it pending and move on.
    pub async fn settle_pending(&self) -> Result<SettlementSummary> {
        let pending = self.store.pending_bets()?;
        let mut summary = SettlementSummary {
            checked: pending.len(),
            ..Default::default()
        };

        for bet in pending {
            match self.check_bet(&bet).await {
                Ok(outcome) => match outcome {
                    BetOutcome::Settled => summary.settled += 1,
                    BetOutcome::WentLive => summary.went_live += 1,
                    BetOutcome::StillOpen => summary.still_open += 1,
                    BetOutcome::MarketNotFound => summary.not_found += 1,
                },
                Err(e) => {
                    // This bet stays pending; the next sweep retries it.
                    warn!("settlement check failed for bet {:?}: {}", bet.id, e);
                    summary.still_open += 1;
                }
            }
        }

        if summary.settled > 0 {
            info!("settlement sweep: {} of {} bets settled", summary.settled, summary.checked);
        }
        Ok(summary)
    }

    async fn check_bet(&self, bet: &Bet) -> Result<BetOutcome> {
        let Some(bet_id) = bet.id else {
            return Ok(BetOutcome::MarketNotFound);
        };
        let Some((p1, p2)) = split_description(&bet.match_description) else {
            debug!("bet {}: unparseable description '{}'", bet_id, bet.match_description);
            return Ok(BetOutcome::MarketNotFound);
        };

        let markets = self.exchange.search_markets(&last_name(&p1)).await?;
        let Some(market) = find_market(&markets, &p1, &p2) else {
            debug!("bet {}: market not found for {} vs {}", bet_id, p1, p2);
            return Ok(BetOutcome::MarketNotFound);
        };

        let books = self
            .exchange
            .list_market_books(std::slice::from_ref(&market.market_id))
            .await?;
        let Some(book) = books.first() else {
            return Ok(BetOutcome::MarketNotFound);
        };

        if book.inplay && !bet.is_live && !book.is_closed() {
            if self.store.mark_bet_live(bet_id)? {
                info!("bet {} is live: {}", bet_id, bet.match_description);
                if let Some(notifier) = &self.notifier {
                    notifier.bet_live(bet).await;
                }
                if let Some(cloud) = &self.cloud {
                    cloud.mark_bet_live(bet_id).await;
                }
                return Ok(BetOutcome::WentLive);
            }
        }

        if !book.is_closed() {
            return Ok(BetOutcome::StillOpen);
        }

        // Closed market: a winning runner settles the bet; a closed market
        // with no winner (walkover, void) refunds it.
        let winner_name = book.winner_selection_id().and_then(|selection_id| {
            market
                .runners
                .iter()
                .find(|r| r.selection_id == selection_id)
                .map(|r| r.runner_name.clone())
        });

        let (result, profit_loss) = match winner_name {
            Some(winner) => {
                let result = determine_result(&bet.selection, &winner);
                let pl = settlement_pl(result, bet.stake, bet.odds, self.commission_rate);
                debug!("bet {}: winner '{}' -> {}", bet_id, winner, result.as_str());
                (result, pl)
            }
            None => (BetResult::Void, 0.0),
        };

        let newly_settled = self.store.settle_bet(bet_id, result, profit_loss)?;
        if newly_settled {
            if let Some(notifier) = &self.notifier {
                notifier.bet_settled(bet, result, profit_loss).await;
            }
            if let Some(cloud) = &self.cloud {
                cloud
                    .mark_bet_finished(bet_id, result.as_str(), profit_loss)
                    .await;
            }
        }
        Ok(BetOutcome::Settled)
    }
}

enum BetOutcome {
    Settled,
    WentLive,
    StillOpen,
    MarketNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::exchange::{MarketBook, RunnerBook, RunnerCatalog};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[test]
    fn win_pl_applies_commission() {
        let pl = settlement_pl(BetResult::Win, 2.0, 1.80, 0.05);
        assert!((pl - 1.52).abs() < 1e-9);
    }

    #[test]
    fn loss_pl_is_full_stake() {
        assert_eq!(settlement_pl(BetResult::Loss, 2.0, 1.80, 0.05), -2.0);
    }

    #[test]
    fn void_pl_is_zero() {
        assert_eq!(settlement_pl(BetResult::Void, 2.0, 1.80, 0.05), 0.0);
    }

    #[test]
    fn result_by_last_name() {
        assert_eq!(
            determine_result("Novak Djokovic", "Djokovic N."),
            BetResult::Win
        );
        assert_eq!(
            determine_result("Novak Djokovic", "Carlos Alcaraz"),
            BetResult::Loss
        );
    }

    #[test]
    fn description_splitting() {
        assert_eq!(
            split_description("Alpha One vs Beta Two"),
            Some(("Alpha One".into(), "Beta Two".into()))
        );
        assert_eq!(split_description("malformed"), None);
    }

    struct ScriptedExchange {
        market: MarketCatalogueEntry,
        book: Mutex<MarketBook>,
    }

    #[async_trait]
    impl ExchangeApi for ScriptedExchange {
        async fn login(&self) -> Result<()> {
            Ok(())
        }

        async fn list_match_odds_markets(
            &self,
            _hours_ahead: u32,
        ) -> Result<Vec<MarketCatalogueEntry>> {
            Ok(vec![self.market.clone()])
        }

        async fn list_market_books(&self, _market_ids: &[String]) -> Result<Vec<MarketBook>> {
            Ok(vec![self.book.lock().clone()])
        }

        async fn search_markets(&self, _text_query: &str) -> Result<Vec<MarketCatalogueEntry>> {
            Ok(vec![self.market.clone()])
        }
    }

    fn closed_market(winner_selection: i64) -> (MarketCatalogueEntry, MarketBook) {
        let market = MarketCatalogueEntry {
            market_id: "1.77".into(),
            market_name: Some("Match Odds".into()),
            market_start_time: None,
            event: None,
            competition: None,
            runners: vec![
                RunnerCatalog {
                    selection_id: 11,
                    runner_name: "Novak Djokovic".into(),
                    sort_priority: 1,
                },
                RunnerCatalog {
                    selection_id: 22,
                    runner_name: "Carlos Alcaraz".into(),
                    sort_priority: 2,
                },
            ],
        };
        let book = MarketBook {
            market_id: "1.77".into(),
            status: Some("CLOSED".into()),
            inplay: false,
            total_matched: None,
            runners: vec![
                RunnerBook {
                    selection_id: 11,
                    status: Some(if winner_selection == 11 { "WINNER" } else { "LOSER" }.into()),
                    total_matched: None,
                    ex: None,
                },
                RunnerBook {
                    selection_id: 22,
                    status: Some(if winner_selection == 22 { "WINNER" } else { "LOSER" }.into()),
                    total_matched: None,
                    ex: None,
                },
            ],
        };
        (market, book)
    }

    fn pending_bet(store: &TennisStore) -> i64 {
        let bet = Bet::new(
            "2026-02-01",
            "Australian Open",
            "Novak Djokovic vs Carlos Alcaraz",
            "Novak Djokovic",
            1.80,
            2.0,
        );
        store.add_bet(&bet).unwrap()
    }

    fn settler(exchange: Arc<dyn ExchangeApi>, store: Arc<TennisStore>) -> BetSettler {
        BetSettler::new(store, exchange, None, None, &Config::default())
    }

    #[tokio::test]
    async fn settles_win_with_commission() {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        let bet_id = pending_bet(&store);

        let (market, book) = closed_market(11);
        let exchange = Arc::new(ScriptedExchange {
            market,
            book: Mutex::new(book),
        });

        let summary = settler(exchange, store.clone()).settle_pending().await.unwrap();
        assert_eq!(summary.settled, 1);

        let bet = store.get_bet(bet_id).unwrap().unwrap();
        assert_eq!(bet.result, Some(BetResult::Win));
        assert!((bet.profit_loss.unwrap() - 1.52).abs() < 1e-9);
    }

    #[tokio::test]
    async fn settles_loss_at_full_stake() {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        let bet_id = pending_bet(&store);

        let (market, book) = closed_market(22);
        let exchange = Arc::new(ScriptedExchange {
            market,
            book: Mutex::new(book),
        });

        settler(exchange, store.clone()).settle_pending().await.unwrap();
        let bet = store.get_bet(bet_id).unwrap().unwrap();
        assert_eq!(bet.result, Some(BetResult::Loss));
        assert_eq!(bet.profit_loss, Some(-2.0));
    }

    #[tokio::test]
    async fn voids_closed_market_without_winner() {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        let bet_id = pending_bet(&store);

        let (market, mut book) = closed_market(11);
        for runner in &mut book.runners {
            runner.status = Some("REMOVED".into());
        }
        let exchange = Arc::new(ScriptedExchange {
            market,
            book: Mutex::new(book),
        });

        settler(exchange, store.clone()).settle_pending().await.unwrap();
        let bet = store.get_bet(bet_id).unwrap().unwrap();
        assert_eq!(bet.result, Some(BetResult::Void));
        assert_eq!(bet.profit_loss, Some(0.0));
    }

    #[tokio::test]
    async fn rerunning_settlement_changes_nothing() {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        let bet_id = pending_bet(&store);

        let (market, book) = closed_market(11);
        let exchange: Arc<dyn ExchangeApi> = Arc::new(ScriptedExchange {
            market,
            book: Mutex::new(book),
        });

        let s = settler(exchange, store.clone());
        s.settle_pending().await.unwrap();
        let first = store.get_bet(bet_id).unwrap().unwrap();

        // Second sweep sees no pending bets at all.
        let summary = s.settle_pending().await.unwrap();
        assert_eq!(summary.checked, 0);
        let second = store.get_bet(bet_id).unwrap().unwrap();
        assert_eq!(first.result, second.result);
        assert_eq!(first.profit_loss, second.profit_loss);
    }

    #[tokio::test]
    async fn open_inplay_market_marks_bet_live() {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        let bet_id = pending_bet(&store);

        let (market, mut book) = closed_market(11);
        book.status = Some("ACTIVE".into());
        book.inplay = true;
        for runner in &mut book.runners {
            runner.status = Some("ACTIVE".into());
        }
        let exchange = Arc::new(ScriptedExchange {
            market,
            book: Mutex::new(book),
        });

        let summary = settler(exchange, store.clone()).settle_pending().await.unwrap();
        assert_eq!(summary.went_live, 1);
        let bet = store.get_bet(bet_id).unwrap().unwrap();
        assert!(bet.is_live);
        assert!(bet.is_pending());
    }
}
