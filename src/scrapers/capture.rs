//! Odds capture cycle: exchange markets in, upcoming-match rows out.
//!
//! Filters out anything the engine cannot price (in-play, doubles, missing
//! odds), fixes runner order by sort priority, resolves player names, and
//! annotates with sharp reference odds when available.

use crate::classify;
use crate::config::Config;
use crate::models::{PlayerRef, UpcomingMatch};
use crate::resolver::{last_name, NameCandidate, NameResolver};
use crate::scrapers::exchange::{ExchangeApi, MarketCatalogueEntry};
use crate::scrapers::sharp::{compare_to_reference, reference_odds_for, SharpMatchOdds, SharpOddsClient, SharpVerdict};
use crate::store::TennisStore;
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Serialize)]
pub struct CaptureSummary {
    /// Correlates one cycle's log lines and stored rows.
    pub cycle_id: String,
    pub markets_found: usize,
    pub captured: usize,
    pub skipped_inplay: usize,
    pub skipped_no_odds: usize,
    pub skipped_other: usize,
    pub unresolved_players: usize,
}

pub struct OddsCapture {
    store: Arc<TennisStore>,
    exchange: Arc<dyn ExchangeApi>,
    sharp: Option<Arc<SharpOddsClient>>,
    resolver: Arc<dyn NameResolver>,
    config: Config,
}

impl OddsCapture {
    pub fn new(
        store: Arc<TennisStore>,
        exchange: Arc<dyn ExchangeApi>,
        sharp: Option<Arc<SharpOddsClient>>,
        resolver: Arc<dyn NameResolver>,
        config: Config,
    ) -> Self {
        Self {
            store,
            exchange,
            sharp,
            resolver,
            config,
        }
    }

    /// One full capture pass. Upstream failure aborts the cycle; the caller
    /// retries at the next tick.
    pub async fn capture_cycle(&self) -> Result<CaptureSummary> {
        let markets = self
            .exchange
            .list_match_odds_markets(self.config.capture_hours_ahead)
            .await?;
        let mut summary = CaptureSummary {
            cycle_id: Uuid::new_v4().to_string(),
            markets_found: markets.len(),
            ..Default::default()
        };
        if markets.is_empty() {
            return Ok(summary);
        }

        let market_ids: Vec<String> = markets.iter().map(|m| m.market_id.clone()).collect();
        let books = self.exchange.list_market_books(&market_ids).await?;
        let books_by_id: HashMap<&str, _> = books
            .iter()
            .map(|b| (b.market_id.as_str(), b))
            .collect();

        let sharp_entries: Vec<SharpMatchOdds> = match &self.sharp {
            Some(client) => client.fetch_tennis_odds().await,
            None => Vec::new(),
        };

        let captured_at = Utc::now().naive_utc();
        let mut resolution_cache: HashMap<String, PlayerRef> = HashMap::new();

        for market in &markets {
            let Some(book) = books_by_id.get(market.market_id.as_str()) else {
                summary.skipped_other += 1;
                continue;
            };

            if book.inplay {
                summary.skipped_inplay += 1;
                continue;
            }
            if market.runners.len() != 2 {
                summary.skipped_other += 1;
                continue;
            }

            // Fixed ordering by sort priority so sides never swap between
            // cycles.
            let mut runners = market.runners.clone();
            runners.sort_by_key(|r| r.sort_priority);
            let (r1, r2) = (&runners[0], &runners[1]);

            // Doubles pairs are out of scope.
            if r1.runner_name.contains('/') || r2.runner_name.contains('/') {
                summary.skipped_other += 1;
                continue;
            }

            let runner_book = |selection_id: i64| {
                book.runners.iter().find(|r| r.selection_id == selection_id)
            };
            let (b1, b2) = (runner_book(r1.selection_id), runner_book(r2.selection_id));
            let p1_back = b1.and_then(|r| r.best_back());
            let p2_back = b2.and_then(|r| r.best_back());
            let (Some(p1_back), Some(p2_back)) = (p1_back, p2_back) else {
                debug!(
                    "skipped (no odds): {} vs {}",
                    r1.runner_name, r2.runner_name
                );
                summary.skipped_no_odds += 1;
                continue;
            };

            let tournament = market
                .competition
                .as_ref()
                .and_then(|c| c.name.clone())
                .unwrap_or_default();
            let start_time = parse_start_time(market).unwrap_or(captured_at);

            let (surface_opt, level) = classify::classify(&tournament, Some(start_time.date()));
            let surface = surface_opt.unwrap_or(crate::models::Surface::Hard);
            if !tournament.is_empty() {
                self.store.upsert_tournament(
                    &tournament,
                    surface_opt.map(|s| s.as_str()),
                    level.as_str(),
                )?;
            }

            let p1_ref = self.resolve_cached(&mut resolution_cache, &r1.runner_name)?;
            let p2_ref = self.resolve_cached(&mut resolution_cache, &r2.runner_name)?;
            if !p1_ref.is_resolved() {
                summary.unresolved_players += 1;
            }
            if !p2_ref.is_resolved() {
                summary.unresolved_players += 1;
            }

            let sharp_pair = reference_odds_for(&r1.runner_name, &r2.runner_name, &sharp_entries);
            if let Some(reference) = sharp_pair {
                let verdict = compare_to_reference((p1_back.price, p2_back.price), reference);
                if verdict != SharpVerdict::Ok {
                    info!(
                        "sharp comparison {:?}: {} ({:.2}/{:.2}) vs reference ({:.2}/{:.2})",
                        verdict,
                        market.market_id,
                        p1_back.price,
                        p2_back.price,
                        reference.0,
                        reference.1
                    );
                }
            }

            let liquidity = p1_back.size.min(p2_back.size);
            if liquidity < 100.0 {
                debug!(
                    "low liquidity: {} vs {} ({:.0})",
                    r1.runner_name, r2.runner_name, liquidity
                );
            }

            let upcoming = UpcomingMatch {
                market_id: market.market_id.clone(),
                tournament,
                start_time,
                surface,
                player1: p1_ref,
                player2: p2_ref,
                player1_name: r1.runner_name.clone(),
                player2_name: r2.runner_name.clone(),
                player1_odds: p1_back.price,
                player2_odds: p2_back.price,
                player1_liquidity: Some(p1_back.size),
                player2_liquidity: Some(p2_back.size),
                total_matched: book.total_matched,
                sharp_p1_odds: sharp_pair.map(|(p1, _)| p1),
                sharp_p2_odds: sharp_pair.map(|(_, p2)| p2),
                captured_at,
            };

            if let Err(e) = self.store.upsert_upcoming_match(&upcoming) {
                warn!("failed to upsert market {}: {}", market.market_id, e);
                summary.skipped_other += 1;
                continue;
            }
            summary.captured += 1;
        }

        self.store.record_refresh("quick")?;
        info!(
            "capture cycle {}: {} markets, {} captured, {} in-play, {} no odds, {} other",
            summary.cycle_id,
            summary.markets_found,
            summary.captured,
            summary.skipped_inplay,
            summary.skipped_no_odds,
            summary.skipped_other
        );
        Ok(summary)
    }

    /// Resolve one runner name against the roster, memoized per cycle.
    fn resolve_cached(
        &self,
        cache: &mut HashMap<String, PlayerRef>,
        name: &str,
    ) -> Result<PlayerRef> {
        if let Some(found) = cache.get(name) {
            return Ok(found.clone());
        }

        let key = {
            let surname = last_name(name);
            if surname.len() >= 2 {
                surname
            } else {
                name.to_string()
            }
        };
        let candidates: Vec<NameCandidate> = self
            .store
            .search_players(&key, 20)?
            .into_iter()
            .map(|p| NameCandidate {
                id: p.id,
                name: p.name,
            })
            .collect();

        let resolved = match self.resolver.resolve(name, None, &candidates) {
            Some(id) => PlayerRef::Canonical(self.store.canonical_id(id)?),
            None => {
                debug!("unresolved player name: {}", name);
                PlayerRef::Unresolved(name.to_string())
            }
        };
        cache.insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }
}

fn parse_start_time(market: &MarketCatalogueEntry) -> Option<NaiveDateTime> {
    let raw = market.market_start_time.as_deref()?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Player;
    use crate::resolver::MappingNameResolver;
    use crate::scrapers::exchange::{
        CompetitionInfo, ExchangePrices, MarketBook, PriceSize, RunnerBook, RunnerCatalog,
    };
    use anyhow::Result;
    use async_trait::async_trait;

    struct ScriptedExchange {
        markets: Vec<MarketCatalogueEntry>,
        books: Vec<MarketBook>,
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
            Ok(self.markets.clone())
        }

        async fn list_market_books(&self, market_ids: &[String]) -> Result<Vec<MarketBook>> {
            Ok(self
                .books
                .iter()
                .filter(|b| market_ids.contains(&b.market_id))
                .cloned()
                .collect())
        }

        async fn search_markets(&self, _text_query: &str) -> Result<Vec<MarketCatalogueEntry>> {
            Ok(self.markets.clone())
        }
    }

    fn catalogue(
        market_id: &str,
        competition: &str,
        start: &str,
        runners: &[(i64, &str, i64)],
    ) -> MarketCatalogueEntry {
        MarketCatalogueEntry {
            market_id: market_id.into(),
            market_name: Some("Match Odds".into()),
            market_start_time: Some(start.into()),
            event: None,
            competition: Some(CompetitionInfo {
                id: Some("c1".into()),
                name: Some(competition.into()),
            }),
            runners: runners
                .iter()
                .map(|(id, name, priority)| RunnerCatalog {
                    selection_id: *id,
                    runner_name: (*name).into(),
                    sort_priority: *priority,
                })
                .collect(),
        }
    }

    fn book(market_id: &str, inplay: bool, prices: &[(i64, f64, f64)]) -> MarketBook {
        MarketBook {
            market_id: market_id.into(),
            status: Some("OPEN".into()),
            inplay,
            total_matched: Some(25_000.0),
            runners: prices
                .iter()
                .map(|(id, price, size)| RunnerBook {
                    selection_id: *id,
                    status: Some("ACTIVE".into()),
                    total_matched: None,
                    ex: Some(ExchangePrices {
                        available_to_back: vec![PriceSize {
                            price: *price,
                            size: *size,
                        }],
                        available_to_lay: vec![],
                    }),
                })
                .collect(),
        }
    }

    fn capture_with(
        markets: Vec<MarketCatalogueEntry>,
        books: Vec<MarketBook>,
    ) -> (Arc<TennisStore>, OddsCapture) {
        let store = Arc::new(TennisStore::open_in_memory().unwrap());
        store
            .upsert_player(&Player::new(1, "Alpha One").with_ranking(10))
            .unwrap();
        store
            .upsert_player(&Player::new(2, "Beta Two").with_ranking(45))
            .unwrap();

        let exchange = Arc::new(ScriptedExchange { markets, books });
        let capture = OddsCapture::new(
            store.clone(),
            exchange,
            None,
            Arc::new(MappingNameResolver::empty()),
            Config::default(),
        );
        (store, capture)
    }

    #[tokio::test]
    async fn captures_resolved_market() {
        let markets = vec![catalogue(
            "1.1",
            "Australian Open",
            "2026-02-01T14:30:00.000Z",
            &[(11, "Alpha One", 1), (22, "Beta Two", 2)],
        )];
        let books = vec![book("1.1", false, &[(11, 1.50, 800.0), (22, 2.80, 650.0)])];
        let (store, capture) = capture_with(markets, books);

        let summary = capture.capture_cycle().await.unwrap();
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.unresolved_players, 0);

        let row = store.get_upcoming_match("1.1").unwrap().unwrap();
        assert_eq!(row.player1, PlayerRef::Canonical(1));
        assert_eq!(row.player1_odds, 1.50);
        assert_eq!(row.surface, crate::models::Surface::Hard);
        assert!(store.last_refresh("quick").unwrap().is_some());
    }

    #[tokio::test]
    async fn skips_inplay_doubles_and_priceless_markets() {
        let markets = vec![
            catalogue(
                "1.1",
                "ATP Doha",
                "2026-02-01T10:00:00.000Z",
                &[(11, "Alpha One", 1), (22, "Beta Two", 2)],
            ),
            catalogue(
                "1.2",
                "ATP Doha",
                "2026-02-01T11:00:00.000Z",
                &[(31, "Alpha One/Beta Two", 1), (32, "C Three/D Four", 2)],
            ),
            catalogue(
                "1.3",
                "ATP Doha",
                "2026-02-01T12:00:00.000Z",
                &[(41, "Alpha One", 1), (42, "Beta Two", 2)],
            ),
        ];
        let books = vec![
            book("1.1", true, &[(11, 1.50, 800.0), (22, 2.80, 650.0)]),
            book("1.2", false, &[(31, 1.90, 100.0), (32, 1.90, 100.0)]),
            // Runner 42 has an empty book.
            MarketBook {
                runners: vec![
                    RunnerBook {
                        selection_id: 41,
                        status: Some("ACTIVE".into()),
                        total_matched: None,
                        ex: Some(ExchangePrices {
                            available_to_back: vec![PriceSize {
                                price: 1.6,
                                size: 100.0,
                            }],
                            available_to_lay: vec![],
                        }),
                    },
                    RunnerBook {
                        selection_id: 42,
                        status: Some("ACTIVE".into()),
                        total_matched: None,
                        ex: Some(ExchangePrices::default()),
                    },
                ],
                ..book("1.3", false, &[])
            },
        ];
        let (store, capture) = capture_with(markets, books);

        let summary = capture.capture_cycle().await.unwrap();
        assert_eq!(summary.captured, 0);
        assert_eq!(summary.skipped_inplay, 1);
        assert_eq!(summary.skipped_no_odds, 1);
        assert_eq!(summary.skipped_other, 1);
        assert_eq!(store.upcoming_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_names_stay_unresolved() {
        let markets = vec![catalogue(
            "1.7",
            "W60 Nottingham",
            "2026-02-03T09:00:00.000Z",
            &[(11, "Total Stranger", 1), (22, "Beta Two", 2)],
        )];
        let books = vec![book("1.7", false, &[(11, 2.4, 150.0), (22, 1.6, 220.0)])];
        let (store, capture) = capture_with(markets, books);

        let summary = capture.capture_cycle().await.unwrap();
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.unresolved_players, 1);

        let row = store.get_upcoming_match("1.7").unwrap().unwrap();
        assert_eq!(
            row.player1,
            PlayerRef::Unresolved("Total Stranger".to_string())
        );
        assert_eq!(row.player2, PlayerRef::Canonical(2));
    }
}
