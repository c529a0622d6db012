//! Elo ratings.
//!
//! Two sources of strength: a closed-form conversion from tour ranking, and
//! the rolling Performance Elo recomputed from actual results over the
//! trailing twelve months. The gap between them is the signal: a player
//! whose results outrun their ranking is underpriced by rank-based markets.

use crate::classify::{is_mens_event, is_womens_event, tour_level};
use crate::error::StoreResult;
use crate::models::{MatchRecord, Tour, TourLevel};
use crate::store::TennisStore;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use tracing::{debug, info};

pub const DEFAULT_ELO: f64 = 1200.0;
const DEFAULT_ROLLING_MONTHS: u32 = 12;
const MAX_TOUR_FIXPOINT_PASSES: usize = 10;

/// Convert a tour ranking into an Elo estimate. Rank 1 maps to 2500 and the
/// curve loses 150 points per doubling, floored at 1000. Unranked players
/// get the default.
pub fn ranking_to_elo(ranking: Option<i64>) -> f64 {
    match ranking {
        Some(r) if r > 0 => {
            let elo = 2500.0 - 150.0 * (r.max(1) as f64).log2();
            elo.max(1000.0)
        }
        _ => DEFAULT_ELO,
    }
}

/// Expected score for `elo` against `opp_elo`.
pub fn expected_score(elo: f64, opp_elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opp_elo - elo) / 400.0))
}

/// K-factor by tournament tier: bigger events move the rating more.
pub fn k_factor(level: TourLevel) -> f64 {
    match level {
        TourLevel::GrandSlam => 48.0,
        TourLevel::Masters | TourLevel::Atp => 32.0,
        TourLevel::Wta => 28.0,
        TourLevel::Challenger => 24.0,
        TourLevel::Itf => 20.0,
        TourLevel::Unknown => 24.0,
    }
}

/// Infer ATP/WTA from the tournaments a player appeared in. Grand Slams are
/// skipped (both tours play them); ITF events only count when the name
/// carries a gender marker. Returns None when nothing is conclusive.
fn detect_tour(matches: &[MatchRecord]) -> Option<Tour> {
    let mut atp = 0usize;
    let mut wta = 0usize;
    for m in matches {
        match tour_level(&m.tournament) {
            TourLevel::Atp | TourLevel::Masters | TourLevel::Challenger => atp += 1,
            TourLevel::Wta => wta += 1,
            TourLevel::Itf => {
                if is_womens_event(&m.tournament) {
                    wta += 1;
                } else if is_mens_event(&m.tournament) {
                    atp += 1;
                }
            }
            _ => {}
        }
    }
    if atp == 0 && wta == 0 {
        None
    } else if atp >= wta {
        Some(Tour::Atp)
    } else {
        Some(Tour::Wta)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerElo {
    pub elo: f64,
    pub tour: Option<Tour>,
}

pub struct PerformanceEloCalculator<'a> {
    store: &'a TennisStore,
    window_months: u32,
}

impl<'a> PerformanceEloCalculator<'a> {
    pub fn new(store: &'a TennisStore) -> Self {
        Self {
            store,
            window_months: DEFAULT_ROLLING_MONTHS,
        }
    }

    pub fn with_window_months(mut self, months: u32) -> Self {
        self.window_months = months.max(1);
        self
    }

    fn window_cutoff(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.window_months as i64 * 30)
    }

    /// Single-player calculation: ranking-derived start, then one standard
    /// Elo update per match in chronological order, K weighted by tier.
    /// Returns None when the player has no matches in the window (their prior
    /// rating is retained, not reset).
    pub fn calculate_player(
        &self,
        player_id: i64,
        today: NaiveDate,
        ranking_cache: &HashMap<i64, i64>,
    ) -> StoreResult<Option<PlayerElo>> {
        let Some(player) = self.store.get_player(player_id)? else {
            return Ok(None);
        };

        let cutoff = self.window_cutoff(today);
        let mut matches = self
            .store
            .get_player_matches(player.id, Some(cutoff), None)?;
        if matches.is_empty() {
            return Ok(None);
        }
        matches.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

        let canonical = self.store.canonical_id(player.id)?;
        let mut elo = ranking_to_elo(player.current_ranking);

        for m in &matches {
            let won = self.store.canonical_id(m.winner_id)? == canonical;
            let actual = if won { 1.0 } else { 0.0 };

            let (opp_rank, opp_id) = if won {
                (m.loser_rank, m.loser_id)
            } else {
                (m.winner_rank, m.winner_id)
            };
            // Fall back to the precomputed ranking cache when the match row
            // has no rank field.
            let opp_rank = opp_rank
                .filter(|r| *r > 0)
                .or_else(|| ranking_cache.get(&opp_id).copied());
            let opp_elo = ranking_to_elo(opp_rank);

            let k = k_factor(tour_level(&m.tournament));
            elo += k * (actual - expected_score(elo, opp_elo));
        }

        Ok(Some(PlayerElo {
            elo: (elo * 10.0).round() / 10.0,
            tour: detect_tour(&matches),
        }))
    }

    /// Recompute Performance Elo for every player active in the rolling
    /// window, resolve ambiguous tours, and reassign per-tour performance
    /// ranks. Returns the number of players updated.
    pub fn recalculate_all(&self, today: NaiveDate) -> StoreResult<usize> {
        let ranking_cache = self.store.ranking_cache()?;
        debug!("ranking cache loaded: {} players", ranking_cache.len());

        let cutoff = self.window_cutoff(today);
        let mut active: Vec<i64> = Vec::new();
        {
            let mut seen = std::collections::HashSet::new();
            for id in self.store.active_player_ids_since(cutoff)? {
                let canonical = self.store.canonical_id(id)?;
                if seen.insert(canonical) {
                    active.push(canonical);
                }
            }
        }
        info!("calculating performance elo for {} active players", active.len());

        let mut updated = 0usize;
        let mut ambiguous: Vec<i64> = Vec::new();
        for player_id in &active {
            let Some(result) = self.calculate_player(*player_id, today, &ranking_cache)? else {
                continue;
            };
            self.store
                .update_player_performance_elo(*player_id, result.elo)?;
            match result.tour {
                Some(tour) => self.store.update_player_tour(*player_id, Some(tour))?,
                None => {
                    // Clear any stale tour so the opponent pass only counts
                    // clearly-classified players.
                    self.store.update_player_tour(*player_id, None)?;
                    ambiguous.push(*player_id);
                }
            }
            updated += 1;
        }

        if !ambiguous.is_empty() {
            debug!("resolving tour for {} ambiguous players", ambiguous.len());
            self.fix_ambiguous_tours(&ambiguous)?;
        }

        let ranked = self.store.update_all_performance_ranks()?;
        info!(
            "performance elo complete: {} players updated, {} ranked",
            updated, ranked
        );
        Ok(updated)
    }

    /// Players whose events were all gender-ambiguous get their tour from the
    /// tours of their opponents. Iterative: each pass may classify players
    /// whose opponents were classified in the previous one. After
    /// convergence, the leftover falls back WTA-aware: only-WTA opposition
    /// means WTA, anything else means ATP.
    fn fix_ambiguous_tours(&self, player_ids: &[i64]) -> StoreResult<()> {
        let mut remaining: Vec<i64> = player_ids.to_vec();

        for _pass in 0..MAX_TOUR_FIXPOINT_PASSES {
            let mut resolved_this_pass = 0usize;
            let mut still_ambiguous = Vec::new();

            for &player_id in &remaining {
                let (atp_opps, wta_opps) = self.store.opponent_tour_counts(player_id)?;
                if atp_opps > 0 || wta_opps > 0 {
                    let tour = if wta_opps > atp_opps {
                        Tour::Wta
                    } else {
                        Tour::Atp
                    };
                    self.store.update_player_tour(player_id, Some(tour))?;
                    resolved_this_pass += 1;
                } else {
                    still_ambiguous.push(player_id);
                }
            }

            remaining = still_ambiguous;
            if resolved_this_pass == 0 {
                break;
            }
        }

        for &player_id in &remaining {
            let (atp_opps, wta_opps) = self.store.opponent_tour_counts(player_id)?;
            let tour = if wta_opps > 0 && atp_opps == 0 {
                Tour::Wta
            } else {
                Tour::Atp
            };
            self.store.update_player_tour(player_id, Some(tour))?;
        }
        Ok(())
    }
}
