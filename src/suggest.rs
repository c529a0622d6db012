//! Value filter and stake sizing.
//!
//! Turns captured markets plus model probabilities into ranked bet
//! candidates: positive-EV sides only, quarter-Kelly stakes in half-unit
//! steps, and a strategy model gate that must accept the candidate or it is
//! discarded.

use crate::analysis::MatchAnalyzer;
use crate::classify::tour_level;
use crate::config::Config;
use crate::error::StoreResult;
use crate::models::{Bet, BetModel, Surface, TourLevel};
use crate::store::TennisStore;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct BetCandidate {
    pub market_id: String,
    pub tournament: String,
    pub match_description: String,
    pub match_date: String,
    pub start_time: NaiveDateTime,
    pub surface: Surface,
    pub selection: String,
    pub odds: f64,
    pub our_probability: f64,
    pub implied_probability: f64,
    pub expected_value: f64,
    /// Fraction of bankroll after the fractional-Kelly multiplier.
    pub kelly_fraction: f64,
    pub recommended_units: f64,
    pub model: BetModel,
}

impl BetCandidate {
    pub fn kelly_stake_pct(&self) -> f64 {
        self.kelly_fraction * 100.0
    }

    /// Materialize a candidate as a trackable bet.
    pub fn to_bet(&self) -> Bet {
        let mut bet = Bet::new(
            self.match_date.clone(),
            self.tournament.clone(),
            self.match_description.clone(),
            self.selection.clone(),
            self.odds,
            self.recommended_units,
        );
        bet.our_probability = Some(self.our_probability);
        bet.implied_probability = Some(self.implied_probability);
        bet.ev_at_placement = Some(self.expected_value);
        bet.model = self.model;
        bet.notes = Some(format!(
            "[AUTO] Surface: {} | Kelly: {:.1}%",
            self.surface.as_str(),
            self.kelly_stake_pct()
        ));
        bet
    }
}

/// Expected value of a unit stake at decimal `odds` with win probability `p`.
pub fn expected_value(p: f64, odds: f64) -> f64 {
    p * (odds - 1.0) - (1.0 - p)
}

/// Raw Kelly fraction for a back bet at decimal odds.
pub fn kelly_fraction(p: f64, odds: f64) -> f64 {
    let b = odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    ((p * b - (1.0 - p)) / b).max(0.0)
}

/// Round a unit stake to the nearest half unit.
fn round_to_half(units: f64) -> f64 {
    (units * 2.0).round() / 2.0
}

/// Strategy gate dispatch. Gates are mutually exclusive and checked in
/// order; the first hit wins. Thresholds are checked against the side's
/// expected value. `rank_gap` is how many ranking places the opponent sits
/// above the selection (positive = opponent better-ranked); it is only known
/// at suggestion time, so backfills pass None and can never produce Underdog.
pub fn calculate_bet_model(
    our_p: f64,
    _implied_p: f64,
    tournament: &str,
    odds: f64,
    rank_gap: Option<i64>,
) -> BetModel {
    let ev = expected_value(our_p, odds);
    let level = tour_level(tournament);

    let main_tour = matches!(
        level,
        TourLevel::GrandSlam | TourLevel::Masters | TourLevel::Atp | TourLevel::Wta
    );

    if our_p >= 0.55 && ev >= 0.08 && main_tour && odds <= 3.0 {
        return BetModel::Favorite;
    }
    if (0.45..0.55).contains(&our_p) && ev >= 0.10 && (2.0..=4.0).contains(&odds) {
        return BetModel::EvenMatch;
    }
    if rank_gap.map_or(false, |gap| gap >= 50) && ev >= 0.12 {
        return BetModel::Underdog;
    }
    BetModel::None
}

/// One side of one market, evaluated independently of the store.
#[derive(Debug, Clone, Copy)]
pub struct SideInput<'a> {
    pub selection: &'a str,
    pub our_probability: f64,
    pub odds: f64,
    pub own_rank: Option<i64>,
    pub opp_rank: Option<i64>,
}

/// EV filter + staking + model gate for one side. None when the side has no
/// value or no model accepts it.
pub fn evaluate_side(
    input: SideInput<'_>,
    tournament: &str,
    config: &Config,
) -> Option<(f64, f64, f64, BetModel)> {
    let implied = 1.0 / input.odds;
    let ev = expected_value(input.our_probability, input.odds);
    // Strictly greater: a side sitting exactly on the threshold is skipped.
    if ev <= config.ev_threshold {
        return None;
    }

    let fractional = kelly_fraction(input.our_probability, input.odds) * config.kelly_fraction;
    let units = round_to_half(fractional / config.unit_fraction)
        .clamp(config.min_stake_units, config.max_stake_units);

    let rank_gap = match (input.own_rank, input.opp_rank) {
        (Some(own), Some(opp)) => Some(own - opp),
        _ => None,
    };
    let model = calculate_bet_model(input.our_probability, implied, tournament, input.odds, rank_gap);
    if model == BetModel::None {
        return None;
    }

    Some((ev, fractional, units, model))
}

pub struct BetSuggester<'a> {
    store: &'a TennisStore,
    config: &'a Config,
}

impl<'a> BetSuggester<'a> {
    pub fn new(store: &'a TennisStore, config: &'a Config) -> Self {
        Self { store, config }
    }

    pub fn suggest(&self) -> StoreResult<Vec<BetCandidate>> {
        self.suggest_at(Utc::now().date_naive())
    }

    /// Scan every captured market and produce ranked candidates. Sides with
    /// unresolved players are skipped: with no history there is no model
    /// probability worth acting on.
    pub fn suggest_at(&self, today: NaiveDate) -> StoreResult<Vec<BetCandidate>> {
        let markets = self.store.get_upcoming_matches()?;
        let analyzer = MatchAnalyzer::new(self.store);

        let mut candidates = Vec::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();

        for market in &markets {
            let (Some(p1_id), Some(p2_id)) = (market.player1.id(), market.player2.id()) else {
                debug!(
                    "skipping {}: unresolved player ({} vs {})",
                    market.market_id, market.player1_name, market.player2_name
                );
                continue;
            };

            let probability =
                analyzer.calculate_win_probability_at(p1_id, p2_id, market.surface, today)?;
            let p1_rank = self
                .store
                .get_player(p1_id)?
                .and_then(|p| p.current_ranking);
            let p2_rank = self
                .store
                .get_player(p2_id)?
                .and_then(|p| p.current_ranking);

            let sides = [
                SideInput {
                    selection: &market.player1_name,
                    our_probability: probability.p1_probability,
                    odds: market.player1_odds,
                    own_rank: p1_rank,
                    opp_rank: p2_rank,
                },
                SideInput {
                    selection: &market.player2_name,
                    our_probability: probability.p2_probability,
                    odds: market.player2_odds,
                    own_rank: p2_rank,
                    opp_rank: p1_rank,
                },
            ];

            for side in sides {
                let Some((ev, fractional, units, model)) =
                    evaluate_side(side, &market.tournament, self.config)
                else {
                    continue;
                };

                let key = (
                    market.tournament.clone(),
                    market.description(),
                    side.selection.to_string(),
                );
                if !seen.insert(key) {
                    continue;
                }

                candidates.push(BetCandidate {
                    market_id: market.market_id.clone(),
                    tournament: market.tournament.clone(),
                    match_description: market.description(),
                    match_date: market.start_time.date().to_string(),
                    start_time: market.start_time,
                    surface: market.surface,
                    selection: side.selection.to_string(),
                    odds: side.odds,
                    our_probability: side.our_probability,
                    implied_probability: 1.0 / side.odds,
                    expected_value: ev,
                    kelly_fraction: fractional,
                    recommended_units: units,
                    model,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.expected_value
                .partial_cmp(&a.expected_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.kelly_fraction
                        .partial_cmp(&a.kelly_fraction)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.start_time.cmp(&b.start_time))
        });

        info!(
            "analyzed {} markets, {} value bets",
            markets.len(),
            candidates.len()
        );
        Ok(candidates)
    }

    /// Auto mode: persist candidates as bets, skipping duplicates. Returns
    /// the bets actually added, ids filled in.
    pub fn auto_add_bets(&self, candidates: &[BetCandidate]) -> StoreResult<Vec<Bet>> {
        let mut added = Vec::new();
        for candidate in candidates {
            let mut bet = candidate.to_bet();
            if self.store.check_duplicate_bet(
                &bet.match_description,
                &bet.selection,
                &bet.match_date,
                &bet.tournament,
            )? {
                continue;
            }
            bet.id = Some(self.store.add_bet(&bet)?);
            added.push(bet);
        }
        if !added.is_empty() {
            info!("auto mode: added {} bets to the tracker", added.len());
        }
        Ok(added)
    }
}
