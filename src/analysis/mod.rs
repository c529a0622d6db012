//! Multi-factor win-probability model.
//!
//! Ten weighted factors, each a signed advantage in [-1, 1] favoring player
//! one, blended and squashed through a logistic. Pure function of store
//! state: same inputs, same probability.

pub mod factors;

use crate::elo::{expected_score, ranking_to_elo};
use crate::error::StoreResult;
use crate::models::{InjuryRecord, MatchRecord, Player, Surface, SurfaceStats};
use crate::store::TennisStore;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;

const W_RANKING_ELO: f64 = 0.22;
const W_FORM: f64 = 0.12;
const W_SURFACE: f64 = 0.14;
const W_H2H: f64 = 0.08;
const W_FATIGUE: f64 = 0.08;
const W_INJURY: f64 = 0.06;
const W_OPP_QUALITY: f64 = 0.10;
const W_RECENCY: f64 = 0.08;
const W_RECENT_LOSS: f64 = 0.06;
const W_MOMENTUM: f64 = 0.06;

/// Steepness of the logistic mapping advantage to probability.
const LOGISTIC_SCALE: f64 = 3.0;
const PROB_FLOOR: f64 = 0.02;
const PROB_CEIL: f64 = 0.98;

/// History window the factors draw on.
const HISTORY_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize)]
pub struct FactorScore {
    pub name: &'static str,
    pub weight: f64,
    /// Signed, positive favors player one.
    pub advantage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WinProbability {
    pub p1_probability: f64,
    pub p2_probability: f64,
    pub weighted_advantage: f64,
    pub factors: Vec<FactorScore>,
}

/// Everything the factors need to know about one side of a matchup.
struct SideContext {
    player: Player,
    alias_ids: HashSet<i64>,
    /// Trailing year, newest first.
    matches: Vec<MatchRecord>,
    injuries: Vec<InjuryRecord>,
    career_surface: SurfaceStats,
}

impl SideContext {
    fn won(&self, m: &MatchRecord) -> bool {
        self.alias_ids.contains(&m.winner_id)
    }
}

pub struct MatchAnalyzer<'a> {
    store: &'a TennisStore,
}

impl<'a> MatchAnalyzer<'a> {
    pub fn new(store: &'a TennisStore) -> Self {
        Self { store }
    }

    fn load_side(&self, player_id: i64, surface: Surface, today: NaiveDate) -> StoreResult<Option<SideContext>> {
        let Some(player) = self.store.get_player(player_id)? else {
            return Ok(None);
        };
        let alias_ids: HashSet<i64> = self.store.alias_ids(player.id)?.into_iter().collect();
        let matches = self
            .store
            .get_player_matches(player.id, Some(today - Duration::days(HISTORY_DAYS)), None)?;
        let injuries = self.store.active_injuries(player.id)?;
        let career_surface = self.store.surface_stats(player.id, surface)?;
        Ok(Some(SideContext {
            player,
            alias_ids,
            matches,
            injuries,
            career_surface,
        }))
    }

    pub fn calculate_win_probability(
        &self,
        p1_id: i64,
        p2_id: i64,
        surface: Surface,
    ) -> StoreResult<WinProbability> {
        self.calculate_win_probability_at(p1_id, p2_id, surface, Utc::now().date_naive())
    }

    /// Probability with an injected "today", so analyses replay
    /// deterministically.
    pub fn calculate_win_probability_at(
        &self,
        p1_id: i64,
        p2_id: i64,
        surface: Surface,
        today: NaiveDate,
    ) -> StoreResult<WinProbability> {
        let side1 = self.load_side(p1_id, surface, today)?;
        let side2 = self.load_side(p2_id, surface, today)?;

        let (h2h_p1, h2h_p2) = self.store.head_to_head(p1_id, p2_id)?;

        let factors = compute_factors(side1.as_ref(), side2.as_ref(), surface, today, h2h_p1, h2h_p2);
        let weighted_advantage: f64 = factors.iter().map(|f| f.weight * f.advantage).sum();

        let p1 = (1.0 / (1.0 + (-LOGISTIC_SCALE * weighted_advantage).exp()))
            .clamp(PROB_FLOOR, PROB_CEIL);

        Ok(WinProbability {
            p1_probability: p1,
            p2_probability: 1.0 - p1,
            weighted_advantage,
            factors,
        })
    }
}

fn compute_factors(
    side1: Option<&SideContext>,
    side2: Option<&SideContext>,
    surface: Surface,
    today: NaiveDate,
    h2h_p1: i64,
    h2h_p2: i64,
) -> Vec<FactorScore> {
    let rank = |s: Option<&SideContext>| s.and_then(|c| c.player.current_ranking);

    // 1. Ranking Elo.
    let elo1 = ranking_to_elo(rank(side1));
    let elo2 = ranking_to_elo(rank(side2));
    let elo_advantage = 2.0 * (expected_score(elo1, elo2) - 0.5);

    // 2. Form.
    let form = |s: Option<&SideContext>| {
        s.and_then(|c| factors::form_score(&c.matches, |m| c.won(m), c.player.current_ranking))
    };
    let form_advantage = match (form(side1), form(side2)) {
        (Some(f1), Some(f2)) => (f1.score - f2.score) / 100.0,
        _ => 0.0,
    };

    // 3. Surface.
    let surf = |s: Option<&SideContext>| {
        s.and_then(|c| {
            factors::combined_surface_rate(&c.career_surface, &c.matches, |m| c.won(m), surface)
        })
    };
    let surface_advantage = match (surf(side1), surf(side2)) {
        (Some(r1), Some(r2)) => r1 - r2,
        _ => 0.0,
    };

    // 4. Head-to-head.
    let h2h = factors::h2h_advantage(h2h_p1, h2h_p2);

    // 5. Fatigue.
    let fatigue = |s: Option<&SideContext>| {
        s.map(|c| factors::fatigue_score(&c.matches, today)).unwrap_or(100.0)
    };
    let fatigue_advantage = (fatigue(side1) - fatigue(side2)) / 100.0;

    // 6. Injury.
    let injury = |s: Option<&SideContext>| {
        s.map(|c| factors::injury_penalty(&c.injuries)).unwrap_or(0.0)
    };
    let injury_advantage = injury(side2) - injury(side1);

    // 7. Opponent quality. Per-player scores live in [-1, 1]; halving the
    // difference keeps the advantage there too.
    let quality = |s: Option<&SideContext>| {
        s.and_then(|c| factors::opponent_quality(&c.matches, |m| c.won(m), today))
    };
    let quality_advantage = match (quality(side1), quality(side2)) {
        (Some(q1), Some(q2)) => (q1 - q2) / 2.0,
        _ => 0.0,
    };

    // 8. Recency.
    let recency = |s: Option<&SideContext>| {
        s.and_then(|c| factors::recency_score(&c.matches, |m| c.won(m), today))
    };
    let recency_advantage = match (recency(side1), recency(side2)) {
        (Some(r1), Some(r2)) => (r1 - r2) / 2.0,
        _ => 0.0,
    };

    // 9. Recent loss.
    let loss_pen = |s: Option<&SideContext>| {
        s.map(|c| factors::recent_loss_penalty(&c.matches, |m| c.won(m), today))
            .unwrap_or(0.0)
    };
    let recent_loss_advantage = loss_pen(side2) - loss_pen(side1);

    // 10. Momentum.
    let momentum = |s: Option<&SideContext>| {
        s.map(|c| factors::momentum_bonus(&c.matches, |m| c.won(m), surface, today))
            .unwrap_or(0.0)
    };
    let momentum_advantage = momentum(side1) - momentum(side2);

    vec![
        FactorScore {
            name: "ranking_elo",
            weight: W_RANKING_ELO,
            advantage: elo_advantage,
        },
        FactorScore {
            name: "form",
            weight: W_FORM,
            advantage: form_advantage,
        },
        FactorScore {
            name: "surface",
            weight: W_SURFACE,
            advantage: surface_advantage,
        },
        FactorScore {
            name: "head_to_head",
            weight: W_H2H,
            advantage: h2h,
        },
        FactorScore {
            name: "fatigue",
            weight: W_FATIGUE,
            advantage: fatigue_advantage,
        },
        FactorScore {
            name: "injury",
            weight: W_INJURY,
            advantage: injury_advantage,
        },
        FactorScore {
            name: "opponent_quality",
            weight: W_OPP_QUALITY,
            advantage: quality_advantage,
        },
        FactorScore {
            name: "recency",
            weight: W_RECENCY,
            advantage: recency_advantage,
        },
        FactorScore {
            name: "recent_loss",
            weight: W_RECENT_LOSS,
            advantage: recent_loss_advantage,
        },
        FactorScore {
            name: "momentum",
            weight: W_MOMENTUM,
            advantage: momentum_advantage,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchRecord, Player};
    use crate::store::MatchInsert;

    fn store() -> TennisStore {
        TennisStore::open_in_memory().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn seed_match(s: &TennisStore, id: &str, date: NaiveDate, winner: i64, loser: i64) {
        let m = MatchRecord {
            id: id.into(),
            date,
            tournament: "ATP Test Open".into(),
            surface: Some(Surface::Hard),
            round: None,
            winner_id: winner,
            loser_id: loser,
            winner_rank: Some(50),
            loser_rank: Some(50),
            score: Some("6-4 6-4".into()),
            minutes: Some(90),
            best_of: Some(3),
        };
        assert_eq!(s.insert_match(&m, "test").unwrap(), MatchInsert::Inserted);
    }

    #[test]
    fn weights_sum_to_one() {
        let total = W_RANKING_ELO
            + W_FORM
            + W_SURFACE
            + W_H2H
            + W_FATIGUE
            + W_INJURY
            + W_OPP_QUALITY
            + W_RECENCY
            + W_RECENT_LOSS
            + W_MOMENTUM;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn symmetric_players_split_even() {
        let s = store();
        s.upsert_player(&Player::new(1, "A One").with_ranking(40)).unwrap();
        s.upsert_player(&Player::new(2, "B Two").with_ranking(40)).unwrap();

        let analyzer = MatchAnalyzer::new(&s);
        let p = analyzer
            .calculate_win_probability_at(1, 2, Surface::Hard, today())
            .unwrap();
        assert!((p.p1_probability - 0.5).abs() < 1e-9);
        assert!((p.p2_probability - 0.5).abs() < 1e-9);
    }

    #[test]
    fn probabilities_complement_when_sides_swap() {
        let s = store();
        s.upsert_player(&Player::new(1, "A One").with_ranking(10)).unwrap();
        s.upsert_player(&Player::new(2, "B Two").with_ranking(120)).unwrap();
        seed_match(&s, "m1", today() - Duration::days(5), 1, 2);
        seed_match(&s, "m2", today() - Duration::days(12), 1, 2);

        let analyzer = MatchAnalyzer::new(&s);
        let ab = analyzer
            .calculate_win_probability_at(1, 2, Surface::Hard, today())
            .unwrap();
        let ba = analyzer
            .calculate_win_probability_at(2, 1, Surface::Hard, today())
            .unwrap();
        assert!((ab.p1_probability + ba.p1_probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn probabilities_stay_clamped() {
        let s = store();
        s.upsert_player(&Player::new(1, "Top Seed").with_ranking(1)).unwrap();
        s.upsert_player(&Player::new(2, "Qualifier").with_ranking(1800)).unwrap();
        // Pile on history so every factor leans the same way.
        for i in 0..10 {
            seed_match(&s, &format!("w{}", i), today() - Duration::days(3 + i), 1, 2);
        }

        let analyzer = MatchAnalyzer::new(&s);
        let p = analyzer
            .calculate_win_probability_at(1, 2, Surface::Hard, today())
            .unwrap();
        assert!(p.p1_probability <= PROB_CEIL);
        assert!(p.p2_probability >= 1.0 - PROB_CEIL - 1e-12);
        assert!((p.p1_probability + p.p2_probability - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_ranks_zero_the_elo_factor() {
        let s = store();
        s.upsert_player(&Player::new(1, "A One")).unwrap();
        s.upsert_player(&Player::new(2, "B Two")).unwrap();

        let analyzer = MatchAnalyzer::new(&s);
        let p = analyzer
            .calculate_win_probability_at(1, 2, Surface::Hard, today())
            .unwrap();
        let elo = p.factors.iter().find(|f| f.name == "ranking_elo").unwrap();
        assert_eq!(elo.advantage, 0.0);
        assert!((p.p1_probability - 0.5).abs() < 1e-9);
    }

    #[test]
    fn head_to_head_tilts_the_blend() {
        let s = store();
        s.upsert_player(&Player::new(1, "A One").with_ranking(40)).unwrap();
        s.upsert_player(&Player::new(2, "B Two").with_ranking(40)).unwrap();
        // Old enough to fall outside fatigue windows, inside the year.
        seed_match(&s, "h1", today() - Duration::days(200), 1, 2);
        seed_match(&s, "h2", today() - Duration::days(210), 1, 2);
        seed_match(&s, "h3", today() - Duration::days(220), 1, 2);

        let analyzer = MatchAnalyzer::new(&s);
        let p = analyzer
            .calculate_win_probability_at(1, 2, Surface::Hard, today())
            .unwrap();
        let h2h = p.factors.iter().find(|f| f.name == "head_to_head").unwrap();
        assert_eq!(h2h.advantage, 1.0);
        assert!(p.p1_probability > 0.5);
    }

    #[test]
    fn unknown_players_fall_back_to_even() {
        let s = store();
        let analyzer = MatchAnalyzer::new(&s);
        let p = analyzer
            .calculate_win_probability_at(991, 992, Surface::Clay, today())
            .unwrap();
        assert!((p.p1_probability - 0.5).abs() < 1e-9);
    }
}
