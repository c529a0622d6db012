use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Court surfaces (closed set; everything is normalized into one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Surface {
    Hard,
    Clay,
    Grass,
    Carpet,
}

impl Surface {
    pub const ALL: [Surface; 4] = [Surface::Hard, Surface::Clay, Surface::Grass, Surface::Carpet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Hard => "Hard",
            Surface::Clay => "Clay",
            Surface::Grass => "Grass",
            Surface::Carpet => "Carpet",
        }
    }

    /// Normalize a free-form surface string. Returns None for unknown values.
    pub fn parse(s: &str) -> Option<Surface> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "hard" | "indoor hard" | "outdoor hard" | "i. hard" => Some(Surface::Hard),
            "clay" | "red clay" | "green clay" => Some(Surface::Clay),
            "grass" => Some(Surface::Grass),
            "carpet" | "indoor carpet" => Some(Surface::Carpet),
            _ => None,
        }
    }
}

/// Tournament importance class. Drives Elo K-factors and model gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TourLevel {
    GrandSlam,
    Masters,
    Atp,
    Wta,
    Challenger,
    Itf,
    Unknown,
}

impl TourLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourLevel::GrandSlam => "Grand Slam",
            TourLevel::Masters => "Masters",
            TourLevel::Atp => "ATP",
            TourLevel::Wta => "WTA",
            TourLevel::Challenger => "Challenger",
            TourLevel::Itf => "ITF",
            TourLevel::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tour {
    Atp,
    Wta,
}

impl Tour {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tour::Atp => "ATP",
            Tour::Wta => "WTA",
        }
    }

    pub fn parse(s: &str) -> Option<Tour> {
        match s.trim().to_uppercase().as_str() {
            "ATP" => Some(Tour::Atp),
            "WTA" => Some(Tour::Wta),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    Left,
    Right,
    Unknown,
}

impl Hand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hand::Left => "L",
            Hand::Right => "R",
            Hand::Unknown => "U",
        }
    }

    pub fn parse(s: &str) -> Hand {
        match s.trim().to_uppercase().as_str() {
            "L" => Hand::Left,
            "R" => Hand::Right,
            _ => Hand::Unknown,
        }
    }
}

/// A rostered player. `id` is stable and positive for canonical records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    pub hand: Hand,
    pub height_cm: Option<i64>,
    pub date_of_birth: Option<NaiveDate>,
    pub current_ranking: Option<i64>,
    pub peak_ranking: Option<i64>,
    pub tour: Option<Tour>,
    pub performance_elo: Option<f64>,
    pub performance_rank: Option<i64>,
}

impl Player {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            country: None,
            hand: Hand::Unknown,
            height_cm: None,
            date_of_birth: None,
            current_ranking: None,
            peak_ranking: None,
            tour: None,
            performance_elo: None,
            performance_rank: None,
        }
    }

    pub fn with_ranking(mut self, ranking: i64) -> Self {
        self.current_ranking = Some(ranking);
        self
    }

    pub fn with_tour(mut self, tour: Tour) -> Self {
        self.tour = Some(tour);
        self
    }
}

/// Reference to a player as seen by ingestion. Markets arrive with free-form
/// names; a side stays `Unresolved` until the resolver (or a manual mapping)
/// produces a canonical id. No placeholder rows are ever fabricated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerRef {
    Canonical(i64),
    Unresolved(String),
}

impl PlayerRef {
    pub fn id(&self) -> Option<i64> {
        match self {
            PlayerRef::Canonical(id) => Some(*id),
            PlayerRef::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, PlayerRef::Canonical(_))
    }
}

/// A completed match. Idempotent by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub date: NaiveDate,
    pub tournament: String,
    pub surface: Option<Surface>,
    pub round: Option<String>,
    pub winner_id: i64,
    pub loser_id: i64,
    pub winner_rank: Option<i64>,
    pub loser_rank: Option<i64>,
    pub score: Option<String>,
    pub minutes: Option<i64>,
    pub best_of: Option<i64>,
}

impl MatchRecord {
    /// Number of sets actually played, parsed from the score string.
    pub fn sets_played(&self) -> Option<i64> {
        let score = self.score.as_deref()?;
        let sets = score
            .split_whitespace()
            .filter(|s| s.contains('-'))
            .count() as i64;
        if sets > 0 {
            Some(sets)
        } else {
            None
        }
    }
}

/// A captured match-winner market snapshot. Transient: overwritten each
/// capture cycle keyed by `market_id`. Player order is fixed at first capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingMatch {
    pub market_id: String,
    pub tournament: String,
    pub start_time: NaiveDateTime,
    pub surface: Surface,
    pub player1: PlayerRef,
    pub player2: PlayerRef,
    pub player1_name: String,
    pub player2_name: String,
    pub player1_odds: f64,
    pub player2_odds: f64,
    pub player1_liquidity: Option<f64>,
    pub player2_liquidity: Option<f64>,
    pub total_matched: Option<f64>,
    pub sharp_p1_odds: Option<f64>,
    pub sharp_p2_odds: Option<f64>,
    pub captured_at: NaiveDateTime,
}

impl UpcomingMatch {
    pub fn description(&self) -> String {
        format!("{} vs {}", self.player1_name, self.player2_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetResult {
    Win,
    Loss,
    Void,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Win => "Win",
            BetResult::Loss => "Loss",
            BetResult::Void => "Void",
        }
    }

    pub fn parse(s: &str) -> Option<BetResult> {
        match s {
            "Win" => Some(BetResult::Win),
            "Loss" => Some(BetResult::Loss),
            "Void" => Some(BetResult::Void),
            _ => None,
        }
    }
}

/// Which strategy gate a bet qualified under. Gates are disjoint and
/// dispatched in declaration order; a candidate matching none is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetModel {
    /// Strong favorite with a solid edge at a meaningful tournament.
    Favorite,
    /// Coin-flip matchup where the market underprices our side.
    EvenMatch,
    /// Outsider against a much higher-ranked opponent with a large edge.
    Underdog,
    None,
}

impl BetModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetModel::Favorite => "Favorite",
            BetModel::EvenMatch => "EvenMatch",
            BetModel::Underdog => "Underdog",
            BetModel::None => "None",
        }
    }

    pub fn parse(s: &str) -> BetModel {
        match s {
            "Favorite" => BetModel::Favorite,
            "EvenMatch" => BetModel::EvenMatch,
            "Underdog" => BetModel::Underdog,
            _ => BetModel::None,
        }
    }
}

/// A tracked bet. Settled exactly once; `result` stays None until then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Option<i64>,
    pub match_date: String,
    pub tournament: String,
    pub match_description: String,
    pub selection: String,
    pub odds: f64,
    pub stake: f64,
    pub our_probability: Option<f64>,
    pub implied_probability: Option<f64>,
    pub ev_at_placement: Option<f64>,
    pub model: BetModel,
    pub result: Option<BetResult>,
    pub profit_loss: Option<f64>,
    pub is_live: bool,
    pub notes: Option<String>,
}

impl Bet {
    pub fn new(
        match_date: impl Into<String>,
        tournament: impl Into<String>,
        match_description: impl Into<String>,
        selection: impl Into<String>,
        odds: f64,
        stake: f64,
    ) -> Self {
        Self {
            id: None,
            match_date: match_date.into(),
            tournament: tournament.into(),
            match_description: match_description.into(),
            selection: selection.into(),
            odds,
            stake,
            our_probability: None,
            implied_probability: None,
            ev_at_placement: None,
            model: BetModel::None,
            result: None,
            profit_loss: None,
            is_live: false,
            notes: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Derived per-surface aggregate. Recomputed after bulk imports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SurfaceStats {
    pub matches_played: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: f64,
}

/// Hand-entered injury status, graded by how much it should drag on the
/// injury factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjuryStatus {
    MinorConcern,
    Moderate,
    Major,
    Recovered,
}

impl InjuryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjuryStatus::MinorConcern => "Minor Concern",
            InjuryStatus::Moderate => "Moderate",
            InjuryStatus::Major => "Major",
            InjuryStatus::Recovered => "Recovered",
        }
    }

    pub fn parse(s: &str) -> InjuryStatus {
        match s {
            "Moderate" => InjuryStatus::Moderate,
            "Major" | "Out" => InjuryStatus::Major,
            "Recovered" => InjuryStatus::Recovered,
            _ => InjuryStatus::MinorConcern,
        }
    }

    pub fn penalty(&self) -> f64 {
        match self {
            InjuryStatus::MinorConcern => 0.10,
            InjuryStatus::Moderate => 0.25,
            InjuryStatus::Major => 0.50,
            InjuryStatus::Recovered => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryRecord {
    pub id: Option<i64>,
    pub player_id: i64,
    pub injury_type: String,
    pub body_part: Option<String>,
    pub reported_date: NaiveDate,
    pub status: InjuryStatus,
    pub notes: Option<String>,
}

/// A completed match as delivered by a results feed, before name resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedMatchRecord {
    pub date: NaiveDate,
    pub tournament: String,
    pub surface: Option<Surface>,
    pub round: Option<String>,
    pub winner_name: String,
    pub loser_name: String,
    pub score: Option<String>,
    pub best_of: Option<i64>,
}
