//! Per-factor computations for the win-probability model.
//!
//! Every function here is pure: it sees a player's match history (newest
//! first), knows which of those matches the player won, and produces either
//! a score or None when the data is insufficient. Insufficient data means
//! the factor contributes zero advantage; its weight is never redistributed.

use crate::models::{InjuryRecord, MatchRecord, Surface, SurfaceStats};
use chrono::NaiveDate;

/// Matches considered for the form score.
const FORM_WINDOW: usize = 10;
/// Matches considered for opponent quality.
const QUALITY_WINDOW: usize = 6;
/// Bonus for a win over an opponent ranked at least this many places better.
const FORM_UPSET_MARGIN: i64 = 20;
const FORM_UPSET_BONUS: f64 = 4.0;
/// Penalty for a loss to an opponent ranked at least this many places worse.
const FORM_BAD_LOSS_MARGIN: i64 = 50;
const FORM_BAD_LOSS_PENALTY: f64 = 6.0;

/// 0-100 form score over the last ten matches.
#[derive(Debug, Clone, Copy)]
pub struct FormScore {
    pub score: f64,
    pub wins: usize,
    pub losses: usize,
}

pub fn form_score<F>(
    matches: &[MatchRecord],
    won: F,
    player_rank: Option<i64>,
) -> Option<FormScore>
where
    F: Fn(&MatchRecord) -> bool,
{
    let window = &matches[..matches.len().min(FORM_WINDOW)];
    if window.is_empty() {
        return None;
    }

    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut adjustment = 0.0;

    for m in window {
        let is_win = won(m);
        let opp_rank = if is_win { m.loser_rank } else { m.winner_rank };
        if is_win {
            wins += 1;
            if let (Some(own), Some(opp)) = (player_rank, opp_rank) {
                if opp <= own - FORM_UPSET_MARGIN {
                    adjustment += FORM_UPSET_BONUS;
                }
            }
        } else {
            losses += 1;
            if let (Some(own), Some(opp)) = (player_rank, opp_rank) {
                if opp >= own + FORM_BAD_LOSS_MARGIN {
                    adjustment -= FORM_BAD_LOSS_PENALTY;
                }
            }
        }
    }

    let base = 100.0 * wins as f64 / (wins + losses) as f64;
    Some(FormScore {
        score: (base + adjustment).clamp(0.0, 100.0),
        wins,
        losses,
    })
}

/// Combined surface win rate: 60% career, 40% trailing-year on the surface.
/// Falls back to whichever component exists; None when neither does.
pub fn combined_surface_rate(
    career: &SurfaceStats,
    recent_matches: &[MatchRecord],
    won: impl Fn(&MatchRecord) -> bool,
    surface: Surface,
) -> Option<f64> {
    let career_rate = if career.matches_played > 0 {
        Some(career.win_rate)
    } else {
        None
    };

    let on_surface: Vec<&MatchRecord> = recent_matches
        .iter()
        .filter(|m| m.surface == Some(surface))
        .collect();
    let recent_rate = if on_surface.is_empty() {
        None
    } else {
        let wins = on_surface.iter().filter(|m| won(m)).count();
        Some(wins as f64 / on_surface.len() as f64)
    };

    match (career_rate, recent_rate) {
        (Some(c), Some(r)) => Some(0.6 * c + 0.4 * r),
        (Some(c), None) => Some(c),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

/// Head-to-head advantage: (p1 wins - p2 wins) / total, zero without history.
pub fn h2h_advantage(p1_wins: i64, p2_wins: i64) -> f64 {
    let total = p1_wins + p2_wins;
    if total == 0 {
        0.0
    } else {
        (p1_wins - p2_wins) as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatigueBucket {
    Fresh,
    Good,
    Moderate,
    Tired,
}

impl FatigueBucket {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            FatigueBucket::Fresh
        } else if score >= 50.0 {
            FatigueBucket::Good
        } else if score >= 30.0 {
            FatigueBucket::Moderate
        } else {
            FatigueBucket::Tired
        }
    }
}

/// Fatigue score: start at 100, subtract 8 per match in the last 7 days and
/// 2 per match in the last 30, and 10 more when the last match was under a
/// day ago. A player with no recent matches is fully fresh.
pub fn fatigue_score(matches: &[MatchRecord], today: NaiveDate) -> f64 {
    let mut score: f64 = 100.0;
    let mut last_match_days: Option<i64> = None;

    for m in matches {
        let days_ago = (today - m.date).num_days();
        if days_ago < 0 {
            continue;
        }
        if days_ago <= 7 {
            score -= 8.0;
        }
        if days_ago <= 30 {
            score -= 2.0;
        }
        last_match_days = Some(match last_match_days {
            Some(d) => d.min(days_ago),
            None => days_ago,
        });
    }

    if matches!(last_match_days, Some(d) if d < 1) {
        score -= 10.0;
    }

    score.clamp(0.0, 100.0)
}

/// Time decay applied to recent results.
pub fn recency_weight(days_ago: i64) -> f64 {
    if days_ago <= 7 {
        1.0
    } else if days_ago <= 30 {
        0.7
    } else if days_ago <= 90 {
        0.4
    } else {
        0.2
    }
}

/// Quality-weighted recent results over the last six matches. Beating a
/// top-ranked opponent recently counts the most; the result is normalized to
/// [-1, 1]. None without any matches.
pub fn opponent_quality(
    matches: &[MatchRecord],
    won: impl Fn(&MatchRecord) -> bool,
    today: NaiveDate,
) -> Option<f64> {
    let window = &matches[..matches.len().min(QUALITY_WINDOW)];
    if window.is_empty() {
        return None;
    }

    let mut signed = 0.0;
    let mut total = 0.0;
    for m in window {
        let is_win = won(m);
        let opp_rank = if is_win { m.loser_rank } else { m.winner_rank };
        let opp_rank = opp_rank.filter(|r| *r > 0).unwrap_or(200).min(200);
        let quality = 1.0 + (200 - opp_rank) as f64 / 200.0;
        let days_ago = (today - m.date).num_days().max(0);
        let weight = quality * recency_weight(days_ago);

        total += weight;
        signed += if is_win { weight } else { -weight };
    }

    if total > 0.0 {
        Some(signed / total)
    } else {
        None
    }
}

/// Time-weighted recent results in [-1, 1]; None without any matches.
pub fn recency_score(
    matches: &[MatchRecord],
    won: impl Fn(&MatchRecord) -> bool,
    today: NaiveDate,
) -> Option<f64> {
    let window = &matches[..matches.len().min(FORM_WINDOW)];
    if window.is_empty() {
        return None;
    }

    let mut signed = 0.0;
    let mut total = 0.0;
    for m in window {
        let days_ago = (today - m.date).num_days().max(0);
        let weight = recency_weight(days_ago);
        total += weight;
        signed += if won(m) { weight } else { -weight };
    }

    if total > 0.0 {
        Some(signed / total)
    } else {
        None
    }
}

/// Was this a draining defeat: went the full best-of-5 distance, or dragged
/// past three hours.
fn is_long_loss(m: &MatchRecord) -> bool {
    let went_distance = matches!(
        (m.best_of, m.sets_played()),
        (Some(5), Some(sets)) if sets == 5
    );
    went_distance || m.minutes.map_or(false, |mins| mins >= 180)
}

/// Penalty for a fresh defeat: 0.10 inside 3 days, 0.05 inside 7, plus 0.05
/// when that defeat was a long one.
pub fn recent_loss_penalty(
    matches: &[MatchRecord],
    won: impl Fn(&MatchRecord) -> bool,
    today: NaiveDate,
) -> f64 {
    let Some(last) = matches.first() else {
        return 0.0;
    };
    if won(last) {
        return 0.0;
    }

    let days_ago = (today - last.date).num_days();
    let mut penalty = if days_ago <= 3 {
        0.10
    } else if days_ago <= 7 {
        0.05
    } else {
        0.0
    };
    if days_ago <= 7 && is_long_loss(last) {
        penalty += 0.05;
    }
    penalty
}

/// Momentum: 0.03 per win on the same surface in the last 14 days, capped at
/// 0.10.
pub fn momentum_bonus(
    matches: &[MatchRecord],
    won: impl Fn(&MatchRecord) -> bool,
    surface: Surface,
    today: NaiveDate,
) -> f64 {
    let mut bonus: f64 = 0.0;
    for m in matches {
        let days_ago = (today - m.date).num_days();
        if days_ago < 0 || days_ago > 14 {
            continue;
        }
        if m.surface == Some(surface) && won(m) {
            bonus += 0.03;
        }
    }
    bonus.min(0.10)
}

/// Worst active injury drives the penalty.
pub fn injury_penalty(injuries: &[InjuryRecord]) -> f64 {
    injuries
        .iter()
        .map(|i| i.status.penalty())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InjuryStatus;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn make(id: &str, date: NaiveDate, winner: i64, loser: i64) -> MatchRecord {
        MatchRecord {
            id: id.into(),
            date,
            tournament: "ATP Test".into(),
            surface: Some(Surface::Hard),
            round: None,
            winner_id: winner,
            loser_id: loser,
            winner_rank: Some(30),
            loser_rank: Some(60),
            score: Some("6-4 6-4".into()),
            minutes: Some(95),
            best_of: Some(3),
        }
    }

    const ME: i64 = 1;
    fn won(m: &MatchRecord) -> bool {
        m.winner_id == ME
    }

    #[test]
    fn form_is_win_share_when_ranks_are_flat() {
        let matches: Vec<MatchRecord> = (0..10)
            .map(|i| {
                let winner = if i < 7 { ME } else { 2 };
                let loser = if i < 7 { 2 } else { ME };
                let mut m = make(&format!("m{}", i), day(20 - i as u32), winner, loser);
                m.winner_rank = Some(50);
                m.loser_rank = Some(50);
                m
            })
            .collect();
        let form = form_score(&matches, won, Some(50)).unwrap();
        assert_eq!(form.wins, 7);
        assert_eq!(form.losses, 3);
        assert!((form.score - 70.0).abs() < 1e-9);
    }

    #[test]
    fn upset_wins_lift_form_bad_losses_sink_it() {
        // One win over a much better-ranked opponent.
        let mut upset = make("m1", day(20), ME, 2);
        upset.loser_rank = Some(5);
        let form_up = form_score(std::slice::from_ref(&upset), won, Some(50)).unwrap();
        assert!(form_up.score >= 100.0 - 1e-9);

        // One loss to a much worse-ranked opponent.
        let mut bad = make("m2", day(20), 2, ME);
        bad.winner_rank = Some(150);
        let form_down = form_score(std::slice::from_ref(&bad), won, Some(50)).unwrap();
        assert_eq!(form_down.score, 0.0);
    }

    #[test]
    fn no_matches_no_form() {
        assert!(form_score(&[], won, Some(50)).is_none());
    }

    #[test]
    fn fatigue_buckets() {
        assert_eq!(FatigueBucket::from_score(100.0), FatigueBucket::Fresh);
        assert_eq!(FatigueBucket::from_score(60.0), FatigueBucket::Good);
        assert_eq!(FatigueBucket::from_score(40.0), FatigueBucket::Moderate);
        assert_eq!(FatigueBucket::from_score(10.0), FatigueBucket::Tired);
    }

    #[test]
    fn fatigue_drains_with_schedule() {
        let today = day(20);
        assert_eq!(fatigue_score(&[], today), 100.0);

        // Three matches this week: 3 * (8 + 2) = 30 off.
        let busy: Vec<MatchRecord> = (0..3)
            .map(|i| make(&format!("m{}", i), day(15 + i), ME, 2))
            .collect();
        assert!((fatigue_score(&busy, today) - 70.0).abs() < 1e-9);

        // Played today as well: another 8 + 2 + 10.
        let mut brutal = busy.clone();
        brutal.push(make("m9", today, ME, 2));
        assert!((fatigue_score(&brutal, today) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn recency_weights_step_down() {
        assert_eq!(recency_weight(3), 1.0);
        assert_eq!(recency_weight(20), 0.7);
        assert_eq!(recency_weight(60), 0.4);
        assert_eq!(recency_weight(120), 0.2);
    }

    #[test]
    fn opponent_quality_rewards_beating_the_elite() {
        let today = day(20);
        let mut beat_top = make("m1", day(18), ME, 2);
        beat_top.loser_rank = Some(1);
        let mut beat_journeyman = make("m2", day(18), ME, 3);
        beat_journeyman.loser_rank = Some(190);

        let elite = opponent_quality(std::slice::from_ref(&beat_top), won, today).unwrap();
        let modest =
            opponent_quality(std::slice::from_ref(&beat_journeyman), won, today).unwrap();
        // Both are pure wins so both normalize to 1.0; mixed records separate.
        assert_eq!(elite, 1.0);
        assert_eq!(modest, 1.0);

        let mixed = vec![beat_top, make("m3", day(17), 4, ME)];
        let score = opponent_quality(&mixed, won, today).unwrap();
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn recent_loss_penalty_scales_with_freshness() {
        let today = day(20);
        let fresh_loss = vec![make("m1", day(19), 2, ME)];
        assert!((recent_loss_penalty(&fresh_loss, won, today) - 0.10).abs() < 1e-9);

        let week_old = vec![make("m1", day(14), 2, ME)];
        assert!((recent_loss_penalty(&week_old, won, today) - 0.05).abs() < 1e-9);

        let stale = vec![make("m1", day(1), 2, ME)];
        assert_eq!(recent_loss_penalty(&stale, won, today), 0.0);

        let win = vec![make("m1", day(19), ME, 2)];
        assert_eq!(recent_loss_penalty(&win, won, today), 0.0);
    }

    #[test]
    fn long_loss_adds_extra() {
        let today = day(20);
        let mut marathon = make("m1", day(19), 2, ME);
        marathon.best_of = Some(5);
        marathon.score = Some("6-4 4-6 6-4 4-6 6-4".into());
        let matches = vec![marathon];
        assert!((recent_loss_penalty(&matches, won, today) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn momentum_counts_same_surface_wins_only() {
        let today = day(20);
        let mut matches = vec![
            make("m1", day(18), ME, 2),
            make("m2", day(16), ME, 3),
            make("m3", day(14), 4, ME),
        ];
        matches[1].surface = Some(Surface::Clay);

        let hard = momentum_bonus(&matches, won, Surface::Hard, today);
        assert!((hard - 0.03).abs() < 1e-9);
        let clay = momentum_bonus(&matches, won, Surface::Clay, today);
        assert!((clay - 0.03).abs() < 1e-9);
    }

    #[test]
    fn momentum_caps_at_ten_points() {
        let today = day(20);
        let matches: Vec<MatchRecord> = (0..5)
            .map(|i| make(&format!("m{}", i), day(15 + i as u32), ME, 2))
            .collect();
        assert!((momentum_bonus(&matches, won, Surface::Hard, today) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn injury_penalty_takes_worst() {
        let injuries = vec![
            InjuryRecord {
                id: None,
                player_id: 1,
                injury_type: "ankle sprain".into(),
                body_part: Some("Ankle".into()),
                reported_date: day(1),
                status: InjuryStatus::MinorConcern,
                notes: None,
            },
            InjuryRecord {
                id: None,
                player_id: 1,
                injury_type: "shoulder".into(),
                body_part: Some("Shoulder".into()),
                reported_date: day(10),
                status: InjuryStatus::Major,
                notes: None,
            },
        ];
        assert_eq!(injury_penalty(&injuries), 0.50);
        assert_eq!(injury_penalty(&[]), 0.0);
    }

    #[test]
    fn surface_rate_blends_career_and_recent() {
        let career = SurfaceStats {
            matches_played: 100,
            wins: 60,
            losses: 40,
            win_rate: 0.6,
        };
        let recent = vec![make("m1", day(10), ME, 2), make("m2", day(12), 3, ME)];
        let rate = combined_surface_rate(&career, &recent, won, Surface::Hard).unwrap();
        assert!((rate - (0.6 * 0.6 + 0.4 * 0.5)).abs() < 1e-9);

        // No data at all on carpet.
        assert!(combined_surface_rate(
            &SurfaceStats::default(),
            &recent,
            won,
            Surface::Carpet
        )
        .is_none());
    }
}
