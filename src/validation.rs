//! Pre-insert validation for completed matches.
//!
//! Critical rules reject the row; warning rules accept it but leave an audit
//! trail. Every issue, rejected or not, is appended to the store's
//! validation_log so bad feeds can be diagnosed after the fact.

use crate::models::MatchRecord;
use chrono::{Duration, NaiveDate};

/// How far in the future a match date may sit before it is rejected.
/// Result feeds occasionally deliver matches dated "tomorrow" across
/// timezones; a week is the hard cutoff.
const MAX_FUTURE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub rule: &'static str,
    pub severity: Severity,
    pub details: String,
}

impl ValidationIssue {
    fn critical(rule: &'static str, details: impl Into<String>) -> Self {
        Self {
            rule,
            severity: Severity::Critical,
            details: details.into(),
        }
    }

    fn warning(rule: &'static str, details: impl Into<String>) -> Self {
        Self {
            rule,
            severity: Severity::Warning,
            details: details.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_rejected(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }
}

/// Validate a match before insertion. `today` is injected so imports replay
/// deterministically in tests.
pub fn validate_match(m: &MatchRecord, today: NaiveDate) -> ValidationReport {
    let mut report = ValidationReport::default();

    if m.id.trim().is_empty() {
        report
            .issues
            .push(ValidationIssue::critical("missing_match_id", "empty id"));
    }

    if m.winner_id <= 0 {
        report.issues.push(ValidationIssue::critical(
            "invalid_winner_id",
            format!("winner_id is {}", m.winner_id),
        ));
    }
    if m.loser_id <= 0 {
        report.issues.push(ValidationIssue::critical(
            "invalid_loser_id",
            format!("loser_id is {}", m.loser_id),
        ));
    }
    if m.winner_id > 0 && m.winner_id == m.loser_id {
        report.issues.push(ValidationIssue::critical(
            "winner_equals_loser",
            format!("both ids are {}", m.winner_id),
        ));
    }

    if m.date > today + Duration::days(MAX_FUTURE_DAYS) {
        report.issues.push(ValidationIssue::critical(
            "far_future_date",
            format!("date {} is more than {} days ahead", m.date, MAX_FUTURE_DAYS),
        ));
    }

    if m.tournament.trim().is_empty() {
        report.issues.push(ValidationIssue::warning(
            "missing_tournament",
            format!("match {}", m.id),
        ));
    }
    if m.surface.is_none() {
        report.issues.push(ValidationIssue::warning(
            "missing_surface",
            format!("match {}", m.id),
        ));
    }
    if let Some(score) = m.score.as_deref() {
        if !score.trim().is_empty() && !looks_like_score(score) {
            report.issues.push(ValidationIssue::warning(
                "nonstandard_score",
                format!("match {}: '{}'", m.id, score),
            ));
        }
    }

    report
}

/// A score is standard when it has at least one `games-games` set token.
/// Walkovers and retirements ("W/O", "6-4 3-0 RET") pass as nonstandard or
/// partial; they are warnings, never rejections.
fn looks_like_score(score: &str) -> bool {
    score.split_whitespace().any(|token| {
        let set = token.split('(').next().unwrap_or(token);
        let mut parts = set.split('-');
        match (parts.next(), parts.next()) {
            (Some(a), Some(b)) => {
                a.chars().all(|c| c.is_ascii_digit())
                    && b.chars().all(|c| c.is_ascii_digit())
                    && !a.is_empty()
                    && !b.is_empty()
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Surface;

    fn base_match() -> MatchRecord {
        MatchRecord {
            id: "2026-01-10-open-a-b".into(),
            date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            tournament: "Test Open".into(),
            surface: Some(Surface::Hard),
            round: Some("R32".into()),
            winner_id: 1,
            loser_id: 2,
            winner_rank: Some(10),
            loser_rank: Some(20),
            score: Some("6-4 6-4".into()),
            minutes: Some(90),
            best_of: Some(3),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    #[test]
    fn clean_match_passes() {
        let report = validate_match(&base_match(), today());
        assert!(!report.is_rejected());
        assert!(report.issues.is_empty());
    }

    #[test]
    fn winner_equals_loser_rejected() {
        let mut m = base_match();
        m.loser_id = m.winner_id;
        assert!(validate_match(&m, today()).is_rejected());
    }

    #[test]
    fn zero_and_negative_ids_rejected() {
        let mut m = base_match();
        m.winner_id = 0;
        assert!(validate_match(&m, today()).is_rejected());
        let mut m = base_match();
        m.loser_id = -42;
        assert!(validate_match(&m, today()).is_rejected());
    }

    #[test]
    fn far_future_date_rejected_but_next_week_ok() {
        let mut m = base_match();
        m.date = today() + Duration::days(MAX_FUTURE_DAYS);
        assert!(!validate_match(&m, today()).is_rejected());
        m.date = today() + Duration::days(MAX_FUTURE_DAYS + 1);
        assert!(validate_match(&m, today()).is_rejected());
    }

    #[test]
    fn missing_surface_is_warning_only() {
        let mut m = base_match();
        m.surface = None;
        let report = validate_match(&m, today());
        assert!(!report.is_rejected());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn weird_score_is_warning_only() {
        let mut m = base_match();
        m.score = Some("walkover".into());
        let report = validate_match(&m, today());
        assert!(!report.is_rejected());
        assert!(report.warnings().any(|i| i.rule == "nonstandard_score"));
    }

    #[test]
    fn retirement_score_passes() {
        let mut m = base_match();
        m.score = Some("6-4 3-0 RET".into());
        let report = validate_match(&m, today());
        assert!(report.issues.is_empty());
    }
}
