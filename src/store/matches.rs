//! Completed-match storage and queries.

use super::TennisStore;
use crate::error::StoreResult;
use crate::models::{MatchRecord, Surface};
use crate::validation::{validate_match, Severity, ValidationIssue};
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, warn};

/// Outcome of a match insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchInsert {
    Inserted,
    /// Same id already present; re-insert is a no-op.
    AlreadyPresent,
    /// Failed validation; reasons are in the validation log.
    Rejected(Vec<String>),
}

const MATCH_COLUMNS: &str = "id, date, tournament, surface, round, winner_id, loser_id, \
     winner_rank, loser_rank, score, minutes, best_of";

impl TennisStore {
    /// Validate and insert a completed match. Critical violations reject the
    /// row; warnings are logged and the row is accepted. Idempotent by id.
    pub fn insert_match(&self, m: &MatchRecord, source: &str) -> StoreResult<MatchInsert> {
        let today = Utc::now().date_naive();
        let report = validate_match(m, today);

        if report.is_rejected() {
            let reasons: Vec<String> = report
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .map(|i| i.rule.to_string())
                .collect();
            warn!("rejected match {} from {}: {:?}", m.id, source, reasons);
            self.append_validation_issues(source, &report.issues)?;
            return Ok(MatchInsert::Rejected(reasons));
        }

        // Referential check: both sides must canonicalize to distinct players.
        {
            let conn = self.lock();
            let w = Self::canonical_id_locked(&conn, m.winner_id)?;
            let l = Self::canonical_id_locked(&conn, m.loser_id)?;
            if w == l {
                drop(conn);
                let issue = ValidationIssue {
                    rule: "canonical_winner_equals_loser",
                    severity: Severity::Critical,
                    details: format!(
                        "match {}: {} and {} both canonicalize to {}",
                        m.id, m.winner_id, m.loser_id, w
                    ),
                };
                self.append_validation_issues(source, &[issue])?;
                return Ok(MatchInsert::Rejected(vec![
                    "canonical_winner_equals_loser".to_string(),
                ]));
            }
        }

        let warning_issues: Vec<_> = report.issues;
        self.append_validation_issues(source, &warning_issues)?;

        let conn = self.lock();
        let changes = conn.execute(
            "INSERT OR IGNORE INTO matches \
             (id, date, tournament, surface, round, winner_id, loser_id, \
              winner_rank, loser_rank, score, minutes, best_of, source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                m.id,
                m.date.to_string(),
                m.tournament,
                m.surface.map(|s| s.as_str()),
                m.round,
                m.winner_id,
                m.loser_id,
                m.winner_rank,
                m.loser_rank,
                m.score,
                m.minutes,
                m.best_of,
                source,
            ],
        )?;

        if changes == 0 {
            debug!("match {} already present", m.id);
            Ok(MatchInsert::AlreadyPresent)
        } else {
            Ok(MatchInsert::Inserted)
        }
    }

    pub fn get_match(&self, id: &str) -> StoreResult<Option<MatchRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM matches WHERE id = ?1 LIMIT 1",
            MATCH_COLUMNS
        ))?;
        Ok(stmt.query_row([id], row_to_match).optional()?)
    }

    /// Matches for a player (any alias id counts), newest first.
    pub fn get_player_matches(
        &self,
        player_id: i64,
        since: Option<NaiveDate>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<MatchRecord>> {
        let conn = self.lock();
        let ids = Self::alias_ids_locked(&conn, player_id)?;
        let placeholders: String = (0..ids.len()).map(|_| "?").collect::<Vec<_>>().join(",");

        let since_clause = since.map(|d| d.to_string());
        let sql = format!(
            "SELECT {} FROM matches \
             WHERE (winner_id IN ({ph}) OR loser_id IN ({ph})) \
               AND (?{since_idx} IS NULL OR date >= ?{since_idx}) \
             ORDER BY date DESC, id \
             LIMIT ?{limit_idx}",
            MATCH_COLUMNS,
            ph = placeholders,
            since_idx = ids.len() * 2 + 1,
            limit_idx = ids.len() * 2 + 2,
        );

        let mut stmt = conn.prepare_cached(&sql)?;
        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() * 2 + 2);
        for _ in 0..2 {
            for id in &ids {
                values.push((*id).into());
            }
        }
        values.push(match since_clause {
            Some(d) => d.into(),
            None => rusqlite::types::Value::Null,
        });
        values.push((limit.map(|l| l as i64).unwrap_or(i64::MAX)).into());

        let matches = stmt
            .query_map(params_from_iter(values), row_to_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(matches)
    }

    /// All matches across all players in the trailing window, newest first.
    pub fn get_recent_matches(&self, days: i64) -> StoreResult<Vec<MatchRecord>> {
        let conn = self.lock();
        let cutoff = (Utc::now().date_naive() - Duration::days(days)).to_string();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM matches WHERE date >= ?1 ORDER BY date DESC, id",
            MATCH_COLUMNS
        ))?;
        let matches = stmt
            .query_map([cutoff], row_to_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(matches)
    }

    /// Head-to-head (p1 wins, p2 wins) with alias ids rolled up.
    pub fn head_to_head(&self, p1: i64, p2: i64) -> StoreResult<(i64, i64)> {
        let conn = self.lock();
        let ids1 = Self::alias_ids_locked(&conn, p1)?;
        let ids2 = Self::alias_ids_locked(&conn, p2)?;

        let ph1: String = (0..ids1.len()).map(|_| "?").collect::<Vec<_>>().join(",");
        let ph2: String = (0..ids2.len()).map(|_| "?").collect::<Vec<_>>().join(",");

        let count = |winner_ids: &[i64], loser_ids: &[i64], ph_w: &str, ph_l: &str| -> rusqlite::Result<i64> {
            let sql = format!(
                "SELECT COUNT(*) FROM matches WHERE winner_id IN ({}) AND loser_id IN ({})",
                ph_w, ph_l
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut values: Vec<rusqlite::types::Value> = Vec::new();
            for id in winner_ids {
                values.push((*id).into());
            }
            for id in loser_ids {
                values.push((*id).into());
            }
            stmt.query_row(params_from_iter(values), |row| row.get(0))
        };

        let p1_wins = count(&ids1, &ids2, &ph1, &ph2)?;
        let p2_wins = count(&ids2, &ids1, &ph2, &ph1)?;
        Ok((p1_wins, p2_wins))
    }

    /// Ids of every player appearing in a match since `cutoff`.
    pub fn active_player_ids_since(&self, cutoff: NaiveDate) -> StoreResult<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT id FROM ( \
                SELECT winner_id AS id FROM matches WHERE date >= ?1 \
                UNION \
                SELECT loser_id AS id FROM matches WHERE date >= ?1 \
             ) ORDER BY id",
        )?;
        let ids = stmt
            .query_map([cutoff.to_string()], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Admin cleanup: drop duplicate completed matches (same date, same
    /// canonicalized pairing, same tournament), keeping the smallest id.
    pub fn cleanup_duplicate_matches(&self) -> StoreResult<usize> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM matches WHERE id NOT IN ( \
                SELECT MIN(id) FROM ( \
                    SELECT m.id AS id, m.date AS date, m.tournament AS tournament, \
                           COALESCE(aw.canonical_id, m.winner_id) AS w, \
                           COALESCE(al.canonical_id, m.loser_id) AS l \
                    FROM matches m \
                    LEFT JOIN player_aliases aw ON aw.alias_id = m.winner_id \
                    LEFT JOIN player_aliases al ON al.alias_id = m.loser_id \
                ) GROUP BY date, tournament, w, l \
             )",
            [],
        )?;
        Ok(deleted)
    }

    pub fn match_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_match(row: &Row) -> rusqlite::Result<MatchRecord> {
    let date: String = row.get(1)?;
    let surface: Option<String> = row.get(3)?;
    Ok(MatchRecord {
        id: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        tournament: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        surface: surface.as_deref().and_then(Surface::parse),
        round: row.get(4)?,
        winner_id: row.get(5)?,
        loser_id: row.get(6)?,
        winner_rank: row.get(7)?,
        loser_rank: row.get(8)?,
        score: row.get(9)?,
        minutes: row.get(10)?,
        best_of: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Player;

    fn store() -> TennisStore {
        TennisStore::open_in_memory().unwrap()
    }

    fn seed_players(s: &TennisStore) {
        for (id, name) in [(1, "Alpha One"), (2, "Beta Two"), (3, "Gamma Three")] {
            s.upsert_player(&Player::new(id, name)).unwrap();
        }
    }

    fn make_match(id: &str, date: &str, winner: i64, loser: i64) -> MatchRecord {
        MatchRecord {
            id: id.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            tournament: "Test Open".into(),
            surface: Some(Surface::Hard),
            round: Some("R16".into()),
            winner_id: winner,
            loser_id: loser,
            winner_rank: Some(10),
            loser_rank: Some(40),
            score: Some("6-4 6-2".into()),
            minutes: Some(85),
            best_of: Some(3),
        }
    }

    #[test]
    fn insert_then_get_round_trip() {
        let s = store();
        seed_players(&s);
        let m = make_match("m1", "2026-01-05", 1, 2);
        assert_eq!(s.insert_match(&m, "test").unwrap(), MatchInsert::Inserted);

        let got = s.get_match("m1").unwrap().unwrap();
        assert_eq!(got.date, m.date);
        assert_eq!(got.tournament, m.tournament);
        assert_eq!(got.surface, m.surface);
        assert_eq!(got.winner_id, 1);
        assert_eq!(got.loser_id, 2);
        assert_eq!(got.score, m.score);
        assert_eq!(got.minutes, m.minutes);
    }

    #[test]
    fn reinsert_is_noop() {
        let s = store();
        seed_players(&s);
        let m = make_match("m1", "2026-01-05", 1, 2);
        s.insert_match(&m, "test").unwrap();
        assert_eq!(
            s.insert_match(&m, "test").unwrap(),
            MatchInsert::AlreadyPresent
        );
        assert_eq!(s.match_count().unwrap(), 1);
    }

    #[test]
    fn invalid_match_rejected_and_logged() {
        let s = store();
        seed_players(&s);
        let m = make_match("bad", "2026-01-05", 1, 1);
        match s.insert_match(&m, "test").unwrap() {
            MatchInsert::Rejected(reasons) => {
                assert!(reasons.contains(&"winner_equals_loser".to_string()));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(s.match_count().unwrap(), 0);
        assert!(s.validation_log_count().unwrap() > 0);
    }

    #[test]
    fn aliased_pair_rejected() {
        let s = store();
        seed_players(&s);
        s.add_player_alias(2, 1, "test").unwrap();
        let m = make_match("bad2", "2026-01-05", 1, 2);
        assert!(matches!(
            s.insert_match(&m, "test").unwrap(),
            MatchInsert::Rejected(_)
        ));
    }

    #[test]
    fn player_matches_include_alias_ids() {
        let s = store();
        seed_players(&s);
        s.insert_match(&make_match("m1", "2026-01-05", 3, 2), "test")
            .unwrap();
        s.add_player_alias(3, 1, "test").unwrap();

        // Query by canonical id finds the match recorded under the alias.
        let matches = s.get_player_matches(1, None, None).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "m1");
    }

    #[test]
    fn head_to_head_counts_both_directions() {
        let s = store();
        seed_players(&s);
        s.insert_match(&make_match("m1", "2026-01-05", 1, 2), "test")
            .unwrap();
        s.insert_match(&make_match("m2", "2026-01-12", 1, 2), "test")
            .unwrap();
        s.insert_match(&make_match("m3", "2026-01-20", 2, 1), "test")
            .unwrap();
        assert_eq!(s.head_to_head(1, 2).unwrap(), (2, 1));
        assert_eq!(s.head_to_head(2, 1).unwrap(), (1, 2));
    }

    #[test]
    fn cleanup_keeps_one_of_each_pairing() {
        let s = store();
        seed_players(&s);
        s.insert_match(&make_match("m1", "2026-01-05", 1, 2), "test")
            .unwrap();
        s.insert_match(&make_match("m2", "2026-01-05", 1, 2), "test")
            .unwrap();
        let deleted = s.cleanup_duplicate_matches().unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(s.match_count().unwrap(), 1);
    }
}
