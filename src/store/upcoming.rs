//! Upcoming-market snapshots.
//!
//! Rows are transient: each capture cycle overwrites by market id. The player
//! order fixed at first capture is preserved across updates, so a feed that
//! flips runner order cannot silently swap the odds between sides.

use super::TennisStore;
use crate::error::StoreResult;
use crate::models::{PlayerRef, Surface, UpcomingMatch};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

const UPCOMING_COLUMNS: &str = "market_id, tournament, start_time, surface, player1_id, player2_id, \
     player1_name, player2_name, player1_odds, player2_odds, \
     player1_liquidity, player2_liquidity, total_matched, \
     sharp_p1_odds, sharp_p2_odds, captured_at";

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

impl TennisStore {
    /// Insert or refresh a market snapshot. If an existing row has the same
    /// players in the opposite order, the incoming sides are swapped so the
    /// stored orientation never changes.
    pub fn upsert_upcoming_match(&self, m: &UpcomingMatch) -> StoreResult<()> {
        let conn = self.lock();

        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT player1_name, player2_name FROM upcoming_matches WHERE market_id = ?1",
                [&m.market_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let mut row = m.clone();
        if let Some((p1_name, p2_name)) = existing {
            let swapped = p1_name == m.player2_name && p2_name == m.player1_name;
            if swapped {
                debug!("market {}: runner order flipped upstream, re-aligning", m.market_id);
                row = UpcomingMatch {
                    player1: m.player2.clone(),
                    player2: m.player1.clone(),
                    player1_name: m.player2_name.clone(),
                    player2_name: m.player1_name.clone(),
                    player1_odds: m.player2_odds,
                    player2_odds: m.player1_odds,
                    player1_liquidity: m.player2_liquidity,
                    player2_liquidity: m.player1_liquidity,
                    sharp_p1_odds: m.sharp_p2_odds,
                    sharp_p2_odds: m.sharp_p1_odds,
                    ..m.clone()
                };
            }
        }

        conn.execute(
            "INSERT INTO upcoming_matches \
             (market_id, tournament, start_time, surface, player1_id, player2_id, \
              player1_name, player2_name, player1_odds, player2_odds, \
              player1_liquidity, player2_liquidity, total_matched, \
              sharp_p1_odds, sharp_p2_odds, captured_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
             ON CONFLICT(market_id) DO UPDATE SET \
                tournament = excluded.tournament, \
                start_time = excluded.start_time, \
                surface = excluded.surface, \
                player1_id = COALESCE(excluded.player1_id, player1_id), \
                player2_id = COALESCE(excluded.player2_id, player2_id), \
                player1_odds = excluded.player1_odds, \
                player2_odds = excluded.player2_odds, \
                player1_liquidity = excluded.player1_liquidity, \
                player2_liquidity = excluded.player2_liquidity, \
                total_matched = excluded.total_matched, \
                sharp_p1_odds = COALESCE(excluded.sharp_p1_odds, sharp_p1_odds), \
                sharp_p2_odds = COALESCE(excluded.sharp_p2_odds, sharp_p2_odds), \
                captured_at = excluded.captured_at",
            params![
                row.market_id,
                row.tournament,
                row.start_time.format(DATETIME_FMT).to_string(),
                row.surface.as_str(),
                row.player1.id(),
                row.player2.id(),
                row.player1_name,
                row.player2_name,
                row.player1_odds,
                row.player2_odds,
                row.player1_liquidity,
                row.player2_liquidity,
                row.total_matched,
                row.sharp_p1_odds,
                row.sharp_p2_odds,
                row.captured_at.format(DATETIME_FMT).to_string(),
            ],
        )?;
        Ok(())
    }

    /// All captured markets, soonest first.
    pub fn get_upcoming_matches(&self) -> StoreResult<Vec<UpcomingMatch>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM upcoming_matches ORDER BY start_time ASC, market_id",
            UPCOMING_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_upcoming)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_upcoming_match(&self, market_id: &str) -> StoreResult<Option<UpcomingMatch>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM upcoming_matches WHERE market_id = ?1",
            UPCOMING_COLUMNS
        ))?;
        Ok(stmt.query_row([market_id], row_to_upcoming).optional()?)
    }

    /// Drop markets whose start time is long past; they can never settle a
    /// new suggestion.
    pub fn delete_stale_upcoming(&self, older_than_hours: i64) -> StoreResult<usize> {
        let conn = self.lock();
        let cutoff = (Utc::now().naive_utc() - chrono::Duration::hours(older_than_hours))
            .format(DATETIME_FMT)
            .to_string();
        let deleted = conn.execute(
            "DELETE FROM upcoming_matches WHERE start_time < ?1",
            [cutoff],
        )?;
        Ok(deleted)
    }

    pub fn upcoming_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM upcoming_matches", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_upcoming(row: &Row) -> rusqlite::Result<UpcomingMatch> {
    let start: String = row.get(2)?;
    let surface: String = row.get(3)?;
    let captured: String = row.get(15)?;
    let p1_id: Option<i64> = row.get(4)?;
    let p2_id: Option<i64> = row.get(5)?;
    let p1_name: String = row.get(6)?;
    let p2_name: String = row.get(7)?;

    let parse_dt = |s: &str| {
        NaiveDateTime::parse_from_str(s, DATETIME_FMT)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
    };

    Ok(UpcomingMatch {
        market_id: row.get(0)?,
        tournament: row.get(1)?,
        start_time: parse_dt(&start)?,
        surface: Surface::parse(&surface).unwrap_or(Surface::Hard),
        player1: match p1_id {
            Some(id) => PlayerRef::Canonical(id),
            None => PlayerRef::Unresolved(p1_name.clone()),
        },
        player2: match p2_id {
            Some(id) => PlayerRef::Canonical(id),
            None => PlayerRef::Unresolved(p2_name.clone()),
        },
        player1_name: p1_name,
        player2_name: p2_name,
        player1_odds: row.get(8)?,
        player2_odds: row.get(9)?,
        player1_liquidity: row.get(10)?,
        player2_liquidity: row.get(11)?,
        total_matched: row.get(12)?,
        sharp_p1_odds: row.get(13)?,
        sharp_p2_odds: row.get(14)?,
        captured_at: parse_dt(&captured)?,
    })
}
