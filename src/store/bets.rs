//! Bet tracking: placement, duplicate suppression, settlement.

use super::TennisStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{Bet, BetModel, BetResult};
use crate::suggest::calculate_bet_model;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

const BET_COLUMNS: &str = "id, match_date, tournament, match_description, selection, odds, stake, \
     our_probability, implied_probability, ev_at_placement, model, result, \
     profit_loss, is_live, notes";

impl TennisStore {
    /// Persist a new bet with no result. A bet for the same
    /// (description, selection, date, tournament) is rejected as a duplicate.
    pub fn add_bet(&self, bet: &Bet) -> StoreResult<i64> {
        if self.check_duplicate_bet(
            &bet.match_description,
            &bet.selection,
            &bet.match_date,
            &bet.tournament,
        )? {
            return Err(StoreError::InvalidData(format!(
                "duplicate bet: {} / {}",
                bet.match_description, bet.selection
            )));
        }

        let conn = self.lock();
        conn.execute(
            "INSERT INTO bets \
             (match_date, tournament, match_description, selection, odds, stake, \
              our_probability, implied_probability, ev_at_placement, model, \
              result, profit_loss, is_live, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                bet.match_date,
                bet.tournament,
                bet.match_description,
                bet.selection,
                bet.odds,
                bet.stake,
                bet.our_probability,
                bet.implied_probability,
                bet.ev_at_placement,
                bet.model.as_str(),
                bet.result.map(|r| r.as_str()),
                bet.profit_loss,
                bet.is_live as i64,
                bet.notes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn check_duplicate_bet(
        &self,
        match_description: &str,
        selection: &str,
        match_date: &str,
        tournament: &str,
    ) -> StoreResult<bool> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM bets \
                 WHERE match_description = ?1 AND selection = ?2 \
                   AND match_date = ?3 AND tournament = ?4 \
                 LIMIT 1",
                params![match_description, selection, match_date, tournament],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_bet(&self, id: i64) -> StoreResult<Option<Bet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM bets WHERE id = ?1",
            BET_COLUMNS
        ))?;
        Ok(stmt.query_row([id], row_to_bet).optional()?)
    }

    /// Unsettled bets, earliest match first.
    pub fn pending_bets(&self) -> StoreResult<Vec<Bet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM bets WHERE result IS NULL ORDER BY match_date ASC, id",
            BET_COLUMNS
        ))?;
        let bets = stmt
            .query_map([], row_to_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }

    pub fn list_bets(&self, limit: usize) -> StoreResult<Vec<Bet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM bets ORDER BY id DESC LIMIT ?1",
            BET_COLUMNS
        ))?;
        let bets = stmt
            .query_map([limit as i64], row_to_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bets)
    }

    /// Settle a bet exactly once. Returns false when the bet was already
    /// settled (the update is a no-op), true when this call settled it.
    pub fn settle_bet(&self, id: i64, result: BetResult, profit_loss: f64) -> StoreResult<bool> {
        let conn = self.lock();
        let exists: bool = conn
            .query_row("SELECT 1 FROM bets WHERE id = ?1", [id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(StoreError::NotFound(format!("bet {}", id)));
        }

        let changed = conn.execute(
            "UPDATE bets SET result = ?1, profit_loss = ?2, is_live = 0, \
                settled_at = datetime('now') \
             WHERE id = ?3 AND result IS NULL",
            params![result.as_str(), profit_loss, id],
        )?;
        if changed > 0 {
            info!("bet {} settled: {} ({:+.2}u)", id, result.as_str(), profit_loss);
        }
        Ok(changed > 0)
    }

    /// Flag a pending bet as in-play. Returns true on the first transition.
    pub fn mark_bet_live(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE bets SET is_live = 1 WHERE id = ?1 AND result IS NULL AND is_live = 0",
            [id],
        )?;
        Ok(changed > 0)
    }

    /// Profit/loss summary over settled bets: (wins, losses, voids, net P&L).
    pub fn bet_performance(&self) -> StoreResult<(i64, i64, i64, f64)> {
        let conn = self.lock();
        let row = conn.query_row(
            "SELECT \
                SUM(CASE WHEN result = 'Win' THEN 1 ELSE 0 END), \
                SUM(CASE WHEN result = 'Loss' THEN 1 ELSE 0 END), \
                SUM(CASE WHEN result = 'Void' THEN 1 ELSE 0 END), \
                SUM(COALESCE(profit_loss, 0)) \
             FROM bets WHERE result IS NOT NULL",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                ))
            },
        )?;
        Ok(row)
    }

    /// Re-derive the strategy model for historical bets that predate model
    /// tagging. Only the probability/odds gates can be re-checked after the
    /// fact (the ranking context is gone), so rank-gated bets stay None.
    pub fn backfill_model_tags(&self) -> StoreResult<usize> {
        let candidates: Vec<(i64, Option<f64>, Option<f64>, String, f64)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT id, our_probability, implied_probability, tournament, odds \
                 FROM bets WHERE model = 'None' OR model = '' OR model IS NULL",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        row.get(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut updated = 0usize;
        for (id, our_p, implied_p, tournament, odds) in candidates {
            let (Some(our_p), Some(implied_p)) = (our_p, implied_p) else {
                continue;
            };
            let model = calculate_bet_model(our_p, implied_p, &tournament, odds, None);
            if model == BetModel::None {
                continue;
            }
            let conn = self.lock();
            conn.execute(
                "UPDATE bets SET model = ?1 WHERE id = ?2",
                params![model.as_str(), id],
            )?;
            updated += 1;
        }
        if updated > 0 {
            info!("backfilled model tags on {} bets", updated);
        }
        Ok(updated)
    }
}

fn row_to_bet(row: &Row) -> rusqlite::Result<Bet> {
    let model: String = row.get(10)?;
    let result: Option<String> = row.get(11)?;
    let is_live: i64 = row.get(13)?;
    Ok(Bet {
        id: Some(row.get(0)?),
        match_date: row.get(1)?,
        tournament: row.get(2)?,
        match_description: row.get(3)?,
        selection: row.get(4)?,
        odds: row.get(5)?,
        stake: row.get(6)?,
        our_probability: row.get(7)?,
        implied_probability: row.get(8)?,
        ev_at_placement: row.get(9)?,
        model: BetModel::parse(&model),
        result: result.as_deref().and_then(BetResult::parse),
        profit_loss: row.get(12)?,
        is_live: is_live != 0,
        notes: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TennisStore {
        TennisStore::open_in_memory().unwrap()
    }

    fn sample_bet() -> Bet {
        let mut bet = Bet::new(
            "2026-02-01",
            "Rotterdam Open",
            "A One vs B Two",
            "A One",
            1.80,
            2.0,
        );
        bet.our_probability = Some(0.62);
        bet.implied_probability = Some(1.0 / 1.80);
        bet.ev_at_placement = Some(0.116);
        bet.model = BetModel::Favorite;
        bet
    }

    #[test]
    fn add_and_fetch() {
        let s = store();
        let id = s.add_bet(&sample_bet()).unwrap();
        let got = s.get_bet(id).unwrap().unwrap();
        assert_eq!(got.selection, "A One");
        assert_eq!(got.model, BetModel::Favorite);
        assert!(got.is_pending());
    }

    #[test]
    fn duplicate_bet_rejected() {
        let s = store();
        s.add_bet(&sample_bet()).unwrap();
        let err = s.add_bet(&sample_bet()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn settlement_is_idempotent() {
        let s = store();
        let id = s.add_bet(&sample_bet()).unwrap();

        assert!(s.settle_bet(id, BetResult::Win, 1.52).unwrap());
        let first = s.get_bet(id).unwrap().unwrap();

        // Second settlement attempt (even with a different outcome) changes
        // nothing.
        assert!(!s.settle_bet(id, BetResult::Loss, -2.0).unwrap());
        let second = s.get_bet(id).unwrap().unwrap();
        assert_eq!(first.result, second.result);
        assert_eq!(first.profit_loss, second.profit_loss);
    }

    #[test]
    fn settle_missing_bet_is_not_found() {
        let s = store();
        let err = s.settle_bet(999, BetResult::Win, 1.0).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn mark_live_only_fires_once() {
        let s = store();
        let id = s.add_bet(&sample_bet()).unwrap();
        assert!(s.mark_bet_live(id).unwrap());
        assert!(!s.mark_bet_live(id).unwrap());
    }

    #[test]
    fn backfill_assigns_model_from_stored_numbers() {
        let s = store();
        let mut bet = sample_bet();
        bet.model = BetModel::None;
        bet.our_probability = Some(0.62);
        bet.implied_probability = Some(0.5);
        bet.odds = 2.0;
        bet.tournament = "Australian Open".into();
        let id = s.add_bet(&bet).unwrap();

        let updated = s.backfill_model_tags().unwrap();
        assert_eq!(updated, 1);
        let got = s.get_bet(id).unwrap().unwrap();
        assert_eq!(got.model, BetModel::Favorite);
    }

    #[test]
    fn performance_summary_sums_settled() {
        let s = store();
        let id1 = s.add_bet(&sample_bet()).unwrap();
        let mut other = sample_bet();
        other.selection = "B Two".into();
        let id2 = s.add_bet(&other).unwrap();
        s.settle_bet(id1, BetResult::Win, 1.52).unwrap();
        s.settle_bet(id2, BetResult::Loss, -2.0).unwrap();

        let (wins, losses, voids, pnl) = s.bet_performance().unwrap();
        assert_eq!((wins, losses, voids), (1, 1, 0));
        assert!((pnl - (-0.48)).abs() < 1e-9);
    }
}
