//! Player, alias, injury, and surface-stat queries.

use super::{map_constraint, TennisStore};
use crate::error::{StoreError, StoreResult};
use crate::models::{Hand, InjuryRecord, InjuryStatus, Player, SurfaceStats, Surface, Tour};
use crate::resolver::normalize_name;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

const PLAYER_COLUMNS: &str = "id, name, country, hand, height_cm, date_of_birth, \
     current_ranking, peak_ranking, tour, performance_elo, performance_rank";

impl TennisStore {
    /// Insert or update a canonical player row. `(name, tour)` uniqueness is
    /// enforced by the schema; a clash with a different id is a referential
    /// violation, not an update.
    pub fn upsert_player(&self, p: &Player) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO players \
             (id, name, name_norm, country, hand, height_cm, date_of_birth, \
              current_ranking, peak_ranking, tour, performance_elo, performance_rank) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(id) DO UPDATE SET \
                name = excluded.name, \
                name_norm = excluded.name_norm, \
                country = COALESCE(excluded.country, country), \
                hand = excluded.hand, \
                height_cm = COALESCE(excluded.height_cm, height_cm), \
                date_of_birth = COALESCE(excluded.date_of_birth, date_of_birth), \
                current_ranking = COALESCE(excluded.current_ranking, current_ranking), \
                peak_ranking = COALESCE(excluded.peak_ranking, peak_ranking), \
                tour = COALESCE(excluded.tour, tour)",
            params![
                p.id,
                p.name,
                normalize_name(&p.name),
                p.country,
                p.hand.as_str(),
                p.height_cm,
                p.date_of_birth.map(|d| d.to_string()),
                p.current_ranking,
                p.peak_ranking,
                p.tour.map(|t| t.as_str()),
                p.performance_elo,
                p.performance_rank,
            ],
        )
        .map_err(|e| map_constraint(e, &format!("duplicate player (name, tour) for '{}'", p.name)))?;
        Ok(())
    }

    /// Canonical id after at most one alias hop (the store keeps alias depth
    /// at exactly one).
    pub fn canonical_id(&self, id: i64) -> StoreResult<i64> {
        let conn = self.lock();
        Ok(Self::canonical_id_locked(&conn, id)?)
    }

    pub(crate) fn canonical_id_locked(conn: &Connection, id: i64) -> rusqlite::Result<i64> {
        let mut stmt = conn.prepare_cached(
            "SELECT canonical_id FROM player_aliases WHERE alias_id = ?1 LIMIT 1",
        )?;
        let canonical: Option<i64> = stmt.query_row([id], |row| row.get(0)).optional()?;
        Ok(canonical.unwrap_or(id))
    }

    /// Fetch a player, resolving aliases to the canonical record first.
    pub fn get_player(&self, id: i64) -> StoreResult<Option<Player>> {
        let conn = self.lock();
        let canonical = Self::canonical_id_locked(&conn, id)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM players WHERE id = ?1 LIMIT 1",
            PLAYER_COLUMNS
        ))?;
        let player = stmt
            .query_row([canonical], row_to_player)
            .optional()?;
        Ok(player)
    }

    /// Exact lookup by normalized name.
    pub fn get_player_by_name(&self, name: &str) -> StoreResult<Option<Player>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM players WHERE name_norm = ?1 LIMIT 1",
            PLAYER_COLUMNS
        ))?;
        let found: Option<Player> = stmt
            .query_row([normalize_name(name)], row_to_player)
            .optional()?;
        match found {
            Some(p) => {
                let canonical = Self::canonical_id_locked(&conn, p.id)?;
                if canonical == p.id {
                    Ok(Some(p))
                } else {
                    let mut stmt = conn.prepare_cached(&format!(
                        "SELECT {} FROM players WHERE id = ?1 LIMIT 1",
                        PLAYER_COLUMNS
                    ))?;
                    Ok(stmt.query_row([canonical], row_to_player).optional()?)
                }
            }
            None => Ok(None),
        }
    }

    /// Case- and diacritic-insensitive substring search over canonical
    /// players, best-ranked first.
    pub fn search_players(&self, query: &str, limit: usize) -> StoreResult<Vec<Player>> {
        let conn = self.lock();
        let pattern = format!("%{}%", normalize_name(query));
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM players \
             WHERE name_norm LIKE ?1 \
               AND id NOT IN (SELECT alias_id FROM player_aliases) \
             ORDER BY current_ranking IS NULL, current_ranking ASC, name ASC \
             LIMIT ?2",
            PLAYER_COLUMNS
        ))?;
        let players = stmt
            .query_map(params![pattern, limit as i64], row_to_player)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(players)
    }

    /// Register `alias_id -> canonical_id`. The target is resolved
    /// transitively before storing so chains never exceed depth one; cycles
    /// are rejected. Re-inserting the same mapping is a no-op.
    pub fn add_player_alias(&self, alias_id: i64, canonical_id: i64, source: &str) -> StoreResult<()> {
        let conn = self.lock();

        let terminal = Self::canonical_id_locked(&conn, canonical_id)?;
        if terminal == alias_id {
            return Err(StoreError::ReferentialViolation(format!(
                "alias {} -> {} would create a cycle",
                alias_id, canonical_id
            )));
        }

        for (id, label) in [(alias_id, "alias"), (terminal, "canonical")] {
            let exists: bool = conn
                .query_row("SELECT 1 FROM players WHERE id = ?1", [id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(StoreError::NotFound(format!(
                    "{} player {} does not exist",
                    label, id
                )));
            }
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT canonical_id FROM player_aliases WHERE alias_id = ?1",
                [alias_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(current) if current == terminal => return Ok(()),
            Some(current) => {
                return Err(StoreError::ReferentialViolation(format!(
                    "alias {} already points at {}",
                    alias_id, current
                )));
            }
            None => {}
        }

        conn.execute(
            "INSERT INTO player_aliases (alias_id, canonical_id, source) VALUES (?1, ?2, ?3)",
            params![alias_id, terminal, source],
        )?;

        // Anyone who pointed at the new alias is re-pointed at the terminal
        // record, keeping every chain at depth one.
        conn.execute(
            "UPDATE player_aliases SET canonical_id = ?1 WHERE canonical_id = ?2",
            params![terminal, alias_id],
        )?;

        Ok(())
    }

    /// All ids that resolve to this canonical player, including itself.
    pub fn alias_ids(&self, canonical_id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.lock();
        Ok(Self::alias_ids_locked(&conn, canonical_id)?)
    }

    pub(crate) fn alias_ids_locked(conn: &Connection, canonical_id: i64) -> rusqlite::Result<Vec<i64>> {
        let canonical = Self::canonical_id_locked(conn, canonical_id)?;
        let mut ids = vec![canonical];
        let mut stmt = conn.prepare_cached(
            "SELECT alias_id FROM player_aliases WHERE canonical_id = ?1 ORDER BY alias_id",
        )?;
        let aliases = stmt.query_map([canonical], |row| row.get::<_, i64>(0))?;
        for alias in aliases {
            ids.push(alias?);
        }
        Ok(ids)
    }

    /// `player_id -> current_ranking` for everyone with a ranking. Built once
    /// per Elo recalculation.
    pub fn ranking_cache(&self) -> StoreResult<HashMap<i64, i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, current_ranking FROM players WHERE current_ranking IS NOT NULL",
        )?;
        let mut cache = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (id, rank) = row?;
            cache.insert(id, rank);
        }
        Ok(cache)
    }

    pub fn update_player_performance_elo(&self, id: i64, elo: f64) -> StoreResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE players SET performance_elo = ?1 WHERE id = ?2",
            params![elo, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("player {}", id)));
        }
        Ok(())
    }

    pub fn update_player_tour(&self, id: i64, tour: Option<Tour>) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE players SET tour = ?1 WHERE id = ?2",
            params![tour.map(|t| t.as_str()), id],
        )?;
        Ok(())
    }

    pub fn update_player_ranking(&self, id: i64, ranking: Option<i64>) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE players SET current_ranking = ?1, \
                peak_ranking = CASE \
                    WHEN ?1 IS NOT NULL AND (peak_ranking IS NULL OR ?1 < peak_ranking) THEN ?1 \
                    ELSE peak_ranking END \
             WHERE id = ?2",
            params![ranking, id],
        )?;
        Ok(())
    }

    /// Opponents' assigned tours for a player, counted across all recorded
    /// matches. Drives the ambiguous-tour fixed-point pass.
    pub fn opponent_tour_counts(&self, player_id: i64) -> StoreResult<(i64, i64)> {
        let conn = self.lock();
        let row = conn.query_row(
            "SELECT \
                SUM(CASE WHEN opp.tour = 'ATP' THEN 1 ELSE 0 END), \
                SUM(CASE WHEN opp.tour = 'WTA' THEN 1 ELSE 0 END) \
             FROM ( \
                SELECT loser_id AS opp_id FROM matches WHERE winner_id = ?1 \
                UNION ALL \
                SELECT winner_id AS opp_id FROM matches WHERE loser_id = ?1 \
             ) m \
             JOIN players opp ON opp.id = m.opp_id",
            [player_id],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                ))
            },
        )?;
        Ok(row)
    }

    /// Dense rank per tour by descending Performance Elo (rank 1 = highest).
    pub fn update_all_performance_ranks(&self) -> StoreResult<usize> {
        let conn = self.lock();
        let mut updated = 0usize;
        for tour in ["ATP", "WTA"] {
            updated += conn.execute(
                "UPDATE players SET performance_rank = ( \
                    SELECT COUNT(DISTINCT p2.performance_elo) FROM players p2 \
                    WHERE p2.tour = ?1 AND p2.performance_elo > players.performance_elo \
                 ) + 1 \
                 WHERE tour = ?1 AND performance_elo IS NOT NULL",
                [tour],
            )?;
        }
        Ok(updated)
    }

    pub fn player_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;
        Ok(count)
    }

    // ---- surface stats --------------------------------------------------

    /// Career aggregate for one player on one surface (derived table).
    pub fn surface_stats(&self, player_id: i64, surface: Surface) -> StoreResult<SurfaceStats> {
        let conn = self.lock();
        let canonical = Self::canonical_id_locked(&conn, player_id)?;
        let stats = conn
            .query_row(
                "SELECT matches_played, wins, losses, win_rate \
                 FROM player_surface_stats WHERE player_id = ?1 AND surface = ?2",
                params![canonical, surface.as_str()],
                |row| {
                    Ok(SurfaceStats {
                        matches_played: row.get(0)?,
                        wins: row.get(1)?,
                        losses: row.get(2)?,
                        win_rate: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(stats.unwrap_or_default())
    }

    /// Rebuild the per-player-per-surface aggregates from the matches table,
    /// rolling alias ids up to their canonical player. Run after bulk imports.
    pub fn recompute_surface_stats(&self) -> StoreResult<usize> {
        let conn = self.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;
        conn.execute("DELETE FROM player_surface_stats", [])?;
        let inserted = conn.execute(
            "INSERT INTO player_surface_stats \
                (player_id, surface, matches_played, wins, losses, win_rate) \
             SELECT \
                COALESCE(a.canonical_id, m.player_id) AS pid, \
                m.surface, \
                COUNT(*), \
                SUM(m.win), \
                COUNT(*) - SUM(m.win), \
                CAST(SUM(m.win) AS REAL) / COUNT(*) \
             FROM ( \
                SELECT winner_id AS player_id, surface, 1 AS win \
                FROM matches WHERE surface IS NOT NULL \
                UNION ALL \
                SELECT loser_id, surface, 0 \
                FROM matches WHERE surface IS NOT NULL \
             ) m \
             LEFT JOIN player_aliases a ON a.alias_id = m.player_id \
             GROUP BY pid, m.surface",
            [],
        )?;
        conn.execute("COMMIT", [])?;
        Ok(inserted)
    }

    // ---- injuries -------------------------------------------------------

    pub fn add_injury(&self, rec: &InjuryRecord) -> StoreResult<i64> {
        let conn = self.lock();
        let canonical = Self::canonical_id_locked(&conn, rec.player_id)?;
        conn.execute(
            "INSERT INTO injuries (player_id, injury_type, body_part, reported_date, status, notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                canonical,
                rec.injury_type,
                rec.body_part,
                rec.reported_date.to_string(),
                rec.status.as_str(),
                rec.notes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_injury_status(&self, injury_id: i64, status: InjuryStatus) -> StoreResult<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE injuries SET status = ?1 WHERE id = ?2",
            params![status.as_str(), injury_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("injury {}", injury_id)));
        }
        Ok(())
    }

    /// Injuries that still carry a penalty (anything not Recovered).
    pub fn active_injuries(&self, player_id: i64) -> StoreResult<Vec<InjuryRecord>> {
        let conn = self.lock();
        let canonical = Self::canonical_id_locked(&conn, player_id)?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, player_id, injury_type, body_part, reported_date, status, notes \
             FROM injuries WHERE player_id = ?1 AND status != 'Recovered' \
             ORDER BY reported_date DESC",
        )?;
        let records = stmt
            .query_map([canonical], |row| {
                let date: String = row.get(4)?;
                let status: String = row.get(5)?;
                Ok(InjuryRecord {
                    id: Some(row.get(0)?),
                    player_id: row.get(1)?,
                    injury_type: row.get(2)?,
                    body_part: row.get(3)?,
                    reported_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                    status: InjuryStatus::parse(&status),
                    notes: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn row_to_player(row: &Row) -> rusqlite::Result<Player> {
    let hand: String = row.get(3)?;
    let dob: Option<String> = row.get(5)?;
    let tour: Option<String> = row.get(8)?;
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        hand: Hand::parse(&hand),
        height_cm: row.get(4)?,
        date_of_birth: dob.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        current_ranking: row.get(6)?,
        peak_ranking: row.get(7)?,
        tour: tour.as_deref().and_then(Tour::parse),
        performance_elo: row.get(9)?,
        performance_rank: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Player;

    fn store() -> TennisStore {
        TennisStore::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let s = store();
        let p = Player::new(100, "Jannik Sinner")
            .with_ranking(1)
            .with_tour(Tour::Atp);
        s.upsert_player(&p).unwrap();

        let got = s.get_player(100).unwrap().unwrap();
        assert_eq!(got.name, "Jannik Sinner");
        assert_eq!(got.current_ranking, Some(1));
        assert_eq!(got.tour, Some(Tour::Atp));
    }

    #[test]
    fn alias_resolves_in_one_hop() {
        let s = store();
        s.upsert_player(&Player::new(1, "Novak Djokovic")).unwrap();
        s.upsert_player(&Player::new(2, "Djokovic N.")).unwrap();
        s.add_player_alias(2, 1, "test").unwrap();

        assert_eq!(s.canonical_id(2).unwrap(), 1);
        assert_eq!(s.canonical_id(1).unwrap(), 1);
        let via_alias = s.get_player(2).unwrap().unwrap();
        assert_eq!(via_alias.id, 1);
    }

    #[test]
    fn alias_chain_flattens_to_terminal() {
        let s = store();
        for (id, name) in [(1, "A"), (2, "B"), (3, "C")] {
            s.upsert_player(&Player::new(id, name)).unwrap();
        }
        s.add_player_alias(2, 1, "test").unwrap();
        // 3 -> 2 must store 3 -> 1, keeping depth at one.
        s.add_player_alias(3, 2, "test").unwrap();
        assert_eq!(s.canonical_id(3).unwrap(), 1);
    }

    #[test]
    fn alias_cycle_rejected() {
        let s = store();
        s.upsert_player(&Player::new(1, "A")).unwrap();
        s.upsert_player(&Player::new(2, "B")).unwrap();
        s.add_player_alias(2, 1, "test").unwrap();
        let err = s.add_player_alias(1, 2, "test").unwrap_err();
        assert!(matches!(err, StoreError::ReferentialViolation(_)));
    }

    #[test]
    fn alias_insert_is_idempotent() {
        let s = store();
        s.upsert_player(&Player::new(1, "A")).unwrap();
        s.upsert_player(&Player::new(2, "B")).unwrap();
        s.add_player_alias(2, 1, "test").unwrap();
        s.add_player_alias(2, 1, "test").unwrap();
        assert_eq!(s.alias_ids(1).unwrap(), vec![1, 2]);
    }

    #[test]
    fn search_is_diacritic_insensitive_and_skips_aliases() {
        let s = store();
        s.upsert_player(&Player::new(1, "Félix Auger-Aliassime").with_ranking(25))
            .unwrap();
        s.upsert_player(&Player::new(2, "Auger-Aliassime F.")).unwrap();
        s.add_player_alias(2, 1, "test").unwrap();

        let hits = s.search_players("auger alia", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn performance_ranks_are_dense_per_tour() {
        let s = store();
        for (id, name, tour, elo) in [
            (1, "A", Tour::Atp, 2000.0),
            (2, "B", Tour::Atp, 1900.0),
            (3, "C", Tour::Atp, 1900.0),
            (4, "D", Tour::Atp, 1800.0),
            (5, "E", Tour::Wta, 1950.0),
        ] {
            s.upsert_player(&Player::new(id, name).with_tour(tour)).unwrap();
            s.update_player_performance_elo(id, elo).unwrap();
        }
        s.update_all_performance_ranks().unwrap();

        let rank = |id: i64| s.get_player(id).unwrap().unwrap().performance_rank;
        assert_eq!(rank(1), Some(1));
        assert_eq!(rank(2), Some(2));
        assert_eq!(rank(3), Some(2));
        assert_eq!(rank(4), Some(3));
        assert_eq!(rank(5), Some(1));
    }
}
