//! SQLite-backed persistence for the engine.
//!
//! The store is the only shared mutable resource: every other component
//! borrows read views and submits writes through this API. Single connection
//! behind a mutex, WAL mode for concurrent readers, prepared-statement
//! caching on the hot queries.

mod bets;
mod matches;
mod players;
mod upcoming;

pub use matches::MatchInsert;

use crate::error::{StoreError, StoreResult};
use crate::validation::{Severity, ValidationIssue};
use anyhow::Context as _;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

/// Schema. Fresh installs get everything from here; older databases are
/// upgraded by `migrate` with additive ALTERs only.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    name_norm TEXT NOT NULL,
    country TEXT,
    hand TEXT NOT NULL DEFAULT 'U',
    height_cm INTEGER,
    date_of_birth TEXT,
    current_ranking INTEGER,
    peak_ranking INTEGER,
    tour TEXT,
    performance_elo REAL,
    performance_rank INTEGER,
    UNIQUE(name, tour)
);

CREATE TABLE IF NOT EXISTS player_aliases (
    alias_id INTEGER PRIMARY KEY,
    canonical_id INTEGER NOT NULL,
    source TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (alias_id) REFERENCES players(id),
    FOREIGN KEY (canonical_id) REFERENCES players(id)
);

CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    tournament TEXT,
    surface TEXT,
    round TEXT,
    winner_id INTEGER NOT NULL,
    loser_id INTEGER NOT NULL,
    winner_rank INTEGER,
    loser_rank INTEGER,
    score TEXT,
    minutes INTEGER,
    best_of INTEGER,
    source TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS upcoming_matches (
    market_id TEXT PRIMARY KEY,
    tournament TEXT NOT NULL,
    start_time TEXT NOT NULL,
    surface TEXT NOT NULL,
    player1_id INTEGER,
    player2_id INTEGER,
    player1_name TEXT NOT NULL,
    player2_name TEXT NOT NULL,
    player1_odds REAL NOT NULL,
    player2_odds REAL NOT NULL,
    player1_liquidity REAL,
    player2_liquidity REAL,
    total_matched REAL,
    sharp_p1_odds REAL,
    sharp_p2_odds REAL,
    captured_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    match_date TEXT NOT NULL,
    tournament TEXT NOT NULL,
    match_description TEXT NOT NULL,
    selection TEXT NOT NULL,
    odds REAL NOT NULL,
    stake REAL NOT NULL,
    our_probability REAL,
    implied_probability REAL,
    ev_at_placement REAL,
    model TEXT NOT NULL DEFAULT 'None',
    result TEXT,
    profit_loss REAL,
    is_live INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    settled_at TEXT
);

CREATE TABLE IF NOT EXISTS injuries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    injury_type TEXT NOT NULL,
    body_part TEXT,
    reported_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Minor Concern',
    notes TEXT,
    FOREIGN KEY (player_id) REFERENCES players(id)
);

CREATE TABLE IF NOT EXISTS tournaments (
    name TEXT PRIMARY KEY,
    surface TEXT,
    category TEXT,
    first_seen TEXT NOT NULL DEFAULT (datetime('now')),
    last_seen TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS player_surface_stats (
    player_id INTEGER NOT NULL,
    surface TEXT NOT NULL,
    matches_played INTEGER NOT NULL DEFAULT 0,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    win_rate REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (player_id, surface)
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS validation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    rule TEXT NOT NULL,
    severity TEXT NOT NULL,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_players_name ON players(name);
CREATE INDEX IF NOT EXISTS idx_players_name_norm ON players(name_norm);
CREATE INDEX IF NOT EXISTS idx_players_ranking ON players(current_ranking);
CREATE INDEX IF NOT EXISTS idx_players_tour ON players(tour);
CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);
CREATE INDEX IF NOT EXISTS idx_matches_winner ON matches(winner_id);
CREATE INDEX IF NOT EXISTS idx_matches_loser ON matches(loser_id);
CREATE INDEX IF NOT EXISTS idx_bets_result ON bets(result);
CREATE INDEX IF NOT EXISTS idx_upcoming_start ON upcoming_matches(start_time);
"#;

/// Columns added after the first release. Existing installs pick them up at
/// startup; `CREATE TABLE IF NOT EXISTS` never re-runs on a populated file.
const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("bets", "is_live", "INTEGER NOT NULL DEFAULT 0"),
    ("upcoming_matches", "sharp_p1_odds", "REAL"),
    ("upcoming_matches", "sharp_p2_odds", "REAL"),
    ("players", "performance_rank", "INTEGER"),
];

pub struct TennisStore {
    conn: Arc<Mutex<Connection>>,
}

impl TennisStore {
    pub fn open(db_path: &str) -> StoreResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)?;
        Self::init(conn, db_path)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Self::migrate(&conn)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if label != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let players: i64 = conn
            .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
            .unwrap_or(0);
        let matches: i64 = conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))
            .unwrap_or(0);
        info!(
            "Database ready at {}: {} players, {} matches",
            label, players, matches
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Forward-only migrations: add any column an older schema is missing.
    fn migrate(conn: &Connection) -> StoreResult<()> {
        for (table, column, decl) in MIGRATIONS {
            let exists: bool = {
                let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
                let mut rows = stmt.query([])?;
                let mut found = false;
                while let Some(row) = rows.next()? {
                    let name: String = row.get(1)?;
                    if name == *column {
                        found = true;
                        break;
                    }
                }
                found
            };
            if !exists {
                conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
                    [],
                )?;
                info!("Migrated: added {}.{}", table, column);
            }
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ---- metadata -------------------------------------------------------

    pub fn get_metadata(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock();
        Ok(Self::get_metadata_locked(&conn, key))
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock();
        Self::set_metadata_locked(&conn, key, value)
    }

    pub(crate) fn get_metadata_locked(conn: &Connection, key: &str) -> Option<String> {
        let value: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1 LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .ok()?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub(crate) fn set_metadata_locked(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Stamp `last_refresh_<kind>` for the refresh status display.
    pub fn record_refresh(&self, kind: &str) -> StoreResult<()> {
        self.set_metadata(
            &format!("last_refresh_{}", kind),
            &Utc::now().to_rfc3339(),
        )
    }

    pub fn last_refresh(&self, kind: &str) -> StoreResult<Option<String>> {
        self.get_metadata(&format!("last_refresh_{}", kind))
    }

    /// Record where the roster/match seed came from (set once at install).
    pub fn record_seed_provenance(&self, description: &str) -> StoreResult<()> {
        self.set_metadata("seed_provenance", description)
    }

    pub fn seed_provenance(&self) -> StoreResult<Option<String>> {
        self.get_metadata("seed_provenance")
    }

    // ---- validation log -------------------------------------------------

    pub(crate) fn append_validation_issues(
        &self,
        source: &str,
        issues: &[ValidationIssue],
    ) -> StoreResult<()> {
        if issues.is_empty() {
            return Ok(());
        }
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();
        for issue in issues {
            conn.execute(
                "INSERT INTO validation_log (timestamp, source, rule, severity, details) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    now,
                    source,
                    issue.rule,
                    match issue.severity {
                        Severity::Critical => "CRITICAL",
                        Severity::Warning => "WARNING",
                    },
                    issue.details,
                ],
            )?;
        }
        Ok(())
    }

    pub fn validation_log_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM validation_log", [], |row| row.get(0))?;
        Ok(count)
    }

    // ---- tournaments ----------------------------------------------------

    /// Record a tournament sighting with its classified surface and tier.
    pub fn upsert_tournament(
        &self,
        name: &str,
        surface: Option<&str>,
        category: &str,
    ) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tournaments (name, surface, category) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET \
                surface = COALESCE(excluded.surface, surface), \
                category = excluded.category, \
                last_seen = datetime('now')",
            params![name, surface, category],
        )?;
        Ok(())
    }

    pub fn tournament_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tournaments", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Run SQLite maintenance. Called by the daily housekeeping tick.
    pub fn optimize(&self) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            "PRAGMA optimize;
             PRAGMA wal_checkpoint(TRUNCATE);",
        )?;
        Ok(())
    }
}

/// Map a SQLite constraint failure onto the typed referential error.
pub(crate) fn map_constraint(err: rusqlite::Error, what: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::ReferentialViolation(what.to_string())
        }
        _ => StoreError::Io(err),
    }
}

/// Open a store for ad-hoc CLI use, wrapping the typed error for main().
pub fn open_store(path: &str) -> anyhow::Result<Arc<TennisStore>> {
    let store = TennisStore::open(path)
        .with_context(|| format!("failed to open database at {}", path))?;
    Ok(Arc::new(store))
}
