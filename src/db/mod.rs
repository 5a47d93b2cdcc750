pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: canonical log, id side table, enrichment, unified output
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS listen_events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                ts              TEXT NOT NULL,
                track           TEXT NOT NULL,
                artist          TEXT NOT NULL,
                source          TEXT NOT NULL,
                -- NULL = missing, or not applicable for youtube_music
                duration_ms     INTEGER,
                skipped         INTEGER,

                date            TEXT NOT NULL,
                month           INTEGER NOT NULL,
                month_name      TEXT NOT NULL,
                weekday         TEXT NOT NULL,
                hour            INTEGER NOT NULL,
                iso_week        INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_key ON listen_events(track, artist);
            CREATE INDEX IF NOT EXISTS idx_events_source ON listen_events(source);

            -- Known catalog ids from the Spotify export, keyed by normalized names
            CREATE TABLE IF NOT EXISTS track_ids (
                track           TEXT NOT NULL,
                artist          TEXT NOT NULL,
                external_id     TEXT NOT NULL,
                PRIMARY KEY (track, artist)
            );

            CREATE TABLE IF NOT EXISTS enrichment (
                track               TEXT NOT NULL,
                artist              TEXT NOT NULL,
                external_id         TEXT,
                album               TEXT,
                release_date        TEXT,
                art_url             TEXT,
                popularity          INTEGER,
                explicit            INTEGER,
                duration_ms_catalog INTEGER,
                genres              TEXT,
                energy              REAL,
                valence             REAL,
                danceability        REAL,
                acousticness        REAL,
                instrumentalness    REAL,
                speechiness         REAL,
                tempo               REAL,
                loudness            REAL,
                PRIMARY KEY (track, artist)
            );

            CREATE TABLE IF NOT EXISTS unified_events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                ts              TEXT NOT NULL,
                track           TEXT NOT NULL,
                artist          TEXT NOT NULL,
                source          TEXT NOT NULL,
                duration_ms     INTEGER,
                skipped         INTEGER,
                date            TEXT NOT NULL,
                month           INTEGER NOT NULL,
                month_name      TEXT NOT NULL,
                weekday         TEXT NOT NULL,
                hour            INTEGER NOT NULL,
                iso_week        INTEGER NOT NULL,

                external_id         TEXT,
                album               TEXT,
                release_date        TEXT,
                art_url             TEXT,
                popularity          INTEGER,
                explicit            INTEGER,
                duration_ms_catalog INTEGER,
                genres              TEXT,
                energy              REAL,
                valence             REAL,
                danceability        REAL,
                acousticness        REAL,
                instrumentalness    REAL,
                speechiness         REAL,
                tempo               REAL,
                loudness            REAL
            );

            CREATE INDEX IF NOT EXISTS idx_unified_ts ON unified_events(ts);
            CREATE INDEX IF NOT EXISTS idx_unified_key ON unified_events(track, artist);

            CREATE TABLE IF NOT EXISTS saved_tables (
                name        TEXT PRIMARY KEY,
                row_count   INTEGER NOT NULL,
                saved_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}
