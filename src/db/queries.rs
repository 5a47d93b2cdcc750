use super::models::{
    AudioFeatures, CalendarFields, CanonicalListenEvent, EnrichmentRecord, Field, Source,
    StoreStats, TrackKey, UnifiedListenEvent,
};
use super::{Database, DbError, Result};
use crate::identifiers::IdentifierLookupTable;
use chrono::DateTime;
use rusqlite::{Connection, Row, params};

/// Logical table names recorded in `saved_tables`.
pub const LISTEN_EVENTS: &str = "listen_events";
pub const TRACK_IDS: &str = "track_ids";
pub const ENRICHMENT: &str = "enrichment";
pub const UNIFIED_EVENTS: &str = "unified_events";

const FEATURES_PRESENT: &str = "(energy IS NOT NULL OR valence IS NOT NULL
    OR danceability IS NOT NULL OR acousticness IS NOT NULL
    OR instrumentalness IS NOT NULL OR speechiness IS NOT NULL
    OR tempo IS NOT NULL OR loudness IS NOT NULL)";

/// Raw `listen_events` row before source/timestamp parsing.
struct StoredEvent {
    ts: String,
    track: String,
    artist: String,
    source: String,
    duration_ms: Option<i64>,
    skipped: Option<bool>,
}

impl StoredEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ts: row.get(0)?,
            track: row.get(1)?,
            artist: row.get(2)?,
            source: row.get(3)?,
            duration_ms: row.get(4)?,
            skipped: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<CanonicalListenEvent> {
        let corrupt = |message: String| DbError::Corrupt {
            table: LISTEN_EVENTS,
            message,
        };
        let source: Source = self.source.parse().map_err(corrupt)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.ts)
            .map_err(|e| corrupt(format!("bad timestamp '{}': {e}", self.ts)))?;

        let not_applicable = source == Source::YoutubeMusic;

        Ok(CanonicalListenEvent {
            calendar: CalendarFields::from_timestamp(&timestamp),
            timestamp,
            track: self.track,
            artist: self.artist,
            source,
            duration_ms: stored_field(self.duration_ms, not_applicable),
            skipped: stored_field(self.skipped, not_applicable),
        })
    }
}

/// NULL comes back as NotApplicable for columns the source never carries.
fn stored_field<T>(value: Option<T>, not_applicable: bool) -> Field<T> {
    match value {
        Some(v) => Field::Value(v),
        None if not_applicable => Field::NotApplicable,
        None => Field::Missing,
    }
}

fn insert_event_sql(table: &str, extra_columns: &str, extra_params: &str) -> String {
    format!(
        "INSERT INTO {table} (
            ts, track, artist, source, duration_ms, skipped,
            date, month, month_name, weekday, hour, iso_week{extra_columns}
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11, ?12{extra_params}
        )"
    )
}

fn record_saved(conn: &Connection, name: &str, row_count: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO saved_tables (name, row_count, saved_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(name) DO UPDATE SET
            row_count = excluded.row_count,
            saved_at = excluded.saved_at",
        params![name, row_count as i64],
    )?;
    Ok(())
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

impl Database {
    /// Replace the canonical listen log.
    pub fn save_listen_events(&self, events: &[CanonicalListenEvent]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM listen_events", [])?;

        {
            let sql = insert_event_sql(LISTEN_EVENTS, "", "");
            let mut stmt = tx.prepare_cached(&sql)?;
            for e in events {
                let c = &e.calendar;
                stmt.execute(params![
                    e.timestamp.to_rfc3339(), e.track, e.artist, e.source.as_str(),
                    e.duration_ms.value(), e.skipped.value(),
                    c.date.to_string(), c.month, c.month_name, c.weekday, c.hour, c.iso_week,
                ])?;
            }
        }

        record_saved(&tx, LISTEN_EVENTS, events.len())?;
        tx.commit()?;
        log::debug!("Saved {} rows to {LISTEN_EVENTS}", events.len());
        Ok(events.len())
    }

    /// Reload the canonical log in timestamp order.
    pub fn load_listen_events(&self) -> Result<Vec<CanonicalListenEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, track, artist, source, duration_ms, skipped
             FROM listen_events ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], StoredEvent::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredEvent::into_event).collect()
    }

    /// Replace the known-id side table.
    pub fn save_track_ids(&self, lookup: &IdentifierLookupTable) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM track_ids", [])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO track_ids (track, artist, external_id) VALUES (?1, ?2, ?3)",
            )?;
            for (key, id) in lookup.iter() {
                stmt.execute(params![key.track, key.artist, id])?;
            }
        }

        record_saved(&tx, TRACK_IDS, lookup.len())?;
        tx.commit()?;
        Ok(lookup.len())
    }

    pub fn load_track_ids(&self) -> Result<IdentifierLookupTable> {
        let mut stmt = self
            .conn
            .prepare("SELECT track, artist, external_id FROM track_ids")?;

        let entries = stmt
            .query_map([], |row| {
                Ok((TrackKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?), row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<(TrackKey, String)>, _>>()?;

        Ok(entries.into_iter().collect())
    }

    /// Replace the per-key enrichment table.
    pub fn save_enrichment(&self, records: &[EnrichmentRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM enrichment", [])?;

        {
            // OR IGNORE: the first record for a key wins, same as the join
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO enrichment (
                    track, artist, external_id, album, release_date, art_url,
                    popularity, explicit, duration_ms_catalog, genres,
                    energy, valence, danceability, acousticness,
                    instrumentalness, speechiness, tempo, loudness
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6,
                    ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18
                )",
            )?;
            for r in records {
                let f = &r.features;
                stmt.execute(params![
                    r.track, r.artist, r.external_id, r.album, r.release_date, r.art_url,
                    r.popularity, r.explicit, r.duration_ms_catalog, r.genres,
                    f.energy, f.valence, f.danceability, f.acousticness,
                    f.instrumentalness, f.speechiness, f.tempo, f.loudness,
                ])?;
            }
        }

        record_saved(&tx, ENRICHMENT, records.len())?;
        tx.commit()?;
        Ok(records.len())
    }

    pub fn load_enrichment(&self) -> Result<Vec<EnrichmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT track, artist, external_id, album, release_date, art_url,
                    popularity, explicit, duration_ms_catalog, genres,
                    energy, valence, danceability, acousticness,
                    instrumentalness, speechiness, tempo, loudness
             FROM enrichment ORDER BY track, artist",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(EnrichmentRecord {
                    track: row.get(0)?,
                    artist: row.get(1)?,
                    external_id: row.get(2)?,
                    album: row.get(3)?,
                    release_date: row.get(4)?,
                    art_url: row.get(5)?,
                    popularity: row.get(6)?,
                    explicit: row.get(7)?,
                    duration_ms_catalog: row.get(8)?,
                    genres: row.get(9)?,
                    features: AudioFeatures {
                        energy: row.get(10)?,
                        valence: row.get(11)?,
                        danceability: row.get(12)?,
                        acousticness: row.get(13)?,
                        instrumentalness: row.get(14)?,
                        speechiness: row.get(15)?,
                        tempo: row.get(16)?,
                        loudness: row.get(17)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Replace the unified (terminal) table.
    pub fn save_unified(&self, rows: &[UnifiedListenEvent]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM unified_events", [])?;

        {
            let sql = insert_event_sql(
                UNIFIED_EVENTS,
                ",
                external_id, album, release_date, art_url,
                popularity, explicit, duration_ms_catalog, genres,
                energy, valence, danceability, acousticness,
                instrumentalness, speechiness, tempo, loudness",
                ",
                ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24,
                ?25, ?26, ?27, ?28",
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            let empty = EnrichmentRecord::not_found(&TrackKey::new("", ""));

            for row in rows {
                let e = &row.event;
                let c = &e.calendar;
                let r = row.enrichment.as_ref().unwrap_or(&empty);
                let f = &r.features;
                stmt.execute(params![
                    e.timestamp.to_rfc3339(), e.track, e.artist, e.source.as_str(),
                    e.duration_ms.value(), e.skipped.value(),
                    c.date.to_string(), c.month, c.month_name, c.weekday, c.hour, c.iso_week,
                    r.external_id, r.album, r.release_date, r.art_url,
                    r.popularity, r.explicit, r.duration_ms_catalog, r.genres,
                    f.energy, f.valence, f.danceability, f.acousticness,
                    f.instrumentalness, f.speechiness, f.tempo, f.loudness,
                ])?;
            }
        }

        record_saved(&tx, UNIFIED_EVENTS, rows.len())?;
        tx.commit()?;
        log::debug!("Saved {} rows to {UNIFIED_EVENTS}", rows.len());
        Ok(rows.len())
    }

    /// Whether a logical table has been saved at least once.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM saved_tables WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let c = &self.conn;
        Ok(StoreStats {
            listen_events: count(c, "SELECT COUNT(*) FROM listen_events")?,
            spotify_events: count(
                c,
                "SELECT COUNT(*) FROM listen_events WHERE source = 'spotify'",
            )?,
            youtube_events: count(
                c,
                "SELECT COUNT(*) FROM listen_events WHERE source = 'youtube_music'",
            )?,
            enrichment_records: count(c, "SELECT COUNT(*) FROM enrichment")?,
            enrichment_found: count(
                c,
                "SELECT COUNT(*) FROM enrichment WHERE external_id IS NOT NULL",
            )?,
            unified_events: count(c, "SELECT COUNT(*) FROM unified_events")?,
            unified_found: count(
                c,
                "SELECT COUNT(*) FROM unified_events WHERE external_id IS NOT NULL",
            )?,
            unified_with_features: count(
                c,
                &format!("SELECT COUNT(*) FROM unified_events WHERE {FEATURES_PRESENT}"),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RawListenEvent;
    use crate::unify::canonicalize;

    fn raw(source: Source, track: &str, ts: &str, duration_ms: Option<i64>) -> RawListenEvent {
        RawListenEvent {
            source,
            track_name: Some(track.to_string()),
            artist_name: Some("The Weeknd".to_string()),
            album_name: None,
            timestamp: DateTime::parse_from_rfc3339(ts).unwrap(),
            duration_ms,
            skipped: None,
            uri: None,
        }
    }

    fn sample_events() -> Vec<CanonicalListenEvent> {
        vec![
            canonicalize(&raw(
                Source::Spotify,
                "Blinding Lights",
                "2025-01-01T10:00:00+01:00",
                Some(200_000),
            )),
            canonicalize(&raw(
                Source::Spotify,
                "Save Your Tears",
                "2025-01-01T11:00:00Z",
                None,
            )),
            canonicalize(&raw(
                Source::YoutubeMusic,
                "Blinding Lights",
                "2025-01-02T09:30:00Z",
                None,
            )),
        ]
    }

    fn found_record(track: &str) -> EnrichmentRecord {
        EnrichmentRecord {
            external_id: Some("0VjIjW4GlUZAMYd2vXMi3b".to_string()),
            album: Some("After Hours".to_string()),
            popularity: Some(90),
            explicit: Some(false),
            genres: Some("synth-pop, pop".to_string()),
            features: AudioFeatures {
                energy: Some(0.73),
                tempo: Some(171.0),
                ..Default::default()
            },
            ..EnrichmentRecord::not_found(&TrackKey::new(track, "the weeknd"))
        }
    }

    #[test]
    fn test_listen_events_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let events = sample_events();
        assert_eq!(db.save_listen_events(&events).unwrap(), 3);

        let loaded = db.load_listen_events().unwrap();
        assert_eq!(loaded, events);
        assert_eq!(loaded[0].timestamp.offset().local_minus_utc(), 3600);
        assert_eq!(loaded[1].duration_ms, Field::Missing);
        assert_eq!(loaded[2].duration_ms, Field::NotApplicable);
        assert_eq!(loaded[2].skipped, Field::NotApplicable);
    }

    #[test]
    fn test_save_replaces_contents() {
        let db = Database::open_in_memory().unwrap();
        db.save_listen_events(&sample_events()).unwrap();
        db.save_listen_events(&sample_events()[..1]).unwrap();
        assert_eq!(db.load_listen_events().unwrap().len(), 1);
        assert_eq!(db.stats().unwrap().listen_events, 1);
    }

    #[test]
    fn test_exists_tracks_saved_tables() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.exists(LISTEN_EVENTS).unwrap());

        db.save_listen_events(&[]).unwrap();
        assert!(db.exists(LISTEN_EVENTS).unwrap());
        assert!(!db.exists(UNIFIED_EVENTS).unwrap());
    }

    #[test]
    fn test_track_ids_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let lookup = IdentifierLookupTable::build([(
            Some("Blinding Lights"),
            Some("The Weeknd"),
            Some("spotify:track:0VjIjW4GlUZAMYd2vXMi3b"),
        )]);
        db.save_track_ids(&lookup).unwrap();

        let loaded = db.load_track_ids().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.get(&TrackKey::new("blinding lights", "the weeknd")),
            Some("0VjIjW4GlUZAMYd2vXMi3b")
        );
    }

    #[test]
    fn test_enrichment_round_trip_keeps_first_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let first = found_record("blinding lights");
        let mut second = found_record("blinding lights");
        second.album = Some("Other".to_string());
        let missing = EnrichmentRecord::not_found(&TrackKey::new("unknown", "unknown"));

        db.save_enrichment(&[first.clone(), second, missing.clone()]).unwrap();
        let loaded = db.load_enrichment().unwrap();
        assert_eq!(loaded, vec![first, missing]);
    }

    #[test]
    fn test_unified_and_stats() {
        let db = Database::open_in_memory().unwrap();
        let events = sample_events();
        db.save_listen_events(&events).unwrap();

        let rows: Vec<UnifiedListenEvent> = events
            .into_iter()
            .map(|event| {
                let enrichment = (event.track == "blinding lights")
                    .then(|| found_record("blinding lights"));
                UnifiedListenEvent { event, enrichment }
            })
            .collect();
        db.save_unified(&rows).unwrap();
        db.save_enrichment(&[found_record("blinding lights")]).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.listen_events, 3);
        assert_eq!(stats.spotify_events, 2);
        assert_eq!(stats.youtube_events, 1);
        assert_eq!(stats.enrichment_records, 1);
        assert_eq!(stats.enrichment_found, 1);
        assert_eq!(stats.unified_events, 3);
        assert_eq!(stats.unified_found, 2);
        assert_eq!(stats.unified_with_features, 2);
    }

    #[test]
    fn test_stats_empty() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.listen_events, 0);
        assert_eq!(stats.unified_events, 0);
    }
}
