//! Two-phase catalog enrichment.
//!
//! Phase 1 resolves every distinct track key to a catalog track, one key at a
//! time: a direct fetch when the id is already known, otherwise a single text
//! search. Genres come from one artist lookup per distinct artist id.
//!
//! Phase 2 collects the resolved ids and fetches audio features in batches,
//! since that endpoint accepts up to 100 ids per request while the per-track
//! calls do not batch at all.
//!
//! Failures stay local: a failed key becomes "not found", a failed batch
//! leaves its ids without features. Only a catalog that fails every single
//! key aborts the run.

use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::catalog::{CatalogClient, CatalogError, CatalogTrack, MAX_FEATURE_BATCH};
use crate::db::models::{AudioFeatures, EnrichmentRecord, TrackKey};
use crate::identifiers::{PlannedKey, Resolution, ResolutionPlan};
use crate::normalize::is_unknown;

/// Genre label for a resolved track whose artist genres are unavailable.
pub const UNKNOWN_GENRE: &str = "Unknown";

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Catalog unavailable: all {attempted} track lookups failed (last error: {last_error})")]
    CatalogUnavailable { attempted: usize, last_error: String },
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Ids per audio-feature request, clamped to 1..=100.
    pub batch_size: usize,
    /// Pause between feature batches.
    pub batch_delay: Duration,
    pub show_progress: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            batch_size: MAX_FEATURE_BATCH,
            batch_delay: Duration::from_millis(500),
            show_progress: true,
        }
    }
}

/// Counters for one enrichment run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichStats {
    pub keys: usize,
    pub found_by_id: usize,
    pub found_by_search: usize,
    pub not_found: usize,
    pub unsearchable: usize,
    /// Keys where every catalog call errored.
    pub errors: usize,
    /// Subset of `errors` caused by an unreadable response.
    pub malformed: usize,
    pub artist_lookups: usize,
    pub artist_failures: usize,
    pub feature_batches: usize,
    pub feature_batches_failed: usize,
    pub with_features: usize,
}

impl EnrichStats {
    pub fn found(&self) -> usize {
        self.found_by_id + self.found_by_search
    }

    /// Keys that needed at least one catalog call.
    pub fn attempted(&self) -> usize {
        self.keys - self.unsearchable
    }
}

/// A key whose lookup ended in a client error. Its record is empty.
#[derive(Debug)]
pub struct RecordFailure {
    pub key: TrackKey,
    pub error: CatalogError,
}

#[derive(Debug)]
pub struct EnrichmentRun {
    /// One record per planned key, in plan order.
    pub records: Vec<EnrichmentRecord>,
    /// Keys whose record is empty because of an error rather than a miss.
    pub failures: Vec<RecordFailure>,
    pub stats: EnrichStats,
}

enum KeyOutcome {
    Found { track: CatalogTrack, by_id: bool },
    NotFound,
    Unsearchable,
    Failed(CatalogError),
}

fn progress_bar(len: usize, unit: &str, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(&format!(
            "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{eta}}) {{msg}}"
        ))
        .unwrap()
        .progress_chars("#>-"),
    );
    pb
}

/// Resolve one key: direct fetch for a known id, falling back to one search.
fn resolve_key<C: CatalogClient + ?Sized>(client: &mut C, planned: &PlannedKey) -> KeyOutcome {
    let key = &planned.key;
    match &planned.resolution {
        Resolution::Unsearchable => return KeyOutcome::Unsearchable,
        Resolution::Known(id) => match client.get_track(id) {
            Ok(track) => return KeyOutcome::Found { track, by_id: true },
            // An unreadable response fails the record, a search won't fix it
            Err(e) if e.is_structural() => return KeyOutcome::Failed(e),
            Err(e) if is_unknown(&key.track) => {
                log::warn!("get_track {id} failed for \"{key}\": {e}; unknown title, no search");
                return KeyOutcome::NotFound;
            }
            Err(e) => {
                log::warn!("get_track {id} failed for \"{key}\": {e}; falling back to search")
            }
        },
        Resolution::Search => {}
    }

    match client.search(&key.track, &key.artist) {
        Ok(Some(track)) => KeyOutcome::Found { track, by_id: false },
        Ok(None) => {
            log::debug!("No catalog match for \"{key}\"");
            KeyOutcome::NotFound
        }
        Err(e) => KeyOutcome::Failed(e),
    }
}

/// Genres for an artist id, fetched at most once per run.
fn artist_genres<C: CatalogClient + ?Sized>(
    client: &mut C,
    cache: &mut HashMap<String, String>,
    artist_id: &str,
    stats: &mut EnrichStats,
) -> String {
    if let Some(genres) = cache.get(artist_id) {
        return genres.clone();
    }

    stats.artist_lookups += 1;
    let genres = match client.get_artist(artist_id) {
        Ok(artist) if !artist.genres.is_empty() => artist.genres.join(", "),
        Ok(_) => UNKNOWN_GENRE.to_string(),
        Err(e) => {
            stats.artist_failures += 1;
            log::warn!("Artist lookup {artist_id} failed: {e}");
            UNKNOWN_GENRE.to_string()
        }
    };
    cache.insert(artist_id.to_string(), genres.clone());
    genres
}

fn found_record(key: &TrackKey, track: &CatalogTrack, genres: String) -> EnrichmentRecord {
    EnrichmentRecord {
        track: key.track.clone(),
        artist: key.artist.clone(),
        external_id: Some(track.id.clone()),
        album: track.album.clone(),
        release_date: track.release_date.clone(),
        art_url: track.art_url.clone(),
        popularity: track.popularity,
        explicit: track.explicit,
        duration_ms_catalog: track.duration_ms,
        genres: Some(genres),
        features: AudioFeatures::default(),
    }
}

/// Fetch features for `ids` in batches. A failed batch is skipped.
pub fn fetch_audio_features<C: CatalogClient + ?Sized>(
    client: &mut C,
    ids: &[String],
    opts: &EnrichOptions,
    stats: &mut EnrichStats,
) -> HashMap<String, AudioFeatures> {
    let batch_size = opts.batch_size.clamp(1, MAX_FEATURE_BATCH);
    let batch_count = ids.len().div_ceil(batch_size);
    let pb = progress_bar(batch_count, "batches", opts.show_progress);
    let mut features = HashMap::new();

    for (i, batch) in ids.chunks(batch_size).enumerate() {
        if i > 0 && !opts.batch_delay.is_zero() {
            thread::sleep(opts.batch_delay);
        }
        stats.feature_batches += 1;

        match client.get_audio_features(batch) {
            Ok(results) => {
                // Results are positional; a null entry means no features for that id
                for (id, result) in batch.iter().zip(results) {
                    if let Some(f) = result {
                        features.insert(id.clone(), f.features);
                    }
                }
            }
            Err(e) => {
                stats.feature_batches_failed += 1;
                log::warn!(
                    "Audio-feature batch {}/{} ({} ids) failed: {e}",
                    i + 1,
                    batch_count,
                    batch.len()
                );
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    features
}

/// Enrich every key in the plan. Each planned key yields exactly one record.
pub fn enrich_tracks<C: CatalogClient + ?Sized>(
    client: &mut C,
    plan: &ResolutionPlan,
    opts: &EnrichOptions,
) -> Result<EnrichmentRun, EnrichError> {
    let mut stats = EnrichStats {
        keys: plan.keys.len(),
        ..Default::default()
    };
    let mut genre_cache: HashMap<String, String> = HashMap::new();
    let mut records: Vec<EnrichmentRecord> = Vec::with_capacity(plan.keys.len());
    let mut failures: Vec<RecordFailure> = Vec::new();

    // Phase 1: one resolve per key
    let pb = progress_bar(plan.keys.len(), "tracks", opts.show_progress);
    for planned in &plan.keys {
        pb.set_message(planned.key.to_string());

        let record = match resolve_key(client, planned) {
            KeyOutcome::Found { track, by_id } => {
                if by_id {
                    stats.found_by_id += 1;
                } else {
                    stats.found_by_search += 1;
                }
                let genres = match track.primary_artist_id() {
                    Some(artist_id) => {
                        artist_genres(client, &mut genre_cache, artist_id, &mut stats)
                    }
                    None => UNKNOWN_GENRE.to_string(),
                };
                found_record(&planned.key, &track, genres)
            }
            KeyOutcome::NotFound => {
                stats.not_found += 1;
                EnrichmentRecord::not_found(&planned.key)
            }
            KeyOutcome::Unsearchable => {
                stats.unsearchable += 1;
                EnrichmentRecord::not_found(&planned.key)
            }
            KeyOutcome::Failed(e) => {
                stats.errors += 1;
                if e.is_structural() {
                    stats.malformed += 1;
                    log::error!("Unreadable catalog response for \"{}\": {e}", planned.key);
                } else {
                    log::warn!("Lookup failed for \"{}\": {e}", planned.key);
                }
                failures.push(RecordFailure {
                    key: planned.key.clone(),
                    error: e,
                });
                EnrichmentRecord::not_found(&planned.key)
            }
        };
        records.push(record);
        pb.inc(1);
    }
    pb.finish_and_clear();

    if stats.attempted() > 0 && stats.errors == stats.attempted() {
        return Err(EnrichError::CatalogUnavailable {
            attempted: stats.attempted(),
            last_error: failures
                .last()
                .map(|f| f.error.to_string())
                .unwrap_or_default(),
        });
    }

    log::info!(
        "Phase 1: {} found ({} by id, {} by search), {} not found, {} unsearchable, {} errors",
        stats.found(),
        stats.found_by_id,
        stats.found_by_search,
        stats.not_found,
        stats.unsearchable,
        stats.errors
    );

    // Phase 2: batched audio features for the distinct resolved ids
    let mut seen = HashSet::new();
    let ids: Vec<String> = records
        .iter()
        .filter_map(|r| r.external_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect();

    let features = fetch_audio_features(client, &ids, opts, &mut stats);
    for record in &mut records {
        if let Some(f) = record.external_id.as_ref().and_then(|id| features.get(id)) {
            record.features = f.clone();
            stats.with_features += 1;
        }
    }

    log::info!(
        "Phase 2: {} feature batches ({} failed), {} tracks with audio features",
        stats.feature_batches,
        stats.feature_batches_failed,
        stats.with_features
    );

    Ok(EnrichmentRun {
        records,
        failures,
        stats,
    })
}
