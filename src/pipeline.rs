//! Stage orchestration.
//!
//! `merge` turns vendor exports into the stored canonical log (plus the
//! known-id side table); `enrich` reads that back, resolves every distinct
//! key against the catalog and stores the per-key records and the joined
//! output. The two stages only meet through the database.

use anyhow::{Context, Result};

use crate::catalog::CatalogClient;
use crate::db::Database;
use crate::db::models::{CanonicalListenEvent, Source};
use crate::db::queries::LISTEN_EVENTS;
use crate::enrich::{EnrichOptions, EnrichStats, enrich_tracks};
use crate::identifiers::{IdentifierLookupTable, ResolutionPlan};
use crate::ingest::{self, LoadOptions};
use crate::join::{Coverage, join_enrichment};
use crate::unify::{MergeStatus, merge_sources};

#[derive(Debug)]
pub struct MergeSummary {
    pub status: MergeStatus,
    pub events: usize,
    pub known_ids: usize,
}

#[derive(Debug)]
pub struct EnrichSummary {
    pub stats: EnrichStats,
    pub coverage: Coverage,
    pub duplicate_records: usize,
}

/// Load both exports, unify them and replace the stored log.
///
/// With neither export present nothing is written and the status says so.
pub fn merge(db: &Database, opts: &LoadOptions) -> Result<MergeSummary> {
    let spotify = ingest::load(Source::Spotify, opts);
    let youtube = ingest::load(Source::YoutubeMusic, opts);

    let lookup = IdentifierLookupTable::from_raw_events(spotify.as_deref().unwrap_or_default());
    let merged = merge_sources(spotify.as_deref(), youtube.as_deref());

    if merged.status == MergeStatus::NothingToMerge {
        return Ok(MergeSummary {
            status: merged.status,
            events: 0,
            known_ids: 0,
        });
    }

    db.save_listen_events(&merged.events)
        .context("Failed to save listen events")?;
    db.save_track_ids(&lookup)
        .context("Failed to save known track ids")?;

    Ok(MergeSummary {
        status: merged.status,
        events: merged.events.len(),
        known_ids: lookup.len(),
    })
}

/// The stored log and its resolution plan. No catalog calls.
pub fn plan(db: &Database) -> Result<(Vec<CanonicalListenEvent>, ResolutionPlan)> {
    if !db.exists(LISTEN_EVENTS).context("Failed to query saved tables")? {
        anyhow::bail!("No listen events stored yet. Run `listenfold merge` first.");
    }
    let events = db
        .load_listen_events()
        .context("Failed to load listen events")?;
    let lookup = db.load_track_ids().context("Failed to load known track ids")?;
    let plan = ResolutionPlan::build(&events, &lookup);
    Ok((events, plan))
}

/// Enrich the stored log and write `enrichment` and `unified_events`.
///
/// A catalog that fails every lookup aborts before anything is written, so
/// the previous output stays intact.
pub fn enrich<C: CatalogClient + ?Sized>(
    db: &Database,
    client: &mut C,
    opts: &EnrichOptions,
) -> Result<EnrichSummary> {
    let (events, plan) = plan(db)?;

    let run = enrich_tracks(client, &plan, opts).context("Enrichment failed")?;

    db.save_enrichment(&run.records)
        .context("Failed to save enrichment records")?;

    let joined = join_enrichment(events, run.records);
    db.save_unified(&joined.rows)
        .context("Failed to save unified events")?;

    let coverage = Coverage::from_rows(&joined.rows);
    log::info!(
        "Unified {} events: {:.1}% matched, {:.1}% with audio features",
        coverage.events,
        coverage.found_pct(),
        coverage.features_pct()
    );

    Ok(EnrichSummary {
        stats: run.stats,
        coverage,
        duplicate_records: joined.duplicate_records,
    })
}
