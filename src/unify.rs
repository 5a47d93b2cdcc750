//! Projection of both sources onto the canonical schema and the time-ordered union.

use crate::db::models::{CalendarFields, CanonicalListenEvent, Field, RawListenEvent, Source};
use crate::normalize::{normalize_artist, normalize_track};

/// Outcome of a merge. Having nothing to merge is a normal state, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Merged { spotify: usize, youtube: usize },
    NothingToMerge,
}

#[derive(Debug)]
pub struct MergeResult {
    pub events: Vec<CanonicalListenEvent>,
    pub status: MergeStatus,
}

/// Project one raw row onto the canonical schema.
///
/// Columns the source never carries become [`Field::NotApplicable`]; columns
/// it carries but this row lacks become [`Field::Missing`].
pub fn canonicalize(raw: &RawListenEvent) -> CanonicalListenEvent {
    let (duration_ms, skipped) = match raw.source {
        Source::Spotify => (Field::from(raw.duration_ms), Field::from(raw.skipped)),
        Source::YoutubeMusic => (Field::NotApplicable, Field::NotApplicable),
    };

    CanonicalListenEvent {
        timestamp: raw.timestamp,
        track: normalize_track(raw.track_name.as_deref()),
        artist: normalize_artist(raw.artist_name.as_deref()),
        source: raw.source,
        duration_ms,
        skipped,
        calendar: CalendarFields::from_timestamp(&raw.timestamp),
    }
}

/// Clean a whole source table. One output row per input row, same order.
pub fn clean_table(rows: &[RawListenEvent]) -> Vec<CanonicalListenEvent> {
    rows.iter().map(canonicalize).collect()
}

/// Union whichever sources are present and order the result by timestamp.
///
/// The sort is stable: events with equal timestamps keep Spotify-then-YouTube
/// order and their original order within each source.
pub fn merge_sources(
    spotify: Option<&[RawListenEvent]>,
    youtube: Option<&[RawListenEvent]>,
) -> MergeResult {
    if spotify.is_none() && youtube.is_none() {
        log::warn!("No Spotify or YouTube Music data to merge");
        return MergeResult {
            events: Vec::new(),
            status: MergeStatus::NothingToMerge,
        };
    }

    let spotify_events = spotify.map(clean_table).unwrap_or_default();
    let youtube_events = youtube.map(clean_table).unwrap_or_default();
    let status = MergeStatus::Merged {
        spotify: spotify_events.len(),
        youtube: youtube_events.len(),
    };

    log::info!(
        "Merging {} Spotify and {} YouTube Music events",
        spotify_events.len(),
        youtube_events.len()
    );

    let mut events = spotify_events;
    events.extend(youtube_events);
    events.sort_by_key(|e| e.timestamp);

    MergeResult { events, status }
}
