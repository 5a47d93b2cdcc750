//! Known catalog identifiers and the per-run resolution plan.

use std::collections::HashMap;

use regex::Regex;
use std::sync::LazyLock;

use crate::db::models::{CanonicalListenEvent, RawListenEvent, Source, TrackKey};
use crate::normalize::{is_unknown, normalize_artist, normalize_track};

/// Substrings that mark a reference as something other than a catalog track.
const REJECT_MARKERS: &[&str] = &["local", "episode", "http", "unknown"];

const TRACK_URI_PREFIX: &str = "spotify:track:";

/// Characters stripped from the ends of a reference after the prefix is removed.
const SEPARATORS: &[char] = &[':', '/', ' ', '\t', '"', '\''];

static CATALOG_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{22}$").unwrap());

/// Extract a catalog track id from a raw export reference.
///
/// Returns `None` for local files, podcast episodes, URLs, placeholders and
/// anything that isn't a 22-character alphanumeric id once the
/// `spotify:track:` prefix is gone.
pub fn clean_catalog_id(raw: &str) -> Option<String> {
    let lowered = raw.to_lowercase();
    if REJECT_MARKERS.iter().any(|m| lowered.contains(*m)) {
        return None;
    }

    let trimmed = raw.trim().trim_matches(SEPARATORS);
    let without_prefix = match trimmed.get(..TRACK_URI_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(TRACK_URI_PREFIX) => {
            &trimmed[TRACK_URI_PREFIX.len()..]
        }
        _ => trimmed,
    };
    let id = without_prefix.trim_matches(SEPARATORS);

    CATALOG_ID_RE.is_match(id).then(|| id.to_string())
}

/// TrackKey → catalog id, built once from previously known references.
#[derive(Debug, Default)]
pub struct IdentifierLookupTable {
    ids: HashMap<TrackKey, String>,
}

impl IdentifierLookupTable {
    /// Build from `(track, artist, raw_reference)` rows. Names are normalized
    /// so they line up with the event log; the first valid id per key wins.
    pub fn build<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>, Option<&'a str>)>,
    {
        let mut ids = HashMap::new();
        let mut rejected = 0usize;

        for (track, artist, reference) in rows {
            let Some(reference) = reference else { continue };
            match clean_catalog_id(reference) {
                Some(id) => {
                    let key = TrackKey::new(normalize_track(track), normalize_artist(artist));
                    ids.entry(key).or_insert(id);
                }
                None => rejected += 1,
            }
        }

        log::info!(
            "Identifier lookup table: {} keys ({} references rejected)",
            ids.len(),
            rejected
        );
        Self { ids }
    }

    /// Build from raw Spotify export rows (their `spotify_track_uri`).
    pub fn from_raw_events(rows: &[RawListenEvent]) -> Self {
        Self::build(
            rows.iter()
                .filter(|r| r.source == Source::Spotify)
                .map(|r| (r.track_name.as_deref(), r.artist_name.as_deref(), r.uri.as_deref())),
        )
    }

    pub fn get(&self, key: &TrackKey) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TrackKey, &str)> {
        self.ids.iter().map(|(k, v)| (k, v.as_str()))
    }
}

/// Rebuild from already-cleaned, already-normalized entries (e.g. the store).
impl FromIterator<(TrackKey, String)> for IdentifierLookupTable {
    fn from_iter<I: IntoIterator<Item = (TrackKey, String)>>(iter: I) -> Self {
        let mut ids = HashMap::new();
        for (key, id) in iter {
            ids.entry(key).or_insert(id);
        }
        Self { ids }
    }
}

/// A distinct key with the number of events that share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTally {
    pub key: TrackKey,
    pub play_count: usize,
}

/// Distinct keys of the log, most played first (ties by key).
pub fn tally_tracks(events: &[CanonicalListenEvent]) -> Vec<TrackTally> {
    let mut counts: HashMap<TrackKey, usize> = HashMap::new();
    for event in events {
        *counts.entry(event.key()).or_default() += 1;
    }

    let mut tallies: Vec<TrackTally> = counts
        .into_iter()
        .map(|(key, play_count)| TrackTally { key, play_count })
        .collect();
    tallies.sort_by(|a, b| b.play_count.cmp(&a.play_count).then_with(|| a.key.cmp(&b.key)));
    tallies
}

/// How a distinct key will be resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Fetch the track directly by this id.
    Known(String),
    /// Run one text search.
    Search,
    /// Title is the unknown sentinel and no id is known: nothing to look up.
    Unsearchable,
}

#[derive(Debug, Clone)]
pub struct PlannedKey {
    pub key: TrackKey,
    pub play_count: usize,
    pub resolution: Resolution,
}

/// Partition of every distinct key, computed once per run.
#[derive(Debug, Default)]
pub struct ResolutionPlan {
    pub keys: Vec<PlannedKey>,
}

impl ResolutionPlan {
    pub fn build(events: &[CanonicalListenEvent], lookup: &IdentifierLookupTable) -> Self {
        let keys: Vec<PlannedKey> = tally_tracks(events)
            .into_iter()
            .map(|TrackTally { key, play_count }| {
                let resolution = match lookup.get(&key) {
                    Some(id) => Resolution::Known(id.to_string()),
                    None if is_unknown(&key.track) => Resolution::Unsearchable,
                    None => Resolution::Search,
                };
                PlannedKey { key, play_count, resolution }
            })
            .collect();

        let plan = Self { keys };
        log::info!(
            "Resolution plan: {} distinct tracks ({} known ids, {} to search, {} unsearchable)",
            plan.keys.len(),
            plan.known_count(),
            plan.search_count(),
            plan.unsearchable_count()
        );
        plan
    }

    pub fn known_count(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Known(_)))
    }

    pub fn search_count(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Search))
    }

    pub fn unsearchable_count(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Unsearchable))
    }

    fn count(&self, pred: impl Fn(&Resolution) -> bool) -> usize {
        self.keys.iter().filter(|k| pred(&k.resolution)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CalendarFields, Field};
    use chrono::DateTime;

    const ID: &str = "0VjIjW4GlUZAMYd2vXMi3b";

    fn event(track: &str, artist: &str) -> CanonicalListenEvent {
        let ts = DateTime::parse_from_rfc3339("2025-04-01T12:00:00Z").unwrap();
        CanonicalListenEvent {
            timestamp: ts,
            track: track.to_string(),
            artist: artist.to_string(),
            source: Source::Spotify,
            duration_ms: Field::Missing,
            skipped: Field::Missing,
            calendar: CalendarFields::from_timestamp(&ts),
        }
    }

    #[test]
    fn test_clean_accepts_uri_and_bare_id() {
        assert_eq!(clean_catalog_id(&format!("spotify:track:{ID}")).as_deref(), Some(ID));
        assert_eq!(clean_catalog_id(ID).as_deref(), Some(ID));
        assert_eq!(clean_catalog_id(&format!("  {ID}: ")).as_deref(), Some(ID));
        assert_eq!(clean_catalog_id(&format!("Spotify:Track:{ID}")).as_deref(), Some(ID));
    }

    #[test]
    fn test_clean_rejects_placeholders() {
        assert_eq!(clean_catalog_id("spotify:local:Artist:Album:Song:215"), None);
        assert_eq!(clean_catalog_id("spotify:episode:4rOoJ6Egrf8K2IrywzwOMk"), None);
        assert_eq!(clean_catalog_id(&format!("https://open.spotify.com/track/{ID}")), None);
        assert_eq!(clean_catalog_id("UNKNOWN"), None);
        assert_eq!(clean_catalog_id("Local file"), None);
    }

    #[test]
    fn test_clean_rejects_wrong_shape() {
        assert_eq!(clean_catalog_id(""), None);
        assert_eq!(clean_catalog_id("spotify:track:"), None);
        assert_eq!(clean_catalog_id("spotify:track:short"), None);
        assert_eq!(clean_catalog_id(&format!("{ID}X")), None);
        assert_eq!(clean_catalog_id("0VjIjW4GlUZAMYd2vXMi3-"), None);
    }

    #[test]
    fn test_lookup_normalizes_names_and_keeps_first() {
        let other = "7qiZfU4dY1lWllzX7mPBI3";
        let rows = vec![
            (
                Some("Blinding Lights"),
                Some("The Weeknd"),
                Some("spotify:track:0VjIjW4GlUZAMYd2vXMi3b"),
            ),
            (
                Some("BLINDING LIGHTS"),
                Some("The Weeknd"),
                Some("spotify:track:7qiZfU4dY1lWllzX7mPBI3"),
            ),
            (Some("Podcast"), Some("Host"), Some("spotify:episode:xyz")),
            (Some("No Uri"), Some("Nobody"), None),
        ];
        let table = IdentifierLookupTable::build(rows);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&TrackKey::new("blinding lights", "the weeknd")), Some(ID));
        assert_ne!(table.get(&TrackKey::new("blinding lights", "the weeknd")), Some(other));
    }

    #[test]
    fn test_tally_orders_by_play_count() {
        let events = vec![
            event("b", "x"),
            event("a", "x"),
            event("b", "x"),
            event("c", "x"),
        ];
        let tallies = tally_tracks(&events);
        assert_eq!(tallies.len(), 3);
        assert_eq!(tallies[0], TrackTally { key: TrackKey::new("b", "x"), play_count: 2 });
        assert_eq!(tallies[1].key, TrackKey::new("a", "x"));
        assert_eq!(tallies[2].key, TrackKey::new("c", "x"));
    }

    #[test]
    fn test_plan_partitions_each_key_once() {
        let table = IdentifierLookupTable::build(vec![(
            Some("Blinding Lights"),
            Some("The Weeknd"),
            Some(ID),
        )]);
        let events = vec![
            event("blinding lights", "the weeknd"),
            event("blinding lights", "the weeknd"),
            event("espresso", "sabrina carpenter"),
            event("unknown", "unknown"),
            event("unknown", "some channel"),
        ];
        let plan = ResolutionPlan::build(&events, &table);

        assert_eq!(plan.keys.len(), 4);
        assert_eq!(plan.known_count(), 1);
        assert_eq!(plan.search_count(), 1);
        assert_eq!(plan.unsearchable_count(), 2);
        assert_eq!(plan.keys[0].resolution, Resolution::Known(ID.to_string()));
        assert_eq!(plan.keys[0].play_count, 2);
    }
}
