//! Google Takeout YouTube watch history (`watch-history.json`).

use serde::Deserialize;

use super::{LoadOptions, in_year, parse_timestamp, read_json_file};
use crate::db::models::{RawListenEvent, Source};

pub const EXPORT_FILE: &str = "watch-history.json";

const MUSIC_HEADER: &str = "YouTube Music";
const WATCHED_PREFIX: &str = "Watched ";

#[derive(Debug, Deserialize)]
struct WatchEntry {
    header: Option<String>,
    title: Option<String>,
    #[serde(rename = "titleUrl")]
    title_url: Option<String>,
    time: Option<String>,
    #[serde(default)]
    subtitles: Vec<Subtitle>,
}

#[derive(Debug, Deserialize)]
struct Subtitle {
    name: Option<String>,
}

/// `None` if the export file is missing or unreadable.
pub(super) fn load(opts: &LoadOptions) -> Option<Vec<RawListenEvent>> {
    let path = opts.raw_dir.join(EXPORT_FILE);
    if !path.is_file() {
        return None;
    }

    let entries: Vec<WatchEntry> = match read_json_file(&path) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Could not read {}: {e}", path.display());
            return None;
        }
    };
    log::info!("{} watch-history entries in {}", entries.len(), path.display());

    // Full Takeout exports mix YouTube and YouTube Music; music-only exports
    // have no header at all.
    let has_headers = entries.iter().any(|e| e.header.is_some());

    let mut events = Vec::new();
    let mut bad_timestamps = 0usize;

    for entry in entries {
        if has_headers && entry.header.as_deref() != Some(MUSIC_HEADER) {
            continue;
        }
        let Some(timestamp) = entry.time.as_deref().and_then(parse_timestamp) else {
            bad_timestamps += 1;
            continue;
        };
        if !in_year(&timestamp, opts.year) {
            continue;
        }

        let track_name = entry
            .title
            .map(|t| t.strip_prefix(WATCHED_PREFIX).map(str::to_string).unwrap_or(t));
        let artist_name = entry.subtitles.into_iter().next().and_then(|s| s.name);

        events.push(RawListenEvent {
            source: Source::YoutubeMusic,
            track_name,
            artist_name,
            album_name: None,
            timestamp,
            duration_ms: None,
            skipped: None,
            uri: entry.title_url,
        });
    }

    if bad_timestamps > 0 {
        log::warn!("{bad_timestamps} YouTube Music entries had no usable time, skipped");
    }
    Some(events)
}
