//! Spotify extended streaming history (`Streaming_History_Audio_*.json`).

use std::path::PathBuf;

use serde::Deserialize;
use walkdir::WalkDir;

use super::{LoadOptions, in_year, parse_timestamp, read_json_file};
use crate::db::models::{RawListenEvent, Source};

const FILE_PREFIX: &str = "Streaming_History_Audio_";

#[derive(Debug, Deserialize)]
struct StreamRow {
    ts: String,
    master_metadata_track_name: Option<String>,
    master_metadata_album_artist_name: Option<String>,
    master_metadata_album_album_name: Option<String>,
    ms_played: Option<i64>,
    skipped: Option<bool>,
    spotify_track_uri: Option<String>,
}

fn export_files(opts: &LoadOptions) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(&opts.raw_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with(FILE_PREFIX) && name.ends_with(".json")
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// `None` if there are no export files at all.
pub(super) fn load(opts: &LoadOptions) -> Option<Vec<RawListenEvent>> {
    let files = export_files(opts);
    if files.is_empty() {
        return None;
    }

    let mut events = Vec::new();
    let mut bad_timestamps = 0usize;

    for path in &files {
        log::info!("Reading {}", path.display());
        let rows: Vec<StreamRow> = match read_json_file(path) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };

        for row in rows {
            let Some(timestamp) = parse_timestamp(&row.ts) else {
                bad_timestamps += 1;
                continue;
            };
            if !in_year(&timestamp, opts.year) {
                continue;
            }
            events.push(RawListenEvent {
                source: Source::Spotify,
                track_name: row.master_metadata_track_name,
                artist_name: row.master_metadata_album_artist_name,
                album_name: row.master_metadata_album_album_name,
                timestamp,
                duration_ms: row.ms_played,
                skipped: row.skipped,
                uri: row.spotify_track_uri,
            });
        }
    }

    if bad_timestamps > 0 {
        log::warn!("{bad_timestamps} Spotify rows had unparseable timestamps, skipped");
    }
    Some(events)
}
