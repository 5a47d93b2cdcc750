pub mod spotify;
pub mod youtube;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, FixedOffset};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::db::models::{RawListenEvent, Source};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Where exports live and which rows to keep.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub raw_dir: PathBuf,
    /// Keep only events from this calendar year.
    pub year: Option<i32>,
}

/// Load one source's export. `None` when the source is absent or has no
/// usable rows, which callers treat as a normal state.
pub fn load(source: Source, opts: &LoadOptions) -> Option<Vec<RawListenEvent>> {
    if !opts.raw_dir.is_dir() {
        log::warn!("Raw data directory {} does not exist", opts.raw_dir.display());
        return None;
    }

    let rows = match source {
        Source::Spotify => spotify::load(opts),
        Source::YoutubeMusic => youtube::load(opts),
    };

    match rows {
        Some(rows) if !rows.is_empty() => {
            log::info!("Loaded {} {} events", rows.len(), source);
            Some(rows)
        }
        Some(_) => {
            log::warn!("No {source} events left after filtering");
            None
        }
        None => {
            log::info!("No {source} export found in {}", opts.raw_dir.display());
            None
        }
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let contents = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| IngestError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

fn in_year(ts: &DateTime<FixedOffset>, year: Option<i32>) -> bool {
    year.is_none_or(|y| ts.year() == y)
}
