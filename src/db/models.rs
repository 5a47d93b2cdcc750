use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike};

/// Which streaming service an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Spotify,
    YoutubeMusic,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::YoutubeMusic => "youtube_music",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spotify" => Ok(Self::Spotify),
            "youtube_music" => Ok(Self::YoutubeMusic),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// One row of a vendor export, before any cleanup.
#[derive(Debug, Clone)]
pub struct RawListenEvent {
    pub source: Source,
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub timestamp: DateTime<FixedOffset>,
    pub duration_ms: Option<i64>,
    pub skipped: Option<bool>,
    /// `spotify_track_uri` for Spotify, `titleUrl` for YouTube Music.
    pub uri: Option<String>,
}

/// A canonical column value.
///
/// `NotApplicable` means the source never carries the column (YouTube has no
/// play duration); `Missing` means the source carries it but this row didn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Value(T),
    Missing,
    NotApplicable,
}

impl<T: Copy> Field<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Self::Value(v),
            None => Self::Missing,
        }
    }
}

/// Normalized `(track, artist)` pair. The only join/grouping key in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    pub track: String,
    pub artist: String,
}

impl TrackKey {
    pub fn new(track: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            artist: artist.into(),
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {}", self.track, self.artist)
    }
}

/// Calendar breakdown of an event timestamp, in the timestamp's own offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarFields {
    pub date: NaiveDate,
    pub month: u32,
    pub month_name: String,
    pub weekday: String,
    pub hour: u32,
    pub iso_week: u32,
}

impl CalendarFields {
    pub fn from_timestamp(ts: &DateTime<FixedOffset>) -> Self {
        Self {
            date: ts.date_naive(),
            month: ts.month(),
            month_name: ts.format("%B").to_string(),
            weekday: ts.format("%A").to_string(),
            hour: ts.hour(),
            iso_week: ts.iso_week().week(),
        }
    }
}

/// A listen event projected onto the shared schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalListenEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub track: String,
    pub artist: String,
    pub source: Source,
    pub duration_ms: Field<i64>,
    pub skipped: Field<bool>,
    pub calendar: CalendarFields,
}

impl CanonicalListenEvent {
    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.track.clone(), self.artist.clone())
    }
}

/// Numeric audio descriptors for one catalog track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFeatures {
    pub energy: Option<f64>,
    pub valence: Option<f64>,
    pub danceability: Option<f64>,
    pub acousticness: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub loudness: Option<f64>,
}

impl AudioFeatures {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Catalog metadata for one distinct track key.
///
/// Everything except the key is optional; a key the catalog couldn't resolve
/// gets a record with every field `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRecord {
    pub track: String,
    pub artist: String,
    pub external_id: Option<String>,
    pub album: Option<String>,
    pub release_date: Option<String>,
    pub art_url: Option<String>,
    pub popularity: Option<i64>,
    pub explicit: Option<bool>,
    pub duration_ms_catalog: Option<i64>,
    /// Comma-joined genre list, or `"Unknown"` when the artist lookup failed.
    pub genres: Option<String>,
    pub features: AudioFeatures,
}

impl EnrichmentRecord {
    pub fn not_found(key: &TrackKey) -> Self {
        Self {
            track: key.track.clone(),
            artist: key.artist.clone(),
            external_id: None,
            album: None,
            release_date: None,
            art_url: None,
            popularity: None,
            explicit: None,
            duration_ms_catalog: None,
            genres: None,
            features: AudioFeatures::default(),
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.track.clone(), self.artist.clone())
    }

    pub fn is_found(&self) -> bool {
        self.external_id.is_some()
    }

    pub fn has_features(&self) -> bool {
        !self.features.is_empty()
    }
}

/// Terminal artifact: a canonical event with its enrichment, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedListenEvent {
    pub event: CanonicalListenEvent,
    pub enrichment: Option<EnrichmentRecord>,
}

/// Row counts for the `stats` command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub listen_events: i64,
    pub spotify_events: i64,
    pub youtube_events: i64,
    pub enrichment_records: i64,
    pub enrichment_found: i64,
    pub unified_events: i64,
    pub unified_found: i64,
    pub unified_with_features: i64,
}
