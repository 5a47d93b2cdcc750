pub mod spotify;

#[cfg(test)]
pub mod fake;

use thiserror::Error;

use crate::db::models::AudioFeatures;
use crate::normalize::is_unknown;

/// Most ids the audio-features endpoint accepts in one request.
pub const MAX_FEATURE_BATCH: usize = 100;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Batch of {0} ids exceeds the per-request limit")]
    BatchTooLarge(usize),
}

impl CatalogError {
    /// Worth retrying: timeouts, 5xx, 429.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// A successful response whose shape we couldn't read.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Track metadata as returned by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    pub album: Option<String>,
    pub release_date: Option<String>,
    pub art_url: Option<String>,
    pub popularity: Option<i64>,
    pub explicit: Option<bool>,
    pub duration_ms: Option<i64>,
    /// Credited artist ids, primary artist first.
    pub artist_ids: Vec<String>,
}

impl CatalogTrack {
    pub fn primary_artist_id(&self) -> Option<&str> {
        self.artist_ids.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogArtist {
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackFeatures {
    pub id: String,
    pub features: AudioFeatures,
}

/// The external catalog. Passed explicitly into the enrichment engine.
///
/// Every call may fail with a transient [`CatalogError`]; callers decide how
/// far a failure spreads.
pub trait CatalogClient {
    /// Best match for a title/artist pair (top result only).
    fn search(&mut self, track: &str, artist: &str) -> Result<Option<CatalogTrack>, CatalogError>;

    fn get_track(&mut self, id: &str) -> Result<CatalogTrack, CatalogError>;

    fn get_artist(&mut self, id: &str) -> Result<CatalogArtist, CatalogError>;

    /// Features for up to [`MAX_FEATURE_BATCH`] ids, aligned with `ids`.
    fn get_audio_features(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<Option<TrackFeatures>>, CatalogError>;
}

/// Field-filtered search query. The artist filter is dropped for the
/// unknown sentinel so a bare title can still match.
pub fn search_query(track: &str, artist: &str) -> String {
    if is_unknown(artist) {
        format!("track:{track}")
    } else {
        format!("track:{track} artist:{artist}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query() {
        assert_eq!(
            search_query("blinding lights", "the weeknd"),
            "track:blinding lights artist:the weeknd"
        );
        assert_eq!(search_query("espresso", "unknown"), "track:espresso");
    }

    #[test]
    fn test_error_classes() {
        assert!(CatalogError::Transient("timeout".into()).is_transient());
        assert!(CatalogError::RateLimited { retry_after_secs: Some(2) }.is_transient());
        assert!(!CatalogError::NotFound("x".into()).is_transient());
        assert!(!CatalogError::Rejected { status: 400, message: String::new() }.is_transient());
        assert!(
            CatalogError::Malformed { endpoint: "tracks".into(), message: "missing id".into() }
                .is_structural()
        );
    }
}
