//! Deterministic in-memory catalog for tests.

use std::collections::{HashMap, HashSet};

use super::{
    CatalogArtist, CatalogClient, CatalogError, CatalogTrack, MAX_FEATURE_BATCH, TrackFeatures,
};
use crate::db::models::AudioFeatures;

#[derive(Debug, Default)]
pub struct Calls {
    pub search: Vec<(String, String)>,
    pub get_track: Vec<String>,
    pub get_artist: Vec<String>,
    pub feature_batches: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct FakeCatalog {
    tracks: HashMap<String, CatalogTrack>,
    search_hits: HashMap<(String, String), String>,
    artists: HashMap<String, Vec<String>>,
    features: HashMap<String, AudioFeatures>,
    failing_tracks: HashSet<String>,
    malformed_tracks: HashSet<String>,
    failing_searches: HashSet<(String, String)>,
    malformed_searches: HashSet<(String, String)>,
    failing_artists: HashSet<String>,
    /// 1-based feature batch call numbers that fail.
    failing_batches: HashSet<usize>,
    offline: bool,
    pub calls: Calls,
}

pub fn track(id: &str, name: &str, artist_id: &str) -> CatalogTrack {
    CatalogTrack {
        id: id.to_string(),
        name: name.to_string(),
        album: Some(format!("{name} (album)")),
        release_date: Some("2020-03-20".to_string()),
        art_url: Some(format!("https://i.scdn.co/image/{id}")),
        popularity: Some(80),
        explicit: Some(false),
        duration_ms: Some(200_040),
        artist_ids: vec![artist_id.to_string()],
    }
}

pub fn features(energy: f64) -> AudioFeatures {
    AudioFeatures {
        energy: Some(energy),
        valence: Some(0.5),
        danceability: Some(0.6),
        acousticness: Some(0.01),
        instrumentalness: Some(0.0),
        speechiness: Some(0.05),
        tempo: Some(171.0),
        loudness: Some(-5.9),
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track reachable by id and, when given, by search.
    pub fn with_track(mut self, t: CatalogTrack, search_as: Option<(&str, &str)>) -> Self {
        if let Some((track, artist)) = search_as {
            self.search_hits
                .insert((track.to_string(), artist.to_string()), t.id.clone());
        }
        self.tracks.insert(t.id.clone(), t);
        self
    }

    pub fn with_artist(mut self, id: &str, genres: &[&str]) -> Self {
        self.artists
            .insert(id.to_string(), genres.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn with_features(mut self, id: &str, f: AudioFeatures) -> Self {
        self.features.insert(id.to_string(), f);
        self
    }

    pub fn failing_track(mut self, id: &str) -> Self {
        self.failing_tracks.insert(id.to_string());
        self
    }

    pub fn malformed_track(mut self, id: &str) -> Self {
        self.malformed_tracks.insert(id.to_string());
        self
    }

    pub fn failing_search(mut self, track: &str, artist: &str) -> Self {
        self.failing_searches.insert((track.to_string(), artist.to_string()));
        self
    }

    pub fn malformed_search(mut self, track: &str, artist: &str) -> Self {
        self.malformed_searches.insert((track.to_string(), artist.to_string()));
        self
    }

    pub fn failing_artist(mut self, id: &str) -> Self {
        self.failing_artists.insert(id.to_string());
        self
    }

    pub fn failing_batch(mut self, call_number: usize) -> Self {
        self.failing_batches.insert(call_number);
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    fn check_online(&self) -> Result<(), CatalogError> {
        if self.offline {
            Err(CatalogError::Transient("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl CatalogClient for FakeCatalog {
    fn search(&mut self, track: &str, artist: &str) -> Result<Option<CatalogTrack>, CatalogError> {
        let pair = (track.to_string(), artist.to_string());
        self.calls.search.push(pair.clone());
        self.check_online()?;

        if self.failing_searches.contains(&pair) {
            return Err(CatalogError::Transient("search timed out".into()));
        }
        if self.malformed_searches.contains(&pair) {
            return Err(CatalogError::Malformed {
                endpoint: "search".into(),
                message: "missing field `tracks`".into(),
            });
        }
        Ok(self
            .search_hits
            .get(&pair)
            .and_then(|id| self.tracks.get(id))
            .cloned())
    }

    fn get_track(&mut self, id: &str) -> Result<CatalogTrack, CatalogError> {
        self.calls.get_track.push(id.to_string());
        self.check_online()?;

        if self.failing_tracks.contains(id) {
            return Err(CatalogError::Transient(format!("HTTP 503 for track {id}")));
        }
        if self.malformed_tracks.contains(id) {
            return Err(CatalogError::Malformed {
                endpoint: format!("tracks/{id}"),
                message: "missing field `id`".into(),
            });
        }
        self.tracks
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    fn get_artist(&mut self, id: &str) -> Result<CatalogArtist, CatalogError> {
        self.calls.get_artist.push(id.to_string());
        self.check_online()?;

        if self.failing_artists.contains(id) {
            return Err(CatalogError::Transient(format!("HTTP 502 for artist {id}")));
        }
        self.artists
            .get(id)
            .map(|genres| CatalogArtist { genres: genres.clone() })
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    fn get_audio_features(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<Option<TrackFeatures>>, CatalogError> {
        self.calls.feature_batches.push(ids.to_vec());
        self.check_online()?;

        if ids.len() > MAX_FEATURE_BATCH {
            return Err(CatalogError::BatchTooLarge(ids.len()));
        }
        if self.failing_batches.contains(&self.calls.feature_batches.len()) {
            return Err(CatalogError::RateLimited { retry_after_secs: Some(30) });
        }
        Ok(ids
            .iter()
            .map(|id| {
                self.features.get(id).map(|f| TrackFeatures {
                    id: id.clone(),
                    features: f.clone(),
                })
            })
            .collect())
    }
}
