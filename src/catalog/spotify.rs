//! Spotify Web API client (client-credentials flow, blocking `ureq`).

use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use ureq::Agent;

use super::{
    CatalogArtist, CatalogClient, CatalogError, CatalogTrack, MAX_FEATURE_BATCH, TrackFeatures,
    search_query,
};
use crate::db::models::AudioFeatures;

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh the token this long before Spotify says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

/// Longest `Retry-After` we are willing to sleep through.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Used when the advertised token lifetime doesn't fit in an `Instant`.
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Transport settings for [`SpotifyClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Applied to every HTTP call, including the token exchange.
    pub timeout: Duration,
    /// Extra attempts after a transient failure. 0 disables retry.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub backoff: Duration,
    pub api_base: String,
    pub token_url: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff: Duration::from_millis(500),
            api_base: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

// --- Wire types (partial, we only read what the enrichment needs) ---

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    album: Option<AlbumObject>,
    #[serde(default)]
    artists: Vec<ArtistRef>,
    popularity: Option<i64>,
    explicit: Option<bool>,
    duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeatureObject>>,
}

#[derive(Debug, Deserialize)]
struct AudioFeatureObject {
    id: String,
    energy: Option<f64>,
    valence: Option<f64>,
    danceability: Option<f64>,
    acousticness: Option<f64>,
    instrumentalness: Option<f64>,
    speechiness: Option<f64>,
    tempo: Option<f64>,
    loudness: Option<f64>,
}

impl From<TrackObject> for CatalogTrack {
    fn from(t: TrackObject) -> Self {
        let (album, release_date, art_url) = match t.album {
            // Spotify lists images largest first
            Some(a) => (a.name, a.release_date, a.images.into_iter().next().map(|i| i.url)),
            None => (None, None, None),
        };
        Self {
            id: t.id,
            name: t.name,
            album,
            release_date,
            art_url,
            popularity: t.popularity,
            explicit: t.explicit,
            duration_ms: t.duration_ms,
            artist_ids: t.artists.into_iter().filter_map(|a| a.id).collect(),
        }
    }
}

impl From<AudioFeatureObject> for TrackFeatures {
    fn from(f: AudioFeatureObject) -> Self {
        Self {
            id: f.id,
            features: AudioFeatures {
                energy: f.energy,
                valence: f.valence,
                danceability: f.danceability,
                acousticness: f.acousticness,
                instrumentalness: f.instrumentalness,
                speechiness: f.speechiness,
                tempo: f.tempo,
                loudness: f.loudness,
            },
        }
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    agent: Agent,
    credentials: Credentials,
    settings: ClientSettings,
    token: Option<AccessToken>,
}

impl SpotifyClient {
    /// Build a client and perform the initial token exchange.
    pub fn connect(
        credentials: Credentials,
        settings: ClientSettings,
    ) -> Result<Self, CatalogError> {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(false)
            .build()
            .into();

        let mut client = Self {
            agent,
            credentials,
            settings,
            token: None,
        };
        client.refresh_token()?;
        Ok(client)
    }

    fn refresh_token(&mut self) -> Result<(), CatalogError> {
        log::debug!("Requesting Spotify access token");
        let mut response = self
            .agent
            .post(&self.settings.token_url)
            .send_form([
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .map_err(|e| CatalogError::Auth(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| CatalogError::Auth(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(CatalogError::Auth(format!("HTTP {status}: {}", snippet(&body))));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| CatalogError::Auth(format!("bad token response: {e}")))?;
        self.token = Some(AccessToken {
            value: parsed.access_token,
            expires_at: token_expiry(Instant::now(), parsed.expires_in),
        });
        Ok(())
    }

    fn bearer(&mut self) -> Result<String, CatalogError> {
        let expired = self
            .token
            .as_ref()
            .is_none_or(|t| Instant::now() >= t.expires_at);
        if expired {
            self.refresh_token()?;
        }
        self.token
            .as_ref()
            .map(|t| format!("Bearer {}", t.value))
            .ok_or_else(|| CatalogError::Auth("no access token".into()))
    }

    /// GET with bounded retry on transient failures.
    fn get_json<T: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let (max_retries, backoff) = (self.settings.max_retries, self.settings.backoff);
        with_retry(path, max_retries, backoff, || self.get_once(path, query))
    }

    fn get_once<T: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let auth = self.bearer()?;
        let url = format!("{}/{path}", self.settings.api_base);

        let mut request = self.agent.get(&url).header("Authorization", auth);
        for (k, v) in query {
            request = request.query(*k, *v);
        }

        let mut response = request
            .call()
            .map_err(|e| CatalogError::Transient(format!("{path}: {e}")))?;
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| CatalogError::Transient(format!("{path}: reading body: {e}")))?;

        if status == 401 {
            // Token revoked or expired early: force a refresh on the retry
            self.token = None;
        }
        classify(status, retry_after_secs, path, &body)?;

        serde_json::from_str(&body).map_err(|e| CatalogError::Malformed {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Map an HTTP status to the client error taxonomy. `Ok` for any 2xx.
fn classify(
    status: u16,
    retry_after_secs: Option<u64>,
    path: &str,
    body: &str,
) -> Result<(), CatalogError> {
    match status {
        200..=299 => Ok(()),
        401 => Err(CatalogError::Transient(format!("{path}: HTTP 401"))),
        404 => Err(CatalogError::NotFound(path.to_string())),
        429 => Err(CatalogError::RateLimited { retry_after_secs }),
        500..=599 => Err(CatalogError::Transient(format!("{path}: HTTP {status}"))),
        _ => Err(CatalogError::Rejected {
            status,
            message: snippet(body),
        }),
    }
}

/// Run `call` until it succeeds, fails for good, or `max_retries` extra
/// attempts have been spent on transient failures.
fn with_retry<T>(
    path: &str,
    max_retries: u32,
    backoff: Duration,
    mut call: impl FnMut() -> Result<T, CatalogError>,
) -> Result<T, CatalogError> {
    let mut attempt: u32 = 0;
    loop {
        match call() {
            Err(e) if e.is_transient() && attempt < max_retries => {
                let wait = retry_delay(&e, backoff, attempt);
                log::debug!("{path}: {e}; retrying in {wait:?} (attempt {})", attempt + 1);
                thread::sleep(wait);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// When a token advertised as valid for `expires_in` seconds should be refreshed.
fn token_expiry(now: Instant, expires_in: u64) -> Instant {
    let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_SLACK);
    now.checked_add(lifetime)
        .or_else(|| now.checked_add(FALLBACK_TOKEN_LIFETIME))
        .unwrap_or(now)
}

impl CatalogClient for SpotifyClient {
    fn search(&mut self, track: &str, artist: &str) -> Result<Option<CatalogTrack>, CatalogError> {
        let q = search_query(track, artist);
        let resp: SearchResponse = self.get_json(
            "search",
            &[("q", q.as_str()), ("type", "track"), ("limit", "1")],
        )?;
        Ok(resp.tracks.items.into_iter().next().map(CatalogTrack::from))
    }

    fn get_track(&mut self, id: &str) -> Result<CatalogTrack, CatalogError> {
        let t: TrackObject = self.get_json(&format!("tracks/{id}"), &[])?;
        Ok(t.into())
    }

    fn get_artist(&mut self, id: &str) -> Result<CatalogArtist, CatalogError> {
        let a: ArtistObject = self.get_json(&format!("artists/{id}"), &[])?;
        Ok(CatalogArtist { genres: a.genres })
    }

    fn get_audio_features(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<Option<TrackFeatures>>, CatalogError> {
        if ids.len() > MAX_FEATURE_BATCH {
            return Err(CatalogError::BatchTooLarge(ids.len()));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let resp: AudioFeaturesResponse =
            self.get_json("audio-features", &[("ids", joined.as_str())])?;
        Ok(resp
            .audio_features
            .into_iter()
            .map(|f| f.map(TrackFeatures::from))
            .collect())
    }
}

/// Server-provided `Retry-After` (capped) or exponential backoff.
fn retry_delay(err: &CatalogError, base: Duration, attempt: u32) -> Duration {
    match err {
        CatalogError::RateLimited { retry_after_secs: Some(secs) } => {
            Duration::from_secs(*secs).min(MAX_RETRY_AFTER)
        }
        _ => base.saturating_mul(2u32.saturating_pow(attempt)),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}
