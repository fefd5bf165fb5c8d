//! Spotify Web API client.
//!
//! Calls are made on behalf of a user with their access token; the client
//! credentials are only used to renew that token.

mod library;
mod session;

pub use library::SpotifyLibrary;
pub use session::{Credentials, Session, TokenRefresher};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::SpotifySettings;
use crate::eras::model::{ArtistDetail, ArtistRef, FeatureVector, SavedTrack, TrackPayload};
use crate::error::FetchError;

/// Page size for the saved-tracks listing.
const SAVED_TRACKS_PAGE: u32 = 50;

/// Spotify API client.
#[derive(Clone)]
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_url: String,
}

impl SpotifyClient {
    pub fn new(settings: &SpotifySettings) -> Self {
        Self {
            client: Client::new(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token_url: settings.token_url.clone(),
        }
    }

    /// Exchanges a refresh token for a new access token.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<Credentials, FetchError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let auth = base64::engine::general_purpose::STANDARD.encode(
            format!("{}:{}", self.client_id, self.client_secret).as_bytes(),
        );

        let res = self
            .client
            .post(&self.token_url)
            .header("Authorization", format!("Basic {}", auth))
            .form(&params)
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("token request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = res.text().await.unwrap_or_default();
            return Err(classify_token_failure(status, retry_after.as_deref(), &body));
        }

        let body: TokenResponse = res
            .json()
            .await
            .map_err(|e| FetchError::Upstream(format!("token parse failed: {}", e)))?;
        debug!(expires_in = body.expires_in, "token refreshed");

        Ok(Credentials {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
        })
    }

    /// URL of the first saved-tracks page.
    pub fn saved_tracks_url(&self) -> String {
        format!("{}/me/tracks?limit={}", self.api_base, SAVED_TRACKS_PAGE)
    }

    /// Fetch one page of the user's saved tracks. `url` is either
    /// [`SpotifyClient::saved_tracks_url`] or the `next` link of a previous page.
    pub async fn get_saved_tracks_page(&self, token: &str, url: &str) -> Result<SavedTracksPage, FetchError> {
        let body: SavedTracksResponse = self.get_json(token, url, "saved-tracks").await?;
        Ok(SavedTracksPage {
            items: body.items.into_iter().flatten().map(SavedTrackItem::into_saved).collect(),
            next: body.next,
        })
    }

    /// Fetch audio features for up to 100 track IDs. Tracks without features are left out.
    pub async fn get_audio_features(&self, token: &str, ids: &[String]) -> Result<HashMap<String, FeatureVector>, FetchError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.ids_url("audio-features", ids, 100);
        let body: AudioFeaturesResponse = self.get_json(token, &url, "audio-features").await?;
        Ok(audio_feature_map(body))
    }

    /// Fetch popularity and release year for up to 50 track IDs.
    pub async fn get_track_popularity(&self, token: &str, ids: &[String]) -> Result<HashMap<String, FeatureVector>, FetchError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.ids_url("tracks", ids, 50);
        let body: TracksResponse = self.get_json(token, &url, "tracks").await?;
        Ok(popularity_map(body))
    }

    /// Fetch artist details for up to 50 artist IDs.
    pub async fn get_artists(&self, token: &str, ids: &[String]) -> Result<HashMap<String, ArtistDetail>, FetchError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.ids_url("artists", ids, 50);
        let body: ArtistsResponse = self.get_json(token, &url, "artists").await?;
        Ok(body
            .artists
            .into_iter()
            .flatten()
            .map(|a| {
                (
                    a.id.clone(),
                    ArtistDetail {
                        id: a.id,
                        name: a.name,
                        genres: a.genres,
                    },
                )
            })
            .collect())
    }

    fn ids_url(&self, endpoint: &str, ids: &[String], max: usize) -> String {
        let ids_param = ids.iter().take(max).cloned().collect::<Vec<_>>().join(",");
        format!("{}/{}?ids={}", self.api_base, endpoint, urlencoding::encode(&ids_param))
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &str, url: &str, what: &str) -> Result<T, FetchError> {
        let res = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| FetchError::Upstream(format!("{} request failed: {}", what, e)))?;

        let status = res.status();
        if !status.is_success() {
            let retry_after = res
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after.as_deref(), &body));
        }

        res.json()
            .await
            .map_err(|e| FetchError::Upstream(format!("{} parse failed: {}", what, e)))
    }
}

#[async_trait]
impl TokenRefresher for SpotifyClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, FetchError> {
        self.refresh_access_token(refresh_token).await
    }
}

/// Maps a non-success status to the error the pipeline acts on.
fn classify_failure(status: StatusCode, retry_after: Option<&str>, body: &str) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED => FetchError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        _ => FetchError::Upstream(format!("Spotify API error {}: {}", status, body)),
    }
}

/// Token endpoint failures. Only a rejected grant means the user must sign in again.
fn classify_token_failure(status: StatusCode, retry_after: Option<&str>, body: &str) -> FetchError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => FetchError::AuthExpired,
        _ => classify_failure(status, retry_after, body),
    }
}

fn audio_feature_map(body: AudioFeaturesResponse) -> HashMap<String, FeatureVector> {
    body.audio_features
        .into_iter()
        .flatten()
        .filter_map(|f| {
            let id = f.id?;
            Some((
                id,
                FeatureVector::Audio {
                    energy: f.energy?,
                    valence: f.valence?,
                    danceability: f.danceability?,
                },
            ))
        })
        .collect()
}

fn popularity_map(body: TracksResponse) -> HashMap<String, FeatureVector> {
    body.tracks
        .into_iter()
        .flatten()
        .filter_map(|t| {
            let id = t.id?;
            let popularity = t.popularity.map(f64::from);
            let release_year = t.album.and_then(|a| a.release_date).as_deref().and_then(release_year);
            if popularity.is_none() && release_year.is_none() {
                return None;
            }
            Some((
                id,
                FeatureVector::Popularity {
                    popularity,
                    release_year,
                },
            ))
        })
        .collect()
}

/// Leading year of a `YYYY`, `YYYY-MM` or `YYYY-MM-DD` release date.
fn release_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

/// One page of saved tracks plus the link to the next one.
pub struct SavedTracksPage {
    pub items: Vec<SavedTrack>,
    pub next: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
struct SavedTracksResponse {
    #[serde(default)]
    items: Vec<Option<SavedTrackItem>>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct SavedTrackItem {
    added_at: DateTime<Utc>,
    track: Option<Track>,
}

impl SavedTrackItem {
    fn into_saved(self) -> SavedTrack {
        SavedTrack {
            added_at: self.added_at,
            track: self.track.map(|t| TrackPayload {
                id: t.id,
                artists: t
                    .artists
                    .into_iter()
                    .map(|a| ArtistRef {
                        id: a.id,
                        name: a.name,
                    })
                    .collect(),
            }),
        }
    }
}

/// A Spotify track (simplified).
#[derive(Clone, Debug, Deserialize)]
struct Track {
    id: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    album: Option<Album>,
}

#[derive(Clone, Debug, Deserialize)]
struct Artist {
    id: Option<String>,
    name: String,
}

#[derive(Clone, Debug, Deserialize)]
struct Album {
    release_date: Option<String>,
}

#[derive(Deserialize)]
struct FullArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Deserialize)]
struct ArtistsResponse {
    artists: Vec<Option<FullArtist>>,
}

#[derive(Deserialize)]
struct TracksResponse {
    tracks: Vec<Option<Track>>,
}

// ---------------------------------------------------------------------------
// Audio Features (GET /v1/audio-features)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AudioFeatures {
    id: Option<String>,
    energy: Option<f64>,
    valence: Option<f64>,
    danceability: Option<f64>,
}

#[derive(Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<AudioFeatures>>,
}
