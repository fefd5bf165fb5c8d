//! A user's Spotify library as seen by the era pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Credentials, Session, SpotifyClient};
use crate::eras::model::{ArtistDetail, FeatureKind, FeatureVector, SavedTrack};
use crate::eras::pipeline::{FeatureProvider, TrackStore};
use crate::error::FetchError;
use crate::retry::RetryPolicy;

/// Saved tracks, features and artists for one user, all routed through a
/// refreshing [`Session`].
pub struct SpotifyLibrary {
    client: SpotifyClient,
    session: Session,
    kind: FeatureKind,
    retry: RetryPolicy,
}

impl SpotifyLibrary {
    pub fn new(client: SpotifyClient, credentials: Credentials, kind: FeatureKind) -> Self {
        let refresher = Arc::new(client.clone());
        Self {
            client,
            session: Session::new(credentials, refresher),
            kind,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for rate-limited saved-track pages.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Credentials as they stand now, so callers can persist a refreshed token.
    pub async fn credentials(&self) -> Credentials {
        self.session.credentials().await
    }
}

#[async_trait]
impl TrackStore for SpotifyLibrary {
    async fn fetch_saved_tracks(&self) -> Result<Vec<SavedTrack>, FetchError> {
        let client = &self.client;
        let mut saved = Vec::new();
        let mut next = Some(client.saved_tracks_url());

        while let Some(url) = next {
            let url = url.as_str();
            let page = self
                .retry
                .run(|| self.session.call(move |token| async move {
                    client.get_saved_tracks_page(&token, url).await
                }))
                .await?;

            saved.extend(page.items);
            debug!(fetched = saved.len(), more = page.next.is_some(), "saved tracks page");
            next = page.next;
        }

        Ok(saved)
    }
}

#[async_trait]
impl FeatureProvider for SpotifyLibrary {
    fn kind(&self) -> FeatureKind {
        self.kind
    }

    async fn fetch_features(&self, ids: &[String]) -> Result<HashMap<String, FeatureVector>, FetchError> {
        let client = &self.client;
        match self.kind {
            FeatureKind::Audio => {
                self.session
                    .call(move |token| async move { client.get_audio_features(&token, ids).await })
                    .await
            }
            FeatureKind::Popularity => {
                self.session
                    .call(move |token| async move { client.get_track_popularity(&token, ids).await })
                    .await
            }
        }
    }

    async fn fetch_artists(&self, ids: &[String]) -> Result<HashMap<String, ArtistDetail>, FetchError> {
        let client = &self.client;
        self.session
            .call(move |token| async move { client.get_artists(&token, ids).await })
            .await
    }
}
