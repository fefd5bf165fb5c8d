//! Era pipeline: saved tracks in, ordered eras out.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::eras::model::{ArtistDetail, Era, FeatureKind, FeatureVector, SavedTrack, Track};
use crate::eras::segment::{segment, SegmentationPolicy};
use crate::eras::summarize::{summarize, top_artists, RankedArtist, SummaryInputs};
use crate::error::{FetchError, PipelineError};
use crate::retry::RetryPolicy;

/// Below this many qualifying tracks a run yields no eras.
pub const MIN_HISTORY: usize = 20;
/// Ids per artist lookup.
pub const ARTIST_BATCH_SIZE: usize = 50;

/// Source of a user's saved tracks. Implementations handle pagination and page-level
/// retries, and either return every page or fail.
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn fetch_saved_tracks(&self) -> Result<Vec<SavedTrack>, FetchError>;
}

/// Per-track features and per-artist details, looked up by id.
///
/// Ids the upstream has nothing for are left out of the returned map.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    /// Shape of the vectors returned by [`FeatureProvider::fetch_features`].
    fn kind(&self) -> FeatureKind;

    /// Looks up at most `kind().batch_size()` ids.
    async fn fetch_features(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, FeatureVector>, FetchError>;

    /// Looks up at most [`ARTIST_BATCH_SIZE`] ids.
    async fn fetch_artists(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ArtistDetail>, FetchError>;
}

/// Sequences fetch, sort, segmentation and summaries for one analysis run.
pub struct EraPipeline<'a> {
    tracks: &'a dyn TrackStore,
    features: &'a dyn FeatureProvider,
    policy: SegmentationPolicy,
    retry: RetryPolicy,
}

impl<'a> EraPipeline<'a> {
    pub fn new(
        tracks: &'a dyn TrackStore,
        features: &'a dyn FeatureProvider,
        policy: SegmentationPolicy,
    ) -> Self {
        Self {
            tracks,
            features,
            policy,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs the analysis. An empty result means there is not enough history yet;
    /// any failure aborts the whole run.
    pub async fn run(&self) -> Result<Vec<Era>, PipelineError> {
        let kind = self.features.kind();
        if !self.policy.supports(kind) {
            return Err(PipelineError::Unsupported(format!(
                "{:?} segmentation needs audio features, provider delivers {:?}",
                self.policy, kind
            )));
        }

        let saved = self.tracks.fetch_saved_tracks().await?;
        let delivered = saved.len();

        let mut tracks: Vec<Track> = saved.into_iter().filter_map(Track::qualify).collect();
        // stable: equal timestamps keep delivery order
        tracks.sort_by_key(|t| t.added_at);

        info!(delivered, qualified = tracks.len(), policy = ?self.policy, "analysing saved tracks");
        if tracks.len() < MIN_HISTORY {
            info!(qualified = tracks.len(), "not enough history for eras");
            return Ok(Vec::new());
        }

        let track_ids = dedup(tracks.iter().map(|t| t.id.as_str()));
        let features = self
            .fetch_batched(&track_ids, kind.batch_size(), |chunk| {
                self.features.fetch_features(chunk)
            })
            .await?;
        debug!(requested = track_ids.len(), resolved = features.len(), "features fetched");

        let segments = segment(self.policy, &tracks, &features)?;

        let groups: Vec<(Vec<&Track>, Vec<RankedArtist>)> = segments
            .iter()
            .map(|s| {
                let members: Vec<&Track> = s.indices.iter().map(|&i| &tracks[i]).collect();
                let ranked = top_artists(&members);
                (members, ranked)
            })
            .collect();

        let artist_ids = dedup(
            groups
                .iter()
                .flat_map(|(_, ranked)| ranked.iter().filter_map(|a| a.id.as_deref())),
        );
        let artists = if artist_ids.is_empty() {
            HashMap::new()
        } else {
            self.fetch_batched(&artist_ids, ARTIST_BATCH_SIZE, |chunk| {
                self.features.fetch_artists(chunk)
            })
            .await?
        };

        let inputs = SummaryInputs {
            kind,
            features: &features,
            artists: &artists,
        };
        let eras: Vec<Era> = groups
            .into_iter()
            .zip(&segments)
            .filter_map(|((members, ranked), s)| summarize(&members, ranked, s.centroid, &inputs))
            .collect();

        for era in &eras {
            debug!(name = %era.era_name, timeframe = %era.timeframe, tracks = era.track_ids.len(), "era emitted");
        }
        info!(eras = eras.len(), "analysis complete");
        Ok(eras)
    }

    /// Splits `ids` into batches, fetches them concurrently with rate-limit retries,
    /// and merges the results by key. Fails if any batch fails.
    async fn fetch_batched<'s, V, F, Fut>(
        &self,
        ids: &'s [String],
        batch_size: usize,
        fetch: F,
    ) -> Result<HashMap<String, V>, FetchError>
    where
        F: Fn(&'s [String]) -> Fut,
        Fut: Future<Output = Result<HashMap<String, V>, FetchError>>,
    {
        let fetch = &fetch;
        let batches = ids
            .chunks(batch_size.max(1))
            .map(|chunk| self.retry.run(move || fetch(chunk)));

        let mut merged = HashMap::with_capacity(ids.len());
        for part in try_join_all(batches).await? {
            merged.extend(part);
        }
        Ok(merged)
    }
}

fn dedup<'s, I: IntoIterator<Item = &'s str>>(ids: I) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}
