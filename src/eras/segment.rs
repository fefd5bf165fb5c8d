//! Era segmentation policies.
//!
//! Every policy works on tracks already sorted oldest-first and returns groups of
//! indices into that slice. Indices inside a group are ascending and groups come
//! out in chronological order, so the caller never re-sorts.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Datelike;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::eras::model::{FeatureKind, FeatureVector, Track};
use crate::error::PipelineError;

/// Smallest window the fixed-window policy will cut.
pub const MIN_WINDOW_SIZE: usize = 20;
/// Windows and quarter buckets below this size are discarded.
pub const MIN_GROUP_TRACKS: usize = 10;
/// Clusters below this size are discarded along with their tracks.
pub const MIN_CLUSTER_TRACKS: usize = 5;
/// Upper bound on k-means clusters per quarter.
pub const MAX_CLUSTERS: usize = 4;

/// How sorted tracks are cut into eras.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentationPolicy {
    /// Contiguous windows aiming for `era_count` eras.
    FixedWindow { era_count: usize },
    /// One group per calendar quarter.
    CalendarQuarter,
    /// K-means over audio features inside each calendar quarter.
    Clustered,
}

impl SegmentationPolicy {
    /// Parses `window`, `quarter` or `clustered`.
    pub fn parse(raw: &str, era_count: usize) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "window" | "fixed" => Some(SegmentationPolicy::FixedWindow { era_count }),
            "quarter" => Some(SegmentationPolicy::CalendarQuarter),
            "clustered" | "kmeans" => Some(SegmentationPolicy::Clustered),
            _ => None,
        }
    }

    /// Whether this policy can cut eras from `kind` vectors. Clustering needs audio features.
    pub fn supports(self, kind: FeatureKind) -> bool {
        !matches!(self, SegmentationPolicy::Clustered) || kind == FeatureKind::Audio
    }
}

/// A group of tracks forming one era.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Ascending indices into the sorted track slice.
    pub indices: Vec<usize>,
    /// Cluster centre in (energy, valence, danceability), clustered policy only.
    pub centroid: Option<[f64; 3]>,
}

impl Segment {
    fn contiguous(start: usize, end: usize) -> Self {
        Self {
            indices: (start..end).collect(),
            centroid: None,
        }
    }
}

/// Runs `policy` over `tracks`.
pub fn segment(
    policy: SegmentationPolicy,
    tracks: &[Track],
    features: &HashMap<String, FeatureVector>,
) -> Result<Vec<Segment>, PipelineError> {
    match policy {
        SegmentationPolicy::FixedWindow { era_count } => Ok(fixed_windows(tracks.len(), era_count)),
        SegmentationPolicy::CalendarQuarter => Ok(calendar_quarters(tracks)
            .into_values()
            .filter(|bucket| bucket.len() >= MIN_GROUP_TRACKS)
            .map(|indices| Segment {
                indices,
                centroid: None,
            })
            .collect()),
        SegmentationPolicy::Clustered => clusters(tracks, features),
    }
}

/// Non-overlapping windows of `max(20, ceil(len / era_count))` tracks. A trailing
/// window shorter than [`MIN_GROUP_TRACKS`] is dropped.
pub fn fixed_windows(len: usize, era_count: usize) -> Vec<Segment> {
    let window = MIN_WINDOW_SIZE.max(len.div_ceil(era_count.max(1)));

    (0..len)
        .step_by(window)
        .map(|start| (start, (start + window).min(len)))
        .filter(|(start, end)| {
            let keep = end - start >= MIN_GROUP_TRACKS;
            if !keep {
                debug!(start, size = end - start, "dropping short trailing window");
            }
            keep
        })
        .map(|(start, end)| Segment::contiguous(start, end))
        .collect()
}

/// Buckets track indices by `(year, quarter)` of their add time, in key order.
/// No size filtering happens here.
pub fn calendar_quarters(tracks: &[Track]) -> BTreeMap<(i32, u32), Vec<usize>> {
    let mut buckets: BTreeMap<(i32, u32), Vec<usize>> = BTreeMap::new();
    for (idx, track) in tracks.iter().enumerate() {
        let key = (track.added_at.year(), track.added_at.month0() / 3 + 1);
        buckets.entry(key).or_default().push(idx);
    }
    buckets
}

/// K-means inside each quarter bucket of at least [`MIN_GROUP_TRACKS`] tracks.
///
/// Only tracks with an audio feature vector take part. Assignment is kept by
/// index, so tracks with identical features never get confused.
pub fn clusters(
    tracks: &[Track],
    features: &HashMap<String, FeatureVector>,
) -> Result<Vec<Segment>, PipelineError> {
    let mut segments = Vec::new();

    for ((year, quarter), bucket) in calendar_quarters(tracks) {
        if bucket.len() < MIN_GROUP_TRACKS {
            continue;
        }

        let points: Vec<(usize, [f64; 3])> = bucket
            .iter()
            .filter_map(|&idx| {
                features
                    .get(&tracks[idx].id)
                    .and_then(FeatureVector::audio_point)
                    .map(|p| (idx, p))
            })
            .collect();

        let distinct: HashSet<[u64; 3]> = points
            .iter()
            .map(|(_, p)| p.map(f64::to_bits))
            .collect();
        let k = MAX_CLUSTERS.min(distinct.len());
        if k == 0 {
            continue;
        }

        let mut found = cluster_bucket(&points, k)?;
        found.retain(|s| s.indices.len() >= MIN_CLUSTER_TRACKS);
        found.sort_by_key(|s| s.indices[0]);

        debug!(year, quarter, k, kept = found.len(), "clustered quarter");
        segments.extend(found);
    }

    Ok(segments)
}

fn cluster_bucket(points: &[(usize, [f64; 3])], k: usize) -> Result<Vec<Segment>, PipelineError> {
    let flat: Vec<f64> = points.iter().flat_map(|(_, p)| *p).collect();
    let records = Array2::from_shape_vec((points.len(), 3), flat)
        .map_err(|e| PipelineError::Clustering(e.to_string()))?;

    let dataset = DatasetBase::from(records.clone());
    let model = KMeans::params(k)
        .max_n_iterations(300)
        .tolerance(1e-4)
        .fit(&dataset)
        .map_err(|e| PipelineError::Clustering(e.to_string()))?;

    let assignments: Array1<usize> = model.predict(&records);
    let centroids = model.centroids();

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); centroids.nrows()];
    for (&(idx, _), &cluster) in points.iter().zip(assignments.iter()) {
        members[cluster].push(idx);
    }

    Ok(members
        .into_iter()
        .enumerate()
        .filter(|(_, indices)| !indices.is_empty())
        .map(|(cluster, indices)| {
            let row = centroids.row(cluster);
            Segment {
                indices,
                centroid: Some([row[0], row[1], row[2]]),
            }
        })
        .collect())
}
