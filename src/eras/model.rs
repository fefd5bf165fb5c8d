//! Value types flowing through the era pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artist reference as attached to a track. `name` is the counting key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: Option<String>,
    pub name: String,
}

/// Inner track payload as delivered by the track store. Either field may be missing
/// (local files, removed catalog entries).
#[derive(Clone, Debug, PartialEq)]
pub struct TrackPayload {
    pub id: Option<String>,
    pub artists: Vec<ArtistRef>,
}

/// One entry of a user's library, unvalidated.
#[derive(Clone, Debug, PartialEq)]
pub struct SavedTrack {
    pub added_at: DateTime<Utc>,
    pub track: Option<TrackPayload>,
}

/// A saved track that qualified for analysis: it has a payload and a non-empty id.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: String,
    pub added_at: DateTime<Utc>,
    pub artists: Vec<ArtistRef>,
}

impl Track {
    /// Validates a saved entry. Returns `None` for entries that cannot take part in an era.
    pub fn qualify(saved: SavedTrack) -> Option<Self> {
        let payload = saved.track?;
        let id = payload.id.filter(|id| !id.is_empty())?;
        Some(Self {
            id,
            added_at: saved.added_at,
            artists: payload.artists,
        })
    }
}

/// Which numeric shape a feature provider delivers. One run never mixes the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    Audio,
    Popularity,
}

impl FeatureKind {
    /// Ids per upstream call for this shape.
    pub fn batch_size(self) -> usize {
        match self {
            FeatureKind::Audio => 100,
            FeatureKind::Popularity => 50,
        }
    }
}

/// Per-track numeric attributes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeatureVector {
    Audio {
        energy: f64,
        valence: f64,
        danceability: f64,
    },
    /// Either dimension may be missing upstream; a missing one is left out of its average.
    Popularity {
        popularity: Option<f64>,
        release_year: Option<i32>,
    },
}

impl FeatureVector {
    /// Coordinates in (energy, valence, danceability) space, for audio vectors only.
    pub fn audio_point(&self) -> Option<[f64; 3]> {
        match *self {
            FeatureVector::Audio {
                energy,
                valence,
                danceability,
            } => Some([energy, valence, danceability]),
            FeatureVector::Popularity { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtistDetail {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
}

/// Mean of each numeric dimension over the tracks of one era.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateFeatures {
    Audio {
        energy: f64,
        valence: f64,
        danceability: f64,
    },
    #[serde(rename_all = "camelCase")]
    Popularity { popularity: f64, release_year: f64 },
}

/// One listening phase, ready for narration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Era {
    pub timeframe: String,
    pub era_name: String,
    pub top_artists: Vec<String>,
    pub top_genres: Vec<String>,
    pub aggregate_features: AggregateFeatures,
    pub track_ids: Vec<String>,
}
