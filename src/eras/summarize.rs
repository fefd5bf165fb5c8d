//! Per-era summaries: artist and genre rankings, feature averages, display strings.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};

use crate::eras::model::{AggregateFeatures, ArtistDetail, Era, FeatureKind, FeatureVector, Track};

/// Length of the artist and genre rankings.
pub const TOP_N: usize = 5;

/// An artist retained in an era's ranking, with the id first seen for that name.
#[derive(Clone, Debug, PartialEq)]
pub struct RankedArtist {
    pub name: String,
    pub id: Option<String>,
    pub count: usize,
}

/// Counts occurrences and returns the `n` most frequent keys. Equal counts keep
/// first-encountered order.
pub fn rank_top<I, S>(items: I, n: usize) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut order: Vec<(String, usize)> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();

    for item in items {
        let key = item.as_ref();
        match slot.get(key) {
            Some(&i) => order[i].1 += 1,
            None => {
                slot.insert(key.to_string(), order.len());
                order.push((key.to_string(), 1));
            }
        }
    }

    // sort_by is stable
    order.sort_by(|a, b| b.1.cmp(&a.1));
    order.truncate(n);
    order
}

/// Ranks artists of `tracks` (chronological) by track count, matching names exactly.
pub fn top_artists(tracks: &[&Track]) -> Vec<RankedArtist> {
    let mut first_id: HashMap<&str, Option<&str>> = HashMap::new();
    for artist in tracks.iter().flat_map(|t| &t.artists) {
        first_id
            .entry(artist.name.as_str())
            .or_insert(artist.id.as_deref());
    }

    let names = tracks.iter().flat_map(|t| t.artists.iter().map(|a| a.name.as_str()));
    rank_top(names, TOP_N)
        .into_iter()
        .map(|(name, count)| {
            let id = first_id
                .get(name.as_str())
                .copied()
                .flatten()
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            RankedArtist { name, id, count }
        })
        .collect()
}

/// Ranks genre tags of the top artists only. Artists whose details did not
/// resolve contribute nothing.
pub fn top_genres(top: &[RankedArtist], details: &HashMap<String, ArtistDetail>) -> Vec<String> {
    let genres = top
        .iter()
        .filter_map(|a| a.id.as_ref())
        .filter_map(|id| details.get(id))
        .flat_map(|d| d.genres.iter());

    rank_top(genres, TOP_N)
        .into_iter()
        .map(|(genre, _)| genre)
        .collect()
}

/// Mean of `values`, or 0 when there are none.
pub fn safe_average<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Averages each dimension over the vectors present. Vectors of the other shape are ignored.
pub fn aggregate(kind: FeatureKind, vectors: &[&FeatureVector]) -> AggregateFeatures {
    match kind {
        FeatureKind::Audio => {
            let points: Vec<[f64; 3]> = vectors.iter().filter_map(|v| v.audio_point()).collect();
            AggregateFeatures::Audio {
                energy: safe_average(points.iter().map(|p| p[0])),
                valence: safe_average(points.iter().map(|p| p[1])),
                danceability: safe_average(points.iter().map(|p| p[2])),
            }
        }
        FeatureKind::Popularity => {
            let dims: Vec<(Option<f64>, Option<i32>)> = vectors
                .iter()
                .filter_map(|v| match **v {
                    FeatureVector::Popularity {
                        popularity,
                        release_year,
                    } => Some((popularity, release_year)),
                    FeatureVector::Audio { .. } => None,
                })
                .collect();
            AggregateFeatures::Popularity {
                popularity: safe_average(dims.iter().filter_map(|d| d.0)),
                release_year: safe_average(dims.iter().filter_map(|d| d.1).map(f64::from)),
            }
        }
    }
}

/// `"2021"` when both ends fall in one year, otherwise `"2021 - 2022"`.
pub fn timeframe(first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    if first.year() == last.year() {
        first.year().to_string()
    } else {
        format!("{} - {}", first.year(), last.year())
    }
}

/// Upper-cases the first letter of every space-separated word.
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"The {Genre} Era"`, or `"The Eclectic Era"` without genres.
pub fn era_name(top_genres: &[String]) -> String {
    match top_genres.first() {
        Some(genre) => format!("The {} Era", title_case(genre)),
        None => "The Eclectic Era".to_string(),
    }
}

/// Everything the summarizer needs besides the era's own tracks.
pub struct SummaryInputs<'a> {
    pub kind: FeatureKind,
    pub features: &'a HashMap<String, FeatureVector>,
    pub artists: &'a HashMap<String, ArtistDetail>,
}

/// Builds the era record for one group of chronologically ordered tracks.
///
/// With a `centroid` the aggregate is taken from it directly instead of being averaged.
pub fn summarize(
    members: &[&Track],
    ranked: Vec<RankedArtist>,
    centroid: Option<[f64; 3]>,
    inputs: &SummaryInputs<'_>,
) -> Option<Era> {
    let (first, last) = (members.first()?, members.last()?);

    let top_genres = top_genres(&ranked, inputs.artists);

    let aggregate_features = match centroid {
        Some([energy, valence, danceability]) => AggregateFeatures::Audio {
            energy,
            valence,
            danceability,
        },
        None => {
            let vectors: Vec<&FeatureVector> = members
                .iter()
                .filter_map(|t| inputs.features.get(&t.id))
                .collect();
            aggregate(inputs.kind, &vectors)
        }
    };

    Some(Era {
        timeframe: timeframe(first.added_at, last.added_at),
        era_name: era_name(&top_genres),
        top_artists: ranked.into_iter().map(|a| a.name).collect(),
        top_genres,
        aggregate_features,
        track_ids: members.iter().map(|t| t.id.clone()).collect(),
    })
}
