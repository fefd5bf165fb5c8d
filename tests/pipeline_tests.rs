use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use music_eras::eras::model::{
    AggregateFeatures, ArtistDetail, ArtistRef, FeatureKind, FeatureVector, SavedTrack, TrackPayload,
};
use music_eras::eras::{EraPipeline, FeatureProvider, SegmentationPolicy, TrackStore};
use music_eras::error::{FetchError, PipelineError};
use music_eras::retry::RetryPolicy;

/// In-memory library that records every lookup.
#[derive(Default)]
struct FakeLibrary {
    saved: Vec<SavedTrack>,
    features: HashMap<String, FeatureVector>,
    artists: HashMap<String, ArtistDetail>,
    feature_calls: AtomicUsize,
    artist_calls: AtomicUsize,
    largest_batch: AtomicUsize,
    largest_artist_batch: AtomicUsize,
    requested_artists: Mutex<Vec<String>>,
    feature_error: Option<FetchError>,
    artist_error: Option<FetchError>,
    rate_limits_left: AtomicUsize,
    /// Serve popularity vectors instead of audio features.
    popularity: bool,
}

#[async_trait]
impl TrackStore for FakeLibrary {
    async fn fetch_saved_tracks(&self) -> Result<Vec<SavedTrack>, FetchError> {
        Ok(self.saved.clone())
    }
}

#[async_trait]
impl FeatureProvider for FakeLibrary {
    fn kind(&self) -> FeatureKind {
        if self.popularity {
            FeatureKind::Popularity
        } else {
            FeatureKind::Audio
        }
    }

    async fn fetch_features(&self, ids: &[String]) -> Result<HashMap<String, FeatureVector>, FetchError> {
        self.feature_calls.fetch_add(1, Ordering::SeqCst);
        self.largest_batch.fetch_max(ids.len(), Ordering::SeqCst);
        if self
            .rate_limits_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FetchError::RateLimited { retry_after: Some(Duration::ZERO) });
        }
        if let Some(ref e) = self.feature_error {
            return Err(e.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.features.get(id).map(|f| (id.clone(), *f)))
            .collect())
    }

    async fn fetch_artists(&self, ids: &[String]) -> Result<HashMap<String, ArtistDetail>, FetchError> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        self.largest_artist_batch.fetch_max(ids.len(), Ordering::SeqCst);
        self.requested_artists.lock().unwrap().extend(ids.iter().cloned());
        if let Some(ref e) = self.artist_error {
            return Err(e.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.artists.get(id).map(|a| (id.clone(), a.clone())))
            .collect())
    }
}

fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

fn saved(id: &str, added_at: DateTime<Utc>, artist: &str) -> SavedTrack {
    SavedTrack {
        added_at,
        track: Some(TrackPayload {
            id: Some(id.to_string()),
            artists: vec![ArtistRef {
                id: Some(format!("id-{}", artist)),
                name: artist.to_string(),
            }],
        }),
    }
}

fn artist(name: &str, genres: &[&str]) -> (String, ArtistDetail) {
    let id = format!("id-{}", name);
    (
        id.clone(),
        ArtistDetail {
            id,
            name: name.to_string(),
            genres: genres.iter().map(|g| g.to_string()).collect(),
        },
    )
}

/// `n` tracks by artist "X", one every five days from 2021-11-01.
fn library_of(n: usize) -> FakeLibrary {
    let start = Utc.with_ymd_and_hms(2021, 11, 1, 9, 0, 0).unwrap();
    let saved = (0..n)
        .map(|i| saved(&format!("t{:03}", i), start + chrono::Duration::days(5 * i as i64), "X"))
        .collect();
    let features = (0..n)
        .map(|i| {
            (
                format!("t{:03}", i),
                FeatureVector::Audio {
                    energy: 0.8,
                    valence: if i % 2 == 0 { 0.2 } else { 0.4 },
                    danceability: 0.5,
                },
            )
        })
        .collect();

    FakeLibrary {
        saved,
        features,
        artists: [artist("X", &["pop"])].into_iter().collect(),
        ..Default::default()
    }
}

async fn run(library: &FakeLibrary, policy: SegmentationPolicy) -> Result<Vec<music_eras::eras::Era>, PipelineError> {
    EraPipeline::new(library, library, policy)
        .with_retry(instant_retry())
        .run()
        .await
}

const WINDOW: SegmentationPolicy = SegmentationPolicy::FixedWindow { era_count: 5 };

#[tokio::test]
async fn empty_library_makes_no_fetches() {
    let library = FakeLibrary::default();
    let eras = run(&library, WINDOW).await.unwrap();

    assert!(eras.is_empty());
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 0);
    assert_eq!(library.artist_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn short_history_is_empty_not_an_error() {
    let mut library = library_of(19);
    // invalid entries do not count towards the floor
    library.saved.push(SavedTrack {
        added_at: Utc::now(),
        track: None,
    });
    library.saved.push(SavedTrack {
        added_at: Utc::now(),
        track: Some(TrackPayload { id: None, artists: vec![] }),
    });

    let eras = run(&library, WINDOW).await.unwrap();
    assert!(eras.is_empty());
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn twenty_five_tracks_make_one_era() {
    let library = library_of(25);
    let eras = run(&library, WINDOW).await.unwrap();

    assert_eq!(eras.len(), 1);
    let era = &eras[0];
    assert_eq!(era.track_ids.len(), 20);
    assert_eq!(era.track_ids[0], "t000");
    assert_eq!(era.track_ids[19], "t019");
    assert_eq!(era.timeframe, "2021 - 2022");
    assert_eq!(era.era_name, "The Pop Era");
    assert_eq!(era.top_artists, vec!["X"]);
    assert_eq!(era.top_genres, vec!["pop"]);
    match era.aggregate_features {
        AggregateFeatures::Audio { energy, valence, danceability } => {
            assert!((energy - 0.8).abs() < 1e-9);
            assert!((valence - 0.3).abs() < 1e-9);
            assert!((danceability - 0.5).abs() < 1e-9);
        }
        other => panic!("unexpected aggregate {:?}", other),
    }
}

#[tokio::test]
async fn rerun_is_identical() {
    let library = library_of(137);
    let first = run(&library, WINDOW).await.unwrap();
    let second = run(&library, WINDOW).await.unwrap();
    assert_eq!(first, second);

    let first = run(&library, SegmentationPolicy::CalendarQuarter).await.unwrap();
    let second = run(&library, SegmentationPolicy::CalendarQuarter).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn shuffled_delivery_still_yields_chronological_disjoint_eras() {
    let mut library = library_of(250);
    library.saved.reverse();
    library.saved.swap(3, 170);

    let eras = run(&library, WINDOW).await.unwrap();
    assert_eq!(eras.len(), 5);

    // 250 ids in batches of at most 100
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 3);
    assert_eq!(library.largest_batch.load(Ordering::SeqCst), 100);

    let mut seen = HashSet::new();
    let mut all = Vec::new();
    for era in &eras {
        assert!(era.track_ids.len() >= 10);
        for id in &era.track_ids {
            assert!(seen.insert(id.clone()), "{} appears in two eras", id);
            all.push(id.clone());
        }
    }
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
}

#[tokio::test]
async fn equal_timestamps_keep_delivery_order() {
    let at = Utc.with_ymd_and_hms(2020, 5, 5, 0, 0, 0).unwrap();
    let library = FakeLibrary {
        saved: (0..20).rev().map(|i| saved(&format!("t{:02}", i), at, "X")).collect(),
        ..Default::default()
    };

    let eras = run(&library, WINDOW).await.unwrap();
    assert_eq!(eras.len(), 1);
    assert_eq!(eras[0].track_ids.first().map(String::as_str), Some("t19"));
    assert_eq!(eras[0].track_ids.last().map(String::as_str), Some("t00"));
    assert_eq!(eras[0].timeframe, "2020");
}

#[tokio::test]
async fn missing_features_average_to_zero() {
    let mut library = library_of(20);
    library.features.clear();

    let eras = run(&library, WINDOW).await.unwrap();
    assert_eq!(
        eras[0].aggregate_features,
        AggregateFeatures::Audio { energy: 0.0, valence: 0.0, danceability: 0.0 }
    );
}

#[tokio::test]
async fn genres_only_requested_for_top_artists() {
    let start = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
    let names = ["A", "A", "A", "B", "B", "B", "C", "C", "D", "D", "E", "E", "F", "G"];
    let saved = (0..20)
        .map(|i| {
            let name = names.get(i).copied().unwrap_or("A");
            saved(&format!("t{:02}", i), start + chrono::Duration::hours(i as i64), name)
        })
        .collect();
    let library = FakeLibrary {
        saved,
        artists: [
            artist("A", &["art pop", "dream pop"]),
            artist("B", &["dream pop"]),
            artist("F", &["noise"]),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };

    let eras = run(&library, WINDOW).await.unwrap();
    assert_eq!(eras[0].top_artists, vec!["A", "B", "C", "D", "E"]);
    assert_eq!(eras[0].top_genres, vec!["dream pop", "art pop"]);
    assert_eq!(eras[0].era_name, "The Dream Pop Era");

    let requested = library.requested_artists.lock().unwrap().clone();
    assert_eq!(requested.len(), 5);
    assert!(!requested.contains(&"id-F".to_string()));
}

#[tokio::test]
async fn auth_expiry_aborts_the_run() {
    let mut library = library_of(60);
    library.feature_error = Some(FetchError::AuthExpired);

    assert_eq!(run(&library, WINDOW).await, Err(PipelineError::AuthExpired));
    assert_eq!(library.artist_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upstream_failure_aborts_the_run() {
    let mut library = library_of(60);
    library.artist_error = Some(FetchError::Upstream("500".into()));

    assert!(matches!(run(&library, WINDOW).await, Err(PipelineError::Upstream(_))));
}

#[tokio::test]
async fn rate_limited_batches_are_retried() {
    let library = library_of(30);
    library.rate_limits_left.store(2, Ordering::SeqCst);

    // windows of 20 and 10
    let eras = run(&library, WINDOW).await.unwrap();
    assert_eq!(eras.len(), 2);
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_rate_limit_fails_the_run() {
    let library = library_of(30);
    library.rate_limits_left.store(usize::MAX, Ordering::SeqCst);

    assert!(matches!(run(&library, WINDOW).await, Err(PipelineError::Upstream(_))));
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn quarter_policy_groups_by_calendar() {
    // five days apart from 2021-11-01: Q4 2021 has 13 tracks, Q1 2022 has 18
    let library = library_of(40);
    let eras = run(&library, SegmentationPolicy::CalendarQuarter).await.unwrap();

    assert_eq!(eras.len(), 2);
    assert!(eras.iter().all(|e| e.track_ids.len() >= 10));
    assert_eq!(eras[0].timeframe, "2021");
    assert_eq!(eras[1].timeframe, "2022");
}

#[tokio::test]
async fn clustered_policy_respects_cluster_floor() {
    let mut library = library_of(60);
    for (i, f) in library.features.values_mut().enumerate() {
        let hi = i % 3 == 0;
        *f = FeatureVector::Audio {
            energy: if hi { 0.9 } else { 0.1 },
            valence: if hi { 0.8 } else { 0.2 },
            danceability: (i % 7) as f64 / 10.0,
        };
    }

    let eras = run(&library, SegmentationPolicy::Clustered).await.unwrap();
    assert!(!eras.is_empty());

    let input: HashSet<String> = library
        .saved
        .iter()
        .filter_map(|s| s.track.as_ref().and_then(|t| t.id.clone()))
        .collect();
    let mut seen = HashSet::new();
    for era in &eras {
        assert!(era.track_ids.len() >= 5);
        for id in &era.track_ids {
            assert!(input.contains(id));
            assert!(seen.insert(id.clone()));
        }
        match era.aggregate_features {
            AggregateFeatures::Audio { energy, .. } => assert!((0.05..=0.95).contains(&energy)),
            other => panic!("unexpected aggregate {:?}", other),
        }
    }
}

/// `n` tracks with popularity vectors, one every five days from 2021-11-01.
fn popularity_library(n: usize) -> FakeLibrary {
    let mut library = library_of(n);
    library.popularity = true;
    for (i, f) in library.features.values_mut().enumerate() {
        *f = FeatureVector::Popularity {
            popularity: Some(50.0),
            release_year: (i % 2 == 0).then_some(2000),
        };
    }
    library
}

#[tokio::test]
async fn popularity_batches_are_capped_at_fifty() {
    let library = popularity_library(120);
    let eras = run(&library, WINDOW).await.unwrap();

    assert_eq!(eras.len(), 5);
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 3);
    assert_eq!(library.largest_batch.load(Ordering::SeqCst), 50);
    for era in &eras {
        assert_eq!(
            era.aggregate_features,
            AggregateFeatures::Popularity { popularity: 50.0, release_year: 2000.0 }
        );
    }
}

#[tokio::test]
async fn artist_lookups_are_capped_at_fifty() {
    // twelve windows of 20, each with five artists of its own
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let saved = (0..240)
        .map(|i| {
            let name = format!("a{}-{}", i / 20, i % 5);
            saved(&format!("t{:03}", i), start + chrono::Duration::days(i as i64), &name)
        })
        .collect();
    let library = FakeLibrary {
        saved,
        ..Default::default()
    };

    let eras = run(&library, SegmentationPolicy::FixedWindow { era_count: 12 }).await.unwrap();
    assert_eq!(eras.len(), 12);
    assert!(eras.iter().all(|e| e.top_artists.len() == 5));

    let requested: HashSet<String> = library.requested_artists.lock().unwrap().iter().cloned().collect();
    assert_eq!(requested.len(), 60);
    assert_eq!(library.artist_calls.load(Ordering::SeqCst), 2);
    assert_eq!(library.largest_artist_batch.load(Ordering::SeqCst), 50);
}

#[tokio::test]
async fn clustering_popularity_features_is_rejected_up_front() {
    let start = Utc.with_ymd_and_hms(2022, 1, 2, 0, 0, 0).unwrap();
    let mut library = popularity_library(200);
    for (i, s) in library.saved.iter_mut().enumerate() {
        s.added_at = start + chrono::Duration::minutes(i as i64 * 10);
    }

    let result = run(&library, SegmentationPolicy::Clustered).await;
    assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    assert_eq!(library.feature_calls.load(Ordering::SeqCst), 0);

    // the same library still segments by quarter
    let eras = run(&library, SegmentationPolicy::CalendarQuarter).await.unwrap();
    assert_eq!(eras.len(), 1);
}
