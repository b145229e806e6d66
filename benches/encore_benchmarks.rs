//! # Encore Performance Benchmarks
//!
//! Benchmarks for the hot paths of the recommendation pipeline: feature
//! extraction, agent scoring, nearest-neighbor queries and the queue's
//! intelligent shuffle.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark group
//! cargo bench scoring
//! cargo bench similarity
//! cargo bench shuffle
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use encore::agents::{score_batch, CollaborativeAgent, StatisticalAgent};
use encore::catalog::{CatalogStore, ListeningEvent, Song, SqliteStore};
use encore::config::EngineConfig;
use encore::features::{extract, ExtractionContext, FeatureVector};
use encore::queue::{QueueConfig, QueueEngine};
use encore::similarity::SimilarityIndex;
use encore::transitions::TransitionGraph;
use std::collections::HashMap;
use std::hint::black_box;
use std::sync::{Arc, Mutex};

fn make_catalog(n: usize) -> Vec<Song> {
    (0..n)
        .map(|i| Song {
            id: i as i64,
            title: format!("Song {i}"),
            artist: format!("Artist {}", i % 40),
            album: format!("Album {}", i % 100),
            genre: format!("Genre {}", i % 8),
            duration_secs: 180 + (i as u32 % 120),
        })
        .collect()
}

fn make_history(catalog: &[Song], events: usize, now: i64) -> Vec<ListeningEvent> {
    (0..events)
        .map(|i| {
            let song_id = catalog[i % catalog.len()].id;
            let timestamp = now - (i as i64) * 300;
            ListeningEvent {
                song_id,
                timestamp,
                listen_duration_ms: 150_000,
                completion_rate: if i % 5 == 0 { 0.1 } else { 0.9 },
                skipped: i % 5 == 0,
                hour_of_day: encore::catalog::hour_of_day(timestamp),
                day_of_week: encore::catalog::day_of_week(timestamp),
            }
        })
        .collect()
}

fn bench_feature_extraction(c: &mut Criterion) {
    let now = 1_700_000_000;
    let catalog = make_catalog(1000);
    let history = make_history(&catalog, 200, now);
    let ctx = ExtractionContext::build(&history, &catalog, now);

    c.bench_function("feature_extraction_per_song", |b| {
        b.iter(|| {
            for song in catalog.iter().take(100) {
                black_box(extract(black_box(song), &[], None, &ctx));
            }
        });
    });

    c.bench_function("extraction_context_build", |b| {
        b.iter(|| black_box(ExtractionContext::build(&history, &catalog, now)));
    });
}

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");

    for size in [100usize, 1000, 5000] {
        let candidates: Vec<(i64, FeatureVector)> = (0..size)
            .map(|i| (i as i64, FeatureVector::NEUTRAL))
            .collect();
        let index = SimilarityIndex::new(size.max(1), 2000, usize::MAX, None);
        for (id, vector) in &candidates {
            index.store(*id, &vector.as_array());
        }
        let peer_likes: HashMap<i64, f64> =
            (0..size as i64).map(|id| (id, 50.0 + (id % 50) as f64)).collect();

        group.bench_with_input(BenchmarkId::new("batch", size), &size, |b, _| {
            b.iter(|| {
                black_box(score_batch(
                    black_box(&candidates),
                    &StatisticalAgent::default(),
                    &CollaborativeAgent::default(),
                    None,
                    &index,
                    &peer_likes,
                ))
            });
        });
    }
    group.finish();
}

fn bench_similarity_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity");

    for size in [500usize, 5000] {
        let index = SimilarityIndex::new(size, 2000, usize::MAX, None);
        for i in 0..size {
            let x = (i as f64).sin();
            let y = (i as f64).cos();
            index.store(i as i64, &[x, y, x * y, 0.5, 0.2, 0.8, 0.1, 0.0, 0.3]);
        }
        let query = [0.7, 0.3, 0.2, 0.5, 0.2, 0.8, 0.1, 0.0, 0.3];

        group.bench_with_input(BenchmarkId::new("find_similar_top10", size), &size, |b, _| {
            b.iter(|| black_box(index.find_similar(black_box(&query), 10)));
        });
    }
    group.finish();
}

fn bench_intelligent_shuffle(c: &mut Criterion) {
    let catalog = make_catalog(200);
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    store.insert_songs(&catalog).expect("insert songs");
    let store: Arc<SqliteStore> = Arc::new(store);

    let mut graph = TransitionGraph::new(0.1, 0.5);
    for i in 0..199 {
        graph.record_transition(i, i + 1, 0.9, 1_700_000_000);
    }
    let graph = Arc::new(Mutex::new(graph));
    let index = Arc::new(SimilarityIndex::new(200, 200, usize::MAX, None));

    c.bench_function("intelligent_shuffle_200_songs", |b| {
        b.iter(|| {
            let mut queue = QueueEngine::new(
                QueueConfig {
                    refill_enabled: false,
                    ..QueueConfig::from(&EngineConfig::default())
                },
                store.clone(),
                graph.clone(),
                index.clone(),
                None,
            );
            for song in &catalog {
                queue.add_to_queue(song.clone());
            }
            black_box(queue.intelligent_shuffle())
        });
    });
}

criterion_group!(
    benches,
    bench_feature_extraction,
    bench_scoring,
    bench_similarity_queries,
    bench_intelligent_shuffle
);
criterion_main!(benches);
