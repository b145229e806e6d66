//! Recommendation engine: the pipeline orchestrator.
//!
//! Wires the store, feature extraction, the similarity index, the scoring
//! agents, fusion and assembly into the Quick Picks operation, and exposes
//! the background training, sequence suggestion, reset and pruning
//! operations built on the same parts. All collaborators are injected at
//! construction; the engine owns no ambient state.
//!
//! Degrade policy throughout: read failures on required inputs are real
//! errors, but optional enrichments (persistence of a transition edge, a
//! snapshot write, one agent's verdict) are logged and dropped rather than
//! failing the operation.

use crate::agents::{score_batch, CollaborativeAgent, ExternalScorer, StatisticalAgent};
use crate::catalog::{now_unix, CatalogStore, ListeningEvent, Song};
use crate::config::{EngineConfig, PICKS_VERSION};
use crate::features::{extract, ExtractionContext};
use crate::fusion::{assemble, fuse, FusionWeights, RankedPick};
use crate::queue::RefillSource;
use crate::similarity::SimilarityIndex;
use crate::transitions::TransitionGraph;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Flush the similarity index after this many vectors during training.
const TRAINING_FLUSH_EVERY: usize = 64;

/// A versioned Quick Picks result.
///
/// `version` tags the recommendation format so downstream consumers can
/// detect format changes; the "not enough data yet" case is a tagged empty
/// list, never an error.
#[derive(Debug, Clone)]
pub struct QuickPicks {
    pub version: &'static str,
    pub picks: Vec<RankedPick>,
}

impl QuickPicks {
    fn empty() -> Self {
        Self {
            version: PICKS_VERSION,
            picks: Vec::new(),
        }
    }
}

/// Handle to a cancellable background training run.
pub struct TrainingHandle {
    cancel: Arc<AtomicBool>,
    handle: thread::JoinHandle<usize>,
}

impl TrainingHandle {
    /// Requests cancellation; the run stops at the next song boundary with
    /// all vectors stored so far intact.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Blocks until the run finishes, returning how many vectors were
    /// stored. A panicked training thread counts as zero.
    pub fn wait(self) -> usize {
        self.handle.join().unwrap_or(0)
    }
}

/// Orchestrates the full recommendation pipeline.
pub struct RecommendationEngine {
    store: Arc<dyn CatalogStore>,
    index: Arc<SimilarityIndex>,
    graph: Arc<Mutex<TransitionGraph>>,
    statistical: StatisticalAgent,
    collaborative: CollaborativeAgent,
    external: Option<Arc<dyn ExternalScorer>>,
    fusion_weights: FusionWeights,
    config: EngineConfig,
}

impl RecommendationEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn CatalogStore>,
        index: Arc<SimilarityIndex>,
        graph: Arc<Mutex<TransitionGraph>>,
        external: Option<Arc<dyn ExternalScorer>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            index,
            graph,
            statistical: StatisticalAgent::default(),
            collaborative: CollaborativeAgent::default(),
            external,
            fusion_weights: FusionWeights::default(),
            config,
        }
    }

    /// The injected store, shared with the queue engine.
    #[must_use]
    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    /// The injected similarity index, shared with the queue engine.
    #[must_use]
    pub fn index(&self) -> Arc<SimilarityIndex> {
        self.index.clone()
    }

    /// The injected transition graph, shared with the queue engine.
    #[must_use]
    pub fn graph(&self) -> Arc<Mutex<TransitionGraph>> {
        self.graph.clone()
    }

    /// Generates the ranked Quick Picks list.
    ///
    /// Extracts features for every catalog song against recent history,
    /// refreshes the similarity index, fans the batch out across the
    /// scoring agents, fuses and assembles. An empty catalog or empty
    /// listening history yields the tagged empty result.
    ///
    /// # Errors
    ///
    /// Fails only when the store cannot be read.
    pub fn generate_quick_picks(&self, count: Option<usize>) -> Result<QuickPicks> {
        let catalog = self
            .store
            .get_all_songs()
            .context("Quick picks need the catalog")?;
        let history = self
            .store
            .get_recent_history(self.config.history_window)
            .context("Quick picks need listening history")?;

        if catalog.is_empty() || history.is_empty() {
            log::info!("Not enough listening data yet; returning empty quick picks");
            return Ok(QuickPicks::empty());
        }

        let now = now_unix();
        let ctx = ExtractionContext::build(&history, &catalog, now);
        let events_by_song = group_by_song(&history);
        let prefs = self.preference_map(catalog.len())?;

        let candidates: Vec<(i64, crate::features::FeatureVector)> = catalog
            .iter()
            .map(|song| {
                let events = events_by_song
                    .get(&song.id)
                    .map_or(&[][..], Vec::as_slice);
                let vector = extract(song, events, prefs.get(&song.id), &ctx);
                self.index.store(song.id, &vector.as_array());
                (song.id, vector)
            })
            .collect();

        let peer_likes: HashMap<i64, f64> = prefs
            .iter()
            .map(|(id, p)| (*id, p.like_score))
            .collect();

        let scored = score_batch(
            &candidates,
            &self.statistical,
            &self.collaborative,
            self.external.as_deref(),
            &self.index,
            &peer_likes,
        );

        let by_id: HashMap<i64, &Song> = catalog.iter().map(|s| (s.id, s)).collect();
        let fused: Vec<RankedPick> = scored
            .iter()
            .filter_map(|candidate| {
                let result = fuse(candidate, &self.fusion_weights)?;
                let song = by_id.get(&result.song_id)?;
                Some(RankedPick {
                    song: (*song).clone(),
                    score: result.score,
                    confidence: result.confidence,
                    reason: result.reason,
                })
            })
            .collect();

        let recent = self.recently_played(&history);
        let limit = count.unwrap_or(self.config.quick_picks_count);
        let picks = assemble(fused, &recent, self.config.diversity_cap, limit);

        log::info!("Generated {} quick picks from {} candidates", picks.len(), catalog.len());
        Ok(QuickPicks {
            version: PICKS_VERSION,
            picks,
        })
    }

    /// Recomputes and stores a feature vector for every catalog song on a
    /// background thread. Already-stored vectors keep serving queries while
    /// the run replaces them one at a time.
    ///
    /// # Errors
    ///
    /// Fails if the inputs cannot be read before the thread starts.
    pub fn train_models(&self) -> Result<TrainingHandle> {
        let catalog = self
            .store
            .get_all_songs()
            .context("Training needs the catalog")?;
        let history = self
            .store
            .get_recent_history(self.config.history_window)
            .context("Training needs listening history")?;
        let prefs = self.preference_map(catalog.len())?;

        let index = self.index.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();

        let handle = thread::spawn(move || {
            let now = now_unix();
            let ctx = ExtractionContext::build(&history, &catalog, now);
            let events_by_song = group_by_song(&history);

            let mut stored = 0usize;
            for song in &catalog {
                if cancel_flag.load(Ordering::Relaxed) {
                    log::info!("Training cancelled after {stored} songs");
                    break;
                }
                let events = events_by_song
                    .get(&song.id)
                    .map_or(&[][..], Vec::as_slice);
                let vector = extract(song, events, prefs.get(&song.id), &ctx);
                index.store(song.id, &vector.as_array());
                stored += 1;

                if stored % TRAINING_FLUSH_EVERY == 0 {
                    index.flush();
                }
            }

            index.flush();
            log::info!("Training stored {stored} feature vectors");
            stored
        });

        Ok(TrainingHandle { cancel, handle })
    }

    /// Songs likely to follow `current`, from the transition graph first and
    /// cosine neighbors as backfill. Never suggests excluded songs.
    ///
    /// # Errors
    ///
    /// Fails only when the store cannot be read.
    pub fn get_sequence_based_suggestions(
        &self,
        current: i64,
        exclude: &HashSet<i64>,
        limit: usize,
    ) -> Result<Vec<Song>> {
        let successors = self.lock_graph().successors(current);

        let mut ids: Vec<i64> = successors
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| *id != current && !exclude.contains(id))
            .take(limit)
            .collect();

        // Backfill from the similarity index when the graph runs dry.
        if ids.len() < limit {
            if let Some(query) = self.index.get(current) {
                let seen: HashSet<i64> = ids.iter().copied().collect();
                for (id, _) in self.index.find_similar(&query, limit + exclude.len() + 1) {
                    if ids.len() >= limit {
                        break;
                    }
                    if id != current && !exclude.contains(&id) && !seen.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }

        let mut songs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(song) = self.store.get_song(id)? {
                songs.push(song);
            }
        }
        Ok(songs)
    }

    /// Records a manual playback observation and reinforces the transition
    /// from `previous` when one is given.
    ///
    /// # Errors
    ///
    /// Fails when the event cannot be persisted.
    pub fn record_play(
        &self,
        song_id: i64,
        previous: Option<i64>,
        listen_duration_ms: u64,
        completion_rate: f64,
        skipped: bool,
    ) -> Result<()> {
        self.store
            .record_play(song_id, listen_duration_ms, completion_rate, skipped)?;

        if let Some(from) = previous {
            let now = now_unix();
            let edge = {
                let mut graph = self.lock_graph();
                if skipped {
                    graph.record_skip(from, song_id, now)
                } else {
                    graph.record_transition(from, song_id, completion_rate, now)
                }
            };
            if let Err(e) = self.store.upsert_transition(&edge) {
                log::warn!("Transition persistence failed, keeping in-memory edge: {e:#}");
            }
        }
        Ok(())
    }

    /// Forgets all learned model state: the similarity index (and its
    /// snapshot), the transition graph (in memory and persisted) and any
    /// external scorer's state. Idempotent; the catalog and listening
    /// history are untouched.
    ///
    /// # Errors
    ///
    /// Fails when the persisted transitions cannot be deleted.
    pub fn clear_model_data(&self) -> Result<()> {
        self.index.clear();
        self.lock_graph().clear();
        self.store
            .clear_transitions()
            .context("Failed to clear persisted transitions")?;
        if let Some(external) = &self.external {
            external.reset();
        }
        log::info!("Cleared all learned model data");
        Ok(())
    }

    /// Deletes listening events older than the retention window. Aggregates
    /// and transitions survive.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot delete.
    pub fn prune_old_events(&self) -> Result<usize> {
        let cutoff = now_unix() - i64::from(self.config.retention_days) * 86_400;
        self.store.prune_events_before(cutoff)
    }

    /// Flushes persistent state; call before exit.
    pub fn shutdown(&self) {
        self.index.flush();
    }

    fn preference_map(
        &self,
        catalog_size: usize,
    ) -> Result<HashMap<i64, crate::catalog::PreferenceAggregate>> {
        Ok(self
            .store
            .get_top_preferences(catalog_size.max(1))?
            .into_iter()
            .map(|p| (p.song_id, p))
            .collect())
    }

    /// Distinct song ids among the newest `recent_exclusion` events.
    fn recently_played(&self, history: &[ListeningEvent]) -> HashSet<i64> {
        let mut recent = HashSet::new();
        for event in history {
            if recent.len() >= self.config.recent_exclusion {
                break;
            }
            recent.insert(event.song_id);
        }
        recent
    }

    fn lock_graph(&self) -> std::sync::MutexGuard<'_, TransitionGraph> {
        self.graph
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RefillSource for RecommendationEngine {
    /// Tier-1 refill: quick picks, falling back to sequence suggestions
    /// from the seed. Failures become an empty batch so the queue can move
    /// on to its own fallback tiers.
    fn refill_candidates(&self, seed: Option<i64>, count: usize) -> Vec<Song> {
        match self.generate_quick_picks(Some(count)) {
            Ok(result) if !result.picks.is_empty() => {
                return result.picks.into_iter().map(|p| p.song).collect();
            }
            Ok(_) => {}
            Err(e) => log::warn!("Refill via quick picks failed: {e:#}"),
        }

        if let Some(seed) = seed {
            match self.get_sequence_based_suggestions(seed, &HashSet::new(), count) {
                Ok(songs) => return songs,
                Err(e) => log::warn!("Refill via sequence suggestions failed: {e:#}"),
            }
        }
        Vec::new()
    }
}

/// Constructs the fully wired engine against on-disk state: opens the
/// catalog database, loads the similarity snapshot and restores the
/// persisted transition graph.
///
/// # Errors
///
/// Fails when the data directory or database is unusable.
pub fn bootstrap(config: EngineConfig) -> Result<RecommendationEngine> {
    let store = Arc::new(crate::catalog::SqliteStore::open(
        &crate::config::get_db_path()?,
    )?);

    let index = Arc::new(SimilarityIndex::new(
        config.similarity_capacity,
        config.candidate_buffer,
        config.flush_interval,
        Some(crate::config::get_snapshot_path()?),
    ));
    index.load();

    let mut graph = TransitionGraph::new(config.transition_alpha, config.transition_beta);
    match store.load_transitions() {
        Ok(edges) => graph.load(edges),
        // A fresh graph re-learns from future plays.
        Err(e) => log::warn!("Could not restore transition graph: {e:#}"),
    }

    Ok(RecommendationEngine::new(
        store,
        index,
        Arc::new(Mutex::new(graph)),
        None,
        config,
    ))
}

fn group_by_song(history: &[ListeningEvent]) -> HashMap<i64, Vec<ListeningEvent>> {
    let mut grouped: HashMap<i64, Vec<ListeningEvent>> = HashMap::new();
    for event in history {
        grouped.entry(event.song_id).or_default().push(event.clone());
    }
    grouped
}
