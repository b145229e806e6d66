//! Live playback queue engine.
//!
//! Owns [`QueueState`] exclusively: ordered songs, the current index and a
//! bounded play history. Every operation is a transition on that state
//! returning the new current song (or none); external readers observe the
//! queue only through cloned [`QueueSnapshot`]s.
//!
//! Two behaviors set this apart from a dumb playlist:
//!
//! - **Auto-refill**: when the upcoming queue runs low, candidates are
//!   requested from the recommendation pipeline, falling back to
//!   same-genre/same-artist catalog picks, then to uniform-random picks.
//!   Each tier is tried only if the previous yielded nothing; exhausting
//!   all three is a legitimate "no next song" state, never an error.
//! - **Intelligent shuffle**: the remainder of the queue is ordered by
//!   weighted sampling over similarity, transition weight, skip and recency
//!   penalties plus a bounded exploration term, so strong successors are
//!   favored while every song keeps a nonzero chance.
//!
//! Skip/completion callbacks update the transition graph *before* mutating
//! queue state, so the graph always reflects a transition before any
//! consumer can observe the new current song.

use crate::catalog::{now_unix, CatalogStore, Song};
use crate::similarity::SimilarityIndex;
use crate::transitions::TransitionGraph;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Minimum sampling weight so low-score songs keep a nonzero probability.
const SAMPLING_FLOOR: f64 = 0.05;

/// Penalty applied to candidates already in the recent play history.
const RECENT_PENALTY: f64 = 0.3;

/// Supplies fresh candidates for queue refill (tier 1: the recommendation
/// pipeline). Failures are expressed as an empty batch.
pub trait RefillSource: Send + Sync {
    fn refill_candidates(&self, seed: Option<i64>, count: usize) -> Vec<Song>;
}

/// Queue tuning knobs, taken from [`crate::config::EngineConfig`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub refill_threshold: usize,
    pub refill_enabled: bool,
    pub refill_batch: usize,
    pub history_cap: usize,
    pub exploration_weight: f64,
}

impl From<&crate::config::EngineConfig> for QueueConfig {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            refill_threshold: config.refill_threshold,
            refill_enabled: config.refill_enabled,
            refill_batch: config.refill_batch,
            history_cap: config.history_cap,
            exploration_weight: config.exploration_weight,
        }
    }
}

/// The queue engine's exclusively owned state.
///
/// Invariant: `current` is a valid index into `songs`, or the queue is empty
/// and `current` is `None`.
#[derive(Debug, Default)]
struct QueueState {
    songs: Vec<Song>,
    current: Option<usize>,
    history: VecDeque<i64>,
}

/// Read-only published view of the queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub songs: Vec<Song>,
    pub current_index: Option<usize>,
    /// Recently played song ids, newest last.
    pub history: Vec<i64>,
}

/// Owns and mutates the live playback queue.
pub struct QueueEngine {
    state: QueueState,
    config: QueueConfig,
    store: Arc<dyn CatalogStore>,
    graph: Arc<Mutex<TransitionGraph>>,
    similarity: Arc<SimilarityIndex>,
    refill: Option<Arc<dyn RefillSource>>,
}

impl QueueEngine {
    #[must_use]
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn CatalogStore>,
        graph: Arc<Mutex<TransitionGraph>>,
        similarity: Arc<SimilarityIndex>,
        refill: Option<Arc<dyn RefillSource>>,
    ) -> Self {
        Self {
            state: QueueState::default(),
            config,
            store,
            graph,
            similarity,
            refill,
        }
    }

    /// The song at the current index, if any.
    #[must_use]
    pub fn current_song(&self) -> Option<&Song> {
        self.state.current.and_then(|i| self.state.songs.get(i))
    }

    /// Songs remaining after the current one.
    #[must_use]
    pub fn upcoming_len(&self) -> usize {
        match self.state.current {
            Some(i) => self.state.songs.len().saturating_sub(i + 1),
            None => self.state.songs.len(),
        }
    }

    /// Cloned read-only view for external consumers.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            songs: self.state.songs.clone(),
            current_index: self.state.current,
            history: self.state.history.iter().copied().collect(),
        }
    }

    /// Appends a song; a previously empty queue starts playing it.
    pub fn add_to_queue(&mut self, song: Song) -> Option<Song> {
        self.state.songs.push(song);
        if self.state.current.is_none() {
            self.state.current = Some(0);
        }
        self.current_song().cloned()
    }

    /// Inserts a song directly after the current one.
    pub fn place_next(&mut self, song: Song) -> Option<Song> {
        match self.state.current {
            Some(i) => self.state.songs.insert(i + 1, song),
            None => {
                self.state.songs.insert(0, song);
                self.state.current = Some(0);
            }
        }
        self.current_song().cloned()
    }

    /// Empties the queue; play history is kept.
    pub fn clear_queue(&mut self) {
        self.state.songs.clear();
        self.state.current = None;
    }

    /// Jumps to `index` without recording any listening signal.
    pub fn play_from_queue(&mut self, index: usize) -> Option<Song> {
        if index < self.state.songs.len() {
            self.state.current = Some(index);
        }
        self.current_song().cloned()
    }

    /// Advances without recording a listening signal (transport "next").
    pub fn move_to_next(&mut self) -> Option<Song> {
        self.maybe_refill();
        match self.state.current {
            Some(i) if i + 1 < self.state.songs.len() => {
                self.state.current = Some(i + 1);
                self.current_song().cloned()
            }
            _ => None,
        }
    }

    /// Steps back without recording a listening signal.
    pub fn move_to_previous(&mut self) -> Option<Song> {
        match self.state.current {
            Some(i) if i > 0 => {
                self.state.current = Some(i - 1);
                self.current_song().cloned()
            }
            _ => None,
        }
    }

    /// Removes the song at `index`, keeping `current` pointed at the same
    /// song where possible.
    pub fn remove_from_queue(&mut self, index: usize) -> Option<Song> {
        if index >= self.state.songs.len() {
            return self.current_song().cloned();
        }
        self.state.songs.remove(index);

        self.state.current = match self.state.current {
            Some(_) if self.state.songs.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) => Some(c.min(self.state.songs.len() - 1)),
            None => None,
        };
        self.current_song().cloned()
    }

    /// Moves the song at `from` to position `to`.
    pub fn reorder_queue(&mut self, from: usize, to: usize) -> Option<Song> {
        let len = self.state.songs.len();
        if from >= len || to >= len || from == to {
            return self.current_song().cloned();
        }

        let current_id = self.current_song().map(|s| s.id);
        let song = self.state.songs.remove(from);
        self.state.songs.insert(to, song);

        // Current follows the song it pointed at.
        if let Some(id) = current_id {
            self.state.current = self.state.songs.iter().position(|s| s.id == id);
        }
        self.current_song().cloned()
    }

    /// Uniform shuffle with the current song pinned at position 0.
    pub fn shuffle(&mut self) -> Option<Song> {
        if self.state.songs.is_empty() {
            return None;
        }
        let current = self.state.current.unwrap_or(0);
        self.state.songs.swap(0, current);
        self.state.songs[1..].shuffle(&mut thread_rng());
        self.state.current = Some(0);
        self.current_song().cloned()
    }

    /// Weighted-sampling shuffle biased by similarity, transition weight,
    /// skip and recency penalties, plus a bounded exploration term. The
    /// current song stays at position 0 as the seed.
    pub fn intelligent_shuffle(&mut self) -> Option<Song> {
        if self.state.songs.is_empty() {
            return None;
        }
        let current = self.state.current.unwrap_or(0);
        self.state.songs.swap(0, current);
        self.state.current = Some(0);

        let base_id = self.state.songs[0].id;
        let mut rng = thread_rng();
        let recent: HashSet<i64> = self.state.history.iter().copied().collect();

        let similarity = self.similarity.clone();
        let store = self.store.clone();
        let graph_arc = self.graph.clone();
        let graph = graph_arc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let exploration_weight = self.config.exploration_weight;

        let mut pool: Vec<(Song, f64)> = self
            .state
            .songs
            .drain(1..)
            .map(|song| {
                let sim = similarity
                    .similarity_between(base_id, song.id)
                    .unwrap_or(0.0);
                let transition = graph.weight(base_id, song.id);
                let skip_penalty = store.get_preference(song.id).ok().flatten().map_or(0.0, |p| {
                    f64::from(p.skip_count) / f64::from(p.play_count.max(1))
                });
                let recent_penalty = if recent.contains(&song.id) {
                    RECENT_PENALTY
                } else {
                    0.0
                };
                let exploration = rng.gen::<f64>() * exploration_weight;

                let score = sim + transition - skip_penalty - recent_penalty + exploration;
                (song, score.max(SAMPLING_FLOOR))
            })
            .collect();
        drop(graph);

        // Sample without replacement, proportional to score.
        while !pool.is_empty() {
            let total: f64 = pool.iter().map(|(_, w)| w).sum();
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = pool.len() - 1;
            for (i, (_, w)) in pool.iter().enumerate() {
                target -= w;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            let (song, _) = pool.remove(chosen);
            self.state.songs.push(song);
        }

        self.current_song().cloned()
    }

    /// Marks the current song as finished with the given completion rate,
    /// then advances. The transition graph and listening history are
    /// updated before the queue state changes.
    pub fn complete_current(&mut self, completion_rate: f64) -> Option<Song> {
        self.finish_current(completion_rate, false)
    }

    /// Marks the current song as skipped at the given completion rate, then
    /// advances. Decays the transition edge to the upcoming song.
    pub fn skip_current(&mut self, completion_rate: f64) -> Option<Song> {
        self.finish_current(completion_rate, true)
    }

    fn finish_current(&mut self, completion_rate: f64, skipped: bool) -> Option<Song> {
        let completion_rate = completion_rate.clamp(0.0, 1.0);
        let from = self.current_song().cloned()?;

        // Refill first so the upcoming song (the transition target) exists.
        self.maybe_refill();
        let to_id = self
            .state
            .current
            .and_then(|i| self.state.songs.get(i + 1))
            .map(|s| s.id);

        // Graph before state: consumers observing the new current song must
        // already see the recorded transition.
        if let Some(to) = to_id {
            let now = now_unix();
            let edge = {
                let mut graph = self.lock_graph();
                if skipped {
                    graph.record_skip(from.id, to, now)
                } else {
                    graph.record_transition(from.id, to, completion_rate, now)
                }
            };
            if let Err(e) = self.store.upsert_transition(&edge) {
                log::warn!("Transition persistence failed, keeping in-memory edge: {e:#}");
            }
        }

        let listen_ms = (completion_rate * f64::from(from.duration_secs) * 1000.0) as u64;
        if let Err(e) = self
            .store
            .record_play(from.id, listen_ms, completion_rate, skipped)
        {
            log::warn!("Failed to record play for song {}: {e:#}", from.id);
        }

        self.state.history.push_back(from.id);
        while self.state.history.len() > self.config.history_cap {
            self.state.history.pop_front();
        }

        match self.state.current {
            Some(i) if i + 1 < self.state.songs.len() => {
                self.state.current = Some(i + 1);
                self.current_song().cloned()
            }
            // Refill exhausted: a legitimate terminal state.
            _ => None,
        }
    }

    fn maybe_refill(&mut self) {
        if !self.config.refill_enabled || self.upcoming_len() >= self.config.refill_threshold {
            return;
        }

        let seed = self
            .current_song()
            .map(|s| s.id)
            .or_else(|| self.state.history.back().copied());
        let queued: HashSet<i64> = self.state.songs.iter().map(|s| s.id).collect();
        let want = self.config.refill_batch;

        let mut fresh = self.refill_from_recommender(seed, want, &queued);
        if fresh.is_empty() {
            fresh = self.refill_from_genre_artist(seed, want, &queued);
        }
        if fresh.is_empty() {
            fresh = self.refill_uniform_random(want, &queued);
        }

        if fresh.is_empty() {
            log::debug!("All refill tiers exhausted; queue will end");
            return;
        }

        log::debug!("Refilled queue with {} songs", fresh.len());
        let was_empty = self.state.songs.is_empty();
        self.state.songs.append(&mut fresh);
        if was_empty && !self.state.songs.is_empty() {
            self.state.current = Some(0);
        }
    }

    fn refill_from_recommender(
        &self,
        seed: Option<i64>,
        want: usize,
        queued: &HashSet<i64>,
    ) -> Vec<Song> {
        let Some(source) = &self.refill else {
            return Vec::new();
        };
        source
            .refill_candidates(seed, want)
            .into_iter()
            .filter(|s| !queued.contains(&s.id))
            .take(want)
            .collect()
    }

    /// Tier 2: songs sharing the seed's genre or artist.
    fn refill_from_genre_artist(
        &self,
        seed: Option<i64>,
        want: usize,
        queued: &HashSet<i64>,
    ) -> Vec<Song> {
        let Some(seed_id) = seed else {
            return Vec::new();
        };
        let Ok(Some(seed_song)) = self.store.get_song(seed_id) else {
            return Vec::new();
        };
        let Ok(catalog) = self.store.get_all_songs() else {
            return Vec::new();
        };

        let mut candidates: Vec<Song> = catalog
            .into_iter()
            .filter(|s| {
                s.id != seed_id
                    && !queued.contains(&s.id)
                    && (s.genre == seed_song.genre || s.artist == seed_song.artist)
            })
            .collect();
        candidates.shuffle(&mut thread_rng());
        candidates.truncate(want);
        if !candidates.is_empty() {
            log::debug!("Refill tier 2 (genre/artist) produced {} songs", candidates.len());
        }
        candidates
    }

    /// Tier 3: uniform-random catalog picks.
    fn refill_uniform_random(&self, want: usize, queued: &HashSet<i64>) -> Vec<Song> {
        let Ok(catalog) = self.store.get_all_songs() else {
            return Vec::new();
        };
        let pool: Vec<Song> = catalog
            .into_iter()
            .filter(|s| !queued.contains(&s.id))
            .collect();
        let picked: Vec<Song> = pool
            .choose_multiple(&mut thread_rng(), want)
            .cloned()
            .collect();
        if !picked.is_empty() {
            log::debug!("Refill tier 3 (uniform random) produced {} songs", picked.len());
        }
        picked
    }

    fn lock_graph(&self) -> std::sync::MutexGuard<'_, TransitionGraph> {
        self.graph
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
