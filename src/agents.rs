//! Scoring agents.
//!
//! Each agent independently turns a song's [`FeatureVector`] into an
//! [`AgentOutcome`] (score, confidence, human-readable reason). Agents never
//! share mutable state; a candidate batch fans out across the rayon pool and
//! joins before fusion. Any single agent failing or abstaining simply drops
//! its contribution.

use crate::features::{FeatureVector, FEATURE_DIM};
use crate::similarity::SimilarityIndex;
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;

/// One agent's verdict on one song.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    /// Ranked score in `[0, 100]`.
    pub score: f64,
    /// How much this verdict should count, in `[0, 100]`.
    pub confidence: f64,
    /// Short explanation surfaced alongside the recommendation.
    pub reason: String,
}

/// Optional third scoring contribution (an external ML model, say).
///
/// Implementations live outside this crate; a failure or timeout is treated
/// as a transient compute failure and the contribution is dropped.
pub trait ExternalScorer: Send + Sync {
    /// Human-readable scorer name, used in logs and reasons.
    fn name(&self) -> &str;

    /// Scores one song; errors are dropped from fusion, never propagated.
    fn score(&self, song_id: i64, vector: &FeatureVector) -> Result<AgentOutcome>;

    /// Resets any learned state; called from `clear_model_data`.
    fn reset(&self) {}
}

/// Fixed weights for the statistical dot product. They sum to 1, with
/// completion and recency weighted highest; the skip-rate dimension enters
/// as its complement so every term rewards.
#[derive(Debug, Clone, Copy)]
pub struct StatWeights {
    pub weights: [f64; FEATURE_DIM],
}

impl Default for StatWeights {
    fn default() -> Self {
        Self {
            // play, completion, skip-complement, recency, time-of-day,
            // genre, artist, consecutive, session
            weights: [0.10, 0.20, 0.10, 0.20, 0.10, 0.10, 0.10, 0.05, 0.05],
        }
    }
}

/// Closed-form statistical scorer: one dot product, one sigmoid. O(1).
#[derive(Debug, Clone, Default)]
pub struct StatisticalAgent {
    weights: StatWeights,
}

impl StatisticalAgent {
    #[must_use]
    pub fn new(weights: StatWeights) -> Self {
        Self { weights }
    }

    /// Scores a feature vector.
    #[must_use]
    pub fn score(&self, vector: &FeatureVector) -> AgentOutcome {
        let mut dims = vector.as_array();
        // Skip rate is the only "bad" dimension; flip it.
        dims[2] = 1.0 - dims[2];

        let dot: f64 = dims
            .iter()
            .zip(&self.weights.weights)
            .map(|(v, w)| v * w)
            .sum();

        let score = sigmoid(2.0 * dot - 1.0) * 100.0;

        // Depth of history, completion habit and skip avoidance each vouch
        // for the verdict.
        let confidence = (vector.play_frequency
            + vector.avg_completion_rate
            + (1.0 - vector.skip_rate))
            / 3.0
            * 100.0;

        AgentOutcome {
            score,
            confidence,
            reason: format!(
                "listening profile (completion {:.2}, recency {:.2})",
                vector.avg_completion_rate, vector.recency_score
            ),
        }
    }
}

/// Bounded logistic normalization.
#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Nearest-neighbor collaborative scorer.
///
/// Looks up the query vector's cosine neighbors in the similarity index and
/// transfers their like scores, weighted by similarity. Abstains (`None`)
/// when too few peers are indexed, which simply drops it from fusion.
#[derive(Debug, Clone)]
pub struct CollaborativeAgent {
    /// Neighbors fetched per query (the song itself may be among them).
    pub neighbors: usize,
    /// Minimum usable peers before the agent renders a verdict.
    pub min_peers: usize,
}

impl Default for CollaborativeAgent {
    fn default() -> Self {
        Self {
            neighbors: 6,
            min_peers: 2,
        }
    }
}

impl CollaborativeAgent {
    /// Scores `song_id` from its indexed peers' like scores.
    ///
    /// `peer_likes` maps song ids to like scores in `[0, 100]`; peers absent
    /// from the map contribute a neutral 50.
    #[must_use]
    pub fn analyze(
        &self,
        song_id: i64,
        vector: &FeatureVector,
        index: &SimilarityIndex,
        peer_likes: &HashMap<i64, f64>,
    ) -> Option<AgentOutcome> {
        let query = vector.as_array();
        let hits = index.find_similar(&query, self.neighbors + 1);

        let peers: Vec<(i64, f64)> = hits
            .into_iter()
            .filter(|(id, _)| *id != song_id)
            .take(self.neighbors)
            .collect();

        if peers.len() < self.min_peers {
            return None;
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut sim_sum = 0.0;
        for (peer, sim) in &peers {
            let affinity = sim.max(0.0);
            let like = peer_likes.get(peer).copied().unwrap_or(50.0);
            weighted += affinity * like;
            total_weight += affinity;
            sim_sum += affinity;
        }

        if total_weight <= f64::EPSILON {
            return None;
        }

        let score = (weighted / total_weight).clamp(0.0, 100.0);
        let avg_sim = sim_sum / peers.len() as f64;
        let depth = (peers.len() as f64 / self.neighbors as f64).min(1.0);
        let confidence = (avg_sim.clamp(0.0, 1.0) * 0.6 + depth * 0.4) * 100.0;

        Some(AgentOutcome {
            score,
            confidence,
            reason: format!("similar to {} songs you rate well", peers.len()),
        })
    }
}

/// Joint output of all agents for one candidate, pre-fusion.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub song_id: i64,
    pub statistical: Option<AgentOutcome>,
    pub collaborative: Option<AgentOutcome>,
    pub external: Option<AgentOutcome>,
}

/// Runs all agents over a candidate batch in parallel and joins the results.
///
/// Fan-out/fan-in: each candidate is scored independently on the rayon pool;
/// no agent observes another's output. External-scorer failures are logged
/// and dropped per candidate, never propagated.
pub fn score_batch(
    candidates: &[(i64, FeatureVector)],
    statistical: &StatisticalAgent,
    collaborative: &CollaborativeAgent,
    external: Option<&dyn ExternalScorer>,
    index: &SimilarityIndex,
    peer_likes: &HashMap<i64, f64>,
) -> Vec<ScoredCandidate> {
    candidates
        .par_iter()
        .map(|(song_id, vector)| {
            let stat = Some(statistical.score(vector));
            let collab = collaborative.analyze(*song_id, vector, index, peer_likes);
            let ext = external.and_then(|scorer| match scorer.score(*song_id, vector) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    log::warn!("External scorer '{}' failed for song {song_id}: {e:#}", scorer.name());
                    None
                }
            });

            ScoredCandidate {
                song_id: *song_id,
                statistical: stat,
                collaborative: collab,
                external: ext,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistical_score_bounded_and_deterministic() {
        let agent = StatisticalAgent::default();

        let neutral = agent.score(&FeatureVector::NEUTRAL);
        assert!(neutral.score > 0.0 && neutral.score < 100.0);
        assert_eq!(neutral, agent.score(&FeatureVector::NEUTRAL));

        let perfect = FeatureVector {
            play_frequency: 1.0,
            avg_completion_rate: 1.0,
            skip_rate: 0.0,
            recency_score: 1.0,
            time_of_day_match: 1.0,
            genre_affinity: 1.0,
            artist_affinity: 1.0,
            consecutive_plays: 0.0,
            session_context: 0.8,
        };
        let best = agent.score(&perfect);
        assert!(best.score > neutral.score);
        assert!(best.confidence > neutral.confidence);
        assert!((0.0..=100.0).contains(&best.score));
        assert!((0.0..=100.0).contains(&best.confidence));
    }

    #[test]
    fn test_statistical_weights_sum_to_one() {
        let sum: f64 = StatWeights::default().weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_heavy_skipping_lowers_score() {
        let agent = StatisticalAgent::default();
        let mut liked = FeatureVector::NEUTRAL;
        liked.skip_rate = 0.0;
        let mut skipped = FeatureVector::NEUTRAL;
        skipped.skip_rate = 1.0;

        assert!(agent.score(&liked).score > agent.score(&skipped).score);
    }

    #[test]
    fn test_collaborative_abstains_on_thin_index() {
        let index = SimilarityIndex::new(100, 100, 1000, None);
        index.store(1, &FeatureVector::NEUTRAL.as_array());

        let agent = CollaborativeAgent::default();
        let verdict = agent.analyze(1, &FeatureVector::NEUTRAL, &index, &HashMap::new());
        assert!(verdict.is_none());
    }

    #[test]
    fn test_collaborative_transfers_peer_likes() {
        let index = SimilarityIndex::new(100, 100, 1000, None);
        let vector = FeatureVector::NEUTRAL;
        for id in 1..=4 {
            index.store(id, &vector.as_array());
        }

        let mut likes = HashMap::new();
        likes.insert(2_i64, 90.0);
        likes.insert(3_i64, 80.0);
        likes.insert(4_i64, 70.0);

        let agent = CollaborativeAgent::default();
        let verdict = agent
            .analyze(1, &vector, &index, &likes)
            .expect("enough peers indexed");
        assert!(verdict.score > 60.0 && verdict.score <= 90.0);
        assert!(verdict.confidence > 0.0);
    }

    struct FailingScorer;
    impl ExternalScorer for FailingScorer {
        fn name(&self) -> &str {
            "failing"
        }
        fn score(&self, _song_id: i64, _vector: &FeatureVector) -> Result<AgentOutcome> {
            anyhow::bail!("model unavailable")
        }
    }

    #[test]
    fn test_batch_drops_failing_external_scorer() {
        let index = SimilarityIndex::new(100, 100, 1000, None);
        let candidates = vec![(1_i64, FeatureVector::NEUTRAL), (2, FeatureVector::NEUTRAL)];

        let scored = score_batch(
            &candidates,
            &StatisticalAgent::default(),
            &CollaborativeAgent::default(),
            Some(&FailingScorer),
            &index,
            &HashMap::new(),
        );

        assert_eq!(scored.len(), 2);
        for candidate in scored {
            assert!(candidate.statistical.is_some());
            assert!(candidate.external.is_none());
        }
    }
}
