//! Fusion stage and recommendation assembler.
//!
//! Fusion merges whatever agent outcomes are available for a candidate into
//! one ranked score + confidence + reason. Missing agents are excluded from
//! the weight normalization, not zeroed, so a single agent failing or
//! abstaining never drags a song down and never aborts the pipeline.
//!
//! The assembler turns fused results into the final Quick Picks list: sort
//! by score descending, cap consecutive same-artist runs, drop recently
//! played songs, truncate.

use crate::agents::{AgentOutcome, ScoredCandidate};
use crate::catalog::Song;
use std::collections::HashSet;

/// Relative weights for the three possible contributions.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub statistical: f64,
    pub collaborative: f64,
    pub external: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            statistical: 0.4,
            collaborative: 0.4,
            external: 0.2,
        }
    }
}

/// Fused verdict for one song.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationResult {
    pub song_id: i64,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Combines the available agent outcomes into one result.
///
/// Returns `None` only when no agent produced anything at all.
#[must_use]
pub fn fuse(candidate: &ScoredCandidate, weights: &FusionWeights) -> Option<RecommendationResult> {
    let contributions: Vec<(&AgentOutcome, f64)> = [
        (candidate.statistical.as_ref(), weights.statistical),
        (candidate.collaborative.as_ref(), weights.collaborative),
        (candidate.external.as_ref(), weights.external),
    ]
    .into_iter()
    .filter_map(|(outcome, weight)| outcome.map(|o| (o, weight)))
    .collect();

    let total_weight: f64 = contributions.iter().map(|(_, w)| w).sum();
    if contributions.is_empty() || total_weight <= f64::EPSILON {
        return None;
    }

    let score = contributions
        .iter()
        .map(|(o, w)| o.score * w)
        .sum::<f64>()
        / total_weight;
    let confidence = contributions
        .iter()
        .map(|(o, w)| o.confidence * w)
        .sum::<f64>()
        / total_weight;
    let reason = contributions
        .iter()
        .map(|(o, _)| o.reason.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    Some(RecommendationResult {
        song_id: candidate.song_id,
        score,
        confidence,
        reason,
    })
}

/// One entry of the assembled Quick Picks list.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPick {
    pub song: Song,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Assembles the final candidate list.
///
/// Sorts by score descending (O(M log M)), removes recently played songs,
/// then greedily enforces the diversity cap: at most `diversity_cap`
/// consecutive songs by the same artist. When only one artist remains the
/// cap is relaxed rather than starving the list.
#[must_use]
pub fn assemble(
    mut picks: Vec<RankedPick>,
    recent: &HashSet<i64>,
    diversity_cap: usize,
    limit: usize,
) -> Vec<RankedPick> {
    picks.retain(|p| !recent.contains(&p.song.id));
    picks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.song.id.cmp(&b.song.id))
    });

    let diversity_cap = diversity_cap.max(1);
    let mut result: Vec<RankedPick> = Vec::with_capacity(limit.min(picks.len()));
    let mut pool = picks;

    while result.len() < limit && !pool.is_empty() {
        let tail_artist = trailing_artist_run(&result, diversity_cap);
        let next = pool
            .iter()
            .position(|p| tail_artist.map_or(true, |artist| p.song.artist != artist))
            // Everything left is the capped artist; take the best anyway.
            .unwrap_or(0);
        result.push(pool.remove(next));
    }

    result
}

/// Returns the artist of the trailing run iff it has reached the cap.
fn trailing_artist_run(picks: &[RankedPick], cap: usize) -> Option<&str> {
    let last = picks.last()?;
    let run = picks
        .iter()
        .rev()
        .take_while(|p| p.song.artist == last.song.artist)
        .count();
    (run >= cap).then_some(last.song.artist.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_song;

    fn outcome(score: f64) -> AgentOutcome {
        AgentOutcome {
            score,
            confidence: 50.0,
            reason: "test".to_string(),
        }
    }

    fn pick(id: i64, artist: &str, score: f64) -> RankedPick {
        RankedPick {
            song: test_song(id, &format!("Song {id}"), artist, "Rock"),
            score,
            confidence: 50.0,
            reason: String::new(),
        }
    }

    #[test]
    fn test_fuse_renormalizes_over_available_agents() {
        let weights = FusionWeights::default();

        let both = ScoredCandidate {
            song_id: 1,
            statistical: Some(outcome(80.0)),
            collaborative: Some(outcome(40.0)),
            external: None,
        };
        // Equal stat/collab weights: plain mean.
        let fused = fuse(&both, &weights).expect("two agents");
        assert!((fused.score - 60.0).abs() < 1e-9);

        // A missing agent is excluded from normalization, not zeroed.
        let only_stat = ScoredCandidate {
            song_id: 1,
            statistical: Some(outcome(80.0)),
            collaborative: None,
            external: None,
        };
        let fused = fuse(&only_stat, &weights).expect("one agent");
        assert!((fused.score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_with_no_agents_is_none() {
        let empty = ScoredCandidate {
            song_id: 1,
            statistical: None,
            collaborative: None,
            external: None,
        };
        assert!(fuse(&empty, &FusionWeights::default()).is_none());
    }

    #[test]
    fn test_fuse_joins_reasons() {
        let candidate = ScoredCandidate {
            song_id: 1,
            statistical: Some(AgentOutcome {
                score: 70.0,
                confidence: 60.0,
                reason: "profile".to_string(),
            }),
            collaborative: Some(AgentOutcome {
                score: 50.0,
                confidence: 40.0,
                reason: "peers".to_string(),
            }),
            external: None,
        };
        let fused = fuse(&candidate, &FusionWeights::default()).expect("fused");
        assert_eq!(fused.reason, "profile; peers");
    }

    #[test]
    fn test_assemble_sorts_and_truncates() {
        let picks = vec![pick(1, "A", 10.0), pick(2, "B", 90.0), pick(3, "C", 50.0)];
        let result = assemble(picks, &HashSet::new(), 2, 2);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].song.id, 2);
        assert_eq!(result[1].song.id, 3);
    }

    #[test]
    fn test_assemble_excludes_recent() {
        let picks = vec![pick(1, "A", 90.0), pick(2, "B", 50.0)];
        let recent: HashSet<i64> = [1].into_iter().collect();

        let result = assemble(picks, &recent, 2, 10);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].song.id, 2);
    }

    #[test]
    fn test_assemble_caps_consecutive_artists() {
        let picks = vec![
            pick(1, "A", 100.0),
            pick(2, "A", 99.0),
            pick(3, "A", 98.0),
            pick(4, "B", 10.0),
        ];
        let result = assemble(picks, &HashSet::new(), 2, 10);

        // The third "A" must be pushed behind the interposed "B".
        let artists: Vec<&str> = result.iter().map(|p| p.song.artist.as_str()).collect();
        assert_eq!(artists, vec!["A", "A", "B", "A"]);
    }

    #[test]
    fn test_assemble_relaxes_cap_for_single_artist_pool() {
        let picks = vec![pick(1, "A", 3.0), pick(2, "A", 2.0), pick(3, "A", 1.0)];
        let result = assemble(picks, &HashSet::new(), 1, 10);
        assert_eq!(result.len(), 3);
    }
}
