//! Weighted transition graph over songs.
//!
//! Captures observed sequential listening as a directed graph updated online
//! from completion and skip signals. Each update touches exactly one edge
//! and returns the updated edge, so the caller can delegate persistence to
//! the catalog store without this module ever batching updates across an
//! interruptible loop.

use crate::catalog::TransitionEdge;
use std::collections::HashMap;

/// In-memory Markov transition graph.
#[derive(Debug)]
pub struct TransitionGraph {
    edges: HashMap<i64, HashMap<i64, TransitionEdge>>,
    /// Reinforcement step, scaled by completion rate.
    alpha: f64,
    /// Multiplicative decay on skip.
    beta: f64,
}

impl TransitionGraph {
    #[must_use]
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            edges: HashMap::new(),
            alpha,
            beta: beta.clamp(0.0, 1.0),
        }
    }

    /// Restores edges persisted by the store.
    pub fn load(&mut self, edges: Vec<TransitionEdge>) {
        for edge in edges {
            self.edges
                .entry(edge.from_song_id)
                .or_default()
                .insert(edge.to_song_id, edge);
        }
    }

    fn edge_mut(&mut self, from: i64, to: i64, now: i64) -> &mut TransitionEdge {
        self.edges
            .entry(from)
            .or_default()
            .entry(to)
            .or_insert_with(|| TransitionEdge::new(from, to, now))
    }

    /// Records a completed transition `from -> to`.
    ///
    /// Reinforces the edge by `alpha * completion_rate`, or by `2 * alpha`
    /// for an exact repeat (`from == to`). Returns the updated edge for
    /// persistence.
    pub fn record_transition(
        &mut self,
        from: i64,
        to: i64,
        completion_rate: f64,
        now: i64,
    ) -> TransitionEdge {
        let completion_rate = completion_rate.clamp(0.0, 1.0);
        let alpha = self.alpha;
        let edge = self.edge_mut(from, to, now);

        if from == to {
            edge.weight += 2.0 * alpha;
        } else {
            edge.weight += alpha * completion_rate;
        }
        edge.weight = edge.weight.max(0.0);

        edge.play_count += 1;
        edge.avg_completion_rate +=
            (completion_rate - edge.avg_completion_rate) / f64::from(edge.play_count);
        edge.last_occurred = now;

        log::trace!(
            "Transition {from} -> {to}: weight {:.4}, plays {}",
            edge.weight,
            edge.play_count
        );
        edge.clone()
    }

    /// Records a skip after the transition `from -> to`, decaying the edge
    /// by `beta`. Returns the updated edge for persistence.
    pub fn record_skip(&mut self, from: i64, to: i64, now: i64) -> TransitionEdge {
        let beta = self.beta;
        let edge = self.edge_mut(from, to, now);

        edge.weight = (edge.weight * beta).max(0.0);
        edge.skip_count += 1;
        edge.last_occurred = now;

        log::trace!(
            "Skip {from} -> {to}: weight decayed to {:.6}",
            edge.weight
        );
        edge.clone()
    }

    /// Raw edge weight, 0.0 when the edge has never been observed.
    #[must_use]
    pub fn weight(&self, from: i64, to: i64) -> f64 {
        self.edges
            .get(&from)
            .and_then(|m| m.get(&to))
            .map_or(0.0, |e| e.weight)
    }

    /// Successor distribution: `P(to | from) = w(from,to) / Σ w(from,*)`,
    /// sorted by descending probability. Empty when the song has no
    /// outgoing weight.
    #[must_use]
    pub fn successors(&self, from: i64) -> Vec<(i64, f64)> {
        let Some(outgoing) = self.edges.get(&from) else {
            return Vec::new();
        };

        let total: f64 = outgoing.values().map(|e| e.weight).sum();
        if total <= f64::EPSILON {
            return Vec::new();
        }

        let mut dist: Vec<(i64, f64)> = outgoing
            .iter()
            .map(|(to, e)| (*to, e.weight / total))
            .collect();
        dist.sort_by(|(ia, pa), (ib, pb)| {
            pb.partial_cmp(pa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        dist
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashMap::len).sum()
    }

    /// Forgets everything. Idempotent.
    pub fn clear(&mut self) {
        self.edges.clear();
    }
}
