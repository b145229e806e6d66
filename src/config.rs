//! # Configuration Module
//!
//! Handles data-directory setup and engine tuning parameters for Encore.
//! Storage lives in the platform-standard data directory:
//!
//! - Linux: `~/.local/share/encore/`
//! - macOS: `~/Library/Application Support/encore/`
//! - Windows: `%APPDATA%\encore\`
//!
//! Two files are kept there: the SQLite catalog/history database
//! (`catalog.db`) and the similarity-index snapshot (`similarity.json`).
//! All algorithm knobs are collected in [`EngineConfig`] so the pipeline
//! components can be constructed with explicit, injected parameters rather
//! than ambient globals.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Returns the Encore data directory, creating it if necessary.
///
/// # Errors
///
/// Fails if the platform data directory cannot be determined or the
/// `encore` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let encore_dir = data_dir.join("encore");
    fs::create_dir_all(&encore_dir).with_context(|| {
        format!(
            "Failed to create Encore data directory at {}. Please check file permissions.",
            encore_dir.display()
        )
    })?;

    Ok(encore_dir)
}

/// Returns the platform-appropriate catalog database path.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("catalog.db"))
}

/// Returns the similarity-index snapshot path.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_snapshot_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("similarity.json"))
}

/// Tuning parameters for the recommendation pipeline.
///
/// Every component takes the values it needs from this struct at
/// construction time; nothing reads configuration globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum entries held by the similarity index before LRU eviction.
    pub similarity_capacity: usize,
    /// Size of the pre-sorted candidate buffer used by nearest-neighbor
    /// queries instead of scanning the whole index.
    pub candidate_buffer: usize,
    /// Snapshot the similarity index every N inserts.
    pub flush_interval: usize,
    /// Refill the queue when fewer upcoming songs than this remain.
    pub refill_threshold: usize,
    /// Whether auto-refill is active at all.
    pub refill_enabled: bool,
    /// How many songs one refill round requests.
    pub refill_batch: usize,
    /// Bounded play-history length kept by the queue engine.
    pub history_cap: usize,
    /// Songs played this recently are excluded from quick picks.
    pub recent_exclusion: usize,
    /// Maximum consecutive same-artist songs in assembled picks.
    pub diversity_cap: usize,
    /// Listening events older than this are pruned.
    pub retention_days: u32,
    /// Transition reinforcement step (scaled by completion rate).
    pub transition_alpha: f64,
    /// Transition decay factor applied on skip.
    pub transition_beta: f64,
    /// Share of the intelligent-shuffle score driven by random exploration.
    pub exploration_weight: f64,
    /// Default number of quick picks when the caller does not say.
    pub quick_picks_count: usize,
    /// How many recent listening events feed one extraction batch.
    pub history_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_capacity: 5000,
            candidate_buffer: 2000,
            flush_interval: 64,
            refill_threshold: 3,
            refill_enabled: true,
            refill_batch: 10,
            history_cap: 50,
            recent_exclusion: 10,
            diversity_cap: 2,
            retention_days: 90,
            transition_alpha: 0.1,
            transition_beta: 0.5,
            exploration_weight: 0.15,
            quick_picks_count: 20,
            history_window: 200,
        }
    }
}

/// Version tag attached to every quick-picks result, including the empty
/// "not enough data yet" result.
pub const PICKS_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_invariants() {
        let config = EngineConfig::default();

        assert!(config.similarity_capacity >= config.candidate_buffer);
        assert!(config.flush_interval > 0);
        assert!(config.refill_threshold > 0);
        assert!(config.transition_beta > 0.0 && config.transition_beta < 1.0);
        assert!(config.exploration_weight > 0.0 && config.exploration_weight < 1.0);
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).expect("config should serialize");
        let back: EngineConfig = serde_json::from_str(&json).expect("config should deserialize");

        assert_eq!(back.similarity_capacity, config.similarity_capacity);
        assert_eq!(back.refill_threshold, config.refill_threshold);
    }

    #[test]
    fn test_picks_version_is_stable() {
        assert_eq!(PICKS_VERSION, "1.0.0");
    }
}
