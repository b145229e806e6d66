//! Personal music recommendation core that learns from listening habits.
//!
//! Core modules:
//! - [`engine`] - Pipeline orchestration (Quick Picks, training, suggestions)
//! - [`catalog`] - SQLite catalog & listening-history store
//! - [`features`] - Feature extraction from listening history
//! - [`agents`] - Parallel scoring agents
//! - [`queue`] - Playback queue with auto-refill and intelligent shuffle
//!
//! ### Supporting Modules
//!
//! - [`config`] - Configuration and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`similarity`] - Bounded, persisted cosine-similarity index
//! - [`fusion`] - Agent-outcome fusion and pick assembly
//! - [`transitions`] - Weighted sequential-listening graph
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use encore::config::EngineConfig;
//! use encore::engine;
//! use anyhow::Result;
//!
//! # fn run() -> Result<()> {
//! let eng = engine::bootstrap(EngineConfig::default())?;
//!
//! // Record some listening, then ask for picks.
//! eng.record_play(42, None, 180_000, 1.0, false)?;
//! let result = eng.generate_quick_picks(Some(10))?;
//! for pick in &result.picks {
//!     println!("{} - {} ({:.1})", pick.song.artist, pick.song.title, pick.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## How Recommendations Work
//!
//! Every catalog song is described by a 9-dimensional feature vector
//! (play frequency, completion, skips, recency, time-of-day fit, genre and
//! artist affinity, repeat streak, session context) extracted from recent
//! listening. Two agents score each candidate in parallel:
//!
//! - **Statistical**: a weighted dot product of the feature vector pushed
//!   through a sigmoid
//! - **Collaborative**: like scores transferred from the song's nearest
//!   cosine neighbors in the similarity index
//!
//! Their verdicts are fused by weighted average (renormalized over whatever
//! is available), ranked, filtered for recently played songs and capped for
//! consecutive same-artist runs.
//!
//! Sequential taste is learned separately: completions reinforce and skips
//! decay edges of a song-to-song transition graph, which drives follow-up
//! suggestions and the intelligent shuffle.
//!
//! ## Error Handling
//!
//! All fallible public functions return `Result<T, anyhow::Error>`. Optional
//! enrichments (snapshot writes, one agent's verdict, edge persistence)
//! degrade by logging rather than failing the operation.

pub mod agents;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod features;
pub mod fusion;
pub mod queue;
pub mod similarity;
pub mod transitions;
