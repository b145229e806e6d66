//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for Encore using Clap
//! derive macros. It provides a type-safe way to parse command-line
//! arguments and route them to appropriate functionality.
//!
//! ## Commands
//!
//! - `import`: Load catalog records from a JSON file
//! - `list`: Display all catalogued songs with their preference statistics
//! - `picks`: Generate the personalized Quick Picks list
//! - `record`: Record a playback observation (play or skip)
//! - `suggest`: Suggest songs likely to follow a given song
//! - `train`: Recompute all feature vectors in the background
//! - `clear`: Forget all learned model state
//! - `prune`: Delete listening events past the retention window
//!
//! ## Examples
//!
//! ```bash
//! encore import catalog.json
//! encore picks --count 10
//! encore record 42 --completion 0.9
//! encore suggest 42
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl Shell {
    /// Maps to the `clap_complete` shell type.
    #[must_use]
    pub fn to_completion_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}

/// Main application arguments structure.
///
/// Uses Clap derive macros to automatically generate argument parsing,
/// help text, and validation. The main structure contains only a subcommand
/// since all functionality is accessed through specific commands.
#[derive(Parser)]
#[command(name = "encore")]
#[command(about = "Encore: Personal music recommendations learned from your listening")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
///
/// Each variant corresponds to a major piece of functionality in Encore.
/// Command arguments are embedded directly in the enum variants for
/// type safety and automatic validation.
#[derive(Subcommand)]
pub enum Command {
    /// Import catalog records from a JSON file
    ///
    /// Reads an array of song records (id, title, artist, album, genre,
    /// duration_secs) and inserts them into the catalog. Existing records
    /// with the same id are replaced; listening history is untouched.
    Import {
        /// Path to the JSON catalog file
        file: PathBuf,
    },

    /// List all songs in the catalog
    ///
    /// Displays every catalogued song together with its preference
    /// statistics: play count, skip count, average completion rate and the
    /// derived like score. Songs never played show no statistics.
    List,

    /// Generate the Quick Picks recommendation list
    ///
    /// Scores every catalog song against your recent listening history,
    /// fuses the statistical and collaborative verdicts and prints the
    /// ranked result. With no listening history yet, prints nothing rather
    /// than guessing.
    Picks {
        /// How many picks to generate
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Record a playback observation
    ///
    /// Appends a listening event for the song and updates its preference
    /// aggregate. When `--previous` names the song that played before,
    /// the transition between them is reinforced (or decayed on skip),
    /// which feeds both suggestions and intelligent shuffle.
    Record {
        /// Id of the song that played
        song_id: i64,

        /// Id of the song that played immediately before
        #[arg(short, long)]
        previous: Option<i64>,

        /// Fraction of the song actually played, 0.0 to 1.0
        #[arg(short, long, default_value = "1.0")]
        completion: f64,

        /// Mark the play as a skip
        #[arg(short, long)]
        skipped: bool,

        /// Listened milliseconds; derived from completion and the song
        /// duration when omitted
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Suggest songs likely to follow a given song
    ///
    /// Ranks successors from observed listening sequences first, then
    /// backfills with the most similar songs from the feature index.
    Suggest {
        /// Id of the song to suggest followers for
        song_id: i64,

        /// Maximum number of suggestions
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Recompute feature vectors for the whole catalog
    ///
    /// Runs feature extraction over every song against recent listening
    /// history and refreshes the similarity index. Runs on a background
    /// thread; the command waits for it to finish.
    Train,

    /// Forget all learned model state
    ///
    /// Clears the similarity index (including its on-disk snapshot), the
    /// transition graph and its persisted edges. The catalog and listening
    /// history are kept; recommendations rebuild from them over time.
    Clear,

    /// Delete listening events past the retention window
    ///
    /// Preference aggregates and transitions survive pruning, so old
    /// events stop occupying space without losing learned taste.
    Prune,

    /// Generate shell completions
    ///
    /// Generates completion scripts for various shells to enable tab
    /// completion of commands and options.
    ///
    /// Usage: encore completion bash > ~/.local/share/bash-completion/completions/encore
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}
