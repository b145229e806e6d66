//! # Encore - Personal Music Recommendations
//!
//! Encore learns from your listening habits (completions, skips, sequences)
//! to produce personalized Quick Picks and follow-up suggestions. All state
//! is local: a SQLite catalog/history database and a JSON similarity
//! snapshot under the platform data directory.
//!
//! ## Architecture
//!
//! - `cli`: Command-line interface definitions
//! - `catalog`: SQLite catalog & listening-history store
//! - `features`: Feature extraction from listening history
//! - `similarity`: Bounded, persisted similarity index
//! - `agents`/`fusion`: Parallel scoring and result fusion
//! - `transitions`: Sequential-listening graph
//! - `queue`: Playback queue engine with auto-refill and shuffle
//! - `engine`: Pipeline orchestration
//!
//! ## Usage
//!
//! ```bash
//! # Import a catalog
//! encore import catalog.json
//!
//! # Record listening
//! encore record 42 --completion 0.9
//! encore record 43 --previous 42 --skipped --completion 0.1
//!
//! # Get recommendations
//! encore picks --count 10
//! encore suggest 42
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use encore::catalog::{CatalogStore, Song};
use encore::config::EngineConfig;
use encore::engine::{self, RecommendationEngine};
use encore::{cli, fusion::RankedPick};
use log::info;
use std::collections::HashSet;
use std::fs;

/// Main entry point for the Encore application.
///
/// Initializes logging, parses command-line arguments, and routes commands
/// to the appropriate engine operations. All operations return Results for
/// consistent error handling throughout the application.
///
/// # Logging
///
/// Initializes environment logger which can be controlled via `RUST_LOG`:
/// - `RUST_LOG=debug encore picks` - Enable debug logging
/// - `RUST_LOG=encore::similarity=trace encore train` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    // Completion needs no engine (and must not create the data directory).
    if let cli::Command::Completion { shell } = &args.command {
        let mut cmd = cli::Args::command();
        clap_complete::generate(
            shell.to_completion_shell(),
            &mut cmd,
            "encore",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let engine = engine::bootstrap(EngineConfig::default())?;

    match args.command {
        cli::Command::Import { file } => {
            info!("Importing catalog from: {}", file.display());
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read catalog file {}", file.display()))?;
            let songs: Vec<Song> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid catalog JSON in {}", file.display()))?;
            engine.store().insert_songs(&songs)?;
            println!("Imported {} songs", songs.len());
        }
        cli::Command::List => {
            list_songs(&engine)?;
        }
        cli::Command::Picks { count } => {
            let result = engine.generate_quick_picks(count)?;
            if result.picks.is_empty() {
                println!("Not enough listening data yet. Play some music and try again.");
            } else {
                print_picks(&result.picks);
            }
        }
        cli::Command::Record {
            song_id,
            previous,
            completion,
            skipped,
            duration_ms,
        } => {
            let song = engine
                .store()
                .get_song(song_id)?
                .with_context(|| format!("No song with id {song_id} in the catalog"))?;
            let listen_ms = duration_ms.unwrap_or_else(|| {
                (completion.clamp(0.0, 1.0) * f64::from(song.duration_secs) * 1000.0) as u64
            });
            engine.record_play(song_id, previous, listen_ms, completion, skipped)?;
            println!(
                "Recorded {} of \"{}\" ({:.0}% played)",
                if skipped { "skip" } else { "play" },
                song.title,
                completion.clamp(0.0, 1.0) * 100.0
            );
        }
        cli::Command::Suggest { song_id, limit } => {
            let song = engine
                .store()
                .get_song(song_id)?
                .with_context(|| format!("No song with id {song_id} in the catalog"))?;
            let suggestions = engine.get_sequence_based_suggestions(song_id, &HashSet::new(), limit)?;
            if suggestions.is_empty() {
                println!("No suggestions yet for \"{}\".", song.title);
            } else {
                println!("After \"{}\" you might like:", song.title);
                for (i, s) in suggestions.iter().enumerate() {
                    println!("  {}. {} - {}", i + 1, s.artist, s.title);
                }
            }
        }
        cli::Command::Train => {
            info!("Starting model training");
            let handle = engine.train_models()?;
            let stored = handle.wait();
            println!("Trained feature vectors for {stored} songs");
        }
        cli::Command::Clear => {
            engine.clear_model_data()?;
            println!("Cleared all learned model data. Catalog and history are kept.");
        }
        cli::Command::Prune => {
            let removed = engine.prune_old_events()?;
            println!("Pruned {removed} old listening events");
        }
        cli::Command::Completion { .. } => unreachable!("handled before engine bootstrap"),
    }

    engine.shutdown();
    Ok(())
}

/// Prints every catalogued song with its preference statistics.
fn list_songs(engine: &RecommendationEngine) -> Result<()> {
    let store = engine.store();
    let mut songs = store.get_all_songs()?;
    if songs.is_empty() {
        println!("Catalog is empty. Import songs with: encore import <file.json>");
        return Ok(());
    }

    songs.sort_by(|a, b| {
        a.artist
            .cmp(&b.artist)
            .then_with(|| a.album.cmp(&b.album))
            .then_with(|| a.title.cmp(&b.title))
    });

    println!("{} songs in catalog:\n", songs.len());
    for song in &songs {
        match store.get_preference(song.id)? {
            Some(pref) => println!(
                "  [{:>5}] {} - {} ({})  plays {}, skips {}, like {:.0}",
                song.id,
                song.artist,
                song.title,
                song.genre,
                pref.play_count,
                pref.skip_count,
                pref.like_score
            ),
            None => println!(
                "  [{:>5}] {} - {} ({})  never played",
                song.id, song.artist, song.title, song.genre
            ),
        }
    }
    Ok(())
}

/// Prints the ranked Quick Picks list.
fn print_picks(picks: &[RankedPick]) {
    println!("Quick Picks:\n");
    for (i, pick) in picks.iter().enumerate() {
        println!(
            "  {:>2}. {} - {}  (score {:.1}, confidence {:.0}%)",
            i + 1,
            pick.song.artist,
            pick.song.title,
            pick.score,
            pick.confidence
        );
        println!("      {}", pick.reason);
    }
}
