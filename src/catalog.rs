//! Catalog and listening-history store.
//!
//! Defines the immutable data model (songs, listening events, preference
//! aggregates, transition edges) and the [`CatalogStore`] contract the rest
//! of the pipeline consumes. The durable engine behind that contract is
//! SQLite via [`SqliteStore`]; components never touch the database directly.
//!
//! Listening events are append-only and pruned after a retention window.
//! Preference aggregates are updated in the same transaction as the event
//! insert, so a `record_play` is immediately visible to the next feature
//! extraction in the session.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable catalog record for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub duration_secs: u32,
}

/// One append-only playback observation, created per stop or skip.
#[derive(Debug, Clone, PartialEq)]
pub struct ListeningEvent {
    pub song_id: i64,
    /// Unix seconds.
    pub timestamp: i64,
    pub listen_duration_ms: u64,
    /// Fraction of the track actually played, in `[0, 1]`.
    pub completion_rate: f64,
    pub skipped: bool,
    /// UTC hour derived from `timestamp` at record time.
    pub hour_of_day: u8,
    /// UTC weekday (0 = Sunday) derived from `timestamp` at record time.
    pub day_of_week: u8,
}

/// Per-song rollup maintained transactionally alongside event inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceAggregate {
    pub song_id: i64,
    pub play_count: u32,
    pub skip_count: u32,
    /// Running mean over all events for this song.
    pub avg_completion_rate: f64,
    pub last_played_at: i64,
    /// Derived score in `[0, 100]`, see [`like_score`].
    pub like_score: f64,
}

/// Weighted edge of the sequential-listening graph, keyed by `(from, to)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEdge {
    pub from_song_id: i64,
    pub to_song_id: i64,
    pub weight: f64,
    pub play_count: u32,
    pub skip_count: u32,
    pub last_occurred: i64,
    pub avg_completion_rate: f64,
}

impl TransitionEdge {
    /// Fresh edge with the documented starting weight of 1.0.
    #[must_use]
    pub fn new(from_song_id: i64, to_song_id: i64, now: i64) -> Self {
        Self {
            from_song_id,
            to_song_id,
            weight: 1.0,
            play_count: 0,
            skip_count: 0,
            last_occurred: now,
            avg_completion_rate: 0.0,
        }
    }
}

/// Computes the like score from the aggregate counters.
///
/// `clamp(play_score − skip_penalty + completion_score, 0, 100)` where
/// `play_score = min(play_count/10, 1) * 40`,
/// `skip_penalty = (skip_count / max(play_count, 1)) * 30`,
/// `completion_score = avg_completion_rate * 30`.
#[must_use]
pub fn like_score(play_count: u32, skip_count: u32, avg_completion_rate: f64) -> f64 {
    let play_score = (f64::from(play_count) / 10.0).min(1.0) * 40.0;
    let skip_penalty = f64::from(skip_count) / f64::from(play_count.max(1)) * 30.0;
    let completion_score = avg_completion_rate * 30.0;

    (play_score - skip_penalty + completion_score).clamp(0.0, 100.0)
}

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// UTC hour of day for a unix timestamp.
#[must_use]
pub fn hour_of_day(timestamp: i64) -> u8 {
    (timestamp.div_euclid(3600).rem_euclid(24)) as u8
}

/// UTC weekday for a unix timestamp, 0 = Sunday. The unix epoch fell on a
/// Thursday, hence the offset of 4.
#[must_use]
pub fn day_of_week(timestamp: i64) -> u8 {
    ((timestamp.div_euclid(86400) + 4).rem_euclid(7)) as u8
}

/// Read/write contract of the catalog & history store.
///
/// The recommendation core consumes this trait only; storage failures on the
/// write paths are surfaced as `Err` so callers can decide to log-and-swallow
/// per the degrade policy.
pub trait CatalogStore: Send + Sync {
    /// Full catalog read.
    fn get_all_songs(&self) -> Result<Vec<Song>>;

    /// Single-song lookup.
    fn get_song(&self, song_id: i64) -> Result<Option<Song>>;

    /// Adds catalog records (used by import; ingestion itself is external).
    fn insert_songs(&self, songs: &[Song]) -> Result<()>;

    /// Appends a listening event and updates the song's preference aggregate
    /// in one transaction.
    fn record_play(
        &self,
        song_id: i64,
        listen_duration_ms: u64,
        completion_rate: f64,
        skipped: bool,
    ) -> Result<()>;

    /// Most recent listening events, newest first.
    fn get_recent_history(&self, limit: usize) -> Result<Vec<ListeningEvent>>;

    /// Highest like-score aggregates.
    fn get_top_preferences(&self, limit: usize) -> Result<Vec<PreferenceAggregate>>;

    /// Aggregate for one song, if any events exist.
    fn get_preference(&self, song_id: i64) -> Result<Option<PreferenceAggregate>>;

    /// Inserts or replaces one transition edge.
    fn upsert_transition(&self, edge: &TransitionEdge) -> Result<()>;

    /// All persisted transition edges.
    fn load_transitions(&self) -> Result<Vec<TransitionEdge>>;

    /// Deletes every persisted transition edge.
    fn clear_transitions(&self) -> Result<()>;

    /// Deletes events older than the cutoff; returns how many were removed.
    fn prune_events_before(&self, cutoff: i64) -> Result<usize>;
}

/// SQLite-backed [`CatalogStore`].
///
/// A single connection guarded by a mutex; write paths use transactions and
/// prepared statements.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the store at `path` and ensures the schema exists.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests and as a last-resort fallback.
    ///
    /// # Errors
    ///
    /// Fails if SQLite cannot allocate an in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                id            INTEGER PRIMARY KEY,
                title         TEXT NOT NULL,
                artist        TEXT NOT NULL,
                album         TEXT NOT NULL,
                genre         TEXT NOT NULL,
                duration_secs INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id                 INTEGER PRIMARY KEY,
                song_id            INTEGER NOT NULL REFERENCES songs(id),
                timestamp          INTEGER NOT NULL,
                listen_duration_ms INTEGER NOT NULL,
                completion_rate    REAL NOT NULL,
                skipped            INTEGER NOT NULL,
                hour_of_day        INTEGER NOT NULL,
                day_of_week        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_song ON events(song_id);
            CREATE TABLE IF NOT EXISTS preferences (
                song_id             INTEGER PRIMARY KEY REFERENCES songs(id),
                play_count          INTEGER NOT NULL,
                skip_count          INTEGER NOT NULL,
                avg_completion_rate REAL NOT NULL,
                last_played_at      INTEGER NOT NULL,
                like_score          REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transitions (
                from_song_id        INTEGER NOT NULL,
                to_song_id          INTEGER NOT NULL,
                weight              REAL NOT NULL,
                play_count          INTEGER NOT NULL,
                skip_count          INTEGER NOT NULL,
                last_occurred       INTEGER NOT NULL,
                avg_completion_rate REAL NOT NULL,
                PRIMARY KEY (from_song_id, to_song_id)
            );",
        )
        .context("Failed to create catalog schema")?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; the connection itself
        // is still usable for subsequent statements.
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn song_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        genre: row.get(4)?,
        duration_secs: row.get(5)?,
    })
}

fn preference_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PreferenceAggregate> {
    Ok(PreferenceAggregate {
        song_id: row.get(0)?,
        play_count: row.get(1)?,
        skip_count: row.get(2)?,
        avg_completion_rate: row.get(3)?,
        last_played_at: row.get(4)?,
        like_score: row.get(5)?,
    })
}

impl CatalogStore for SqliteStore {
    fn get_all_songs(&self) -> Result<Vec<Song>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, title, artist, album, genre, duration_secs FROM songs")
            .context("Invalid SQL selecting songs")?;

        let rows = stmt
            .query_map([], song_from_row)
            .context("Cannot query songs")?;

        let mut songs = Vec::new();
        for song in rows {
            songs.push(song.context("Queried song row failed to decode")?);
        }
        Ok(songs)
    }

    fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, title, artist, album, genre, duration_secs FROM songs WHERE id = ?1",
            [song_id],
            song_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to query song {song_id}"))
    }

    fn insert_songs(&self, songs: &[Song]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO songs (id, title, artist, album, genre, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for song in songs {
                stmt.execute(params![
                    song.id,
                    song.title,
                    song.artist,
                    song.album,
                    song.genre,
                    song.duration_secs,
                ])
                .with_context(|| format!("Failed to insert song: {song:?}"))?;
            }
        }
        tx.commit().context("Committing song insert failed")?;
        Ok(())
    }

    fn record_play(
        &self,
        song_id: i64,
        listen_duration_ms: u64,
        completion_rate: f64,
        skipped: bool,
    ) -> Result<()> {
        let completion_rate = completion_rate.clamp(0.0, 1.0);
        let now = now_unix();

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO events
                (song_id, timestamp, listen_duration_ms, completion_rate, skipped, hour_of_day, day_of_week)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                song_id,
                now,
                listen_duration_ms as i64,
                completion_rate,
                skipped,
                hour_of_day(now),
                day_of_week(now),
            ],
        )
        .with_context(|| format!("Failed to insert listening event for song {song_id}"))?;

        let existing: Option<(u32, u32, f64)> = tx
            .query_row(
                "SELECT play_count, skip_count, avg_completion_rate FROM preferences WHERE song_id = ?1",
                [song_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (play_count, skip_count, prev_avg) = existing.unwrap_or((0, 0, 0.0));
        let play_count = play_count + 1;
        let skip_count = skip_count + u32::from(skipped);
        // Running mean over all events, including skipped ones.
        let avg = prev_avg + (completion_rate - prev_avg) / f64::from(play_count);
        let score = like_score(play_count, skip_count, avg);

        tx.execute(
            "INSERT OR REPLACE INTO preferences
                (song_id, play_count, skip_count, avg_completion_rate, last_played_at, like_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![song_id, play_count, skip_count, avg, now, score],
        )
        .with_context(|| format!("Failed to update preference aggregate for song {song_id}"))?;

        tx.commit().context("Committing play record failed")?;
        log::debug!("Recorded play for song {song_id}: completion {completion_rate:.2}, skipped {skipped}");
        Ok(())
    }

    fn get_recent_history(&self, limit: usize) -> Result<Vec<ListeningEvent>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT song_id, timestamp, listen_duration_ms, completion_rate, skipped, hour_of_day, day_of_week
                 FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .context("Invalid SQL selecting recent history")?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(ListeningEvent {
                    song_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    listen_duration_ms: row.get::<_, i64>(2)? as u64,
                    completion_rate: row.get(3)?,
                    skipped: row.get(4)?,
                    hour_of_day: row.get(5)?,
                    day_of_week: row.get(6)?,
                })
            })
            .context("Cannot query recent history")?;

        let mut events = Vec::new();
        for event in rows {
            events.push(event.context("Queried event row failed to decode")?);
        }
        Ok(events)
    }

    fn get_top_preferences(&self, limit: usize) -> Result<Vec<PreferenceAggregate>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT song_id, play_count, skip_count, avg_completion_rate, last_played_at, like_score
                 FROM preferences ORDER BY like_score DESC LIMIT ?1",
            )
            .context("Invalid SQL selecting top preferences")?;

        let rows = stmt
            .query_map([limit as i64], preference_from_row)
            .context("Cannot query preferences")?;

        let mut prefs = Vec::new();
        for pref in rows {
            prefs.push(pref.context("Queried preference row failed to decode")?);
        }
        Ok(prefs)
    }

    fn get_preference(&self, song_id: i64) -> Result<Option<PreferenceAggregate>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT song_id, play_count, skip_count, avg_completion_rate, last_played_at, like_score
             FROM preferences WHERE song_id = ?1",
            [song_id],
            preference_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to query preference for song {song_id}"))
    }

    fn upsert_transition(&self, edge: &TransitionEdge) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO transitions
                (from_song_id, to_song_id, weight, play_count, skip_count, last_occurred, avg_completion_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                edge.from_song_id,
                edge.to_song_id,
                edge.weight,
                edge.play_count,
                edge.skip_count,
                edge.last_occurred,
                edge.avg_completion_rate,
            ],
        )
        .with_context(|| {
            format!(
                "Failed to upsert transition {} -> {}",
                edge.from_song_id, edge.to_song_id
            )
        })?;
        Ok(())
    }

    fn load_transitions(&self) -> Result<Vec<TransitionEdge>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT from_song_id, to_song_id, weight, play_count, skip_count, last_occurred, avg_completion_rate
                 FROM transitions",
            )
            .context("Invalid SQL selecting transitions")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(TransitionEdge {
                    from_song_id: row.get(0)?,
                    to_song_id: row.get(1)?,
                    weight: row.get(2)?,
                    play_count: row.get(3)?,
                    skip_count: row.get(4)?,
                    last_occurred: row.get(5)?,
                    avg_completion_rate: row.get(6)?,
                })
            })
            .context("Cannot query transitions")?;

        let mut edges = Vec::new();
        for edge in rows {
            edges.push(edge.context("Queried transition row failed to decode")?);
        }
        Ok(edges)
    }

    fn clear_transitions(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM transitions", [])
            .context("Failed to clear transitions")?;
        Ok(())
    }

    fn prune_events_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM events WHERE timestamp < ?1", [cutoff])
            .context("Failed to prune old listening events")?;
        if removed > 0 {
            log::info!("Pruned {removed} listening events older than {cutoff}");
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) fn test_song(id: i64, title: &str, artist: &str, genre: &str) -> Song {
    Song {
        id,
        title: title.to_string(),
        artist: artist.to_string(),
        album: format!("{artist} Album"),
        genre: genre.to_string(),
        duration_secs: 180,
    }
}
