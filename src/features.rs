//! Feature extraction for song scoring.
//!
//! Turns listening history, preference aggregates and the current time into
//! a fixed 9-dimensional [`FeatureVector`] per song. Extraction is pure and
//! deterministic: the same inputs always produce the same vector, and songs
//! without any history get the documented neutral prior instead of an error.
//!
//! Batch-wide inputs (affinity tallies, the recent-history tail, "now") are
//! precomputed once into an [`ExtractionContext`] so per-song extraction
//! stays O(events-for-song).

use crate::catalog::{ListeningEvent, PreferenceAggregate, Song};
use std::collections::HashMap;

/// Dimensionality of the feature space.
pub const FEATURE_DIM: usize = 9;

/// Half-life of the recency decay, in seconds (one week).
const RECENCY_HALF_LIFE_SECS: f64 = 7.0 * 86_400.0;

/// A play within this window counts as "same session".
const SESSION_WINDOW_SECS: i64 = 30 * 60;

/// Streak cap for the consecutive-plays feature.
const MAX_STREAK: u32 = 5;

/// Fixed-dimension description of one song's standing with the user.
///
/// All dimensions are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    /// Play volume, saturating at 20 plays.
    pub play_frequency: f64,
    /// Running mean completion rate.
    pub avg_completion_rate: f64,
    /// Skips per play.
    pub skip_rate: f64,
    /// Exponential decay since the last play, 1-week half-life.
    pub recency_score: f64,
    /// How well the current hour matches this song's play-hour histogram.
    pub time_of_day_match: f64,
    /// Share of recent listening in this song's genre.
    pub genre_affinity: f64,
    /// Share of recent listening by this song's artist.
    pub artist_affinity: f64,
    /// Repeat streak at the tail of history, capped at 5 and normalized.
    pub consecutive_plays: f64,
    /// 0.8 if played in the last 30 minutes, else 0.3.
    pub session_context: f64,
}

impl FeatureVector {
    /// Neutral prior for songs with no history: unknown-but-not-disliked.
    pub const NEUTRAL: Self = Self {
        play_frequency: 0.0,
        avg_completion_rate: 0.5,
        skip_rate: 0.0,
        recency_score: 0.0,
        time_of_day_match: 0.5,
        genre_affinity: 0.5,
        artist_affinity: 0.5,
        consecutive_plays: 0.0,
        session_context: 0.3,
    };

    /// The vector as a plain array, in declaration order.
    #[must_use]
    pub fn as_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.play_frequency,
            self.avg_completion_rate,
            self.skip_rate,
            self.recency_score,
            self.time_of_day_match,
            self.genre_affinity,
            self.artist_affinity,
            self.consecutive_plays,
            self.session_context,
        ]
    }
}

/// Batch-wide extraction inputs, built once per candidate batch.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    /// Unix seconds the batch is evaluated at.
    pub now: i64,
    /// UTC hour corresponding to `now`.
    pub now_hour: u8,
    genre_share: HashMap<String, f64>,
    artist_share: HashMap<String, f64>,
    /// Song ids of recent plays, newest first.
    recent_tail: Vec<i64>,
    last_play_by_song: HashMap<i64, i64>,
}

impl ExtractionContext {
    /// Builds the context from recent history (newest first) and the catalog.
    #[must_use]
    pub fn build(history: &[ListeningEvent], catalog: &[Song], now: i64) -> Self {
        let by_id: HashMap<i64, &Song> = catalog.iter().map(|s| (s.id, s)).collect();

        let mut genre_counts: HashMap<String, u32> = HashMap::new();
        let mut artist_counts: HashMap<String, u32> = HashMap::new();
        let mut last_play_by_song: HashMap<i64, i64> = HashMap::new();
        let mut counted = 0u32;

        for event in history {
            last_play_by_song
                .entry(event.song_id)
                .and_modify(|t| *t = (*t).max(event.timestamp))
                .or_insert(event.timestamp);
            // Skipped plays say little about taste; affinity counts full plays.
            if event.skipped {
                continue;
            }
            if let Some(song) = by_id.get(&event.song_id) {
                *genre_counts.entry(song.genre.clone()).or_insert(0) += 1;
                *artist_counts.entry(song.artist.clone()).or_insert(0) += 1;
                counted += 1;
            }
        }

        let share = |counts: HashMap<String, u32>| -> HashMap<String, f64> {
            counts
                .into_iter()
                .map(|(k, v)| (k, f64::from(v) / f64::from(counted.max(1))))
                .collect()
        };

        Self {
            now,
            now_hour: crate::catalog::hour_of_day(now),
            genre_share: share(genre_counts),
            artist_share: share(artist_counts),
            recent_tail: history.iter().map(|e| e.song_id).collect(),
            last_play_by_song,
        }
    }

    fn genre_affinity(&self, genre: &str) -> f64 {
        self.genre_share.get(genre).copied().unwrap_or(0.0)
    }

    fn artist_affinity(&self, artist: &str) -> f64 {
        self.artist_share.get(artist).copied().unwrap_or(0.0)
    }

    fn streak_for(&self, song_id: i64) -> u32 {
        self.recent_tail
            .iter()
            .take_while(|id| **id == song_id)
            .count()
            .min(MAX_STREAK as usize) as u32
    }
}

/// Circular distance between two hours of day.
fn hour_distance(a: u8, b: u8) -> u8 {
    let diff = (i16::from(a) - i16::from(b)).unsigned_abs() as u8 % 24;
    diff.min(24 - diff)
}

/// Extracts the feature vector for one song.
///
/// `events` must contain only this song's listening events. Returns
/// [`FeatureVector::NEUTRAL`] when no history exists for the song.
#[must_use]
pub fn extract(
    song: &Song,
    events: &[ListeningEvent],
    pref: Option<&PreferenceAggregate>,
    ctx: &ExtractionContext,
) -> FeatureVector {
    let Some(pref) = pref else {
        if events.is_empty() {
            return FeatureVector::NEUTRAL;
        }
        // Events without an aggregate should not happen (both are written in
        // one transaction), but degrade to the prior rather than guessing.
        return FeatureVector::NEUTRAL;
    };

    let play_frequency = (f64::from(pref.play_count) / 20.0).min(1.0);
    let skip_rate = f64::from(pref.skip_count) / f64::from(pref.play_count.max(1));

    let age_secs = (ctx.now - pref.last_played_at).max(0) as f64;
    let recency_score = 0.5_f64.powf(age_secs / RECENCY_HALF_LIFE_SECS);

    let time_of_day_match = if events.is_empty() {
        0.5
    } else {
        let near = events
            .iter()
            .filter(|e| hour_distance(e.hour_of_day, ctx.now_hour) <= 2)
            .count();
        near as f64 / events.len() as f64
    };

    let consecutive_plays = f64::from(ctx.streak_for(song.id)) / f64::from(MAX_STREAK);

    let session_context = match ctx.last_play_by_song.get(&song.id) {
        Some(&t) if ctx.now - t <= SESSION_WINDOW_SECS => 0.8,
        _ => 0.3,
    };

    FeatureVector {
        play_frequency,
        avg_completion_rate: pref.avg_completion_rate.clamp(0.0, 1.0),
        skip_rate: skip_rate.min(1.0),
        recency_score,
        time_of_day_match,
        genre_affinity: ctx.genre_affinity(&song.genre),
        artist_affinity: ctx.artist_affinity(&song.artist),
        consecutive_plays,
        session_context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_song;

    fn event(song_id: i64, timestamp: i64, completion: f64, skipped: bool) -> ListeningEvent {
        ListeningEvent {
            song_id,
            timestamp,
            listen_duration_ms: 60_000,
            completion_rate: completion,
            skipped,
            hour_of_day: crate::catalog::hour_of_day(timestamp),
            day_of_week: crate::catalog::day_of_week(timestamp),
        }
    }

    fn pref(song_id: i64, plays: u32, skips: u32, avg: f64, last: i64) -> PreferenceAggregate {
        PreferenceAggregate {
            song_id,
            play_count: plays,
            skip_count: skips,
            avg_completion_rate: avg,
            last_played_at: last,
            like_score: crate::catalog::like_score(plays, skips, avg),
        }
    }

    #[test]
    fn test_unseen_song_gets_exact_neutral_prior() {
        let song = test_song(1, "New", "Nobody", "Ambient");
        let ctx = ExtractionContext::build(&[], &[song.clone()], 1_000_000);

        let vector = extract(&song, &[], None, &ctx);
        assert_eq!(vector, FeatureVector::NEUTRAL);
        assert_eq!(
            vector.as_array(),
            [0.0, 0.5, 0.0, 0.0, 0.5, 0.5, 0.5, 0.0, 0.3]
        );
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let song = test_song(1, "Track", "Artist", "Rock");
        let now = 2_000_000;
        let events = vec![event(1, now - 600, 0.9, false)];
        let ctx = ExtractionContext::build(&events, std::slice::from_ref(&song), now);
        let p = pref(1, 4, 1, 0.8, now - 600);

        let a = extract(&song, &events, Some(&p), &ctx);
        let b = extract(&song, &events, Some(&p), &ctx);
        assert_eq!(a, b);
    }

    #[test]
    fn test_recency_half_life_is_one_week() {
        let song = test_song(1, "Track", "Artist", "Rock");
        let now = 10_000_000;
        let ctx = ExtractionContext::build(&[], std::slice::from_ref(&song), now);

        let week_ago = pref(1, 5, 0, 0.9, now - 7 * 86_400);
        let vector = extract(&song, &[], Some(&week_ago), &ctx);
        assert!((vector.recency_score - 0.5).abs() < 1e-9);

        let just_now = pref(1, 5, 0, 0.9, now);
        let vector = extract(&song, &[], Some(&just_now), &ctx);
        assert!((vector.recency_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_context_window() {
        let song = test_song(1, "Track", "Artist", "Rock");
        let now = 5_000_000;

        let recent = vec![event(1, now - 60, 1.0, false)];
        let ctx = ExtractionContext::build(&recent, std::slice::from_ref(&song), now);
        let p = pref(1, 1, 0, 1.0, now - 60);
        assert!((extract(&song, &recent, Some(&p), &ctx).session_context - 0.8).abs() < 1e-9);

        let stale = vec![event(1, now - 3600, 1.0, false)];
        let ctx = ExtractionContext::build(&stale, std::slice::from_ref(&song), now);
        let p = pref(1, 1, 0, 1.0, now - 3600);
        assert!((extract(&song, &stale, Some(&p), &ctx).session_context - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_consecutive_plays_capped_at_five() {
        let song = test_song(1, "Loop", "Artist", "Rock");
        let now = 5_000_000;
        let events: Vec<_> = (0..8).map(|i| event(1, now - i * 120, 1.0, false)).collect();
        let ctx = ExtractionContext::build(&events, std::slice::from_ref(&song), now);
        let p = pref(1, 8, 0, 1.0, now);

        let vector = extract(&song, &events, Some(&p), &ctx);
        assert!((vector.consecutive_plays - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_affinities_reflect_recent_listening() {
        let rock = test_song(1, "R", "Band X", "Rock");
        let jazz = test_song(2, "J", "Band Y", "Jazz");
        let catalog = vec![rock.clone(), jazz.clone()];
        let now = 5_000_000;

        // Three rock plays, one jazz play, one skipped jazz (ignored).
        let events = vec![
            event(1, now - 100, 1.0, false),
            event(1, now - 200, 1.0, false),
            event(1, now - 300, 1.0, false),
            event(2, now - 400, 1.0, false),
            event(2, now - 500, 0.1, true),
        ];
        let ctx = ExtractionContext::build(&events, &catalog, now);
        let p = pref(1, 3, 0, 1.0, now - 100);

        let vector = extract(&rock, &events[..3], Some(&p), &ctx);
        assert!((vector.genre_affinity - 0.75).abs() < 1e-9);
        assert!((vector.artist_affinity - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_hour_distance_wraps_midnight() {
        assert_eq!(hour_distance(23, 1), 2);
        assert_eq!(hour_distance(0, 12), 12);
        assert_eq!(hour_distance(5, 5), 0);
    }
}
