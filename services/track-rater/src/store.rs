//!
//! src/store.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Durable track identity, the rating ledger and message bindings.
//! Both backends (relational in src/persistent.rs, json document in
//! src/document.rs) sit behind `RatingStore`
//!

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::document::JsonStore;
use crate::errors::RaterError;
use crate::persistent::SqliteStore;
use crate::types::{
    CanonicalTrack, NewTrack, Rating, RatingChange, RatingStats, TrackKey, UserRating
};

#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Idempotent create. An existing record keeps its title, artist and
    /// primary url; missing secondary and thumbnail urls are filled in
    async fn get_or_create(&self, track: &NewTrack) -> Result<CanonicalTrack, RaterError>;

    async fn get_track(&self, key: &TrackKey) -> Result<Option<CanonicalTrack>, RaterError>;

    /// Overwrites the derived fields of a track. `set_rating` and
    /// `recompute_stats` write through the same path inside their own
    /// atomic unit; called on its own this is a repair entry point
    async fn update_stats(&self, key: &TrackKey, stats: RatingStats) ->
        Result<CanonicalTrack, RaterError>;

    /// Inserts or replaces the user's rating and refreshes the track's
    /// statistics in the same atomic unit
    async fn set_rating(&self, key: &TrackKey, user_id: &str, value: i64) ->
        Result<RatingChange, RaterError>;

    async fn list_ratings(&self, key: &TrackKey) -> Result<Vec<Rating>, RaterError>;

    /// Re-aggregates a track from its ledger
    async fn recompute_stats(&self, key: &TrackKey) -> Result<CanonicalTrack, RaterError>;

    /// Rated tracks, best average first, then most ratings, then title
    async fn top_tracks(&self, limit: u32) -> Result<Vec<CanonicalTrack>, RaterError>;

    /// A user's ratings, most recent first
    async fn user_ratings(&self, user_id: &str) -> Result<Vec<UserRating>, RaterError>;

    /// Binding an already bound message leaves the first binding in place
    async fn bind_message(&self, channel_id: &str, message_id: &str, key: &TrackKey) ->
        Result<(), RaterError>;

    async fn track_for_message(&self, channel_id: &str, message_id: &str) ->
        Result<Option<TrackKey>, RaterError>;

    /// Returns whether a binding existed
    async fn unbind_message(&self, channel_id: &str, message_id: &str) ->
        Result<bool, RaterError>;
}

pub async fn open_store(cfg: &StoreConfig) -> Result<Arc<dyn RatingStore>, RaterError> {
    let store: Arc<dyn RatingStore> = match cfg.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::init(&cfg.db_url, cfg.max_connections).await?),
        StoreBackend::Json => Arc::new(JsonStore::open(&cfg.json_path).await?)
    };
    info!(backend = ?cfg.backend, "store.open");
    Ok(store)
}

/// Millisecond precision keeps "most recent first" meaningful for
/// ratings written within the same second
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Leaderboard order shared by both backends
pub(crate) fn leaderboard_order(a: &CanonicalTrack, b: &CanonicalTrack) -> std::cmp::Ordering {
    b.average.total_cmp(&a.average)
        .then(b.count.cmp(&a.count))
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend has to show, run from each backend's tests

    use super::*;
    use std::time::Duration;

    use rand::{Rng, SeedableRng, rngs::SmallRng};

    pub fn new_track(id: &str, title: &str) -> NewTrack {
        let primary_url = format!("https://open.spotify.com/track/{id}");
        NewTrack {
            key: TrackKey::derive(&primary_url),
            title: title.into(),
            artist: "Ed Sheeran".into(),
            primary_url,
            secondary_url: None,
            thumbnail_url: None
        }
    }

    pub async fn create_is_idempotent_and_backfills(store: &dyn RatingStore) {
        let first = new_track("7qiZfU4dY1lWllzX7mPBI3", "Shape of You");
        let created = store.get_or_create(&first).await.unwrap();
        assert_eq!(created.average, 0.0);
        assert_eq!(created.count, 0);
        assert!(created.secondary_url.is_none());

        let mut second = first.clone();
        second.title = "Shape of You (different casing)".into();
        second.secondary_url = Some("https://music.apple.com/us/song/1193701392".into());
        let again = store.get_or_create(&second).await.unwrap();
        assert_eq!(again.key, created.key);
        assert_eq!(again.title, "Shape of You");
        assert_eq!(again.secondary_url.as_deref(), Some("https://music.apple.com/us/song/1193701392"));

        let mut third = first.clone();
        third.secondary_url = Some("https://music.apple.com/other".into());
        let kept = store.get_or_create(&third).await.unwrap();
        assert_eq!(kept.secondary_url.as_deref(), Some("https://music.apple.com/us/song/1193701392"));
    }

    pub async fn ratings_upsert_and_aggregate(store: &dyn RatingStore) {
        let track = store.get_or_create(&new_track("0VjIjW4GlUZAMYd2vXMi3b", "Blinding Lights"))
            .await.unwrap();

        let a = store.set_rating(&track.key, "A", 4).await.unwrap();
        assert_eq!(a.previous, None);
        let b = store.set_rating(&track.key, "B", 2).await.unwrap();
        assert_eq!(b.track.average, 3.0);
        assert_eq!(b.track.count, 2);

        let changed = store.set_rating(&track.key, "A", 5).await.unwrap();
        assert_eq!(changed.previous, Some(4));
        assert_eq!(changed.value, 5);
        assert_eq!(changed.track.average, 3.5);
        assert_eq!(changed.track.count, 2);

        let ledger = store.list_ratings(&track.key).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(store.get_track(&track.key).await.unwrap().unwrap().average, 3.5);
    }

    pub async fn invalid_values_write_nothing(store: &dyn RatingStore) {
        let track = store.get_or_create(&new_track("3T4tUhGYeRNVUGevb0wThu", "Perfect"))
            .await.unwrap();
        for value in [0, 11, -1] {
            let err = store.set_rating(&track.key, "A", value).await.unwrap_err();
            assert!(matches!(err, RaterError::InvalidRating { .. }));
        }
        assert!(store.list_ratings(&track.key).await.unwrap().is_empty());
        assert_eq!(store.get_track(&track.key).await.unwrap().unwrap().count, 0);
    }

    pub async fn unknown_tracks_are_rejected(store: &dyn RatingStore) {
        let key = TrackKey::derive("https://open.spotify.com/track/doesnotexist000000000");
        let err = store.set_rating(&key, "A", 5).await.unwrap_err();
        assert!(matches!(err, RaterError::UnknownTrack(_)));
        assert!(store.get_track(&key).await.unwrap().is_none());
        assert!(store.list_ratings(&key).await.unwrap().is_empty());
    }

    pub async fn leaderboard_and_history(store: &dyn RatingStore) {
        let low = store.get_or_create(&new_track("aaaaaaaaaaaaaaaaaaaaaa", "Low")).await.unwrap();
        let high = store.get_or_create(&new_track("bbbbbbbbbbbbbbbbbbbbbb", "High")).await.unwrap();
        let busy = store.get_or_create(&new_track("cccccccccccccccccccccc", "Busy")).await.unwrap();
        store.get_or_create(&new_track("dddddddddddddddddddddd", "Unrated")).await.unwrap();

        store.set_rating(&low.key, "u1", 3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set_rating(&high.key, "u1", 9).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set_rating(&busy.key, "u1", 10).await.unwrap();
        store.set_rating(&busy.key, "u2", 8).await.unwrap();

        let top = store.top_tracks(10).await.unwrap();
        let titles: Vec<&str> = top.iter().map(|t| t.title.as_str()).collect();
        // Busy and High tie on 9.0, Busy has more ratings
        assert_eq!(titles, vec!["Busy", "High", "Low"]);
        assert_eq!(store.top_tracks(1).await.unwrap().len(), 1);

        let history = store.user_ratings("u1").await.unwrap();
        let titles: Vec<&str> = history.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Busy", "High", "Low"]);
        assert!(store.user_ratings("nobody").await.unwrap().is_empty());
    }

    pub async fn stats_can_be_recomputed(store: &dyn RatingStore) {
        let track = store.get_or_create(&new_track("eeeeeeeeeeeeeeeeeeeeee", "Drifted")).await.unwrap();
        store.set_rating(&track.key, "A", 6).await.unwrap();
        store.set_rating(&track.key, "B", 8).await.unwrap();

        let drifted = store.update_stats(&track.key, RatingStats { average: 1.0, count: 40 })
            .await.unwrap();
        assert_eq!(drifted.count, 40);

        let repaired = store.recompute_stats(&track.key).await.unwrap();
        assert_eq!(repaired.average, 7.0);
        assert_eq!(repaired.count, 2);

        let missing = TrackKey::derive("https://open.spotify.com/track/ffffffffffffffffffffff");
        assert!(matches!(store.recompute_stats(&missing).await, Err(RaterError::UnknownTrack(_))));
    }

    pub async fn stats_writes_share_one_path(store: &dyn RatingStore) {
        let track = store.get_or_create(&new_track("iiiiiiiiiiiiiiiiiiiiii", "Shared")).await.unwrap();
        store.set_rating(&track.key, "A", 4).await.unwrap();
        let rated = store.set_rating(&track.key, "B", 5).await.unwrap().track;

        let stats = crate::aggregate::aggregate(&store.list_ratings(&track.key).await.unwrap());
        let written = store.update_stats(&track.key, stats).await.unwrap();
        assert_eq!((written.average, written.count), (rated.average, rated.count));
        assert_eq!(written.average, 4.5);

        let missing = TrackKey::derive("https://open.spotify.com/track/nowhere00000000000000");
        let err = store.update_stats(&missing, stats).await.unwrap_err();
        assert!(matches!(err, RaterError::UnknownTrack(_)));
        assert!(store.get_track(&missing).await.unwrap().is_none());
    }

    pub async fn messages_bind_once(store: &dyn RatingStore) {
        let a = store.get_or_create(&new_track("gggggggggggggggggggggg", "First")).await.unwrap();
        let b = store.get_or_create(&new_track("hhhhhhhhhhhhhhhhhhhhhh", "Second")).await.unwrap();

        assert!(store.track_for_message("c1", "m1").await.unwrap().is_none());
        store.bind_message("c1", "m1", &a.key).await.unwrap();
        store.bind_message("c1", "m1", &b.key).await.unwrap();
        assert_eq!(store.track_for_message("c1", "m1").await.unwrap(), Some(a.key.clone()));
        assert!(store.track_for_message("c2", "m1").await.unwrap().is_none());

        assert!(store.unbind_message("c1", "m1").await.unwrap());
        assert!(!store.unbind_message("c1", "m1").await.unwrap());
        assert!(store.track_for_message("c1", "m1").await.unwrap().is_none());
        // the track outlives its message
        assert!(store.get_track(&a.key).await.unwrap().is_some());
    }

    pub async fn concurrent_ratings_are_all_counted(store: Arc<dyn RatingStore>) {
        let track = store.get_or_create(&new_track("iiiiiiiiiiiiiiiiiiiiii", "Crowded")).await.unwrap();

        let mut rng = SmallRng::seed_from_u64(7);
        let values: Vec<i64> = (0..24).map(|_| rng.gen_range(1..=10)).collect();

        let mut handles = Vec::new();
        for (i, value) in values.iter().copied().enumerate() {
            let store = store.clone();
            let key = track.key.clone();
            let pause = Duration::from_millis(rng.gen_range(0..5));
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(pause).await;
                store.set_rating(&key, &format!("user-{i}"), value).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let expected = values.iter().sum::<i64>() as f64 / values.len() as f64;
        let stored = store.get_track(&track.key).await.unwrap().unwrap();
        assert_eq!(stored.count, 24);
        assert!((stored.average - expected).abs() < 1e-9);
        assert_eq!(store.list_ratings(&track.key).await.unwrap().len(), 24);
    }
}
