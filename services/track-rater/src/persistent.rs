//!
//! src/persistent.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Relational backend of the rating store: tracks, the rating ledger
//! and message bindings in one sqlite database
//!

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{
    Pool, Row, Sqlite, SqliteConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous}
};
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::config::RATING_SCALE;
use crate::errors::RaterError;
use crate::store::{RatingStore, from_millis, now_millis};
use crate::types::{
    CanonicalTrack, NewTrack, Rating, RatingChange, RatingStats, TrackKey, UserRating
};

const TRACK_COLUMNS: &str = "track_key, title, artist, primary_url, secondary_url, \
    thumbnail_url, average, rating_count, created_at, updated_at";

pub struct SqliteStore {
    pool: Pool<Sqlite>
}

fn track_from_row(r: &SqliteRow) -> CanonicalTrack {
    CanonicalTrack {
        key: TrackKey(r.get("track_key")),
        title: r.get("title"),
        artist: r.get("artist"),
        primary_url: r.get("primary_url"),
        secondary_url: r.try_get("secondary_url").ok().flatten(),
        thumbnail_url: r.try_get("thumbnail_url").ok().flatten(),
        average: r.get("average"),
        count: r.get("rating_count"),
        created_at: from_millis(r.get("created_at")),
        updated_at: from_millis(r.get("updated_at"))
    }
}

fn rating_from_row(r: &SqliteRow) -> Rating {
    Rating {
        track_key: TrackKey(r.get("track_key")),
        user_id: r.get("user_id"),
        value: r.get::<i64, _>("value") as u8,
        rated_at: from_millis(r.get("updated_at"))
    }
}

impl SqliteStore {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), RaterError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tracks (
              track_key       TEXT PRIMARY KEY,
              title           TEXT NOT NULL,
              artist          TEXT NOT NULL,
              primary_url     TEXT NOT NULL,
              secondary_url   TEXT,
              thumbnail_url   TEXT,
              average         REAL NOT NULL DEFAULT 0,
              rating_count    INTEGER NOT NULL DEFAULT 0,
              created_at      INTEGER NOT NULL,
              updated_at      INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS ratings (
              track_key   TEXT NOT NULL,
              user_id     TEXT NOT NULL,
              value       INTEGER NOT NULL,
              created_at  INTEGER NOT NULL,
              updated_at  INTEGER NOT NULL,
              PRIMARY KEY (track_key, user_id),
              FOREIGN KEY(track_key) REFERENCES tracks(track_key) ON DELETE CASCADE
            );
            "
        ).execute(pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ratings_user ON ratings(user_id, updated_at);")
            .execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS message_bindings (
              channel_id  TEXT NOT NULL,
              message_id  TEXT NOT NULL,
              track_key   TEXT NOT NULL,
              created_at  INTEGER NOT NULL,
              PRIMARY KEY (channel_id, message_id),
              FOREIGN KEY(track_key) REFERENCES tracks(track_key) ON DELETE CASCADE
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tracks_leaderboard ON tracks(rating_count, average);"
        ).execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str, max_connections: u32) -> Result<Self, RaterError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // WAL is file only
        if !is_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal)
                       .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory { 1 } else { max_connections.max(1) })
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;
        info!(url = database_url, "store.sqlite.ready");

        Ok(Self { pool })
    }

    async fn fetch_track(conn: &mut SqliteConnection, key: &TrackKey) ->
        Result<Option<CanonicalTrack>, RaterError> {
        let row = sqlx::query(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE track_key = ?1;"))
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.as_ref().map(track_from_row))
    }

    async fn fetch_ratings(conn: &mut SqliteConnection, key: &TrackKey) ->
        Result<Vec<Rating>, RaterError> {
        let rows = sqlx::query(
            r"
            SELECT track_key, user_id, value, updated_at
              FROM ratings
             WHERE track_key = ?1
             ORDER BY created_at ASC;
            "
        )
        .bind(key.as_str())
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.iter().map(rating_from_row).collect())
    }

    async fn write_stats(conn: &mut SqliteConnection, key: &TrackKey, stats: RatingStats, now: i64) ->
        Result<u64, RaterError> {
        let updated = sqlx::query(
            "UPDATE tracks SET average = ?1, rating_count = ?2, updated_at = ?3 WHERE track_key = ?4;"
        )
        .bind(stats.average)
        .bind(stats.count)
        .bind(now)
        .bind(key.as_str())
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(updated)
    }

    /// Opens a write transaction on a track row. The first statement is a
    /// write so the database lock is taken before anything is read
    async fn lock_track(conn: &mut SqliteConnection, key: &TrackKey, now: i64) ->
        Result<(), RaterError> {
        let touched = sqlx::query("UPDATE tracks SET updated_at = ?1 WHERE track_key = ?2;")
            .bind(now)
            .bind(key.as_str())
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if touched == 0 {
            return Err(RaterError::UnknownTrack(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RatingStore for SqliteStore {
    async fn get_or_create(&self, track: &NewTrack) -> Result<CanonicalTrack, RaterError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO tracks (
                track_key, title, artist, primary_url, secondary_url,
                thumbnail_url, average, rating_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)
            ON CONFLICT(track_key) DO UPDATE SET
                secondary_url = COALESCE(tracks.secondary_url, excluded.secondary_url),
                thumbnail_url = COALESCE(tracks.thumbnail_url, excluded.thumbnail_url);
            "
        )
        .bind(track.key.as_str())
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.primary_url)
        .bind(track.secondary_url.as_ref())
        .bind(track.thumbnail_url.as_ref())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let stored = Self::fetch_track(&mut tx, &track.key).await?
            .ok_or_else(|| RaterError::StoreUnavailable(
                format!("track {} missing after upsert", track.key)
            ))?;
        tx.commit().await?;

        debug!(track_key = %track.key, touched = inserted, "store.track.upsert");
        Ok(stored)
    }

    async fn get_track(&self, key: &TrackKey) -> Result<Option<CanonicalTrack>, RaterError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_track(&mut conn, key).await
    }

    async fn update_stats(&self, key: &TrackKey, stats: RatingStats) ->
        Result<CanonicalTrack, RaterError> {
        let mut tx = self.pool.begin().await?;
        if Self::write_stats(&mut tx, key, stats, now_millis()).await? == 0 {
            return Err(RaterError::UnknownTrack(key.to_string()));
        }
        let track = Self::fetch_track(&mut tx, key).await?
            .ok_or_else(|| RaterError::UnknownTrack(key.to_string()))?;
        tx.commit().await?;
        Ok(track)
    }

    async fn set_rating(&self, key: &TrackKey, user_id: &str, value: i64) ->
        Result<RatingChange, RaterError> {
        let value = RATING_SCALE.validate(value)?;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        Self::lock_track(&mut tx, key, now).await?;

        let previous: Option<i64> = sqlx::query_scalar(
            "SELECT value FROM ratings WHERE track_key = ?1 AND user_id = ?2;"
        )
        .bind(key.as_str())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO ratings (track_key, user_id, value, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(track_key, user_id) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;
            "
        )
        .bind(key.as_str())
        .bind(user_id)
        .bind(i64::from(value))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let ratings = Self::fetch_ratings(&mut tx, key).await?;
        let stats = aggregate(&ratings);
        Self::write_stats(&mut tx, key, stats, now).await?;

        let track = Self::fetch_track(&mut tx, key).await?
            .ok_or_else(|| RaterError::UnknownTrack(key.to_string()))?;
        tx.commit().await?;

        info!(
            track_key = %key,
            user_id,
            value,
            average = stats.average,
            count = stats.count,
            "rating.stored"
        );
        Ok(RatingChange { track, previous: previous.map(|v| v as u8), value })
    }

    async fn list_ratings(&self, key: &TrackKey) -> Result<Vec<Rating>, RaterError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_ratings(&mut conn, key).await
    }

    async fn recompute_stats(&self, key: &TrackKey) -> Result<CanonicalTrack, RaterError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        Self::lock_track(&mut tx, key, now).await?;

        let stats = aggregate(&Self::fetch_ratings(&mut tx, key).await?);
        Self::write_stats(&mut tx, key, stats, now).await?;
        let track = Self::fetch_track(&mut tx, key).await?
            .ok_or_else(|| RaterError::UnknownTrack(key.to_string()))?;
        tx.commit().await?;

        info!(track_key = %key, average = stats.average, count = stats.count, "rating.recomputed");
        Ok(track)
    }

    async fn top_tracks(&self, limit: u32) -> Result<Vec<CanonicalTrack>, RaterError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {TRACK_COLUMNS}
              FROM tracks
             WHERE rating_count > 0
             ORDER BY average DESC, rating_count DESC, title COLLATE NOCASE ASC
             LIMIT ?1;
            "
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(track_from_row).collect())
    }

    async fn user_ratings(&self, user_id: &str) -> Result<Vec<UserRating>, RaterError> {
        let rows = sqlx::query(
            r"
            SELECT r.track_key, t.title, t.artist, r.value, r.updated_at
              FROM ratings r
              JOIN tracks t ON t.track_key = r.track_key
             WHERE r.user_id = ?1
             ORDER BY r.updated_at DESC, t.title COLLATE NOCASE ASC;
            "
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| UserRating {
            track_key: TrackKey(r.get("track_key")),
            title: r.get("title"),
            artist: r.get("artist"),
            value: r.get::<i64, _>("value") as u8,
            rated_at: from_millis(r.get("updated_at"))
        }).collect())
    }

    async fn bind_message(&self, channel_id: &str, message_id: &str, key: &TrackKey) ->
        Result<(), RaterError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r"
            INSERT OR IGNORE INTO message_bindings (channel_id, message_id, track_key, created_at)
            SELECT ?1, ?2, track_key, ?3 FROM tracks WHERE track_key = ?4;
            "
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(now_millis())
        .bind(key.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 && Self::fetch_track(&mut tx, key).await?.is_none() {
            return Err(RaterError::UnknownTrack(key.to_string()));
        }
        tx.commit().await?;
        debug!(channel_id, message_id, track_key = %key, inserted, "store.message.bind");
        Ok(())
    }

    async fn track_for_message(&self, channel_id: &str, message_id: &str) ->
        Result<Option<TrackKey>, RaterError> {
        let key: Option<String> = sqlx::query_scalar(
            "SELECT track_key FROM message_bindings WHERE channel_id = ?1 AND message_id = ?2;"
        )
        .bind(channel_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key.map(TrackKey))
    }

    async fn unbind_message(&self, channel_id: &str, message_id: &str) ->
        Result<bool, RaterError> {
        let removed = sqlx::query(
            "DELETE FROM message_bindings WHERE channel_id = ?1 AND message_id = ?2;"
        )
        .bind(channel_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(removed > 0)
    }
}
