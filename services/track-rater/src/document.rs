//!
//! src/document.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Single json document backend of the rating store. Every mutation
//! edits a copy of the document, writes it to a temporary file next to
//! the target and renames it into place before the copy becomes current
//!

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::config::RATING_SCALE;
use crate::errors::RaterError;
use crate::store::{RatingStore, from_millis, leaderboard_order, now_millis};
use crate::types::{
    CanonicalTrack, MessageBinding, NewTrack, Rating, RatingChange, RatingStats, TrackKey,
    UserRating
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    tracks: BTreeMap<TrackKey, CanonicalTrack>,
    // track key -> user id -> rating
    #[serde(default)]
    ratings: BTreeMap<TrackKey, BTreeMap<String, Rating>>,
    // "{channel_id}/{message_id}" -> binding
    #[serde(default)]
    messages: BTreeMap<String, MessageBinding>
}

impl Document {
    fn track_mut(&mut self, key: &TrackKey) -> Result<&mut CanonicalTrack, RaterError> {
        self.tracks.get_mut(key).ok_or_else(|| RaterError::UnknownTrack(key.to_string()))
    }

    fn ratings_of(&self, key: &TrackKey) -> Vec<Rating> {
        let mut ratings: Vec<Rating> = self.ratings.get(key)
            .map(|by_user| by_user.values().cloned().collect())
            .unwrap_or_default();
        ratings.sort_by_key(|r| r.rated_at);
        ratings
    }

    fn write_stats(&mut self, key: &TrackKey, stats: RatingStats) -> Result<CanonicalTrack, RaterError> {
        let track = self.track_mut(key)?;
        track.average = stats.average;
        track.count = stats.count;
        track.updated_at = from_millis(now_millis());
        Ok(track.clone())
    }

    fn refresh_stats(&mut self, key: &TrackKey) -> Result<CanonicalTrack, RaterError> {
        let stats = aggregate(&self.ratings_of(key));
        self.write_stats(key, stats)
    }
}

fn message_slot(channel_id: &str, message_id: &str) -> String {
    format!("{channel_id}/{message_id}")
}

/// Atomic replace of `path` with `bytes`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RaterError> {
    let parent = path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| RaterError::StoreUnavailable(
            format!("tempfile in {}: {e}", parent.display())
        ))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| RaterError::StoreUnavailable(format!("write temp document: {e}")))?;
    temp.persist(path)
        .map_err(|e| RaterError::StoreUnavailable(format!("persist {}: {e}", path.display())))?;
    Ok(())
}

pub struct JsonStore {
    path: PathBuf,
    doc: Mutex<Document>
}

impl JsonStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RaterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e|
                RaterError::StoreUnavailable(format!("create dir {}: {e}", parent.display()))
            )?;
        }

        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Document::default(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into())
        };

        info!(path = %path.display(), tracks = doc.tracks.len(), "store.json.ready");
        Ok(Self { path, doc: Mutex::new(doc) })
    }

    async fn persist(&self, doc: &Document) -> Result<(), RaterError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| RaterError::StoreUnavailable(format!("document writer: {e}")))?
    }

    /// Runs `edit` on a copy of the document and only keeps the copy once
    /// it is on disk
    async fn mutate<T>(&self, edit: impl FnOnce(&mut Document) -> Result<T, RaterError>) ->
        Result<T, RaterError> {
        let mut current = self.doc.lock().await;
        let mut next = current.clone();
        let out = edit(&mut next)?;
        self.persist(&next).await?;
        *current = next;
        Ok(out)
    }
}

#[async_trait]
impl RatingStore for JsonStore {
    async fn get_or_create(&self, track: &NewTrack) -> Result<CanonicalTrack, RaterError> {
        {
            let doc = self.doc.lock().await;
            if let Some(existing) = doc.tracks.get(&track.key) {
                let nothing_to_fill = (existing.secondary_url.is_some() || track.secondary_url.is_none())
                    && (existing.thumbnail_url.is_some() || track.thumbnail_url.is_none());
                if nothing_to_fill {
                    return Ok(existing.clone());
                }
            }
        }

        let stored = self.mutate(|doc| {
            let now = from_millis(now_millis());
            let entry = doc.tracks.entry(track.key.clone()).or_insert_with(|| CanonicalTrack {
                key: track.key.clone(),
                title: track.title.clone(),
                artist: track.artist.clone(),
                primary_url: track.primary_url.clone(),
                secondary_url: None,
                thumbnail_url: None,
                average: 0.0,
                count: 0,
                created_at: now,
                updated_at: now
            });
            if entry.secondary_url.is_none() {
                entry.secondary_url = track.secondary_url.clone();
            }
            if entry.thumbnail_url.is_none() {
                entry.thumbnail_url = track.thumbnail_url.clone();
            }
            Ok(entry.clone())
        }).await?;

        debug!(track_key = %track.key, "store.track.upsert");
        Ok(stored)
    }

    async fn get_track(&self, key: &TrackKey) -> Result<Option<CanonicalTrack>, RaterError> {
        Ok(self.doc.lock().await.tracks.get(key).cloned())
    }

    async fn update_stats(&self, key: &TrackKey, stats: RatingStats) ->
        Result<CanonicalTrack, RaterError> {
        self.mutate(|doc| doc.write_stats(key, stats)).await
    }

    async fn set_rating(&self, key: &TrackKey, user_id: &str, value: i64) ->
        Result<RatingChange, RaterError> {
        let value = RATING_SCALE.validate(value)?;

        let change = self.mutate(|doc| {
            doc.track_mut(key)?;
            let rating = Rating {
                track_key: key.clone(),
                user_id: user_id.to_string(),
                value,
                rated_at: from_millis(now_millis())
            };
            let previous = doc.ratings
                .entry(key.clone())
                .or_default()
                .insert(user_id.to_string(), rating)
                .map(|r| r.value);
            let track = doc.refresh_stats(key)?;
            Ok(RatingChange { track, previous, value })
        }).await?;

        info!(
            track_key = %key,
            user_id,
            value,
            average = change.track.average,
            count = change.track.count,
            "rating.stored"
        );
        Ok(change)
    }

    async fn list_ratings(&self, key: &TrackKey) -> Result<Vec<Rating>, RaterError> {
        Ok(self.doc.lock().await.ratings_of(key))
    }

    async fn recompute_stats(&self, key: &TrackKey) -> Result<CanonicalTrack, RaterError> {
        let track = self.mutate(|doc| doc.refresh_stats(key)).await?;
        info!(track_key = %key, average = track.average, count = track.count, "rating.recomputed");
        Ok(track)
    }

    async fn top_tracks(&self, limit: u32) -> Result<Vec<CanonicalTrack>, RaterError> {
        let doc = self.doc.lock().await;
        let mut rated: Vec<CanonicalTrack> = doc.tracks.values()
            .filter(|t| t.count > 0)
            .cloned()
            .collect();
        rated.sort_by(leaderboard_order);
        rated.truncate(limit as usize);
        Ok(rated)
    }

    async fn user_ratings(&self, user_id: &str) -> Result<Vec<UserRating>, RaterError> {
        let doc = self.doc.lock().await;
        let mut history: Vec<UserRating> = doc.ratings.iter()
            .filter_map(|(key, by_user)| {
                let rating = by_user.get(user_id)?;
                let track = doc.tracks.get(key)?;
                Some(UserRating {
                    track_key: key.clone(),
                    title: track.title.clone(),
                    artist: track.artist.clone(),
                    value: rating.value,
                    rated_at: rating.rated_at
                })
            })
            .collect();
        history.sort_by(|a, b| b.rated_at.cmp(&a.rated_at)
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase())));
        Ok(history)
    }

    async fn bind_message(&self, channel_id: &str, message_id: &str, key: &TrackKey) ->
        Result<(), RaterError> {
        let slot = message_slot(channel_id, message_id);
        {
            let doc = self.doc.lock().await;
            if !doc.tracks.contains_key(key) {
                return Err(RaterError::UnknownTrack(key.to_string()));
            }
            if doc.messages.contains_key(&slot) {
                return Ok(());
            }
        }

        self.mutate(|doc| {
            doc.track_mut(key)?;
            doc.messages.entry(slot).or_insert_with(|| MessageBinding {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                track_key: key.clone(),
                created_at: from_millis(now_millis())
            });
            Ok(())
        }).await?;
        debug!(channel_id, message_id, track_key = %key, "store.message.bind");
        Ok(())
    }

    async fn track_for_message(&self, channel_id: &str, message_id: &str) ->
        Result<Option<TrackKey>, RaterError> {
        let doc = self.doc.lock().await;
        Ok(doc.messages.get(&message_slot(channel_id, message_id)).map(|b| b.track_key.clone()))
    }

    async fn unbind_message(&self, channel_id: &str, message_id: &str) ->
        Result<bool, RaterError> {
        let slot = message_slot(channel_id, message_id);
        if !self.doc.lock().await.messages.contains_key(&slot) {
            return Ok(false);
        }
        self.mutate(|doc| Ok(doc.messages.remove(&slot).is_some())).await
    }
}
