//!
//! src/engine.rs  Track Rater Authors  Oct 18th, 2026
//!
//! The operations the presentation layer calls: recommending a song,
//! rating it, and reading the leaderboard and per user history
//!

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::disambiguate::{Decision, Disambiguator};
use crate::errors::RaterError;
use crate::fetch::{PageClient, SaavnClient, SpotifyClient, WebSearchClient};
use crate::normalize::Normalizer;
use crate::providers::{ClientCredentials, PageMetadata, SearchProvider};
use crate::resolve::{Resolution, Resolver};
use crate::search::{SaavnSearch, SpotifySearch, WebSearch};
use crate::store::RatingStore;
use crate::types::{NewTrack, TrackKey, TrackView, UserRating};

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub track_key: TrackKey,
    pub phrase: String,
    // None for links looked up directly
    pub score: Option<u8>,
    pub thumbnail_url: Option<String>,
    pub track: TrackView
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingReceipt {
    pub track_key: TrackKey,
    pub user_id: String,
    pub previous: Option<u8>,
    pub value: u8,
    pub track: TrackView
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub track_key: TrackKey,
    pub track: TrackView
}

/// Search providers in the order they are asked. The web fallback only
/// runs when no Spotify credentials are configured
pub fn providers_from_config(cfg: &AppConfig) -> Result<Vec<Arc<dyn SearchProvider>>, RaterError> {
    let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();

    if let Some(spotify) = &cfg.spotify {
        let client = SpotifyClient::new(&cfg.http, spotify)?;
        let bearer = Arc::new(ClientCredentials::new(client.clone()));
        providers.push(Arc::new(SpotifySearch::new(client, bearer)));
    }
    if cfg.saavn.enabled {
        providers.push(Arc::new(SaavnSearch::new(SaavnClient::new(&cfg.http, &cfg.saavn)?)));
    }
    if cfg.spotify.is_none() {
        providers.push(Arc::new(WebSearch::new(WebSearchClient::new(&cfg.http, &cfg.web_search)?)));
    }
    Ok(providers)
}

pub struct Engine {
    normalizer: Normalizer,
    resolver: Resolver,
    disambiguator: Disambiguator,
    store: Arc<dyn RatingStore>
}

impl Engine {
    pub fn new(
        normalizer: Normalizer,
        resolver: Resolver,
        disambiguator: Disambiguator,
        store: Arc<dyn RatingStore>
    ) -> Self {
        Self { normalizer, resolver, disambiguator, store }
    }

    pub fn from_config(cfg: &AppConfig, store: Arc<dyn RatingStore>) -> Result<Self, RaterError> {
        let metadata = Arc::new(PageMetadata::new(PageClient::new(&cfg.http)?));
        let normalizer = Normalizer::new(metadata, cfg.http.timeout);
        let resolver = Resolver::new(
            providers_from_config(cfg)?,
            cfg.http.timeout,
            cfg.matching.search_limit
        );
        info!(providers = ?resolver.provider_names(), "engine.ready");

        Ok(Self::new(normalizer, resolver, Disambiguator::from_config(&cfg.matching), store))
    }

    /// Resolves raw input to one track and makes sure it is stored. Nothing
    /// is written unless resolution succeeded and the request is still live
    pub async fn recommend(&self, raw: &str, cancel: &CancellationToken) ->
        Result<Recommendation, RaterError> {
        let query = self.normalizer.normalize(raw, cancel).await;
        if cancel.is_cancelled() {
            return Err(RaterError::Cancelled);
        }

        let (candidate, score) = match self.resolver.resolve(&query, cancel).await? {
            Resolution::Direct(candidate) => (candidate, None),
            Resolution::Candidates(candidates) if candidates.is_empty() => {
                info!(phrase = %query.phrase, "recommend.no_candidates");
                return Err(RaterError::NoCandidates(query.phrase));
            }
            Resolution::Candidates(candidates) => {
                match self.disambiguator.select(&query.phrase, &candidates) {
                    Decision::Selected { candidate, score } => (candidate, Some(score)),
                    Decision::NoMatch { best } => {
                        info!(phrase = %query.phrase, best = ?best, "recommend.low_confidence");
                        return Err(RaterError::LowConfidenceMatch { phrase: query.phrase, best });
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return Err(RaterError::Cancelled);
        }

        let track = self.store.get_or_create(&NewTrack::from(&candidate)).await?;
        info!(
            track_key = %track.key,
            raw = %query.raw,
            source = ?query.source,
            title = %track.title,
            artist = %track.artist,
            score = ?score,
            "recommend.done"
        );

        Ok(Recommendation {
            track_key: track.key.clone(),
            phrase: query.phrase,
            score,
            thumbnail_url: track.thumbnail_url.clone(),
            track: TrackView::from(&track)
        })
    }

    /// Recommends and binds the posted message to the track, so ratings
    /// can be addressed by message
    pub async fn post(&self, raw: &str, channel_id: &str, message_id: &str, cancel: &CancellationToken) ->
        Result<Recommendation, RaterError> {
        let recommendation = self.recommend(raw, cancel).await?;
        self.store.bind_message(channel_id, message_id, &recommendation.track_key).await?;
        Ok(recommendation)
    }

    pub async fn submit_rating(&self, key: &TrackKey, user_id: &str, value: i64) ->
        Result<RatingReceipt, RaterError> {
        let change = self.store.set_rating(key, user_id, value).await?;
        if let Some(previous) = change.previous {
            info!(track_key = %key, user_id, previous, value = change.value, "rating.changed");
        }
        Ok(RatingReceipt {
            track_key: change.track.key.clone(),
            user_id: user_id.to_string(),
            previous: change.previous,
            value: change.value,
            track: TrackView::from(&change.track)
        })
    }

    pub async fn rate_message(&self, channel_id: &str, message_id: &str, user_id: &str, value: i64) ->
        Result<RatingReceipt, RaterError> {
        let Some(key) = self.store.track_for_message(channel_id, message_id).await? else {
            warn!(channel_id, message_id, "rating.unbound_message");
            return Err(RaterError::UnknownTrack(format!("message {channel_id}/{message_id}")));
        };
        self.submit_rating(&key, user_id, value).await
    }

    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, RaterError> {
        let top = self.store.top_tracks(limit).await?;
        Ok(top.iter().enumerate().map(|(i, t)| LeaderboardEntry {
            rank: i + 1,
            track_key: t.key.clone(),
            track: TrackView::from(t)
        }).collect())
    }

    pub async fn user_history(&self, user_id: &str) -> Result<Vec<UserRating>, RaterError> {
        self.store.user_ratings(user_id).await
    }

    /// Best effort cleanup once a posted message is gone
    pub async fn forget_message(&self, channel_id: &str, message_id: &str) -> Result<bool, RaterError> {
        let removed = self.store.unbind_message(channel_id, message_id).await?;
        info!(channel_id, message_id, removed, "message.forgotten");
        Ok(removed)
    }

    /// Recomputes a track's statistics from its ratings
    pub async fn reconcile(&self, key: &TrackKey) -> Result<TrackView, RaterError> {
        let track = self.store.recompute_stats(key).await?;
        Ok(TrackView::from(&track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use crate::config::MatchingConfig;
    use crate::document::JsonStore;
    use crate::persistent::SqliteStore;
    use crate::providers::{LinkMetadata, LinkMetadataProvider};
    use crate::search::spotify_track_id;
    use crate::types::{Platform, TrackCandidate};

    struct Metadata;

    #[async_trait]
    impl LinkMetadataProvider for Metadata {
        async fn metadata(&self, _: Platform, _: &Url) -> Result<LinkMetadata, RaterError> {
            Ok(LinkMetadata { title: "Shape of You".into(), author: "Ed Sheeran".into() })
        }
    }

    struct Catalogue(Vec<TrackCandidate>);

    #[async_trait]
    impl SearchProvider for Catalogue {
        fn name(&self) -> &'static str {
            "catalogue"
        }

        async fn search(&self, _: &str, limit: u32) -> Result<Vec<TrackCandidate>, RaterError> {
            Ok(self.0.iter().take(limit as usize).cloned().collect())
        }

        async fn lookup(&self, link: &Url) -> Result<Option<TrackCandidate>, RaterError> {
            let Some(id) = spotify_track_id(link) else { return Ok(None) };
            Ok(self.0.iter().find(|c| c.primary_url.ends_with(&id)).cloned())
        }
    }

    fn candidate(title: &str, id: &str) -> TrackCandidate {
        TrackCandidate {
            title: title.into(),
            artist: "Ed Sheeran".into(),
            primary_url: format!("https://open.spotify.com/track/{id}"),
            secondary_url: Some(format!("https://music.apple.com/us/song/{id}")),
            thumbnail_url: None
        }
    }

    fn shape_of_you_catalogue() -> Vec<TrackCandidate> {
        vec![
            candidate("Shape of You - Live", "live000000000000000000"),
            candidate("Shape of You", "7qiZfU4dY1lWllzX7mPBI3"),
            candidate("Shape of You (Acoustic)", "acoustic00000000000000")
        ]
    }

    fn engine(catalogue: Vec<TrackCandidate>, store: Arc<dyn RatingStore>) -> Engine {
        let timeout = Duration::from_millis(200);
        let provider: Arc<dyn SearchProvider> = Arc::new(Catalogue(catalogue));
        Engine::new(
            Normalizer::new(Arc::new(Metadata), timeout),
            Resolver::new(vec![provider], timeout, 5),
            Disambiguator::from_config(&MatchingConfig::default()),
            store
        )
    }

    async fn sqlite() -> Arc<dyn RatingStore> {
        Arc::new(SqliteStore::init("sqlite::memory:", 1).await.unwrap())
    }

    // the document file only appears once something was written
    async fn document() -> (tempfile::TempDir, PathBuf, Arc<dyn RatingStore>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratings.json");
        let store: Arc<dyn RatingStore> = Arc::new(JsonStore::open(&path).await.unwrap());
        (dir, path, store)
    }

    #[tokio::test]
    async fn recommend_picks_studio_version_and_is_idempotent() {
        let store = sqlite().await;
        let engine = engine(shape_of_you_catalogue(), store.clone());
        let cancel = CancellationToken::new();

        let first = engine.recommend("shape of you ed sheeran", &cancel).await.unwrap();
        assert_eq!(first.track.title, "Shape of You");
        assert_eq!(first.track.primary_url, "https://open.spotify.com/track/7qiZfU4dY1lWllzX7mPBI3");
        assert_eq!(first.track.count, 0);
        assert!(first.score.is_some());

        let second = engine.recommend("Shape of You Ed Sheeran", &cancel).await.unwrap();
        assert_eq!(first.track_key, second.track_key);
        assert!(store.get_track(&first.track_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn spotify_links_are_looked_up_directly() {
        let engine = engine(shape_of_you_catalogue(), sqlite().await);
        let rec = engine.recommend(
            "https://open.spotify.com/intl-de/track/7qiZfU4dY1lWllzX7mPBI3?si=share",
            &CancellationToken::new()
        ).await.unwrap();
        assert_eq!(rec.score, None);
        assert_eq!(rec.phrase, "Shape of You Ed Sheeran");
        assert_eq!(rec.track_key, TrackKey::derive("https://open.spotify.com/track/7qiZfU4dY1lWllzX7mPBI3"));
    }

    #[tokio::test]
    async fn no_candidates_leaves_no_track_record() {
        let (_dir, path, store) = document().await;
        let engine = engine(Vec::new(), store);
        let err = engine.recommend("some obscure song", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RaterError::NoCandidates(_)));
        assert!(err.is_no_match());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn only_unwanted_versions_is_a_no_match() {
        let (_dir, path, store) = document().await;
        let live = vec![candidate("Shape of You - Live", "live000000000000000000")];
        let engine = engine(live, store.clone());

        let err = engine.recommend("shape of you ed sheeran", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RaterError::LowConfidenceMatch { best: None, .. }));
        assert!(!path.exists());
        assert!(store.get_track(&TrackKey::derive("https://open.spotify.com/track/live000000000000000000"))
            .await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_requests_store_nothing() {
        let (_dir, path, store) = document().await;
        let engine = engine(shape_of_you_catalogue(), store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.recommend("shape of you", &cancel).await.unwrap_err();
        assert!(matches!(err, RaterError::Cancelled));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ratings_by_message_update_the_leaderboard() {
        let engine = engine(shape_of_you_catalogue(), sqlite().await);
        let cancel = CancellationToken::new();
        let posted = engine.post("shape of you ed sheeran", "chan", "msg-1", &cancel).await.unwrap();

        engine.rate_message("chan", "msg-1", "A", 4).await.unwrap();
        let b = engine.rate_message("chan", "msg-1", "B", 2).await.unwrap();
        assert_eq!(b.track.average, 3.0);
        assert_eq!(b.track.count, 2);

        let changed = engine.rate_message("chan", "msg-1", "A", 5).await.unwrap();
        assert_eq!(changed.previous, Some(4));
        assert_eq!(changed.track.average, 3.5);
        assert_eq!(changed.track.count, 2);

        let board = engine.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].track_key, posted.track_key);

        let history = engine.user_history("A").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 5);

        assert_eq!(engine.reconcile(&posted.track_key).await.unwrap().average, 3.5);
    }

    #[tokio::test]
    async fn forgotten_messages_cannot_be_rated() {
        let engine = engine(shape_of_you_catalogue(), sqlite().await);
        let posted = engine.post("shape of you", "chan", "msg-2", &CancellationToken::new()).await.unwrap();

        assert!(engine.forget_message("chan", "msg-2").await.unwrap());
        let err = engine.rate_message("chan", "msg-2", "A", 7).await.unwrap_err();
        assert!(matches!(err, RaterError::UnknownTrack(_)));

        // the track itself stays rateable by key
        let receipt = engine.submit_rating(&posted.track_key, "A", 7).await.unwrap();
        assert_eq!(receipt.track.count, 1);
    }

    #[tokio::test]
    async fn out_of_scale_ratings_are_rejected() {
        let engine = engine(shape_of_you_catalogue(), sqlite().await);
        let posted = engine.recommend("shape of you", &CancellationToken::new()).await.unwrap();
        let err = engine.submit_rating(&posted.track_key, "A", 42).await.unwrap_err();
        assert!(matches!(err, RaterError::InvalidRating { value: 42, .. }));
        assert!(engine.user_history("A").await.unwrap().is_empty());
    }
}
