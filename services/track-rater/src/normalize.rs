//!
//! src/normalize.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Turns raw user input (a link, share text or a song name) into the
//! phrase the resolver searches for. Never fails: the worst case is the
//! input itself
//!

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::providers::LinkMetadataProvider;
use crate::search::spotify_track_id;
use crate::types::{Platform, QuerySource, TrackQuery, canonical_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Metadata,
    Slug
}

/// Platform of a track link and how a phrase is derived from it
pub fn detect(url: &Url) -> Option<(Platform, LinkKind)> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let segments: Vec<&str> = url.path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    match host {
        "open.spotify.com" if spotify_track_id(url).is_some() =>
            Some((Platform::Spotify, LinkKind::Metadata)),
        "music.apple.com" if !segments.is_empty() =>
            Some((Platform::AppleMusic, LinkKind::Metadata)),
        "youtube.com" | "music.youtube.com" if segments.first() == Some(&"watch") =>
            Some((Platform::YouTube, LinkKind::Metadata)),
        "youtu.be" if !segments.is_empty() =>
            Some((Platform::YouTube, LinkKind::Metadata)),
        "soundcloud.com" if segments.len() >= 2 =>
            Some((Platform::SoundCloud, LinkKind::Slug)),
        h if h.ends_with(".bandcamp.com") && segments.first() == Some(&"track") && segments.len() >= 2 =>
            Some((Platform::Bandcamp, LinkKind::Slug)),
        _ => None
    }
}

/// First http(s) link inside share text such as "listen to this https://…"
pub fn first_url(raw: &str) -> Option<Url> {
    raw.split_whitespace()
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .find_map(|token| Url::parse(token.trim_end_matches(['.', ',', ')', '>'])).ok())
}

/// Phrase from the last path segment, "shape-of-you" becomes "shape of you"
pub fn slug_phrase(url: &Url) -> Option<String> {
    let slug = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let phrase = slug
        .replace(['-', '_', '+'], " ")
        .replace("%20", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!phrase.is_empty()).then_some(phrase)
}

/// "{title} {artist}", skipping the artist when the title already names it
pub fn combine(title: &str, author: &str) -> String {
    let title = title.trim();
    let author = author.trim();
    if author.is_empty() || title.to_lowercase().contains(&author.to_lowercase()) {
        title.to_string()
    } else {
        format!("{title} {author}")
    }
}

pub struct Normalizer {
    metadata: Arc<dyn LinkMetadataProvider>,
    timeout: Duration
}

impl Normalizer {
    pub fn new(metadata: Arc<dyn LinkMetadataProvider>, timeout: Duration) -> Self {
        Self { metadata, timeout }
    }

    pub async fn normalize(&self, raw: &str, cancel: &CancellationToken) -> TrackQuery {
        let Some(link) = first_url(raw) else {
            return TrackQuery::free_text(raw);
        };
        let Some((platform, kind)) = detect(&link) else {
            debug!(link = %link, "normalize.unknown_link");
            return TrackQuery::free_text(raw);
        };

        let direct = match platform {
            Platform::Spotify => canonical_url(link.as_str()),
            _ => None
        };
        let fallback = link.to_string();

        let phrase = match kind {
            LinkKind::Slug => slug_phrase(&link).unwrap_or(fallback),
            LinkKind::Metadata => {
                let lookup = timeout(self.timeout, self.metadata.metadata(platform, &link));
                tokio::select! {
                    () = cancel.cancelled() => fallback,
                    r = lookup => match r {
                        Ok(Ok(meta)) => combine(&meta.title, &meta.author),
                        Ok(Err(e)) => {
                            warn!(error = %e, link = %link, "normalize.metadata.failed");
                            fallback
                        }
                        Err(_) => {
                            warn!(link = %link, timeout = ?self.timeout, "normalize.metadata.timeout");
                            fallback
                        }
                    }
                }
            }
        };

        debug!(platform = ?platform, phrase = %phrase, "normalize.done");
        TrackQuery { raw: raw.to_string(), phrase, source: QuerySource::Link(platform), direct }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RaterError;
    use crate::providers::LinkMetadata;
    use async_trait::async_trait;

    struct Fixed(Result<LinkMetadata, ()>);

    #[async_trait]
    impl LinkMetadataProvider for Fixed {
        async fn metadata(&self, _: Platform, _: &Url) -> Result<LinkMetadata, RaterError> {
            self.0.clone().map_err(|_| RaterError::ProviderUnavailable("status 503".into()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl LinkMetadataProvider for Stalled {
        async fn metadata(&self, _: Platform, _: &Url) -> Result<LinkMetadata, RaterError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(RaterError::ProviderUnavailable("unreachable".into()))
        }
    }

    fn normalizer(provider: impl LinkMetadataProvider + 'static) -> Normalizer {
        Normalizer::new(Arc::new(provider), Duration::from_millis(50))
    }

    fn shape_of_you() -> Fixed {
        Fixed(Ok(LinkMetadata { title: "Shape of You".into(), author: "Ed Sheeran".into() }))
    }

    #[tokio::test]
    async fn free_text_passes_through() {
        let q = normalizer(shape_of_you())
            .normalize("  blinding lights weeknd ", &CancellationToken::new()).await;
        assert_eq!(q.phrase, "blinding lights weeknd");
        assert_eq!(q.source, QuerySource::FreeText);
        assert!(q.direct.is_none());
    }

    #[tokio::test]
    async fn spotify_link_uses_metadata_and_keeps_direct_reference() {
        let q = normalizer(shape_of_you()).normalize(
            "check this https://open.spotify.com/intl-de/track/7qiZfU4dY1lWllzX7mPBI3?si=abc",
            &CancellationToken::new()
        ).await;
        assert_eq!(q.phrase, "Shape of You Ed Sheeran");
        assert_eq!(q.source, QuerySource::Link(Platform::Spotify));
        assert_eq!(
            q.direct.map(|u| u.to_string()).as_deref(),
            Some("https://open.spotify.com/track/7qiZfU4dY1lWllzX7mPBI3")
        );
    }

    #[tokio::test]
    async fn metadata_failure_falls_back_to_link() {
        let q = normalizer(Fixed(Err(())))
            .normalize("https://youtu.be/JGwWNGJdvx8", &CancellationToken::new()).await;
        assert_eq!(q.phrase, "https://youtu.be/JGwWNGJdvx8");
        assert_eq!(q.source, QuerySource::Link(Platform::YouTube));
    }

    #[tokio::test]
    async fn metadata_timeout_falls_back_to_link() {
        let q = normalizer(Stalled)
            .normalize("https://music.apple.com/us/song/shape-of-you/1193701392", &CancellationToken::new())
            .await;
        assert_eq!(q.phrase, "https://music.apple.com/us/song/shape-of-you/1193701392");
    }

    #[tokio::test]
    async fn cancelled_lookup_falls_back_to_link() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let q = Normalizer::new(Arc::new(Stalled), Duration::from_secs(30))
            .normalize("https://youtu.be/JGwWNGJdvx8", &cancel).await;
        assert_eq!(q.phrase, "https://youtu.be/JGwWNGJdvx8");
    }

    #[tokio::test]
    async fn slug_links_skip_metadata() {
        let q = normalizer(Stalled)
            .normalize("https://soundcloud.com/edsheeran/shape-of-you", &CancellationToken::new())
            .await;
        assert_eq!(q.phrase, "shape of you");
        assert_eq!(q.source, QuerySource::Link(Platform::SoundCloud));

        let q = normalizer(Stalled)
            .normalize("https://artist.bandcamp.com/track/some_song-name", &CancellationToken::new())
            .await;
        assert_eq!(q.phrase, "some song name");
    }

    #[tokio::test]
    async fn unknown_links_are_free_text() {
        let q = normalizer(shape_of_you())
            .normalize("https://example.com/whatever", &CancellationToken::new()).await;
        assert_eq!(q.source, QuerySource::FreeText);
        assert_eq!(q.phrase, "https://example.com/whatever");
    }

    #[test]
    fn combine_avoids_repeating_artist() {
        assert_eq!(combine("Shape of You", "Ed Sheeran"), "Shape of You Ed Sheeran");
        assert_eq!(combine("Ed Sheeran - Shape of You", "Ed Sheeran"), "Ed Sheeran - Shape of You");
        assert_eq!(combine("Shape of You", ""), "Shape of You");
    }

    #[test]
    fn detection_covers_known_hosts() {
        let d = |s: &str| detect(&Url::parse(s).unwrap()).map(|(p, _)| p);
        assert_eq!(d("https://www.youtube.com/watch?v=JGwWNGJdvx8"), Some(Platform::YouTube));
        assert_eq!(d("https://music.youtube.com/watch?v=JGwWNGJdvx8"), Some(Platform::YouTube));
        assert_eq!(d("https://open.spotify.com/album/3T4tUhGYeRNVUGevb0wThu"), None);
        assert_eq!(d("https://m.soundcloud.com/edsheeran"), None);
    }
}
