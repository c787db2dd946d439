//!
//! src/providers.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Contracts for the external collaborators of the resolution pipeline
//! (link metadata, bearer credentials, catalogue search) together with
//! the metadata and credential implementations the service ships with
//!

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::errors::RaterError;
use crate::fetch::{self, PageClient, SpotifyClient};
use crate::types::{Platform, TrackCandidate};

static VIDEO_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[][^\)\]]*(official|video|audio|lyric|visuali[sz]er|\bhd\b|4k)[^\)\]]*[\)\]]"
    ).expect("video noise pattern")
});

static APPLE_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bby (.+?) on Apple Music").expect("apple music pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMetadata {
    pub title: String,
    pub author: String
}

/// Turns a recognised track link into display metadata
#[async_trait]
pub trait LinkMetadataProvider: Send + Sync {
    async fn metadata(&self, platform: Platform, link: &Url) ->
        Result<LinkMetadata, RaterError>;
}

/// Hands out a currently valid bearer token or fails
#[async_trait]
pub trait BearerProvider: Send + Sync {
    async fn bearer(&self) -> Result<String, RaterError>;
}

/// A catalogue that can be searched for tracks
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, phrase: &str, limit: u32) ->
        Result<Vec<TrackCandidate>, RaterError>;

    /// Resolves a canonical link straight to its track, when the catalogue
    /// owns that link format
    async fn lookup(&self, _link: &Url) -> Result<Option<TrackCandidate>, RaterError> {
        Ok(None)
    }
}

///
/// Metadata read from public pages: Open Graph tags for Spotify and
/// Apple Music, oEmbed for YouTube
///
pub struct PageMetadata {
    client: PageClient
}

impl PageMetadata {
    pub fn new(client: PageClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LinkMetadataProvider for PageMetadata {
    async fn metadata(&self, platform: Platform, link: &Url) ->
        Result<LinkMetadata, RaterError> {
        match platform {
            Platform::Spotify | Platform::AppleMusic => {
                let html = fetch::send_text(self.client.page(link)).await?;
                parse_open_graph(&html, platform)
                    .ok_or_else(|| RaterError::Parse(format!("no og tags on {link}")))
            }
            Platform::YouTube => {
                let value = fetch::send_json(self.client.youtube_oembed(link)).await?;
                parse_oembed(&value)
                    .ok_or_else(|| RaterError::Parse(format!("no oembed title for {link}")))
            }
            Platform::SoundCloud | Platform::Bandcamp => Err(RaterError::Parse(
                format!("{platform:?} has no metadata endpoint")
            ))
        }
    }
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let content = doc.select(&selector).next()?.value().attr("content")?;
    let content = content.trim();
    (!content.is_empty()).then(|| content.to_string())
}

/// Reads `og:title` and the artist out of `og:description`
pub fn parse_open_graph(html: &str, platform: Platform) -> Option<LinkMetadata> {
    let doc = Html::parse_document(html);
    let title = meta_content(&doc, r#"meta[property="og:title"]"#)?;
    let description = meta_content(&doc, r#"meta[property="og:description"]"#)?;

    let (title, author) = match platform {
        // "Ed Sheeran · ÷ (Deluxe) · Song · 2017"
        Platform::Spotify => (
            title,
            description.split('·').next().unwrap_or_default().trim().to_string()
        ),
        // "Listen to Shape of You by Ed Sheeran on Apple Music. 2017."
        Platform::AppleMusic => {
            let author = APPLE_BY.captures(&description)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| description.clone());
            let title = title.trim_end_matches(" on Apple Music").to_string();
            let title = match title.rsplit_once(" by ") {
                Some((t, a)) if a.trim() == author => t.trim().to_string(),
                _ => title
            };
            (title, author)
        }
        _ => (title, description)
    };
    Some(LinkMetadata { title, author })
}

/// Reads an oEmbed payload, dropping video decoration from the title
/// and the auto generated " - Topic" channel suffix
pub fn parse_oembed(value: &serde_json::Value) -> Option<LinkMetadata> {
    let title = value.get("title")?.as_str()?;
    let title = VIDEO_NOISE.replace_all(title, "").trim().to_string();
    if title.is_empty() {
        return None;
    }
    let author = value.get("author_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .trim_end_matches(" - Topic")
        .trim_end_matches("VEVO")
        .trim()
        .to_string();
    Some(LinkMetadata { title, author })
}

///
/// Spotify client credentials flow, the token is reused until a minute
/// before it expires
///
pub struct ClientCredentials {
    client: SpotifyClient,
    cached: Mutex<Option<(String, Instant)>>
}

impl ClientCredentials {
    pub fn new(client: SpotifyClient) -> Self {
        Self { client, cached: Mutex::new(None) }
    }

    async fn refresh_token(&self) -> Result<(String, Instant), RaterError> {
        let response = fetch::send_json(self.client.token_request()).await?;
        let token = response["access_token"].as_str()
            .ok_or_else(|| RaterError::ProviderUnavailable(
                "no access_token in response".into()
            ))?
            .to_string();
        let expires_in = response["expires_in"].as_u64().unwrap_or(3600);
        let expire_time = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        Ok((token, expire_time))
    }
}

#[async_trait]
impl BearerProvider for ClientCredentials {
    async fn bearer(&self) -> Result<String, RaterError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expiry)) = cached.as_ref() {
            if Instant::now() < *expiry {
                return Ok(token.clone());
            }
        }
        let (token, expiry) = self.refresh_token().await?;
        debug!(expires_in = ?expiry.saturating_duration_since(Instant::now()), "spotify.token");
        *cached = Some((token.clone(), expiry));
        Ok(token)
    }
}
