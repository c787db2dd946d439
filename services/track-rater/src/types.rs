//!
//! src/types.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Identity and record types shared by the resolution pipeline,
//! the stores and the presentation boundary
//!

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::RaterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Spotify,
    AppleMusic,
    YouTube,
    SoundCloud,
    Bandcamp
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    FreeText,
    Link(Platform)
}

/// Normalized form of whatever the user typed
#[derive(Debug, Clone)]
pub struct TrackQuery {
    pub raw: String,
    pub phrase: String,
    pub source: QuerySource,
    // canonical link usable for a lookup by id, Spotify only
    pub direct: Option<Url>
}

impl TrackQuery {
    pub fn free_text(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            phrase: raw.trim().to_string(),
            source: QuerySource::FreeText,
            direct: None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub title: String,
    pub artist: String,
    pub primary_url: String,
    pub secondary_url: Option<String>,
    pub thumbnail_url: Option<String>
}

impl TrackCandidate {
    /// Text the disambiguator compares a query phrase against
    pub fn label(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

/// Stable identity of a song, a v5 uuid of its canonical primary url
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackKey(pub String);

impl TrackKey {
    pub fn derive(primary_url: &str) -> Self {
        let name = match canonical_url(primary_url) {
            Some(url) => url.to_string(),
            None => primary_url.trim().to_string()
        };
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const TRACKING_PARAMS: [&str; 8] = ["si", "fbclid", "gclid", "feature", "context", "nd", "ls", "app"];

// query parameters that carry the track id on hosts that use them
fn identifying_params(host: &str) -> Option<&'static [&'static str]> {
    match host {
        "open.spotify.com" => Some(&[]),
        "youtube.com" | "www.youtube.com" | "m.youtube.com" | "music.youtube.com" => Some(&["v"]),
        "music.apple.com" | "itunes.apple.com" => Some(&["i"]),
        _ => None
    }
}

/// Strips everything from a link that does not identify the track:
/// tracking parameters, fragment, trailing slash and Spotify locale
/// prefixes. Known hosts keep only their id parameters, others keep
/// every non-tracking parameter in sorted order
pub fn canonical_url(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_string();

    let _ = url.set_scheme("https");
    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url.query_pairs()
        .filter(|(k, _)| {
            let k: &str = k;
            match identifying_params(&host) {
                Some(keep) => keep.contains(&k),
                None => !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k)
            }
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    let segments: Vec<String> = url.path_segments()
        .map(|segments| segments
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
        .unwrap_or_default();

    let keep: Vec<String> = if host == "open.spotify.com" {
        segments.into_iter().filter(|s| !s.starts_with("intl-")).collect()
    } else {
        segments
    };
    url.set_path(&keep.join("/"));
    Some(url)
}

/// Inclusive bounds a rating value must fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingScale {
    pub min: u8,
    pub max: u8
}

impl RatingScale {
    pub fn validate(&self, value: i64) -> Result<u8, RaterError> {
        if value < i64::from(self.min) || value > i64::from(self.max) {
            return Err(RaterError::InvalidRating { value, min: self.min, max: self.max });
        }
        Ok(value as u8)
    }
}

/// Input to the track store's idempotent create
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub key: TrackKey,
    pub title: String,
    pub artist: String,
    pub primary_url: String,
    pub secondary_url: Option<String>,
    pub thumbnail_url: Option<String>
}

impl From<&TrackCandidate> for NewTrack {
    fn from(c: &TrackCandidate) -> Self {
        Self {
            key: TrackKey::derive(&c.primary_url),
            title: c.title.clone(),
            artist: c.artist.clone(),
            primary_url: c.primary_url.clone(),
            secondary_url: c.secondary_url.clone(),
            thumbnail_url: c.thumbnail_url.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTrack {
    pub key: TrackKey,
    pub title: String,
    pub artist: String,
    pub primary_url: String,
    pub secondary_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub average: f64,
    pub count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    pub average: f64,
    pub count: i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub track_key: TrackKey,
    pub user_id: String,
    pub value: u8,
    pub rated_at: DateTime<Utc>
}

/// Result of a rating write, `previous` is set when the user changed a vote
#[derive(Debug, Clone)]
pub struct RatingChange {
    pub track: CanonicalTrack,
    pub previous: Option<u8>,
    pub value: u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRating {
    pub track_key: TrackKey,
    pub title: String,
    pub artist: String,
    pub value: u8,
    pub rated_at: DateTime<Utc>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBinding {
    pub channel_id: String,
    pub message_id: String,
    pub track_key: TrackKey,
    pub created_at: DateTime<Utc>
}

/// What the presentation layer renders for a track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackView {
    pub title: String,
    pub artist: String,
    pub primary_url: String,
    pub secondary_url: Option<String>,
    pub average: f64,
    pub count: i64
}

impl From<&CanonicalTrack> for TrackView {
    fn from(t: &CanonicalTrack) -> Self {
        Self {
            title: t.title.clone(),
            artist: t.artist.clone(),
            primary_url: t.primary_url.clone(),
            secondary_url: t.secondary_url.clone(),
            average: t.average,
            count: t.count
        }
    }
}
