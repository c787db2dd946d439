//!
//! src/search.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Catalogue search providers: the authenticated Spotify Web API,
//! the JioSaavn autocomplete catalogue and a domain scoped web search
//! used as the low precision fallback
//!

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::errors::RaterError;
use crate::fetch::{self, SaavnClient, SpotifyClient, WebSearchClient};
use crate::providers::{BearerProvider, SearchProvider};
use crate::types::{TrackCandidate, canonical_url};

static SPOTIFY_TRACK_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://open\.spotify\.com/(?:intl-[A-Za-z-]+/)?track/[A-Za-z0-9]{22}")
        .expect("spotify track link pattern")
});

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(|x| x.as_str()).filter(|s| !s.trim().is_empty())
}

/// Spotify track id of an open.spotify.com track link
pub fn spotify_track_id(link: &Url) -> Option<String> {
    if link.host_str() != Some("open.spotify.com") {
        return None;
    }
    let mut segments = link.path_segments()?.filter(|s| !s.starts_with("intl-"));
    match (segments.next(), segments.next()) {
        (Some("track"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None
    }
}

/// Maps a Spotify track object onto a candidate
pub fn candidate_from_spotify(track: &Value) -> Option<TrackCandidate> {
    let title = str_at(track, "/name")?.to_string();
    let artist = track.get("artists")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter()
            .filter_map(|a| a.get("name").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join(", "))
        .unwrap_or_default();
    let primary_url = str_at(track, "/external_urls/spotify")
        .map(str::to_string)
        .or_else(|| str_at(track, "/id").map(|id| format!("https://open.spotify.com/track/{id}")))?;
    let thumbnail_url = str_at(track, "/album/images/0/url").map(str::to_string);

    Some(TrackCandidate { title, artist, primary_url, secondary_url: None, thumbnail_url })
}

pub struct SpotifySearch {
    client: SpotifyClient,
    bearer: Arc<dyn BearerProvider>
}

impl SpotifySearch {
    pub fn new(client: SpotifyClient, bearer: Arc<dyn BearerProvider>) -> Self {
        Self { client, bearer }
    }
}

#[async_trait]
impl SearchProvider for SpotifySearch {
    fn name(&self) -> &'static str {
        "spotify"
    }

    async fn search(&self, phrase: &str, limit: u32) ->
        Result<Vec<TrackCandidate>, RaterError> {
        let bearer = self.bearer.bearer().await?;
        let value = fetch::send_json(self.client.search(phrase, limit, &bearer)?).await?;
        let items = value.pointer("/tracks/items")
            .and_then(|v| v.as_array())
            .ok_or_else(|| RaterError::Parse("spotify search without tracks.items".into()))?;

        Ok(items.iter()
            .filter(|i| !i.is_null())
            .filter_map(candidate_from_spotify)
            .take(limit as usize)
            .collect())
    }

    async fn lookup(&self, link: &Url) -> Result<Option<TrackCandidate>, RaterError> {
        let Some(id) = spotify_track_id(link) else {
            return Ok(None);
        };
        let bearer = self.bearer.bearer().await?;
        let value = fetch::send_json(self.client.track(&id, &bearer)?).await?;
        Ok(candidate_from_spotify(&value))
    }
}

/// Undoes the html escaping the catalogue applies to titles
fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn vote_count(song: &Value) -> i64 {
    match song.pointer("/more_info/votecount") {
        Some(Value::String(v)) => v.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0
    }
}

/// Songs of an autocomplete payload, most voted first. Songs without a
/// Spotify id are skipped since the Spotify link is the primary url
pub fn candidates_from_saavn(value: &Value, limit: usize) -> Vec<TrackCandidate> {
    let Some(songs) = value.pointer("/songs/data").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut songs: Vec<&Value> = songs.iter().collect();
    songs.sort_by_key(|s| Reverse(vote_count(s)));

    songs.into_iter()
        .filter_map(|song| {
            let spotify_id = str_at(song, "/more_info/spotify_id")?;
            let title = unescape(str_at(song, "/title")?);
            let artist = str_at(song, "/more_info/primary_artists")
                .or_else(|| str_at(song, "/subtitle"))
                .map(unescape)
                .unwrap_or_default();
            Some(TrackCandidate {
                title,
                artist,
                primary_url: format!("https://open.spotify.com/track/{spotify_id}"),
                secondary_url: str_at(song, "/more_info/itunes_url").map(str::to_string),
                thumbnail_url: str_at(song, "/image").map(str::to_string)
            })
        })
        .take(limit)
        .collect()
}

pub struct SaavnSearch {
    client: SaavnClient
}

impl SaavnSearch {
    pub fn new(client: SaavnClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchProvider for SaavnSearch {
    fn name(&self) -> &'static str {
        "saavn"
    }

    async fn search(&self, phrase: &str, limit: u32) ->
        Result<Vec<TrackCandidate>, RaterError> {
        let value = fetch::send_json(self.client.autocomplete(phrase)?).await?;
        Ok(candidates_from_saavn(&value, limit as usize))
    }
}

/// "Shape of You - song and lyrics by Ed Sheeran | Spotify"
fn split_result_title(text: &str) -> (String, String) {
    let text = text.trim();
    let text = text.strip_suffix("| Spotify").unwrap_or(text).trim();
    for sep in [" - song and lyrics by ", " - song by ", " - single by "] {
        if let Some((title, artist)) = text.split_once(sep) {
            return (title.trim().to_string(), artist.trim().to_string());
        }
    }
    (text.to_string(), String::new())
}

/// Result links are often wrapped in a redirect carrying the target
/// in the `uddg` parameter
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") { format!("https:{href}") } else { href.to_string() };
    Url::parse(&absolute)
        .ok()
        .and_then(|u| u.query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned()))
        .unwrap_or(absolute)
}

/// Pulls deduplicated Spotify track links out of search result markup.
/// Anchor text supplies title and artist when it follows Spotify's
/// page title format, bare links in the markup come without them
pub fn extract_candidates(markup: &str, limit: usize) -> Vec<TrackCandidate> {
    let mut seen = HashSet::new();
    let mut out: Vec<TrackCandidate> = Vec::new();

    let doc = Html::parse_document(markup);
    if let Ok(anchors) = Selector::parse("a[href]") {
        for anchor in doc.select(&anchors) {
            let Some(href) = anchor.value().attr("href") else { continue };
            let target = unwrap_redirect(href);
            let Some(link) = SPOTIFY_TRACK_LINK.find(&target) else { continue };
            let Some(canonical) = canonical_url(link.as_str()) else { continue };

            let (title, artist) = split_result_title(&anchor.text().collect::<String>());
            let key = canonical.to_string();
            if seen.insert(key.clone()) {
                out.push(TrackCandidate {
                    title,
                    artist,
                    primary_url: key,
                    secondary_url: None,
                    thumbnail_url: None
                });
            } else if let Some(existing) = out.iter_mut().find(|c| c.primary_url == key) {
                if existing.artist.is_empty() && !artist.is_empty() {
                    existing.title = title;
                    existing.artist = artist;
                }
            }
        }
    }

    for link in SPOTIFY_TRACK_LINK.find_iter(markup) {
        let Some(canonical) = canonical_url(link.as_str()) else { continue };
        let key = canonical.to_string();
        if seen.insert(key.clone()) {
            out.push(TrackCandidate {
                title: String::new(),
                artist: String::new(),
                primary_url: key,
                secondary_url: None,
                thumbnail_url: None
            });
        }
    }

    out.truncate(limit);
    out
}

pub struct WebSearch {
    client: WebSearchClient
}

impl WebSearch {
    pub fn new(client: WebSearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchProvider for WebSearch {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn search(&self, phrase: &str, limit: u32) ->
        Result<Vec<TrackCandidate>, RaterError> {
        let markup = fetch::send_text(self.client.search(phrase)).await?;
        Ok(extract_candidates(&markup, limit as usize))
    }
}
