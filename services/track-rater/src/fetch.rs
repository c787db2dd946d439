//!
//! src/fetch.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Defines methods for building requests against the music platforms
//! and web endpoints the resolution pipeline reads from. Sending and
//! parsing happens in the providers
//!

use reqwest::{Client, RequestBuilder, header, redirect};
use url::Url;

use crate::config::{HttpConfig, SaavnConfig, SpotifyConfig, WebSearchConfig};
use crate::errors::RaterError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
        .user_agent(http.user_agent.clone())
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, RaterError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| RaterError::Config(format!("build client: {e}")))
}

pub fn json_client(http: &HttpConfig) -> Result<Client, RaterError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

pub fn html_client(http: &HttpConfig) -> Result<Client, RaterError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("text/html"));
    h.insert(header::ACCEPT_LANGUAGE, header::HeaderValue::from_static("en"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, RaterError> {
    base.join(path)
        .map_err(|e| RaterError::Config(format!("join {path} onto {base}: {e}")))
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, RaterError> {

        let http = json_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    /// POST accounts.spotify.com/api/token, client credentials grant
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/tracks/{id}
    pub fn track(&self, track_id: &str, bearer: &str) -> Result<RequestBuilder, RaterError> {
        let url = join(&self.cfg.api_base, &format!("tracks/{track_id}"))?;
        let mut rb = self.http.get(url).bearer_auth(bearer);
        if let Some(market) = &self.cfg.market {
            rb = rb.query(&[("market", market)]);
        }
        Ok(rb)
    }

    /// GET /v1/search?type=track&q=...&limit=
    pub fn search(&self, query: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, RaterError> {
        let url = join(&self.cfg.api_base, "search")?;
        let mut rb = self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "track"),
            ("q", query),
            ("limit", &limit.to_string())
        ]);
        if let Some(market) = &self.cfg.market {
            rb = rb.query(&[("market", market)]);
        }
        Ok(rb)
    }
}

#[derive(Clone, Debug)]
pub struct SaavnClient {
    pub http: Client,
    pub base: Url
}

impl SaavnClient {
    pub fn new(http_config: &HttpConfig, cfg: &SaavnConfig) -> Result<Self, RaterError> {
        Ok( Self { http: json_client(http_config)?, base: cfg.base_url.clone() })
    }

    /// GET /api.php?__call=autocomplete.get&query=...&_format=json&_marker=0
    pub fn autocomplete(&self, query: &str) -> Result<RequestBuilder, RaterError> {
        let url = join(&self.base, "api.php")?;
        Ok(self.http.get(url).query(&[
            ("__call", "autocomplete.get"),
            ("query", query),
            ("_format", "json"),
            ("_marker", "0")
        ]))
    }
}

/// Public pages and oEmbed endpoints, no credentials involved
#[derive(Clone, Debug)]
pub struct PageClient {
    pub http: Client,
    pub json: Client
}

impl PageClient {
    pub fn new(http_config: &HttpConfig) -> Result<Self, RaterError> {
        Ok( Self { http: html_client(http_config)?, json: json_client(http_config)? })
    }

    /// GET {page}
    pub fn page(&self, url: &Url) -> RequestBuilder {
        self.http.get(url.clone())
    }

    /// GET https://www.youtube.com/oembed?url=...&format=json
    pub fn youtube_oembed(&self, url: &Url) -> RequestBuilder {
        self.json.get("https://www.youtube.com/oembed").query(&[
            ("url", url.as_str()),
            ("format", "json")
        ])
    }
}

#[derive(Clone, Debug)]
pub struct WebSearchClient {
    pub http: Client,
    pub cfg: WebSearchConfig
}

impl WebSearchClient {
    pub fn new(http_config: &HttpConfig, cfg: &WebSearchConfig) -> Result<Self, RaterError> {
        Ok( Self { http: html_client(http_config)?, cfg: cfg.clone() })
    }

    /// GET {search_url}?q=site:{scope} {phrase}
    pub fn search(&self, phrase: &str) -> RequestBuilder {
        let q = format!("site:{} {}", self.cfg.site_scope, phrase);
        self.http.get(self.cfg.search_url.clone()).query(&[("q", q.as_str())])
    }
}

/// Sends a request and hands back the body of a successful response,
/// anything else becomes a provider error
pub async fn send_text(request: RequestBuilder) -> Result<String, RaterError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(RaterError::ProviderUnavailable(format!("status {status}")));
    }
    Ok(resp.text().await?)
}

pub async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, RaterError> {
    let body = send_text(request).await?;
    Ok(serde_json::from_str(&body)?)
}
