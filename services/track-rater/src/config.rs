//!
//! src/config.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Reads the environment into typed configuration for the http clients,
//! providers, stores, matcher and logger
//!

use std::time;

use url::Url;

use crate::errors::RaterError;
use crate::types::RatingScale;

/// Every rating is validated against and displayed on this scale
pub const RATING_SCALE: RatingScale = RatingScale { min: 1, max: 10 };

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 10_000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90_000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const MATCH_THRESHOLD: u8 = 50;
pub const MATCH_SEARCH_LIMIT: u32 = 5;
pub const MATCH_DENYLIST: [&str; 5] = ["live", "remix", "acoustic", "instrumental", "karaoke"];

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, RaterError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RaterError::Config(format!("{s} was not set"))),
    }
}

fn env_opt(s: &str) -> Option<String> {
    env_check(s).ok()
}

fn env_flag(s: &str, default: bool) -> bool {
    match env_opt(s).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default
    }
}

fn env_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    env_opt(s)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn parse_base(var: &str, default: &str, host: Option<&str>) -> Result<Url, RaterError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    let mut url = Url::parse(&raw)
        .map_err(|e| RaterError::Config(format!("{var} invalid {e}")))?;

    ensure_https(&url).map_err(RaterError::Config)?;
    if let Some(host) = host {
        ensure_host(&url, host).map_err(RaterError::Config)?;
    }

    // ensure trailing slash so join() appends
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    Ok(url)
}

///
/// Configuration that Spotify expects when hitting endpoints
///
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub market: Option<String>
}

/// Credentials are optional, without them resolution uses the web fallback
fn build_spotify() -> Result<Option<SpotifyConfig>, RaterError> {
    let (Some(client_id), Some(client_secret)) =
        (env_opt("SPOTIFY_CLIENT_ID"), env_opt("SPOTIFY_CLIENT_SECRET")) else {
        return Ok(None);
    };

    let token_url = Url::parse(
        &std::env::var("SPOTIFY_TOKEN_URL")
            .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string())
    ).map_err(|_| RaterError::Config("SPOTIFY_TOKEN_URL invalid".to_string()))?;
    ensure_https(&token_url).map_err(RaterError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(RaterError::Config)?;

    let api_base = parse_base(
        "SPOTIFY_API_BASE", "https://api.spotify.com/v1/", Some("api.spotify.com")
    )?;
    let market = env_opt("SPOTIFY_MARKET");

    Ok(Some(SpotifyConfig { client_id, client_secret, token_url, api_base, market }))
}

///
/// JioSaavn catalogue search, the source of Apple Music links
///
#[derive(Debug, Clone)]
pub struct SaavnConfig {
    pub enabled: bool,
    pub base_url: Url
}

fn build_saavn() -> Result<SaavnConfig, RaterError> {
    Ok(SaavnConfig {
        enabled: env_flag("SAAVN_ENABLED", true),
        base_url: parse_base("SAAVN_BASE_URL", "https://www.jiosaavn.com/", None)?
    })
}

///
/// Domain scoped web search used when Spotify is not configured
///
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub search_url: Url,
    pub site_scope: String
}

fn build_web_search() -> Result<WebSearchConfig, RaterError> {
    let search_url = Url::parse(
        &std::env::var("WEB_SEARCH_URL")
            .unwrap_or_else(|_| "https://html.duckduckgo.com/html/".to_string())
    ).map_err(|e| RaterError::Config(format!("WEB_SEARCH_URL invalid {e}")))?;
    ensure_https(&search_url).map_err(RaterError::Config)?;

    let site_scope = std::env::var("WEB_SEARCH_SCOPE")
        .unwrap_or_else(|_| "open.spotify.com/track".to_string());
    Ok(WebSearchConfig { search_url, site_scope })
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub user_agent: String
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            user_agent: format!("track-rater/{}", env!("CARGO_PKG_VERSION"))
        }
    }
}

fn build_http() -> HttpConfig {
    let defaults = HttpConfig::default();
    HttpConfig {
        timeout: time::Duration::from_millis(env_or("HTTP_TIMEOUT_MS", HTTP_TIMEOUT)),
        user_agent: env_opt("HTTP_USER_AGENT").unwrap_or(defaults.user_agent.clone()),
        ..defaults
    }
}

///
/// Configuration for the durable store
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Json
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub db_url: String,
    pub json_path: String,
    pub max_connections: u32
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            db_url: "sqlite:./data/ratings.db".to_string(),
            json_path: "./data/ratings.json".to_string(),
            max_connections: 8
        }
    }
}

fn build_store() -> Result<StoreConfig, RaterError> {
    let defaults = StoreConfig::default();
    let backend = match env_opt("RATER_STORE").as_deref() {
        None | Some("sqlite") => StoreBackend::Sqlite,
        Some("json") => StoreBackend::Json,
        Some(other) => return Err(RaterError::Config(
            format!("RATER_STORE must be sqlite or json, got {other}")
        ))
    };

    Ok(StoreConfig {
        backend,
        db_url: env_opt("RATER_DB_URL").unwrap_or(defaults.db_url),
        json_path: env_opt("RATER_JSON_PATH").unwrap_or(defaults.json_path),
        max_connections: env_or("RATER_DB_MAX_CONNECTIONS", defaults.max_connections).max(1)
    })
}

///
/// Configuration for picking a single candidate out of a search
///
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub threshold: u8,          // 0..100; below this no match is declared
    pub denylist: Vec<String>,  // title words that disqualify a candidate
    pub search_limit: u32       // results requested per search, 1..=5
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
            denylist: MATCH_DENYLIST.iter().map(|s| s.to_string()).collect(),
            search_limit: MATCH_SEARCH_LIMIT
        }
    }
}

fn build_matching() -> MatchingConfig {
    let defaults = MatchingConfig::default();
    let denylist = match env_opt("MATCH_DENYLIST") {
        Some(list) => list.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => defaults.denylist
    };

    MatchingConfig {
        threshold: env_or("MATCH_THRESHOLD", defaults.threshold).min(100),
        denylist,
        search_limit: env_or("MATCH_SEARCH_LIMIT", defaults.search_limit).clamp(1, 5)
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,track_rater=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: false,
            include_file_line: true,
            include_target: true
        }
    }
}

fn build_logging() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let format = match env_opt("LOG_FORMAT").as_deref() {
        Some("pretty") => LogFormat::Pretty,
        _ => defaults.format
    };
    LoggingConfig {
        format,
        with_ansi: format == LogFormat::Pretty,
        ..defaults
    }
}

///
/// AppConfig which holds everything the engine is built from
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: Option<SpotifyConfig>,
    pub saavn: SaavnConfig,
    pub web_search: WebSearchConfig,
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub matching: MatchingConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, RaterError> {
    dotenvy::dotenv().ok();

    let spotify    = build_spotify()?;
    let saavn      = build_saavn()?;
    let web_search = build_web_search()?;
    let http       = build_http();
    let store      = build_store()?;
    let matching   = build_matching();
    let logging    = build_logging();

    Ok( AppConfig { spotify, saavn, web_search, http, store, matching, logging } )
}
