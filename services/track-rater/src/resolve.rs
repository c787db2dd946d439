//!
//! src/resolve.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Asks the configured catalogues for tracks matching a normalized
//! query. Provider failures are absorbed here and read as "nothing
//! found"; only cancellation is reported to the caller
//!

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::RaterError;
use crate::providers::SearchProvider;
use crate::types::{TrackCandidate, TrackQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    // looked up by id from a canonical link, needs no disambiguation
    Direct(TrackCandidate),
    Candidates(Vec<TrackCandidate>)
}

pub struct Resolver {
    providers: Vec<Arc<dyn SearchProvider>>,
    timeout: Duration,
    search_limit: u32
}

impl Resolver {
    /// Providers are tried in order, the first non-empty answer wins
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>, timeout: Duration, search_limit: u32) -> Self {
        Self { providers, timeout, search_limit: search_limit.max(1) }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    async fn guarded<T>(
        &self,
        provider: &'static str,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, RaterError>>
    ) -> Result<Option<T>, RaterError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RaterError::Cancelled),
            r = timeout(self.timeout, call) => match r {
                Ok(Ok(v)) => Ok(Some(v)),
                Ok(Err(e)) => {
                    warn!(provider, error = %e, "resolve.provider.failed");
                    Ok(None)
                }
                Err(_) => {
                    warn!(provider, timeout = ?self.timeout, "resolve.provider.timeout");
                    Ok(None)
                }
            }
        }
    }

    pub async fn resolve(&self, query: &TrackQuery, cancel: &CancellationToken) ->
        Result<Resolution, RaterError> {

        if let Some(link) = &query.direct {
            for provider in &self.providers {
                let found = self.guarded(provider.name(), cancel, provider.lookup(link)).await?;
                if let Some(Some(candidate)) = found {
                    info!(provider = provider.name(), link = %link, "resolve.direct");
                    return Ok(Resolution::Direct(candidate));
                }
            }
        }

        if query.phrase.trim().is_empty() {
            return Ok(Resolution::Candidates(Vec::new()));
        }

        for provider in &self.providers {
            let found = self.guarded(
                provider.name(),
                cancel,
                provider.search(&query.phrase, self.search_limit)
            ).await?;

            match found {
                Some(candidates) if !candidates.is_empty() => {
                    info!(
                        provider = provider.name(),
                        phrase = %query.phrase,
                        candidates = candidates.len(),
                        "resolve.search"
                    );
                    return Ok(Resolution::Candidates(candidates));
                }
                _ => debug!(provider = provider.name(), phrase = %query.phrase, "resolve.search.empty")
            }
        }
        Ok(Resolution::Candidates(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use url::Url;

    fn candidate(title: &str, id: &str) -> TrackCandidate {
        TrackCandidate {
            title: title.into(),
            artist: "Ed Sheeran".into(),
            primary_url: format!("https://open.spotify.com/track/{id}"),
            secondary_url: None,
            thumbnail_url: None
        }
    }

    enum Behaviour {
        Answer(Vec<TrackCandidate>),
        Fail,
        Stall
    }

    struct Stub {
        name: &'static str,
        behaviour: Behaviour,
        direct: Option<TrackCandidate>,
        calls: AtomicUsize
    }

    impl Stub {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self { name, behaviour, direct: None, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl SearchProvider for Stub {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn search(&self, _: &str, limit: u32) -> Result<Vec<TrackCandidate>, RaterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Answer(c) => Ok(c.iter().take(limit as usize).cloned().collect()),
                Behaviour::Fail => Err(RaterError::ProviderUnavailable("status 500".into())),
                Behaviour::Stall => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn lookup(&self, _: &Url) -> Result<Option<TrackCandidate>, RaterError> {
            Ok(self.direct.clone())
        }
    }

    fn query(phrase: &str) -> TrackQuery {
        TrackQuery::free_text(phrase)
    }

    fn resolver(stubs: Vec<Arc<Stub>>) -> Resolver {
        let providers = stubs.into_iter()
            .map(|s| s as Arc<dyn SearchProvider>)
            .collect();
        Resolver::new(providers, Duration::from_millis(50), 5)
    }

    #[tokio::test]
    async fn failing_and_stalled_providers_read_as_empty() {
        let r = resolver(vec![Stub::new("a", Behaviour::Fail), Stub::new("b", Behaviour::Stall)]);
        let out = r.resolve(&query("shape of you"), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, Resolution::Candidates(Vec::new()));
    }

    #[tokio::test]
    async fn first_non_empty_provider_wins() {
        let first = Stub::new("first", Behaviour::Answer(Vec::new()));
        let second = Stub::new("second", Behaviour::Answer(vec![candidate("Shape of You", "a")]));
        let third = Stub::new("third", Behaviour::Answer(vec![candidate("Other", "b")]));
        let r = resolver(vec![first.clone(), second.clone(), third.clone()]);

        let out = r.resolve(&query("shape of you"), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, Resolution::Candidates(vec![candidate("Shape of You", "a")]));
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn result_set_is_bounded() {
        let many = (0..9).map(|i| candidate("Song", &format!("{i}"))).collect();
        let r = resolver(vec![Stub::new("many", Behaviour::Answer(many))]);
        let out = r.resolve(&query("song"), &CancellationToken::new()).await.unwrap();
        match out {
            Resolution::Candidates(c) => assert_eq!(c.len(), 5),
            other => panic!("unexpected {other:?}")
        }
    }

    #[tokio::test]
    async fn direct_links_resolve_without_search() {
        let stub = Arc::new(Stub {
            name: "spotify",
            behaviour: Behaviour::Fail,
            direct: Some(candidate("Shape of You", "7qiZfU4dY1lWllzX7mPBI3")),
            calls: AtomicUsize::new(0)
        });
        let r = resolver(vec![stub.clone()]);
        let mut q = query("https://open.spotify.com/track/7qiZfU4dY1lWllzX7mPBI3");
        q.direct = Url::parse("https://open.spotify.com/track/7qiZfU4dY1lWllzX7mPBI3").ok();

        let out = r.resolve(&q, &CancellationToken::new()).await.unwrap();
        assert!(matches!(out, Resolution::Direct(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = resolver(vec![Stub::new("a", Behaviour::Stall)]);
        let out = r.resolve(&query("shape of you"), &cancel).await;
        assert!(matches!(out, Err(RaterError::Cancelled)));
    }

    #[tokio::test]
    async fn blank_phrase_skips_providers() {
        let stub = Stub::new("a", Behaviour::Answer(vec![candidate("x", "y")]));
        let r = resolver(vec![stub.clone()]);
        let out = r.resolve(&query("   "), &CancellationToken::new()).await.unwrap();
        assert_eq!(out, Resolution::Candidates(Vec::new()));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }
}
