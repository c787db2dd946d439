//!
//! src/disambiguate.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Picks the one candidate a query phrase most plausibly means, or
//! declares that none of them is close enough
//!

use std::collections::HashMap;

use tracing::debug;

use crate::config::MatchingConfig;
use crate::types::TrackCandidate;

fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_counts(s: &str) -> HashMap<char, usize> {
    let mut counts = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    counts
}

/// Character multiset overlap of two strings over the longer length,
/// scaled to 0..=100. Case and whitespace runs are ignored
pub fn similarity(a: &str, b: &str) -> u8 {
    let (a, b) = (normalize(a), normalize(b));
    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 || a.is_empty() || b.is_empty() {
        return 0;
    }

    let counts_b = char_counts(&b);
    let common: usize = char_counts(&a)
        .iter()
        .map(|(c, n)| (*n).min(counts_b.get(c).copied().unwrap_or(0)))
        .sum();

    ((common * 100) / longer) as u8
}

// ordinary words that happen to contain a marker
const MARKER_SAFE_WORDS: [&str; 11] = [
    "alive", "olive", "oliver", "clive", "deliver", "delivered", "delivery",
    "liver", "sliver", "lived", "relive"
];

fn words(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether a title names an unwanted version. Markers match anywhere in
/// the title, so "remix" also catches "Remixes" and "Remixed"
pub fn is_variant(title: &str, denylist: &[String]) -> bool {
    let title = words(title)
        .into_iter()
        .filter(|w| !MARKER_SAFE_WORDS.contains(&w.as_str()))
        .collect::<Vec<_>>()
        .join(" ");

    denylist.iter().any(|marker| {
        let marker = words(marker).join(" ");
        !marker.is_empty() && title.contains(&marker)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Selected { candidate: TrackCandidate, score: u8 },
    // best is the top score among eligible candidates, None when all were filtered
    NoMatch { best: Option<u8> }
}

pub struct Disambiguator {
    threshold: u8,
    denylist: Vec<String>
}

impl Disambiguator {
    pub fn new(threshold: u8, denylist: Vec<String>) -> Self {
        Self { threshold: threshold.min(100), denylist }
    }

    pub fn from_config(cfg: &MatchingConfig) -> Self {
        Self::new(cfg.threshold, cfg.denylist.clone())
    }

    /// Phrases often carry only the title, so the better of the title
    /// and "title artist" comparison counts
    pub fn score(&self, phrase: &str, candidate: &TrackCandidate) -> u8 {
        similarity(phrase, &candidate.title).max(similarity(phrase, &candidate.label()))
    }

    pub fn select(&self, phrase: &str, candidates: &[TrackCandidate]) -> Decision {
        let mut best: Option<(&TrackCandidate, u8)> = None;

        for candidate in candidates {
            if is_variant(&candidate.title, &self.denylist) {
                debug!(title = %candidate.title, "match.variant_skipped");
                continue;
            }
            let score = self.score(phrase, candidate);
            // strict comparison keeps the earliest of equal scores
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((candidate, score)) if score >= self.threshold => Decision::Selected {
                candidate: candidate.clone(),
                score
            },
            other => Decision::NoMatch { best: other.map(|(_, s)| s) }
        }
    }
}
