//!
//! src/errors.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Defines the error enum of the rating service and the conversions
//! from library errors into it
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaterError {
    #[error("config error: {0}")]
    Config(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no candidates for {0:?}")]
    NoCandidates(String),
    #[error("no confident match for {phrase:?} (best score {best:?})")]
    LowConfidenceMatch { phrase: String, best: Option<u8> },
    #[error("rating {value} outside of {min}..={max}")]
    InvalidRating { value: i64, min: u8, max: u8 },
    #[error("unknown track: {0}")]
    UnknownTrack(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl RaterError {
    /// Resolution outcomes the user sees as "no match"
    pub fn is_no_match(&self) -> bool {
        matches!(
            self,
            RaterError::NoCandidates(_) | RaterError::LowConfidenceMatch { .. }
        )
    }

    /// Wording handed to the presentation layer
    pub fn user_message(&self) -> String {
        match self {
            RaterError::NoCandidates(_) | RaterError::LowConfidenceMatch { .. } =>
                "Could not find a match for that song.".to_string(),
            RaterError::InvalidRating { min, max, .. } =>
                format!("Ratings go from {min} to {max}."),
            RaterError::UnknownTrack(_) =>
                "That song is no longer tracked.".to_string(),
            RaterError::Cancelled =>
                "The request expired before a match was found.".to_string(),
            _ => "Something went wrong, please retry.".to_string()
        }
    }
}

impl From<reqwest::Error> for RaterError {
    fn from(e: reqwest::Error) -> Self {
        RaterError::ProviderUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for RaterError {
    fn from(e: serde_json::Error) -> Self { RaterError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for RaterError {
    fn from(e: sqlx::Error) -> Self { RaterError::StoreUnavailable(e.to_string()) }
}
