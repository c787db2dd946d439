//!
//! src/aggregate.rs  Track Rater Authors  Oct 18th, 2026
//!
//! Derived statistics of a track's rating set
//!

use crate::types::{Rating, RatingStats};

/// Mean and cardinality of a rating set, an empty set averages to 0
pub fn aggregate(ratings: &[Rating]) -> RatingStats {
    if ratings.is_empty() {
        return RatingStats { average: 0.0, count: 0 };
    }
    let sum: u64 = ratings.iter().map(|r| u64::from(r.value)).sum();
    let count = ratings.len();
    RatingStats { average: sum as f64 / count as f64, count: count as i64 }
}
