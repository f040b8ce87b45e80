//! Rating scores and per-movie aggregation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::validation::FieldErrors;

/// A validated 1..=10 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "i32", into = "i32")]
pub struct RatingScore(i32);

impl RatingScore {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 10;

    pub fn get(self) -> i32 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            10 => "perfect",
            9 => "extraordinary",
            8 => "excellent",
            7 => "very good",
            6 => "good",
            5 => "not bad",
            4 => "ok",
            3 => "bad",
            2 => "really bad",
            _ => "sucks!",
        }
    }

    /// Every score, best first.
    pub fn all() -> impl Iterator<Item = RatingScore> {
        (Self::MIN..=Self::MAX).rev().map(RatingScore)
    }
}

impl TryFrom<i32> for RatingScore {
    type Error = FieldErrors;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&v) {
            Ok(RatingScore(v))
        } else {
            Err(FieldErrors::single("rating", format!("\"{v}\" is not a valid choice")))
        }
    }
}

impl From<RatingScore> for i32 {
    fn from(s: RatingScore) -> i32 {
        s.0
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn mean(scores: &[i32]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: i64 = scores.iter().map(|&s| i64::from(s)).sum();
    Some(sum as f64 / scores.len() as f64)
}

/// Mean score rounded to two decimals, `0.0` for an unrated movie.
pub fn average(scores: &[i32]) -> f64 {
    mean(scores).map(|m| round_to(m, 2)).unwrap_or(0.0)
}

/// Mean score rounded to one decimal, as shown next to a movie.
pub fn display_average(scores: &[i32]) -> f64 {
    mean(scores).map(|m| round_to(m, 1)).unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ScoreCount {
    pub score: i32,
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct RatingSummary {
    pub average: f64,
    pub count: u64,
    /// One entry per score, 10 down to 1, including scores nobody gave.
    pub distribution: Vec<ScoreCount>,
}

pub fn summarize(scores: &[i32]) -> RatingSummary {
    let distribution = RatingScore::all()
        .map(|s| ScoreCount {
            score: s.get(),
            label: s.label().to_string(),
            count: scores.iter().filter(|&&v| v == s.get()).count() as u64,
        })
        .collect();
    RatingSummary { average: average(scores), count: scores.len() as u64, distribution }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_three() {
        assert_eq!(average(&[8, 6, 10]), 8.0);
    }

    #[test]
    fn unrated_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(display_average(&[]), 0.0);
    }

    #[test]
    fn average_rounds_to_two_places() {
        assert_eq!(average(&[7, 8, 8]), 7.67);
        assert_eq!(average(&[1, 2]), 1.5);
    }

    #[test]
    fn display_average_has_one_decimal() {
        assert_eq!(display_average(&[7, 8, 8]), 7.7);
        assert_eq!(display_average(&[10, 10]), 10.0);
    }

    #[test]
    fn score_bounds() {
        assert!(RatingScore::try_from(0).is_err());
        assert!(RatingScore::try_from(11).is_err());
        assert_eq!(RatingScore::try_from(8).unwrap().label(), "excellent");
        assert_eq!(RatingScore::try_from(1).unwrap().label(), "sucks!");
    }

    #[test]
    fn summary_lists_every_score() {
        let s = summarize(&[10, 10, 3]);
        assert_eq!(s.count, 3);
        assert_eq!(s.distribution.len(), 10);
        assert_eq!(s.distribution[0], ScoreCount { score: 10, label: "perfect".into(), count: 2 });
        assert_eq!(s.distribution[7].score, 3);
        assert_eq!(s.distribution[7].count, 1);
    }
}
