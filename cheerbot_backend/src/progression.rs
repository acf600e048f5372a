//! Progression scoring: activity rates, cumulative score and level thresholds.
//!
//! Scores are kept in tenths of a point so that sums stay exact; the smallest
//! rate (a passive reaction) is a single tenth.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use thiserror::Error;

/// Kinds of activity that earn progression score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PrimaryPost,
    SecondaryPost,
    Repost,
    Reaction,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 4] = [
        ActivityKind::PrimaryPost,
        ActivityKind::SecondaryPost,
        ActivityKind::Repost,
        ActivityKind::Reaction,
    ];

    /// Score per occurrence, in tenths of a point.
    fn rate_tenths(self) -> u64 {
        match self {
            ActivityKind::PrimaryPost => 50,
            ActivityKind::SecondaryPost => 20,
            ActivityKind::Repost => 5,
            ActivityKind::Reaction => 1,
        }
    }

    /// Score per occurrence in points (5.0, 2.0, 0.5, 0.1).
    pub fn rate(self) -> f64 {
        self.rate_tenths() as f64 / 10.0
    }
}

/// A non-negative progression score with one decimal of precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct Score(u64);

impl Score {
    pub const ZERO: Score = Score(0);

    pub fn from_tenths(tenths: u64) -> Self {
        Self(tenths)
    }

    pub fn from_points(points: u64) -> Self {
        Self(points.saturating_mul(10))
    }

    pub fn tenths(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 10.0
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.as_f64()
    }
}

impl TryFrom<f64> for Score {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("score must be a finite non-negative number, got {}", value));
        }
        Ok(Score((value * 10.0).round() as u64))
    }
}

impl Add for Score {
    type Output = Score;

    fn add(self, rhs: Score) -> Score {
        Score(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Score {
    fn add_assign(&mut self, rhs: Score) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Score earned by `count` occurrences of `kind`.
pub fn score_delta(kind: ActivityKind, count: u64) -> Score {
    Score(kind.rate_tenths().saturating_mul(count))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressionError {
    #[error("progression table is empty")]
    Empty,
    #[error("progression table must start at level 1 with threshold 0 (found level {level} at {threshold})")]
    BadFirstLevel { level: u32, threshold: u64 },
    #[error("progression table skips from level {previous} to level {level}")]
    NonContiguous { previous: u32, level: u32 },
    #[error("threshold for level {level} ({threshold}) does not exceed the previous level's ({previous})")]
    NotIncreasing { level: u32, threshold: u64, previous: u64 },
}

/// One row of the progression table as stored and seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub level: u32,
    #[serde(alias = "required_xp")]
    pub threshold: u64,
}

/// Immutable, validated level → threshold mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionTable {
    levels: Vec<LevelThreshold>,
}

impl ProgressionTable {
    /// Validate rows (in any order) into a table.
    pub fn new(mut rows: Vec<LevelThreshold>) -> Result<Self, ProgressionError> {
        rows.sort_by_key(|row| row.level);

        let first = rows.first().ok_or(ProgressionError::Empty)?;
        if first.level != 1 || first.threshold != 0 {
            return Err(ProgressionError::BadFirstLevel {
                level: first.level,
                threshold: first.threshold,
            });
        }

        for pair in rows.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.level != prev.level + 1 {
                return Err(ProgressionError::NonContiguous {
                    previous: prev.level,
                    level: next.level,
                });
            }
            if next.threshold <= prev.threshold {
                return Err(ProgressionError::NotIncreasing {
                    level: next.level,
                    threshold: next.threshold,
                    previous: prev.threshold,
                });
            }
        }

        Ok(Self { levels: rows })
    }

    pub fn rows(&self) -> &[LevelThreshold] {
        &self.levels
    }

    pub fn max_level(&self) -> u32 {
        self.levels.last().map(|row| row.level).unwrap_or(1)
    }

    pub fn threshold_for(&self, level: u32) -> Option<u64> {
        let index = level.checked_sub(1)? as usize;
        self.levels.get(index).map(|row| row.threshold)
    }

    /// Greatest level whose threshold is at or below `score`.
    pub fn level_for(&self, score: Score) -> u32 {
        let reached = self
            .levels
            .partition_point(|row| Score::from_points(row.threshold) <= score);
        self.levels
            .get(reached.saturating_sub(1))
            .map(|row| row.level)
            .unwrap_or(1)
    }

    /// Whole points still needed to reach `level + 1`; `None` at the top level.
    pub fn xp_to_next(&self, level: u32, score: Score) -> Option<u64> {
        let next = self.threshold_for(level.checked_add(1)?)?;
        let remaining = Score::from_points(next).tenths().saturating_sub(score.tenths());
        Some(remaining / 10)
    }

    /// Percent of the way from the current level's threshold to the next one.
    pub fn level_progress(&self, score: Score) -> f64 {
        let level = self.level_for(score);
        let (Some(floor), Some(ceiling)) = (self.threshold_for(level), self.threshold_for(level + 1))
        else {
            return 100.0;
        };
        let span = (ceiling - floor) as f64;
        let into = score.as_f64() - floor as f64;
        (into / span * 100.0).clamp(0.0, 100.0)
    }

    /// The level change between two scores, if any.
    pub fn transition(&self, before: Score, after: Score) -> Option<LevelTransition> {
        let from = self.level_for(before);
        let to = self.level_for(after);
        (to != from).then_some(LevelTransition { from, to })
    }
}

/// Where the progression table rows live.
#[async_trait]
pub trait ProgressionSource: Send + Sync {
    async fn load_progression_table(&self) -> anyhow::Result<Vec<LevelThreshold>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTransition {
    pub from: u32,
    pub to: u32,
}

impl LevelTransition {
    pub fn is_level_up(&self) -> bool {
        self.to > self.from
    }

    pub fn levels_gained(&self) -> u32 {
        self.to.saturating_sub(self.from)
    }
}
