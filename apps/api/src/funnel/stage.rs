//! Funnel stage policy: a threshold table mapping cumulative score to a stage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::funnel::FunnelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Sandbox,
    Warmup,
    Handoff,
}

impl FunnelStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::Sandbox => "sandbox",
            FunnelStage::Warmup => "warmup",
            FunnelStage::Handoff => "handoff",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(FunnelStage::Sandbox),
            "warmup" => Ok(FunnelStage::Warmup),
            "handoff" => Ok(FunnelStage::Handoff),
            other => Err(FunnelError::InvalidInput(format!(
                "unknown funnel stage '{other}'"
            ))),
        }
    }
}

/// One row of the threshold table. `max` is inclusive; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBand {
    pub stage: FunnelStage,
    pub min: i32,
    pub max: Option<i32>,
}

impl StageBand {
    fn contains(&self, score: i32) -> bool {
        score >= self.min && self.max.map_or(true, |max| score <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePolicy {
    bands: Vec<StageBand>,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            bands: vec![
                StageBand {
                    stage: FunnelStage::Sandbox,
                    min: 0,
                    max: Some(2),
                },
                StageBand {
                    stage: FunnelStage::Warmup,
                    min: 3,
                    max: Some(4),
                },
                StageBand {
                    stage: FunnelStage::Handoff,
                    min: 5,
                    max: None,
                },
            ],
        }
    }
}

impl StagePolicy {
    /// Builds a policy from an explicit table.
    ///
    /// The table must start at 0, be contiguous, list stages in ascending order
    /// and end with an unbounded band. Those rules make `stage_for` total and
    /// monotonic in score.
    pub fn new(bands: Vec<StageBand>) -> Result<Self, FunnelError> {
        let first = bands
            .first()
            .ok_or_else(|| FunnelError::InvalidInput("stage table is empty".to_string()))?;
        if first.min != 0 {
            return Err(FunnelError::InvalidInput(format!(
                "stage table must start at 0, starts at {}",
                first.min
            )));
        }

        for pair in bands.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            let Some(max) = lower.max else {
                return Err(FunnelError::InvalidInput(format!(
                    "only the last band may be unbounded ({} is not last)",
                    lower.stage
                )));
            };
            if max < lower.min {
                return Err(FunnelError::InvalidInput(format!(
                    "band {} has max {max} below min {}",
                    lower.stage, lower.min
                )));
            }
            if upper.min != max + 1 {
                return Err(FunnelError::InvalidInput(format!(
                    "band {} must start at {}, starts at {}",
                    upper.stage,
                    max + 1,
                    upper.min
                )));
            }
            if upper.stage <= lower.stage {
                return Err(FunnelError::InvalidInput(format!(
                    "stages must ascend: {} follows {}",
                    upper.stage, lower.stage
                )));
            }
        }

        if bands.last().and_then(|b| b.max).is_some() {
            return Err(FunnelError::InvalidInput(
                "the top band must be unbounded".to_string(),
            ));
        }

        Ok(Self { bands })
    }

    /// Three-band table from the lower bounds of `warmup` and `handoff`.
    pub fn from_minimums(warmup_min: i32, handoff_min: i32) -> Result<Self, FunnelError> {
        if warmup_min < 1 || handoff_min <= warmup_min {
            return Err(FunnelError::InvalidInput(format!(
                "need 0 < warmup_min < handoff_min, got {warmup_min} and {handoff_min}"
            )));
        }
        Self::new(vec![
            StageBand {
                stage: FunnelStage::Sandbox,
                min: 0,
                max: Some(warmup_min - 1),
            },
            StageBand {
                stage: FunnelStage::Warmup,
                min: warmup_min,
                max: Some(handoff_min - 1),
            },
            StageBand {
                stage: FunnelStage::Handoff,
                min: handoff_min,
                max: None,
            },
        ])
    }

    /// First matching band wins. Scores below zero fall into the lowest band.
    pub fn stage_for(&self, score: i32) -> FunnelStage {
        self.bands
            .iter()
            .find(|band| band.contains(score))
            .or_else(|| self.bands.first())
            .map(|band| band.stage)
            .unwrap_or(FunnelStage::Sandbox)
    }

    pub fn bands(&self) -> &[StageBand] {
        &self.bands
    }
}
