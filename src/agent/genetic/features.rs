//! Fixed-length feature vectors for the linear genetic policy.

use serde::{Deserialize, Serialize};

use crate::config::ProblemKind;
use crate::observation::{GoalReading, Observation};
use crate::types::Direction;

/// Feature extractor, one per problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// bias, position (2), beacon direction (5), wall flags (4), beacon offset (2).
    Beacon,
    /// bias, position (2), carrying, goal direction (5), goal offset (2),
    /// resource flags (4), wall flags (4).
    Foraging,
}

impl FeatureSet {
    pub const BEACON_LEN: usize = 14;
    pub const FORAGING_LEN: usize = 19;

    pub fn default_for(problem: ProblemKind) -> Self {
        match problem {
            ProblemKind::Beacon => FeatureSet::Beacon,
            ProblemKind::Foraging => FeatureSet::Foraging,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeatureSet::Beacon => "beacon",
            FeatureSet::Foraging => "foraging",
        }
    }

    pub fn problem(&self) -> ProblemKind {
        match self {
            FeatureSet::Beacon => ProblemKind::Beacon,
            FeatureSet::Foraging => ProblemKind::Foraging,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureSet::Beacon => Self::BEACON_LEN,
            FeatureSet::Foraging => Self::FORAGING_LEN,
        }
    }

    pub fn extract(&self, obs: &Observation) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.len());
        let (nx, ny) = obs.normalized_position();
        features.push(1.0);
        features.push(nx);
        features.push(ny);
        let walls = obs.vision.as_ref().map(|v| v.wall_flags()).unwrap_or([false; 4]);

        match self {
            FeatureSet::Beacon => {
                let reading = obs.beacon.unwrap_or_else(GoalReading::none);
                features.extend(reading.direction.one_hot());
                features.extend(walls.iter().map(|w| bit(*w)));
                features.extend(scaled_offset(obs, reading));
            }
            FeatureSet::Foraging => {
                let reading = obs.goal().unwrap_or_else(GoalReading::none);
                features.push(bit(obs.is_carrying()));
                features.extend(reading.direction.one_hot());
                features.extend(scaled_offset(obs, reading));
                let resources = obs
                    .vision
                    .as_ref()
                    .map(|v| v.resource_flags())
                    .unwrap_or([false; 4]);
                features.extend(resources.iter().map(|r| bit(*r)));
                features.extend(walls.iter().map(|w| bit(*w)));
            }
        }
        features
    }
}

fn bit(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Goal offset divided by the grid extent, so each axis lies in `[-1, 1]`.
fn scaled_offset(obs: &Observation, reading: GoalReading) -> [f64; 2] {
    if reading.direction == Direction::Here {
        return [0.0, 0.0];
    }
    let w = obs.grid_width.saturating_sub(1).max(1) as f64;
    let h = obs.grid_height.saturating_sub(1).max(1) as f64;
    [reading.offset.0 as f64 / w, reading.offset.1 as f64 / h]
}
