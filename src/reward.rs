//! Reward constants and shaping rules for both grid worlds.
//!
//! Every magnitude is configuration; the defaults are representative values,
//! not a canonical set.

use serde::{Deserialize, Serialize};

/// Per-step terms shared by both environments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shaping {
    /// Cost subtracted on every action (discourages idling).
    pub step_cost: f64,
    /// Added when a move reduces the Manhattan distance to the current goal.
    pub approach_bonus: f64,
    /// Subtracted when a move increases the distance to the current goal.
    pub retreat_penalty: f64,
    /// Subtracted when a move is cancelled by a wall or the grid edge.
    pub blocked_penalty: f64,
}

/// Reward configuration of the beacon task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconRewards {
    pub step_cost: f64,
    pub approach_bonus: f64,
    pub retreat_penalty: f64,
    pub blocked_penalty: f64,
    /// Fixed bonus on reaching the beacon.
    pub goal_bonus: f64,
    /// Maximum extra bonus for reaching the beacon quickly.
    pub efficiency_bonus: f64,
}

impl BeaconRewards {
    pub fn shaping(&self) -> Shaping {
        Shaping {
            step_cost: self.step_cost,
            approach_bonus: self.approach_bonus,
            retreat_penalty: self.retreat_penalty,
            blocked_penalty: self.blocked_penalty,
        }
    }
}

impl Default for BeaconRewards {
    fn default() -> Self {
        Self {
            step_cost: 0.01,
            approach_bonus: 0.02,
            retreat_penalty: 0.0,
            blocked_penalty: 0.01,
            goal_bonus: 100.0,
            efficiency_bonus: 50.0,
        }
    }
}

/// Reward configuration of the foraging task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForagingRewards {
    pub step_cost: f64,
    pub approach_bonus: f64,
    pub retreat_penalty: f64,
    pub blocked_penalty: f64,
    /// Bonus for the automatic pick-up of a resource.
    pub pickup_bonus: f64,
    /// Bonus for the automatic drop-off at the nest.
    pub delivery_bonus: f64,
}

impl ForagingRewards {
    pub fn shaping(&self) -> Shaping {
        Shaping {
            step_cost: self.step_cost,
            approach_bonus: self.approach_bonus,
            retreat_penalty: self.retreat_penalty,
            blocked_penalty: self.blocked_penalty,
        }
    }
}

impl Default for ForagingRewards {
    fn default() -> Self {
        Self {
            step_cost: 0.01,
            approach_bonus: 0.05,
            retreat_penalty: 0.02,
            blocked_penalty: 0.01,
            pickup_bonus: 2.0,
            delivery_bonus: 5.0,
        }
    }
}

/// Computes per-step rewards.
pub struct RewardComputer;

impl RewardComputer {
    /// Reward for a move that was actually applied.
    ///
    /// `-step_cost` plus the potential-based shaping term on the change of
    /// Manhattan distance to the current goal. Without a goal
    /// (`None` distances) only the step cost applies.
    pub fn movement(shaping: &Shaping, before: Option<u32>, after: Option<u32>) -> f64 {
        -shaping.step_cost + Self::progress(shaping, before, after)
    }

    /// Shaping term alone: positive when the agent got closer to its goal.
    pub fn progress(shaping: &Shaping, before: Option<u32>, after: Option<u32>) -> f64 {
        match (before, after) {
            (Some(b), Some(a)) if a < b => shaping.approach_bonus,
            (Some(b), Some(a)) if a > b => -shaping.retreat_penalty,
            _ => 0.0,
        }
    }

    /// Reward for a move cancelled by an impassable cell.
    pub fn blocked(shaping: &Shaping) -> f64 {
        -shaping.blocked_penalty
    }

    /// Reward for standing still.
    pub fn idle(shaping: &Shaping) -> f64 {
        -shaping.step_cost
    }

    /// Terminal reward on reaching the beacon.
    ///
    /// `goal_bonus + efficiency_bonus × max(0, 1 − steps_taken / max_steps)`.
    pub fn beacon_arrival(rewards: &BeaconRewards, steps_taken: u32, max_steps: u32) -> f64 {
        let ratio = if max_steps == 0 {
            0.0
        } else {
            (1.0 - steps_taken as f64 / max_steps as f64).max(0.0)
        };
        rewards.goal_bonus + rewards.efficiency_bonus * ratio
    }
}
