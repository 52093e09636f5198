//! Grid-world environments.
//!
//! # Lifecycle
//!
//! 1. Build a [`GridEnvironment`] from an [`EnvironmentConfig`].
//! 2. Call [`GridEnvironment::register_agents`] once with the agent ids.
//! 3. Call [`GridEnvironment::reset`] at the start of every episode.
//! 4. Per step: [`GridEnvironment::observe`] / [`GridEnvironment::step`] per
//!    agent, then [`GridEnvironment::advance_time`].

pub mod beacon;
pub mod foraging;
pub mod grid;

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;

pub use beacon::BeaconEnv;
pub use foraging::ForagingEnv;
pub use grid::Grid;

use crate::config::{EnvironmentConfig, ProblemKind};
use crate::error::Result;
use crate::observation::{Observation, Sensor};
use crate::types::{Action, Cell};
use crate::Id;

/// Result of one agent's `step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub reward: f64,
    /// The agent is done for this episode.
    pub terminated: bool,
}

impl StepOutcome {
    pub fn running(reward: f64) -> Self {
        Self {
            reward,
            terminated: false,
        }
    }

    pub fn neutral(terminated: bool) -> Self {
        Self {
            reward: 0.0,
            terminated,
        }
    }
}

/// Read-only view of an agent inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub position: Cell,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrying: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reached: Option<bool>,
}

/// Read-only copy of the world state, handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSnapshot {
    pub width: u32,
    pub height: u32,
    pub time: u32,
    pub walls: Vec<Cell>,
    pub beacon: Option<Cell>,
    pub nest: Option<Cell>,
    pub resources: Vec<Cell>,
    pub agents: BTreeMap<Id, AgentSnapshot>,
}

impl EnvironmentSnapshot {
    /// Renders the grid as text, one line per row.
    ///
    /// Agents are drawn with the first character of their id, `@` when
    /// several agents share a cell.
    pub fn render_ascii(&self) -> String {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut rows = vec![vec!['.'; w]; h];
        let mut put = |cell: &Cell, ch: char| {
            if cell.x >= 0 && cell.y >= 0 && (cell.x as usize) < w && (cell.y as usize) < h {
                rows[cell.y as usize][cell.x as usize] = ch;
            }
        };
        for wall in &self.walls {
            put(wall, '#');
        }
        for resource in &self.resources {
            put(resource, '*');
        }
        if let Some(nest) = &self.nest {
            put(nest, 'N');
        }
        if let Some(beacon) = &self.beacon {
            put(beacon, 'B');
        }

        let mut counts: BTreeMap<Cell, usize> = BTreeMap::new();
        for agent in self.agents.values() {
            *counts.entry(agent.position).or_insert(0) += 1;
        }
        for (id, agent) in &self.agents {
            let ch = if counts.get(&agent.position).copied().unwrap_or(0) > 1 {
                '@'
            } else {
                id.chars().next().unwrap_or('A')
            };
            put(&agent.position, ch);
        }

        let mut out = String::with_capacity((w + 1) * h);
        for row in rows {
            out.extend(row);
            out.push('\n');
        }
        out
    }
}

/// Closed set of environments selected once at construction.
#[derive(Debug, Clone)]
pub enum GridEnvironment {
    Beacon(BeaconEnv),
    Foraging(ForagingEnv),
}

impl GridEnvironment {
    /// Builds and validates the environment; `max_steps` feeds the beacon
    /// efficiency bonus.
    pub fn from_config(config: &EnvironmentConfig, max_steps: u32) -> Result<Self> {
        Ok(match config {
            EnvironmentConfig::Beacon(c) => GridEnvironment::Beacon(BeaconEnv::new(c, max_steps)?),
            EnvironmentConfig::Foraging(c) => GridEnvironment::Foraging(ForagingEnv::new(c)?),
        })
    }

    pub fn kind(&self) -> ProblemKind {
        match self {
            GridEnvironment::Beacon(_) => ProblemKind::Beacon,
            GridEnvironment::Foraging(_) => ProblemKind::Foraging,
        }
    }

    pub fn grid(&self) -> &Grid {
        match self {
            GridEnvironment::Beacon(env) => env.grid(),
            GridEnvironment::Foraging(env) => env.grid(),
        }
    }

    pub fn register_agents(&mut self, ids: &[Id]) {
        match self {
            GridEnvironment::Beacon(env) => env.register_agents(ids),
            GridEnvironment::Foraging(env) => env.register_agents(ids),
        }
    }

    /// Checks an explicit spawn cell against the layout.
    pub fn validate_spawn(&self, agent: &Id, cell: Cell) -> Result<()> {
        match self {
            GridEnvironment::Beacon(env) => env.validate_spawn(agent, cell),
            GridEnvironment::Foraging(env) => env.validate_spawn(agent, cell),
        }
    }

    /// Starts a new episode and returns its initial state.
    pub fn reset<R: Rng>(
        &mut self,
        spawns: &BTreeMap<Id, Cell>,
        rng: &mut R,
    ) -> Result<EnvironmentSnapshot> {
        match self {
            GridEnvironment::Beacon(env) => env.reset(spawns, rng)?,
            GridEnvironment::Foraging(env) => env.reset(spawns, rng)?,
        }
        Ok(self.snapshot())
    }

    /// Assembles the observation of `agent`; never mutates state.
    pub fn observe(&self, agent: &Id, sensors: &[Sensor]) -> Result<Observation> {
        match self {
            GridEnvironment::Beacon(env) => env.observe(agent, sensors),
            GridEnvironment::Foraging(env) => env.observe(agent, sensors),
        }
    }

    /// Applies one atomic transition for `agent`.
    pub fn step(&mut self, agent: &Id, action: Action) -> Result<StepOutcome> {
        match self {
            GridEnvironment::Beacon(env) => env.step(agent, action),
            GridEnvironment::Foraging(env) => env.step(agent, action),
        }
    }

    pub fn advance_time(&mut self) {
        match self {
            GridEnvironment::Beacon(env) => env.advance_time(),
            GridEnvironment::Foraging(env) => env.advance_time(),
        }
    }

    pub fn time(&self) -> u32 {
        match self {
            GridEnvironment::Beacon(env) => env.time(),
            GridEnvironment::Foraging(env) => env.time(),
        }
    }

    pub fn is_episode_finished(&self) -> bool {
        match self {
            GridEnvironment::Beacon(env) => env.is_episode_finished(),
            GridEnvironment::Foraging(env) => env.is_episode_finished(),
        }
    }

    /// Beacon success rate; `None` for foraging.
    pub fn success_rate(&self) -> Option<f64> {
        match self {
            GridEnvironment::Beacon(env) => Some(env.success_rate()),
            GridEnvironment::Foraging(_) => None,
        }
    }

    /// Resources delivered this episode; `None` for the beacon task.
    pub fn total_delivered(&self) -> Option<u32> {
        match self {
            GridEnvironment::Beacon(_) => None,
            GridEnvironment::Foraging(env) => Some(env.total_delivered()),
        }
    }

    /// Whether `agent` completed its task this episode, when the task has a
    /// per-agent completion.
    pub fn reached_goal(&self, agent: &Id) -> bool {
        match self {
            GridEnvironment::Beacon(env) => env.has_reached(agent),
            GridEnvironment::Foraging(_) => false,
        }
    }

    /// Whether `agent` holds a resource; always false for the beacon task.
    pub fn is_carrying(&self, agent: &Id) -> bool {
        match self {
            GridEnvironment::Beacon(_) => false,
            GridEnvironment::Foraging(env) => env.is_carrying(agent),
        }
    }

    /// Per-agent distance to the beacon; empty for foraging.
    pub fn final_distances(&self) -> BTreeMap<Id, u32> {
        match self {
            GridEnvironment::Beacon(env) => env.final_distances(),
            GridEnvironment::Foraging(_) => BTreeMap::new(),
        }
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        match self {
            GridEnvironment::Beacon(env) => env.snapshot(),
            GridEnvironment::Foraging(env) => env.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BeaconConfig, ForagingConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn render_beacon_grid() {
        let config = EnvironmentConfig::Beacon(BeaconConfig {
            width: 3,
            height: 2,
            beacon: Some(Cell::new(2, 1)),
            walls: vec![Cell::new(1, 0)],
            ..BeaconConfig::default()
        });
        let mut env = GridEnvironment::from_config(&config, 10).unwrap();
        env.register_agents(&["x".to_string()]);
        let spawns: BTreeMap<Id, Cell> = [("x".to_string(), Cell::new(0, 0))].into_iter().collect();
        let snapshot = env.reset(&spawns, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(snapshot.render_ascii(), "x#.\n..B\n");
    }

    #[test]
    fn shared_cell_renders_at_sign() {
        let config = EnvironmentConfig::Foraging(ForagingConfig {
            width: 2,
            height: 1,
            spawn_at_nest: true,
            ..ForagingConfig::default()
        });
        let mut env = GridEnvironment::from_config(&config, 10).unwrap();
        env.register_agents(&["a".to_string(), "b".to_string()]);
        let snapshot = env
            .reset(&BTreeMap::new(), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(snapshot.render_ascii(), "@.\n");
        assert!(env.is_episode_finished());
        assert_eq!(env.total_delivered(), Some(0));
        assert_eq!(env.success_rate(), None);
    }
}
