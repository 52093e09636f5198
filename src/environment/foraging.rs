//! Collect-and-deliver foraging world.
//!
//! Agents pick up a resource automatically when they stand on one while empty
//! handed and drop it automatically on the nest. The episode is finished once
//! no resource cell remains.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::grid::Grid;
use super::{AgentSnapshot, EnvironmentSnapshot, StepOutcome};
use crate::config::ForagingConfig;
use crate::error::{Result, SimError};
use crate::observation::{CellContent, GoalReading, Observation, Sensor};
use crate::reward::{ForagingRewards, RewardComputer};
use crate::types::{Action, Cell};
use crate::Id;

#[derive(Debug, Clone)]
pub struct ForagingEnv {
    grid: Grid,
    nest: Cell,
    initial_resources: BTreeSet<Cell>,
    random_resources: usize,
    spawn_at_nest: bool,
    rewards: ForagingRewards,
    agent_ids: Vec<Id>,
    resources: BTreeSet<Cell>,
    positions: BTreeMap<Id, Cell>,
    carrying: BTreeMap<Id, bool>,
    delivered: u32,
    time: u32,
}

impl ForagingEnv {
    pub fn new(config: &ForagingConfig) -> Result<Self> {
        let grid = Grid::new(config.width, config.height, &config.walls)?;
        grid.check_feature("nest", config.nest)?;
        let mut initial_resources = BTreeSet::new();
        for cell in &config.resources {
            grid.check_feature("resource", *cell)?;
            if *cell == config.nest {
                return Err(SimError::InvalidLayout(format!(
                    "resource {} is on the nest",
                    cell
                )));
            }
            if !initial_resources.insert(*cell) {
                return Err(SimError::InvalidLayout(format!(
                    "resource {} is listed twice",
                    cell
                )));
            }
        }
        Ok(Self {
            grid,
            nest: config.nest,
            resources: initial_resources.clone(),
            initial_resources,
            random_resources: config.random_resources,
            spawn_at_nest: config.spawn_at_nest,
            rewards: config.rewards,
            agent_ids: Vec::new(),
            positions: BTreeMap::new(),
            carrying: BTreeMap::new(),
            delivered: 0,
            time: 0,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn nest(&self) -> Cell {
        self.nest
    }

    pub fn resources(&self) -> &BTreeSet<Cell> {
        &self.resources
    }

    pub fn register_agents(&mut self, ids: &[Id]) {
        self.agent_ids = ids.to_vec();
    }

    pub fn validate_spawn(&self, agent: &Id, cell: Cell) -> Result<()> {
        let reason = if !self.grid.in_bounds(cell) {
            "cell is outside the grid"
        } else if self.grid.is_wall(cell) {
            "cell is a wall"
        } else {
            return Ok(());
        };
        Err(SimError::InvalidSpawn {
            agent: agent.clone(),
            cell,
            reason,
        })
    }

    /// Restores the resource layout, scatters random resources and places
    /// the agents.
    pub fn reset<R: Rng>(&mut self, spawns: &BTreeMap<Id, Cell>, rng: &mut R) -> Result<()> {
        for (agent, cell) in spawns {
            self.validate_spawn(agent, *cell)?;
        }
        self.resources = self.initial_resources.clone();

        if self.random_resources > 0 {
            let taken: BTreeSet<Cell> = spawns.values().copied().collect();
            let mut free: Vec<Cell> = self
                .grid
                .passable_cells()
                .into_iter()
                .filter(|c| *c != self.nest && !self.resources.contains(c) && !taken.contains(c))
                .collect();
            if free.len() < self.random_resources {
                return Err(SimError::InsufficientFreeCells {
                    needed: self.random_resources,
                    available: free.len(),
                });
            }
            free.shuffle(rng);
            self.resources
                .extend(free.into_iter().take(self.random_resources));
        }

        let mut effective = spawns.clone();
        if self.spawn_at_nest {
            for id in &self.agent_ids {
                effective.entry(id.clone()).or_insert(self.nest);
            }
        }
        let mut reserved = self.resources.clone();
        reserved.insert(self.nest);
        self.positions = self
            .grid
            .place_agents(&self.agent_ids, &effective, &reserved, rng)?;
        self.carrying = self.agent_ids.iter().map(|id| (id.clone(), false)).collect();
        self.delivered = 0;
        self.time = 0;
        debug!(
            agents = self.agent_ids.len(),
            resources = self.resources.len(),
            "foraging environment reset"
        );
        Ok(())
    }

    fn position(&self, agent: &Id) -> Result<Cell> {
        self.positions
            .get(agent)
            .copied()
            .ok_or_else(|| SimError::UnknownAgent(agent.clone()))
    }

    pub fn is_carrying(&self, agent: &Id) -> bool {
        self.carrying.get(agent).copied().unwrap_or(false)
    }

    /// Manhattan-nearest resource; ties go to the smallest cell.
    fn nearest_resource(&self, from: Cell) -> Option<Cell> {
        self.resources
            .iter()
            .min_by_key(|cell| from.manhattan(cell))
            .copied()
    }

    /// Distance from `cell` to the sub-goal implied by `carrying`.
    fn goal_distance(&self, cell: Cell, carrying: bool) -> Option<u32> {
        if carrying {
            Some(cell.manhattan(&self.nest))
        } else {
            self.nearest_resource(cell).map(|r| cell.manhattan(&r))
        }
    }

    pub fn observe(&self, agent: &Id, sensors: &[Sensor]) -> Result<Observation> {
        let position = self.position(agent)?;
        let mut obs = Observation::bare(position, self.grid.width, self.grid.height);
        for sensor in sensors {
            match sensor {
                Sensor::Vision { radius } => {
                    obs.vision = Some(self.grid.vision(position, *radius, |cell| {
                        if cell == self.nest {
                            CellContent::Nest
                        } else if self.resources.contains(&cell) {
                            CellContent::Resource
                        } else if self
                            .positions
                            .iter()
                            .any(|(id, pos)| id != agent && *pos == cell)
                        {
                            CellContent::Agent
                        } else {
                            CellContent::Empty
                        }
                    }));
                }
                Sensor::Nest => obs.nest = Some(self.nest),
                Sensor::Carrying => obs.carrying = Some(self.is_carrying(agent)),
                Sensor::NearestResource => {
                    obs.nearest_resource = self
                        .nearest_resource(position)
                        .map(|r| GoalReading::between(position, r));
                }
                Sensor::Beacon => {}
            }
        }
        Ok(obs)
    }

    pub fn step(&mut self, agent: &Id, action: Action) -> Result<StepOutcome> {
        let position = self.position(agent)?;
        let carrying = self.is_carrying(agent);
        let shaping = self.rewards.shaping();

        let mut reward = if action.is_move() {
            let target = position.offset(action);
            if !self.grid.is_passable(target) {
                return Ok(StepOutcome::running(RewardComputer::blocked(&shaping)));
            }
            let before = self.goal_distance(position, carrying);
            let after = self.goal_distance(target, carrying);
            self.positions.insert(agent.clone(), target);
            RewardComputer::movement(&shaping, before, after)
        } else {
            RewardComputer::idle(&shaping)
        };

        let here = self.position(agent)?;
        if !carrying && self.resources.remove(&here) {
            self.carrying.insert(agent.clone(), true);
            reward += self.rewards.pickup_bonus;
            debug!(agent = %agent, cell = %here, "resource picked up");
        } else if carrying && here == self.nest {
            self.carrying.insert(agent.clone(), false);
            self.delivered += 1;
            reward += self.rewards.delivery_bonus;
            debug!(agent = %agent, delivered = self.delivered, "resource delivered");
        }
        Ok(StepOutcome::running(reward))
    }

    pub fn advance_time(&mut self) {
        self.time += 1;
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    /// True once no resource cell remains.
    ///
    /// The last pick-up ends the episode, so the final resource is never
    /// delivered; it shows up as a carrying agent instead.
    pub fn is_episode_finished(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn total_delivered(&self) -> u32 {
        self.delivered
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            width: self.grid.width,
            height: self.grid.height,
            time: self.time,
            walls: self.grid.walls().copied().collect(),
            beacon: None,
            nest: Some(self.nest),
            resources: self.resources.iter().copied().collect(),
            agents: self
                .positions
                .iter()
                .map(|(id, pos)| {
                    (
                        id.clone(),
                        AgentSnapshot {
                            position: *pos,
                            carrying: Some(self.is_carrying(id)),
                            reached: None,
                        },
                    )
                })
                .collect(),
        }
    }
}
