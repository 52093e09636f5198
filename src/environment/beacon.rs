//! Beacon-seeking world: every agent tries to reach one fixed target cell.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use tracing::debug;

use super::grid::Grid;
use super::{AgentSnapshot, EnvironmentSnapshot, StepOutcome};
use crate::config::BeaconConfig;
use crate::error::{Result, SimError};
use crate::observation::{CellContent, GoalReading, Observation, Sensor};
use crate::reward::{BeaconRewards, RewardComputer};
use crate::types::{Action, Cell};
use crate::Id;

/// Beacon environment state.
///
/// Agents that reach the beacon are frozen there for the rest of the episode
/// and receive a neutral reward on further steps.
#[derive(Debug, Clone)]
pub struct BeaconEnv {
    grid: Grid,
    beacon: Cell,
    rewards: BeaconRewards,
    /// Step ceiling used by the efficiency term of the arrival bonus.
    max_steps: u32,
    agent_ids: Vec<Id>,
    positions: BTreeMap<Id, Cell>,
    reached: BTreeSet<Id>,
    /// `step` calls per agent this episode.
    steps_taken: BTreeMap<Id, u32>,
    time: u32,
}

impl BeaconEnv {
    pub fn new(config: &BeaconConfig, max_steps: u32) -> Result<Self> {
        let grid = Grid::new(config.width, config.height, &config.walls)?;
        let beacon = config.beacon_cell();
        grid.check_feature("beacon", beacon)?;
        Ok(Self {
            grid,
            beacon,
            rewards: config.rewards,
            max_steps,
            agent_ids: Vec::new(),
            positions: BTreeMap::new(),
            reached: BTreeSet::new(),
            steps_taken: BTreeMap::new(),
            time: 0,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn beacon(&self) -> Cell {
        self.beacon
    }

    pub fn register_agents(&mut self, ids: &[Id]) {
        self.agent_ids = ids.to_vec();
    }

    pub fn validate_spawn(&self, agent: &Id, cell: Cell) -> Result<()> {
        let reason = if !self.grid.in_bounds(cell) {
            "cell is outside the grid"
        } else if self.grid.is_wall(cell) {
            "cell is a wall"
        } else if cell == self.beacon {
            "cell is the beacon"
        } else {
            return Ok(());
        };
        Err(SimError::InvalidSpawn {
            agent: agent.clone(),
            cell,
            reason,
        })
    }

    pub fn reset<R: Rng>(&mut self, spawns: &BTreeMap<Id, Cell>, rng: &mut R) -> Result<()> {
        for (agent, cell) in spawns {
            self.validate_spawn(agent, *cell)?;
        }
        let reserved: BTreeSet<Cell> = [self.beacon].into_iter().collect();
        self.positions = self
            .grid
            .place_agents(&self.agent_ids, spawns, &reserved, rng)?;
        self.reached.clear();
        self.steps_taken = self.agent_ids.iter().map(|id| (id.clone(), 0)).collect();
        self.time = 0;
        debug!(
            agents = self.agent_ids.len(),
            beacon = %self.beacon,
            "beacon environment reset"
        );
        Ok(())
    }

    fn position(&self, agent: &Id) -> Result<Cell> {
        self.positions
            .get(agent)
            .copied()
            .ok_or_else(|| SimError::UnknownAgent(agent.clone()))
    }

    pub fn observe(&self, agent: &Id, sensors: &[Sensor]) -> Result<Observation> {
        let position = self.position(agent)?;
        let mut obs = Observation::bare(position, self.grid.width, self.grid.height);
        for sensor in sensors {
            match sensor {
                Sensor::Vision { radius } => {
                    obs.vision = Some(self.grid.vision(position, *radius, |cell| {
                        if cell == self.beacon {
                            CellContent::Beacon
                        } else if self.occupied_by_other(agent, cell) {
                            CellContent::Agent
                        } else {
                            CellContent::Empty
                        }
                    }));
                }
                Sensor::Beacon => obs.beacon = Some(GoalReading::between(position, self.beacon)),
                Sensor::Nest | Sensor::Carrying | Sensor::NearestResource => {}
            }
        }
        Ok(obs)
    }

    fn occupied_by_other(&self, agent: &Id, cell: Cell) -> bool {
        self.positions
            .iter()
            .any(|(id, pos)| id != agent && *pos == cell)
    }

    pub fn step(&mut self, agent: &Id, action: Action) -> Result<StepOutcome> {
        let position = self.position(agent)?;
        if self.reached.contains(agent) {
            return Ok(StepOutcome::neutral(true));
        }
        let steps = self.steps_taken.entry(agent.clone()).or_insert(0);
        *steps += 1;
        let steps = *steps;

        let shaping = self.rewards.shaping();
        if !action.is_move() {
            return Ok(StepOutcome::running(RewardComputer::idle(&shaping)));
        }
        let target = position.offset(action);
        if !self.grid.is_passable(target) {
            return Ok(StepOutcome::running(RewardComputer::blocked(&shaping)));
        }
        self.positions.insert(agent.clone(), target);

        if target == self.beacon {
            self.reached.insert(agent.clone());
            let reward = RewardComputer::beacon_arrival(&self.rewards, steps, self.max_steps);
            debug!(agent = %agent, steps, reward, "agent reached the beacon");
            return Ok(StepOutcome {
                reward,
                terminated: true,
            });
        }
        let reward = RewardComputer::movement(
            &shaping,
            Some(position.manhattan(&self.beacon)),
            Some(target.manhattan(&self.beacon)),
        );
        Ok(StepOutcome::running(reward))
    }

    pub fn advance_time(&mut self) {
        self.time += 1;
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    /// True once every registered agent has reached the beacon.
    pub fn is_episode_finished(&self) -> bool {
        self.agent_ids.iter().all(|id| self.reached.contains(id))
    }

    pub fn has_reached(&self, agent: &Id) -> bool {
        self.reached.contains(agent)
    }

    /// Fraction of registered agents that reached the beacon.
    pub fn success_rate(&self) -> f64 {
        if self.agent_ids.is_empty() {
            return 0.0;
        }
        self.reached.len() as f64 / self.agent_ids.len() as f64
    }

    /// Manhattan distance of every agent to the beacon.
    pub fn final_distances(&self) -> BTreeMap<Id, u32> {
        self.positions
            .iter()
            .map(|(id, pos)| (id.clone(), pos.manhattan(&self.beacon)))
            .collect()
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            width: self.grid.width,
            height: self.grid.height,
            time: self.time,
            walls: self.grid.walls().copied().collect(),
            beacon: Some(self.beacon),
            nest: None,
            resources: Vec::new(),
            agents: self
                .positions
                .iter()
                .map(|(id, pos)| {
                    (
                        id.clone(),
                        AgentSnapshot {
                            position: *pos,
                            carrying: None,
                            reached: Some(self.reached.contains(id)),
                        },
                    )
                })
                .collect(),
        }
    }
}
