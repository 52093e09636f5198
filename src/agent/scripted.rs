//! Fixed baseline policies.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::Policy;
use crate::config::ProblemKind;
use crate::error::Result;
use crate::observation::{CellContent, Observation};
use crate::types::{Action, Mode};

/// Library of hand-written decision functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedPolicy {
    /// Follows the beacon direction, random move when it is unknown.
    BeaconSeeker,
    /// Heads to the nest while carrying, otherwise to the nearest resource.
    Forager,
    /// Uniform over the four moves.
    #[default]
    Random,
    /// Never moves.
    Stay,
}

impl ScriptedPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptedPolicy::BeaconSeeker => "beacon_seeker",
            ScriptedPolicy::Forager => "forager",
            ScriptedPolicy::Random => "random",
            ScriptedPolicy::Stay => "stay",
        }
    }

    pub fn supports(&self, problem: ProblemKind) -> bool {
        match self {
            ScriptedPolicy::BeaconSeeker => problem == ProblemKind::Beacon,
            ScriptedPolicy::Forager => problem == ProblemKind::Foraging,
            ScriptedPolicy::Random | ScriptedPolicy::Stay => true,
        }
    }

    pub fn decide(&self, obs: &Observation, rng: &mut StdRng) -> Action {
        match self {
            ScriptedPolicy::BeaconSeeker => match obs.beacon {
                Some(reading) if reading.offset == (0, 0) => Action::Stay,
                Some(reading) => head_toward(obs, reading.offset, rng),
                None => random_move(rng),
            },
            ScriptedPolicy::Forager => forage(obs, rng),
            ScriptedPolicy::Random => random_move(rng),
            ScriptedPolicy::Stay => Action::Stay,
        }
    }
}

fn random_move(rng: &mut StdRng) -> Action {
    Action::MOVES.choose(rng).copied().unwrap_or(Action::Stay)
}

/// First move that shortens `offset` (horizontal axis first) and is not
/// visibly blocked; any open move otherwise.
fn head_toward(obs: &Observation, offset: (i32, i32), rng: &mut StdRng) -> Action {
    let (dx, dy) = offset;
    let mut preferred = Vec::with_capacity(2);
    if dx > 0 {
        preferred.push(Action::Right);
    } else if dx < 0 {
        preferred.push(Action::Left);
    }
    if dy > 0 {
        preferred.push(Action::Down);
    } else if dy < 0 {
        preferred.push(Action::Up);
    }
    if let Some(action) = preferred
        .into_iter()
        .find(|a| !obs.blocked_toward(a.direction()))
    {
        return action;
    }
    let open: Vec<Action> = Action::MOVES
        .into_iter()
        .filter(|a| !obs.blocked_toward(a.direction()))
        .collect();
    open.choose(rng).copied().unwrap_or_else(|| random_move(rng))
}

fn forage(obs: &Observation, rng: &mut StdRng) -> Action {
    if let Some(goal) = obs.goal() {
        if goal.offset != (0, 0) {
            return head_toward(obs, goal.offset, rng);
        }
    }
    if !obs.is_carrying() {
        if let Some(vision) = &obs.vision {
            let adjacent: Vec<Action> = Action::MOVES
                .into_iter()
                .filter(|a| vision.toward(*a) == Some(CellContent::Resource))
                .collect();
            if let Some(action) = adjacent.first() {
                return *action;
            }
        }
    }
    random_move(rng)
}

/// Stateless policy wrapper.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    policy: ScriptedPolicy,
}

impl ScriptedAgent {
    pub fn new(policy: ScriptedPolicy) -> Self {
        Self { policy }
    }

    pub fn kind(&self) -> ScriptedPolicy {
        self.policy
    }
}

impl Policy for ScriptedAgent {
    fn select_action(&mut self, observation: &Observation, _mode: Mode, rng: &mut StdRng) -> Result<Action> {
        Ok(self.policy.decide(observation, rng))
    }

    fn name(&self) -> &str {
        self.policy.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{GoalReading, Vision};
    use crate::types::Cell;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn seeker_prefers_horizontal_axis() {
        let mut obs = Observation::bare(Cell::new(0, 0), 5, 5);
        obs.beacon = Some(GoalReading::between(Cell::new(0, 0), Cell::new(2, 2)));
        assert_eq!(ScriptedPolicy::BeaconSeeker.decide(&obs, &mut rng()), Action::Right);
        obs.position = Cell::new(2, 0);
        obs.beacon = Some(GoalReading::between(Cell::new(2, 0), Cell::new(2, 2)));
        assert_eq!(ScriptedPolicy::BeaconSeeker.decide(&obs, &mut rng()), Action::Down);
    }

    #[test]
    fn seeker_sidesteps_visible_wall() {
        use CellContent::*;
        let mut obs = Observation::bare(Cell::new(1, 1), 5, 5);
        obs.beacon = Some(GoalReading::between(Cell::new(1, 1), Cell::new(3, 3)));
        obs.vision = Some(Vision {
            radius: 1,
            cells: vec![
                Empty, Empty, Empty, //
                Empty, Empty, Wall, //
                Empty, Empty, Empty,
            ],
        });
        assert_eq!(ScriptedPolicy::BeaconSeeker.decide(&obs, &mut rng()), Action::Down);
    }

    #[test]
    fn forager_returns_to_nest_when_carrying() {
        let mut obs = Observation::bare(Cell::new(2, 2), 3, 3);
        obs.nest = Some(Cell::new(0, 0));
        obs.carrying = Some(true);
        obs.nearest_resource = Some(GoalReading::none());
        assert_eq!(ScriptedPolicy::Forager.decide(&obs, &mut rng()), Action::Left);
    }

    #[test]
    fn forager_uses_adjacent_resource_without_reading() {
        use CellContent::*;
        let mut obs = Observation::bare(Cell::new(1, 1), 3, 3);
        obs.carrying = Some(false);
        obs.vision = Some(Vision {
            radius: 1,
            cells: vec![
                Empty, Empty, Empty, //
                Empty, Empty, Empty, //
                Empty, Resource, Empty,
            ],
        });
        assert_eq!(ScriptedPolicy::Forager.decide(&obs, &mut rng()), Action::Down);
    }

    #[test]
    fn stay_never_moves() {
        let obs = Observation::bare(Cell::new(0, 0), 2, 2);
        assert_eq!(ScriptedPolicy::Stay.decide(&obs, &mut rng()), Action::Stay);
    }

    #[test]
    fn random_only_moves() {
        let obs = Observation::bare(Cell::new(0, 0), 2, 2);
        let mut rng = rng();
        for _ in 0..20 {
            assert!(ScriptedPolicy::Random.decide(&obs, &mut rng).is_move());
        }
    }
}
