//! Tabular Q-learning with pluggable state abstraction.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Policy;
use crate::config::{ProblemKind, QLearnerConfig};
use crate::error::{Result, SimError};
use crate::observation::Observation;
use crate::types::{Action, Direction, Mode};

/// Discrete, hashable key of an abstracted observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(pub String);

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an observation is folded into a [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateAbstraction {
    /// Canonical JSON of the whole observation.
    Generic,
    /// Beacon direction plus the four wall flags.
    Beacon,
    /// Carrying flag, goal direction, on-goal flag and blocked-toward-goal flag.
    Foraging,
}

impl StateAbstraction {
    pub fn default_for(problem: ProblemKind) -> Self {
        match problem {
            ProblemKind::Beacon => StateAbstraction::Beacon,
            ProblemKind::Foraging => StateAbstraction::Foraging,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateAbstraction::Generic => "generic",
            StateAbstraction::Beacon => "beacon",
            StateAbstraction::Foraging => "foraging",
        }
    }

    /// Problem this encoding is tied to; `None` when it fits any.
    pub fn problem(&self) -> Option<ProblemKind> {
        match self {
            StateAbstraction::Generic => None,
            StateAbstraction::Beacon => Some(ProblemKind::Beacon),
            StateAbstraction::Foraging => Some(ProblemKind::Foraging),
        }
    }

    pub fn encode(&self, obs: &Observation) -> Result<StateKey> {
        let key = match self {
            StateAbstraction::Generic => serde_json::to_string(obs)?,
            StateAbstraction::Beacon => {
                let direction = obs.beacon.map(|b| b.direction).unwrap_or(Direction::Here);
                let walls = obs.vision.as_ref().map(|v| v.wall_flags()).unwrap_or([false; 4]);
                format!("{}|{}", direction, flags(&walls))
            }
            StateAbstraction::Foraging => {
                let goal = obs.goal();
                let direction = goal.map(|g| g.direction).unwrap_or(Direction::Here);
                let on_goal = goal.is_some_and(|g| g.offset == (0, 0));
                format!(
                    "{}|{}|{}|{}",
                    u8::from(obs.is_carrying()),
                    direction,
                    u8::from(on_goal),
                    u8::from(obs.blocked_toward(direction)),
                )
            }
        };
        Ok(StateKey(key))
    }
}

fn flags(bits: &[bool]) -> String {
    bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
}

/// Action-value table: state key → (action → value).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QTable {
    rows: BTreeMap<StateKey, BTreeMap<Action, f64>>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in state-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &BTreeMap<Action, f64>)> {
        self.rows.iter()
    }

    pub fn row(&self, state: &StateKey) -> Option<&BTreeMap<Action, f64>> {
        self.rows.get(state)
    }

    pub fn value(&self, state: &StateKey, action: Action) -> f64 {
        self.rows
            .get(state)
            .and_then(|row| row.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    fn ensure_row<F>(&mut self, state: &StateKey, init: F) -> &mut BTreeMap<Action, f64>
    where
        F: FnOnce() -> BTreeMap<Action, f64>,
    {
        self.rows.entry(state.clone()).or_insert_with(init)
    }

    /// Largest value of `state` over `actions`; 0 for unseen states.
    pub fn max_value(&self, state: &StateKey, actions: &[Action]) -> f64 {
        if actions.is_empty() {
            return 0.0;
        }
        actions
            .iter()
            .map(|a| self.value(state, *a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Order-independent hash of the table contents.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (state, row) in &self.rows {
            state.hash(&mut hasher);
            for (action, value) in row {
                action.hash(&mut hasher);
                value.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// ε-greedy tabular learner.
///
/// # Lifecycle
///
/// 1. [`Policy::select_action`] abstracts the observation, picks an action
///    and remembers the pending `(state, action)` pair.
/// 2. [`Policy::learn`] applies the one-step update against the
///    post-transition observation.
/// 3. [`Policy::begin_episode`] decays ε and α and clears the pending pair.
#[derive(Debug, Clone)]
pub struct QLearner {
    config: QLearnerConfig,
    abstraction: StateAbstraction,
    table: QTable,
    epsilon: f64,
    alpha: f64,
    pending: Option<(StateKey, Action)>,
}

impl QLearner {
    /// ε and α start at their configured values, raised to the floors if
    /// configured below them.
    pub fn new(config: QLearnerConfig, abstraction: StateAbstraction) -> Self {
        Self {
            epsilon: config.epsilon.max(config.epsilon_min),
            alpha: config.alpha.max(config.alpha_min),
            config,
            abstraction,
            table: QTable::new(),
            pending: None,
        }
    }

    /// Builds the learner for `problem`, loading `table_path` if configured.
    pub fn from_config(agent: &str, config: &QLearnerConfig, problem: ProblemKind) -> Result<Self> {
        let abstraction = config
            .abstraction
            .unwrap_or_else(|| StateAbstraction::default_for(problem));
        if let Some(required) = abstraction.problem() {
            if required != problem {
                return Err(SimError::ProblemMismatch {
                    agent: agent.to_string(),
                    kind: abstraction.name(),
                    problem: problem.name(),
                });
            }
        }
        let mut learner = Self::new(config.clone(), abstraction);
        if let Some(path) = &config.table_path {
            learner.load_table(path)?;
        }
        Ok(learner)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn abstraction(&self) -> StateAbstraction {
        self.abstraction
    }

    pub fn pending(&self) -> Option<&(StateKey, Action)> {
        self.pending.as_ref()
    }

    /// Initial row for a newly seen state: zeros, with the optional
    /// optimistic prior on the action pointing at the current goal.
    fn initial_row(&self, obs: &Observation) -> BTreeMap<Action, f64> {
        let mut row: BTreeMap<Action, f64> =
            self.config.actions.iter().map(|a| (*a, 0.0)).collect();
        if let Some(prior) = self.config.optimistic_prior {
            let toward = obs.goal().and_then(|g| g.direction.action());
            if let Some(action) = toward {
                if let Some(value) = row.get_mut(&action) {
                    *value = prior;
                }
            }
        }
        row
    }

    fn greedy(&self, state: &StateKey, rng: &mut StdRng) -> Action {
        let values: Vec<f64> = self
            .config
            .actions
            .iter()
            .map(|a| self.table.value(state, *a))
            .collect();
        let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<Action> = self
            .config
            .actions
            .iter()
            .zip(&values)
            .filter(|(_, v)| **v == best)
            .map(|(a, _)| *a)
            .collect();
        let pool = if tied.is_empty() {
            &self.config.actions
        } else {
            &tied
        };
        pool.choose(rng).copied().unwrap_or(Action::Stay)
    }

    pub fn save_table(&self, path: &Path) -> Result<()> {
        self.table.save(path)?;
        info!(path = %path.display(), states = self.table.len(), "q-table saved");
        Ok(())
    }

    pub fn load_table(&mut self, path: &Path) -> Result<()> {
        self.table = QTable::load(path)?;
        self.pending = None;
        info!(path = %path.display(), states = self.table.len(), "q-table loaded");
        Ok(())
    }
}

impl Policy for QLearner {
    fn select_action(&mut self, observation: &Observation, mode: Mode, rng: &mut StdRng) -> Result<Action> {
        let state = self.abstraction.encode(observation)?;
        if mode.is_learning() && self.table.row(&state).is_none() {
            let row = self.initial_row(observation);
            self.table.ensure_row(&state, || row);
        }
        let action = if mode.is_learning() && rng.gen::<f64>() < self.epsilon {
            self.config
                .actions
                .choose(rng)
                .copied()
                .unwrap_or(Action::Stay)
        } else {
            self.greedy(&state, rng)
        };
        self.pending = Some((state, action));
        Ok(action)
    }

    fn learn(&mut self, reward: f64, next: &Observation, mode: Mode) -> Result<()> {
        if !mode.is_learning() {
            return Ok(());
        }
        let Some((state, action)) = self.pending.take() else {
            return Ok(());
        };
        let next_state = self.abstraction.encode(next)?;
        if self.table.row(&next_state).is_none() {
            let row = self.initial_row(next);
            self.table.ensure_row(&next_state, || row);
        }
        let max_next = self.table.max_value(&next_state, &self.config.actions);
        let alpha = self.alpha;
        let gamma = self.config.gamma;
        let row = self.table.ensure_row(&state, BTreeMap::new);
        let q = row.entry(action).or_insert(0.0);
        *q += alpha * (reward + gamma * max_next - *q);
        Ok(())
    }

    fn begin_episode(&mut self, episode: u32, _total: u32, mode: Mode, _rng: &mut StdRng) {
        self.pending = None;
        if !mode.is_learning() || episode == 0 {
            return;
        }
        let accelerated = self
            .config
            .accelerate_after
            .is_some_and(|threshold| episode > threshold);
        let (eps_decay, alpha_decay) = if accelerated {
            (self.config.accelerated_decay, self.config.accelerated_decay)
        } else {
            (self.config.epsilon_decay, self.config.alpha_decay)
        };
        if self.epsilon > self.config.epsilon_min {
            self.epsilon = (self.epsilon * eps_decay).max(self.config.epsilon_min);
        }
        if self.alpha > self.config.alpha_min {
            self.alpha = (self.alpha * alpha_decay).max(self.config.alpha_min);
        }
        debug!(
            episode,
            epsilon = self.epsilon,
            alpha = self.alpha,
            "q-learner decayed"
        );
    }

    fn name(&self) -> &str {
        "q_learner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{CellContent, GoalReading, Vision};
    use crate::types::Cell;
    use rand::SeedableRng;

    fn beacon_obs(pos: Cell) -> Observation {
        let mut obs = Observation::bare(pos, 5, 5);
        obs.beacon = Some(GoalReading::between(pos, Cell::new(2, 2)));
        obs.vision = Some(Vision {
            radius: 1,
            cells: vec![CellContent::Empty; 9],
        });
        obs
    }

    fn learner() -> QLearner {
        QLearner::new(QLearnerConfig::default(), StateAbstraction::Beacon)
    }

    #[test]
    fn beacon_key_has_direction_and_walls() {
        let mut obs = beacon_obs(Cell::new(0, 2));
        if let Some(v) = obs.vision.as_mut() {
            v.cells[1] = CellContent::Wall;
        }
        let key = StateAbstraction::Beacon.encode(&obs).unwrap();
        assert_eq!(key.0, "E|1000");
    }

    #[test]
    fn foraging_key_reports_blocked_goal() {
        let mut obs = Observation::bare(Cell::new(1, 1), 3, 3);
        obs.carrying = Some(true);
        obs.nest = Some(Cell::new(0, 1));
        let mut cells = vec![CellContent::Empty; 9];
        cells[3] = CellContent::Wall;
        obs.vision = Some(Vision { radius: 1, cells });
        let key = StateAbstraction::Foraging.encode(&obs).unwrap();
        assert_eq!(key.0, "1|W|0|1");
    }

    #[test]
    fn foraging_key_separates_no_goal_from_on_goal() {
        let mut idle = Observation::bare(Cell::new(1, 1), 3, 3);
        idle.carrying = Some(false);
        let mut on_resource = idle.clone();
        on_resource.nearest_resource = Some(GoalReading::between(Cell::new(1, 1), Cell::new(1, 1)));

        let idle_key = StateAbstraction::Foraging.encode(&idle).unwrap();
        let on_key = StateAbstraction::Foraging.encode(&on_resource).unwrap();
        assert_eq!(idle_key.0, "0|-|0|0");
        assert_eq!(on_key.0, "0|-|1|0");
    }

    #[test]
    fn update_follows_bellman_rule() {
        let mut q = learner();
        let mut rng = StdRng::seed_from_u64(1);
        let obs = beacon_obs(Cell::new(0, 2));
        let action = q.select_action(&obs, Mode::Learn, &mut rng).unwrap();
        let state = StateAbstraction::Beacon.encode(&obs).unwrap();
        q.learn(1.0, &beacon_obs(Cell::new(1, 2)), Mode::Learn).unwrap();
        assert!((q.table().value(&state, action) - 0.4).abs() < 1e-12);
        assert!(q.pending().is_none());
    }

    #[test]
    fn test_mode_never_touches_table() {
        let mut q = learner();
        let mut rng = StdRng::seed_from_u64(1);
        let obs = beacon_obs(Cell::new(0, 0));
        q.select_action(&obs, Mode::Test, &mut rng).unwrap();
        q.learn(10.0, &obs, Mode::Test).unwrap();
        assert!(q.table().is_empty());
    }

    #[test]
    fn greedy_breaks_ties_among_best_only() {
        let mut q = learner();
        q.config.epsilon = 0.0;
        q.epsilon = 0.0;
        let obs = beacon_obs(Cell::new(0, 0));
        let state = StateAbstraction::Beacon.encode(&obs).unwrap();
        let row = q.table.ensure_row(&state, BTreeMap::new);
        row.insert(Action::Up, 1.0);
        row.insert(Action::Down, 1.0);
        row.insert(Action::Left, -1.0);
        row.insert(Action::Right, 0.5);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..30 {
            let a = q.select_action(&obs, Mode::Learn, &mut rng).unwrap();
            assert!(a == Action::Up || a == Action::Down);
        }
    }

    #[test]
    fn decay_respects_floors() {
        let config = QLearnerConfig {
            epsilon: 0.06,
            epsilon_decay: 0.5,
            alpha: 0.06,
            alpha_decay: 0.5,
            ..QLearnerConfig::default()
        };
        let mut q = QLearner::new(config, StateAbstraction::Beacon);
        let mut rng = StdRng::seed_from_u64(0);
        for ep in 1..5 {
            q.begin_episode(ep, 5, Mode::Learn, &mut rng);
        }
        assert_eq!(q.epsilon(), 0.05);
        assert_eq!(q.alpha(), 0.05);
    }

    #[test]
    fn accelerated_decay_after_threshold() {
        let config = QLearnerConfig {
            accelerate_after: Some(2),
            ..QLearnerConfig::default()
        };
        let mut q = QLearner::new(config, StateAbstraction::Beacon);
        let mut rng = StdRng::seed_from_u64(0);
        q.begin_episode(1, 10, Mode::Learn, &mut rng);
        let after_normal = q.epsilon();
        assert!((after_normal - 0.2 * 0.995).abs() < 1e-12);
        q.begin_episode(2, 10, Mode::Learn, &mut rng);
        q.begin_episode(3, 10, Mode::Learn, &mut rng);
        assert!((q.epsilon() - 0.2 * 0.995 * 0.995 * 0.98).abs() < 1e-12);
    }

    #[test]
    fn optimistic_prior_biases_goal_action() {
        let config = QLearnerConfig {
            optimistic_prior: Some(1.0),
            epsilon: 0.0,
            epsilon_min: 0.0,
            ..QLearnerConfig::default()
        };
        let mut q = QLearner::new(config, StateAbstraction::Beacon);
        let mut rng = StdRng::seed_from_u64(3);
        let obs = beacon_obs(Cell::new(0, 2));
        assert_eq!(
            q.select_action(&obs, Mode::Learn, &mut rng).unwrap(),
            Action::Right
        );
    }

    #[test]
    fn mismatched_abstraction_rejected() {
        let config = QLearnerConfig {
            abstraction: Some(StateAbstraction::Foraging),
            ..QLearnerConfig::default()
        };
        assert!(matches!(
            QLearner::from_config("q", &config, ProblemKind::Beacon),
            Err(SimError::ProblemMismatch { .. })
        ));
    }
}
