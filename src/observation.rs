//! Sensors and per-agent observations.
//!
//! An [`Observation`] is assembled by the environment from its state and the
//! requesting agent's installed [`Sensor`]s. Optional fields are populated
//! only when the matching sensor is installed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Action, Cell, Direction};

/// Capability descriptor installed on an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sensor {
    /// Square window of cells around the agent.
    Vision { radius: u32 },
    /// Direction and offset to the beacon.
    Beacon,
    /// Absolute nest position.
    Nest,
    /// Whether the agent carries a resource.
    Carrying,
    /// Direction and offset to the Manhattan-nearest resource.
    NearestResource,
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensor::Vision { radius } => write!(f, "vision(r={})", radius),
            Sensor::Beacon => write!(f, "beacon"),
            Sensor::Nest => write!(f, "nest"),
            Sensor::Carrying => write!(f, "carrying"),
            Sensor::NearestResource => write!(f, "nearest_resource"),
        }
    }
}

/// What an agent sees in a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellContent {
    Empty,
    /// Impassable cell or outside the grid.
    Wall,
    Beacon,
    Nest,
    Resource,
    Agent,
}

impl CellContent {
    pub fn symbol(&self) -> char {
        match self {
            CellContent::Empty => '.',
            CellContent::Wall => '#',
            CellContent::Beacon => 'B',
            CellContent::Nest => 'N',
            CellContent::Resource => '*',
            CellContent::Agent => 'A',
        }
    }
}

/// Local view of `(2r+1)²` cells centred on the agent, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vision {
    pub radius: u32,
    pub cells: Vec<CellContent>,
}

impl Vision {
    /// Side length of the window.
    pub fn side(&self) -> usize {
        2 * self.radius as usize + 1
    }

    /// Content at offset `(dx, dy)` from the agent, if inside the window.
    pub fn at(&self, dx: i32, dy: i32) -> Option<CellContent> {
        let r = self.radius as i32;
        if dx.abs() > r || dy.abs() > r {
            return None;
        }
        let idx = (dy + r) as usize * self.side() + (dx + r) as usize;
        self.cells.get(idx).copied()
    }

    /// Content of the cell the agent would enter with `action`.
    pub fn toward(&self, action: Action) -> Option<CellContent> {
        let (dx, dy) = action.delta();
        self.at(dx, dy)
    }

    /// Wall flags for the four moves, in [`Action::MOVES`] order.
    pub fn wall_flags(&self) -> [bool; 4] {
        Action::MOVES.map(|a| self.toward(a) == Some(CellContent::Wall))
    }

    /// Resource flags for the four moves, in [`Action::MOVES`] order.
    pub fn resource_flags(&self) -> [bool; 4] {
        Action::MOVES.map(|a| self.toward(a) == Some(CellContent::Resource))
    }
}

/// Reading of a goal relative to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalReading {
    pub direction: Direction,
    /// `(goal.x - agent.x, goal.y - agent.y)`.
    pub offset: (i32, i32),
}

impl GoalReading {
    pub fn between(from: Cell, to: Cell) -> Self {
        Self {
            direction: from.direction_to(&to),
            offset: (to.x - from.x, to.y - from.y),
        }
    }

    /// Reading used when no goal exists.
    pub fn none() -> Self {
        Self {
            direction: Direction::Here,
            offset: (0, 0),
        }
    }
}

/// Ephemeral per-agent, per-step view of the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub position: Cell,
    pub grid_width: u32,
    pub grid_height: u32,
    pub vision: Option<Vision>,
    pub beacon: Option<GoalReading>,
    pub nest: Option<Cell>,
    pub carrying: Option<bool>,
    /// Nearest resource; `None` when the sensor is absent or no resource remains.
    pub nearest_resource: Option<GoalReading>,
}

impl Observation {
    /// Observation carrying only position and grid size.
    pub fn bare(position: Cell, grid_width: u32, grid_height: u32) -> Self {
        Self {
            position,
            grid_width,
            grid_height,
            vision: None,
            beacon: None,
            nest: None,
            carrying: None,
            nearest_resource: None,
        }
    }

    /// Position scaled to `[0, 1]²`.
    pub fn normalized_position(&self) -> (f64, f64) {
        let w = self.grid_width.saturating_sub(1).max(1) as f64;
        let h = self.grid_height.saturating_sub(1).max(1) as f64;
        (self.position.x as f64 / w, self.position.y as f64 / h)
    }

    pub fn is_carrying(&self) -> bool {
        self.carrying.unwrap_or(false)
    }

    /// Reading toward the current sub-goal.
    ///
    /// Beacon when sensed; otherwise the nest while carrying and the nearest
    /// resource when not.
    pub fn goal(&self) -> Option<GoalReading> {
        if let Some(beacon) = self.beacon {
            return Some(beacon);
        }
        if self.is_carrying() {
            return self.nest.map(|nest| GoalReading::between(self.position, nest));
        }
        self.nearest_resource
    }

    /// True when vision reports a wall in `direction`.
    pub fn blocked_toward(&self, direction: Direction) -> bool {
        match (direction.action(), &self.vision) {
            (Some(action), Some(vision)) => vision.toward(action) == Some(CellContent::Wall),
            _ => false,
        }
    }
}
