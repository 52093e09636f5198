//! Core grid types shared by environments and agents.
//!
//! Coordinates follow screen convention: `x` grows to the east, `y` grows to
//! the south, so [`Action::Up`] decrements `y`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A cell of the grid.
///
/// Deserializes from either `{ x, y }` or an `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "CellRepr")]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CellRepr {
    Pair(i32, i32),
    Named { x: i32, y: i32 },
}

impl From<CellRepr> for Cell {
    fn from(repr: CellRepr) -> Self {
        match repr {
            CellRepr::Pair(x, y) => Cell::new(x, y),
            CellRepr::Named { x, y } => Cell::new(x, y),
        }
    }
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another cell.
    pub fn manhattan(&self, other: &Cell) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Returns the neighbouring cell reached by `action` (unchecked).
    pub fn offset(&self, action: Action) -> Cell {
        let (dx, dy) = action.delta();
        Cell::new(self.x + dx, self.y + dy)
    }

    /// Coarse compass direction from `self` toward `target`.
    ///
    /// The horizontal axis is resolved first, then the vertical one;
    /// [`Direction::Here`] when both cells coincide.
    pub fn direction_to(&self, target: &Cell) -> Direction {
        if target.x > self.x {
            Direction::East
        } else if target.x < self.x {
            Direction::West
        } else if target.y > self.y {
            Direction::South
        } else if target.y < self.y {
            Direction::North
        } else {
            Direction::Here
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for Cell {
    fn from((x, y): (i32, i32)) -> Self {
        Cell::new(x, y)
    }
}

/// Relative compass direction reported by sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
    /// Already standing on the target (or no target exists).
    Here,
}

impl Direction {
    /// Returns all directions in a fixed order.
    pub fn all() -> [Direction; 5] {
        [
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
            Direction::Here,
        ]
    }

    pub fn index(&self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
            Direction::Here => 4,
        }
    }

    /// One-hot encoding as a 5-element vector.
    pub fn one_hot(&self) -> [f64; 5] {
        let mut v = [0.0; 5];
        v[self.index()] = 1.0;
        v
    }

    /// Movement that follows this direction; `None` for [`Direction::Here`].
    pub fn action(&self) -> Option<Action> {
        match self {
            Direction::North => Some(Action::Up),
            Direction::South => Some(Action::Down),
            Direction::East => Some(Action::Right),
            Direction::West => Some(Action::Left),
            Direction::Here => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::North => write!(f, "N"),
            Direction::South => write!(f, "S"),
            Direction::East => write!(f, "E"),
            Direction::West => write!(f, "W"),
            Direction::Here => write!(f, "-"),
        }
    }
}

/// Primitive action submitted to an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    Stay,
}

impl Action {
    /// The four movement actions.
    pub const MOVES: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

    /// All actions, movements first.
    pub const ALL: [Action; 5] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::Stay,
    ];

    /// Grid displacement `(dx, dy)` of this action.
    pub fn delta(&self) -> (i32, i32) {
        match self {
            Action::Up => (0, -1),
            Action::Down => (0, 1),
            Action::Left => (-1, 0),
            Action::Right => (1, 0),
            Action::Stay => (0, 0),
        }
    }

    pub fn is_move(&self) -> bool {
        !matches!(self, Action::Stay)
    }

    /// Direction of travel, [`Direction::Here`] for `Stay`.
    pub fn direction(&self) -> Direction {
        match self {
            Action::Up => Direction::North,
            Action::Down => Direction::South,
            Action::Left => Direction::West,
            Action::Right => Direction::East,
            Action::Stay => Direction::Here,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Up => write!(f, "up"),
            Action::Down => write!(f, "down"),
            Action::Left => write!(f, "left"),
            Action::Right => write!(f, "right"),
            Action::Stay => write!(f, "stay"),
        }
    }
}

/// Operating mode of an agent.
///
/// Learners only adapt their parameters in [`Mode::Learn`]; in [`Mode::Test`]
/// every learned structure is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Learn,
    #[default]
    Test,
}

impl Mode {
    pub fn is_learning(&self) -> bool {
        matches!(self, Mode::Learn)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Learn => write!(f, "learn"),
            Mode::Test => write!(f, "test"),
        }
    }
}
