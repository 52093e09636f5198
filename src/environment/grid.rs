//! Grid geometry shared by both environments.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, SimError};
use crate::observation::{CellContent, Vision};
use crate::types::Cell;
use crate::Id;

/// Largest accepted grid side.
pub const MAX_SIDE: u32 = 4096;

/// Largest vision radius; larger requests are clamped.
pub const MAX_VISION_RADIUS: u32 = 32;

/// Rectangular grid with impassable cells.
#[derive(Debug, Clone)]
pub struct Grid {
    pub width: u32,
    pub height: u32,
    walls: BTreeSet<Cell>,
}

impl Grid {
    /// Creates a grid, rejecting empty or oversized dimensions and
    /// out-of-bounds walls.
    pub fn new(width: u32, height: u32, walls: &[Cell]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SimError::InvalidLayout(format!(
                "grid must be at least 1x1, got {}x{}",
                width, height
            )));
        }
        if width > MAX_SIDE || height > MAX_SIDE {
            return Err(SimError::InvalidLayout(format!(
                "grid sides are limited to {}, got {}x{}",
                MAX_SIDE, width, height
            )));
        }
        let grid = Self {
            width,
            height,
            walls: BTreeSet::new(),
        };
        let mut walls_set = BTreeSet::new();
        for wall in walls {
            if !grid.in_bounds(*wall) {
                return Err(SimError::InvalidLayout(format!(
                    "wall {} is outside the {}x{} grid",
                    wall, width, height
                )));
            }
            walls_set.insert(*wall);
        }
        Ok(Self {
            walls: walls_set,
            ..grid
        })
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < self.width && (cell.y as u32) < self.height
    }

    pub fn is_wall(&self, cell: Cell) -> bool {
        self.walls.contains(&cell)
    }

    /// In bounds and not a wall.
    pub fn is_passable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && !self.is_wall(cell)
    }

    pub fn walls(&self) -> impl Iterator<Item = &Cell> {
        self.walls.iter()
    }

    /// All passable cells in row-major order.
    pub fn passable_cells(&self) -> Vec<Cell> {
        let mut cells = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let cell = Cell::new(x, y);
                if !self.is_wall(cell) {
                    cells.push(cell);
                }
            }
        }
        cells
    }

    /// Checks that a fixed feature (beacon, nest, resource) is placeable.
    pub fn check_feature(&self, name: &str, cell: Cell) -> Result<()> {
        if !self.in_bounds(cell) {
            return Err(SimError::InvalidLayout(format!(
                "{} {} is outside the {}x{} grid",
                name, cell, self.width, self.height
            )));
        }
        if self.is_wall(cell) {
            return Err(SimError::InvalidLayout(format!(
                "{} {} is on a wall",
                name, cell
            )));
        }
        Ok(())
    }

    /// Places agents for a new episode.
    ///
    /// Explicit spawns (already validated by the caller) are honoured; the
    /// remaining agents receive distinct cells drawn uniformly from passable
    /// cells that are neither `reserved` nor taken by an explicit spawn.
    pub fn place_agents<R: Rng>(
        &self,
        agent_ids: &[Id],
        spawns: &BTreeMap<Id, Cell>,
        reserved: &BTreeSet<Cell>,
        rng: &mut R,
    ) -> Result<BTreeMap<Id, Cell>> {
        let mut positions = BTreeMap::new();
        let mut used = BTreeSet::new();
        for id in agent_ids {
            if let Some(cell) = spawns.get(id) {
                positions.insert(id.clone(), *cell);
                used.insert(*cell);
            }
        }

        let needed = agent_ids.len() - positions.len();
        if needed == 0 {
            return Ok(positions);
        }

        let mut free: Vec<Cell> = self
            .passable_cells()
            .into_iter()
            .filter(|c| !reserved.contains(c) && !used.contains(c))
            .collect();
        if free.len() < needed {
            return Err(SimError::InsufficientFreeCells {
                needed,
                available: free.len(),
            });
        }
        free.shuffle(rng);

        let mut free = free.into_iter();
        for id in agent_ids {
            if positions.contains_key(id) {
                continue;
            }
            // `free` holds at least `needed` cells.
            if let Some(cell) = free.next() {
                positions.insert(id.clone(), cell);
            }
        }
        Ok(positions)
    }

    /// Builds the vision window around `center`.
    ///
    /// Cells outside the grid and walls read as [`CellContent::Wall`]; every
    /// other cell is classified by `content`.
    pub fn vision<F>(&self, center: Cell, radius: u32, content: F) -> Vision
    where
        F: Fn(Cell) -> CellContent,
    {
        let radius = radius.min(MAX_VISION_RADIUS);
        let side = 2 * radius as usize + 1;
        let r = radius as i32;
        let mut cells = Vec::with_capacity(side * side);
        for dy in -r..=r {
            for dx in -r..=r {
                let cell = Cell::new(center.x + dx, center.y + dy);
                if !self.is_passable(cell) {
                    cells.push(CellContent::Wall);
                } else {
                    cells.push(content(cell));
                }
            }
        }
        Vision { radius, cells }
    }
}
