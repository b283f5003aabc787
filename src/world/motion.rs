//! Grid motion model
//!
//! Entities move one cell per step toward their target. The axis with the
//! larger remaining distance advances; on a tie both axes advance together.
//! Paths therefore minimise Chebyshev distance rather than following a
//! straight Euclidean line, which is the intended grid-stepping behavior.

use serde::{Deserialize, Serialize};

/// A cell on the world grid, `[row, col]` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct Position {
    pub row: i64,
    pub col: i64,
}

impl Position {
    pub const ORIGIN: Position = Position { row: 0, col: 0 };

    pub const fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// Number of steps needed to reach `other` under [`step`]
    pub fn chebyshev(&self, other: &Position) -> u64 {
        // Spans between any two i64 coordinates fit in u64
        let (dr, dc) = delta(self, other);
        dr.unsigned_abs().max(dc.unsigned_abs()) as u64
    }
}

impl From<[i64; 2]> for Position {
    fn from([row, col]: [i64; 2]) -> Self {
        Self { row, col }
    }
}

impl From<Position> for [i64; 2] {
    fn from(pos: Position) -> Self {
        [pos.row, pos.col]
    }
}

/// Per-axis distance, widened so the full i64 range cannot overflow
fn delta(from: &Position, to: &Position) -> (i128, i128) {
    (
        i128::from(to.row) - i128::from(from.row),
        i128::from(to.col) - i128::from(from.col),
    )
}

/// Compute one step from `current` toward `target`
pub fn step(current: Position, target: Position) -> Position {
    let (dr, dc) = delta(&current, &target);
    // A nonzero sign only points toward the target, so the result stays in range
    let (sr, sc) = (dr.signum() as i64, dc.signum() as i64);

    match dr.abs().cmp(&dc.abs()) {
        std::cmp::Ordering::Greater => Position::new(current.row + sr, current.col),
        std::cmp::Ordering::Less => Position::new(current.row, current.col + sc),
        std::cmp::Ordering::Equal => Position::new(current.row + sr, current.col + sc),
    }
}
