//! Tick engine: periodic advance, snapshot and broadcast

pub mod snapshot;
pub mod ticker;

pub use snapshot::{SnapshotBuilder, SnapshotStats};
pub use ticker::{TickError, Ticker, TickerHandle, TickerState};

use crate::world::WorldState;

/// External simulation advanced once per tick before the snapshot is taken
pub trait Simulation: Send + Sync {
    fn advance(&self, world: &WorldState) -> Result<(), SimulationError>;
}

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulation advance failed: {0}")]
    Advance(String),
}
