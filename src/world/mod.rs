//! World model: grid motion and the shared entity table

pub mod motion;
pub mod state;

pub use motion::{step, Position};
pub use state::{
    Entity, EntityId, Grid, MotionMode, Snapshot, TargetReport, UnknownEntityPolicy, WorldError,
    WorldSettings, WorldState,
};
