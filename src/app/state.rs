//! Application state shared across routes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::engine::{SnapshotBuilder, Ticker};
use crate::world::{WorldError, WorldState};
use crate::ws::registry::ConnectionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<WorldState>,
    pub registry: Arc<ConnectionRegistry>,
    pub snapshots: SnapshotBuilder,
    /// Ticks fired so far, shared with the ticker
    pub tick: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, WorldError> {
        let config = Arc::new(config);

        // Initialize world
        let world = Arc::new(WorldState::new(config.world));
        for (id, pos) in &config.seed_entities {
            world.seed(id.clone(), *pos);
        }
        if let Some(path) = &config.map_file {
            world.load_map_file(path)?;
        }
        info!(entities = world.len(), "World initialized");

        Ok(Self {
            snapshots: SnapshotBuilder::new(config.binding.shared_entity()),
            config,
            world,
            registry: Arc::new(ConnectionRegistry::new()),
            tick: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build the broadcast ticker over this state
    pub fn ticker(&self) -> Ticker {
        Ticker::new(
            self.config.tick_interval,
            self.world.clone(),
            self.registry.clone(),
            self.snapshots.clone(),
        )
        .with_tick_counter(self.tick.clone())
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }
}
