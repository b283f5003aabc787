//! Authoritative world state shared by sessions and the ticker
//!
//! Atomicity guarantees:
//! - every mutation of one entity holds that entity's shard lock for the whole
//!   read-step-write, so two writers on the same id never interleave
//! - [`WorldState::snapshot`] copies each entity under the same lock, so an
//!   entity is never observed half-written (per-entity consistency; the
//!   snapshot as a whole is not globally frozen)

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::motion::{step, Position};

/// Entity key, also used as the JSON object key on the wire
pub type EntityId = String;

/// 2D grid of terrain/category values
pub type Grid = Vec<Vec<i64>>;

/// How inbound targets turn into movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// Each target message moves the entity one step immediately
    #[default]
    PerMessage,
    /// Target messages set a standing target; the ticker moves one step per tick
    PerTick,
}

/// What to do with a target for an id that has never been seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownEntityPolicy {
    /// Create the entity at the default origin, then apply the target
    #[default]
    Create,
    /// Refuse the target with [`WorldError::UnknownEntity`]
    Reject,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorldSettings {
    pub motion_mode: MotionMode,
    pub unknown_entity: UnknownEntityPolicy,
    pub default_origin: Position,
}

/// Authoritative per-entity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub position: Position,
    /// Standing target, only used in [`MotionMode::PerTick`]
    pub target: Option<Position>,
}

impl Entity {
    pub fn at(position: Position) -> Self {
        Self {
            position,
            target: None,
        }
    }
}

/// Point-in-time copy of the world, detached from [`WorldState`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub positions: BTreeMap<EntityId, Position>,
    pub map: Option<Arc<Grid>>,
    /// Entities per map cell, present whenever `map` is
    pub counts: Option<Grid>,
}

/// Outcome of applying a multi-entity target command
#[derive(Debug, Default)]
pub struct TargetReport {
    pub applied: usize,
    pub errors: Vec<WorldError>,
}

/// World errors
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Failed to read map file: {0}")]
    MapIo(#[from] std::io::Error),

    #[error("Invalid map file: {0}")]
    MapFormat(#[from] serde_json::Error),
}

/// Shared entity table plus optional static map
pub struct WorldState {
    entities: DashMap<EntityId, Entity>,
    map: RwLock<Option<Arc<Grid>>>,
    settings: WorldSettings,
}

impl WorldState {
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            entities: DashMap::new(),
            map: RwLock::new(None),
            settings,
        }
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Place an entity, replacing any existing state for that id
    pub fn seed(&self, id: impl Into<EntityId>, position: Position) {
        self.entities.insert(id.into(), Entity::at(position));
    }

    pub fn set_map(&self, grid: Grid) {
        *self.map.write() = Some(Arc::new(grid));
    }

    /// Load a JSON 2D integer grid from disk and install it as the map
    pub fn load_map_file(&self, path: &Path) -> Result<(), WorldError> {
        let raw = std::fs::read_to_string(path)?;
        let grid: Grid = serde_json::from_str(&raw)?;
        debug!(rows = grid.len(), path = %path.display(), "Loaded world map");
        self.set_map(grid);
        Ok(())
    }

    pub fn position(&self, id: &str) -> Option<Position> {
        self.entities.get(id).map(|e| e.position)
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| *e)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Apply a target to one entity, creating it first if the policy allows.
    /// Returns the entity position after the update.
    pub fn apply_target(&self, id: &str, target: Position) -> Result<Position, WorldError> {
        let mut entity = match self.entities.entry(id.to_string()) {
            Entry::Occupied(occupied) => occupied.into_ref(),
            Entry::Vacant(vacant) => match self.settings.unknown_entity {
                UnknownEntityPolicy::Create => {
                    debug!(entity_id = %id, origin = ?self.settings.default_origin, "Creating entity on first target");
                    vacant.insert(Entity::at(self.settings.default_origin))
                }
                UnknownEntityPolicy::Reject => {
                    return Err(WorldError::UnknownEntity(id.to_string()));
                }
            },
        };

        match self.settings.motion_mode {
            MotionMode::PerMessage => {
                entity.position = step(entity.position, target);
            }
            MotionMode::PerTick => {
                entity.target = (entity.position != target).then_some(target);
            }
        }

        trace!(entity_id = %id, position = ?entity.position, target = ?target, "Applied target");
        Ok(entity.position)
    }

    /// Apply each target independently; a rejected id does not stop the rest
    pub fn apply_targets(&self, targets: &HashMap<EntityId, Position>) -> TargetReport {
        let mut report = TargetReport::default();
        for (id, target) in targets {
            match self.apply_target(id, *target) {
                Ok(_) => report.applied += 1,
                Err(e) => report.errors.push(e),
            }
        }
        report
    }

    /// Step every entity that has a standing target. Returns how many moved.
    pub fn advance_targets(&self) -> usize {
        let mut moved = 0;
        for mut entry in self.entities.iter_mut() {
            let Some(target) = entry.target else {
                continue;
            };
            entry.position = step(entry.position, target);
            if entry.position == target {
                entry.target = None;
            }
            moved += 1;
        }
        moved
    }

    /// Copy the current state for broadcast
    pub fn snapshot(&self) -> Snapshot {
        let positions: BTreeMap<EntityId, Position> = self
            .entities
            .iter()
            .map(|e| (e.key().clone(), e.position))
            .collect();

        let map = self.map.read().clone();
        let counts = map.as_deref().map(|grid| cell_counts(grid, positions.values()));

        Snapshot {
            positions,
            map,
            counts,
        }
    }
}

fn cell_counts<'a>(grid: &Grid, positions: impl Iterator<Item = &'a Position>) -> Grid {
    let mut counts: Grid = grid.iter().map(|row| vec![0; row.len()]).collect();
    for pos in positions {
        let (Ok(r), Ok(c)) = (usize::try_from(pos.row), usize::try_from(pos.col)) else {
            continue;
        };
        if let Some(cell) = counts.get_mut(r).and_then(|row| row.get_mut(c)) {
            *cell += 1;
        }
    }
    counts
}
