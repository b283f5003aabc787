//! Snapshot building and encoding

use std::sync::Arc;

use crate::util::time::unix_millis;
use crate::world::{EntityId, WorldState};
use crate::ws::protocol::{self, CodecError, ServerMsg};
use crate::ws::registry::Frame;

/// Builds snapshot frames for network transmission
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    /// Entity echoed as `pos` when every session steers the same entity
    shared_entity: Option<EntityId>,
}

impl SnapshotBuilder {
    pub fn new(shared_entity: Option<EntityId>) -> Self {
        Self { shared_entity }
    }

    /// Build a snapshot message from the current world
    pub fn build(&self, tick: u64, world: &WorldState) -> ServerMsg {
        ServerMsg::snapshot(
            tick,
            unix_millis(),
            world.snapshot(),
            self.shared_entity.as_deref(),
        )
    }

    /// Build and encode a snapshot in one go
    pub fn encode(&self, tick: u64, world: &WorldState) -> Result<Frame, CodecError> {
        protocol::encode(&self.build(tick, world)).map(Arc::from)
    }
}

/// Running totals over broadcast frames, reported when the ticker stops
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub frames: u64,
    pub bytes: u64,
    pub largest_frame: usize,
    pub avg_entities: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, entity_count: usize, frame_len: usize) {
        self.frames += 1;
        self.bytes += frame_len as u64;
        self.largest_frame = self.largest_frame.max(frame_len);
        self.avg_entities += (entity_count as f32 - self.avg_entities) / self.frames as f32;
    }

    pub fn avg_frame_bytes(&self) -> u64 {
        self.bytes.checked_div(self.frames).unwrap_or(0)
    }
}
