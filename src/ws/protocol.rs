//! WebSocket wire format
//!
//! Outbound frames are JSON objects tagged by `type`. Inbound frames are
//! plain JSON objects carrying a `target` (or legacy `pos`) field whose value
//! is either one `[row, col]` pair or an `{entity_id: [row, col]}` object.
//! Extra fields on inbound frames are ignored.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::world::{EntityId, Grid, Position, Snapshot};

/// Inbound field names accepted for a target, in lookup order
const TARGET_FIELDS: [&str; 2] = ["target", "pos"];

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full world state (sent every tick and once on connect)
    Snapshot {
        tick: u64,
        server_time: u64,
        /// Every entity position, keyed by entity id
        position: BTreeMap<EntityId, Position>,
        /// Position of the shared entity when sessions steer a single entity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Position>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<Arc<Grid>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counts: Option<Grid>,
    },

    /// Server is going away
    Shutdown,
}

impl ServerMsg {
    /// Build a snapshot frame, highlighting `shared_entity` as `pos` if given
    pub fn snapshot(
        tick: u64,
        server_time: u64,
        snapshot: Snapshot,
        shared_entity: Option<&str>,
    ) -> Self {
        let pos = shared_entity.and_then(|id| snapshot.positions.get(id).copied());
        ServerMsg::Snapshot {
            tick,
            server_time,
            position: snapshot.positions,
            pos,
            map: snapshot.map,
            counts: snapshot.counts,
        }
    }
}

/// Decoded client steering command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCommand {
    /// Target for the entity bound to the sending session
    Single(Position),
    /// Targets for arbitrary entities
    Multi(HashMap<EntityId, Position>),
}

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Missing target field")]
    MissingTarget,

    #[error("Invalid position for {field}: {reason}")]
    InvalidPosition { field: String, reason: String },

    #[error("Target must be a [row, col] pair or an object of pairs")]
    UnexpectedShape,
}

/// Encode an outbound message to a text frame
pub fn encode(msg: &ServerMsg) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode an inbound text frame into a steering command
pub fn decode(text: &str) -> Result<TargetCommand, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(CodecError::NotAnObject)?;

    let target = TARGET_FIELDS
        .iter()
        .find_map(|field| object.get(*field))
        .ok_or(CodecError::MissingTarget)?;

    match target {
        Value::Array(_) => parse_position("target", target).map(TargetCommand::Single),
        Value::Object(entries) => entries
            .iter()
            .map(|(id, pos)| parse_position(id, pos).map(|pos| (id.clone(), pos)))
            .collect::<Result<HashMap<_, _>, CodecError>>()
            .map(TargetCommand::Multi),
        _ => Err(CodecError::UnexpectedShape),
    }
}

fn parse_position(field: &str, value: &Value) -> Result<Position, CodecError> {
    Position::deserialize(value).map_err(|e| CodecError::InvalidPosition {
        field: field.to_string(),
        reason: e.to_string(),
    })
}
