//! Registry of live viewer sessions
//!
//! Broadcast iterates a copy of the handle list, so sessions that connect
//! during a broadcast join on the next one and sessions removed mid-broadcast
//! are at worst sent one frame into a closed queue.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::world::EntityId;

pub type SessionId = Uuid;

/// Encoded outbound frame, shared by every session in a broadcast
pub type Frame = Arc<str>;

/// Registry-side handle for one session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Entity steered by single-target messages from this session
    pub entity_id: EntityId,
    outbound: mpsc::Sender<Frame>,
}

/// Per-session delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    #[error("Outbound queue full")]
    Backpressure,

    #[error("Session closed")]
    Closed,
}

impl SessionHandle {
    pub fn new(id: SessionId, entity_id: EntityId, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            entity_id,
            outbound,
        }
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Frame) -> Result<(), SendFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}

/// Delivery counts for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Frames dropped because the session queue was full
    pub dropped: usize,
    /// Sessions found closed and removed
    pub closed: usize,
}

/// Live session set
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session. Returns false if the id was already present.
    pub fn add(&self, handle: SessionHandle) -> bool {
        let id = handle.id;
        let inserted = self.sessions.insert(id, handle).is_none();
        debug!(session_id = %id, sessions = self.sessions.len(), "Session registered");
        inserted
    }

    /// Deregister a session. Removing an absent id is a no-op returning false.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, sessions = self.sessions.len(), "Session deregistered");
        }
        removed
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy of the current session list
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Visit every session registered at the time of the call
    pub fn for_each(&self, mut f: impl FnMut(&SessionHandle)) {
        for handle in self.handles() {
            f(&handle);
        }
    }

    /// Queue `frame` for every session; one session's failure never affects another
    pub fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.for_each(|handle| match handle.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(SendFailure::Backpressure) => {
                warn!(session_id = %handle.id, "Outbound queue full, dropping frame");
                report.dropped += 1;
            }
            Err(SendFailure::Closed) => {
                if self.remove(&handle.id) {
                    debug!(session_id = %handle.id, "Removed closed session during broadcast");
                }
                report.closed += 1;
            }
        });
        report
    }
}
