//! Per-connection session state and inbound dispatch

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::util::rate_limit::InputRateLimiter;
use crate::world::{EntityId, WorldError, WorldState};
use crate::ws::protocol::{self, CodecError, TargetCommand};
use crate::ws::registry::{ConnectionRegistry, Frame, SessionHandle, SessionId};

/// Which entity a session's single-target messages steer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBinding {
    /// Every session steers the same entity
    Shared(EntityId),
    /// Each session steers an entity keyed by its own session id
    PerSession,
}

impl SessionBinding {
    pub fn entity_for(&self, session_id: &SessionId) -> EntityId {
        match self {
            SessionBinding::Shared(id) => id.clone(),
            SessionBinding::PerSession => session_id.to_string(),
        }
    }

    /// Entity echoed as `pos` in snapshots, if all sessions share one
    pub fn shared_entity(&self) -> Option<EntityId> {
        match self {
            SessionBinding::Shared(id) => Some(id.clone()),
            SessionBinding::PerSession => None,
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Inbound message failures; the message is dropped and the session stays open
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Rate limited")]
    RateLimited,

    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error("Session is not open")]
    NotOpen,
}

/// Server-side state for one viewer connection
pub struct Session {
    id: SessionId,
    entity_id: EntityId,
    state: SessionState,
    world: Arc<WorldState>,
    registry: Arc<ConnectionRegistry>,
    limiter: InputRateLimiter,
}

impl Session {
    pub fn new(
        id: SessionId,
        entity_id: EntityId,
        world: Arc<WorldState>,
        registry: Arc<ConnectionRegistry>,
        limiter: InputRateLimiter,
    ) -> Self {
        Self {
            id,
            entity_id,
            state: SessionState::Connecting,
            world,
            registry,
            limiter,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Join the broadcast set; frames queued on `outbound` before this call go out first
    pub fn open(&mut self, outbound: mpsc::Sender<Frame>) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.registry
            .add(SessionHandle::new(self.id, self.entity_id.clone(), outbound));
        self.state = SessionState::Open;
        info!(session_id = %self.id, entity_id = %self.entity_id, "Session opened");
    }

    /// Decode one text frame and apply it. Returns how many entities were updated.
    pub fn handle_text(&self, text: &str) -> Result<usize, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen);
        }
        if !self.limiter.check() {
            return Err(SessionError::RateLimited);
        }

        match protocol::decode(text)? {
            TargetCommand::Single(target) => {
                let pos = self.world.apply_target(&self.entity_id, target)?;
                debug!(session_id = %self.id, entity_id = %self.entity_id, ?pos, "Applied target");
                Ok(1)
            }
            TargetCommand::Multi(targets) => {
                let report = self.world.apply_targets(&targets);
                for e in &report.errors {
                    warn!(session_id = %self.id, error = %e, "Rejected entity target");
                }
                debug!(session_id = %self.id, applied = report.applied, "Applied targets");
                Ok(report.applied)
            }
        }
    }

    /// Leave the broadcast set. Only the first call has any effect.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let was_open = self.state == SessionState::Open;
        self.state = SessionState::Closed;
        if was_open {
            self.registry.remove(&self.id);
            info!(session_id = %self.id, "Session closed");
        }
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Position, UnknownEntityPolicy, WorldSettings};
    use uuid::Uuid;

    fn session(policy: UnknownEntityPolicy) -> (Session, Arc<WorldState>, Arc<ConnectionRegistry>) {
        let world = Arc::new(WorldState::new(WorldSettings {
            unknown_entity: policy,
            ..WorldSettings::default()
        }));
        let registry = Arc::new(ConnectionRegistry::new());
        let session = Session::new(
            Uuid::new_v4(),
            "0".to_string(),
            world.clone(),
            registry.clone(),
            InputRateLimiter::new(1000),
        );
        (session, world, registry)
    }

    #[test]
    fn test_binding_entity_for() {
        let id = Uuid::new_v4();
        assert_eq!(SessionBinding::Shared("hero".into()).entity_for(&id), "hero");
        assert_eq!(SessionBinding::PerSession.entity_for(&id), id.to_string());
        assert_eq!(SessionBinding::PerSession.shared_entity(), None);
    }

    #[test]
    fn test_lifecycle_registers_and_releases_once() {
        let (mut session, _world, registry) = session(UnknownEntityPolicy::Create);
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(matches!(session.handle_text(r#"{"target": [1, 1]}"#), Err(SessionError::NotOpen)));

        session.open(tx);
        assert_eq!(session.state(), SessionState::Open);
        assert!(registry.contains(&session.id()));

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_releases_registry_entry() {
        let (mut session, _world, registry) = session(UnknownEntityPolicy::Create);
        let (tx, _rx) = mpsc::channel(1);
        session.open(tx);
        drop(session);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_message_keeps_session_usable() {
        let (mut session, world, _registry) = session(UnknownEntityPolicy::Create);
        let (tx, _rx) = mpsc::channel(1);
        session.open(tx);

        assert!(matches!(
            session.handle_text(r#"{"heading": [3, 0]}"#),
            Err(SessionError::Decode(CodecError::MissingTarget))
        ));
        assert_eq!(world.position("0"), None);

        assert_eq!(session.handle_text(r#"{"target": [3, 0]}"#).unwrap(), 1);
        assert_eq!(world.position("0"), Some(Position::new(1, 0)));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_extreme_target_moves_one_step() {
        let (mut session, world, _registry) = session(UnknownEntityPolicy::Create);
        let (tx, _rx) = mpsc::channel(1);
        session.open(tx);

        assert_eq!(session.handle_text(r#"{"target": [-9223372036854775808, 0]}"#).unwrap(), 1);
        assert_eq!(world.position("0"), Some(Position::new(-1, 0)));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_multi_target_applies_what_it_can() {
        let (mut session, world, _registry) = session(UnknownEntityPolicy::Reject);
        let (tx, _rx) = mpsc::channel(1);
        session.open(tx);
        world.seed("a", Position::ORIGIN);

        let applied = session
            .handle_text(r#"{"target": {"a": [0, 2], "missing": [1, 1]}}"#)
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(world.position("a"), Some(Position::new(0, 1)));

        assert!(matches!(
            session.handle_text(r#"{"target": [1, 1]}"#),
            Err(SessionError::World(WorldError::UnknownEntity(_)))
        ));
    }

    #[test]
    fn test_rate_limited_messages_are_refused() {
        let world = Arc::new(WorldState::new(WorldSettings::default()));
        let registry = Arc::new(ConnectionRegistry::new());
        let mut session = Session::new(
            Uuid::new_v4(),
            "0".to_string(),
            world.clone(),
            registry,
            InputRateLimiter::new(1),
        );
        let (tx, _rx) = mpsc::channel(1);
        session.open(tx);

        assert!(session.handle_text(r#"{"target": [2, 2]}"#).is_ok());
        assert!(matches!(
            session.handle_text(r#"{"target": [2, 2]}"#),
            Err(SessionError::RateLimited)
        ));
        assert_eq!(world.position("0"), Some(Position::new(1, 1)));
    }
}
