//! WebSocket sessions, wire protocol and the live session registry

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use registry::{ConnectionRegistry, SessionHandle, SessionId};
pub use session::{Session, SessionBinding, SessionState};
