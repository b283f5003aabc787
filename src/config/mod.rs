//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::rate_limit::DEFAULT_INPUT_RATE_LIMIT;
use crate::world::{EntityId, MotionMode, Position, UnknownEntityPolicy, WorldSettings};
use crate::ws::session::SessionBinding;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Broadcast period
    pub tick_interval: Duration,
    /// Upper bound on a single socket write
    pub send_timeout: Duration,
    /// Frames buffered per session before new ones are dropped
    pub outbound_queue: usize,
    /// Inbound messages allowed per second per session
    pub input_rate_limit: u32,
    /// Push a snapshot as soon as a viewer connects
    pub send_initial_snapshot: bool,

    pub world: WorldSettings,
    pub binding: SessionBinding,
    /// Entities present before any client connects
    pub seed_entities: Vec<(EntityId, Position)>,
    /// JSON grid shipped as the `map` field
    pub map_file: Option<PathBuf>,

    /// Allowed client origins for CORS; empty means any
    pub client_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // PORT wins for hosted deployments, then SERVER_ADDR, then the default
        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let motion_mode = match var("MOTION_MODE").as_deref() {
            None | Some("per_message") => MotionMode::PerMessage,
            Some("per_tick") => MotionMode::PerTick,
            Some(_) => return Err(ConfigError::Invalid("MOTION_MODE")),
        };

        let unknown_entity = match var("UNKNOWN_ENTITY").as_deref() {
            None | Some("create") => UnknownEntityPolicy::Create,
            Some("reject") => UnknownEntityPolicy::Reject,
            Some(_) => return Err(ConfigError::Invalid("UNKNOWN_ENTITY")),
        };

        let default_origin = match var("DEFAULT_ORIGIN") {
            Some(raw) => parse_position(&raw).ok_or(ConfigError::Invalid("DEFAULT_ORIGIN"))?,
            None => Position::ORIGIN,
        };

        let binding = match var("SESSION_BINDING").as_deref() {
            None | Some("shared") => {
                SessionBinding::Shared(var("SHARED_ENTITY_ID").unwrap_or_else(|| "0".to_string()))
            }
            Some("per_session") => SessionBinding::PerSession,
            Some(_) => return Err(ConfigError::Invalid("SESSION_BINDING")),
        };

        let seed_entities = match var("SEED_ENTITIES") {
            Some(raw) => parse_seeds(&raw).ok_or(ConfigError::Invalid("SEED_ENTITIES"))?,
            None => Vec::new(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            tick_interval: Duration::from_millis(parse_or(&var, "TICK_INTERVAL_MS", 600)?),
            send_timeout: Duration::from_millis(parse_or(&var, "SEND_TIMEOUT_MS", 250)?),
            outbound_queue: parse_or(&var, "OUTBOUND_QUEUE", 16)?,
            input_rate_limit: parse_or(&var, "INPUT_RATE_LIMIT", DEFAULT_INPUT_RATE_LIMIT)?,
            send_initial_snapshot: parse_or(&var, "SEND_INITIAL_SNAPSHOT", true)?,

            world: WorldSettings {
                motion_mode,
                unknown_entity,
                default_origin,
            },
            binding,
            seed_entities,
            map_file: var("MAP_FILE").map(PathBuf::from),

            client_origins: var("CLIENT_ORIGIN")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tick_interval: Duration::from_millis(600),
            send_timeout: Duration::from_millis(250),
            outbound_queue: 16,
            input_rate_limit: DEFAULT_INPUT_RATE_LIMIT,
            send_initial_snapshot: true,
            world: WorldSettings::default(),
            binding: SessionBinding::Shared("0".to_string()),
            seed_entities: Vec::new(),
            map_file: None,
            client_origins: Vec::new(),
        }
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// `row,col`
fn parse_position(raw: &str) -> Option<Position> {
    let (row, col) = raw.split_once(',')?;
    Some(Position::new(row.trim().parse().ok()?, col.trim().parse().ok()?))
}

/// `id@row,col;id@row,col`
fn parse_seeds(raw: &str) -> Option<Vec<(EntityId, Position)>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, pos) = entry.split_once('@')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some((id.to_string(), parse_position(pos)?))
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
