//! Grid Sync Server - tick-driven world state broadcast
//!
//! Holds authoritative entity positions on a grid and streams full
//! snapshots to every connected viewer over WebSocket at a fixed cadence:
//! - `world`: grid motion model and the shared entity table
//! - `engine`: fixed-delay ticker, snapshot building, simulation hook
//! - `ws`: sessions, wire protocol and the connection registry
//! - `http`: router with `/ws`, `/health` and `/state`

pub mod app;
pub mod config;
pub mod engine;
pub mod http;
pub mod util;
pub mod world;
pub mod ws;
