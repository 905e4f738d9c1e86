//! `shooter_server`
//!
//! Server-side systems:
//! - Fixed timestep authoritative loop
//! - Character/session management per connected client
//! - Validates action requests, broadcasts responses to every participant
//! - Replicates equip/health/aim state (ragdoll too, when configured)
//!
//! Networking model:
//! - TCP: handshake, action relay, field replication
//! - UDP: aim plane (commands/snapshots)

pub mod server;

pub use server::GameServer;
