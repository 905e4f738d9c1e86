//! `shooter_client`
//!
//! Client-side systems:
//! - Connection management (reliable + unreliable channels)
//! - Input sampling and aim command generation
//! - One character replica per known actor; relayed responses applied
//!   locally so every node renders the same consequence
//! - Interpolation for remote aim states

pub mod client;
pub mod input;
pub mod interp;

pub use client::GameClient;
