//! Capture state owned by the background
//!
//! This module provides:
//! - The per-connection status machine and message log
//! - Tab records and the arena keyed by tab id
//! - Statistics over a tab record

pub mod connection;
pub mod statistics;
pub mod tab;

pub use connection::{Connection, ConnectionStatus, Message};
pub use statistics::{ConnectionStats, TabStatistics};
pub use tab::{ApplyOutcome, TabArena, TabRecord};
