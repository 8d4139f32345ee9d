//! Host temperature monitoring agent.
//!
//! The agent registers the local machine in a remote REST sink, then polls a
//! sensor source on a fixed interval and uploads each cycle's readings as a
//! batch, refreshing the host's `last_seen` heartbeat as it goes. On shutdown
//! the host row is marked offline.
//!
//! # Sink tables
//!
//! ```text
//! computers             id | name (unique) | ip_address | status | last_seen
//! temperature_readings  computer_id | sensor_name | temperature | timestamp
//! ```

pub mod agent;
pub mod config;
pub mod registrar;
pub mod sink;
pub mod source;
pub mod uploader;
