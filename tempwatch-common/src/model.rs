//! Data model for the sink's two tables.
//!
//! The sink stores one row per monitored host in `computers` and one row per
//! sensor observation in `temperature_readings`. The agent only ever inserts
//! readings and upserts/patches its own host row; rows are owned by the sink
//! once submitted.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Online/offline state of a monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    /// Get the string representation stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A row of the `computers` table as returned by the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Computer {
    /// Sink-generated key.
    pub id: String,
    /// Hostname, unique across the table.
    pub name: String,
    pub ip_address: String,
    pub status: HostStatus,
    /// ISO-8601 timestamp of the last heartbeat.
    pub last_seen: String,
}

/// Payload for inserting a new `computers` row (the sink generates `id`).
#[derive(Debug, Clone, Serialize)]
pub struct NewComputer {
    pub name: String,
    pub ip_address: String,
    pub status: HostStatus,
    pub last_seen: String,
}

impl NewComputer {
    /// Build a registration payload with status online and `last_seen` now.
    pub fn online(name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            status: HostStatus::Online,
            last_seen: now_iso8601(),
        }
    }
}

/// A row of the `temperature_readings` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Foreign key to the host's `computers` row.
    pub computer_id: String,
    pub sensor_name: String,
    /// Temperature in degrees Celsius, rounded to one decimal place.
    pub temperature: f64,
    /// ISO-8601 capture timestamp, shared by all readings of a cycle.
    pub timestamp: String,
}

impl Reading {
    /// Create a reading, rounding the value to one decimal place.
    pub fn new(
        computer_id: impl Into<String>,
        sensor_name: impl Into<String>,
        temperature: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            computer_id: computer_id.into(),
            sensor_name: sensor_name.into(),
            temperature: round_temperature(temperature),
            timestamp: timestamp.into(),
        }
    }
}

/// Round a temperature to one decimal place, the sink's column precision.
pub fn round_temperature(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Current UTC time as an ISO-8601 string with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
