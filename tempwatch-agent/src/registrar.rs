//! Host identity registration and liveness updates.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use tempwatch_common::model::{HostStatus, NewComputer, now_iso8601};

use crate::sink::{SinkClient, SinkError};

/// Startup registration failed; without a host id no further work is possible.
#[derive(Debug, thiserror::Error)]
#[error("host registration failed: {0}")]
pub struct RegistrationError(#[from] pub SinkError);

/// A liveness update (heartbeat or offline mark) failed. Never fatal.
#[derive(Debug, thiserror::Error)]
#[error("liveness update failed: {0}")]
pub struct HeartbeatError(#[from] pub SinkError);

/// Keeps the host's `computers` row existing and current.
pub struct Registrar {
    sink: Arc<SinkClient>,
}

impl Registrar {
    pub fn new(sink: Arc<SinkClient>) -> Self {
        Self { sink }
    }

    /// Ensure a `computers` row exists for this host and return its id.
    ///
    /// If the row exists it is refreshed (status online, current IP and
    /// `last_seen`); otherwise a new row is inserted. The sink's uniqueness
    /// constraint on `name` is authoritative: losing an insert race to a
    /// concurrently starting agent resolves by re-querying, never by
    /// creating a duplicate.
    pub async fn ensure_registered(
        &self,
        name: &str,
        ip_address: &str,
    ) -> Result<String, RegistrationError> {
        if let Some(existing) = self.sink.find_computer(name).await? {
            self.sink
                .update_computer_by_name(
                    name,
                    &json!({
                        "status": HostStatus::Online,
                        "ip_address": ip_address,
                        "last_seen": now_iso8601(),
                    }),
                )
                .await?;

            info!(host = name, id = %existing.id, "refreshed host registration");
            return Ok(existing.id);
        }

        match self
            .sink
            .insert_computer(&NewComputer::online(name, ip_address))
            .await
        {
            Ok(created) => {
                info!(host = name, id = %created.id, "registered new host");
                Ok(created.id)
            }
            Err(SinkError::Conflict) => {
                // Another agent inserted the same name between our select
                // and insert; the existing row wins.
                let existing = self.sink.find_computer(name).await?.ok_or_else(|| {
                    SinkError::Decode(
                        "uniqueness conflict but no row found on re-query".to_string(),
                    )
                })?;
                info!(host = name, id = %existing.id, "lost registration race, adopting existing row");
                Ok(existing.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh the host's `last_seen` timestamp and online status.
    pub async fn heartbeat(&self, host_id: &str) -> Result<(), HeartbeatError> {
        self.sink
            .update_computer_by_id(
                host_id,
                &json!({
                    "last_seen": now_iso8601(),
                    "status": HostStatus::Online,
                }),
            )
            .await?;
        Ok(())
    }

    /// Mark the host offline. Best-effort, called once at shutdown.
    pub async fn mark_offline(&self, host_id: &str) -> Result<(), HeartbeatError> {
        self.sink
            .update_computer_by_id(host_id, &json!({ "status": HostStatus::Offline }))
            .await?;
        Ok(())
    }
}
