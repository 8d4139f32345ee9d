//! The agent's polling loop and lifecycle.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tempwatch_common::model::now_iso8601;

use crate::registrar::{Registrar, RegistrationError};
use crate::source::SensorSource;
use crate::uploader::Uploader;

/// Lifecycle states of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The poll-and-upload loop.
///
/// Owns the cadence and sequences registrar, source, and uploader calls.
/// A failure inside a cycle is logged and absorbed; only startup
/// registration failure terminates the agent.
pub struct Agent {
    registrar: Registrar,
    uploader: Uploader,
    source: Box<dyn SensorSource>,
    hostname: String,
    ip_address: String,
    poll_interval: Duration,
    state: AgentState,
}

impl Agent {
    pub fn new(
        registrar: Registrar,
        uploader: Uploader,
        source: Box<dyn SensorSource>,
        hostname: String,
        ip_address: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registrar,
            uploader,
            source,
            hostname,
            ip_address,
            poll_interval,
            state: AgentState::Starting,
        }
    }

    /// Run until the shutdown channel flips to `true`.
    ///
    /// Registers the host, then cycles read → upload → heartbeat on the
    /// poll interval. The interval is measured from cycle start (delayed
    /// missed-tick behavior), so drift stays bounded by one interval.
    /// Shutdown interrupts an in-progress sleep and always marks the host
    /// offline before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), RegistrationError> {
        let host_id = match self
            .registrar
            .ensure_registered(&self.hostname, &self.ip_address)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.state = AgentState::Stopped;
                return Err(e);
            }
        };

        self.state = AgentState::Running;
        info!(
            host = %self.hostname,
            host_id = %host_id,
            interval_secs = self.poll_interval.as_secs(),
            "agent running"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle(&host_id).await;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state = AgentState::Stopping;
        info!(host_id = %host_id, "marking host offline");

        if let Err(e) = self.registrar.mark_offline(&host_id).await {
            warn!(error = %e, "failed to mark host offline");
        }

        self.state = AgentState::Stopped;
        Ok(())
    }

    /// One cycle: capture timestamp, read, upload, heartbeat.
    ///
    /// A failed read skips the rest of the cycle; a failed upload drops the
    /// batch but still heartbeats (the agent is alive even when the readings
    /// table rejects). Nothing here can terminate the loop.
    async fn run_cycle(&mut self, host_id: &str) {
        let timestamp = now_iso8601();

        let readings = match self.source.read() {
            Ok(readings) => readings,
            Err(e) => {
                warn!(error = %e, "sensor read failed, skipping cycle");
                return;
            }
        };

        match self.uploader.send(host_id, &readings, &timestamp).await {
            Ok(count) => debug!(count, timestamp = %timestamp, "uploaded readings"),
            Err(e) => {
                warn!(error = %e, timestamp = %timestamp, "upload failed, dropping this cycle's batch")
            }
        }

        if let Err(e) = self.registrar.heartbeat(host_id).await {
            warn!(error = %e, "heartbeat failed");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.state
    }
}
