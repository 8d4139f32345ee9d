//! REST client for the sink's `computers` and `temperature_readings` tables.
//!
//! The sink speaks PostgREST conventions: rows are addressed with
//! `?column=eq.value` filters, inserts are POSTed as JSON, and
//! `Prefer: return=representation` asks for the created rows back.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use tempwatch_common::model::{Computer, NewComputer, Reading};

use crate::config::SinkConfig;

/// Errors from the sink REST layer.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sink rejected a row because of a uniqueness conflict.
    #[error("unique constraint conflict")]
    Conflict,

    /// The sink returned a non-2xx status code.
    #[error("sink rejected request ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for diagnostics.
        body: String,
    },

    /// The sink answered 2xx but the body was not the expected shape.
    #[error("unexpected sink response: {0}")]
    Decode(String),
}

/// HTTP client for a single sink instance.
///
/// One long-lived client is constructed at startup and shared by the
/// registrar and uploader; reqwest pools connections underneath.
pub struct SinkClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SinkClient {
    /// Create a new sink client from configuration.
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Build a request with the sink's auth headers applied.
    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Look up a `computers` row by its unique name.
    pub async fn find_computer(&self, name: &str) -> Result<Option<Computer>, SinkError> {
        let response = self
            .request(reqwest::Method::GET, self.table_url("computers"))
            .query(&[("name", format!("eq.{}", name)), ("select", "*".to_string())])
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let rows: Vec<Computer> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    /// Insert a new `computers` row, returning the created row.
    ///
    /// A uniqueness violation on `name` surfaces as [`SinkError::Conflict`]
    /// so callers can resolve concurrent-registration races.
    pub async fn insert_computer(&self, computer: &NewComputer) -> Result<Computer, SinkError> {
        let response = self
            .request(reqwest::Method::POST, self.table_url("computers"))
            .header("Prefer", "return=representation")
            .json(computer)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        let rows: Vec<Computer> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SinkError::Decode("insert returned no row".to_string()))
    }

    /// Patch a `computers` row addressed by id.
    pub async fn update_computer_by_id(&self, id: &str, patch: &Value) -> Result<(), SinkError> {
        let response = self
            .request(reqwest::Method::PATCH, self.table_url("computers"))
            .query(&[("id", format!("eq.{}", id))])
            .json(patch)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Patch a `computers` row addressed by its unique name.
    pub async fn update_computer_by_name(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<(), SinkError> {
        let response = self
            .request(reqwest::Method::PATCH, self.table_url("computers"))
            .query(&[("name", format!("eq.{}", name))])
            .json(patch)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Insert a batch of readings in a single call.
    pub async fn insert_readings(&self, readings: &[Reading]) -> Result<(), SinkError> {
        let response = self
            .request(
                reqwest::Method::POST,
                self.table_url("temperature_readings"),
            )
            .header("Prefer", "return=minimal")
            .json(readings)
            .send()
            .await?;

        Self::check_status(response).await?;
        debug!(count = readings.len(), "inserted reading batch");
        Ok(())
    }

    /// Map non-success statuses to typed errors, keeping the body for logs.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::CONFLICT {
            return Err(SinkError::Conflict);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
