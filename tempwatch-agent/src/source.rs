//! Sensor sources for temperature readings.
//!
//! Two interchangeable strategies, selected by configuration:
//!
//! - [`LiveSource`] reads hardware temperature components through the
//!   `sysinfo` crate.
//! - [`FileExportSource`] parses the newest row of a CSV export that a
//!   monitoring tool refreshes on disk.
//!
//! Both return a name-to-Celsius mapping and discard anything that does not
//! normalize to a finite number.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sysinfo::Components;
use tracing::debug;

use crate::config::SourceConfig;

/// Error type for sensor reads.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("sensor source unavailable: {0}")]
    Unavailable(String),
}

/// A point-in-time provider of named temperature readings.
///
/// `read` is a pure observation; implementations must not carry side effects
/// beyond refreshing their own view of the hardware.
pub trait SensorSource: Send {
    fn read(&mut self) -> Result<BTreeMap<String, f64>, SourceError>;
}

/// Build the configured sensor source.
pub fn build(config: &SourceConfig) -> Box<dyn SensorSource> {
    match config {
        SourceConfig::Live => Box::new(LiveSource::new()),
        SourceConfig::FileExport { path } => Box::new(FileExportSource::new(path.clone())),
    }
}

/// Live hardware-monitoring source backed by `sysinfo` components.
pub struct LiveSource {
    components: Components,
}

impl LiveSource {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for LiveSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for LiveSource {
    fn read(&mut self) -> Result<BTreeMap<String, f64>, SourceError> {
        self.components.refresh(true);

        let mut readings = BTreeMap::new();
        for component in self.components.iter() {
            // Components without a readable sensor report no temperature.
            if let Some(temperature) = component.temperature() {
                let value = f64::from(temperature);
                if value.is_finite() {
                    readings.insert(component.label().to_string(), value);
                }
            }
        }

        if readings.is_empty() {
            return Err(SourceError::Unavailable(
                "no hardware temperature components reported a value".to_string(),
            ));
        }

        debug!(count = readings.len(), "read live temperature components");
        Ok(readings)
    }
}

/// Source that parses the last data row of a refreshed CSV export.
///
/// The export is expected to have a header row of sensor names followed by
/// data rows of values, newest last. Values may carry a trailing degree
/// suffix ("46.2 °C"); columns that do not normalize to a number (dates,
/// labels) are silently discarded.
pub struct FileExportSource {
    path: PathBuf,
}

impl FileExportSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SensorSource for FileExportSource {
    fn read(&mut self) -> Result<BTreeMap<String, f64>, SourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            SourceError::Unavailable(format!(
                "failed to read export file '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().ok_or_else(|| {
            SourceError::Unavailable(format!("export file '{}' is empty", self.path.display()))
        })?;

        let latest = lines.last().ok_or_else(|| {
            SourceError::Unavailable(format!(
                "export file '{}' has no data rows",
                self.path.display()
            ))
        })?;

        let mut readings = BTreeMap::new();
        for (name, raw) in header.split(',').zip(latest.split(',')) {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(value) = parse_temperature(raw) {
                readings.insert(name.to_string(), value);
            }
        }

        debug!(
            count = readings.len(),
            path = %self.path.display(),
            "parsed export file"
        );
        Ok(readings)
    }
}

/// Normalize a raw export field into a finite temperature value.
///
/// Strips a trailing degree-Celsius suffix before parsing. Returns `None`
/// for fields that are not numeric.
fn parse_temperature(raw: &str) -> Option<f64> {
    let trimmed = raw
        .trim()
        .trim_end_matches('C')
        .trim_end_matches('°')
        .trim();

    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}
