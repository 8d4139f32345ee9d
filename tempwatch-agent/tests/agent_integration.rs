//! Integration tests running the real sink client against an in-process
//! mock sink that mimics the REST database's `computers` and
//! `temperature_readings` tables.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::sync::watch;

use tempwatch_agent::agent::Agent;
use tempwatch_agent::config::SinkConfig;
use tempwatch_agent::registrar::Registrar;
use tempwatch_agent::sink::SinkClient;
use tempwatch_agent::source::{SensorSource, SourceError};
use tempwatch_agent::uploader::Uploader;

/// In-memory tables plus failure injection switches.
#[derive(Default)]
struct SinkData {
    computers: Vec<Value>,
    readings: Vec<Value>,
    next_id: u64,
    /// Make the next select-by-name return nothing even if the row exists,
    /// to force the insert path and exercise the uniqueness-conflict race.
    hide_from_select_once: bool,
    /// Reject reading inserts with a 500 while set.
    fail_reading_inserts: bool,
    /// Number of POSTs seen on the readings table.
    reading_requests: u64,
    /// Number of PATCHes that set status to offline.
    offline_marks: u64,
}

#[derive(Clone, Default)]
struct SinkState {
    inner: Arc<Mutex<SinkData>>,
}

fn filter_param(params: &HashMap<String, String>, column: &str) -> Option<String> {
    params
        .get(column)
        .and_then(|v| v.strip_prefix("eq."))
        .map(|v| v.to_string())
}

async fn get_computers(
    State(state): State<SinkState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut data = state.inner.lock().unwrap();

    if data.hide_from_select_once {
        data.hide_from_select_once = false;
        return axum::Json(json!([])).into_response();
    }

    let name = filter_param(&params, "name");
    let rows: Vec<Value> = data
        .computers
        .iter()
        .filter(|row| name.as_deref().is_none_or(|n| row["name"] == n))
        .cloned()
        .collect();

    axum::Json(Value::Array(rows)).into_response()
}

async fn post_computer(
    State(state): State<SinkState>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut data = state.inner.lock().unwrap();

    let name = body["name"].clone();
    if data.computers.iter().any(|row| row["name"] == name) {
        return (
            StatusCode::CONFLICT,
            axum::Json(json!({ "message": "duplicate key value violates unique constraint" })),
        )
            .into_response();
    }

    let mut row = body;
    row["id"] = json!(format!("host-{}", data.next_id));
    data.next_id += 1;
    data.computers.push(row.clone());

    (StatusCode::CREATED, axum::Json(json!([row]))).into_response()
}

async fn patch_computers(
    State(state): State<SinkState>,
    Query(params): Query<HashMap<String, String>>,
    axum::Json(patch): axum::Json<Value>,
) -> Response {
    let mut data = state.inner.lock().unwrap();

    if patch["status"] == "offline" {
        data.offline_marks += 1;
    }

    let id = filter_param(&params, "id");
    let name = filter_param(&params, "name");
    for row in data.computers.iter_mut() {
        let matches = id.as_deref().map_or(false, |v| row["id"] == v)
            || name.as_deref().map_or(false, |v| row["name"] == v);
        if !matches {
            continue;
        }
        if let Some(fields) = patch.as_object() {
            for (key, value) in fields {
                row[key.as_str()] = value.clone();
            }
        }
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn post_readings(
    State(state): State<SinkState>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let mut data = state.inner.lock().unwrap();
    data.reading_requests += 1;

    if data.fail_reading_inserts {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({ "message": "simulated outage" })),
        )
            .into_response();
    }

    if let Value::Array(rows) = body {
        data.readings.extend(rows);
    }

    StatusCode::CREATED.into_response()
}

/// Start the mock sink on an ephemeral port, returning its base URL.
async fn spawn_sink(state: SinkState) -> String {
    let app = Router::new()
        .route(
            "/rest/v1/computers",
            get(get_computers).post(post_computer).patch(patch_computers),
        )
        .route("/rest/v1/temperature_readings", post(post_readings))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn sink_client(base_url: &str) -> Arc<SinkClient> {
    Arc::new(
        SinkClient::new(&SinkConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            timeout_ms: 2_000,
        })
        .unwrap(),
    )
}

/// Sensor source with a fixed reading, optionally failing on demand.
struct ScriptedSource {
    fail: Arc<std::sync::atomic::AtomicBool>,
}

impl ScriptedSource {
    fn healthy() -> Self {
        Self {
            fail: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    fn failing() -> Self {
        Self {
            fail: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }
}

impl SensorSource for ScriptedSource {
    fn read(&mut self) -> Result<BTreeMap<String, f64>, SourceError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SourceError::Unavailable("scripted failure".to_string()));
        }
        Ok(BTreeMap::from([("CPU".to_string(), 46.2)]))
    }
}

fn build_agent(
    sink: Arc<SinkClient>,
    source: Box<dyn SensorSource>,
    poll_interval: Duration,
) -> Agent {
    Agent::new(
        Registrar::new(sink.clone()),
        Uploader::new(sink),
        source,
        "server01".to_string(),
        "10.0.0.1".to_string(),
        poll_interval,
    )
}

#[tokio::test]
async fn ensure_registered_is_idempotent() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let registrar = Registrar::new(sink_client(&base_url));

    let id1 = registrar
        .ensure_registered("server01", "10.0.0.1")
        .await
        .unwrap();
    let id2 = registrar
        .ensure_registered("server01", "10.0.0.2")
        .await
        .unwrap();

    assert_eq!(id1, id2);

    let data = state.inner.lock().unwrap();
    assert_eq!(data.computers.len(), 1, "exactly one row per name");
    assert_eq!(data.computers[0]["status"], "online");
    // Second registration refreshed the stored IP.
    assert_eq!(data.computers[0]["ip_address"], "10.0.0.2");
}

#[tokio::test]
async fn registration_race_adopts_existing_row() {
    let state = SinkState::default();
    {
        let mut data = state.inner.lock().unwrap();
        data.computers.push(json!({
            "id": "host-0",
            "name": "server01",
            "ip_address": "10.0.0.9",
            "status": "online",
            "last_seen": "2024-01-01T00:00:00Z"
        }));
        data.next_id = 1;
        data.hide_from_select_once = true;
    }
    let base_url = spawn_sink(state.clone()).await;
    let registrar = Registrar::new(sink_client(&base_url));

    // Select misses, insert conflicts, re-query adopts the existing row.
    let id = registrar
        .ensure_registered("server01", "10.0.0.1")
        .await
        .unwrap();

    assert_eq!(id, "host-0");
    let data = state.inner.lock().unwrap();
    assert_eq!(data.computers.len(), 1, "race must not create a duplicate");
}

#[tokio::test]
async fn registration_fails_when_sink_unreachable() {
    // Nothing listens here.
    let registrar = Registrar::new(sink_client("http://127.0.0.1:1"));

    let result = registrar.ensure_registered("server01", "10.0.0.1").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn uploader_sends_one_row_per_reading_with_rounding() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let sink = sink_client(&base_url);
    let uploader = Uploader::new(sink);

    let readings = BTreeMap::from([
        ("CPU".to_string(), 45.67),
        ("CPU Package".to_string(), 48.34),
    ]);

    let count = uploader
        .send("host-0", &readings, "2024-01-01T00:00:00Z")
        .await
        .unwrap();
    assert_eq!(count, 2);

    let data = state.inner.lock().unwrap();
    assert_eq!(data.readings.len(), 2);
    for row in &data.readings {
        assert_eq!(row["computer_id"], "host-0");
        assert_eq!(row["timestamp"], "2024-01-01T00:00:00Z");
    }
    let by_name: HashMap<&str, f64> = data
        .readings
        .iter()
        .map(|r| (r["sensor_name"].as_str().unwrap(), r["temperature"].as_f64().unwrap()))
        .collect();
    assert_eq!(by_name["CPU"], 45.7);
    assert_eq!(by_name["CPU Package"], 48.3);
}

#[tokio::test]
async fn uploader_empty_batch_is_a_noop() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let uploader = Uploader::new(sink_client(&base_url));

    let count = uploader
        .send("host-0", &BTreeMap::new(), "2024-01-01T00:00:00Z")
        .await
        .unwrap();

    assert_eq!(count, 0);
    let data = state.inner.lock().unwrap();
    assert_eq!(data.reading_requests, 0, "no network call for an empty batch");
}

#[tokio::test]
async fn heartbeat_refreshes_last_seen() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let registrar = Registrar::new(sink_client(&base_url));

    let id = registrar
        .ensure_registered("server01", "10.0.0.1")
        .await
        .unwrap();
    let before = state.inner.lock().unwrap().computers[0]["last_seen"].clone();

    tokio::time::sleep(Duration::from_millis(10)).await;
    registrar.heartbeat(&id).await.unwrap();

    let data = state.inner.lock().unwrap();
    assert_eq!(data.computers[0]["status"], "online");
    assert_ne!(data.computers[0]["last_seen"], before);
}

#[tokio::test]
async fn agent_recovers_from_sink_outage() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let agent = build_agent(
        sink_client(&base_url),
        Box::new(ScriptedSource::healthy()),
        Duration::from_millis(50),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    // Let a few healthy cycles land.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let healthy_count = {
        let data = state.inner.lock().unwrap();
        assert!(!data.readings.is_empty(), "healthy cycles should upload");
        data.readings.len()
    };

    // Simulated outage: inserts fail, batches are dropped, agent survives.
    state.inner.lock().unwrap().fail_reading_inserts = true;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let during_outage = state.inner.lock().unwrap().readings.len();
    assert!(!handle.is_finished(), "outage must not crash the agent");

    // Sink recovers; uploads resume on the next cycle.
    state.inner.lock().unwrap().fail_reading_inserts = false;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_recovery = state.inner.lock().unwrap().readings.len();
    assert!(after_recovery > during_outage, "uploads should resume");
    assert!(after_recovery > healthy_count);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(state.inner.lock().unwrap().offline_marks, 1);
}

#[tokio::test]
async fn source_failure_skips_upload_but_keeps_running() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let agent = build_agent(
        sink_client(&base_url),
        Box::new(ScriptedSource::failing()),
        Duration::from_millis(50),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;

    {
        let data = state.inner.lock().unwrap();
        assert_eq!(data.reading_requests, 0, "failed reads must not upload");
    }
    assert!(!handle.is_finished(), "failed reads must not terminate the agent");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(state.inner.lock().unwrap().offline_marks, 1);
}

#[tokio::test]
async fn interrupt_during_sleep_marks_offline_once() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    // Long interval: the agent spends essentially all its time sleeping.
    let agent = build_agent(
        sink_client(&base_url),
        Box::new(ScriptedSource::healthy()),
        Duration::from_secs(60),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    // Wait for the first cycle to complete, then interrupt mid-sleep.
    for _ in 0..100 {
        if !state.inner.lock().unwrap().readings.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!state.inner.lock().unwrap().readings.is_empty());

    shutdown_tx.send(true).unwrap();

    // Shutdown must interrupt the sleep, not wait out the interval.
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("shutdown should be prompt");
    result.unwrap().unwrap();

    let data = state.inner.lock().unwrap();
    assert_eq!(data.offline_marks, 1, "exactly one offline mark");
    assert_eq!(data.computers[0]["status"], "offline");
}

#[tokio::test]
async fn agent_registers_before_first_cycle() {
    let state = SinkState::default();
    let base_url = spawn_sink(state.clone()).await;
    let agent = build_agent(
        sink_client(&base_url),
        Box::new(ScriptedSource::healthy()),
        Duration::from_millis(50),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(120)).await;

    {
        let data = state.inner.lock().unwrap();
        assert_eq!(data.computers.len(), 1);
        assert_eq!(data.computers[0]["name"], "server01");
        assert_eq!(data.readings[0]["sensor_name"], "CPU");
        assert_eq!(data.readings[0]["temperature"], 46.2);
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn agent_exits_with_error_when_registration_fails() {
    let agent = build_agent(
        sink_client("http://127.0.0.1:1"),
        Box::new(ScriptedSource::healthy()),
        Duration::from_millis(50),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = agent.run(shutdown_rx).await;
    assert!(result.is_err(), "startup registration failure is fatal");
}
