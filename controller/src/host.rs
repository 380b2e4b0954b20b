use std::{
    collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use hvac_common::{
    mqtt_topic, ConfigError, ControlLoop, ControllerStatus, MovingAverageReader, PollingSensor,
    ThermostatConfig, ThermostatEvent, ThermostatMode, TOPIC_CONTROLLER_STATUS,
};

use crate::sim::{SimulatedProbe, SimulatedRoom, SimulationConfig};

type SimControlLoop = ControlLoop<MovingAverageReader<PollingSensor<SimulatedProbe>>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    pub simulation: SimulationConfig,
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    control: Arc<Mutex<SimControlLoop>>,
    room: SimulatedRoom,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    status: ControllerStatus,
    active: bool,
    #[serde(rename = "simTemp")]
    sim_temp: f64,
    #[serde(rename = "simDrift")]
    sim_drift: f64,
}

#[derive(Debug, Serialize)]
struct TargetView {
    target: f64,
}

#[derive(Debug, Serialize)]
struct ModeView {
    mode: ThermostatMode,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let runtime = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });

    let room = SimulatedRoom::new(&runtime.simulation);
    let control = build_control(&runtime.thermostat, &room)
        .context("invalid thermostat configuration")?;

    let mqtt_host = std::env::var("MQTT_HOST")
        .ok()
        .or(runtime.mqtt_host.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .or(runtime.mqtt_port)
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("hvac-controller-rust", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish controller online status")?;

    let app_state = AppState {
        control: Arc::new(Mutex::new(control)),
        room,
        mqtt,
    };

    spawn_mqtt_loop(eventloop);
    spawn_event_forwarder(app_state.clone()).await;

    let app = router(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let mut control = app_state.control.lock().await;
    control.stop();
    control.join().await;
    info!("controller stopped");
    Ok(())
}

fn build_control(
    config: &ThermostatConfig,
    room: &SimulatedRoom,
) -> Result<SimControlLoop, ConfigError> {
    let sensor = PollingSensor::new(room.probe(), &config.sensor);
    ControlLoop::smoothed(
        config.clone(),
        sensor,
        room.trigger("furnace"),
        room.trigger("ac"),
    )
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/start", post(handle_start))
        .route("/api/stop", post(handle_stop))
        .route("/api/target", get(handle_get_target).post(handle_set_target))
        .route("/api/mode", get(handle_get_mode).post(handle_set_mode))
        .route("/api/sim/drift", post(handle_set_drift))
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Publishes every event of every run, in run order.
async fn spawn_event_forwarder(app_state: AppState) {
    let mut runs = app_state.control.lock().await.follow_runs().await;

    tokio::spawn(async move {
        while let Some(mut subscription) = runs.recv().await {
            while let Some(event) = subscription.recv().await {
                publish_event(&app_state.mqtt, &event).await;
            }
            info!("event stream completed");
        }
    });
}

async fn publish_event(mqtt: &AsyncClient, event: &ThermostatEvent) {
    info!("{} : {}", event.topic_path(), event.message);

    let topic = mqtt_topic(&event.topic);
    if let Err(err) = mqtt
        .publish(topic, QoS::AtLeastOnce, false, event.message.clone())
        .await
    {
        warn!("event publish failed: {err}");
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let (status, active) = {
        let control = state.control.lock().await;
        (control.status().await, control.is_active())
    };

    Json(StatusView {
        status,
        active,
        sim_temp: state.room.temperature(),
        sim_drift: state.room.drift(),
    })
}

async fn handle_start(State(state): State<AppState>) -> impl IntoResponse {
    {
        let mut control = state.control.lock().await;
        control.start().await;
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_stop(State(state): State<AppState>) -> impl IntoResponse {
    {
        let mut control = state.control.lock().await;
        control.stop();
    }
    info!("control loop stop requested");
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_target(State(state): State<AppState>) -> impl IntoResponse {
    let target = state.control.lock().await.target().await;
    Json(TargetView { target })
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };
    if !target.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }

    state.control.lock().await.set_target(target).await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_mode(State(state): State<AppState>) -> impl IntoResponse {
    let mode = state.control.lock().await.mode().await;
    Json(ModeView { mode })
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<ThermostatMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    state.control.lock().await.set_mode(mode).await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_drift(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(drift) = params
        .get("value")
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|drift| drift.is_finite())
    else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid drift value");
    };

    state.room.set_drift(drift);
    handle_get_status(State(state)).await.into_response()
}

struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("HVAC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hvac"));

        Self {
            path: data_dir.join("config.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("malformed config at {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
