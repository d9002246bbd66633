use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, info, warn};

use weather_common::{
    ConnectivityGate, Dispatcher, FetchRequest, FetchScheduler, Page, RenderLock, ResponseEvents,
    RuntimeConfig, SystemClock, Transport, TransportError, WeatherConfig, Widgets, SENSOR_TOPICS,
    TOPIC_STATION_STATUS,
};

use crate::panel::PanelRenderer;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const RENDER_PERIOD_MS: u64 = 250;
const LINK_UP_DELAY_MS: u64 = 1_500;
const DEFAULT_HTTP_PORT: u16 = 8080;
const CHUNK_PATTERN: [usize; 4] = [7, 31, 64, 13];
const CONDITIONS: [&str; 4] = ["light rain", "overcast clouds", "clear sky", "scattered clouds"];

#[derive(Clone)]
struct AppState {
    ui: RenderLock,
    gate: Arc<ConnectivityGate>,
    started: Instant,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StationStatus {
    connected: bool,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
    #[serde(rename = "uptimeMs")]
    uptime_ms: u64,
    widgets: Widgets,
}

#[derive(Debug, Serialize)]
struct PageResponse {
    page: Page,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |name| std::env::var(name).ok());
    runtime.sanitize();

    if runtime.weather.api_key.is_empty() {
        warn!("WEATHER_API_KEY is not set; the simulated feed does not need it");
    }

    let ui = RenderLock::new(Widgets::new(
        &runtime.display,
        &runtime.weather.location_label,
    ));
    let gate = Arc::new(ConnectivityGate::new());
    let dispatcher = Dispatcher::new(ui.clone(), runtime.weather.location_label.clone());

    spawn_render_loop(ui.clone())?;
    spawn_fetch_loop(gate.clone(), dispatcher.clone(), &runtime.weather)?;
    spawn_link_simulation(gate.clone(), link_flap_period(|name| std::env::var(name).ok()));

    let mut mqtt_options = MqttOptions::new(
        "weather-station-rust",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    spawn_mqtt_loop(mqtt, dispatcher, eventloop);

    let app_state = AppState {
        ui,
        gate,
        started: Instant::now(),
    };
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/page/next", post(handle_page_next))
        .route("/api/page/prev", post(handle_page_prev))
        .fallback(handle_not_found)
        .with_state(app_state);

    let port = http_port(|name| std::env::var(name).ok());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind station server at {addr}"))?;

    info!("station listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("WEATHER_API_KEY") {
        runtime.weather.api_key = key;
    }
    if let Some(interval) = lookup("WEATHER_REFRESH_MS").and_then(|value| value.parse().ok()) {
        runtime.weather.refresh_interval_ms = interval;
    }
    if let Some(host) = lookup("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
}

fn http_port(lookup: impl Fn(&str) -> Option<String>) -> u16 {
    lookup("STATION_HTTP_PORT")
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_HTTP_PORT)
}

fn link_flap_period(lookup: impl Fn(&str) -> Option<String>) -> Option<Duration> {
    lookup("STATION_LINK_FLAP_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn spawn_link_simulation(gate: Arc<ConnectivityGate>, flap_period: Option<Duration>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(LINK_UP_DELAY_MS)).await;
        gate.set_connected();
        info!("simulated link up");

        let Some(period) = flap_period else {
            return;
        };
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            gate.clear_connected();
            warn!("simulated link dropped; reconnecting");
            tokio::time::sleep(Duration::from_millis(LINK_UP_DELAY_MS)).await;
            gate.set_connected();
            info!("simulated link up");
        }
    });
}

fn spawn_fetch_loop(
    gate: Arc<ConnectivityGate>,
    dispatcher: Dispatcher<RenderLock>,
    weather: &WeatherConfig,
) -> anyhow::Result<()> {
    let transport = SimulatedTransport::new(gate.clone(), weather.location_label.clone());
    let scheduler = FetchScheduler::new(gate, transport, dispatcher, SystemClock, weather);

    thread::Builder::new()
        .name("weather-fetch".into())
        .spawn(move || scheduler.run())
        .context("failed to spawn weather fetch thread")?;
    Ok(())
}

fn spawn_render_loop(ui: RenderLock) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("panel-render".into())
        .spawn(move || {
            let mut renderer = PanelRenderer::new();
            loop {
                if let Some(frame) = renderer.poll(&ui) {
                    info!(
                        page = frame.page.as_str(),
                        revision = frame.revision,
                        "{}",
                        frame.lines.join(" | ")
                    );
                }
                thread::sleep(Duration::from_millis(RENDER_PERIOD_MS));
            }
        })
        .context("failed to spawn panel render thread")?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in SENSOR_TOPICS {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    mqtt.publish(TOPIC_STATION_STATUS, QoS::AtLeastOnce, true, "online")
        .await?;
    Ok(())
}

fn spawn_mqtt_loop(mqtt: AsyncClient, dispatcher: Dispatcher<RenderLock>, mut eventloop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_sensor_message(&dispatcher, &message.topic, &message.payload);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = subscribe_topics(&mqtt).await {
                        warn!("mqtt subscribe failed: {err:#}");
                    }
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

fn handle_sensor_message(dispatcher: &Dispatcher<RenderLock>, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return;
    }

    if let Some(reading) = dispatcher.route_topic(topic, payload) {
        debug!("applied {:?} reading from {topic}", reading.kind());
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StationStatus {
        connected: state.gate.is_connected(),
        now_epoch: Utc::now().timestamp(),
        uptime_ms: state
            .started
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX),
        widgets: state.ui.snapshot(),
    })
}

async fn handle_page_next(State(state): State<AppState>) -> impl IntoResponse {
    Json(PageResponse {
        page: state.ui.swipe_next(),
    })
}

async fn handle_page_prev(State(state): State<AppState>) -> impl IntoResponse {
    Json(PageResponse {
        page: state.ui.swipe_prev(),
    })
}

async fn handle_not_found() -> impl IntoResponse {
    error_response(StatusCode::NOT_FOUND, "unknown endpoint")
}

struct SimulatedTransport {
    gate: Arc<ConnectivityGate>,
    location: String,
    cycle: u32,
}

impl SimulatedTransport {
    fn new(gate: Arc<ConnectivityGate>, location: String) -> Self {
        Self {
            gate,
            location,
            cycle: 0,
        }
    }
}

impl Transport for SimulatedTransport {
    fn perform(
        &mut self,
        request: &FetchRequest,
        events: &mut dyn ResponseEvents,
    ) -> Result<(), TransportError> {
        if !self.gate.is_connected() {
            return Err(TransportError::Connect("network is down".to_string()));
        }

        let body = canned_body(&self.location, self.cycle);
        self.cycle = self.cycle.wrapping_add(1);
        debug!(
            "serving {} simulated bytes for {}",
            body.len(),
            request.kind.as_str()
        );

        for chunk in uneven_chunks(body.as_bytes()) {
            events.on_data(request.kind, chunk, false);
        }
        events.on_finish(request.kind);
        Ok(())
    }
}

fn canned_body(location: &str, cycle: u32) -> String {
    let temperature = 14.0 + f64::from(cycle % 8) * 0.75;
    let description = CONDITIONS[cycle as usize % CONDITIONS.len()];
    serde_json::json!({
        "coord": { "lon": 30.13, "lat": 48.45 },
        "weather": [{ "id": 500, "main": "Clouds", "description": description, "icon": "04d" }],
        "base": "stations",
        "main": {
            "temp": temperature,
            "feels_like": temperature - 1.5,
            "pressure": 1012,
            "humidity": 81
        },
        "visibility": 10000,
        "wind": { "speed": 3.6, "deg": 250 },
        "name": location,
        "cod": 200
    })
    .to_string()
}

fn uneven_chunks(body: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    let mut rest = body;
    let mut index = 0;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let take = CHUNK_PATTERN[index % CHUNK_PATTERN.len()].min(rest.len());
        index += 1;
        let (head, tail) = rest.split_at(take);
        rest = tail;
        Some(head)
    })
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("WEATHER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.weather-station"));
        Self::with_dir(data_dir)
    }

    fn with_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use weather_common::{DisplayConfig, RequestKind, ResponseRouter};

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[derive(Default)]
    struct RecordedEvents {
        body: Vec<u8>,
        chunks: usize,
        finished: usize,
        disconnected: usize,
    }

    impl ResponseEvents for RecordedEvents {
        fn on_data(&mut self, _kind: RequestKind, chunk: &[u8], chunked: bool) {
            assert!(!chunked);
            self.body.extend_from_slice(chunk);
            self.chunks += 1;
        }

        fn on_finish(&mut self, _kind: RequestKind) {
            self.finished += 1;
        }

        fn on_disconnected(&mut self, _kind: RequestKind) {
            self.disconnected += 1;
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            kind: RequestKind::Weather,
            url: WeatherConfig::default().request_url(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn env_overrides_replace_stored_values() {
        let mut runtime = RuntimeConfig::default();
        apply_env_overrides(
            &mut runtime,
            lookup(&[
                ("WEATHER_API_KEY", "abc123"),
                ("MQTT_HOST", "broker.local"),
                ("MQTT_PORT", "not-a-port"),
                ("MQTT_USER", "station"),
            ]),
        );

        assert_eq!(runtime.weather.api_key, "abc123");
        assert_eq!(runtime.network.mqtt_host, "broker.local");
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.network.mqtt_user, "station");
        assert_eq!(runtime.network.mqtt_pass, "");
    }

    #[test]
    fn refresh_override_is_still_sanitized() {
        let mut runtime = RuntimeConfig::default();
        apply_env_overrides(&mut runtime, lookup(&[("WEATHER_REFRESH_MS", "5")]));
        runtime.sanitize();

        assert_eq!(runtime.weather.refresh_interval_ms, 60_000);
    }

    #[test]
    fn http_port_falls_back_to_default() {
        assert_eq!(http_port(lookup(&[])), DEFAULT_HTTP_PORT);
        assert_eq!(http_port(lookup(&[("STATION_HTTP_PORT", "9090")])), 9090);
        assert_eq!(http_port(lookup(&[("STATION_HTTP_PORT", "99999")])), DEFAULT_HTTP_PORT);
    }

    #[test]
    fn link_flap_requires_positive_period() {
        assert_eq!(link_flap_period(lookup(&[])), None);
        assert_eq!(link_flap_period(lookup(&[("STATION_LINK_FLAP_SECS", "0")])), None);
        assert_eq!(
            link_flap_period(lookup(&[("STATION_LINK_FLAP_SECS", "30")])),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn chunks_cover_body_in_order() {
        let body: Vec<u8> = (0..=200).collect();
        let chunks: Vec<&[u8]> = uneven_chunks(&body).collect();

        assert_eq!(chunks[0].len(), 7);
        assert_eq!(chunks[1].len(), 31);
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn simulated_transport_streams_whole_body() {
        let gate = Arc::new(ConnectivityGate::new());
        gate.set_connected();
        let mut transport = SimulatedTransport::new(gate, "Cherkassy".to_string());
        let mut events = RecordedEvents::default();

        transport.perform(&request(), &mut events).unwrap();

        assert!(events.chunks > 1);
        assert_eq!(events.finished, 1);
        assert_eq!(events.disconnected, 0);
        assert_eq!(events.body, canned_body("Cherkassy", 0).into_bytes());
    }

    #[test]
    fn simulated_transport_fails_while_link_is_down() {
        let gate = Arc::new(ConnectivityGate::new());
        let mut transport = SimulatedTransport::new(gate, "Cherkassy".to_string());
        let mut events = RecordedEvents::default();

        let result = transport.perform(&request(), &mut events);

        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(events.chunks, 0);
        assert_eq!(events.finished, 0);
    }

    #[test]
    fn simulated_body_reaches_widgets() {
        let gate = Arc::new(ConnectivityGate::new());
        gate.set_connected();
        let ui = RenderLock::new(Widgets::new(&DisplayConfig::default(), "Cherkassy"));
        let mut router = ResponseRouter::new(Dispatcher::new(ui.clone(), "Cherkassy"));
        let mut transport = SimulatedTransport::new(gate, "Kyiv".to_string());

        transport.perform(&request(), &mut router).unwrap();

        let widgets = ui.snapshot();
        assert_eq!(widgets.api_city, "Cherkassy");
        assert_eq!(widgets.api_temp, "14.0 °C");
        assert_eq!(widgets.api_description, "light rain");
    }

    #[test]
    fn sensor_messages_update_outdoor_tile() {
        let ui = RenderLock::new(Widgets::new(&DisplayConfig::default(), "Cherkassy"));
        let dispatcher = Dispatcher::new(ui.clone(), "Cherkassy");

        handle_sensor_message(
            &dispatcher,
            weather_common::TOPIC_SENSOR_OUTDOOR,
            br#"{"temp":-2.5,"humidity":90,"pressure":1020}"#,
        );
        handle_sensor_message(&dispatcher, "weather-station/unknown", b"{}");
        handle_sensor_message(
            &dispatcher,
            weather_common::TOPIC_SENSOR_OUTDOOR,
            &vec![b' '; MAX_MQTT_PAYLOAD_BYTES + 1],
        );

        let widgets = ui.snapshot();
        assert_eq!(widgets.outdoor_temp, "-2.5 °C");
        assert_eq!(widgets.outdoor_humidity, "Hum: 90%");
        assert_eq!(widgets.outdoor_pressure, "Prs: 1020 hPa");
        assert_eq!(widgets.revision, 1);
    }

    #[tokio::test]
    async fn missing_store_yields_defaults() {
        let dir = std::env::temp_dir().join(format!("weather-station-{}", std::process::id()));
        let store = AppStore::with_dir(dir.join("absent"));

        let runtime = store.load_runtime_config().await.unwrap();

        assert_eq!(runtime.weather.location_label, "Cherkassy");
        assert_eq!(runtime.display, DisplayConfig::default());
    }

    #[tokio::test]
    async fn stored_config_is_read_back() {
        let dir = std::env::temp_dir().join(format!("weather-station-store-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let mut runtime = RuntimeConfig::default();
        runtime.weather.location_label = "Uman".to_string();
        tokio::fs::write(dir.join("runtime.json"), serde_json::to_vec(&runtime).unwrap())
            .await
            .unwrap();

        let loaded = AppStore::with_dir(dir.clone()).load_runtime_config().await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();

        assert_eq!(loaded.weather.location_label, "Uman");
    }
}
