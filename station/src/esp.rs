use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::Read,
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    io::EspIOError,
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    netif::IpEvent,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{EspWifi, WifiEvent},
};
use log::{debug, info, warn};

use weather_common::{
    config::NetworkConfig, ConnectivityGate, Dispatcher, FetchRequest, FetchScheduler,
    RenderLock, ResponseEvents, RuntimeConfig, SystemClock, Transport, TransportError, Widgets,
    SENSOR_TOPICS, TOPIC_STATION_STATUS,
};

use crate::panel::PanelRenderer;

const NVS_NAMESPACE: &str = "weather";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const READ_CHUNK_SIZE: usize = 512;
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const RENDER_PERIOD_MS: u64 = 100;
const FETCH_STACK_SIZE: usize = 12 * 1024;

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut runtime = match nvs_store.load_runtime_config() {
        Ok(Some(runtime)) => runtime,
        Ok(None) => {
            let mut runtime = RuntimeConfig::default();
            ensure_build_defaults(&mut runtime);
            if let Err(err) = nvs_store.save_runtime_config(&runtime) {
                warn!("failed to seed runtime config in NVS: {err:#}");
            }
            runtime
        }
        Err(err) => {
            warn!("failed to load runtime config from NVS: {err:#}");
            RuntimeConfig::default()
        }
    };
    ensure_build_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, mqtt=`{}:{}`, location=`{}`",
        runtime.network.wifi_ssid,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
        runtime.weather.location_label,
    );
    if runtime.weather.api_key.is_empty() {
        warn!("no OpenWeather API key configured; requests will be rejected");
    }

    let gate = Arc::new(ConnectivityGate::new());

    let wifi_gate = gate.clone();
    let _wifi_subscription = sys_loop.subscribe::<WifiEvent, _>(move |event| match event {
        WifiEvent::StaStarted => request_wifi_connect(),
        WifiEvent::StaDisconnected(_) => {
            wifi_gate.clear_connected();
            warn!("wifi disconnected; reconnecting");
            request_wifi_connect();
        }
        _ => {}
    })?;

    let ip_gate = gate.clone();
    let _ip_subscription = sys_loop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(_) = event {
            info!("network reachable");
            ip_gate.set_connected();
        }
    })?;

    let Peripherals { modem, .. } = Peripherals::take()?;
    let wifi = start_wifi(modem, sys_loop.clone(), nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    let ui = RenderLock::new(Widgets::new(
        &runtime.display,
        &runtime.weather.location_label,
    ));
    let dispatcher = Dispatcher::new(ui.clone(), runtime.weather.location_label.clone());

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    spawn_render_loop(ui)?;

    let scheduler = FetchScheduler::new(
        gate,
        EspHttpTransport,
        dispatcher.clone(),
        SystemClock,
        &runtime.weather,
    );
    thread::Builder::new()
        .name("weather-fetch".into())
        .stack_size(FETCH_STACK_SIZE)
        .spawn(move || scheduler.run())
        .context("failed to spawn weather fetch thread")?;

    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network)?;
    let mqtt_client = Arc::new(Mutex::new(mqtt_client));
    spawn_mqtt_receiver(dispatcher, mqtt_conn, mqtt_client.clone())?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _mqtt = mqtt_client;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_build_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }

    if runtime.weather.api_key.is_empty() {
        if let Some(key) = option_env!("WEATHER_API_KEY") {
            runtime.weather.api_key = key.to_string();
        }
    }
}

fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    if network.wifi_ssid.trim().is_empty() {
        warn!("wifi credentials missing; weather updates stay paused");
        return Ok(wifi);
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);
    disable_wifi_power_save();
    Ok(wifi)
}

fn request_wifi_connect() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_connect() };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("esp_wifi_connect failed: esp_err_t={rc}");
    }
}

struct EspHttpTransport;

impl Transport for EspHttpTransport {
    fn perform(
        &mut self,
        request: &FetchRequest,
        events: &mut dyn ResponseEvents,
    ) -> Result<(), TransportError> {
        let timeout_ms = request.timeout.as_millis().try_into().unwrap_or(u64::MAX);
        let http_conf = HttpClientConfiguration {
            timeout: Some(request.timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&http_conf)
            .map_err(|err| TransportError::Connect(format!("{err:?}")))?;
        let mut client = HttpClient::wrap(connection);

        let mut response = client
            .request(Method::Get, &request.url, &[("accept", "application/json")])
            .and_then(|pending| pending.submit())
            .map_err(|err| request_error(err, timeout_ms))?;

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(TransportError::Status(status));
        }

        let chunked = response
            .header("Transfer-Encoding")
            .or_else(|| response.header("transfer-encoding"))
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
        if chunked {
            debug!("{} response uses chunked transfer", request.kind.as_str());
        }

        let mut chunk = [0_u8; READ_CHUNK_SIZE];
        loop {
            match response.read(&mut chunk) {
                Ok(0) => {
                    events.on_finish(request.kind);
                    return Ok(());
                }
                Ok(read) => events.on_data(request.kind, &chunk[..read], chunked),
                Err(err) => {
                    events.on_disconnected(request.kind);
                    return Err(TransportError::Read(format!("{err:?}")));
                }
            }
        }
    }
}

fn request_error(err: EspIOError, timeout_ms: u64) -> TransportError {
    let code = err.0.code();
    if code == esp_idf_svc::sys::ESP_ERR_TIMEOUT {
        TransportError::Timeout(timeout_ms)
    } else {
        TransportError::Connect(format!("{err:?}"))
    }
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("weather-station"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(mqtt: &Arc<Mutex<EspMqttClient<'static>>>) -> anyhow::Result<()> {
    let mut mqtt = mqtt.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    for topic in SENSOR_TOPICS {
        mqtt.subscribe(topic, QoS::AtMostOnce)?;
    }
    mqtt.enqueue(TOPIC_STATION_STATUS, QoS::AtLeastOnce, true, b"online")?;
    Ok(())
}

fn spawn_mqtt_receiver(
    dispatcher: Dispatcher<RenderLock>,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        if let Err(err) = subscribe_topics(&mqtt) {
                            warn!("mqtt subscribe failed: {err:#}");
                        }
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Sensor payloads are small; fragmented deliveries are dropped.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }
                        dispatcher.route_topic(topic, data);
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;
    Ok(())
}

fn spawn_render_loop(ui: RenderLock) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("panel-render".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register render loop with watchdog: {err:#}");
            }

            let mut renderer = PanelRenderer::new();
            loop {
                feed_watchdog();
                if let Some(frame) = renderer.poll(&ui) {
                    info!(
                        "[{}] rev {}: {}",
                        frame.page.as_str(),
                        frame.revision,
                        frame.lines.join(" | ")
                    );
                }
                thread::sleep(Duration::from_millis(RENDER_PERIOD_MS));
            }
        })
        .context("failed to spawn panel render thread")?;
    Ok(())
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<Option<RuntimeConfig>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(Some(serde_json::from_str::<RuntimeConfig>(value)?)),
            None => Ok(None),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(runtime)?;
        nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
        Ok(())
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
