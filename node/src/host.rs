use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{mpsc, Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Router,
};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, Incoming, MqttOptions, Outgoing, QoS,
    RecvTimeoutError, TryRecvError,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use relay_node_common::{
    decide_mode,
    portal::{self, CAPTIVE_PORTAL_PATHS, CONFIG_FORM_HTML},
    ActuatorId, Board, BootMode, BrokerTransport, ConfigForm, ConfigStore, InboundMessage,
    KeyValueStore, LinkError, LinkManager, MemoryKeyValueStore, NamespacedConfigStore,
    NetworkStack, Node, NodeSettings, PersistedConfig, PinLevel, Platform, StationStatus,
    StatusIndicator, WifiMode,
};

type HostConfigStore = NamespacedConfigStore<FileKeyValueStore>;

const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_EVENTS_PER_PUMP: usize = 32;
const SIMULATED_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x52, 0x4e, 0x01];

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = NodeSettings::default();
    let store = NamespacedConfigStore::new(FileKeyValueStore::from_env());
    let config = store.read_config().unwrap_or_else(|err| {
        warn!("failed to load config from store: {err:#}");
        PersistedConfig::default()
    });

    match decide_mode(config) {
        BootMode::Operate(config) => run_operating(config, settings, store),
        BootMode::Configure => {
            let mut link = LinkManager::new(SimulatedNetwork::default(), &settings);
            relay_node_common::enter_configure_mode(&mut link, &settings)?;
            serve_portal(store)
        }
    }
}

fn run_operating(
    config: PersistedConfig,
    settings: NodeSettings,
    store: HostConfigStore,
) -> anyhow::Result<()> {
    let mut node = Node::new(
        config,
        settings,
        SimulatedNetwork::default(),
        RumqttTransport::default(),
        HostBoard::from_env(),
        store.clone(),
        HostPlatform,
    );

    match node.start() {
        Ok(ip) => info!("node online at {ip}"),
        Err(LinkError::Timeout(waited_ms)) => {
            warn!("no station link after {waited_ms} ms, falling back to configuration");
            node.enter_configure_mode()?;
            return serve_portal(store);
        }
        Err(err) => return Err(err).context("failed to bring up the station link"),
    }

    // The simulated stack raises no link events.
    let (_events_tx, events) = mpsc::channel();
    node.run(&events);
    Ok(())
}

fn serve_portal(store: HostConfigStore) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start portal runtime")?;
    runtime.block_on(serve_portal_async(store))
}

async fn serve_portal_async(store: HostConfigStore) -> anyhow::Result<()> {
    let mut app = Router::new()
        .route("/", get(handle_get_form))
        .route("/submit", post(handle_submit));
    for path in CAPTIVE_PORTAL_PATHS {
        app = app.route(path, get(handle_get_form));
    }
    let app = app.with_state(store);

    let port = std::env::var("RELAY_NODE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind portal at {addr}"))?;

    info!("configuration portal listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_get_form() -> Html<&'static str> {
    Html(CONFIG_FORM_HTML)
}

async fn handle_submit(
    State(store): State<HostConfigStore>,
    Form(form): Form<ConfigForm>,
) -> impl IntoResponse {
    let config = match form.into_config() {
        Ok(config) => config,
        Err(err) => {
            warn!("rejected portal submission: {err}");
            return (StatusCode::BAD_REQUEST, Html(portal::render_form_error(&err)));
        }
    };

    let saved = tokio::task::spawn_blocking({
        let config = config.clone();
        move || {
            let mut store = store;
            store.write_config(&config)
        }
    })
    .await;

    match saved {
        Ok(Ok(())) => {
            info!("configuration saved, restart to apply");
            (StatusCode::OK, Html(portal::render_confirmation(&config)))
        }
        Ok(Err(err)) => {
            warn!("failed to persist configuration: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<p>Failed to save configuration</p>".to_string()),
            )
        }
        Err(err) => {
            warn!("store task failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<p>Failed to save configuration</p>".to_string()),
            )
        }
    }
}

/// JSON file keyed by namespace, rewritten on every change.
#[derive(Clone)]
struct FileKeyValueStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl FileKeyValueStore {
    fn from_env() -> Self {
        let data_dir = std::env::var("RELAY_NODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.relay-node"));

        Self {
            path: Arc::new(data_dir.join("store.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn load(&self) -> anyhow::Result<MemoryKeyValueStore> {
        match std::fs::read(self.path.as_ref()) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("corrupt store at {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(MemoryKeyValueStore::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, entries: &MemoryKeyValueStore) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(entries)?;
        std::fs::write(self.path.as_ref(), payload)?;
        Ok(())
    }

    fn update(
        &mut self,
        apply: impl FnOnce(&mut MemoryKeyValueStore) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let mut entries = self.load()?;
        apply(&mut entries)?;
        self.save(&entries)
    }

    fn read<R>(
        &self,
        get: impl FnOnce(&MemoryKeyValueStore) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        get(&self.load()?)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_str(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        self.read(|entries| entries.get_str(namespace, key))
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|entries| entries.set_str(namespace, key, value))
    }

    fn get_bool(&self, namespace: &str, key: &str) -> anyhow::Result<Option<bool>> {
        self.read(|entries| entries.get_bool(namespace, key))
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> anyhow::Result<()> {
        self.update(|entries| entries.set_bool(namespace, key, value))
    }

    fn remove(&mut self, namespace: &str, key: &str) -> anyhow::Result<()> {
        self.update(|entries| entries.remove(namespace, key))
    }
}

/// Stand-in for the Wi-Fi radio: joins immediately on the loopback address.
#[derive(Default)]
struct SimulatedNetwork {
    mode: Option<WifiMode>,
    joined: bool,
}

impl NetworkStack for SimulatedNetwork {
    fn set_mode(&mut self, mode: WifiMode) -> anyhow::Result<()> {
        self.mode = Some(mode);
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _passphrase: &str) -> anyhow::Result<()> {
        info!("simulated station joining '{ssid}'");
        self.joined = self.mode == Some(WifiMode::Station);
        Ok(())
    }

    fn soft_ap(&mut self, ssid: &str, _passphrase: &str) -> anyhow::Result<()> {
        info!("simulated access point '{ssid}'");
        self.joined = false;
        Ok(())
    }

    fn status(&mut self) -> StationStatus {
        if self.joined {
            StationStatus::Connected
        } else {
            StationStatus::Idle
        }
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.joined = false;
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        SIMULATED_MAC
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.joined.then_some(Ipv4Addr::LOCALHOST)
    }

    fn soft_ap_ip(&self) -> Option<Ipv4Addr> {
        (self.mode == Some(WifiMode::AccessPoint)).then_some(Ipv4Addr::LOCALHOST)
    }
}

/// Blocking rumqttc client. Connection state is rebuilt on every connect.
#[derive(Default)]
struct RumqttTransport {
    server: Option<(String, u16)>,
    client: Option<Client>,
    connection: Option<Connection>,
    state: i32,
}

impl RumqttTransport {
    fn drop_session(&mut self, state: i32) {
        self.client = None;
        self.connection = None;
        self.state = state;
    }
}

impl BrokerTransport for RumqttTransport {
    fn set_server(&mut self, host: &str, port: u16) {
        self.server = Some((host.to_string(), port));
    }

    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> anyhow::Result<()> {
        let (host, port) = self
            .server
            .clone()
            .ok_or_else(|| anyhow!("broker server not set"))?;

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(15));
        if let Some((user, pass)) = credentials {
            options.set_credentials(user, pass);
        }

        let (client, mut connection) = Client::new(options, 32);
        loop {
            match connection.recv_timeout(CONNACK_TIMEOUT) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        self.drop_session(ack.code as i32);
                        return Err(anyhow!("broker refused connection: {:?}", ack.code));
                    }
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(err)) => {
                    self.drop_session(-2);
                    return Err(err).context("broker connection failed");
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.drop_session(-4);
                    return Err(anyhow!("timed out waiting for CONNACK"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.drop_session(-3);
                    return Err(anyhow!("broker event loop closed"));
                }
            }
        }

        self.client = Some(client);
        self.connection = Some(connection);
        self.state = 0;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("failed to subscribe to {topic}"))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .with_context(|| format!("failed to publish to {topic}"))
    }

    fn pump(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(connection) = self.connection.as_mut() else {
            return inbound;
        };

        let mut lost = false;
        for _ in 0..MAX_EVENTS_PER_PUMP {
            match connection.try_recv() {
                Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                    inbound.push(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!("broker connection error: {err}");
                    lost = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.drop_session(-3);
        }
        inbound
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        let result = match self.client.as_mut() {
            Some(client) => client.disconnect().context("failed to disconnect from broker"),
            None => Ok(()),
        };
        if result.is_ok() {
            if let Some(connection) = self.connection.as_mut() {
                if !flush_disconnect(connection) {
                    warn!("broker connection closed before DISCONNECT was sent");
                }
            }
        }
        self.drop_session(-1);
        result
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn state(&self) -> i32 {
        self.state
    }
}

/// Polls the event loop until the queued DISCONNECT has gone out.
fn flush_disconnect(connection: &mut Connection) -> bool {
    loop {
        match connection.recv_timeout(DISCONNECT_FLUSH_TIMEOUT) {
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return true,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => return false,
        }
    }
}

/// Logs what the relay board would do. Temperature comes from
/// `RELAY_NODE_TEMP_C`, the button is "held" while `RELAY_NODE_BUTTON_FILE`
/// exists.
struct HostBoard {
    temperature_c: f32,
    button_file: Option<PathBuf>,
    indicator: bool,
}

impl HostBoard {
    fn from_env() -> Self {
        Self {
            temperature_c: std::env::var("RELAY_NODE_TEMP_C")
                .ok()
                .and_then(|value| value.parse::<f32>().ok())
                .unwrap_or(21.5),
            button_file: std::env::var("RELAY_NODE_BUTTON_FILE")
                .ok()
                .map(PathBuf::from),
            indicator: false,
        }
    }
}

impl StatusIndicator for HostBoard {
    fn set_indicator(&mut self, on: bool) {
        if on != self.indicator {
            debug!("status led {}", if on { "on" } else { "off" });
        }
        self.indicator = on;
    }
}

impl Board for HostBoard {
    fn read_temperature_c(&mut self) -> anyhow::Result<f32> {
        Ok(self.temperature_c)
    }

    fn write_text(&mut self, text: &str) -> anyhow::Result<()> {
        info!("display: {text}");
        Ok(())
    }

    fn set_actuator(&mut self, id: ActuatorId, level: PinLevel) -> anyhow::Result<()> {
        info!("relay {id:?} pin {level:?}");
        Ok(())
    }

    fn button_pressed(&mut self) -> bool {
        self.button_file
            .as_ref()
            .is_some_and(|path| path.exists())
    }
}

struct HostPlatform;

impl Platform for HostPlatform {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn restart(&mut self) {
        info!("restart requested, exiting");
        std::process::exit(0);
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use relay_node_common::{BrokerConfig, NetworkCredentials, TopicList};

    use super::*;

    fn scratch_store(name: &str) -> FileKeyValueStore {
        let dir = std::env::temp_dir().join(format!("relay-node-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        FileKeyValueStore {
            path: Arc::new(dir.join("store.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[test]
    fn missing_file_reads_as_empty_config() {
        let store = NamespacedConfigStore::new(scratch_store("missing"));

        assert_eq!(store.read_config().unwrap(), PersistedConfig::default());
        assert!(!store.is_complete());
    }

    #[test]
    fn config_survives_a_reopen() {
        let kv = scratch_store("reopen");
        let config = PersistedConfig {
            network: NetworkCredentials {
                ssid: "home".to_string(),
                passphrase: "secret".to_string(),
            },
            broker: BrokerConfig {
                host: "10.0.0.5".to_string(),
                port: Some(1883),
                anonymous: true,
                ..BrokerConfig::default()
            },
            topics: TopicList::parse("temp:lamp:fan:msg"),
        };

        NamespacedConfigStore::new(kv.clone())
            .write_config(&config)
            .unwrap();
        let reopened = NamespacedConfigStore::new(FileKeyValueStore {
            path: kv.path.clone(),
            lock: Arc::new(Mutex::new(())),
        });

        assert_eq!(reopened.read_config().unwrap(), config);

        let mut reopened = reopened;
        reopened.clear().unwrap();
        assert_eq!(reopened.read_config().unwrap(), PersistedConfig::default());
    }

    #[test]
    fn simulated_network_only_joins_in_station_mode() {
        let mut network = SimulatedNetwork::default();
        network.set_mode(WifiMode::AccessPoint).unwrap();
        network.soft_ap("Esp32", "esp32esp32").unwrap();

        assert_eq!(network.status(), StationStatus::Idle);
        assert_eq!(network.soft_ap_ip(), Some(Ipv4Addr::LOCALHOST));

        network.set_mode(WifiMode::Station).unwrap();
        network.begin("home", "secret").unwrap();
        assert_eq!(network.status(), StationStatus::Connected);
        assert_eq!(network.local_ip(), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn disconnect_sends_disconnect_packet_before_closing() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut buf = [0_u8; 256];
            let n = socket.read(&mut buf).unwrap();
            assert!(n > 0 && buf[0] == 0x10, "expected CONNECT");
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

            let mut received = Vec::new();
            loop {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            received
        });

        let mut transport = RumqttTransport::default();
        transport.set_server("127.0.0.1", port);
        transport.connect("relay-node-test", None).unwrap();
        assert!(transport.is_connected());

        transport.disconnect().unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.state(), -1);

        let received = broker.join().unwrap();
        assert!(received.ends_with(&[0xE0, 0x00]), "{received:02x?}");
    }
}
