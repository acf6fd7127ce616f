use core::convert::TryInto;
use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, Input, InputOutput, Output, OutputPin, PinDriver, Pull},
    spi::{
        config::{Config as SpiConfig, DriverConfig as SpiDriverConfig},
        SpiDeviceDriver, SpiDriver,
    },
    units::FromValueType,
};
use max7219::{connectors::SpiConnector, MAX7219};
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    netif::IpEvent,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{EspWifi, WifiEvent},
};
use log::{debug, info, warn};
use one_wire_bus::{Address, OneWire};

use relay_node_common::{
    decide_mode,
    display::matrix_rows,
    enter_configure_mode,
    portal::{self, CAPTIVE_PORTAL_PATHS, CONFIG_FORM_HTML, MAX_FORM_BYTES},
    session::MAX_INBOUND_PAYLOAD_BYTES,
    ActuatorId, Board, BootMode, ButtonPolarity, BrokerTransport, ConfigForm, ConfigStore, InboundMessage,
    KeyValueStore, LinkError, LinkEvent, LinkManager, NamespacedConfigStore, NetworkStack, Node,
    NodeSettings, PersistedConfig, PinLevel, Platform, StationStatus, StatusIndicator, WifiMode,
};

type NvsConfigStore = NamespacedConfigStore<NvsKeyValueStore>;

const RELAY_A_PIN: i32 = 27;
const RELAY_B_PIN: i32 = 26;
const STATUS_LED_PIN: i32 = 2;
const BUTTON_PIN: i32 = 14;
const BUTTON_POLARITY: ButtonPolarity = ButtonPolarity::ActiveHigh;
const DS18B20_PIN: i32 = 15;
const MATRIX_CS_PIN: i32 = 5;
const MATRIX_DEVICES: usize = 1;
const MATRIX_INTENSITY: u8 = 0;

const MAX_NVS_STR_BYTES: usize = 4096;
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let settings = NodeSettings::default();
    let store = NamespacedConfigStore::new(NvsKeyValueStore::new(nvs_partition.clone()));
    let config = store.read_config().unwrap_or_else(|err| {
        warn!("failed to load config from NVS: {err:#}");
        PersistedConfig::default()
    });

    let wifi = EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?;
    let network = EspNetwork::new(wifi);

    let config = match decide_mode(config) {
        BootMode::Operate(config) => config,
        BootMode::Configure => {
            let mut link = LinkManager::new(network, &settings);
            enter_configure_mode(&mut link, &settings)?;
            let server = create_portal_server(store)?;
            return serve_forever(link, server);
        }
    };

    let pins = peripherals.pins;
    let matrix = SpiDeviceDriver::new_single(
        peripherals.spi3,
        pins.gpio18,
        pins.gpio23,
        None::<AnyIOPin>,
        Some(pins.gpio5),
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(1.MHz().into()),
    )
    .context("failed to set up display SPI")?;
    let board = EspBoard::new(
        pins.gpio27.downgrade_output(),
        pins.gpio26.downgrade_output(),
        pins.gpio2.downgrade_output(),
        pins.gpio14.downgrade(),
        pins.gpio15.downgrade(),
        MatrixDisplay::new(matrix)?,
    )?;

    let (events_tx, events) = mpsc::channel();
    let _subscriptions = subscribe_link_events(&sys_loop, events_tx)?;

    let mut node = Node::new(
        config,
        settings,
        network,
        EspMqttTransport::default(),
        board,
        store.clone(),
        EspPlatform,
    );

    match node.start() {
        Ok(ip) => info!("node online at {ip}"),
        Err(LinkError::Timeout(waited_ms)) => {
            warn!("no station link after {waited_ms} ms, falling back to configuration");
            node.enter_configure_mode()?;
            let server = create_portal_server(store)?;
            return serve_forever(node, server);
        }
        Err(err) => return Err(err).context("failed to bring up the station link"),
    }

    node.run(&events);
    Ok(())
}

/// Keeps the radio owner and the HTTP server alive until the user restarts
/// the device.
fn serve_forever<T>(_radio: T, _server: EspHttpServer<'static>) -> anyhow::Result<()> {
    info!("configuration portal ready");
    loop {
        thread::sleep(Duration::from_secs(1));
    }
}

fn subscribe_link_events(
    sys_loop: &EspSystemEventLoop,
    events: mpsc::Sender<LinkEvent>,
) -> anyhow::Result<[EspSubscription<'static, System>; 2]> {
    let wifi_events = events.clone();
    let wifi = sys_loop.subscribe::<WifiEvent, _>(move |event| {
        let forwarded = match event {
            WifiEvent::StaConnected(_) => LinkEvent::StationConnected,
            WifiEvent::StaDisconnected(disconnected) => LinkEvent::StationDisconnected {
                reason: disconnected.reason(),
            },
            _ => return,
        };
        let _ = wifi_events.send(forwarded);
    })?;

    let ip = sys_loop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            let _ = events.send(LinkEvent::GotAddress(assignment.ip()));
        }
    })?;

    Ok([wifi, ip])
}

fn create_portal_server(store: NvsConfigStore) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for path in std::iter::once("/").chain(CAPTIVE_PORTAL_PATHS) {
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            write_html(req, 200, CONFIG_FORM_HTML)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/submit", Method::Post, move |mut req| {
        let body = match read_request_body(&mut req) {
            Ok(body) => body,
            Err(err) => {
                let status = if err == portal::FormError::TooLarge { 413 } else { 400 };
                return write_html(req, status, &portal::render_form_error(&err));
            }
        };

        let form = std::str::from_utf8(&body)
            .map_err(|_| portal::FormError::Encoding)
            .and_then(ConfigForm::from_urlencoded)
            .and_then(ConfigForm::into_config);
        let config = match form {
            Ok(config) => config,
            Err(err) => {
                warn!("rejected portal submission: {err}");
                return write_html(req, 400, &portal::render_form_error(&err));
            }
        };

        let mut store = store.clone();
        if let Err(err) = store.write_config(&config) {
            warn!("failed to persist configuration: {err:#}");
            return write_html(req, 500, "<p>Failed to save configuration</p>");
        }

        info!("configuration saved, restart to apply");
        write_html(req, 200, &portal::render_confirmation(&config))
    })?;

    Ok(server)
}

fn read_request_body(
    req: &mut Request<&mut EspHttpConnection<'_>>,
) -> Result<Vec<u8>, portal::FormError> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_FORM_BYTES {
        return Err(portal::FormError::TooLarge);
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)
            .map_err(|_| portal::FormError::Encoding)?;
    }
    Ok(body)
}

fn write_html(
    req: Request<&mut EspHttpConnection<'_>>,
    status_code: u16,
    body: &str,
) -> anyhow::Result<()> {
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "text/html; charset=utf-8")],
    )?
    .write_all(body.as_bytes())?;
    Ok(())
}

/// NVS-backed key/value store. Each namespace maps onto an NVS namespace of
/// the same name.
#[derive(Clone)]
struct NvsKeyValueStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl NvsKeyValueStore {
    fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn with_namespace<R>(
        &self,
        namespace: &str,
        apply: impl FnOnce(&mut EspNvs<esp_idf_svc::nvs::NvsDefault>) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("nvs lock poisoned"))?;
        let mut nvs = EspNvs::new(self.partition.clone(), namespace, true)
            .with_context(|| format!("failed to open NVS namespace {namespace}"))?;
        apply(&mut nvs)
    }
}

impl KeyValueStore for NvsKeyValueStore {
    fn get_str(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        self.with_namespace(namespace, |nvs| {
            let mut buffer = vec![0_u8; MAX_NVS_STR_BYTES];
            Ok(nvs.get_str(key, &mut buffer)?.map(str::to_string))
        })
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.with_namespace(namespace, |nvs| Ok(nvs.set_str(key, value)?))
    }

    fn get_bool(&self, namespace: &str, key: &str) -> anyhow::Result<Option<bool>> {
        self.with_namespace(namespace, |nvs| Ok(nvs.get_u8(key)?.map(|raw| raw != 0)))
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> anyhow::Result<()> {
        self.with_namespace(namespace, |nvs| Ok(nvs.set_u8(key, u8::from(value))?))
    }

    fn remove(&mut self, namespace: &str, key: &str) -> anyhow::Result<()> {
        self.with_namespace(namespace, |nvs| {
            nvs.remove(key)?;
            Ok(())
        })
    }
}

/// Non-blocking wrapper over the ESP-IDF Wi-Fi driver. Progress is observed
/// through `status` and the system event loop.
struct EspNetwork {
    wifi: EspWifi<'static>,
    mode: Option<WifiMode>,
}

impl EspNetwork {
    fn new(wifi: EspWifi<'static>) -> Self {
        Self { wifi, mode: None }
    }

    fn ensure_started(&mut self) -> anyhow::Result<()> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl NetworkStack for EspNetwork {
    fn set_mode(&mut self, mode: WifiMode) -> anyhow::Result<()> {
        if self.mode.is_some() && self.mode != Some(mode) && self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn begin(&mut self, ssid: &str, passphrase: &str) -> anyhow::Result<()> {
        let auth_method = if passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
                password: passphrase
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.ensure_started()?;
        self.wifi.connect().context("wifi connect request failed")?;
        Ok(())
    }

    fn soft_ap(&mut self, ssid: &str, passphrase: &str) -> anyhow::Result<()> {
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| anyhow!("access point SSID too long"))?,
                password: passphrase
                    .try_into()
                    .map_err(|_| anyhow!("access point password too long"))?,
                auth_method: AuthMethod::WPAWPA2Personal,
                channel: 1,
                ..Default::default()
            }))?;
        self.ensure_started()
    }

    fn status(&mut self) -> StationStatus {
        if self.mode != Some(WifiMode::Station) {
            return StationStatus::Idle;
        }

        match (self.wifi.is_started(), self.wifi.is_up()) {
            (Ok(true), Ok(true)) => StationStatus::Connected,
            (Ok(true), _) => StationStatus::Disconnected,
            _ => StationStatus::Idle,
        }
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        if self.wifi.is_connected()? {
            self.wifi.disconnect()?;
        }
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        self.wifi.sta_netif().get_mac().unwrap_or_else(|err| {
            warn!("failed to read station MAC: {err}");
            [0; 6]
        })
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        let ip = self.wifi.sta_netif().get_ip_info().ok()?.ip;
        (!ip.is_unspecified()).then_some(ip)
    }

    fn soft_ap_ip(&self) -> Option<Ipv4Addr> {
        self.wifi.ap_netif().get_ip_info().ok().map(|info| info.ip)
    }
}

/// ESP-IDF MQTT client. The driver delivers events on its own task; the
/// callback only flips the connection flag and queues complete publishes.
#[derive(Default)]
struct EspMqttTransport {
    url: Option<String>,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    state: i32,
}

impl EspMqttTransport {
    fn drop_session(&mut self, state: i32) {
        self.client = None;
        self.inbound = None;
        self.connected.store(false, Ordering::SeqCst);
        self.state = state;
    }
}

impl BrokerTransport for EspMqttTransport {
    fn set_server(&mut self, host: &str, port: u16) {
        self.url = Some(format!("mqtt://{host}:{port}"));
    }

    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> anyhow::Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| anyhow!("broker server not set"))?;
        self.drop_session(-1);

        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            username: credentials.map(|(user, _)| user),
            password: credentials.map(|(_, pass)| pass),
            ..Default::default()
        };

        let connected = Arc::new(AtomicBool::new(false));
        let (status_tx, status_rx) = mpsc::channel::<bool>();
        let (inbound_tx, inbound_rx) = mpsc::channel();

        let flag = connected.clone();
        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => {
                flag.store(true, Ordering::SeqCst);
                let _ = status_tx.send(true);
            }
            EventPayload::Disconnected => {
                flag.store(false, Ordering::SeqCst);
                let _ = status_tx.send(false);
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                details: Details::Complete,
                ..
            } => {
                if data.len() > MAX_INBOUND_PAYLOAD_BYTES {
                    warn!("dropping {} byte message on {topic}", data.len());
                    return;
                }
                let _ = inbound_tx.send(InboundMessage::new(topic, data));
            }
            EventPayload::Received { .. } => {
                debug!("ignoring fragmented or topicless message");
            }
            EventPayload::Error(err) => warn!("mqtt error: {err:?}"),
            _ => {}
        })
        .with_context(|| format!("failed to create MQTT client for {url}"))?;

        match status_rx.recv_timeout(MQTT_CONNECT_TIMEOUT) {
            Ok(true) => {
                self.client = Some(client);
                self.connected = connected;
                self.inbound = Some(inbound_rx);
                self.state = 0;
                Ok(())
            }
            Ok(false) => {
                self.drop_session(-2);
                Err(anyhow!("broker at {url} closed the connection"))
            }
            Err(_) => {
                self.drop_session(-4);
                Err(anyhow!("timed out connecting to {url}"))
            }
        }
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| anyhow!("not connected"))?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("failed to publish to {topic}"))?;
        Ok(())
    }

    fn pump(&mut self) -> Vec<InboundMessage> {
        if self.client.is_some() && !self.connected.load(Ordering::SeqCst) {
            self.state = -3;
        }
        self.inbound
            .as_ref()
            .map(|inbound| inbound.try_iter().collect())
            .unwrap_or_default()
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.drop_session(-1);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> i32 {
        self.state
    }
}

struct SensorBus {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    delay: Ets,
}

impl SensorBus {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut bus = Self {
            one_wire,
            address: None,
            delay: Ets,
        };
        bus.discover();
        Ok(bus)
    }

    fn discover(&mut self) {
        self.address = None;
        for found in self.one_wire.devices(false, &mut self.delay) {
            match found {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    self.address = Some(address);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        match self.address {
            Some(address) => info!("DS18B20 ready on GPIO{DS18B20_PIN} ({address:?})"),
            None => warn!("no DS18B20 found on GPIO{DS18B20_PIN}"),
        }
    }

    fn read_celsius(&mut self) -> anyhow::Result<f32> {
        if self.address.is_none() {
            self.discover();
        }
        let address = self
            .address
            .ok_or_else(|| anyhow!("no DS18B20 on GPIO{DS18B20_PIN}"))?;

        let measured = Ds18b20::new::<core::convert::Infallible>(address)
            .map_err(|err| anyhow!("invalid DS18B20 address {address:?}: {err:?}"))
            .and_then(|sensor| {
                ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
                    .map_err(|err| anyhow!("failed to start DS18B20 conversion: {err:?}"))?;
                Resolution::Bits12.delay_for_measurement_time(&mut self.delay);
                sensor
                    .read_data(&mut self.one_wire, &mut self.delay)
                    .map_err(|err| anyhow!("failed to read DS18B20 data: {err:?}"))
            });

        match measured {
            Ok(data) => Ok(data.temperature),
            Err(err) => {
                self.address = None;
                Err(err)
            }
        }
    }
}

type MatrixDriver = MAX7219<SpiConnector<SpiDeviceDriver<'static, SpiDriver<'static>>>>;

/// MAX7219 8x8 matrix on SPI. Shows the first character of the last text.
struct MatrixDisplay {
    driver: MatrixDriver,
}

impl MatrixDisplay {
    fn new(spi: SpiDeviceDriver<'static, SpiDriver<'static>>) -> anyhow::Result<Self> {
        let mut driver = MAX7219::from_spi(MATRIX_DEVICES, spi)
            .map_err(|err| anyhow!("failed to initialize MAX7219: {err:?}"))?;
        driver.power_on().map_err(matrix_error)?;
        driver
            .set_intensity(0, MATRIX_INTENSITY)
            .map_err(matrix_error)?;
        driver.clear_display(0).map_err(matrix_error)?;
        info!("LED matrix ready, CS on GPIO{MATRIX_CS_PIN}");
        Ok(Self { driver })
    }

    fn show(&mut self, text: &str) -> anyhow::Result<()> {
        self.driver
            .write_raw(0, &matrix_rows(text))
            .map_err(matrix_error)
    }
}

fn matrix_error(err: max7219::DataError) -> anyhow::Error {
    anyhow!("MAX7219 transfer failed: {err:?}")
}

/// Two relays, a status LED, the reset button, the temperature probe and the
/// LED matrix.
/// Relay modules on this board are active-low.
struct EspBoard {
    relay_a: PinDriver<'static, AnyOutputPin, Output>,
    relay_b: PinDriver<'static, AnyOutputPin, Output>,
    led: PinDriver<'static, AnyOutputPin, Output>,
    button: PinDriver<'static, AnyIOPin, Input>,
    sensor: SensorBus,
    display: MatrixDisplay,
}

impl EspBoard {
    fn new(
        relay_a: AnyOutputPin,
        relay_b: AnyOutputPin,
        led: AnyOutputPin,
        button: AnyIOPin,
        probe: AnyIOPin,
        display: MatrixDisplay,
    ) -> anyhow::Result<Self> {
        let mut relay_a = PinDriver::output(relay_a)?;
        relay_a.set_high()?;
        let mut relay_b = PinDriver::output(relay_b)?;
        relay_b.set_high()?;
        let mut led = PinDriver::output(led)?;
        led.set_low()?;
        let mut button = PinDriver::input(button)?;
        button.set_pull(Pull::Up)?;

        info!(
            "board ready: relays GPIO{RELAY_A_PIN}/GPIO{RELAY_B_PIN}, led GPIO{STATUS_LED_PIN}, button GPIO{BUTTON_PIN}"
        );

        Ok(Self {
            relay_a,
            relay_b,
            led,
            button,
            sensor: SensorBus::new(probe)?,
            display,
        })
    }
}

impl StatusIndicator for EspBoard {
    fn set_indicator(&mut self, on: bool) {
        let result = if on {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        if let Err(err) = result {
            warn!("status LED write failed: {err}");
        }
    }
}

impl Board for EspBoard {
    fn read_temperature_c(&mut self) -> anyhow::Result<f32> {
        self.sensor.read_celsius()
    }

    fn write_text(&mut self, text: &str) -> anyhow::Result<()> {
        info!("display: {text}");
        self.display.show(text)
    }

    fn set_actuator(&mut self, id: ActuatorId, level: PinLevel) -> anyhow::Result<()> {
        let relay = match id {
            ActuatorId::A => &mut self.relay_a,
            ActuatorId::B => &mut self.relay_b,
        };
        match level {
            PinLevel::High => relay.set_high()?,
            PinLevel::Low => relay.set_low()?,
        }
        Ok(())
    }

    fn button_pressed(&mut self) -> bool {
        BUTTON_POLARITY.is_pressed(self.button.is_high())
    }
}

struct EspPlatform;

impl Platform for EspPlatform {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn restart(&mut self) {
        unsafe { esp_idf_svc::sys::esp_restart() };
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
