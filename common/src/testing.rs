//! Recording fakes for the hardware ports, shared by the unit tests.

use std::{
    cell::{Cell, RefCell},
    net::Ipv4Addr,
    rc::Rc,
};

use anyhow::anyhow;

use crate::{
    config::PersistedConfig,
    ports::{
        Board, BrokerTransport, InboundMessage, NetworkStack, Platform, StationStatus,
        StatusIndicator, WifiMode,
    },
    router::{ActuatorId, PinLevel},
    store::ConfigStore,
};

/// Ordered record of every port call, shared by all fakes in one test.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn entries_matching(&self, wanted: &[&str]) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|entry| wanted.contains(&entry.as_str()))
            .cloned()
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries_with_prefix(prefix).len()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Debug, Default)]
struct StackState {
    idle_polls: Option<usize>,
    address: Option<Ipv4Addr>,
    polls: usize,
    forced: Option<Option<Ipv4Addr>>,
}

impl StackState {
    fn joined(&self) -> bool {
        matches!(self.idle_polls, Some(idle) if self.polls > idle)
    }
}

/// Network stack that stays idle until a scripted number of status polls.
#[derive(Debug, Clone)]
pub struct FakeStack {
    log: EventLog,
    state: Rc<RefCell<StackState>>,
}

#[derive(Debug, Clone)]
pub struct StackHandle(Rc<RefCell<StackState>>);

impl StackHandle {
    /// `Some(ip)` reports the station up, `None` reports it down.
    pub fn set_connected(&self, address: Option<Ipv4Addr>) {
        self.0.borrow_mut().forced = Some(address);
    }
}

impl FakeStack {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Rc::default(),
        }
    }

    pub fn connects_after(self, idle_polls: usize, address: Ipv4Addr) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.idle_polls = Some(idle_polls);
            state.address = Some(address);
        }
        self
    }

    pub fn handle(&self) -> StackHandle {
        StackHandle(self.state.clone())
    }
}

impl NetworkStack for FakeStack {
    fn set_mode(&mut self, mode: WifiMode) -> anyhow::Result<()> {
        self.log.push(format!("net.set_mode({mode:?})"));
        Ok(())
    }

    fn begin(&mut self, ssid: &str, _passphrase: &str) -> anyhow::Result<()> {
        self.log.push(format!("net.begin({ssid})"));
        Ok(())
    }

    fn soft_ap(&mut self, ssid: &str, _passphrase: &str) -> anyhow::Result<()> {
        self.log.push(format!("net.soft_ap({ssid})"));
        Ok(())
    }

    fn status(&mut self) -> StationStatus {
        let mut state = self.state.borrow_mut();
        let forced = state.forced;
        match forced {
            Some(Some(_)) => StationStatus::Connected,
            Some(None) => StationStatus::Disconnected,
            None => {
                state.polls += 1;
                if state.joined() {
                    StationStatus::Connected
                } else {
                    StationStatus::Idle
                }
            }
        }
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.log.push("net.disconnect");
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        [0x24, 0x6f, 0x28, 0x0a, 0xb1, 0xc2]
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        let state = self.state.borrow();
        match state.forced {
            Some(address) => address,
            None if state.joined() => state.address,
            None => None,
        }
    }

    fn soft_ap_ip(&self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::new(192, 168, 4, 1))
    }
}

#[derive(Debug, Default)]
pub struct TransportState {
    pub connected: bool,
    pub connect_failures: usize,
    pub fail_subscribe: Option<String>,
    pub fail_disconnect: bool,
    pub last_credentials: Option<(String, String)>,
    pub inbound: Vec<InboundMessage>,
    pub published: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct FakeTransport {
    log: EventLog,
    state: Rc<RefCell<TransportState>>,
}

impl FakeTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: Rc::default(),
        }
    }

    pub fn handle(&self) -> Rc<RefCell<TransportState>> {
        self.state.clone()
    }
}

impl BrokerTransport for FakeTransport {
    fn set_server(&mut self, host: &str, port: u16) {
        self.log.push(format!("mqtt.set_server({host}:{port})"));
    }

    fn connect(
        &mut self,
        client_id: &str,
        credentials: Option<(&str, &str)>,
    ) -> anyhow::Result<()> {
        self.log.push(format!("mqtt.connect({client_id})"));
        let mut state = self.state.borrow_mut();
        state.last_credentials =
            credentials.map(|(user, pass)| (user.to_string(), pass.to_string()));

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(anyhow!("connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        self.log.push(format!("mqtt.subscribe({topic})"));
        let mut state = self.state.borrow_mut();
        if state.fail_subscribe.as_deref() == Some(topic) {
            state.fail_subscribe = None;
            return Err(anyhow!("subscribe rejected"));
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.log.push(format!("mqtt.publish({topic})"));
        self.state
            .borrow_mut()
            .published
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn pump(&mut self) -> Vec<InboundMessage> {
        let mut state = self.state.borrow_mut();
        if state.connected {
            std::mem::take(&mut state.inbound)
        } else {
            Vec::new()
        }
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.log.push("mqtt.disconnect");
        let mut state = self.state.borrow_mut();
        state.connected = false;
        if state.fail_disconnect {
            return Err(anyhow!("socket already closed"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn state(&self) -> i32 {
        if self.state.borrow().connected {
            0
        } else {
            -2
        }
    }
}

#[derive(Debug, Default)]
pub struct BoardState {
    pub temperature_c: f32,
    pub text: Vec<String>,
    pub actuators: Vec<(ActuatorId, PinLevel)>,
    pub indicator: Vec<bool>,
    /// Button held for `start..end` on the shared clock.
    pub press_window: Option<(u64, u64)>,
}

#[derive(Debug, Clone)]
pub struct FakeBoard {
    log: EventLog,
    clock: Rc<Cell<u64>>,
    state: Rc<RefCell<BoardState>>,
}

impl FakeBoard {
    pub fn new(log: EventLog, clock: Rc<Cell<u64>>) -> Self {
        Self {
            log,
            clock,
            state: Rc::default(),
        }
    }

    pub fn state(&self) -> Rc<RefCell<BoardState>> {
        self.state.clone()
    }
}

impl StatusIndicator for FakeBoard {
    fn set_indicator(&mut self, on: bool) {
        self.state.borrow_mut().indicator.push(on);
    }
}

impl Board for FakeBoard {
    fn read_temperature_c(&mut self) -> anyhow::Result<f32> {
        Ok(self.state.borrow().temperature_c)
    }

    fn write_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.log.push(format!("board.text({text})"));
        self.state.borrow_mut().text.push(text.to_string());
        Ok(())
    }

    fn set_actuator(&mut self, id: ActuatorId, level: PinLevel) -> anyhow::Result<()> {
        self.log.push(format!("board.actuator({id:?}, {level:?})"));
        self.state.borrow_mut().actuators.push((id, level));
        Ok(())
    }

    fn button_pressed(&mut self) -> bool {
        let now_ms = self.clock.get();
        self.state
            .borrow()
            .press_window
            .is_some_and(|(start, end)| (start..end).contains(&now_ms))
    }
}

#[derive(Debug, Default)]
pub struct FakeIndicator {
    pub history: Vec<bool>,
}

impl StatusIndicator for FakeIndicator {
    fn set_indicator(&mut self, on: bool) {
        self.history.push(on);
    }
}

/// Virtual clock: `delay_ms` advances time instead of sleeping.
#[derive(Debug)]
pub struct FakePlatform {
    log: EventLog,
    clock: Rc<Cell<u64>>,
}

impl FakePlatform {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            clock: Rc::default(),
        }
    }

    pub fn clock(&self) -> Rc<Cell<u64>> {
        self.clock.clone()
    }

    pub fn advance(&self, ms: u64) {
        self.clock.set(self.clock.get() + ms);
    }
}

impl Platform for FakePlatform {
    fn now_ms(&self) -> u64 {
        self.clock.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.advance(ms);
    }

    fn restart(&mut self) {
        self.log.push("platform.restart");
    }
}

#[derive(Debug)]
pub struct FakeStore {
    log: EventLog,
    config: Option<PersistedConfig>,
    pub fail_clear: bool,
}

impl FakeStore {
    pub fn new(log: EventLog, config: PersistedConfig) -> Self {
        Self {
            log,
            config: Some(config),
            fail_clear: false,
        }
    }
}

impl ConfigStore for FakeStore {
    fn read_config(&self) -> anyhow::Result<PersistedConfig> {
        Ok(self.config.clone().unwrap_or_default())
    }

    fn write_config(&mut self, config: &PersistedConfig) -> anyhow::Result<()> {
        self.log.push("store.write");
        self.config = Some(config.clone());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.log.push("store.clear");
        if self.fail_clear {
            return Err(anyhow!("flash busy"));
        }
        self.config = None;
        Ok(())
    }
}
