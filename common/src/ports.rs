//! Interfaces to the collaborators the node drives but does not implement:
//! the Wi-Fi stack, the MQTT client, the board I/O and the platform.

use std::net::Ipv4Addr;

use crate::router::{ActuatorId, PinLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Station,
    AccessPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Idle,
    Connected,
    Disconnected,
}

pub trait NetworkStack {
    fn set_mode(&mut self, mode: WifiMode) -> anyhow::Result<()>;
    fn begin(&mut self, ssid: &str, passphrase: &str) -> anyhow::Result<()>;
    fn soft_ap(&mut self, ssid: &str, passphrase: &str) -> anyhow::Result<()>;
    fn status(&mut self) -> StationStatus;
    fn disconnect(&mut self) -> anyhow::Result<()>;
    fn mac_address(&self) -> [u8; 6];
    fn local_ip(&self) -> Option<Ipv4Addr>;
    fn soft_ap_ip(&self) -> Option<Ipv4Addr>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

pub trait BrokerTransport {
    fn set_server(&mut self, host: &str, port: u16);
    /// One blocking connection attempt.
    fn connect(&mut self, client_id: &str, credentials: Option<(&str, &str)>)
        -> anyhow::Result<()>;
    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
    /// Services the client once without blocking and hands back whatever
    /// arrived since the previous call.
    fn pump(&mut self) -> Vec<InboundMessage>;
    fn disconnect(&mut self) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
    /// Client specific state code, logged on failed attempts.
    fn state(&self) -> i32;
}

pub trait StatusIndicator {
    fn set_indicator(&mut self, on: bool);
}

pub trait Board: StatusIndicator {
    fn read_temperature_c(&mut self) -> anyhow::Result<f32>;
    fn write_text(&mut self, text: &str) -> anyhow::Result<()>;
    fn set_actuator(&mut self, id: ActuatorId, level: PinLevel) -> anyhow::Result<()>;
    fn button_pressed(&mut self) -> bool;
}

pub trait Platform {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u64);
    /// Reboots the device. Test doubles record the call and return.
    fn restart(&mut self);
}
