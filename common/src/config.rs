use serde::{Deserialize, Serialize};

use crate::topics::TopicList;

pub const DEFAULT_BROKER_PORT: u16 = 1883;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub passphrase: String,
}

impl NetworkCredentials {
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.passphrase.is_empty()
    }
}

/// Decimal TCP port. Zero and anything unparsable count as missing.
pub fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub anonymous: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            username: String::new(),
            password: String::new(),
            anonymous: true,
        }
    }
}

impl BrokerConfig {
    /// Splits `host:port` at the first colon. A missing or unparsable port is
    /// left unset, which keeps the config incomplete.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        match endpoint.trim().split_once(':') {
            Some((host, port)) => {
                self.host = host.trim().to_string();
                self.port = parse_port(port);
            }
            None => {
                self.host = endpoint.trim().to_string();
                self.port = None;
            }
        }
    }

    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.anonymous {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConfig {
    pub network: NetworkCredentials,
    pub broker: BrokerConfig,
    pub topics: TopicList,
}

impl PersistedConfig {
    pub fn is_network_complete(&self) -> bool {
        self.network.is_complete()
    }

    /// Host and port are always required. Anonymous sessions need nothing
    /// else; authenticated ones need username, password and topics.
    pub fn is_broker_complete(&self) -> bool {
        if self.broker.host.is_empty() || self.broker.port.is_none() {
            return false;
        }

        if self.broker.anonymous {
            return true;
        }

        !self.broker.username.is_empty()
            && !self.broker.password.is_empty()
            && !self.topics.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.is_network_complete() && self.is_broker_complete()
    }
}

/// Tunables for the operating loop. Periods and thresholds are fixed
/// constants on the device; the host build may override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    pub telemetry_period_ms: u64,
    pub link_status_period_ms: u64,
    pub session_pump_period_ms: u64,
    pub input_poll_period_ms: u64,
    pub link_poll_interval_ms: u64,
    #[serde(default)]
    pub max_station_wait_ms: Option<u64>,
    /// How long a reconnect attempt may stay unresolved before `begin` is
    /// issued again.
    pub reconnect_attempt_timeout_ms: u64,
    pub session_backoff_ms: u64,
    pub client_id_prefix: String,
    pub long_press_ms: u64,
    pub debounce_ms: u64,
    pub ap_ssid: String,
    pub ap_passphrase: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            telemetry_period_ms: 2_000,
            link_status_period_ms: 2_000,
            session_pump_period_ms: 100,
            input_poll_period_ms: 50,
            link_poll_interval_ms: 1_000,
            max_station_wait_ms: None,
            reconnect_attempt_timeout_ms: 10_000,
            session_backoff_ms: 2_000,
            client_id_prefix: "esp32-client-".to_string(),
            long_press_ms: 2_000,
            debounce_ms: 50,
            ap_ssid: "Esp32".to_string(),
            ap_passphrase: "esp32esp32".to_string(),
        }
    }
}
