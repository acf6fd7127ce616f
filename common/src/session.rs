//! Broker session: connect with retry, re-subscribe on every reconnect and
//! turn inbound messages into router actions.

use log::{debug, info, warn};

use crate::{
    config::{BrokerConfig, NodeSettings, DEFAULT_BROKER_PORT},
    ports::{BrokerTransport, Platform},
    router::{route, Action},
    topics::{TopicList, TopicMap, TopicRole},
};

pub const MAX_INBOUND_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed(Vec<String>),
}

pub struct SessionManager<T> {
    transport: T,
    broker: BrokerConfig,
    topics: TopicList,
    map: TopicMap,
    client_id: String,
    backoff_ms: u64,
    state: SessionState,
}

/// `esp32-client-AA:BB:CC:DD:EE:FF` style identifier.
pub fn client_id(prefix: &str, mac: [u8; 6]) -> String {
    let mac = mac
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    format!("{prefix}{mac}")
}

/// Fixed-width rendering used for telemetry, e.g. `" 23.50"`.
pub fn format_temperature(celsius: f32) -> String {
    format!("{celsius:6.2}")
}

impl<T: BrokerTransport> SessionManager<T> {
    pub fn new(
        mut transport: T,
        broker: BrokerConfig,
        topics: TopicList,
        mac: [u8; 6],
        settings: &NodeSettings,
    ) -> Self {
        transport.set_server(&broker.host, broker.port.unwrap_or(DEFAULT_BROKER_PORT));
        let map = TopicMap::from_list(&topics);

        Self {
            transport,
            broker,
            topics,
            map,
            client_id: client_id(&settings.client_id_prefix, mac),
            backoff_ms: settings.session_backoff_ms,
            state: SessionState::Disconnected,
        }
    }

    /// Blocks until the session is connected and every topic subscribed.
    pub fn connect(&mut self, platform: &mut impl Platform) {
        info!(
            "connecting to broker {} as {}",
            self.broker.endpoint(),
            self.client_id
        );

        while !self.try_connect() {
            platform.delay_ms(self.backoff_ms);
        }
    }

    /// A single connect-and-resubscribe pass. Returns true once subscribed.
    pub fn try_connect(&mut self) -> bool {
        self.state = SessionState::Connecting;

        if !self.transport.is_connected() {
            if let Err(err) = self
                .transport
                .connect(&self.client_id, self.broker.credentials())
            {
                warn!(
                    "broker connect failed (state {}): {err:#}",
                    self.transport.state()
                );
                self.state = SessionState::Disconnected;
                return false;
            }
            info!("broker session established");
        }

        let mut subscribed = Vec::new();
        for topic in self.topics.subscribable() {
            if let Err(err) = self.transport.subscribe(topic) {
                warn!("subscribe to '{topic}' failed: {err:#}");
                if let Err(err) = self.transport.disconnect() {
                    debug!("dropping half-open session failed: {err:#}");
                }
                self.state = SessionState::Disconnected;
                return false;
            }
            info!("subscribed to '{topic}'");
            subscribed.push(topic.to_string());
        }

        self.state = SessionState::Subscribed(subscribed);
        true
    }

    /// Services the session once. Never blocks beyond one connect attempt.
    pub fn tick(&mut self) -> Vec<Action> {
        if self.is_subscribed() && !self.transport.is_connected() {
            warn!("broker session lost");
            self.state = SessionState::Disconnected;
        }

        if !self.is_subscribed() && !self.try_connect() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for message in self.transport.pump() {
            if message.payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
                warn!(
                    "dropping {} byte message on '{}'",
                    message.payload.len(),
                    message.topic
                );
                continue;
            }

            match route(&message.topic, &message.payload, &self.map) {
                Action::NoOp => debug!("ignoring message on '{}'", message.topic),
                action => actions.push(action),
            }
        }
        actions
    }

    /// Best effort; anything that cannot be sent is dropped.
    pub fn publish(&mut self, role: TopicRole, payload: &[u8]) -> bool {
        let Some(topic) = self.map.topic(role) else {
            debug!("no topic configured for {}", role.as_str());
            return false;
        };

        if !self.transport.is_connected() {
            debug!("not connected, dropping publish to '{topic}'");
            return false;
        }

        match self.transport.publish(topic, payload) {
            Ok(()) => true,
            Err(err) => {
                debug!("publish to '{topic}' failed: {err:#}");
                false
            }
        }
    }

    pub fn publish_temperature(&mut self, celsius: f32) -> bool {
        let payload = format_temperature(celsius);
        self.publish(TopicRole::Telemetry, payload.as_bytes())
    }

    pub fn disconnect(&mut self) -> anyhow::Result<()> {
        self.state = SessionState::Disconnected;
        self.transport.disconnect()?;
        info!("broker session closed");
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, SessionState::Subscribed(_))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic_map(&self) -> &TopicMap {
        &self.map
    }
}
