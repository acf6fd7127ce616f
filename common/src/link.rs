//! Station/AP link supervision.
//!
//! Stack callbacks never touch [`LinkManager`] directly: they forward
//! [`LinkEvent`]s over a channel and the control loop applies them between
//! scheduler passes. Reconnecting is driven from the link-status job through
//! [`LinkManager::poll`], so nothing blocks inside a callback.

use std::net::Ipv4Addr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    config::{NetworkCredentials, NodeSettings},
    ports::{NetworkStack, Platform, StationStatus, StatusIndicator, WifiMode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected(Ipv4Addr),
    ApMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StationConnected,
    GotAddress(Ipv4Addr),
    StationDisconnected { reason: u16 },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("station did not connect within {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Network(#[from] anyhow::Error),
}

pub struct LinkManager<N> {
    stack: N,
    state: LinkState,
    credentials: Option<NetworkCredentials>,
    poll_interval_ms: u64,
    attempt_timeout_ms: u64,
    max_wait_ms: Option<u64>,
    last_attempt_ms: Option<u64>,
    reconnect: bool,
}

impl<N: NetworkStack> LinkManager<N> {
    pub fn new(stack: N, settings: &NodeSettings) -> Self {
        Self {
            stack,
            state: LinkState::Disconnected,
            credentials: None,
            poll_interval_ms: settings.link_poll_interval_ms.max(1),
            attempt_timeout_ms: settings.reconnect_attempt_timeout_ms,
            max_wait_ms: settings.max_station_wait_ms,
            last_attempt_ms: None,
            reconnect: false,
        }
    }

    /// Joins the configured network and blocks until an address is assigned,
    /// toggling the indicator on every status poll.
    pub fn connect_station(
        &mut self,
        credentials: &NetworkCredentials,
        indicator: &mut impl StatusIndicator,
        platform: &mut impl Platform,
    ) -> Result<Ipv4Addr, LinkError> {
        self.credentials = Some(credentials.clone());
        self.reconnect = true;
        self.state = LinkState::Connecting;

        self.stack.set_mode(WifiMode::Station)?;
        self.stack
            .begin(&credentials.ssid, &credentials.passphrase)?;
        info!("connecting to network '{}'", credentials.ssid);

        let started_ms = platform.now_ms();
        self.last_attempt_ms = Some(started_ms);
        let mut indicator_on = false;

        loop {
            if let Some(ip) = self.connected_address() {
                self.state = LinkState::Connected(ip);
                indicator.set_indicator(true);
                info!("station connected, address {ip}");
                return Ok(ip);
            }

            if let Some(max_wait_ms) = self.max_wait_ms {
                if platform.now_ms().saturating_sub(started_ms) >= max_wait_ms {
                    self.state = LinkState::Disconnected;
                    indicator.set_indicator(false);
                    warn!("station connect gave up after {max_wait_ms} ms");
                    return Err(LinkError::Timeout(max_wait_ms));
                }
            }

            indicator_on = !indicator_on;
            indicator.set_indicator(indicator_on);
            platform.delay_ms(self.poll_interval_ms);
        }
    }

    /// Switches to the local configuration access point. Station reconnects
    /// stop for the rest of the boot.
    pub fn enter_ap_mode(
        &mut self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<Option<Ipv4Addr>, LinkError> {
        self.reconnect = false;
        self.stack.set_mode(WifiMode::AccessPoint)?;
        self.stack.soft_ap(ssid, passphrase)?;
        self.state = LinkState::ApMode;

        let ip = self.stack.soft_ap_ip();
        match ip {
            Some(ip) => info!("access point '{ssid}' up at {ip}"),
            None => info!("access point '{ssid}' up"),
        }
        Ok(ip)
    }

    /// Tears the station link down for good. Only the reset path calls this.
    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        self.reconnect = false;
        self.state = LinkState::Disconnected;
        self.stack.disconnect()?;
        info!("network link closed");
        Ok(())
    }

    pub fn handle_event(&mut self, event: LinkEvent) {
        if self.state == LinkState::ApMode {
            debug!("ignoring {event:?} in access point mode");
            return;
        }

        match event {
            LinkEvent::StationConnected => {
                if self.reconnect && !self.is_connected() {
                    self.state = LinkState::Connecting;
                }
                debug!("station associated");
            }
            LinkEvent::GotAddress(ip) => {
                if self.reconnect {
                    self.state = LinkState::Connected(ip);
                    info!("station address {ip}");
                }
            }
            LinkEvent::StationDisconnected { reason } => {
                self.state = LinkState::Disconnected;
                if self.reconnect {
                    warn!("station disconnected (reason {reason}), will reconnect");
                    self.last_attempt_ms = None;
                } else {
                    debug!("station disconnected (reason {reason})");
                }
            }
        }
    }

    /// One step of the reconnect machine, called from the link-status job.
    /// An attempt in flight is left alone until the stack reports a
    /// disconnect or the attempt times out; `begin` is re-issued at most once
    /// per poll interval while the link is down.
    pub fn poll(&mut self, now_ms: u64) -> LinkState {
        if !self.reconnect || self.state == LinkState::ApMode {
            return self.state;
        }

        match self.stack.status() {
            StationStatus::Connected => {
                if let Some(ip) = self.stack.local_ip() {
                    if self.state != LinkState::Connected(ip) {
                        info!("station reconnected, address {ip}");
                    }
                    self.state = LinkState::Connected(ip);
                }
            }
            StationStatus::Disconnected | StationStatus::Idle => match self.state {
                LinkState::Connecting => {
                    let started_ms = *self.last_attempt_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(started_ms) >= self.attempt_timeout_ms {
                        warn!(
                            "reconnect attempt unresolved after {} ms",
                            self.attempt_timeout_ms
                        );
                        self.state = LinkState::Disconnected;
                    }
                }
                LinkState::Connected(_) => {
                    warn!("station link lost");
                    self.state = LinkState::Disconnected;
                }
                LinkState::Disconnected | LinkState::ApMode => {}
            },
        }

        if self.state == LinkState::Disconnected && self.attempt_due(now_ms) {
            self.last_attempt_ms = Some(now_ms);
            if let Some(credentials) = &self.credentials {
                match self.stack.begin(&credentials.ssid, &credentials.passphrase) {
                    Ok(()) => {
                        self.state = LinkState::Connecting;
                        info!("reconnecting to network '{}'", credentials.ssid);
                    }
                    Err(err) => warn!("station reconnect failed: {err:#}"),
                }
            }
        }

        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected(_))
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.stack.mac_address()
    }

    pub fn stack(&self) -> &N {
        &self.stack
    }

    fn attempt_due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.poll_interval_ms,
            None => true,
        }
    }

    fn connected_address(&mut self) -> Option<Ipv4Addr> {
        match self.stack.status() {
            StationStatus::Connected => self.stack.local_ip(),
            StationStatus::Idle | StationStatus::Disconnected => None,
        }
    }
}
