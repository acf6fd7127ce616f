//! Boot-mode decision and the operating-mode runtime.

use std::{
    net::Ipv4Addr,
    ops::ControlFlow,
    sync::mpsc::{Receiver, TryRecvError},
};

use log::{debug, info, warn};

use crate::{
    config::{NetworkCredentials, NodeSettings, PersistedConfig},
    input::{ButtonEvent, LongPressButton, ResetRequest},
    link::{LinkError, LinkEvent, LinkManager},
    ports::{Board, BrokerTransport, NetworkStack, Platform},
    router::Action,
    scheduler::{JobId, Scheduler},
    session::SessionManager,
    store::ConfigStore,
};

/// Longest the control loop sleeps before draining link events again.
const MAX_IDLE_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    Operate(PersistedConfig),
    Configure,
}

pub fn decide_mode(config: PersistedConfig) -> BootMode {
    if config.is_complete() {
        BootMode::Operate(config)
    } else {
        BootMode::Configure
    }
}

/// Brings up the local access point. The caller serves the portal.
pub fn enter_configure_mode<N: NetworkStack>(
    link: &mut LinkManager<N>,
    settings: &NodeSettings,
) -> Result<Option<Ipv4Addr>, LinkError> {
    info!("configuration incomplete, starting access point");
    link.enter_ap_mode(&settings.ap_ssid, &settings.ap_passphrase)
}

pub struct Node<N, T, B, S, P> {
    settings: NodeSettings,
    network: NetworkCredentials,
    link: LinkManager<N>,
    session: SessionManager<T>,
    board: B,
    store: S,
    platform: P,
    scheduler: Scheduler,
    button: LongPressButton,
    blink_on: bool,
}

impl<N, T, B, S, P> Node<N, T, B, S, P>
where
    N: NetworkStack,
    T: BrokerTransport,
    B: Board,
    S: ConfigStore,
    P: Platform,
{
    pub fn new(
        config: PersistedConfig,
        settings: NodeSettings,
        stack: N,
        transport: T,
        board: B,
        store: S,
        platform: P,
    ) -> Self {
        let link = LinkManager::new(stack, &settings);
        let session = SessionManager::new(
            transport,
            config.broker,
            config.topics,
            link.mac_address(),
            &settings,
        );
        let button = LongPressButton::new(settings.debounce_ms, settings.long_press_ms);

        Self {
            settings,
            network: config.network,
            link,
            session,
            board,
            store,
            platform,
            scheduler: Scheduler::new(),
            button,
            blink_on: false,
        }
    }

    /// Connects link and session (both blocking), then registers and enables
    /// the periodic jobs.
    pub fn start(&mut self) -> Result<Ipv4Addr, LinkError> {
        let ip = self
            .link
            .connect_station(&self.network, &mut self.board, &mut self.platform)?;
        self.session.connect(&mut self.platform);

        for id in JobId::ALL {
            self.scheduler.add(id, id.period_ms(&self.settings));
        }
        self.scheduler.enable_all(self.platform.now_ms());
        info!("operating mode running");
        Ok(ip)
    }

    /// Fallback when the station never came up within the configured bound.
    pub fn enter_configure_mode(&mut self) -> Result<Option<Ipv4Addr>, LinkError> {
        enter_configure_mode(&mut self.link, &self.settings)
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        self.link.handle_event(event);
    }

    /// Runs one scheduler pass. A finished long press ends the pass early.
    pub fn poll(&mut self) -> Option<ResetRequest> {
        let now_ms = self.platform.now_ms();
        let Self {
            scheduler,
            link,
            session,
            board,
            button,
            blink_on,
            ..
        } = self;

        let (_, outcome) = scheduler.run_pending(now_ms, |job| match job {
            JobId::Telemetry => {
                publish_telemetry(session, board);
                ControlFlow::Continue(())
            }
            JobId::LinkStatus => {
                link.poll(now_ms);
                board.set_indicator(link.is_connected());
                ControlFlow::Continue(())
            }
            JobId::SessionPump => {
                if link.is_connected() {
                    for action in session.tick() {
                        apply_action(board, action);
                    }
                }
                ControlFlow::Continue(())
            }
            JobId::InputPoll => poll_input(button, board, blink_on, now_ms),
        });
        outcome
    }

    /// Cooperative loop: apply queued link events, run due jobs, idle until
    /// the next deadline. Returns only after a reset on platforms whose
    /// restart returns.
    pub fn run(&mut self, events: &Receiver<LinkEvent>) {
        loop {
            loop {
                match events.try_recv() {
                    Ok(event) => self.handle_link_event(event),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }

            if let Some(request) = self.poll() {
                self.reset(request);
                return;
            }

            let now_ms = self.platform.now_ms();
            let idle_ms = self
                .scheduler
                .next_due_ms()
                .map_or(MAX_IDLE_MS, |due| due.saturating_sub(now_ms))
                .min(MAX_IDLE_MS);
            if idle_ms > 0 {
                self.platform.delay_ms(idle_ms);
            }
        }
    }

    /// Factory reset. Steps run in a fixed order and failures are only
    /// logged: the restart always happens.
    pub fn reset(&mut self, _request: ResetRequest) {
        warn!("factory reset requested");

        self.scheduler.disable_all();
        self.scheduler.clear();

        if let Err(err) = self.session.disconnect() {
            warn!("closing broker session failed: {err:#}");
        }
        if let Err(err) = self.link.disconnect() {
            warn!("closing network link failed: {err:#}");
        }
        if let Err(err) = self.store.clear() {
            warn!("erasing persisted config failed: {err:#}");
        }

        info!("restarting");
        self.platform.restart();
    }

    pub fn link(&self) -> &LinkManager<N> {
        &self.link
    }

    pub fn session(&self) -> &SessionManager<T> {
        &self.session
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn board(&self) -> &B {
        &self.board
    }
}

fn publish_telemetry<T: BrokerTransport>(
    session: &mut SessionManager<T>,
    board: &mut impl Board,
) {
    match board.read_temperature_c() {
        Ok(celsius) => {
            if !session.publish_temperature(celsius) {
                debug!("telemetry dropped");
            }
        }
        Err(err) => warn!("temperature read failed: {err:#}"),
    }
}

fn poll_input(
    button: &mut LongPressButton,
    board: &mut impl Board,
    blink_on: &mut bool,
    now_ms: u64,
) -> ControlFlow<ResetRequest> {
    let pressed = board.button_pressed();
    match button.tick(pressed, now_ms) {
        Some(ButtonEvent::LongPressStart) => {
            info!("long press detected, release to reset");
            ControlFlow::Continue(())
        }
        Some(ButtonEvent::DuringLongPress) => {
            *blink_on = !*blink_on;
            board.set_indicator(*blink_on);
            ControlFlow::Continue(())
        }
        Some(ButtonEvent::LongPressStop) => ControlFlow::Break(ResetRequest),
        None => ControlFlow::Continue(()),
    }
}

fn apply_action(board: &mut impl Board, action: Action) {
    match action {
        Action::SetActuator(id, state) => {
            info!("actuator {id:?} -> {}", state.as_str());
            if let Err(err) = board.set_actuator(id, state.level()) {
                warn!("driving actuator {id:?} failed: {err:#}");
            }
        }
        Action::SetDisplay(text) => {
            if let Err(err) = board.write_text(&text) {
                warn!("display update failed: {err:#}");
            }
        }
        Action::NoOp => {}
    }
}
