use serde::{Deserialize, Serialize};

use crate::topics::{TopicMap, TopicRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorId {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

impl SwitchState {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"on" => Some(Self::On),
            b"off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Relays are wired active-low.
    pub fn level(self) -> PinLevel {
        match self {
            Self::On => PinLevel::Low,
            Self::Off => PinLevel::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetActuator(ActuatorId, SwitchState),
    SetDisplay(String),
    NoOp,
}

pub fn route(topic: &str, payload: &[u8], topics: &TopicMap) -> Action {
    match topics.routed_role(topic) {
        Some(TopicRole::ActuatorA) => actuator_action(ActuatorId::A, payload),
        Some(TopicRole::ActuatorB) => actuator_action(ActuatorId::B, payload),
        Some(TopicRole::Display) => Action::SetDisplay(display_text(payload)),
        Some(TopicRole::Telemetry) | None => Action::NoOp,
    }
}

fn actuator_action(id: ActuatorId, payload: &[u8]) -> Action {
    SwitchState::parse(payload)
        .map(|state| Action::SetActuator(id, state))
        .unwrap_or(Action::NoOp)
}

// One character per byte, control characters dropped.
fn display_text(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|&byte| char::from(byte))
        .filter(|ch| !ch.is_control())
        .collect()
}
