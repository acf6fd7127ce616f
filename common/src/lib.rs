pub mod config;
pub mod display;
pub mod input;
pub mod link;
pub mod orchestrator;
pub mod portal;
pub mod ports;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod topics;

#[cfg(test)]
mod testing;

pub use config::{BrokerConfig, NetworkCredentials, NodeSettings, PersistedConfig};
pub use input::{ButtonEvent, ButtonPolarity, LongPressButton, ResetRequest};
pub use link::{LinkError, LinkEvent, LinkManager, LinkState};
pub use orchestrator::{decide_mode, enter_configure_mode, BootMode, Node};
pub use portal::{ConfigForm, FormError};
pub use ports::{
    Board, BrokerTransport, InboundMessage, NetworkStack, Platform, StationStatus,
    StatusIndicator, WifiMode,
};
pub use router::{route, Action, ActuatorId, PinLevel, SwitchState};
pub use scheduler::{JobId, Scheduler};
pub use session::{SessionManager, SessionState};
pub use store::{ConfigStore, KeyValueStore, MemoryKeyValueStore, NamespacedConfigStore};
pub use topics::{TopicList, TopicMap, TopicRole};
