use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const TOPIC_SEPARATOR: char = ':';

pub const ROUTED_ROLES: [TopicRole; 3] = [
    TopicRole::ActuatorA,
    TopicRole::ActuatorB,
    TopicRole::Display,
];

/// Position of a topic inside the colon-delimited list stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicRole {
    Telemetry,
    ActuatorA,
    ActuatorB,
    Display,
}

impl TopicRole {
    pub fn index(self) -> usize {
        match self {
            Self::Telemetry => 0,
            Self::ActuatorA => 1,
            Self::ActuatorB => 2,
            Self::Display => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::ActuatorA => "actuator-a",
            Self::ActuatorB => "actuator-b",
            Self::Display => "display",
        }
    }
}

/// Ordered topic list as persisted, e.g. `temp:lamp:fan:msg`.
///
/// Empty segments are kept so positions never shift: `a::b` parses to
/// `["a", "", "b"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicList(Vec<String>);

impl TopicList {
    pub fn new(topics: Vec<String>) -> Self {
        Self(topics)
    }

    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        Self(raw.split(TOPIC_SEPARATOR).map(str::to_string).collect())
    }

    pub fn to_wire(&self) -> String {
        self.0.join(&TOPIC_SEPARATOR.to_string())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the wire form would be the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(String::is_empty) && self.0.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Topics that are actually subscribed, in list order.
    pub fn subscribable(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|topic| !topic.is_empty())
    }
}

impl FromStr for TopicList {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(raw))
    }
}

impl fmt::Display for TopicList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Role to topic mapping resolved once when the configuration is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicMap {
    telemetry: Option<String>,
    actuator_a: Option<String>,
    actuator_b: Option<String>,
    display: Option<String>,
}

impl TopicMap {
    pub fn from_list(list: &TopicList) -> Self {
        let slot = |role: TopicRole| {
            list.get(role.index())
                .filter(|topic| !topic.is_empty())
                .map(str::to_string)
        };

        Self {
            telemetry: slot(TopicRole::Telemetry),
            actuator_a: slot(TopicRole::ActuatorA),
            actuator_b: slot(TopicRole::ActuatorB),
            display: slot(TopicRole::Display),
        }
    }

    pub fn topic(&self, role: TopicRole) -> Option<&str> {
        match role {
            TopicRole::Telemetry => self.telemetry.as_deref(),
            TopicRole::ActuatorA => self.actuator_a.as_deref(),
            TopicRole::ActuatorB => self.actuator_b.as_deref(),
            TopicRole::Display => self.display.as_deref(),
        }
    }

    /// First routed role whose topic equals `topic`. Telemetry is publish-only.
    pub fn routed_role(&self, topic: &str) -> Option<TopicRole> {
        ROUTED_ROLES
            .into_iter()
            .find(|role| self.topic(*role) == Some(topic))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keeps_empty_segments_in_position() {
        let list = TopicList::parse("a::b");

        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["a", "", "b"]);
        assert_eq!(list.to_wire(), "a::b");
        assert_eq!(list.subscribable().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn empty_wire_string_is_an_empty_list() {
        let list = TopicList::parse("");

        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert_eq!(list.to_wire(), "");
        assert!(!TopicList::parse("::").is_empty());
    }

    #[test]
    fn short_list_disables_missing_roles() {
        let map = TopicMap::from_list(&TopicList::parse("temp:lamp"));

        assert_eq!(map.topic(TopicRole::Telemetry), Some("temp"));
        assert_eq!(map.topic(TopicRole::ActuatorA), Some("lamp"));
        assert_eq!(map.topic(TopicRole::ActuatorB), None);
        assert_eq!(map.topic(TopicRole::Display), None);
    }

    #[test]
    fn telemetry_topic_is_never_routed() {
        let map = TopicMap::from_list(&TopicList::parse("temp:lamp:fan:msg"));

        assert_eq!(map.routed_role("temp"), None);
        assert_eq!(map.routed_role("fan"), Some(TopicRole::ActuatorB));
        assert_eq!(map.routed_role("msg"), Some(TopicRole::Display));
    }

    #[test]
    fn empty_segment_disables_role() {
        let map = TopicMap::from_list(&TopicList::parse("temp::fan"));

        assert_eq!(map.topic(TopicRole::ActuatorA), None);
        assert_eq!(map.routed_role(""), None);
    }
}
