//! Persisted credential store: two flat namespaces on top of any key/value
//! backend (NVS on the device, a JSON file on the host).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::{parse_port, BrokerConfig, NetworkCredentials, PersistedConfig},
    topics::TopicList,
};

pub const NAMESPACE_WIFI: &str = "wifi";
pub const NAMESPACE_BROKER: &str = "broker";

pub const KEY_WIFI_SSID: &str = "ssid";
pub const KEY_WIFI_PASS: &str = "pass";
pub const KEY_BROKER_HOST: &str = "ip";
pub const KEY_BROKER_PORT: &str = "port";
pub const KEY_BROKER_USER: &str = "usr";
pub const KEY_BROKER_PASS: &str = "pass";
pub const KEY_BROKER_ANONYMOUS: &str = "anonymous";
pub const KEY_BROKER_TOPICS: &str = "topics";

const WIFI_KEYS: [&str; 2] = [KEY_WIFI_SSID, KEY_WIFI_PASS];
const BROKER_KEYS: [&str; 6] = [
    KEY_BROKER_HOST,
    KEY_BROKER_PORT,
    KEY_BROKER_USER,
    KEY_BROKER_PASS,
    KEY_BROKER_ANONYMOUS,
    KEY_BROKER_TOPICS,
];

pub trait KeyValueStore {
    fn get_str(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>>;
    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()>;
    fn get_bool(&self, namespace: &str, key: &str) -> anyhow::Result<Option<bool>>;
    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> anyhow::Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&mut self, namespace: &str, key: &str) -> anyhow::Result<()>;
}

pub trait ConfigStore {
    fn read_config(&self) -> anyhow::Result<PersistedConfig>;
    fn write_config(&mut self, config: &PersistedConfig) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;

    fn is_complete(&self) -> bool {
        match self.read_config() {
            Ok(config) => config.is_complete(),
            Err(err) => {
                log::warn!("failed to read persisted config: {err:#}");
                false
            }
        }
    }
}

/// Maps [`PersistedConfig`] onto the `wifi` / `broker` key layout.
#[derive(Debug, Clone, Default)]
pub struct NamespacedConfigStore<K> {
    kv: K,
}

impl<K: KeyValueStore> NamespacedConfigStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }

    fn string(&self, namespace: &str, key: &str) -> anyhow::Result<String> {
        Ok(self.kv.get_str(namespace, key)?.unwrap_or_default())
    }
}

impl<K: KeyValueStore> ConfigStore for NamespacedConfigStore<K> {
    fn read_config(&self) -> anyhow::Result<PersistedConfig> {
        let network = NetworkCredentials {
            ssid: self.string(NAMESPACE_WIFI, KEY_WIFI_SSID)?,
            passphrase: self.string(NAMESPACE_WIFI, KEY_WIFI_PASS)?,
        };

        let broker = BrokerConfig {
            host: self.string(NAMESPACE_BROKER, KEY_BROKER_HOST)?,
            port: parse_port(&self.string(NAMESPACE_BROKER, KEY_BROKER_PORT)?),
            username: self.string(NAMESPACE_BROKER, KEY_BROKER_USER)?,
            password: self.string(NAMESPACE_BROKER, KEY_BROKER_PASS)?,
            anonymous: self
                .kv
                .get_bool(NAMESPACE_BROKER, KEY_BROKER_ANONYMOUS)?
                .unwrap_or(true),
        };

        let topics = TopicList::parse(&self.string(NAMESPACE_BROKER, KEY_BROKER_TOPICS)?);

        Ok(PersistedConfig {
            network,
            broker,
            topics,
        })
    }

    fn write_config(&mut self, config: &PersistedConfig) -> anyhow::Result<()> {
        self.kv
            .set_str(NAMESPACE_WIFI, KEY_WIFI_SSID, &config.network.ssid)?;
        self.kv
            .set_str(NAMESPACE_WIFI, KEY_WIFI_PASS, &config.network.passphrase)?;

        let port = config
            .broker
            .port
            .map(|port| port.to_string())
            .unwrap_or_default();
        self.kv
            .set_str(NAMESPACE_BROKER, KEY_BROKER_HOST, &config.broker.host)?;
        self.kv.set_str(NAMESPACE_BROKER, KEY_BROKER_PORT, &port)?;
        self.kv
            .set_str(NAMESPACE_BROKER, KEY_BROKER_USER, &config.broker.username)?;
        self.kv
            .set_str(NAMESPACE_BROKER, KEY_BROKER_PASS, &config.broker.password)?;
        self.kv.set_bool(
            NAMESPACE_BROKER,
            KEY_BROKER_ANONYMOUS,
            config.broker.anonymous,
        )?;
        self.kv.set_str(
            NAMESPACE_BROKER,
            KEY_BROKER_TOPICS,
            &config.topics.to_wire(),
        )?;
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        for key in WIFI_KEYS {
            self.kv.remove(NAMESPACE_WIFI, key)?;
        }
        for key in BROKER_KEYS {
            self.kv.remove(NAMESPACE_BROKER, key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Str(String),
}

/// In-memory backend, also the on-disk shape of the host store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryKeyValueStore {
    namespaces: BTreeMap<String, BTreeMap<String, StoredValue>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.value(namespace, key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.values().all(BTreeMap::is_empty)
    }

    fn value(&self, namespace: &str, key: &str) -> Option<&StoredValue> {
        self.namespaces.get(namespace)?.get(key)
    }

    fn insert(&mut self, namespace: &str, key: &str, value: StoredValue) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_str(&self, namespace: &str, key: &str) -> anyhow::Result<Option<String>> {
        match self.value(namespace, key) {
            Some(StoredValue::Str(value)) => Ok(Some(value.clone())),
            Some(StoredValue::Bool(_)) => Err(anyhow::anyhow!(
                "key {namespace}/{key} holds a bool, not a string"
            )),
            None => Ok(None),
        }
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> anyhow::Result<()> {
        self.insert(namespace, key, StoredValue::Str(value.to_string()));
        Ok(())
    }

    fn get_bool(&self, namespace: &str, key: &str) -> anyhow::Result<Option<bool>> {
        match self.value(namespace, key) {
            Some(StoredValue::Bool(value)) => Ok(Some(*value)),
            Some(StoredValue::Str(_)) => Err(anyhow::anyhow!(
                "key {namespace}/{key} holds a string, not a bool"
            )),
            None => Ok(None),
        }
    }

    fn set_bool(&mut self, namespace: &str, key: &str, value: bool) -> anyhow::Result<()> {
        self.insert(namespace, key, StoredValue::Bool(value));
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> anyhow::Result<()> {
        if let Some(entries) = self.namespaces.get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_config() -> PersistedConfig {
        PersistedConfig {
            network: NetworkCredentials {
                ssid: "home".to_string(),
                passphrase: "secret".to_string(),
            },
            broker: BrokerConfig {
                host: "10.0.0.5".to_string(),
                port: Some(1883),
                username: "node".to_string(),
                password: "hunter2".to_string(),
                anonymous: false,
            },
            topics: TopicList::parse("a::b"),
        }
    }

    #[test]
    fn write_then_read_returns_the_same_config() {
        let mut store = NamespacedConfigStore::new(MemoryKeyValueStore::new());
        let config = sample_config();

        store.write_config(&config).unwrap();
        let loaded = store.read_config().unwrap();

        assert_eq!(loaded, config);
        assert_eq!(
            loaded.topics.iter().collect::<Vec<_>>(),
            vec!["a", "", "b"]
        );
    }

    #[test]
    fn uses_the_documented_key_layout() {
        let mut store = NamespacedConfigStore::new(MemoryKeyValueStore::new());
        store.write_config(&sample_config()).unwrap();
        let kv = store.backend();

        assert_eq!(
            kv.get_str("wifi", "pass").unwrap().as_deref(),
            Some("secret")
        );
        assert_eq!(
            kv.get_str("broker", "pass").unwrap().as_deref(),
            Some("hunter2")
        );
        assert_eq!(
            kv.get_str("broker", "port").unwrap().as_deref(),
            Some("1883")
        );
        assert_eq!(
            kv.get_str("broker", "topics").unwrap().as_deref(),
            Some("a::b")
        );
        assert_eq!(kv.get_bool("broker", "anonymous").unwrap(), Some(false));
    }

    #[test]
    fn empty_store_reads_as_incomplete_anonymous_config() {
        let store = NamespacedConfigStore::new(MemoryKeyValueStore::new());
        let config = store.read_config().unwrap();

        assert_eq!(config, PersistedConfig::default());
        assert!(config.broker.anonymous);
        assert!(!store.is_complete());
    }

    #[test]
    fn clear_is_idempotent() {
        let mut store = NamespacedConfigStore::new(MemoryKeyValueStore::new());
        store.write_config(&sample_config()).unwrap();
        assert!(store.is_complete());

        store.clear().unwrap();
        assert!(!store.is_complete());
        assert!(store.backend().is_empty());

        store.clear().unwrap();
        assert!(!store.is_complete());
    }

    #[test]
    fn mismatched_value_types_are_errors() {
        let mut kv = MemoryKeyValueStore::new();
        kv.set_bool("broker", "anonymous", true).unwrap();
        kv.set_str("broker", "port", "1883").unwrap();

        assert!(kv.contains("broker", "anonymous"));
        assert!(kv.get_str("broker", "anonymous").is_err());
        assert!(kv.get_bool("broker", "port").is_err());
        assert_eq!(kv.get_str("broker", "missing").unwrap(), None);
    }

    #[test]
    fn stored_port_zero_reads_as_missing() {
        let mut kv = MemoryKeyValueStore::new();
        kv.set_str("wifi", "ssid", "home").unwrap();
        kv.set_str("wifi", "pass", "secret").unwrap();
        kv.set_str("broker", "ip", "10.0.0.5").unwrap();
        kv.set_str("broker", "port", "0").unwrap();
        kv.set_bool("broker", "anonymous", true).unwrap();
        let store = NamespacedConfigStore::new(kv);

        assert_eq!(store.read_config().unwrap().broker.port, None);
        assert!(!store.is_complete());
    }
}
