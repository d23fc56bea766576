//! Ordered subscription property bag
//!
//! Properties are applied to transports in the order the operator entered
//! them; some destinations (database inserts, scripted pipelines) are
//! order-sensitive, so insertion order is part of the contract. Bags are
//! small, a Vec-backed map keeps order without an extra dependency.

use std::fmt;
use std::time::Duration;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// Well-known property keys recognized by the dispatch core.
///
/// Transport-specific keys are namespaced `Transporter.<Protocol>.<Option>`
/// and are opaque to the core.
pub mod keys {
    /// Selects a registered transformer by name
    pub const TRANSFORMER: &str = "Transformer";

    /// Selects the marshaller by MIME type
    pub const MIME_TYPE: &str = "MimeType";

    /// Prefix of all transport-level keys
    pub const TRANSPORTER_PREFIX: &str = "Transporter.";

    /// Resend retry period in milliseconds while a destination is down
    pub const RESEND_REPEAT_PERIOD: &str = "Transporter.ResendRepeatPeriod";

    /// Bound of the per-destination resend queue
    pub const RESEND_QUEUE_SIZE: &str = "Transporter.ResendQueueSize";

    /// TCP connect timeout in milliseconds
    pub const TCP_TIMEOUT: &str = "Transporter.TCP.Timeout";

    /// Largest UDP datagram the transport will emit
    pub const UDP_MAX_PACKET_SIZE: &str = "Transporter.UDP.MaxPacketSize";
}

/// Insertion-ordered string-to-string map.
///
/// `set` on an existing key replaces the value in place, keeping the key's
/// original position; `remove` closes the gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Create an empty property bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bag from key/value pairs, keeping their order
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut properties = Self::new();
        for (key, value) in pairs {
            properties.set(key, value);
        }
        properties
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a value; replacement keeps the key's position
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Remove a key, returning its value if present
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Effective bag for a sub-destination: this bag with `overrides`
    /// applied on top (override keys keep the base position when present)
    pub fn merged_with(&self, overrides: &Properties) -> Properties {
        let mut merged = self.clone();
        for (key, value) in overrides.iter() {
            merged.set(key, value);
        }
        merged
    }

    /// Parse a value as `u64`
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.trim().parse::<u64>().map(Some).map_err(|_| {
                ValidationError::invalid_field(key, format!("expected an integer, got '{value}'"))
            }),
        }
    }

    /// Parse a value as `usize`
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.trim().parse::<usize>().map(Some).map_err(|_| {
                ValidationError::invalid_field(key, format!("expected an integer, got '{value}'"))
            }),
        }
    }

    /// Parse a value as `bool` (`true`/`false`)
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => match value.trim() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                other => Err(ValidationError::invalid_field(
                    key,
                    format!("expected 'true' or 'false', got '{other}'"),
                )),
            },
        }
    }

    /// Parse a millisecond value as a `Duration`
    pub fn get_duration_ms(&self, key: &str) -> Result<Option<Duration>, ValidationError> {
        Ok(self.get_u64(key)?.map(Duration::from_millis))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct PropertiesVisitor;

impl<'de> Visitor<'de> for PropertiesVisitor {
    type Value = Properties;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of string properties")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut properties = Properties::new();
        while let Some((key, value)) = access.next_entry::<String, String>()? {
            properties.set(key, value);
        }
        Ok(properties)
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PropertiesVisitor)
    }
}
