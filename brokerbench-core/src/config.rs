// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Driver configuration parser with strict validation.
//!
//! Accepts YAML or JSON documents with camelCase keys. Broker-client
//! properties come in layers (`common`, `producer`, `consumer`, `topic`) that
//! are merged once here, so drivers never re-merge per call.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{AckMode, DriverKind, Endpoint, QueueType, ReplicationFactor};

/// Flat key-value properties handed to a broker client.
pub type Properties = BTreeMap<String, String>;

/// Serializer settings are never taken from user input: payloads are raw bytes.
const SERDE_KEYS: [&str; 4] = [
    "key.serializer",
    "value.serializer",
    "key.deserializer",
    "value.deserializer",
];

/// Upper bound on the per-subscription delivery buffer.
const MAX_DELIVERY_BUFFER: usize = 1_000_000;

/// A single property value as written by the user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProperty {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl RawProperty {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Flag(b) => b.to_string(),
        }
    }
}

/// One property layer: either a mapping or a `key=value` properties text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLayer {
    Map(BTreeMap<String, RawProperty>),
    Text(String),
}

/// A layer written with no value (`common:`) is the same as a missing one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPropertyLayers {
    common: Option<RawLayer>,
    producer: Option<RawLayer>,
    consumer: Option<RawLayer>,
    topic: Option<RawLayer>,
}

/// Raw configuration as parsed from YAML or JSON (before validation).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDriverConfig {
    #[serde(default)]
    driver: DriverKind,
    #[serde(default)]
    endpoints: Vec<String>,
    #[serde(default)]
    persistence: bool,
    #[serde(default)]
    queue_type: QueueType,
    #[serde(default = "default_replication_factor")]
    replication_factor: u16,
    #[serde(default)]
    ack_mode: AckMode,
    #[serde(default = "default_topic_create_timeout_ms")]
    topic_create_timeout_ms: u64,
    #[serde(default = "default_delivery_buffer")]
    delivery_buffer: usize,
    #[serde(default)]
    properties: Option<RawPropertyLayers>,
}

fn default_replication_factor() -> u16 {
    1
}

fn default_topic_create_timeout_ms() -> u64 {
    30_000
}

fn default_delivery_buffer() -> usize {
    1024
}

/// Client properties per connection role, merged once at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedProperties {
    /// `common` layer; used by administrative connections.
    pub admin: Properties,
    /// `common` overlaid with `producer`.
    pub producer: Properties,
    /// `common` overlaid with `consumer`.
    pub consumer: Properties,
    /// Per-topic settings passed along with topic creation.
    pub topic: Properties,
}

/// Validated, immutable driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub driver: DriverKind,
    pub endpoints: Vec<Endpoint>,
    pub persistence: bool,
    pub queue_type: QueueType,
    pub replication_factor: ReplicationFactor,
    pub ack_mode: AckMode,
    pub topic_create_timeout: Duration,
    pub delivery_buffer: usize,
    pub properties: ResolvedProperties,
}

impl DriverConfig {
    /// Endpoints as plain strings, in configured order.
    pub fn endpoint_strings(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.to_string()).collect()
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a file.
    /// `.json` files go through serde_json; anything else is read as YAML.
    pub fn load_file(path: impl AsRef<Path>) -> Result<DriverConfig, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(&content),
            _ => Self::load_str(&content),
        }
    }

    /// Load and validate configuration from a YAML string.
    /// JSON documents are valid YAML and are accepted too.
    pub fn load_str(content: &str) -> Result<DriverConfig, ConfigError> {
        let raw: RawDriverConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            message: format!("YAML parse error: {}", e),
        })?;

        Self::validate(raw)
    }

    /// Load and validate configuration from a JSON string.
    pub fn load_json(content: &str) -> Result<DriverConfig, ConfigError> {
        let raw: RawDriverConfig = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            message: format!("JSON parse error: {}", e),
        })?;

        Self::validate(raw)
    }

    fn validate(raw: RawDriverConfig) -> Result<DriverConfig, ConfigError> {
        if raw.endpoints.is_empty() {
            return Err(ConfigError::MissingRequiredField { field: "endpoints" });
        }

        let endpoints = raw
            .endpoints
            .into_iter()
            .map(Endpoint::new)
            .collect::<Result<Vec<_>, _>>()?;

        let replication_factor = ReplicationFactor::new(raw.replication_factor)?;

        if raw.topic_create_timeout_ms == 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "topicCreateTimeoutMs",
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        if raw.delivery_buffer == 0 || raw.delivery_buffer > MAX_DELIVERY_BUFFER {
            return Err(ConfigError::InvalidFieldValue {
                field: "deliveryBuffer",
                value: raw.delivery_buffer.to_string(),
                reason: format!("Must be between 1 and {}", MAX_DELIVERY_BUFFER),
            });
        }

        let properties = Self::resolve_properties(raw.properties.unwrap_or_default())?;

        Ok(DriverConfig {
            driver: raw.driver,
            endpoints,
            persistence: raw.persistence,
            queue_type: raw.queue_type,
            replication_factor,
            ack_mode: raw.ack_mode,
            topic_create_timeout: Duration::from_millis(raw.topic_create_timeout_ms),
            delivery_buffer: raw.delivery_buffer,
            properties,
        })
    }

    /// Merge the property layers. Later layers override earlier ones.
    fn resolve_properties(raw: RawPropertyLayers) -> Result<ResolvedProperties, ConfigError> {
        let common = Self::flatten_layer(raw.common, "properties.common")?;
        let producer = Self::flatten_layer(raw.producer, "properties.producer")?;
        let consumer = Self::flatten_layer(raw.consumer, "properties.consumer")?;
        let topic = Self::flatten_layer(raw.topic, "properties.topic")?;

        Ok(ResolvedProperties {
            admin: strip_serde_keys(common.clone()),
            producer: strip_serde_keys(merge_layers(&[&common, &producer])),
            consumer: strip_serde_keys(merge_layers(&[&common, &consumer])),
            topic,
        })
    }

    fn flatten_layer(
        layer: Option<RawLayer>,
        field: &'static str,
    ) -> Result<Properties, ConfigError> {
        match layer {
            None => Ok(Properties::new()),
            Some(RawLayer::Map(map)) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, v.into_string()))
                .collect()),
            Some(RawLayer::Text(text)) => parse_properties_text(&text, field),
        }
    }
}

/// Ordered merge of property layers; later layers win.
pub fn merge_layers(layers: &[&Properties]) -> Properties {
    let mut merged = Properties::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn strip_serde_keys(mut properties: Properties) -> Properties {
    for key in SERDE_KEYS {
        if let Some(value) = properties.remove(key) {
            tracing::warn!(
                key = key,
                value = %value,
                "Ignoring serializer override; payloads are always raw bytes"
            );
        }
    }
    properties
}

/// Parse `key=value` (or `key: value`) lines. Blank lines and lines starting
/// with `#` or `!` are skipped.
fn parse_properties_text(text: &str, field: &'static str) -> Result<Properties, ConfigError> {
    let mut properties = Properties::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let split_at = line.find(['=', ':']).ok_or_else(|| ConfigError::InvalidFieldValue {
            field,
            value: line.to_string(),
            reason: format!("Line {} is not a key=value pair", line_no + 1),
        })?;

        let key = line[..split_at].trim();
        let value = line[split_at + 1..].trim();

        if key.is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field,
                value: line.to_string(),
                reason: format!("Line {} has an empty key", line_no + 1),
            });
        }

        properties.insert(key.to_string(), value.to_string());
    }

    Ok(properties)
}
