//! Configuration entities stored as hashes in the shared store.
//!
//! All hash fields are strings on the wire; `from_fields`/`fields` convert
//! between the typed models and the flat string maps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{DatacollError, Result};

fn required<'a>(map: &'a HashMap<String, String>, field: &str) -> Result<&'a str> {
    map.get(field)
        .map(String::as_str)
        .ok_or_else(|| DatacollError::config(format!("missing field '{}'", field)))
}

/// A polled RTU connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub ip: String,
    pub port: u16,
    /// Protocol discriminator; sessions are spawned for `iec104` devices.
    pub protocol: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Interrogation cycle in seconds; engine default applies when absent.
    #[serde(default)]
    pub coll_interval: Option<u64>,
}

impl Device {
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(map, "id")?.to_string(),
            ip: required(map, "ip")?.to_string(),
            port: required(map, "port")?
                .parse()
                .map_err(|_| DatacollError::config("bad 'port' field"))?,
            protocol: required(map, "protocol")?.to_string(),
            name: map.get("name").cloned(),
            coll_interval: match map.get("coll_interval") {
                Some(v) => Some(
                    v.parse()
                        .map_err(|_| DatacollError::config("bad 'coll_interval' field"))?,
                ),
                None => None,
            },
        })
    }

    pub fn fields(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("id".to_string(), self.id.clone()),
            ("ip".to_string(), self.ip.clone()),
            ("port".to_string(), self.port.to_string()),
            ("protocol".to_string(), self.protocol.clone()),
        ]);
        if let Some(name) = &self.name {
            map.insert("name".to_string(), name.clone());
        }
        if let Some(secs) = self.coll_interval {
            map.insert("coll_interval".to_string(), secs.to_string());
        }
        map
    }

    /// True when a change requires the session to be restarted.
    pub fn transport_eq(&self, other: &Device) -> bool {
        self.ip == other.ip && self.port == other.port && self.protocol == other.protocol
    }
}

/// A logical RTU channel owned by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Term {
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(map, "id")?.to_string(),
            device_id: required(map, "device_id")?.to_string(),
            name: map.get("name").cloned(),
        })
    }

    pub fn fields(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("id".to_string(), self.id.clone()),
            ("device_id".to_string(), self.device_id.clone()),
        ]);
        if let Some(name) = &self.name {
            map.insert("name".to_string(), name.clone());
        }
        map
    }
}

/// A measurement or control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Item {
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(map, "id")?.to_string(),
            name: map.get("name").cloned(),
        })
    }

    pub fn fields(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([("id".to_string(), self.id.clone())]);
        if let Some(name) = &self.name {
            map.insert("name".to_string(), name.clone());
        }
        map
    }
}

/// Binding of an item to a term: the wire address (`protocol_code` is the
/// IOA) and, for control points, the ASDU type used for commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermItem {
    pub term_id: String,
    pub item_id: String,
    #[serde(default)]
    pub device_id: String,
    pub protocol_code: u32,
    #[serde(default)]
    pub code_type: Option<u8>,
}

impl TermItem {
    pub fn from_fields(map: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            term_id: required(map, "term_id")?.to_string(),
            item_id: required(map, "item_id")?.to_string(),
            device_id: map.get("device_id").cloned().unwrap_or_default(),
            protocol_code: required(map, "protocol_code")?
                .parse()
                .map_err(|_| DatacollError::config("bad 'protocol_code' field"))?,
            code_type: match map.get("code_type") {
                Some(v) => Some(
                    v.parse()
                        .map_err(|_| DatacollError::config("bad 'code_type' field"))?,
                ),
                None => None,
            },
        })
    }

    pub fn fields(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("term_id".to_string(), self.term_id.clone()),
            ("item_id".to_string(), self.item_id.clone()),
            ("device_id".to_string(), self.device_id.clone()),
            ("protocol_code".to_string(), self.protocol_code.to_string()),
        ]);
        if let Some(code_type) = self.code_type {
            map.insert("code_type".to_string(), code_type.to_string());
        }
        map
    }
}

/// `call` request carried on `CHANNEL:DEVICE_CALL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub device_id: String,
    pub term_id: String,
    pub item_id: String,
}

/// `ctrl` request carried on `CHANNEL:DEVICE_CTRL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrlRequest {
    pub device_id: String,
    pub term_id: String,
    pub item_id: String,
    pub value: f64,
}

/// Measurement event published on the per-point channels and appended to
/// `LST:DATA`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub device_id: String,
    pub term_id: String,
    pub item_id: String,
    /// Element timestamp, ISO-8601 without offset
    pub time: String,
    pub value: serde_json::Value,
}
