// 📦 Data Model - Tracker records, park packs, park descriptors
// Field names on the wire follow the deployed data files (plataforma, controlbox_id, string_orders)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Current pack format version
pub const PACK_VERSION: u32 = 1;

// ============================================================================
// TRACKER RECORD
// ============================================================================

/// One physical tracker unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRecord {
    /// Physical tracker number, unique within a pack
    pub tk: i64,

    #[serde(rename = "plataforma", alias = "platform")]
    pub platform: i64,

    #[serde(rename = "controlbox_id", alias = "controlboxId")]
    pub controlbox_id: i64,

    pub channel: i64,

    /// Normalized composite ids (`NN_NN_NN`)
    #[serde(default)]
    pub strings: Vec<String>,

    /// Declared order of each composite id, same length as `strings`
    #[serde(default, rename = "string_orders", alias = "stringOrders")]
    pub string_orders: Vec<u32>,
}

impl TrackerRecord {
    pub fn new(tk: i64, platform: i64, controlbox_id: i64, channel: i64) -> Self {
        TrackerRecord {
            tk,
            platform,
            controlbox_id,
            channel,
            strings: Vec::new(),
            string_orders: Vec::new(),
        }
    }

    /// Builder pattern: attach composite ids with orders `1..n`
    pub fn with_strings<I, S>(mut self, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strings = strings.into_iter().map(Into::into).collect();
        self.string_orders = (1..=self.strings.len() as u32).collect();
        self
    }

    /// Declared order for the composite id at `index` (falls back to position)
    pub fn order_of(&self, index: usize) -> u32 {
        self.string_orders
            .get(index)
            .copied()
            .unwrap_or(index as u32 + 1)
    }
}

// ============================================================================
// DATASET PACK
// ============================================================================

/// One park's full tracker dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    #[serde(default = "default_version")]
    pub version: u32,

    /// ISO date (`YYYY-MM-DD`), may be empty
    #[serde(default)]
    pub updated: String,

    pub trackers: Vec<TrackerRecord>,

    /// Top-level fields we don't model, kept so export stays faithful
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    PACK_VERSION
}

impl Default for Pack {
    fn default() -> Self {
        Pack {
            version: PACK_VERSION,
            updated: String::new(),
            trackers: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Pack {
    pub fn new(updated: impl Into<String>, trackers: Vec<TrackerRecord>) -> Self {
        Pack {
            updated: updated.into(),
            trackers,
            ..Pack::default()
        }
    }

    /// Empty pack stamped with today's date
    pub fn empty_today() -> Self {
        Pack::new(today(), Vec::new())
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// SHA-256 of the canonical JSON form, used to tell whether a refresh
    /// actually changed anything
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    /// Split an already-shaped pack object into its header fields and raw
    /// tracker rows. Rejects anything that is not an object with a
    /// `trackers` array.
    pub fn split_raw(value: Value) -> Result<(RawPackHeader, Vec<Value>)> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            Value::Array(_) => return Err(Error::malformed("expected a pack object, got a list")),
            other => {
                return Err(Error::malformed(format!(
                    "expected a pack object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let trackers = match obj.remove("trackers") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => {
                return Err(Error::malformed("missing 'trackers' field"));
            }
            Some(other) => {
                return Err(Error::malformed(format!(
                    "'trackers' must be a list, got {}",
                    json_kind(&other)
                )))
            }
        };

        let version = obj
            .remove("version")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(PACK_VERSION);

        let updated = match obj.remove("updated") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        Ok((
            RawPackHeader {
                version,
                updated,
                extra: obj,
            },
            trackers,
        ))
    }
}

/// Pack fields other than `trackers`, as read from an import or a fetch
#[derive(Debug, Clone, Default)]
pub struct RawPackHeader {
    pub version: u32,
    pub updated: String,
    pub extra: Map<String, Value>,
}

impl RawPackHeader {
    pub fn into_pack(self, trackers: Vec<TrackerRecord>) -> Pack {
        Pack {
            version: self.version,
            updated: self.updated,
            trackers,
            extra: self.extra,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Today's date as `YYYY-MM-DD` (UTC)
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

// ============================================================================
// PARK DESCRIPTOR
// ============================================================================

/// A park as listed by the external registry (`parks.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkDescriptor {
    pub id: String,
    pub name: String,

    /// Where the pre-built pack lives (URL or path)
    #[serde(rename = "dataLocation", alias = "data")]
    pub data_location: String,
}

/// Durable store key for a park
pub fn park_key(park_id: &str) -> String {
    format!("park:{}", park_id)
}
