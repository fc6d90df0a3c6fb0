//! Blaster GATT payload definitions
//!
//! The saved-codes characteristic returns a JSON array; the schedule
//! characteristic accepts JSON objects; the status characteristic notifies
//! free-form UTF-8 strings such as `OK:Red` or `ERR:unknown`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransportError;

/// IR blaster primary service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xe97a0001_c116_4a63_a60f_0e9b4d3648f3);
/// Saved codes list (read)
pub const SAVED_CODES_UUID: Uuid = Uuid::from_u128(0xe97a0002_c116_4a63_a60f_0e9b4d3648f3);
/// Send saved code by index (write)
pub const SEND_UUID: Uuid = Uuid::from_u128(0xe97a0003_c116_4a63_a60f_0e9b4d3648f3);
/// Send status (notify)
pub const STATUS_UUID: Uuid = Uuid::from_u128(0xe97a0004_c116_4a63_a60f_0e9b4d3648f3);
/// Delayed command schedule and heartbeat (write)
pub const SCHEDULE_UUID: Uuid = Uuid::from_u128(0xe97a0005_c116_4a63_a60f_0e9b4d3648f3);

/// One entry of the saved codes list, in full or compact form
#[derive(Debug, Clone, Deserialize)]
pub struct SavedCode {
    #[serde(alias = "i")]
    pub index: Option<i64>,
    #[serde(alias = "n", default)]
    pub name: Option<String>,
}

/// Writes accepted by the schedule characteristic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScheduleRequest {
    /// Arm `command` to run after `delay_seconds` unless a heartbeat arrives
    Arm { delay_seconds: u64, command: String },
    /// Reset the armed timer
    Heartbeat { heartbeat: bool },
}

impl ScheduleRequest {
    pub fn heartbeat() -> Self {
        Self::Heartbeat { heartbeat: true }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Case-insensitive map from saved-code name to send index
#[derive(Debug, Clone, Default)]
pub struct CodeTable {
    by_name: HashMap<String, u8>,
}

impl CodeTable {
    /// Parse the raw saved-codes characteristic value.
    ///
    /// Entries that are not objects, lack a name, or carry an index outside
    /// 0..=255 are skipped.
    pub fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            return Err(TransportError::MalformedCodes("empty response".to_string()));
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let entries = match value {
            serde_json::Value::Array(entries) => entries,
            other => {
                return Err(TransportError::MalformedCodes(format!(
                    "expected a list, got {other}"
                )))
            }
        };

        let by_name = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<SavedCode>(entry).ok())
            .filter_map(|code| {
                let name = code.name.filter(|n| !n.is_empty())?;
                let index = u8::try_from(code.index?).ok()?;
                Some((name.to_lowercase(), index))
            })
            .collect();

        Ok(Self { by_name })
    }

    pub fn index_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

/// Decode a status notification
pub fn decode_status(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
