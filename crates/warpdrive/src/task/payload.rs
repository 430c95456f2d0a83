//! Bridge between untyped queue payloads and typed task records.
//!
//! A generic job runner persists tasks as JSON objects without knowing the
//! concrete plugin. Each task type declares a schema version that is written
//! into the object and checked on the way back in.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Untyped task state as stored by the job queue.
pub type Payload = Map<String, Value>;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

pub trait TaskPayload: Serialize + DeserializeOwned {
    const SCHEMA_VERSION: u32;

    fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.insert(
                    SCHEMA_VERSION_KEY.to_string(),
                    Value::from(Self::SCHEMA_VERSION),
                );
                Ok(map)
            }
            other => Err(Error::Payload(format!(
                "task serialized to a non-object value: {other}"
            ))),
        }
    }

    /// Decode a payload, rejecting other schema versions.
    ///
    /// Payloads written before versioning carry no version and are read as
    /// the current schema.
    fn from_payload(mut payload: Payload) -> Result<Self> {
        if let Some(version) = payload.remove(SCHEMA_VERSION_KEY) {
            let version = version
                .as_u64()
                .ok_or_else(|| Error::Payload(format!("invalid schema version {version}")))?;
            if version != u64::from(Self::SCHEMA_VERSION) {
                return Err(Error::Payload(format!(
                    "unsupported schema version {version}, expected {}",
                    Self::SCHEMA_VERSION
                )));
            }
        }
        serde_json::from_value(Value::Object(payload)).map_err(|e| Error::Payload(e.to_string()))
    }
}
