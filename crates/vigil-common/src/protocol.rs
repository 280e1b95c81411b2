//! Collection schema shared between the viewer and the broadcasting device.
//!
//! The device side writes `active_cameras` and `mule_logs`; the viewer writes
//! `commands`. Typed views here never fail on missing optional fields so a
//! partially written document still shows up in a listing.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::fields;
use crate::record::{Document, Fields, Value};

/// Devices currently broadcasting, keyed by channel id.
pub const ACTIVE_CAMERAS: &str = "active_cameras";
/// Pending instruction per device, keyed by channel id.
pub const COMMANDS: &str = "commands";
/// Sensitive access events, keyed by store-assigned id.
pub const MULE_LOGS: &str = "mule_logs";

pub const FIELD_EMAIL: &str = "email";
pub const FIELD_FILE_URL: &str = "file_url";
pub const FIELD_ACTION: &str = "action";
pub const FIELD_USER: &str = "user";
pub const FIELD_CP_ACCESSED: &str = "cp_accessed";
pub const FIELD_DATA_ACCESSED: &str = "data_accessed";
pub const FIELD_IMAGE_BASE64: &str = "image_base64";
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// Label shown for a broadcasting device that did not publish an owner.
pub const UNKNOWN_OWNER: &str = "Unknown";

const NO_ACCESS_MARKER: &str = "no access";

/// Out-of-band file retrieval address published by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEndpoint {
    Reachable(String),
    /// The device explicitly reports that file access is unavailable.
    NoAccess,
}

impl FileEndpoint {
    /// Parse a raw `file_url` field. Empty values count as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.eq_ignore_ascii_case(NO_ACCESS_MARKER) {
            Some(FileEndpoint::NoAccess)
        } else {
            Some(FileEndpoint::Reachable(trimmed.to_string()))
        }
    }
}

impl fmt::Display for FileEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEndpoint::Reachable(addr) => f.write_str(addr),
            FileEndpoint::NoAccess => f.write_str(NO_ACCESS_MARKER),
        }
    }
}

/// One currently broadcasting device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub channel_id: String,
    pub owner_label: String,
    pub file_endpoint: Option<FileEndpoint>,
}

impl DeviceSession {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            channel_id: doc.id.clone(),
            owner_label: doc
                .str_field(FIELD_EMAIL)
                .unwrap_or(UNKNOWN_OWNER)
                .to_string(),
            file_endpoint: doc.str_field(FIELD_FILE_URL).and_then(FileEndpoint::parse),
        }
    }

    /// Fields as the device side writes them.
    pub fn to_fields(&self) -> Fields {
        let mut fields = fields! { FIELD_EMAIL => self.owner_label.as_str() };
        if let Some(endpoint) = &self.file_endpoint {
            fields.insert(FIELD_FILE_URL.to_string(), Value::from(endpoint.to_string()));
        }
        fields
    }
}

/// Instruction the viewer can leave for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandAction {
    SwitchCamera,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwitchCamera => "switch_camera",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "switch_camera" => Ok(Self::SwitchCamera),
            other => Err(Error::serialization(format!("unknown command action: {other}"))),
        }
    }
}

/// The single pending command for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target_channel_id: String,
    pub action: CommandAction,
}

impl Command {
    pub fn from_document(doc: &Document) -> Result<Self, Error> {
        let action = doc
            .str_field(FIELD_ACTION)
            .ok_or_else(|| Error::serialization(format!("command {} has no action", doc.id)))?
            .parse()?;
        Ok(Self {
            target_channel_id: doc.id.clone(),
            action,
        })
    }

    pub fn to_fields(&self) -> Fields {
        fields! { FIELD_ACTION => self.action.as_str() }
    }
}

/// Evidence attached to an incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    Image(Vec<u8>),
    /// The blob was present but could not be decoded.
    Malformed(String),
}

/// A logged sensitive-access event.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    pub id: String,
    pub user_label: String,
    pub control_point_accessed: String,
    pub data_accessed: String,
    pub evidence: Option<Evidence>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncidentRecord {
    pub fn from_document(doc: &Document) -> Self {
        let text = |key: &str| doc.str_field(key).unwrap_or_default().to_string();
        Self {
            id: doc.id.clone(),
            user_label: text(FIELD_USER),
            control_point_accessed: text(FIELD_CP_ACCESSED),
            data_accessed: text(FIELD_DATA_ACCESSED),
            evidence: doc.get(FIELD_IMAGE_BASE64).and_then(decode_evidence),
            timestamp: doc.get(FIELD_TIMESTAMP).and_then(Value::as_timestamp),
        }
    }
}

fn decode_evidence(value: &Value) -> Option<Evidence> {
    match value {
        Value::Bytes(bytes) => Some(Evidence::Image(bytes.clone())),
        Value::String(encoded) if encoded.trim().is_empty() => None,
        Value::String(encoded) => Some(
            match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
                Ok(bytes) => Evidence::Image(bytes),
                Err(e) => Evidence::Malformed(e.to_string()),
            },
        ),
        _ => None,
    }
}
