//! JSON message protocol between the session client and the pose-analysis service.
//!
//! Every message is a JSON text frame with a `type` tag. Outbound and inbound
//! messages are closed enums; inbound types this client does not know decode to
//! [`ServerMessage::Unknown`] and are ignored by the transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::pose::Landmark;

/// Per-user detection threshold overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reps: Option<u32>,
}

impl Thresholds {
    pub fn is_empty(&self) -> bool {
        self.down_angle.is_none() && self.up_angle.is_none() && self.max_reps.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Any level this client does not know yet.
    #[serde(other)]
    Unknown,
}

/// Structured form error as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormError {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity { Severity::Unknown }

/// One analysis snapshot. Only `pose_detected` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub pose_detected: bool,
    #[serde(default)]
    pub landmarks: Option<Vec<Landmark>>,
    #[serde(default)]
    pub angles: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub rep_count: Option<u32>,
    /// Either a single string or a list on the wire.
    #[serde(default, deserialize_with = "one_or_many")]
    pub feedback: Option<Vec<String>>,
    /// Motion-state tag (`down`, `raising`, `holding`, ...)
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<FormError>>,
    #[serde(default)]
    pub hold_time_remaining: Option<f64>,
    #[serde(default)]
    pub current_side: Option<String>,
}

impl AnalysisEvent {
    /// Most recent feedback line, if any.
    pub fn latest_feedback(&self) -> Option<&str> {
        self.feedback.as_ref()?.last().map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<OneOrMany>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(list) => list,
    }))
}

// --- Message types ---

/// Client → service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SetThresholds { thresholds: Thresholds },
    Frame { data: String },
    Reset,
}

impl ClientMessage {
    pub fn is_frame(&self) -> bool {
        matches!(self, ClientMessage::Frame { .. })
    }
}

/// Control subset of [`ClientMessage`]; frames go through `send_frame`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    SetThresholds(Thresholds),
    Reset,
}

impl From<ControlMessage> for ClientMessage {
    fn from(msg: ControlMessage) -> Self {
        match msg {
            ControlMessage::SetThresholds(thresholds) => ClientMessage::SetThresholds { thresholds },
            ControlMessage::Reset => ClientMessage::Reset,
        }
    }
}

/// Service → client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Analysis(AnalysisEvent),
    ResetConfirmed,
    #[serde(other)]
    Unknown,
}

pub fn encode_client_message(msg: &ClientMessage) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

pub fn decode_server_message(text: &str) -> serde_json::Result<ServerMessage> {
    serde_json::from_str(text)
}
