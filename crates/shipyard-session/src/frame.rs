//! Inbound session frames.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{CommandError, CommandResult};

/// One inbound frame: `{ "step", "command", "data" }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// The lifecycle step a frame asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Init,
    Connected,
    Close,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `None` for an empty or unrecognized step.
    pub fn step(&self) -> Option<Step> {
        match self.step.trim() {
            "init" => Some(Step::Init),
            "connected" => Some(Step::Connected),
            "close" => Some(Step::Close),
            _ => None,
        }
    }

    /// `data.k8s_resource_id`, accepted as an integer, an integral float,
    /// or a numeric string.
    pub fn resource_id(&self) -> Option<u64> {
        match self.data.get("k8s_resource_id")? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn require_resource_id(&self) -> CommandResult<u64> {
        self.resource_id()
            .ok_or(CommandError::MissingArgument("k8s_resource_id"))
    }

    /// A non-empty string argument from `data`.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
