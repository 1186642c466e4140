use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;

use crate::error::OpsErr;
use crate::error::Result;

/// Back-end system an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemTag {
    #[serde(rename = "ad")]
    Directory,
    #[serde(rename = "print")]
    Print,
    #[serde(rename = "vpn")]
    Vpn,
}

impl SystemTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemTag::Directory => "ad",
            SystemTag::Print => "print",
            SystemTag::Vpn => "vpn",
        }
    }
}

impl fmt::Display for SystemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemTag {
    type Err = OpsErr;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ad" => Ok(SystemTag::Directory),
            "print" => Ok(SystemTag::Print),
            "vpn" => Ok(SystemTag::Vpn),
            other => Err(OpsErr::InvalidRequest(format!("unknown system `{other}`"))),
        }
    }
}

/// What a successful operation hands back to the job store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationReport {
    pub message: String,
    /// Human-readable summary; preferred over the raw progress log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_text: Option<String>,
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl OperationReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_log_text(mut self, log_text: impl Into<String>) -> Self {
        self.log_text = Some(log_text.into());
        self
    }

    pub fn with_items<T: Serialize>(mut self, items: &[T]) -> Self {
        self.items = items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Decode free-form request parameters into a typed request.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(params).map_err(|err| OpsErr::InvalidRequest(err.to_string()))
}
