//! The reference action set a task can ask a browser agent to perform.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl Default for WaitUntil {
    fn default() -> Self {
        Self::Load
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Navigate { url: String, wait_until: WaitUntil },
    Click { selector: String, timeout_ms: u64 },
    Type { selector: String, text: String },
    GetText { selector: String },
    Screenshot { full_page: bool, path: Option<String> },
    GetContent,
    Evaluate { script: String },
}

impl Action {
    /// Parse an `(action, parameters)` pair from a resolved task into a
    /// concrete `Action`, the form both the scheduler and `BrowserDriver`
    /// agree on.
    pub fn parse(action: &str, parameters: &Value) -> Result<Self, DriverError> {
        let field_str = |name: &str| -> Result<String, DriverError> {
            parameters
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DriverError::InvalidAction(format!("missing field '{name}'")))
        };

        match action {
            "navigate" => {
                let url = field_str("url")?;
                let wait_until = parameters
                    .get("wait_until")
                    .and_then(Value::as_str)
                    .map(|s| match s {
                        "domcontentloaded" => Ok(WaitUntil::DomContentLoaded),
                        "networkidle" => Ok(WaitUntil::NetworkIdle),
                        "load" => Ok(WaitUntil::Load),
                        other => Err(DriverError::InvalidAction(format!(
                            "unknown wait_until '{other}'"
                        ))),
                    })
                    .transpose()?
                    .unwrap_or_default();
                Ok(Self::Navigate { url, wait_until })
            }
            "click" => {
                let selector = field_str("selector")?;
                let timeout_ms = parameters
                    .get("timeout_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(5_000);
                Ok(Self::Click {
                    selector,
                    timeout_ms,
                })
            }
            "type" => Ok(Self::Type {
                selector: field_str("selector")?,
                text: field_str("text")?,
            }),
            "get_text" => Ok(Self::GetText {
                selector: field_str("selector")?,
            }),
            "screenshot" => Ok(Self::Screenshot {
                full_page: parameters
                    .get("full_page")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                path: parameters
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            "get_content" => Ok(Self::GetContent),
            "evaluate" => Ok(Self::Evaluate {
                script: field_str("script")?,
            }),
            other => Err(DriverError::InvalidAction(format!(
                "unknown action '{other}'"
            ))),
        }
    }
}

/// The JSON-shaped result of a successful action, stored verbatim as a
/// task run's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionResult(pub Value);

impl ActionResult {
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    #[must_use]
    pub fn text(key: &str, value: impl Into<String>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), Value::String(value.into()));
        Self(Value::Object(map))
    }
}
