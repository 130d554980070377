//! JSON bodies of the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IndexError;
use crate::workspace::Workspace;

// ─── Envelope ────────────────────────────────────────────────────────

/// Every response: `code` 0 on success, 1 on failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommonResponse {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommonResponse {
    pub fn ok() -> Self {
        Self::message("Ok")
    }

    pub fn message(message: impl Into<String>) -> Self {
        CommonResponse {
            code: 0,
            message: message.into(),
            data: None,
        }
    }

    /// Success carrying `data`. A value that cannot be encoded turns into
    /// a failure.
    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => CommonResponse {
                code: 0,
                message: "Ok".to_string(),
                data: Some(value),
            },
            Err(e) => Self::failure(format!("cannot encode response: {}", e)),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        CommonResponse {
            code: 1,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(err: &IndexError) -> Self {
        Self::failure(err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

// ─── Requests ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DocumentRequest {
    /// Absolute workspace path.
    pub workspace: String,
    /// Absolute, or relative to the workspace.
    pub path: String,
}

// ─── Response data ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerStatus {
    pub pid: u32,
    pub version: String,
    pub shutting_down: bool,
    pub restarting: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkspaceList {
    pub workspaces: Vec<Workspace>,
}
