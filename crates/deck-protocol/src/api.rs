//! Inbound API shapes consumed from the UI layer.

use deck_core::{ProjectId, SessionId, SessionMode};
use serde::{Deserialize, Serialize};

/// `create {cwd, run_claude, skip_permissions, resume_session_id?}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub cwd: String,
    #[serde(default)]
    pub run_claude: bool,
    #[serde(default)]
    pub skip_permissions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    /// Explicit project; resolved from `cwd` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

impl CreateRequest {
    pub fn shell(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Default::default()
        }
    }

    pub fn claude(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            run_claude: true,
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn mode(&self) -> SessionMode {
        if self.run_claude {
            SessionMode::Claude
        } else {
            SessionMode::Shell
        }
    }
}

/// `{success, id}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateResponse {
    pub fn ok(id: SessionId) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.to_string()),
        }
    }
}

impl<E: ToString> From<Result<SessionId, E>> for CreateResponse {
    fn from(result: Result<SessionId, E>) -> Self {
        match result {
            Ok(id) => Self::ok(id),
            Err(e) => Self::failed(e),
        }
    }
}

/// `write {id, bytes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub id: SessionId,
    pub bytes: Vec<u8>,
}

/// `resize {id, cols, rows}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub id: SessionId,
    pub cols: u16,
    pub rows: u16,
}

/// `kill {id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRequest {
    pub id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateRequest = serde_json::from_str(r#"{"cwd": "/tmp"}"#).unwrap();
        assert_eq!(req, CreateRequest::shell("/tmp"));
        assert_eq!(req.mode(), SessionMode::Shell);

        let req: CreateRequest = serde_json::from_str(
            r#"{"cwd": "/p", "run_claude": true, "skip_permissions": true, "resume_session_id": "r1"}"#,
        )
        .unwrap();
        assert_eq!(req.mode(), SessionMode::Claude);
        assert_eq!(req.resume_session_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_create_response_shapes() {
        let ok = serde_json::to_value(CreateResponse::ok(SessionId::new(4))).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "id": 4}));

        let failed: CreateResponse = Err::<SessionId, _>("PTY spawn failed").into();
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "PTY spawn failed"})
        );
    }
}
