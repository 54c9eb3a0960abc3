use serde_json::json;
use thiserror::Error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Failure taxonomy for engine operations. `not_found` means the id itself
/// did not resolve; `not_authorized` means it resolved but the caller lacks
/// the capability; `enrollment_required` is the unenrolled-student submit
/// path; `invalid_state` is a disallowed status transition.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{what} not found")]
    NotFound { what: &'static str },
    #[error("{0}")]
    NotAuthorized(String),
    #[error("student is not enrolled in this class")]
    EnrollmentRequired,
    #[error("cannot {action} a submission in status '{status}'")]
    InvalidState {
        action: &'static str,
        status: String,
    },
    #[error("{source}")]
    Db {
        code: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "not_found",
            CoreError::NotAuthorized(_) => "not_authorized",
            CoreError::EnrollmentRequired => "enrollment_required",
            CoreError::InvalidState { .. } => "invalid_state",
            CoreError::Db { code, .. } => code,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::InvalidState { status, .. } => Some(json!({ "status": status })),
            _ => None,
        }
    }

    pub fn response(&self, id: &str) -> serde_json::Value {
        err(id, self.code(), self.to_string(), self.details())
    }
}

/// Tag a rusqlite failure with the operation-specific wire code
/// (`db_query_failed`, `db_insert_failed`, ...).
pub fn db_err(code: &'static str) -> impl FnOnce(rusqlite::Error) -> CoreError {
    move |source| CoreError::Db { code, source }
}
