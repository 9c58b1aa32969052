use ac_agent::AgentError;
use ac_git::GitError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> ApiErrorResponse {
        ApiErrorResponse {
            status: StatusCode::BAD_REQUEST,
            error: Self::new("INVALID_REQUEST", message),
        }
    }

    pub fn not_found(resource: &str) -> ApiErrorResponse {
        ApiErrorResponse {
            status: StatusCode::NOT_FOUND,
            error: Self::new("NOT_FOUND", format!("{resource} not found")),
        }
    }

    pub fn internal(message: impl Into<String>) -> ApiErrorResponse {
        ApiErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: Self::new("INTERNAL_ERROR", message),
        }
    }
}

pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        (self.status, [("content-type", "application/json")], body).into_response()
    }
}

impl From<AgentError> for ApiErrorResponse {
    fn from(err: AgentError) -> Self {
        match &err {
            AgentError::AgentNotFound(_) => ApiError::not_found("Agent"),
            AgentError::TabNotFound(_) => ApiError::not_found("Tab"),
            AgentError::NoTabs(_) => ApiError::bad_request(err.to_string()),
            AgentError::Git(git) => git_error_response(git),
            AgentError::Pty(_) | AgentError::Io(_) => ApiError::internal(err.to_string()),
        }
    }
}

impl From<GitError> for ApiErrorResponse {
    fn from(err: GitError) -> Self {
        git_error_response(&err)
    }
}

fn git_error_response(err: &GitError) -> ApiErrorResponse {
    let code = match err {
        GitError::NotGitRepository(_) => "NOT_GIT_REPOSITORY",
        GitError::TargetBranchUnknown => "TARGET_BRANCH_UNKNOWN",
        _ => "GIT_ERROR",
    };
    ApiErrorResponse {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        error: ApiError::new(code, err.to_string()),
    }
}
