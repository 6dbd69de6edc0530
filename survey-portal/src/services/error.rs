use crate::models::SurveyStep;
use portal_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account role does not match this portal")]
    RoleMismatch,

    #[error("No active session")]
    NoActiveSession,

    #[error("Step {submitted} submitted while {expected} is the current step")]
    OutOfOrderStep {
        expected: SurveyStep,
        submitted: SurveyStep,
    },

    #[error("Too many attempts, retry in {retry_after_secs}s")]
    TooManyAttempts { retry_after_secs: u64 },

    #[error("Timed out waiting for the session to become available")]
    SessionTimeout,

    #[error("Authentication callback failed: {0}")]
    CallbackProcessing(String),

    #[error("Invalid invite: {0}")]
    InvalidInvite(String),

    #[error("User is not a member of this team")]
    NotTeamMember,

    #[error("Team not found")]
    TeamNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Survey progress and membership diverged: {0}")]
    ProgressInconsistency(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Session store error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl PortalError {
    /// Machine-readable code carried in `?error=` redirects and JSON bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            PortalError::InvalidCredentials => "invalid_credentials",
            PortalError::RoleMismatch => "role_mismatch",
            PortalError::NoActiveSession => "no_active_session",
            PortalError::OutOfOrderStep { .. } => "out_of_order_step",
            PortalError::TooManyAttempts { .. } => "too_many_attempts",
            PortalError::SessionTimeout => "session_timeout",
            PortalError::CallbackProcessing(_) => "callback_error",
            PortalError::InvalidInvite(_) => "invalid_invite",
            PortalError::NotTeamMember => "not_team_member",
            PortalError::TeamNotFound => "team_not_found",
            PortalError::Forbidden(_) => "forbidden",
            PortalError::ProgressInconsistency(_) => "progress_inconsistency",
            PortalError::Provider(_) => "provider_error",
            PortalError::Storage(_) => "storage_error",
            PortalError::Session(_) => "session_error",
        }
    }
}

impl From<sqlx::Error> for PortalError {
    fn from(err: sqlx::Error) -> Self {
        PortalError::Storage(anyhow::Error::new(err))
    }
}

impl From<PortalError> for AppError {
    fn from(err: PortalError) -> Self {
        let code = err.error_code();
        match err {
            PortalError::InvalidCredentials | PortalError::NoActiveSession => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            PortalError::RoleMismatch | PortalError::NotTeamMember | PortalError::Forbidden(_) => {
                AppError::Forbidden(anyhow::anyhow!(err.to_string()))
            }
            PortalError::OutOfOrderStep { .. } | PortalError::InvalidInvite(_) => {
                AppError::Unprocessable {
                    code,
                    message: err.to_string(),
                }
            }
            PortalError::TeamNotFound => AppError::NotFound(anyhow::anyhow!("Team not found")),
            PortalError::TooManyAttempts { retry_after_secs } => {
                AppError::TooManyRequests(err.to_string(), Some(retry_after_secs))
            }
            PortalError::SessionTimeout => AppError::ServiceUnavailable,
            PortalError::CallbackProcessing(msg) | PortalError::Provider(msg) => {
                AppError::BadGateway(msg)
            }
            PortalError::ProgressInconsistency(msg) => {
                AppError::InternalError(anyhow::anyhow!("Progress inconsistency: {}", msg))
            }
            PortalError::Storage(e) => AppError::DatabaseError(e),
            PortalError::Session(e) => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}
