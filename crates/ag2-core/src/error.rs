use ag2_protocol::anthropic::types::ErrorBody;

pub type AppResult<T> = Result<T, AppError>;

/// Non-upstream failure modes from spec §7. Upstream passthrough (2xx and
/// non-429 4xx/5xx) and the 429 retry/rotate policy are carried as typed
/// [`crate::orchestrator`] outcomes rather than through this type — they are
/// not exceptional, they're the orchestrator's normal decision space.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("no accounts available in pool")]
    PoolEmpty,
    #[error("account is not eligible: {0}")]
    AccountIneligible(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Http(#[from] wreq::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::PoolEmpty | AppError::AccountIneligible(_) => 500,
            AppError::Io(_) | AppError::Json(_) | AppError::Http(_) | AppError::Internal(_) => 500,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.to_string())
    }
}
