use crate::api::BackendError;
use crate::model::CaddieStatus;
use crate::validation::ValidationError;
use thiserror::Error;

/// Failure of a core operation. Every variant leaves local state untouched.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("caddie {caddie_id} is {from} and cannot {action}")]
    InvalidStateTransition {
        caddie_id: String,
        from: CaddieStatus,
        action: &'static str,
    },
    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("admin privileges required")]
    Unauthorized,
}

impl CoreError {
    pub fn caddie_not_found(id: &str) -> Self {
        CoreError::NotFound {
            kind: "caddie",
            id: id.to_string(),
        }
    }

    /// True for failures the caller can show as a message and move on from.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. }
                | CoreError::InvalidStateTransition { .. }
                | CoreError::Validation(_)
                | CoreError::Unauthorized
        )
    }
}
