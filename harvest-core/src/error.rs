use thiserror::Error;
use uuid::Uuid;

use crate::types::DonationStatus;

/// Errors surfaced synchronously to the caller of a donation, chat or inbox
/// command. None of them leave state mutated.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("cannot {event} a donation that is {status}")]
    InvalidTransition {
        event: &'static str,
        status: DonationStatus,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("donation {id} was modified concurrently, retry the request")]
    StoreConflict { id: Uuid },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl HarvestError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        HarvestError::Forbidden(reason.into())
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        HarvestError::NotFound { entity, id }
    }

    /// Conflicts are the only errors worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::StoreConflict { .. })
    }
}

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;
