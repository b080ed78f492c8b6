use thiserror::Error;

use haas_core::{DomainError, HardwareKindId, ProjectId};

/// Rejection of a checkout or check-in request.
///
/// All variants except [`AllocationError::Invariant`] are expected business
/// outcomes and are reported to the caller as-is. `Invariant` means ledger
/// state or a store returned something that can't happen; callers surface it
/// as an internal failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("hardware kind '{0}' not found")]
    KindNotFound(HardwareKindId),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("quantity must be a positive integer (got {0})")]
    InvalidQuantity(i64),

    #[error("not enough '{kind_id}' available: requested {requested}, available {available}")]
    InsufficientCapacity {
        kind_id: HardwareKindId,
        requested: u32,
        available: u32,
    },

    #[error("cannot check in {requested} units of '{kind_id}': only {outstanding} checked out")]
    OverReturn {
        kind_id: HardwareKindId,
        requested: u32,
        outstanding: u64,
    },

    #[error(transparent)]
    Invariant(#[from] DomainError),
}

impl AllocationError {
    /// Stable machine-readable code for transports.
    pub fn code(&self) -> &'static str {
        match self {
            AllocationError::KindNotFound(_) | AllocationError::ProjectNotFound(_) => "not_found",
            AllocationError::InvalidQuantity(_) => "invalid_quantity",
            AllocationError::InsufficientCapacity { .. } => "insufficient_capacity",
            AllocationError::OverReturn { .. } => "over_return",
            AllocationError::Invariant(_) => "invariant_violation",
        }
    }

    /// `true` for expected business rejections, `false` for defects.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AllocationError::Invariant(_))
    }
}
