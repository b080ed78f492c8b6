use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haas_core::{DomainError, HardwareKindId, ProjectId, SubjectId};

use crate::allocation::AllocationRecord;
use crate::error::AllocationError;
use crate::kind::HardwareKind;
use crate::quantity::Quantity;

/// Command: reserve units of a kind for a project.
///
/// Project existence and the subject's authorization are checked before
/// this command is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub project_id: ProjectId,
    pub kind_id: HardwareKindId,
    pub subject_id: SubjectId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Decided state after a checkout: the kind with its capacity decremented and
/// the new open record. Both must be persisted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    pub kind: HardwareKind,
    pub record: AllocationRecord,
}

/// Decide a checkout against the current state of `kind`.
///
/// Pure: `kind` is not mutated and nothing is produced on rejection.
pub fn plan_checkout(
    kind: &HardwareKind,
    cmd: &Checkout,
    checkout_seq: u64,
) -> Result<CheckoutOutcome, AllocationError> {
    ensure_kind(kind, &cmd.kind_id)?;

    let mut kind = kind.clone();
    kind.reserve(cmd.quantity)?;

    let record = AllocationRecord::open(
        cmd.kind_id.clone(),
        cmd.project_id,
        cmd.subject_id,
        cmd.quantity,
        cmd.occurred_at,
        checkout_seq,
    );

    Ok(CheckoutOutcome { kind, record })
}

pub(crate) fn ensure_kind(kind: &HardwareKind, kind_id: &HardwareKindId) -> Result<(), DomainError> {
    if kind.id_typed() != kind_id {
        return Err(DomainError::invariant(format!(
            "command targets kind '{kind_id}' but state for '{}' was loaded",
            kind.id_typed()
        )));
    }
    Ok(())
}
