use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haas_core::{DomainError, HardwareKindId, ProjectId};

use crate::allocation::AllocationRecord;
use crate::checkout::ensure_kind;
use crate::error::AllocationError;
use crate::kind::HardwareKind;
use crate::quantity::Quantity;

/// Command: return units of a kind held by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkin {
    pub project_id: ProjectId,
    pub kind_id: HardwareKindId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Decided state after a check-in.
///
/// `closed` holds every record that was closed (in return order, the last one
/// possibly shrunk by a split); `remainder` is the new open record carrying
/// the unreturned part of a split. All of it plus `kind` must be persisted
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinOutcome {
    pub kind: HardwareKind,
    pub closed: Vec<AllocationRecord>,
    pub remainder: Option<AllocationRecord>,
    pub units_returned: Quantity,
}

/// Units held by a set of records.
pub fn outstanding(records: &[AllocationRecord]) -> u64 {
    records.iter().map(|r| u64::from(r.quantity().get())).sum()
}

/// Decide a check-in against `kind` and the project's open records of that kind.
///
/// Records are retired oldest first (see [`AllocationRecord::fifo_key`]).
/// Records that fit in the remaining quantity are closed whole; the first one
/// that doesn't is split into a closed part and an open rest. Exactly
/// `cmd.quantity` units move from open to closed and the kind gets the same
/// number back.
///
/// Pure: inputs are not mutated and nothing is produced on rejection.
pub fn plan_checkin(
    kind: &HardwareKind,
    open: &[AllocationRecord],
    cmd: &Checkin,
) -> Result<CheckinOutcome, AllocationError> {
    ensure_kind(kind, &cmd.kind_id)?;
    for record in open {
        if !record.is_open() || record.project_id() != cmd.project_id || record.kind_id() != &cmd.kind_id {
            return Err(DomainError::invariant(format!(
                "record {} is not an open '{}' allocation of project {}",
                record.id_typed(),
                cmd.kind_id,
                cmd.project_id
            ))
            .into());
        }
    }

    let requested = cmd.quantity.get();
    let total_outstanding = outstanding(open);
    if u64::from(requested) > total_outstanding {
        return Err(AllocationError::OverReturn {
            kind_id: cmd.kind_id.clone(),
            requested,
            outstanding: total_outstanding,
        });
    }

    let mut queue = open.to_vec();
    queue.sort_by_key(AllocationRecord::fifo_key);

    let mut remaining = requested;
    let mut closed = Vec::new();
    let mut remainder = None;

    for mut record in queue {
        if remaining == 0 {
            break;
        }
        let held = record.quantity().get();
        if held <= remaining {
            record.close(cmd.occurred_at);
            remaining -= held;
        } else {
            remainder = Some(record.split_close(Quantity::new(remaining)?, cmd.occurred_at)?);
            remaining = 0;
        }
        closed.push(record);
    }

    let mut kind = kind.clone();
    kind.release(cmd.quantity)?;

    Ok(CheckinOutcome {
        kind,
        closed,
        remainder,
        units_returned: cmd.quantity,
    })
}
