use chrono::{DateTime, Utc};
use serde::Serialize;

use haas_core::{AllocationId, DomainError, DomainResult, HardwareKindId, ProjectId, SubjectId};

use crate::quantity::Quantity;

/// A quantity of one hardware kind held by a project since a point in time.
///
/// Open records (`checked_in_at == None`) are outstanding units. Closed
/// records are immutable history. Check-in may shrink an open record and
/// close it, moving the still-outstanding rest into a new open record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    id: AllocationId,
    kind_id: HardwareKindId,
    project_id: ProjectId,
    subject_id: SubjectId,
    quantity: Quantity,
    checked_out_at: DateTime<Utc>,
    checked_in_at: Option<DateTime<Utc>>,
    checkout_seq: u64,
}

/// Position of an open record in the return queue: oldest checkout first,
/// ties broken by checkout sequence.
pub type FifoKey = (DateTime<Utc>, u64);

impl AllocationRecord {
    /// A new open record produced by a checkout.
    pub fn open(
        kind_id: HardwareKindId,
        project_id: ProjectId,
        subject_id: SubjectId,
        quantity: Quantity,
        checked_out_at: DateTime<Utc>,
        checkout_seq: u64,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            kind_id,
            project_id,
            subject_id,
            quantity,
            checked_out_at,
            checked_in_at: None,
            checkout_seq,
        }
    }

    /// Rehydrate a record from persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: AllocationId,
        kind_id: HardwareKindId,
        project_id: ProjectId,
        subject_id: SubjectId,
        quantity: Quantity,
        checked_out_at: DateTime<Utc>,
        checked_in_at: Option<DateTime<Utc>>,
        checkout_seq: u64,
    ) -> DomainResult<Self> {
        if let Some(at) = checked_in_at {
            if at < checked_out_at {
                return Err(DomainError::invariant(format!(
                    "record {id} checked in before it was checked out"
                )));
            }
        }
        Ok(Self {
            id,
            kind_id,
            project_id,
            subject_id,
            quantity,
            checked_out_at,
            checked_in_at,
            checkout_seq,
        })
    }

    pub fn id_typed(&self) -> AllocationId {
        self.id
    }

    pub fn kind_id(&self) -> &HardwareKindId {
        &self.kind_id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn checked_out_at(&self) -> DateTime<Utc> {
        self.checked_out_at
    }

    pub fn checked_in_at(&self) -> Option<DateTime<Utc>> {
        self.checked_in_at
    }

    pub fn checkout_seq(&self) -> u64 {
        self.checkout_seq
    }

    pub fn is_open(&self) -> bool {
        self.checked_in_at.is_none()
    }

    pub fn fifo_key(&self) -> FifoKey {
        (self.checked_out_at, self.checkout_seq)
    }

    /// Close the whole record.
    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        debug_assert!(self.is_open(), "closing an already closed record");
        self.checked_in_at = Some(at.max(self.checked_out_at));
    }

    /// Close `returned` units of this record and hand back the open rest.
    ///
    /// Requires `returned < quantity`. The rest keeps kind, project, subject,
    /// checkout time and checkout sequence, so it stays at the same queue
    /// position.
    pub(crate) fn split_close(&mut self, returned: Quantity, at: DateTime<Utc>) -> DomainResult<Self> {
        let rest = self
            .quantity
            .get()
            .checked_sub(returned.get())
            .and_then(|n| Quantity::new(n).ok())
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "cannot split {} units off record {} holding {}",
                    returned, self.id, self.quantity
                ))
            })?;

        let remainder = Self {
            id: AllocationId::new(),
            kind_id: self.kind_id.clone(),
            project_id: self.project_id,
            subject_id: self.subject_id,
            quantity: rest,
            checked_out_at: self.checked_out_at,
            checked_in_at: None,
            checkout_seq: self.checkout_seq,
        };

        self.quantity = returned;
        self.close(at);
        Ok(remainder)
    }
}
