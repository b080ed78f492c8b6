use serde::Serialize;

use haas_core::{DomainError, DomainResult, HardwareKindId};

use crate::error::AllocationError;
use crate::quantity::Quantity;

/// A pool of interchangeable hardware units and its capacity accounting.
///
/// `available_capacity` is a cached aggregate of ledger state: it always
/// equals `total_capacity` minus the units held by open allocation records of
/// this kind. It only changes through [`HardwareKind::reserve`],
/// [`HardwareKind::release`] and [`HardwareKind::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareKind {
    id: HardwareKindId,
    name: String,
    total_capacity: u32,
    available_capacity: u32,
}

impl HardwareKind {
    /// A freshly registered kind with every unit available.
    pub fn new(id: HardwareKindId, name: impl Into<String>, total_capacity: u32) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("hardware kind name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            total_capacity,
            available_capacity: total_capacity,
        })
    }

    /// Rehydrate a kind from persisted state.
    pub fn restore(
        id: HardwareKindId,
        name: String,
        total_capacity: u32,
        available_capacity: u32,
    ) -> DomainResult<Self> {
        if available_capacity > total_capacity {
            return Err(DomainError::invariant(format!(
                "kind '{id}' has available {available_capacity} above total {total_capacity}"
            )));
        }
        Ok(Self {
            id,
            name,
            total_capacity,
            available_capacity,
        })
    }

    pub fn id_typed(&self) -> &HardwareKindId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_capacity(&self) -> u32 {
        self.total_capacity
    }

    pub fn available_capacity(&self) -> u32 {
        self.available_capacity
    }

    /// Units currently held by projects.
    pub fn allocated(&self) -> u32 {
        self.total_capacity - self.available_capacity
    }

    /// Take `quantity` units out of the pool.
    pub fn reserve(&mut self, quantity: Quantity) -> Result<(), AllocationError> {
        let requested = quantity.get();
        if requested > self.available_capacity {
            return Err(AllocationError::InsufficientCapacity {
                kind_id: self.id.clone(),
                requested,
                available: self.available_capacity,
            });
        }
        self.available_capacity -= requested;
        Ok(())
    }

    /// Put `quantity` units back into the pool.
    ///
    /// The ledger never releases more than it reserved, so exceeding
    /// `total_capacity` here is an invariant violation.
    pub fn release(&mut self, quantity: Quantity) -> DomainResult<()> {
        let released = quantity.get();
        let next = self
            .available_capacity
            .checked_add(released)
            .filter(|next| *next <= self.total_capacity)
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "releasing {released} units of '{}' would exceed total capacity {} (available {})",
                    self.id, self.total_capacity, self.available_capacity
                ))
            })?;
        self.available_capacity = next;
        Ok(())
    }

    /// Re-derive `available_capacity` from the units held by open records.
    ///
    /// Returns the previous value when it had drifted, `None` when it was
    /// already consistent.
    pub fn reconcile(&mut self, open_units: u64) -> DomainResult<Option<u32>> {
        if open_units > u64::from(self.total_capacity) {
            return Err(DomainError::invariant(format!(
                "kind '{}' has {open_units} units checked out but only {} in total",
                self.id, self.total_capacity
            )));
        }
        // Bounded by total_capacity above.
        let expected = self.total_capacity - open_units as u32;
        if expected == self.available_capacity {
            return Ok(None);
        }
        let previous = self.available_capacity;
        self.available_capacity = expected;
        Ok(Some(previous))
    }
}
