use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use haas_core::{AllocationId, HardwareKindId, ProjectId};
use haas_hardware::{AllocationRecord, HardwareKind};

use super::{sort_checkout_order, LedgerCommit, LedgerStore, StoreError};

#[derive(Debug, Default)]
struct State {
    kinds: BTreeMap<HardwareKindId, HardwareKind>,
    records: HashMap<AllocationId, AllocationRecord>,
    max_seq: u64,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A commit is validated and applied under one write
/// lock, so readers never see half of it.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Backend {
            operation: "read",
            message: "lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Backend {
            operation: "write",
            message: "lock poisoned".to_string(),
        })
    }

    /// Overwrite a kind's stored state without touching records.
    ///
    /// Test hook for simulating a crash between a record write and the
    /// matching capacity write.
    #[doc(hidden)]
    pub fn force_kind_state(&self, kind: HardwareKind) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.kinds.insert(kind.id_typed().clone(), kind);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        if state.kinds.contains_key(kind.id_typed()) {
            return Ok(false);
        }
        state.kinds.insert(kind.id_typed().clone(), kind);
        Ok(true)
    }

    async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError> {
        Ok(self.read()?.kinds.get(kind_id).cloned())
    }

    async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError> {
        Ok(self.read()?.kinds.values().cloned().collect())
    }

    async fn open_records(
        &self,
        project_id: ProjectId,
        kind_id: &HardwareKindId,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .records
            .values()
            .filter(|r| r.is_open() && r.project_id() == project_id && r.kind_id() == kind_id)
            .cloned()
            .collect();
        sort_checkout_order(&mut out);
        Ok(out)
    }

    async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError> {
        let state = self.read()?;
        let mut out: Vec<_> = state
            .records
            .values()
            .filter(|r| r.project_id() == project_id)
            .cloned()
            .collect();
        sort_checkout_order(&mut out);
        Ok(out)
    }

    async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|r| r.is_open() && r.kind_id() == kind_id)
            .map(|r| u64::from(r.quantity().get()))
            .sum())
    }

    async fn max_checkout_seq(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.max_seq)
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut state = self.write()?;

        // Validate everything first: nothing is applied unless all of it can be.
        match state.kinds.get(commit.kind.id_typed()) {
            Some(existing) if existing.total_capacity() == commit.kind.total_capacity() => {}
            Some(_) => {
                return Err(StoreError::Conflict(format!(
                    "total capacity of '{}' changed",
                    commit.kind.id_typed()
                )));
            }
            None => {
                return Err(StoreError::Conflict(format!(
                    "unknown hardware kind '{}'",
                    commit.kind.id_typed()
                )));
            }
        }
        for r in &commit.updated {
            match state.records.get(&r.id_typed()) {
                Some(existing) if existing.is_open() => {}
                Some(_) => {
                    return Err(StoreError::Conflict(format!(
                        "record {} is closed",
                        r.id_typed()
                    )));
                }
                None => {
                    return Err(StoreError::Conflict(format!(
                        "record {} does not exist",
                        r.id_typed()
                    )));
                }
            }
        }
        for r in &commit.inserted {
            if state.records.contains_key(&r.id_typed()) {
                return Err(StoreError::Conflict(format!(
                    "record {} already exists",
                    r.id_typed()
                )));
            }
        }

        state
            .kinds
            .insert(commit.kind.id_typed().clone(), commit.kind);
        for r in commit.updated.into_iter().chain(commit.inserted) {
            state.max_seq = state.max_seq.max(r.checkout_seq());
            state.records.insert(r.id_typed(), r);
        }
        Ok(())
    }
}
