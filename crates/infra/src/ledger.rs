//! Allocation ledger service.
//!
//! Orchestrates checkout and check-in over a [`LedgerStore`]:
//!
//! ```text
//! command
//!   ↓
//! 1. acquire the kind's lock
//!   ↓
//! 2. load kind (and open records for check-in)
//!   ↓
//! 3. plan (pure decision in `haas-hardware`)
//!   ↓
//! 4. persist the outcome as one `LedgerCommit`
//! ```
//!
//! The lock is held from step 2 through step 4, so two operations on the same
//! kind can never decide against the same capacity snapshot. Nothing is
//! written when planning rejects the command.
//!
//! ## Error semantics
//!
//! - business rejections (unknown kind, bad quantity, insufficient capacity,
//!   over-return) → [`LedgerError::Rejected`]
//! - broken invariants (release past total, corrupt records) → [`LedgerError::Invariant`]
//! - persistence failures → [`LedgerError::Store`]
//!
//! Nothing is retried here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use haas_core::{AllocationId, DomainError, HardwareKindId, ProjectId};
use haas_hardware::{
    plan_checkin, plan_checkout, AllocationError, AllocationRecord, Checkin, Checkout, HardwareKind,
    Quantity,
};

use crate::locks::KindLocks;
use crate::store::{LedgerCommit, LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The command was refused; state is unchanged.
    #[error(transparent)]
    Rejected(AllocationError),

    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Business rejection, if this is one.
    pub fn rejection(&self) -> Option<&AllocationError> {
        match self {
            LedgerError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AllocationError> for LedgerError {
    fn from(value: AllocationError) -> Self {
        match value {
            AllocationError::Invariant(err) => LedgerError::Invariant(err.to_string()),
            other => LedgerError::Rejected(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        LedgerError::Invariant(value.to_string())
    }
}

/// Result of a committed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub record: AllocationRecord,
    /// Kind state after the checkout.
    pub kind: HardwareKind,
}

/// Result of a committed check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinReceipt {
    pub units_returned: Quantity,
    /// Records closed by this check-in, oldest first.
    pub closed: Vec<AllocationId>,
    /// Open remainder of a split record.
    pub remainder: Option<AllocationRecord>,
    /// Kind state after the check-in.
    pub kind: HardwareKind,
}

/// Units a project currently holds of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub kind_id: HardwareKindId,
    pub outstanding: u64,
}

/// The hardware ledger: sole writer of available capacity and allocation records.
#[derive(Debug)]
pub struct HardwareLedger<S> {
    store: S,
    locks: KindLocks,
    last_seq: AtomicU64,
}

impl<S> HardwareLedger<S>
where
    S: LedgerStore,
{
    /// Open the ledger over `store`: resume the checkout sequence and
    /// reconcile capacities against open records.
    pub async fn open(store: S) -> Result<Self, LedgerError> {
        let last_seq = store.max_checkout_seq().await?;
        let ledger = Self {
            store,
            locks: KindLocks::new(),
            last_seq: AtomicU64::new(last_seq),
        };

        let repaired = ledger.reconcile().await?;
        tracing::info!(last_seq, repaired, "hardware ledger opened");
        Ok(ledger)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a kind unless it already exists. Existing kinds keep their
    /// capacity and records.
    pub async fn register_kind(&self, kind: HardwareKind) -> Result<bool, LedgerError> {
        let kind_id = kind.id_typed().clone();
        let inserted = self.store.register_kind(kind).await?;
        if inserted {
            tracing::info!(%kind_id, "hardware kind registered");
        }
        Ok(inserted)
    }

    pub async fn lookup_kind(&self, kind_id: &HardwareKindId) -> Result<HardwareKind, LedgerError> {
        self.store
            .get_kind(kind_id)
            .await?
            .ok_or_else(|| AllocationError::KindNotFound(kind_id.clone()).into())
    }

    pub async fn list_kinds(&self) -> Result<Vec<HardwareKind>, LedgerError> {
        Ok(self.store.list_kinds().await?)
    }

    /// Reserve units for a project and record the allocation.
    ///
    /// The caller has already checked that the project exists and that the
    /// subject may allocate against it.
    #[instrument(
        skip(self, cmd),
        fields(
            project_id = %cmd.project_id,
            kind_id = %cmd.kind_id,
            quantity = %cmd.quantity
        )
    )]
    pub async fn checkout(&self, cmd: Checkout) -> Result<CheckoutReceipt, LedgerError> {
        let _guard = self.locks.acquire(&cmd.kind_id).await;

        let kind = self.lookup_kind(&cmd.kind_id).await?;
        // Gaps from rejected commands are fine: the sequence only has to increase.
        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = plan_checkout(&kind, &cmd, seq)?;

        let receipt = CheckoutReceipt {
            record: outcome.record.clone(),
            kind: outcome.kind.clone(),
        };
        self.store.commit(outcome.into()).await?;

        tracing::info!(
            record_id = %receipt.record.id_typed(),
            checkout_seq = seq,
            available = receipt.kind.available_capacity(),
            "hardware checked out"
        );
        Ok(receipt)
    }

    /// Return units for a project, closing and splitting its open records
    /// oldest first.
    #[instrument(
        skip(self, cmd),
        fields(
            project_id = %cmd.project_id,
            kind_id = %cmd.kind_id,
            quantity = %cmd.quantity
        )
    )]
    pub async fn checkin(&self, cmd: Checkin) -> Result<CheckinReceipt, LedgerError> {
        let _guard = self.locks.acquire(&cmd.kind_id).await;

        let kind = self.lookup_kind(&cmd.kind_id).await?;
        let open = self.store.open_records(cmd.project_id, &cmd.kind_id).await?;
        let outcome = plan_checkin(&kind, &open, &cmd)?;

        let receipt = CheckinReceipt {
            units_returned: outcome.units_returned,
            closed: outcome.closed.iter().map(AllocationRecord::id_typed).collect(),
            remainder: outcome.remainder.clone(),
            kind: outcome.kind.clone(),
        };
        self.store.commit(outcome.into()).await?;

        tracing::info!(
            closed = receipt.closed.len(),
            split = receipt.remainder.is_some(),
            available = receipt.kind.available_capacity(),
            "hardware checked in"
        );
        Ok(receipt)
    }

    /// Outstanding units per kind for a project; kinds it holds nothing of
    /// are omitted.
    pub async fn project_holdings(&self, project_id: ProjectId) -> Result<Vec<Holding>, LedgerError> {
        let records = self.store.project_records(project_id).await?;

        let mut by_kind: BTreeMap<HardwareKindId, u64> = BTreeMap::new();
        for r in records.iter().filter(|r| r.is_open()) {
            *by_kind.entry(r.kind_id().clone()).or_default() += u64::from(r.quantity().get());
        }

        Ok(by_kind
            .into_iter()
            .map(|(kind_id, outstanding)| Holding { kind_id, outstanding })
            .collect())
    }

    /// Every record of a project, open and closed, in checkout order.
    pub async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, LedgerError> {
        Ok(self.store.project_records(project_id).await?)
    }

    /// Re-derive each kind's available capacity from its open records and
    /// persist any correction. Returns the number of kinds repaired.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize, LedgerError> {
        let mut repaired = 0;

        for listed in self.store.list_kinds().await? {
            let kind_id = listed.id_typed().clone();
            let _guard = self.locks.acquire(&kind_id).await;

            // Re-read under the lock.
            let Some(mut kind) = self.store.get_kind(&kind_id).await? else {
                continue;
            };
            let open_units = self.store.open_units(&kind_id).await?;

            if let Some(previous) = kind.reconcile(open_units)? {
                tracing::warn!(
                    %kind_id,
                    previous,
                    available = kind.available_capacity(),
                    open_units,
                    "available capacity drifted; repaired"
                );
                self.store.commit(LedgerCommit::capacity(kind)).await?;
                repaired += 1;
            }
        }

        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use haas_core::SubjectId;

    use crate::store::InMemoryLedgerStore;

    fn hwset1() -> HardwareKindId {
        HardwareKindId::new("hwset1").unwrap()
    }

    async fn ledger_with<S: LedgerStore>(store: S, total: u32) -> HardwareLedger<S> {
        let ledger = HardwareLedger::open(store).await.unwrap();
        ledger
            .register_kind(HardwareKind::new(hwset1(), "HWSet1", total).unwrap())
            .await
            .unwrap();
        ledger
    }

    fn checkout(project_id: ProjectId, n: u32) -> Checkout {
        Checkout {
            project_id,
            kind_id: hwset1(),
            subject_id: SubjectId::new(),
            quantity: Quantity::new(n).unwrap(),
            occurred_at: Utc::now(),
        }
    }

    fn checkin(project_id: ProjectId, n: u32) -> Checkin {
        Checkin {
            project_id,
            kind_id: hwset1(),
            quantity: Quantity::new(n).unwrap(),
            occurred_at: Utc::now() + Duration::seconds(1),
        }
    }

    #[tokio::test]
    async fn partial_return_splits_the_younger_record() {
        let ledger = ledger_with(InMemoryLedgerStore::new(), 10).await;
        let p = ProjectId::new();

        let first = ledger.checkout(checkout(p, 5)).await.unwrap();
        let second = ledger.checkout(checkout(p, 3)).await.unwrap();
        assert_eq!(second.kind.available_capacity(), 2);

        let receipt = ledger.checkin(checkin(p, 6)).await.unwrap();
        assert_eq!(receipt.units_returned.get(), 6);
        assert_eq!(
            receipt.closed,
            vec![first.record.id_typed(), second.record.id_typed()]
        );
        let remainder = receipt.remainder.unwrap();
        assert_eq!(remainder.quantity().get(), 2);
        assert_eq!(remainder.checkout_seq(), second.record.checkout_seq());
        assert_eq!(receipt.kind.available_capacity(), 8);

        let holdings = ledger.project_holdings(p).await.unwrap();
        assert_eq!(
            holdings,
            vec![Holding {
                kind_id: hwset1(),
                outstanding: 2
            }]
        );
        assert_eq!(ledger.project_records(p).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn checkout_then_full_checkin_restores_capacity() {
        let ledger = ledger_with(InMemoryLedgerStore::new(), 10).await;
        let p = ProjectId::new();

        ledger.checkout(checkout(p, 7)).await.unwrap();
        let receipt = ledger.checkin(checkin(p, 7)).await.unwrap();

        assert_eq!(receipt.kind.available_capacity(), 10);
        assert!(receipt.remainder.is_none());
        assert!(ledger.project_holdings(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejections_leave_state_unchanged() {
        let ledger = ledger_with(InMemoryLedgerStore::new(), 10).await;
        let p = ProjectId::new();
        ledger.checkout(checkout(p, 4)).await.unwrap();

        let err = ledger.checkout(checkout(p, 7)).await.unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(AllocationError::InsufficientCapacity {
                requested: 7,
                available: 6,
                ..
            })
        ));

        let err = ledger.checkin(checkin(p, 5)).await.unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(AllocationError::OverReturn {
                requested: 5,
                outstanding: 4,
                ..
            })
        ));

        // Another project holds nothing of this kind.
        let err = ledger.checkin(checkin(ProjectId::new(), 1)).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(AllocationError::OverReturn { .. })));

        assert_eq!(ledger.lookup_kind(&hwset1()).await.unwrap().available_capacity(), 6);
        assert_eq!(ledger.project_records(p).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_kind_is_not_found() {
        let ledger = ledger_with(InMemoryLedgerStore::new(), 10).await;
        let mut cmd = checkout(ProjectId::new(), 1);
        cmd.kind_id = HardwareKindId::new("hwset9").unwrap();

        let err = ledger.checkout(cmd).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(AllocationError::KindNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_never_oversubscribe() {
        let ledger = Arc::new(ledger_with(InMemoryLedgerStore::new(), 10).await);
        let p = ProjectId::new();

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.checkout(checkout(p, 1)).await })
            })
            .collect();

        let mut granted = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => granted += 1,
                Err(LedgerError::Rejected(AllocationError::InsufficientCapacity { .. })) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(refused, 30);
        assert_eq!(ledger.lookup_kind(&hwset1()).await.unwrap().available_capacity(), 0);
        assert_eq!(ledger.project_holdings(p).await.unwrap()[0].outstanding, 10);
    }

    #[tokio::test]
    async fn checkout_sequence_resumes_after_reopen() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let p = ProjectId::new();
        {
            let ledger = ledger_with(Arc::clone(&store), 10).await;
            ledger.checkout(checkout(p, 1)).await.unwrap();
            ledger.checkout(checkout(p, 1)).await.unwrap();
        }

        let ledger = HardwareLedger::open(Arc::clone(&store)).await.unwrap();
        let receipt = ledger.checkout(checkout(p, 1)).await.unwrap();
        assert_eq!(receipt.record.checkout_seq(), 3);
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_capacity() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let p = ProjectId::new();
        {
            let ledger = ledger_with(Arc::clone(&store), 10).await;
            ledger.checkout(checkout(p, 4)).await.unwrap();
        }
        // Simulate a lost capacity write.
        store
            .force_kind_state(HardwareKind::restore(hwset1(), "HWSet1".into(), 10, 10).unwrap())
            .unwrap();

        let ledger = HardwareLedger::open(Arc::clone(&store)).await.unwrap();
        assert_eq!(ledger.lookup_kind(&hwset1()).await.unwrap().available_capacity(), 6);
        assert_eq!(ledger.reconcile().await.unwrap(), 0);
    }

    /// Store whose commits fail on demand.
    struct FlakyStore {
        inner: InMemoryLedgerStore,
        fail_commits: AtomicBool,
    }

    #[async_trait]
    impl LedgerStore for FlakyStore {
        async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError> {
            self.inner.register_kind(kind).await
        }

        async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError> {
            self.inner.get_kind(kind_id).await
        }

        async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError> {
            self.inner.list_kinds().await
        }

        async fn open_records(
            &self,
            project_id: ProjectId,
            kind_id: &HardwareKindId,
        ) -> Result<Vec<AllocationRecord>, StoreError> {
            self.inner.open_records(project_id, kind_id).await
        }

        async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError> {
            self.inner.project_records(project_id).await
        }

        async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError> {
            self.inner.open_units(kind_id).await
        }

        async fn max_checkout_seq(&self) -> Result<u64, StoreError> {
            self.inner.max_checkout_seq().await
        }

        async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(StoreError::Backend {
                    operation: "commit",
                    message: "disk full".to_string(),
                });
            }
            self.inner.commit(commit).await
        }
    }

    #[tokio::test]
    async fn store_failure_is_internal_and_leaves_no_partial_state() {
        let store = FlakyStore {
            inner: InMemoryLedgerStore::new(),
            fail_commits: AtomicBool::new(false),
        };
        let ledger = ledger_with(store, 10).await;
        let p = ProjectId::new();
        ledger.checkout(checkout(p, 5)).await.unwrap();
        ledger.checkout(checkout(p, 3)).await.unwrap();

        ledger.store().fail_commits.store(true, Ordering::SeqCst);
        let err = ledger.checkin(checkin(p, 6)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(err.rejection().is_none());

        assert_eq!(ledger.lookup_kind(&hwset1()).await.unwrap().available_capacity(), 2);
        let records = ledger.project_records(p).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(AllocationRecord::is_open));

        ledger.store().fail_commits.store(false, Ordering::SeqCst);
        let receipt = ledger.checkin(checkin(p, 6)).await.unwrap();
        assert_eq!(receipt.kind.available_capacity(), 8);
    }
}
