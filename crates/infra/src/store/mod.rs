//! Persistence boundary for the hardware ledger.
//!
//! The ledger needs create/read/update over hardware kinds and allocation
//! records and nothing else; this module states that contract without making
//! storage assumptions.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use haas_core::{HardwareKindId, ProjectId};
use haas_hardware::{AllocationRecord, CheckinOutcome, CheckoutOutcome, HardwareKind};

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to business rejections; the
/// ledger reports them as internal failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed (connection, IO, SQL).
    #[error("storage backend failure during {operation}: {message}")]
    Backend { operation: &'static str, message: String },

    /// Stored data can't be turned back into domain values.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// A commit referenced state that doesn't exist or is no longer open.
    #[error("commit rejected by store: {0}")]
    Conflict(String),
}

/// One atomic unit of ledger state change: the kind's new capacity together
/// with every record the operation created or modified.
///
/// Stores must apply all of it or none of it. Only open records may appear in
/// `updated`; closed records are history and never change again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub kind: HardwareKind,
    pub inserted: Vec<AllocationRecord>,
    pub updated: Vec<AllocationRecord>,
}

impl LedgerCommit {
    /// Capacity-only change (reconciliation).
    pub fn capacity(kind: HardwareKind) -> Self {
        Self {
            kind,
            inserted: Vec::new(),
            updated: Vec::new(),
        }
    }
}

impl From<CheckoutOutcome> for LedgerCommit {
    fn from(value: CheckoutOutcome) -> Self {
        Self {
            kind: value.kind,
            inserted: vec![value.record],
            updated: Vec::new(),
        }
    }
}

impl From<CheckinOutcome> for LedgerCommit {
    fn from(value: CheckinOutcome) -> Self {
        Self {
            kind: value.kind,
            inserted: value.remainder.into_iter().collect(),
            updated: value.closed,
        }
    }
}

/// Durable storage of hardware kinds and allocation records.
///
/// ## Implementation requirements
///
/// - `commit` is atomic: the kind update and all record writes land together
/// - `commit` fails with [`StoreError::Conflict`] if the kind is unknown or an
///   updated record is missing or already closed
/// - record listings are returned in checkout order
///   ([`AllocationRecord::fifo_key`])
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a kind unless one with the same id exists. Returns whether it
    /// was inserted; existing kinds keep their state.
    async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError>;

    async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError>;

    /// All kinds ordered by id.
    async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError>;

    /// Open records of one project for one kind.
    async fn open_records(
        &self,
        project_id: ProjectId,
        kind_id: &HardwareKindId,
    ) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Every record (open and closed) of one project.
    async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Units of `kind_id` held by open records across all projects.
    async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError>;

    /// Highest checkout sequence ever assigned, 0 when empty.
    async fn max_checkout_seq(&self) -> Result<u64, StoreError>;

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError> {
        (**self).register_kind(kind).await
    }

    async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError> {
        (**self).get_kind(kind_id).await
    }

    async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError> {
        (**self).list_kinds().await
    }

    async fn open_records(
        &self,
        project_id: ProjectId,
        kind_id: &HardwareKindId,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        (**self).open_records(project_id, kind_id).await
    }

    async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError> {
        (**self).project_records(project_id).await
    }

    async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError> {
        (**self).open_units(kind_id).await
    }

    async fn max_checkout_seq(&self) -> Result<u64, StoreError> {
        (**self).max_checkout_seq().await
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        (**self).commit(commit).await
    }
}

/// Store selected at startup: in-memory for dev/tests, SQLite when a database
/// URL is configured.
#[derive(Debug)]
pub enum AnyLedgerStore {
    InMemory(InMemoryLedgerStore),
    Sqlite(SqliteLedgerStore),
}

impl AnyLedgerStore {
    /// In-memory when `database_url` is `None`, SQLite otherwise.
    pub async fn open(database_url: Option<&str>) -> Result<Self, StoreError> {
        match database_url {
            None => Ok(Self::InMemory(InMemoryLedgerStore::new())),
            Some(url) => Ok(Self::Sqlite(SqliteLedgerStore::connect(url).await?)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyLedgerStore::InMemory($store) => $call,
            AnyLedgerStore::Sqlite($store) => $call,
        }
    };
}

#[async_trait]
impl LedgerStore for AnyLedgerStore {
    async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError> {
        delegate!(self, s => s.register_kind(kind).await)
    }

    async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError> {
        delegate!(self, s => s.get_kind(kind_id).await)
    }

    async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError> {
        delegate!(self, s => s.list_kinds().await)
    }

    async fn open_records(
        &self,
        project_id: ProjectId,
        kind_id: &HardwareKindId,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        delegate!(self, s => s.open_records(project_id, kind_id).await)
    }

    async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError> {
        delegate!(self, s => s.project_records(project_id).await)
    }

    async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError> {
        delegate!(self, s => s.open_units(kind_id).await)
    }

    async fn max_checkout_seq(&self) -> Result<u64, StoreError> {
        delegate!(self, s => s.max_checkout_seq().await)
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        delegate!(self, s => s.commit(commit).await)
    }
}

/// Sort records into checkout order, record id as the last tie-break.
pub(crate) fn sort_checkout_order(records: &mut [AllocationRecord]) {
    records.sort_by_key(|r| (r.fifo_key(), r.id_typed()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use haas_core::SubjectId;
    use haas_hardware::{plan_checkin, plan_checkout, Checkin, Checkout, Quantity};

    #[derive(Debug, Clone)]
    enum Op {
        Checkout { project: usize, units: u32 },
        Checkin { project: usize, units: u32 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..2, 1u32..6).prop_map(|(project, units)| Op::Checkout { project, units }),
            (0usize..2, 1u32..6).prop_map(|(project, units)| Op::Checkin { project, units }),
        ]
    }

    /// Apply `op` through `store`; rejected ops change nothing.
    async fn apply<S: LedgerStore>(
        store: &S,
        kind_id: &HardwareKindId,
        op: &Op,
        project_id: ProjectId,
        seq: u64,
        at: chrono::DateTime<Utc>,
    ) {
        let kind = store.get_kind(kind_id).await.unwrap().unwrap();
        match *op {
            Op::Checkout { units, .. } => {
                let cmd = Checkout {
                    project_id,
                    kind_id: kind_id.clone(),
                    subject_id: SubjectId::new(),
                    quantity: Quantity::new(units).unwrap(),
                    occurred_at: at,
                };
                if let Ok(outcome) = plan_checkout(&kind, &cmd, seq) {
                    store.commit(outcome.into()).await.unwrap();
                }
            }
            Op::Checkin { units, .. } => {
                let open = store.open_records(project_id, kind_id).await.unwrap();
                let cmd = Checkin {
                    project_id,
                    kind_id: kind_id.clone(),
                    quantity: Quantity::new(units).unwrap(),
                    occurred_at: at,
                };
                if let Ok(outcome) = plan_checkin(&kind, &open, &cmd) {
                    store.commit(outcome.into()).await.unwrap();
                }
            }
        }
    }

    /// Project each record onto what must survive persistence, ignoring the
    /// fresh ids minted for split remainders.
    fn shape(records: &[AllocationRecord]) -> Vec<(u64, u32, bool)> {
        let mut out: Vec<_> = records
            .iter()
            .map(|r| (r.checkout_seq(), r.quantity().get(), r.is_open()))
            .collect();
        out.sort_unstable();
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Property: the SQLite store ends up in the same observable state as
        /// the in-memory store for any sequence of ledger commits.
        #[test]
        fn sqlite_and_in_memory_stores_agree(ops in prop::collection::vec(op(), 1..25)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (mem_state, sql_state) = rt.block_on(async {
                let kind_id = HardwareKindId::new("hwset1").unwrap();
                let projects = [ProjectId::new(), ProjectId::new()];
                let mem = InMemoryLedgerStore::new();
                let sql = SqliteLedgerStore::connect("sqlite::memory:").await.unwrap();
                for store in [&mem as &dyn LedgerStore, &sql] {
                    store
                        .register_kind(HardwareKind::new(kind_id.clone(), "HWSet1", 10).unwrap())
                        .await
                        .unwrap();
                }

                let start = Utc::now();
                for (i, op) in ops.iter().enumerate() {
                    let project = match op {
                        Op::Checkout { project, .. } | Op::Checkin { project, .. } => projects[*project],
                    };
                    let at = start + Duration::milliseconds(i as i64);
                    let seq = i as u64 + 1;
                    apply(&mem, &kind_id, op, project, seq, at).await;
                    apply(&sql, &kind_id, op, project, seq, at).await;
                }

                let mut out = Vec::new();
                for store in [&mem as &dyn LedgerStore, &sql] {
                    let kind = store.get_kind(&kind_id).await.unwrap().unwrap();
                    let mut records = Vec::new();
                    for p in projects {
                        records.extend(shape(&store.project_records(p).await.unwrap()));
                    }
                    let open_units = store.open_units(&kind_id).await.unwrap();
                    out.push((kind.available_capacity(), open_units, records));
                }
                let sql_state = out.pop().unwrap();
                let mem_state = out.pop().unwrap();
                (mem_state, sql_state)
            });

            prop_assert_eq!(&mem_state, &sql_state);
            prop_assert_eq!(u64::from(mem_state.0) + mem_state.1, 10);
        }
    }
}
