use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use haas_core::{HardwareKindId, ProjectId, SubjectId};
use haas_hardware::{plan_checkin, Checkin, Checkout, HardwareKind, Quantity};
use haas_infra::{HardwareLedger, InMemoryLedgerStore, SqliteLedgerStore};
use tokio::runtime::Runtime;

fn kind_id() -> HardwareKindId {
    HardwareKindId::new("hwset1").unwrap()
}

fn checkout(project_id: ProjectId, n: u32) -> Checkout {
    Checkout {
        project_id,
        kind_id: kind_id(),
        subject_id: SubjectId::new(),
        quantity: Quantity::new(n).unwrap(),
        occurred_at: Utc::now(),
    }
}

fn checkin(project_id: ProjectId, n: u32) -> Checkin {
    Checkin {
        project_id,
        kind_id: kind_id(),
        quantity: Quantity::new(n).unwrap(),
        occurred_at: Utc::now(),
    }
}

/// One checkout followed by a full return, so capacity never runs out.
fn bench_checkout_checkin_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("checkout_checkin_cycle");
    group.throughput(Throughput::Elements(2));

    let ledger = rt.block_on(async {
        let ledger = HardwareLedger::open(InMemoryLedgerStore::new()).await.unwrap();
        ledger
            .register_kind(HardwareKind::new(kind_id(), "HWSet1", 1_000).unwrap())
            .await
            .unwrap();
        ledger
    });
    group.bench_function("in_memory", |b| {
        let p = ProjectId::new();
        b.iter(|| {
            rt.block_on(async {
                ledger.checkout(checkout(p, 3)).await.unwrap();
                black_box(ledger.checkin(checkin(p, 3)).await.unwrap());
            })
        });
    });

    let ledger = rt.block_on(async {
        let store = SqliteLedgerStore::connect("sqlite::memory:").await.unwrap();
        let ledger = HardwareLedger::open(store).await.unwrap();
        ledger
            .register_kind(HardwareKind::new(kind_id(), "HWSet1", 1_000).unwrap())
            .await
            .unwrap();
        ledger
    });
    group.bench_function("sqlite_memory", |b| {
        let p = ProjectId::new();
        b.iter(|| {
            rt.block_on(async {
                ledger.checkout(checkout(p, 3)).await.unwrap();
                black_box(ledger.checkin(checkin(p, 3)).await.unwrap());
            })
        });
    });

    group.finish();
}

/// Pure check-in planning against a growing number of open records.
fn bench_checkin_planning(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("checkin_planning");

    for open_count in [10u32, 100, 1_000].iter() {
        let p = ProjectId::new();
        let (kind, open) = rt.block_on(async {
            let ledger = HardwareLedger::open(InMemoryLedgerStore::new()).await.unwrap();
            ledger
                .register_kind(HardwareKind::new(kind_id(), "HWSet1", *open_count * 2).unwrap())
                .await
                .unwrap();
            for _ in 0..*open_count {
                ledger.checkout(checkout(p, 2)).await.unwrap();
            }
            let kind = ledger.lookup_kind(&kind_id()).await.unwrap();
            let open = ledger.project_records(p).await.unwrap();
            (kind, open)
        });

        group.throughput(Throughput::Elements(u64::from(*open_count)));
        group.bench_with_input(BenchmarkId::from_parameter(open_count), open_count, |b, &n| {
            // Return all but one unit: every record closes and the last one splits.
            let cmd = checkin(p, n * 2 - 1);
            b.iter(|| black_box(plan_checkin(&kind, &open, &cmd).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_checkout_checkin_cycle, bench_checkin_planning);
criterion_main!(benches);
