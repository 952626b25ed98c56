use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use vouchledger::{LedgerBackend, LedgerEntry};
use vouchledger_file::FileLedger;
use vouchledger_sqlite::SqliteLedger;

fn seed_rows(n: u64) -> Vec<LedgerEntry> {
    (1..=n).map(|i| LedgerEntry::new(i, (i * 7 % 500) as i64, (i % 13) as i64)).collect()
}

fn bench_file_add_vouch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FileLedger::new(dir.path().join("vouches.json"));
    ledger.init().unwrap();
    ledger.bulk_upsert(&seed_rows(1_000)).unwrap();

    let mut user = 0u64;
    c.bench_function("file_add_vouch_1k_users", |b| {
        b.iter(|| {
            user = user % 1_000 + 1;
            ledger.add_vouch(black_box(user), 1, 1).unwrap();
        });
    });
}

fn bench_sqlite_add_vouch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vouches.db");
    let ledger = SqliteLedger::new(path.to_str().unwrap(), 4);
    ledger.init().unwrap();
    ledger.bulk_upsert(&seed_rows(10_000)).unwrap();

    let mut user = 0u64;
    c.bench_function("sqlite_add_vouch_10k_users", |b| {
        b.iter(|| {
            user = user % 10_000 + 1;
            ledger.add_vouch(black_box(user), 1, 1).unwrap();
        });
    });
}

fn bench_top(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = FileLedger::new(dir.path().join("vouches.json"));
    file.init().unwrap();
    file.bulk_upsert(&seed_rows(10_000)).unwrap();

    let path = dir.path().join("vouches.db");
    let sqlite = SqliteLedger::new(path.to_str().unwrap(), 4);
    sqlite.init().unwrap();
    sqlite.bulk_upsert(&seed_rows(10_000)).unwrap();

    c.bench_function("file_top_10_of_10k", |b| {
        b.iter(|| black_box(file.top(10).unwrap()));
    });
    c.bench_function("sqlite_top_10_of_10k", |b| {
        b.iter(|| black_box(sqlite.top(10).unwrap()));
    });
}

fn bench_bulk_import(c: &mut Criterion) {
    let rows = seed_rows(5_000);
    c.bench_function("sqlite_bulk_upsert_5k", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("vouches.db");
                let ledger = SqliteLedger::new(path.to_str().unwrap(), 1);
                ledger.init().unwrap();
                (dir, ledger)
            },
            |(_dir, ledger)| ledger.bulk_upsert(black_box(&rows)).unwrap(),
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_file_add_vouch,
    bench_sqlite_add_vouch,
    bench_top,
    bench_bulk_import
);
criterion_main!(benches);
