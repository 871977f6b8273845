use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dtools_export::request_key::RequestKey;
use dtools_export::selection::Selection;

fn selection(records: usize) -> Selection {
    let fields = ["clientName", "id", "stage", "name", "priority", "price"];
    (0..records).fold(Selection::new("Projects/GetProject", fields), |s, i| {
        s.with_record([("id".to_string(), i.to_string())])
    })
}

fn bench_request_keys(c: &mut Criterion) {
    let small = selection(10);
    let large = selection(1_000);

    c.bench_function("request_keys_10_records", |b| {
        b.iter(|| black_box(small.request_keys()))
    });

    c.bench_function("request_keys_1000_records", |b| {
        b.iter(|| black_box(large.request_keys()))
    });

    let key = RequestKey::new(
        "Projects/GetProject",
        ["name", "clientName", "price"],
        [("id", "42"), ("stage", "Opportunity Won")],
    );
    c.bench_function("request_key_digest", |b| b.iter(|| black_box(key.digest())));

    let stored = RequestKey::new(
        "Projects/GetProject",
        ["name", "clientName", "price", "stage", "priority"],
        [("id", "42"), ("stage", "Opportunity Won")],
    );
    c.bench_function("request_key_covers", |b| {
        b.iter(|| black_box(stored.covers(&key)))
    });
}

criterion_group!(benches, bench_request_keys);
criterion_main!(benches);
