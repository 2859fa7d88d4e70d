use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use geo::{MultiPolygon, polygon};
use gsa_harmonize::{
    batch::{FeatureBatch, Shape},
    crs::Crs,
    identity::{DuplicatePolicy, IdentityOptions, resolve_identity},
};

/// A grid of 20 m parcels where every tenth parcel is repeated and the
/// declared block identifier repeats every 50 rows.
fn generate_parcels(rows: usize) -> FeatureBatch {
    let mut batch = FeatureBatch::new(
        vec!["FLIK".to_string(), "AREA".to_string()],
        Crs::LAEA_EUROPE,
    );
    for i in 0..rows {
        let cell = if i % 10 == 9 { i - 1 } else { i };
        let x = 4_000_000.0 + (cell % 500) as f64 * 20.0;
        let y = 3_000_000.0 + (cell / 500) as f64 * 20.0;
        let shape = MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + 20.0, y: y),
            (x: x + 20.0, y: y + 20.0),
            (x: x, y: y + 20.0),
            (x: x, y: y),
        ]]);
        batch.push(
            vec![format!("DENW{:05}", i % 50), format!("0,{:02}", i % 100)],
            Shape::Polygonal(shape),
        );
    }
    batch
}

fn bench_identity_resolution(c: &mut Criterion) {
    let parcels = generate_parcels(20_000);
    let mut group = c.benchmark_group("identity_resolution");

    let synthesized = IdentityOptions::default();
    group.bench_function("synthesized_keep_first", |b| {
        b.iter_batched(
            || parcels.clone(),
            |mut batch| {
                resolve_identity(&mut batch, &synthesized).expect("resolve identity");
            },
            BatchSize::LargeInput,
        );
    });

    let natural = IdentityOptions {
        natural_key: Some("FLIK".to_string()),
        policy: DuplicatePolicy::LargestReportedArea,
        reported_area_column: Some("AREA".to_string()),
        ..IdentityOptions::default()
    };
    group.bench_function("suffixed_natural_key_largest_area", |b| {
        b.iter_batched(
            || parcels.clone(),
            |mut batch| {
                resolve_identity(&mut batch, &natural).expect("resolve identity");
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_identity_resolution);
criterion_main!(benches);
