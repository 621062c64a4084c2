//! Benchmarks for segmentation and vectorization

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use waterbodies_algorithms::morphology::{StructuringElement, binary_erode};
use waterbodies_algorithms::segmentation::{distance_transform_edt, label, watershed};
use waterbodies_algorithms::vector::polygonize;
use waterbodies_core::{Connectivity, GeoTransform, Raster};

/// Create a mask of scattered blobs plus one large lake
fn create_water_mask(size: usize) -> Raster<u8> {
    let mut mask = Raster::new(size, size);
    mask.set_transform(GeoTransform::new(0.0, size as f64 * 30.0, 30.0, -30.0));
    let center = size as f64 / 2.0;
    for row in 0..size {
        for col in 0..size {
            let dx = col as f64 - center;
            let dy = row as f64 - center;
            let lake = (dx * dx + dy * dy).sqrt() < size as f64 / 4.0;
            let blob = (row / 8 + col / 8) % 3 == 0 && (row * 7 + col * 13) % 5 != 0;
            if lake || blob {
                mask.set(row, col, 1).unwrap();
            }
        }
    }
    mask
}

fn bench_label(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/label");
    for size in [256, 512, 1024] {
        let mask = create_water_mask(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| label(black_box(&mask), Connectivity::Rook).unwrap())
        });
    }
    group.finish();
}

fn bench_watershed(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation/watershed");
    for size in [256, 512, 1024] {
        let mask = create_water_mask(size);
        let elevation = distance_transform_edt(&mask).map(|d| -d);
        let eroded = binary_erode(&mask, &StructuringElement::Disk(3.0)).unwrap();
        let markers = label(&eroded, Connectivity::Rook).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                watershed(
                    black_box(&elevation),
                    black_box(&markers),
                    Some(&mask),
                    Connectivity::Rook,
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_polygonize(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector/polygonize");
    for size in [256, 512, 1024] {
        let labels = label(&create_water_mask(size), Connectivity::Rook).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| polygonize(black_box(&labels)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_label, bench_watershed, bench_polygonize);
criterion_main!(benches);
