//! Build and traversal costs of the in-crate BVH.

use criterion::{criterion_group, criterion_main, Criterion};
use glam::Vec3;

use pyr_accel::{Bvh, BvhItem};
use pyr_scene::{Aabb, Ray};

fn grid_items(n: usize) -> Vec<BvhItem> {
    let side = (n as f32).cbrt().ceil() as usize;
    (0..n)
        .map(|i| {
            let center = Vec3::new(
                (i % side) as f32 * 2.0,
                ((i / side) % side) as f32 * 2.0,
                (i / (side * side)) as f32 * 2.0,
            );
            BvhItem {
                bounds: Aabb::from_min_max(center - Vec3::splat(0.4), center + Vec3::splat(0.4)),
                index: i as u32,
            }
        })
        .collect()
}

fn build(c: &mut Criterion) {
    let items = grid_items(100_000);
    c.bench_function("bvh_build_100k", |b| {
        b.iter(|| criterion::black_box(Bvh::build(&items)));
    });
}

fn traverse(c: &mut Criterion) {
    let items = grid_items(100_000);
    let bvh = Bvh::build(&items);

    c.bench_function("bvh_traverse_diagonal", |b| {
        let ray = Ray::new(Vec3::splat(-5.0), Vec3::ONE.normalize());
        b.iter(|| {
            let mut count = 0_u32;
            bvh.traverse(&ray, |_item, _t_far| {
                count += 1;
                false
            });
            criterion::black_box(count)
        });
    });
}

criterion_group!(benches, build, traverse);
criterion_main!(benches);
