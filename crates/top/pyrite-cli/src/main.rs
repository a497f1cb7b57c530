//! Renders a procedural scene through the full out-of-core pipeline.
//!
//! There are no file importers here on purpose: the scene is generated, so
//! the binary demonstrates the substrate (batching traversal, cache
//! streaming, the scheduler) without dragging in parsers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use glam::{Mat4, UVec3, Vec3};

use pyrite::prelude::*;

// ---

#[derive(Parser, Debug)]
#[command(name = "pyrite", about = "Out-of-core demo renderer")]
struct Args {
    #[arg(long, default_value_t = 960)]
    width: u32,

    #[arg(long, default_value_t = 540)]
    height: u32,

    /// Samples per pixel.
    #[arg(long, default_value_t = 4)]
    spp: u32,

    /// Byte budget of the geometry cache.
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    cache_bytes: u64,

    /// Target primitive count per batching point.
    #[arg(long, default_value_t = 5_000_000)]
    primitives_per_point: u64,

    /// The scene is a grid x grid field of instanced pyramids.
    #[arg(long, default_value_t = 8)]
    grid: u32,

    /// Worker threads (defaults to hardware concurrency - 1).
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, default_value = "pyrite.png")]
    output: PathBuf,
}

// ---

fn pyramid_shape() -> Arc<TriangleShape> {
    let positions = vec![
        Vec3::new(0.0, 1.2, 0.0), // apex
        Vec3::new(-0.5, 0.0, -0.5),
        Vec3::new(0.5, 0.0, -0.5),
        Vec3::new(0.5, 0.0, 0.5),
        Vec3::new(-0.5, 0.0, 0.5),
    ];
    let indices = vec![
        UVec3::new(0, 2, 1),
        UVec3::new(0, 3, 2),
        UVec3::new(0, 4, 3),
        UVec3::new(0, 1, 4),
        UVec3::new(1, 2, 3),
        UVec3::new(1, 3, 4),
    ];
    Arc::new(TriangleShape::new(indices, positions, vec![], vec![]))
}

fn floor_shape(half: f32) -> Arc<TriangleShape> {
    Arc::new(TriangleShape::new(
        vec![UVec3::new(0, 2, 1), UVec3::new(1, 2, 3)],
        vec![
            Vec3::new(-half, 0.0, -half),
            Vec3::new(half, 0.0, -half),
            Vec3::new(-half, 0.0, half),
            Vec3::new(half, 0.0, half),
        ],
        vec![Vec3::Y; 4],
        vec![],
    ))
}

/// A grid of instanced pyramids on a floor: one shape, many nodes, so the
/// scene exercises instancing, shape sharing across batching points, and
/// (with a small enough cache) geometry streaming.
fn build_scene(grid: u32) -> anyhow::Result<Scene> {
    let mut builder = SceneBuilder::new();

    let floor = builder.add_object(
        floor_shape(grid as f32 * 1.5 + 2.0),
        Material {
            albedo: Vec3::splat(0.55),
        },
    );
    builder.attach_object_to_root(floor);

    let pyramid = pyramid_shape();
    for i in 0..grid {
        for j in 0..grid {
            // A cheap hash for some color variation.
            let h = (i.wrapping_mul(0x9E37) ^ j.wrapping_mul(0x85EB)) & 0xFF;
            let albedo = Vec3::new(
                0.25 + 0.6 * (h & 0x3) as f32 / 3.0,
                0.25 + 0.6 * ((h >> 2) & 0x3) as f32 / 3.0,
                0.25 + 0.6 * ((h >> 4) & 0x3) as f32 / 3.0,
            );

            let object = if h % 17 == 0 {
                builder.add_object_with_light(
                    pyramid.clone(),
                    Material { albedo },
                    AreaLight {
                        radiance: Vec3::new(4.0, 3.2, 2.0),
                    },
                )
            } else {
                builder.add_object(pyramid.clone(), Material { albedo })
            };

            let node = builder.add_node_with_transform(Mat4::from_translation(Vec3::new(
                (i as f32 - grid as f32 * 0.5) * 3.0,
                0.0,
                (j as f32 - grid as f32 * 0.5) * 3.0,
            )));
            builder.attach_object(node, object)?;
            builder.attach_node(builder.root(), node)?;
        }
    }

    builder.add_infinite_light(InfiniteLight {
        radiance: Vec3::new(0.35, 0.45, 0.7),
    });

    Ok(builder.build()?)
}

fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return Ok(());
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    pyr_log::setup_logging();

    let scene = build_scene(args.grid)?;

    let extent = args.grid as f32 * 1.5;
    let camera = PerspectiveCamera::look_at(
        Vec3::new(extent * 1.2, extent * 0.9, extent * 1.2),
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::Y,
        60_f32.to_radians(),
        args.width as f32 / args.height as f32,
    );

    let config = RenderConfig {
        width: args.width,
        height: args.height,
        samples_per_pixel: args.spp,
        cache_bytes: args.cache_bytes,
        primitives_per_batching_point: args.primitives_per_point,
        num_workers: args
            .workers
            .unwrap_or_else(|| pyrite::task_graph::TaskGraphConfig::default().num_workers),
        ..Default::default()
    };

    pyr_log::info!(
        "rendering {}x{} at {} spp, cache budget {}",
        args.width,
        args.height,
        args.spp,
        args.cache_bytes,
    );

    let renderer = Renderer::new(&scene, camera, config)?;
    let film = renderer.render();

    let bytes: Vec<u8> = film.to_rgb8().into_iter().flatten().collect();
    let image = image::RgbImage::from_raw(film.width(), film.height(), bytes)
        .context("film dimensions disagree with the pixel buffer")?;
    image
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    pyr_log::info!("wrote {}; {}", args.output.display(), renderer.stats());

    {
        use pyrite::metrics::{Counter, Gauge, Metric};

        let stats = renderer.stats();
        let rays = Counter::new("rays");
        rays.add(stats.accel.rays_enqueued + stats.accel.any_rays_enqueued);
        let cache_used = Gauge::new("bytes");
        cache_used.set(stats.cache.current_bytes);
        let loads = Counter::new("loads");
        loads.add(stats.cache.num_loads);

        let metrics = pyrite::metrics::export([
            ("rays_delivered", &rays as &dyn Metric),
            ("cache_used", &cache_used as _),
            ("cache_loads", &loads as _),
            ("wave_time", renderer.wave_time() as _),
        ]);
        pyr_log::info!("metrics: {metrics}");
    }

    Ok(())
}
