use std::sync::{Arc, OnceLock};

use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};

use pyr_accel::{AccelBuilder, AccelConfig, AccelStats, BatchingAccel, RenderCacheBuilder};
use pyr_cache::{CacheConfig, CacheStats, MemorySerializer};
use pyr_scene::{Ray, RayHit, Scene};
use pyr_task_graph::{TaskGraph, TaskGraphConfig, TaskGraphStats};

use crate::{AnyRayState, Film, PerspectiveCamera, RayState, RenderConfig, RenderResult};

type Accel = BatchingAccel<RayState, AnyRayState>;

// ---

/// The winning (smallest-`t`) hit a pixel has heard about so far.
struct BestHit {
    t: f32,
    albedo: Vec3,
    emission: Vec3,
    normal: Vec3,
    position: Vec3,
}

/// Per-pixel reconciliation state for the sample in flight.
///
/// A primary ray may be delivered to several batching points, each reporting
/// its own hit or miss; ditto the shadow ray spawned on resolution. The
/// pixel only writes to the film once the last outstanding report is in.
#[derive(Default)]
struct PixelRecord {
    remaining_closest: u32,
    best: Option<BestHit>,

    remaining_any: u32,
    occluded: bool,
    base_color: Vec3,
    pending_light: Vec3,
}

struct Shared {
    records: Vec<Mutex<PixelRecord>>,
    film: Film,
    accel: OnceLock<Arc<Accel>>,
    background: Vec3,
    sun_direction: Vec3,
    sun_radiance: Vec3,
    ambient: Vec3,
}

impl Shared {
    fn accel(&self) -> &Arc<Accel> {
        self.accel.get().expect("accel attached during construction")
    }

    fn on_hit(&self, hit: &RayHit, state: RayState) {
        let mut record = self.records[state.pixel as usize].lock();

        if record
            .best
            .as_ref()
            .is_none_or(|best| hit.t < best.t)
        {
            record.best = Some(BestHit {
                t: hit.t,
                albedo: hit.object.material.albedo,
                emission: hit
                    .object
                    .area_light
                    .map_or(Vec3::ZERO, |light| light.radiance),
                normal: hit.interaction.shading_normal,
                position: hit.interaction.position,
            });
        }

        record.remaining_closest -= 1;
        if record.remaining_closest == 0 {
            self.resolve_closest(state.pixel, &mut record);
        }
    }

    fn on_miss(&self, state: RayState) {
        let mut record = self.records[state.pixel as usize].lock();
        record.remaining_closest -= 1;
        if record.remaining_closest == 0 {
            self.resolve_closest(state.pixel, &mut record);
        }
    }

    /// All per-point reports are in; shade, and maybe spawn the shadow ray.
    fn resolve_closest(&self, pixel: u32, record: &mut PixelRecord) {
        let Some(best) = record.best.take() else {
            self.film.accumulate(pixel, self.background);
            return;
        };

        let base_color = best.emission + best.albedo * self.ambient;

        let cos = best.normal.dot(self.sun_direction).max(0.0);
        let contribution = best.albedo * self.sun_radiance * cos;
        if contribution.max_element() <= 0.0 {
            self.film.accumulate(pixel, base_color);
            return;
        }

        let shadow_ray = Ray::new(best.position + best.normal * 1e-3, self.sun_direction);
        let entered = self
            .accel()
            .intersect_any(&shadow_ray, &AnyRayState { pixel, contribution });

        if entered == 0 {
            // Nothing in the scene could possibly block the sun from here.
            self.film.accumulate(pixel, base_color + contribution);
        } else {
            record.remaining_any = entered as u32;
            record.occluded = false;
            record.base_color = base_color;
            record.pending_light = contribution;
        }
    }

    fn on_any(&self, state: AnyRayState, occluded: bool) {
        let mut record = self.records[state.pixel as usize].lock();
        record.occluded |= occluded;
        record.remaining_any -= 1;
        if record.remaining_any == 0 {
            let color = if record.occluded {
                record.base_color
            } else {
                record.base_color + record.pending_light
            };
            self.film.accumulate(state.pixel, color);
        }
    }
}

// ---

#[derive(Clone, Copy, Debug)]
pub struct RendererStats {
    pub accel: AccelStats,
    pub cache: CacheStats,
    pub graph: TaskGraphStats,
}

impl std::fmt::Display for RendererStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "traversal: {} | cache: {} | graph: {}",
            self.accel, self.cache, self.graph
        )
    }
}

/// Owns the whole pipeline: graph, cache, acceleration structure, film.
///
/// One `render` call produces `samples_per_pixel` full waves of primary
/// rays, running the task graph to quiescence per wave.
pub struct Renderer {
    graph: TaskGraph,
    accel: Arc<Accel>,
    cache: Arc<pyr_accel::RenderCache>,
    shared: Arc<Shared>,
    camera: PerspectiveCamera,
    config: RenderConfig,
    wave_time: pyr_metrics::Stopwatch,
}

impl Renderer {
    pub fn new(
        scene: &Scene,
        camera: PerspectiveCamera,
        config: RenderConfig,
    ) -> RenderResult<Self> {
        let num_pixels = config.width as usize * config.height as usize;
        let background = scene
            .infinite_lights
            .iter()
            .fold(Vec3::ZERO, |sum, light| sum + light.radiance);

        let shared = Arc::new(Shared {
            records: (0..num_pixels).map(|_| Mutex::default()).collect(),
            film: Film::new(config.width, config.height),
            accel: OnceLock::new(),
            background,
            sun_direction: config.sun_direction.normalize(),
            sun_radiance: config.sun_radiance,
            ambient: config.ambient,
        });

        let mut graph = TaskGraph::new();

        let hit = graph.add_task("integrator-hit", {
            let shared = shared.clone();
            move |chunks: Vec<Vec<(Ray, RayHit, RayState)>>, _ctx| {
                for chunk in chunks {
                    for (_ray, ray_hit, state) in chunk {
                        shared.on_hit(&ray_hit, state);
                    }
                }
            }
        });
        let miss = graph.add_task("integrator-miss", {
            let shared = shared.clone();
            move |chunks: Vec<Vec<(Ray, RayState)>>, _ctx| {
                for chunk in chunks {
                    for (_ray, state) in chunk {
                        shared.on_miss(state);
                    }
                }
            }
        });
        let any_hit = graph.add_task("integrator-any-hit", {
            let shared = shared.clone();
            move |chunks: Vec<Vec<(Ray, AnyRayState)>>, _ctx| {
                for chunk in chunks {
                    for (_ray, state) in chunk {
                        shared.on_any(state, true);
                    }
                }
            }
        });
        let any_miss = graph.add_task("integrator-any-miss", {
            let shared = shared.clone();
            move |chunks: Vec<Vec<(Ray, AnyRayState)>>, _ctx| {
                for chunk in chunks {
                    for (_ray, state) in chunk {
                        shared.on_any(state, false);
                    }
                }
            }
        });

        let arena = Arc::new(MemorySerializer::default());
        let cache_builder = RenderCacheBuilder::new(CacheConfig {
            max_bytes: config.cache_bytes,
            loader_thread_count: config.loader_threads,
        });

        let accel = AccelBuilder::new(AccelConfig {
            primitives_per_batching_point: config.primitives_per_batching_point,
        })
        .build(
            scene,
            &arena,
            &cache_builder,
            &mut graph,
            hit,
            miss,
            any_hit,
            any_miss,
        )?;
        let accel = Arc::new(accel);

        shared.accel.set(accel.clone()).ok();

        let cache = cache_builder.build();
        accel.attach_cache(cache.clone());

        Ok(Self {
            graph,
            accel,
            cache,
            shared,
            camera,
            config,
            wave_time: pyr_metrics::Stopwatch::new(),
        })
    }

    /// Render every sample wave; returns the film.
    pub fn render(&self) -> &Film {
        let width = self.config.width;
        let height = self.config.height;
        let spp = self.config.samples_per_pixel.max(1);

        for sample_index in 0..spp {
            let _wave_guard = self.wave_time.scoped();
            let mut rng = SmallRng::seed_from_u64(0x9E37_79B9 ^ sample_index as u64);

            for y in 0..height {
                for x in 0..width {
                    let pixel = y * width + x;
                    let jitter = if spp == 1 {
                        Vec2::splat(0.5)
                    } else {
                        Vec2::new(rng.random(), rng.random())
                    };

                    let ray = self.camera.generate_ray(x, y, jitter, width, height);
                    *self.shared.records[pixel as usize].lock() = PixelRecord::default();

                    let entered = self.accel.intersect(&ray, &RayState { pixel });
                    if entered == 0 {
                        // Escaped without touching any batching point.
                        self.shared.film.accumulate(pixel, self.shared.background);
                    } else {
                        self.shared.records[pixel as usize].lock().remaining_closest =
                            entered as u32;
                    }
                }
            }

            self.accel.flush_local_queues();
            self.graph.run(&TaskGraphConfig {
                num_workers: self.config.num_workers,
            });

            pyr_log::debug!(
                "sample wave {}/{spp} done; {}",
                sample_index + 1,
                self.stats()
            );
        }

        &self.shared.film
    }

    pub fn film(&self) -> &Film {
        &self.shared.film
    }

    /// Wall-clock time spent inside sample waves so far.
    pub fn wave_time(&self) -> &pyr_metrics::Stopwatch {
        &self.wave_time
    }

    pub fn stats(&self) -> RendererStats {
        RendererStats {
            accel: self.accel.stats(),
            cache: self.cache.stats(),
            graph: self.graph.stats(),
        }
    }
}
