use glam::Vec3;
use parking_lot::Mutex;

/// Accumulates radiance per pixel, thread-safely.
///
/// Pixels resolve in whatever order the task graph gets around to them, from
/// whatever worker; each pixel has its own little lock.
pub struct Film {
    width: u32,
    height: u32,
    pixels: Vec<Mutex<PixelAccumulator>>,
}

#[derive(Clone, Copy, Default)]
struct PixelAccumulator {
    sum: Vec3,
    num_samples: u32,
}

impl Film {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (0..width as usize * height as usize)
            .map(|_| Mutex::new(PixelAccumulator::default()))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn accumulate(&self, pixel: u32, radiance: Vec3) {
        let mut accumulator = self.pixels[pixel as usize].lock();
        accumulator.sum += radiance;
        accumulator.num_samples += 1;
    }

    /// Mean radiance of one pixel so far.
    pub fn mean(&self, pixel: u32) -> Vec3 {
        let accumulator = self.pixels[pixel as usize].lock();
        if accumulator.num_samples == 0 {
            Vec3::ZERO
        } else {
            accumulator.sum / accumulator.num_samples as f32
        }
    }

    pub fn num_samples(&self, pixel: u32) -> u32 {
        self.pixels[pixel as usize].lock().num_samples
    }

    /// 8-bit sRGB-ish rows, top to bottom (gamma 2.2, no tonemapping).
    pub fn to_rgb8(&self) -> Vec<[u8; 3]> {
        (0..self.pixels.len() as u32)
            .map(|pixel| {
                let mean = self.mean(pixel);
                let gamma = |channel: f32| -> u8 {
                    (channel.clamp(0.0, 1.0).powf(1.0 / 2.2) * 255.0 + 0.5) as u8
                };
                [gamma(mean.x), gamma(mean.y), gamma(mean.z)]
            })
            .collect()
    }
}

// ---
