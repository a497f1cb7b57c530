use glam::{Vec2, Vec3};

use pyr_scene::Ray;

/// A pinhole camera.
#[derive(Clone, Copy, Debug)]
pub struct PerspectiveCamera {
    position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    /// Half-extent of the image plane at unit distance.
    tan_half_fov: f32,
    aspect: f32,
}

impl PerspectiveCamera {
    /// `fov_y` in radians.
    pub fn look_at(position: Vec3, target: Vec3, up_hint: Vec3, fov_y: f32, aspect: f32) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up_hint).normalize();
        let up = right.cross(forward);

        Self {
            position,
            forward,
            right,
            up,
            tan_half_fov: (fov_y * 0.5).tan(),
            aspect,
        }
    }

    /// `jitter` in `[0, 1)²`, for sub-pixel sampling.
    pub fn generate_ray(&self, x: u32, y: u32, jitter: Vec2, width: u32, height: u32) -> Ray {
        let ndc_x = ((x as f32 + jitter.x) / width as f32) * 2.0 - 1.0;
        let ndc_y = 1.0 - ((y as f32 + jitter.y) / height as f32) * 2.0;

        let direction = (self.forward
            + self.right * (ndc_x * self.tan_half_fov * self.aspect)
            + self.up * (ndc_y * self.tan_half_fov))
            .normalize();

        Ray::new(self.position, direction)
    }
}

// ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_pixel_looks_forward() {
        let camera = PerspectiveCamera::look_at(
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            std::f32::consts::FRAC_PI_2,
            1.0,
        );
        // Pixel 32 with zero jitter sits exactly on the image center.
        let ray = camera.generate_ray(32, 32, Vec2::ZERO, 64, 64);
        assert!((ray.direction - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn corners_diverge_symmetrically() {
        let camera = PerspectiveCamera::look_at(
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            std::f32::consts::FRAC_PI_2,
            1.0,
        );
        let top_left = camera.generate_ray(0, 0, Vec2::ZERO, 64, 64);
        let bottom_right = camera.generate_ray(63, 63, Vec2::ONE, 64, 64);
        assert!((top_left.direction.y + bottom_right.direction.y).abs() < 1e-5);
        assert!((top_left.direction.z + bottom_right.direction.z).abs() < 1e-5);
    }
}
