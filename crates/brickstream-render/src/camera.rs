//! Camera and level-of-detail estimate.

use glam::Vec3;

/// Perspective camera looking at the unit-cube volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.5, 0.5, 2.5),
            target: Vec3::splat(0.5),
            fov: std::f32::consts::FRAC_PI_4,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, fov: f32) -> Self {
        Self {
            position,
            target,
            fov,
        }
    }

    /// World-space size covered by one pixel at `distance`.
    pub fn pixel_footprint(&self, distance: f32, viewport_height: u32) -> f32 {
        let height = viewport_height.max(1) as f32;
        2.0 * distance * (self.fov * 0.5).tan() / height
    }

    /// Octree depth (from the root) whose samples project to about one pixel.
    ///
    /// The volume spans the unit cube; a node at depth `d` holds
    /// `brick_dim * 2^d` samples per axis of the whole volume.
    pub fn node_depth(&self, brick_dim: u32, num_levels: u8, viewport_height: u32) -> u8 {
        let distance = self.position.distance(Vec3::splat(0.5)).max(1e-3);
        let footprint = self.pixel_footprint(distance, viewport_height);
        let samples_needed = 1.0 / (footprint * brick_dim.max(1) as f32);
        let depth = samples_needed.log2().ceil().max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let depth = depth.min(255.0) as u8;
        depth.min(num_levels.saturating_sub(1))
    }
}
