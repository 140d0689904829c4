//! Per-pixel ray progress kept across refinement passes.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

/// Where one pixel's ray stopped.
///
/// Layout must match the traversal stage's per-pixel record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RayProgress {
    /// Accumulated premultiplied color.
    pub color: [f32; 4],
    /// Ray parameter to resume from.
    pub t: f32,
    /// Normalized depth of the first non-transparent sample.
    pub first_hit_depth: f32,
    /// Normalized depth of the last sample taken.
    pub last_depth: f32,
    /// One of the `RayProgress::*` status values.
    pub status: u32,
}

impl RayProgress {
    /// Ray has not finished.
    pub const PENDING: u32 = 0;
    /// Ray left the volume or reached full opacity.
    pub const RESOLVED: u32 = 1;

    /// Progress of a ray that was never traced.
    pub const START: Self = Self {
        color: [0.0; 4],
        t: 0.0,
        first_hit_depth: 1.0,
        last_depth: 1.0,
        status: Self::PENDING,
    };

    #[inline]
    pub const fn is_resolved(&self) -> bool {
        self.status == Self::RESOLVED
    }
}

/// Side buffer of ray progress keyed by pixel coordinate.
#[derive(Debug, Clone)]
pub struct RayBuffer {
    dims: UVec2,
    rays: Vec<RayProgress>,
    resets: u64,
}

impl RayBuffer {
    pub fn new(dims: UVec2) -> Self {
        Self {
            dims,
            rays: vec![RayProgress::START; (dims.x * dims.y) as usize],
            resets: 0,
        }
    }

    #[inline]
    pub const fn dims(&self) -> UVec2 {
        self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// How often the buffer was discarded.
    #[inline]
    pub const fn resets(&self) -> u64 {
        self.resets
    }

    /// Discard all progress.
    pub fn reset(&mut self) {
        self.rays.fill(RayProgress::START);
        self.resets += 1;
    }

    /// Change dimensions. Existing progress is discarded if they differ.
    pub fn resize(&mut self, dims: UVec2) {
        if dims == self.dims {
            return;
        }
        self.dims = dims;
        self.rays = vec![RayProgress::START; (dims.x * dims.y) as usize];
        self.resets += 1;
    }

    #[inline]
    fn index(&self, pixel: UVec2) -> usize {
        debug_assert!(pixel.x < self.dims.x && pixel.y < self.dims.y);
        (pixel.y * self.dims.x + pixel.x) as usize
    }

    pub fn get(&self, pixel: UVec2) -> &RayProgress {
        &self.rays[self.index(pixel)]
    }

    pub fn get_mut(&mut self, pixel: UVec2) -> &mut RayProgress {
        let index = self.index(pixel);
        &mut self.rays[index]
    }

    pub fn rays(&self) -> &[RayProgress] {
        &self.rays
    }

    pub fn rays_mut(&mut self) -> &mut [RayProgress] {
        &mut self.rays
    }

    /// Raw bytes for upload to the traversal stage.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.rays)
    }

    /// Rays still waiting for data.
    pub fn unresolved(&self) -> usize {
        self.rays.iter().filter(|r| !r.is_resolved()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_eight_floats() {
        assert_eq!(std::mem::size_of::<RayProgress>(), 32);
    }

    #[test]
    fn progress_survives_until_reset() {
        let mut buffer = RayBuffer::new(UVec2::new(4, 3));
        let pixel = UVec2::new(3, 2);
        buffer.get_mut(pixel).t = 0.5;
        buffer.get_mut(pixel).status = RayProgress::RESOLVED;

        assert_eq!(buffer.get(pixel).t, 0.5);
        assert_eq!(buffer.unresolved(), 11);

        buffer.reset();
        assert_eq!(*buffer.get(pixel), RayProgress::START);
        assert_eq!(buffer.unresolved(), 12);
        assert_eq!(buffer.resets(), 1);
    }

    #[test]
    fn resize_discards_only_on_change() {
        let mut buffer = RayBuffer::new(UVec2::new(2, 2));
        buffer.get_mut(UVec2::ZERO).t = 1.0;

        buffer.resize(UVec2::new(2, 2));
        assert_eq!(buffer.get(UVec2::ZERO).t, 1.0);
        assert_eq!(buffer.resets(), 0);

        buffer.resize(UVec2::new(8, 4));
        assert_eq!(buffer.len(), 32);
        assert_eq!(buffer.get(UVec2::ZERO).t, 0.0);
        assert_eq!(buffer.resets(), 1);
        assert_eq!(buffer.as_bytes().len(), 32 * 32);
    }
}
