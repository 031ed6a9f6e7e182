//! Voxel traversal along a ray segment.
//!
//! Grid walk in the style of Amanatides & Woo: starting from the voxel containing
//! the ray start, step into whichever neighbouring voxel the ray enters next until
//! the voxel containing the ray end is reached. Every voxel the segment passes
//! through is visited exactly once.
//!
//! ```text
//! start ●──┐
//!          └──┐
//!             └──● end      (visits every crossed cell, no gaps)
//! ```

use glam::{IVec3, Vec3};

use super::tsdf_volume::GlobalIndex;

/// Iterator over the global voxel indices crossed by a segment.
pub struct RayCaster {
    current: IVec3,
    end: IVec3,
    step: IVec3,
    t_max: Vec3,
    t_delta: Vec3,
    remaining: u32,
    done: bool,
}

impl RayCaster {
    /// Traverse from `start` to `end` (world coordinates) on a grid of `voxel_size`.
    pub fn new(start: Vec3, end: Vec3, voxel_size: f32) -> Self {
        let start_scaled = start / voxel_size;
        let end_scaled = end / voxel_size;
        let current = start_scaled.floor().as_ivec3();
        let end_index = end_scaled.floor().as_ivec3();
        let ray = end_scaled - start_scaled;

        let mut step = IVec3::ZERO;
        let mut t_max = Vec3::splat(f32::INFINITY);
        let mut t_delta = Vec3::splat(f32::INFINITY);
        for axis in 0..3 {
            let r = ray[axis];
            if r > 0.0 {
                step[axis] = 1;
                t_delta[axis] = 1.0 / r;
                t_max[axis] = ((current[axis] + 1) as f32 - start_scaled[axis]) / r;
            } else if r < 0.0 {
                step[axis] = -1;
                t_delta[axis] = -1.0 / r;
                t_max[axis] = (current[axis] as f32 - start_scaled[axis]) / r;
            }
        }

        let diff = (end_index - current).abs();
        Self {
            current,
            end: end_index,
            step,
            t_max,
            t_delta,
            remaining: (diff.x + diff.y + diff.z) as u32,
            done: false,
        }
    }
}

impl Iterator for RayCaster {
    type Item = GlobalIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;
        if self.remaining == 0 {
            self.done = true;
            return Some(result);
        }

        // Only axes that still have to move are candidates, so float drift can never overshoot.
        let mut axis = 0;
        let mut best = f32::INFINITY;
        for a in 0..3 {
            if self.current[a] != self.end[a] && (self.t_max[a] < best || best == f32::INFINITY) {
                best = self.t_max[a];
                axis = a;
            }
        }

        self.current[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];
        self.remaining -= 1;
        Some(result)
    }
}
