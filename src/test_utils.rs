//! Test utilities for rustvox
//!
//! Synthetic inputs for tests and benchmarks:
//! - point cloud messages (planar walls, spheres)
//! - TSDF layers with analytic distances
//! - frame resolvers with fixed sensor poses
//!
//! # Examples
//!
//! ```
//! use rustvox::test_utils::*;
//!
//! let scan = planar_scan("sensor", 0.0, 1.5, 20);
//! assert_eq!(scan.len(), 400);
//! ```

use std::f32::consts::PI;
use std::sync::Arc;

use glam::{IVec3, Vec3};

use crate::core::{Color, FrameResolver, Header, PointCloudMsg, PointXYZRGB, StaticFrameResolver, Transformation};
use crate::fusion::{TsdfLayer, TsdfVoxel};

/// World frame used by the helpers.
pub const WORLD_FRAME: &str = "world";

/// Build a message from positions with one color.
pub fn pointcloud_msg(frame: &str, stamp: f64, points: &[Vec3], color: Color) -> PointCloudMsg {
    PointCloudMsg::new(
        Header::new(frame, stamp),
        points
            .iter()
            .map(|p| PointXYZRGB::new(p.x, p.y, p.z, color))
            .collect(),
    )
}

/// An `n x n` grid of points on the plane `z = depth` in the sensor frame.
///
/// The grid spans one meter in x and y, centered on the optical axis. Colors
/// follow the grid position so blended colors are distinguishable.
pub fn planar_scan(frame: &str, stamp: f64, depth: f32, n: usize) -> PointCloudMsg {
    let n = n.max(1);
    let step = if n > 1 { 1.0 / (n - 1) as f32 } else { 0.0 };
    let mut points = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let x = -0.5 + i as f32 * step;
            let y = -0.5 + j as f32 * step;
            let color = Color::rgb((i * 255 / n) as u8, (j * 255 / n) as u8, 200);
            points.push(PointXYZRGB::new(x, y, depth, color));
        }
    }
    PointCloudMsg::new(Header::new(frame, stamp), points)
}

/// Points on a sphere surface, spread with a Fibonacci lattice.
pub fn sphere_scan(frame: &str, stamp: f64, center: Vec3, radius: f32, count: usize) -> PointCloudMsg {
    let golden = PI * (3.0 - 5.0_f32.sqrt());
    let count = count.max(1);
    let points: Vec<Vec3> = (0..count)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f32;
            center + radius * Vec3::new(r * theta.cos(), y, r * theta.sin())
        })
        .collect();
    pointcloud_msg(frame, stamp, &points, Color::rgb(180, 60, 60))
}

/// Resolver placing `frame` at the world origin.
pub fn identity_resolver(frame: &str) -> Arc<dyn FrameResolver> {
    fixed_pose_resolver(frame, Transformation::identity())
}

/// Resolver with one fixed sensor pose.
pub fn fixed_pose_resolver(frame: &str, t_w_s: Transformation) -> Arc<dyn FrameResolver> {
    Arc::new(StaticFrameResolver::new(WORLD_FRAME).with_transform(frame, t_w_s))
}

/// A layer holding the exact signed distance of a sphere in a cube of blocks.
///
/// Blocks cover `[-blocks_per_axis / 2, blocks_per_axis / 2)` on every axis.
pub fn create_sphere_layer(voxel_size: f32, voxels_per_side: usize, radius: f32, blocks_per_axis: i32) -> TsdfLayer {
    let mut layer = TsdfLayer::new(voxel_size, voxels_per_side);
    let half = blocks_per_axis / 2;
    for bz in -half..blocks_per_axis - half {
        for by in -half..blocks_per_axis - half {
            for bx in -half..blocks_per_axis - half {
                let block = layer.allocate_block_by_index(IVec3::new(bx, by, bz));
                for linear in 0..block.num_voxels() {
                    let center = block.voxel_center(linear);
                    block.voxels_mut()[linear] = TsdfVoxel {
                        distance: center.length() - radius,
                        weight: 1.0,
                        color: Color::rgb(100, 150, 200),
                    };
                }
                block.set_updated(true);
                block.set_has_data(true);
            }
        }
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_scan_layout() {
        let scan = planar_scan("cam", 2.0, 1.5, 5);
        assert_eq!(scan.len(), 25);
        assert_eq!(scan.header.frame_id, "cam");
        assert!(scan.points.iter().all(|p| p.z == 1.5 && p.x.abs() <= 0.5 && p.y.abs() <= 0.5));
    }

    #[test]
    fn test_sphere_scan_on_surface() {
        let center = Vec3::new(1.0, 0.0, 0.0);
        let scan = sphere_scan("cam", 0.0, center, 0.5, 100);
        for p in &scan.points {
            assert!(((p.position() - center).length() - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_sphere_layer_signs() {
        let layer = create_sphere_layer(0.1, 8, 0.5, 2);
        assert_eq!(layer.num_allocated_blocks(), 8);
        let inside = layer.voxel_by_coordinates(Vec3::splat(0.05)).unwrap();
        assert!(inside.distance < 0.0);
        let outside = layer.voxel_by_coordinates(Vec3::new(0.75, 0.05, 0.05)).unwrap();
        assert!(outside.distance > 0.0);
    }
}
