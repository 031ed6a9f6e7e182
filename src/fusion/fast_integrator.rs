//! Speed-oriented integration.
//!
//! Two per-scan sets drive the shortcuts: ray starts are deduplicated on a grid
//! finer than the voxel grid, and a ray stops once it keeps running into voxels
//! that another ray of the same scan already updated. Both sets are reset every
//! `clear_checks_every_n_frames` scans.

use std::collections::HashSet;
use std::time::Instant;

use glam::Vec3;

use crate::core::{Color, Transformation};

use super::tsdf_integrator::{point_color, touch_voxel, TsdfIntegratorConfig};
use super::tsdf_volume::{GlobalIndex, TsdfLayer};

#[derive(Debug, Clone)]
pub struct FastTsdfIntegrator {
    config: TsdfIntegratorConfig,
    start_voxels: HashSet<GlobalIndex>,
    observed_voxels: HashSet<GlobalIndex>,
    integration_calls: usize,
}

impl FastTsdfIntegrator {
    pub fn new(config: TsdfIntegratorConfig) -> Self {
        Self {
            config,
            start_voxels: HashSet::new(),
            observed_voxels: HashSet::new(),
            integration_calls: 0,
        }
    }

    pub fn config(&self) -> &TsdfIntegratorConfig {
        &self.config
    }

    pub fn integrate_point_cloud(
        &mut self,
        layer: &mut TsdfLayer,
        t_g_c: &Transformation,
        points_c: &[Vec3],
        colors: &[Color],
        freespace_points: bool,
    ) {
        let every_n = self.config.clear_checks_every_n_frames;
        if every_n == 0 || self.integration_calls % every_n == 0 {
            self.start_voxels.clear();
            self.observed_voxels.clear();
        }
        self.integration_calls += 1;

        let started = Instant::now();
        let origin = t_g_c.translation();
        let voxel_size = layer.voxel_size();
        let start_grid = voxel_size / self.config.start_voxel_subsampling_factor.max(f32::EPSILON);

        for (i, &point_c) in points_c.iter().enumerate() {
            let Some(is_clearing) = self.config.classify_point(point_c, freespace_points) else {
                continue;
            };
            if started.elapsed().as_secs_f64() > self.config.max_integration_time_s {
                log::debug!(
                    "Fast integration stopped after {}/{} points, time budget exhausted",
                    i,
                    points_c.len()
                );
                break;
            }

            let point_g = t_g_c.transform_point(point_c);
            let start_key = (point_g / start_grid).floor().as_ivec3();
            if !self.start_voxels.insert(start_key) {
                continue;
            }

            let color = point_color(colors, i);
            let weight = self.config.voxel_weight(point_c);
            let mut consecutive_collisions = 0;

            for global in self.config.ray(origin, point_g, is_clearing, voxel_size) {
                if self.observed_voxels.insert(global) {
                    consecutive_collisions = 0;
                } else {
                    consecutive_collisions += 1;
                }
                if consecutive_collisions > self.config.max_consecutive_ray_collisions {
                    break;
                }
                let (voxel, center) = touch_voxel(layer, global);
                self.config
                    .update_voxel(voxel, origin, point_g, center, color, weight, is_clearing);
            }
        }
    }
}
