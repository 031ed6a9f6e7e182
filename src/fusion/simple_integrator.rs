//! One ray per point.

use glam::Vec3;

use crate::core::{Color, Transformation};

use super::tsdf_integrator::{point_color, touch_voxel, TsdfIntegratorConfig};
use super::tsdf_volume::TsdfLayer;

/// Casts a ray through every valid point. Slowest and most accurate.
#[derive(Debug, Clone)]
pub struct SimpleTsdfIntegrator {
    config: TsdfIntegratorConfig,
}

impl SimpleTsdfIntegrator {
    pub fn new(config: TsdfIntegratorConfig) -> Self {
        Self { config }
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
        let origin = t_g_c.translation();
        let voxel_size = layer.voxel_size();

        for (i, &point_c) in points_c.iter().enumerate() {
            let Some(is_clearing) = self.config.classify_point(point_c, freespace_points) else {
                continue;
            };
            let point_g = t_g_c.transform_point(point_c);
            let color = point_color(colors, i);
            let weight = self.config.voxel_weight(point_c);

            for global in self.config.ray(origin, point_g, is_clearing, voxel_size) {
                let (voxel, center) = touch_voxel(layer, global);
                self.config
                    .update_voxel(voxel, origin, point_g, center, color, weight, is_clearing);
            }
        }
    }
}
