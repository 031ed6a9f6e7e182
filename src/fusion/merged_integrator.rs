//! Bundles points by the voxel they fall into and casts a single ray per bundle.

use std::collections::HashMap;

use glam::Vec3;

use crate::core::{Color, Transformation};

use super::tsdf_integrator::{point_color, touch_voxel, TsdfIntegratorConfig};
use super::tsdf_volume::{GlobalIndex, TsdfLayer};

/// Points that ended in the same voxel, fused into one observation.
#[derive(Debug, Clone, Copy)]
struct Bundle {
    point_c: Vec3,
    color: Color,
    weight: f32,
    count: usize,
}

#[derive(Debug, Clone)]
pub struct MergedTsdfIntegrator {
    config: TsdfIntegratorConfig,
}

impl MergedTsdfIntegrator {
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

        let mut bundles: HashMap<GlobalIndex, Bundle> = HashMap::new();
        let mut clearing: Vec<usize> = Vec::new();

        for (i, &point_c) in points_c.iter().enumerate() {
            let Some(is_clearing) = self.config.classify_point(point_c, freespace_points) else {
                continue;
            };
            if is_clearing {
                clearing.push(i);
                continue;
            }

            let point_g = t_g_c.transform_point(point_c);
            let weight = self.config.voxel_weight(point_c);
            let color = point_color(colors, i);
            let key = layer.global_index_from_coordinates(point_g);

            bundles
                .entry(key)
                .and_modify(|bundle| {
                    bundle.color = Color::blend(bundle.color, bundle.weight, color, weight);
                    bundle.point_c += point_c;
                    bundle.weight += weight;
                    bundle.count += 1;
                })
                .or_insert(Bundle {
                    point_c,
                    color,
                    weight,
                    count: 1,
                });
        }

        for (&end_voxel, bundle) in &bundles {
            let point_c = bundle.point_c / bundle.count as f32;
            let point_g = t_g_c.transform_point(point_c);

            for global in self.config.ray(origin, point_g, false, voxel_size) {
                if self.config.enable_anti_grazing && global != end_voxel && bundles.contains_key(&global) {
                    continue;
                }
                let (voxel, center) = touch_voxel(layer, global);
                self.config
                    .update_voxel(voxel, origin, point_g, center, bundle.color, bundle.weight, false);
            }
        }

        for i in clearing {
            let point_c = points_c[i];
            let point_g = t_g_c.transform_point(point_c);
            let weight = self.config.voxel_weight(point_c);
            let color = point_color(colors, i);
            for global in self.config.ray(origin, point_g, true, voxel_size) {
                let (voxel, center) = touch_voxel(layer, global);
                self.config
                    .update_voxel(voxel, origin, point_g, center, color, weight, true);
            }
        }
    }
}
