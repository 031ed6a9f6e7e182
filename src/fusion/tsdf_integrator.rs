//! Point cloud integration into the TSDF layer
//!
//! Every integrator casts rays from the sensor through each measured point and
//! updates the voxels along the ray with a projective signed distance. The
//! variants differ in how many rays they cast:
//!
//! - [`SimpleTsdfIntegrator`]: one ray per point.
//! - [`MergedTsdfIntegrator`]: one ray per end voxel, points falling into the same
//!   voxel are averaged first.
//! - [`FastTsdfIntegrator`]: subsamples ray starts and abandons rays that keep
//!   hitting voxels already updated by this scan.

use glam::Vec3;

use crate::core::{Color, Transformation};

use super::fast_integrator::FastTsdfIntegrator;
use super::merged_integrator::MergedTsdfIntegrator;
use super::ray_caster::RayCaster;
use super::simple_integrator::SimpleTsdfIntegrator;
use super::tsdf_volume::{GlobalIndex, TsdfLayer, TsdfVoxel};

const WEIGHT_EPSILON: f32 = 1e-6;

/// Integrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfIntegratorConfig {
    /// Maximum magnitude of a stored distance (meters)
    pub truncation_distance: f32,
    /// Upper bound for the accumulated voxel weight
    pub max_weight: f32,
    /// Update voxels all the way from the sensor, not just around the surface
    pub voxel_carving_enabled: bool,
    /// Points closer than this to the sensor are ignored
    pub min_ray_length_m: f32,
    /// Points further than this are ignored or used for clearing
    pub max_ray_length_m: f32,
    /// Weight every observation with 1 instead of 1/z²
    pub use_const_weight: bool,
    /// Cast clearing rays for points beyond the maximum ray length
    pub allow_clear: bool,
    /// Linearly reduce the weight of observations behind the surface
    pub use_weight_dropoff: bool,
    /// Skip voxels that are the end voxel of another bundle (merged only)
    pub enable_anti_grazing: bool,
    /// Ray starts are deduplicated on a grid this many times finer than the voxels (fast only)
    pub start_voxel_subsampling_factor: f32,
    /// Abandon a ray after this many consecutive already-updated voxels (fast only)
    pub max_consecutive_ray_collisions: usize,
    /// Reset the per-scan bookkeeping every n scans, 0 resets on every scan (fast only)
    pub clear_checks_every_n_frames: usize,
    /// Soft time budget per scan in seconds (fast only)
    pub max_integration_time_s: f64,
}

impl Default for TsdfIntegratorConfig {
    fn default() -> Self {
        Self {
            truncation_distance: 0.8,
            max_weight: 10000.0,
            voxel_carving_enabled: true,
            min_ray_length_m: 0.1,
            max_ray_length_m: 5.0,
            use_const_weight: false,
            allow_clear: true,
            use_weight_dropoff: true,
            enable_anti_grazing: false,
            start_voxel_subsampling_factor: 2.0,
            max_consecutive_ray_collisions: 2,
            clear_checks_every_n_frames: 1,
            max_integration_time_s: f64::INFINITY,
        }
    }
}

impl TsdfIntegratorConfig {
    /// Decide whether a sensor-frame point is used and whether it clears.
    ///
    /// Returns `None` for points that must be skipped, otherwise `Some(is_clearing)`.
    pub fn classify_point(&self, point_c: Vec3, freespace_point: bool) -> Option<bool> {
        let ray_distance = point_c.length();
        if !ray_distance.is_finite() || ray_distance < self.min_ray_length_m {
            None
        } else if ray_distance > self.max_ray_length_m {
            (self.allow_clear || freespace_point).then_some(true)
        } else {
            Some(freespace_point)
        }
    }

    /// Observation weight of a sensor-frame point.
    pub fn voxel_weight(&self, point_c: Vec3) -> f32 {
        if self.use_const_weight {
            return 1.0;
        }
        let z = point_c.z.abs();
        if z > WEIGHT_EPSILON {
            1.0 / (z * z)
        } else {
            0.0
        }
    }

    /// Voxels visited by the ray for one point, walked from the far end towards the sensor.
    pub fn ray(&self, origin: Vec3, point_g: Vec3, is_clearing: bool, voxel_size: f32) -> RayCaster {
        let offset = point_g - origin;
        let length = offset.length();
        let unit = if length > 0.0 { offset / length } else { Vec3::ZERO };

        let (start, end) = if is_clearing {
            let ray_length = (length - self.truncation_distance)
                .max(0.0)
                .min(self.max_ray_length_m);
            let end = origin + unit * ray_length;
            (if self.voxel_carving_enabled { origin } else { end }, end)
        } else {
            let end = point_g + unit * self.truncation_distance;
            let start = if self.voxel_carving_enabled {
                origin
            } else {
                point_g - unit * self.truncation_distance
            };
            (start, end)
        };
        RayCaster::new(end, start, voxel_size)
    }

    /// Fuse one observation into a voxel.
    ///
    /// Clearing observations only ever push the distance to at least the truncation
    /// distance and leave the color alone, so they can never create a surface.
    #[allow(clippy::too_many_arguments)]
    pub fn update_voxel(
        &self,
        voxel: &mut TsdfVoxel,
        origin: Vec3,
        point_g: Vec3,
        voxel_center: Vec3,
        color: Color,
        weight: f32,
        is_clearing: bool,
    ) {
        let truncation = self.truncation_distance;
        let mut sdf = compute_distance(origin, point_g, voxel_center);
        if is_clearing {
            sdf = sdf.max(truncation);
        }

        let mut updated_weight = weight;
        let dropoff_epsilon = dropoff_epsilon(truncation);
        if self.use_weight_dropoff && sdf < -dropoff_epsilon {
            updated_weight = (weight * (truncation + sdf) / (truncation - dropoff_epsilon)).max(0.0);
        }

        let new_weight = voxel.weight + updated_weight;
        if new_weight < WEIGHT_EPSILON {
            return;
        }

        if !is_clearing && sdf.abs() < truncation {
            voxel.color = Color::blend(voxel.color, voxel.weight, color, updated_weight);
        }

        let new_sdf = (sdf * updated_weight + voxel.distance * voxel.weight) / new_weight;
        voxel.distance = new_sdf.clamp(-truncation, truncation);
        voxel.weight = new_weight.min(self.max_weight);
    }
}

// One voxel behind the surface for the usual truncation of four voxels.
fn dropoff_epsilon(truncation: f32) -> f32 {
    truncation * 0.25
}

/// Projective signed distance of a voxel center to the measured point along the ray.
pub fn compute_distance(origin: Vec3, point_g: Vec3, voxel_center: Vec3) -> f32 {
    let v_point_origin = point_g - origin;
    let dist_g = v_point_origin.length();
    if dist_g <= 0.0 {
        return 0.0;
    }
    let dist_g_v = (voxel_center - origin).dot(v_point_origin) / dist_g;
    dist_g - dist_g_v
}

/// Voxel at a global index, allocating its block and flagging it as changed.
pub(crate) fn touch_voxel(layer: &mut TsdfLayer, global: GlobalIndex) -> (&mut TsdfVoxel, Vec3) {
    let center = layer.global_index_center(global);
    let (block_index, local) = layer.split_global_index(global);
    let block = layer.allocate_block_by_index(block_index);
    block.set_updated(true);
    block.set_has_data(true);
    (block.voxel_by_local_index_mut(local), center)
}

/// Integration method names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorMethod {
    Simple,
    Merged,
    MergedDiscard,
    Fast,
}

impl IntegratorMethod {
    /// Parse a method name, `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(Self::Simple),
            "merged" => Some(Self::Merged),
            "merged_discard" => Some(Self::MergedDiscard),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }

    /// Parse a method name, falling back to simple integration.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or(Self::Simple)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Merged => "merged",
            Self::MergedDiscard => "merged_discard",
            Self::Fast => "fast",
        }
    }

    /// Whether this method discards grazing contributions.
    pub fn anti_grazing(&self) -> bool {
        matches!(self, Self::MergedDiscard)
    }
}

/// The integration strategy selected at construction
#[derive(Debug)]
pub enum TsdfIntegrator {
    Simple(SimpleTsdfIntegrator),
    Merged(MergedTsdfIntegrator),
    Fast(FastTsdfIntegrator),
}

impl TsdfIntegrator {
    pub fn new(method: IntegratorMethod, mut config: TsdfIntegratorConfig) -> Self {
        config.enable_anti_grazing = method.anti_grazing();
        match method {
            IntegratorMethod::Simple => Self::Simple(SimpleTsdfIntegrator::new(config)),
            IntegratorMethod::Merged | IntegratorMethod::MergedDiscard => {
                Self::Merged(MergedTsdfIntegrator::new(config))
            }
            IntegratorMethod::Fast => Self::Fast(FastTsdfIntegrator::new(config)),
        }
    }

    /// Integrate points given in the sensor frame `C`, posed by `t_g_c`.
    ///
    /// With `freespace_points` set, the points only mark space as free.
    pub fn integrate_point_cloud(
        &mut self,
        layer: &mut TsdfLayer,
        t_g_c: &Transformation,
        points_c: &[Vec3],
        colors: &[Color],
        freespace_points: bool,
    ) {
        match self {
            Self::Simple(integrator) => {
                integrator.integrate_point_cloud(layer, t_g_c, points_c, colors, freespace_points)
            }
            Self::Merged(integrator) => {
                integrator.integrate_point_cloud(layer, t_g_c, points_c, colors, freespace_points)
            }
            Self::Fast(integrator) => {
                integrator.integrate_point_cloud(layer, t_g_c, points_c, colors, freespace_points)
            }
        }
    }

    pub fn config(&self) -> &TsdfIntegratorConfig {
        match self {
            Self::Simple(integrator) => integrator.config(),
            Self::Merged(integrator) => integrator.config(),
            Self::Fast(integrator) => integrator.config(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Merged(_) => "merged",
            Self::Fast(_) => "fast",
        }
    }
}

/// Color of the i-th point, gray when the color array is short.
pub(crate) fn point_color(colors: &[Color], index: usize) -> Color {
    colors.get(index).copied().unwrap_or_else(Color::gray)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TsdfIntegratorConfig {
        TsdfIntegratorConfig {
            truncation_distance: 0.4,
            ..Default::default()
        }
    }

    #[test]
    fn test_method_selection() {
        assert_eq!(IntegratorMethod::from_name("merged"), IntegratorMethod::Merged);
        assert_eq!(IntegratorMethod::from_name("fast"), IntegratorMethod::Fast);
        assert_eq!(IntegratorMethod::from_name("projective"), IntegratorMethod::Simple);
        assert_eq!(IntegratorMethod::parse(""), None);

        let discard = TsdfIntegrator::new(IntegratorMethod::MergedDiscard, config());
        assert_eq!(discard.name(), "merged");
        assert!(discard.config().enable_anti_grazing);

        let merged = TsdfIntegrator::new(
            IntegratorMethod::Merged,
            TsdfIntegratorConfig {
                enable_anti_grazing: true,
                ..config()
            },
        );
        assert!(!merged.config().enable_anti_grazing);
    }

    #[test]
    fn test_classify_point() {
        let cfg = config();
        assert_eq!(cfg.classify_point(Vec3::new(0.0, 0.0, 0.05), false), None);
        assert_eq!(cfg.classify_point(Vec3::new(0.0, 0.0, 2.0), false), Some(false));
        assert_eq!(cfg.classify_point(Vec3::new(0.0, 0.0, 2.0), true), Some(true));
        assert_eq!(cfg.classify_point(Vec3::new(0.0, 0.0, 9.0), false), Some(true));

        let no_clear = TsdfIntegratorConfig {
            allow_clear: false,
            ..cfg
        };
        assert_eq!(no_clear.classify_point(Vec3::new(0.0, 0.0, 9.0), false), None);
        assert_eq!(no_clear.classify_point(Vec3::new(0.0, 0.0, 9.0), true), Some(true));
    }

    #[test]
    fn test_voxel_weight() {
        let cfg = config();
        assert!((cfg.voxel_weight(Vec3::new(0.0, 0.0, 2.0)) - 0.25).abs() < 1e-6);
        let constant = TsdfIntegratorConfig {
            use_const_weight: true,
            ..cfg
        };
        assert_eq!(constant.voxel_weight(Vec3::new(0.0, 0.0, 2.0)), 1.0);
    }

    #[test]
    fn test_compute_distance_sign() {
        let origin = Vec3::ZERO;
        let point = Vec3::new(0.0, 0.0, 2.0);
        assert!((compute_distance(origin, point, Vec3::new(0.0, 0.0, 1.5)) - 0.5).abs() < 1e-6);
        assert!((compute_distance(origin, point, Vec3::new(0.1, 0.0, 2.3)) + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_update_voxel_clamps_and_caps() {
        let cfg = TsdfIntegratorConfig {
            max_weight: 1.5,
            ..config()
        };
        let mut voxel = TsdfVoxel::default();
        let origin = Vec3::ZERO;
        let point = Vec3::new(0.0, 0.0, 2.0);
        cfg.update_voxel(&mut voxel, origin, point, Vec3::new(0.0, 0.0, 0.5), Color::rgb(255, 0, 0), 1.0, false);
        assert_eq!(voxel.distance, 0.4);
        // Outside the truncation band the color is untouched.
        assert_eq!(voxel.color, Color::default());

        cfg.update_voxel(&mut voxel, origin, point, Vec3::new(0.0, 0.0, 1.9), Color::rgb(255, 0, 0), 1.0, false);
        assert_eq!(voxel.weight, 1.5);
        assert!((voxel.distance - 0.25).abs() < 1e-6);
        assert_eq!(voxel.color.r, 128);
    }

    #[test]
    fn test_clearing_update_never_goes_negative() {
        let cfg = config();
        let mut voxel = TsdfVoxel::default();
        let point = Vec3::new(0.0, 0.0, 2.0);
        cfg.update_voxel(&mut voxel, Vec3::ZERO, point, Vec3::new(0.0, 0.0, 2.2), Color::rgb(9, 9, 9), 1.0, true);
        assert_eq!(voxel.distance, 0.4);
        assert_eq!(voxel.color, Color::default());
        assert!(voxel.weight > 0.0);
    }

    #[test]
    fn test_ray_without_carving_stays_near_surface() {
        let cfg = TsdfIntegratorConfig {
            voxel_carving_enabled: false,
            ..config()
        };
        let cells: Vec<_> = cfg.ray(Vec3::ZERO, Vec3::new(0.05, 0.05, 2.05), false, 0.1).collect();
        // Walked from the far end back towards the sensor.
        assert_eq!(cells.first().map(|c| c.z), Some(24));
        assert_eq!(cells.last().map(|c| c.z), Some(16));
        assert_eq!(cells.len(), 9);
    }
}
