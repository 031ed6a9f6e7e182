//! Point clouds and markers rendered from the TSDF layer.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{Color, Header, PointXYZRGB};
use crate::fusion::{TsdfLayer, TsdfVoxel};

/// Voxels below this weight are treated as unobserved by all visualizations.
const MIN_VISUALIZATION_WEIGHT: f32 = 1e-3;

/// A point with a scalar intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointXYZI {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl PointXYZI {
    pub fn new(position: Vec3, intensity: f32) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            intensity,
        }
    }
}

/// Intensity cloud, used for distances.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloudXYZI {
    pub header: Header,
    pub points: Vec<PointXYZI>,
}

/// Colored cloud, used for surface voxels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloudXYZRGB {
    pub header: Header,
    pub points: Vec<PointXYZRGB>,
}

/// A list of axis-aligned cubes of equal size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeListMarker {
    pub header: Header,
    pub ns: String,
    pub id: i32,
    pub scale: f32,
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerArray {
    pub markers: Vec<CubeListMarker>,
}

/// Visit every observed voxel as (center, voxel).
fn for_each_observed(layer: &TsdfLayer, mut visit: impl FnMut(Vec3, &TsdfVoxel)) {
    for (_, block) in layer.blocks() {
        for (linear, voxel) in block.voxels().iter().enumerate() {
            if voxel.weight > MIN_VISUALIZATION_WEIGHT {
                visit(block.voxel_center(linear), voxel);
            }
        }
    }
}

/// All observed voxels with their distance as intensity.
pub fn create_distance_pointcloud(layer: &TsdfLayer, header: Header) -> PointCloudXYZI {
    let mut points = Vec::new();
    for_each_observed(layer, |center, voxel| points.push(PointXYZI::new(center, voxel.distance)));
    PointCloudXYZI { header, points }
}

/// Observed voxels closer than `surface_distance` to the surface, with their color.
pub fn create_surface_pointcloud(layer: &TsdfLayer, surface_distance: f32, header: Header) -> PointCloudXYZRGB {
    let mut points = Vec::new();
    for_each_observed(layer, |center, voxel| {
        if voxel.distance.abs() < surface_distance {
            points.push(PointXYZRGB::new(center.x, center.y, center.z, voxel.color));
        }
    });
    PointCloudXYZRGB { header, points }
}

/// Cubes for every voxel within one voxel of the surface, colored by height.
///
/// Always one stamped marker, empty when nothing is occupied.
pub fn create_occupancy_markers(layer: &TsdfLayer, header: Header) -> MarkerArray {
    let voxel_size = layer.voxel_size();
    let mut points = Vec::new();
    let mut colors = Vec::new();
    for_each_observed(layer, |center, voxel| {
        if voxel.distance.abs() < voxel_size {
            points.push(center.to_array());
            colors.push(Color::from_rainbow((center.z / 5.0).rem_euclid(1.0)).to_array());
        }
    });

    MarkerArray {
        markers: vec![CubeListMarker {
            header,
            ns: "occupied_voxels".to_string(),
            id: 0,
            scale: voxel_size,
            points,
            colors,
        }],
    }
}

/// Observed voxels whose centers lie in the horizontal voxel layer at `slice_level`.
pub fn create_distance_slice(layer: &TsdfLayer, slice_level: f32, header: Header) -> PointCloudXYZI {
    let half_voxel = layer.voxel_size() * 0.5;
    let mut points = Vec::new();
    for_each_observed(layer, |center, voxel| {
        if (center.z - slice_level).abs() < half_voxel {
            points.push(PointXYZI::new(center, voxel.distance));
        }
    });
    PointCloudXYZI { header, points }
}
