//! Parameter sections of the server configuration

use serde::{Deserialize, Serialize};

/// Server-level behaviour: frames, admission, publishing and mesh output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerParams {
    /// Minimum spacing between two accepted batches of the same stream (seconds)
    pub min_time_between_msgs_sec: f64,
    /// Frame every batch is transformed into
    pub world_frame: String,
    /// Height of the published distance slice (meters)
    pub slice_level: f32,
    /// Log per-batch statistics
    pub verbose: bool,
    /// Publish distance, surface and occupancy clouds after each batch
    pub publish_tsdf_info: bool,
    /// Publish the distance slice after each batch
    pub publish_slices: bool,
    /// Accept batches on the freespace stream
    pub use_freespace_pointcloud: bool,
    /// Period of the incremental mesh update, disabled when <= 0 (seconds)
    pub update_mesh_every_n_sec: f64,
    /// PLY file written by full mesh generation, empty disables export
    pub mesh_filename: String,
    /// Mesh coloring: color, colors, height, normals, lambert, lambert_color, gray
    pub color_mode: Option<String>,
    /// Depth of the ingestion queue used by the replay front end
    pub pointcloud_queue_size: usize,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            min_time_between_msgs_sec: 0.0,
            world_frame: "world".to_string(),
            slice_level: 0.5,
            verbose: true,
            publish_tsdf_info: false,
            publish_slices: false,
            use_freespace_pointcloud: false,
            update_mesh_every_n_sec: 0.0,
            mesh_filename: String::new(),
            color_mode: None,
            pointcloud_queue_size: 1,
        }
    }
}

/// Volume geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapParams {
    /// Voxel edge length (meters)
    pub tsdf_voxel_size: f32,
    /// Voxels per block edge, must be a power of two
    pub tsdf_voxels_per_side: usize,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            tsdf_voxel_size: 0.2,
            tsdf_voxels_per_side: 16,
        }
    }
}

/// Integration strategy and its tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorParams {
    /// simple, merged, merged_discard or fast; anything else means simple
    pub method: Option<String>,
    pub voxel_carving_enabled: bool,
    /// Defaults to four voxels
    pub truncation_distance: Option<f32>,
    pub max_ray_length_m: f32,
    pub min_ray_length_m: f32,
    pub max_weight: f32,
    pub use_const_weight: bool,
    pub allow_clear: bool,
    pub start_voxel_subsampling_factor: f32,
    pub max_consecutive_ray_collisions: usize,
    pub clear_checks_every_n_frames: usize,
    /// Unbounded when unset
    pub max_integration_time_s: Option<f64>,
}

impl Default for IntegratorParams {
    fn default() -> Self {
        Self {
            method: None,
            voxel_carving_enabled: true,
            truncation_distance: None,
            max_ray_length_m: 5.0,
            min_ray_length_m: 0.1,
            max_weight: 10000.0,
            use_const_weight: false,
            allow_clear: true,
            start_voxel_subsampling_factor: 2.0,
            max_consecutive_ray_collisions: 2,
            clear_checks_every_n_frames: 1,
            max_integration_time_s: None,
        }
    }
}

/// Mesh extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshParams {
    /// Voxels with less weight are ignored by the mesher
    pub mesh_min_weight: f32,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self { mesh_min_weight: 1e-4 }
    }
}
