//! Visualization payloads and the publication interface

pub mod mesh_msg;
pub mod layer_msgs;
pub mod publisher;

pub use mesh_msg::{generate_mesh_msg, ColorMode, MeshBlockMsg, MeshMsg};
pub use layer_msgs::{
    create_distance_pointcloud, create_distance_slice, create_occupancy_markers, create_surface_pointcloud,
    CubeListMarker, MarkerArray, PointCloudXYZI, PointCloudXYZRGB, PointXYZI,
};
pub use publisher::{MapPublisher, NullPublisher, PublicationCounts, RecordingPublisher};
