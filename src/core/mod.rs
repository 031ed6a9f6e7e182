//! Core data structures shared by the mapping components

pub mod pose;
pub mod point_cloud;
pub mod frame_resolver;

pub use pose::Transformation;
pub use point_cloud::{Color, Colors, Header, PointCloudMsg, PointXYZRGB, Pointcloud};
pub use frame_resolver::{FrameResolver, StaticFrameResolver, TransformBuffer, TransformBufferConfig};
