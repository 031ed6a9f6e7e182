//! # rustvox
//!
//! Incremental TSDF mapping: posed point clouds go in, a truncated signed distance
//! volume and a triangle mesh come out.
//!
//! ## Overview
//!
//! - [`server::TsdfServer`] admits batches on a surface stream and a freespace
//!   stream, resolves their pose, and integrates them with one of the ray-casting
//!   integrators in [`fusion`]
//! - meshes are rebuilt incrementally from dirty blocks and published through a
//!   [`visualization::MapPublisher`]
//! - the map can be saved, loaded and cleared at runtime
//!
//! ## Example
//!
//! ```rust
//! use rustvox::config::TsdfServerConfig;
//! use rustvox::server::TsdfServer;
//! use rustvox::test_utils::{identity_resolver, planar_scan};
//!
//! let server = TsdfServer::builder(TsdfServerConfig::default())
//!     .frame_resolver(identity_resolver("sensor"))
//!     .build();
//!
//! let outcome = server.insert_pointcloud(&planar_scan("sensor", 0.0, 2.0, 20));
//! assert!(outcome.is_integrated());
//! server.update_mesh();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod fusion;
pub mod io;
pub mod pipeline;
pub mod server;
pub mod test_utils;
pub mod timing;
pub mod visualization;

pub use config::{ConfigLoader, TsdfServerConfig};
pub use core::{FrameResolver, PointCloudMsg, Transformation};
pub use pipeline::IngestOutcome;
pub use server::{TsdfServer, TsdfServerBuilder};

// Re-export glam for convenience
pub use glam::Vec3;
