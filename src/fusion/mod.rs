//! Volumetric fusion: TSDF storage, integration, meshing and persistence

pub mod tsdf_volume;
pub mod ray_caster;
pub mod tsdf_integrator;
pub mod simple_integrator;
pub mod merged_integrator;
pub mod fast_integrator;
pub mod mesh_layer;
pub mod mesh_extractor;
pub mod mesh_io;
pub mod layer_io;

pub use tsdf_volume::{
    Block, BlockIndex, BlockMergingStrategy, GlobalIndex, LayerError, TsdfLayer, TsdfMap, TsdfMapConfig,
    TsdfVoxel,
};
pub use ray_caster::RayCaster;
pub use tsdf_integrator::{IntegratorMethod, TsdfIntegrator, TsdfIntegratorConfig};
pub use simple_integrator::SimpleTsdfIntegrator;
pub use merged_integrator::MergedTsdfIntegrator;
pub use fast_integrator::FastTsdfIntegrator;
pub use mesh_layer::{BlockMesh, Mesh, MeshLayer};
pub use mesh_extractor::{MeshIntegrator, MeshIntegratorConfig, MeshStats};
pub use mesh_io::{export_mesh_layer, save_mesh_obj, save_mesh_ply, MeshIoError};
pub use layer_io::{load_blocks_from_file, save_layer, LayerIoError};
