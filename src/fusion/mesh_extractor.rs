//! Mesh extraction from the TSDF layer
//!
//! Surface nets on the voxel-center grid: every cell spanned by eight observed
//! voxel centers that contains a sign change gets one vertex at the mean of its
//! edge crossings, and every voxel edge with a sign change becomes a quad joining
//! the vertices of the four cells around it. Blocks are meshed independently and
//! in parallel; each block owns the edges starting at its voxels.

use std::collections::HashMap;
use std::time::Instant;

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::core::Color;

use super::mesh_layer::{BlockMesh, MeshLayer};
use super::tsdf_volume::{BlockIndex, GlobalIndex, TsdfLayer};

/// Offsets of the eight corners of a cell, bit 0 = x, bit 1 = y, bit 2 = z.
const CORNERS: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Corner pairs forming the twelve cell edges.
const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

const AXES: [IVec3; 3] = [IVec3::X, IVec3::Y, IVec3::Z];

/// Mesh extraction configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MeshIntegratorConfig {
    /// Voxels below this weight do not contribute to the mesh
    pub min_weight: f32,
    /// Copy voxel colors to mesh vertices, gray otherwise
    pub use_color: bool,
}

impl Default for MeshIntegratorConfig {
    fn default() -> Self {
        Self {
            min_weight: 1e-4,
            use_color: true,
        }
    }
}

/// Summary of one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshStats {
    pub blocks_meshed: usize,
    pub triangles: usize,
    pub elapsed_ms: f64,
}

struct CellVertex {
    position: Vec3,
    normal: Vec3,
    color: Color,
}

/// Builds per-block meshes from a TSDF layer.
#[derive(Debug, Clone, Default)]
pub struct MeshIntegrator {
    config: MeshIntegratorConfig,
}

impl MeshIntegrator {
    pub fn new(config: MeshIntegratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeshIntegratorConfig {
        &self.config
    }

    /// Regenerate block meshes.
    ///
    /// With `only_mesh_updated_blocks` only blocks flagged as updated are meshed;
    /// otherwise all blocks are, and meshes of blocks no longer in the layer are
    /// dropped. With `clear_updated_flag` the flags of the meshed blocks are reset.
    pub fn generate_mesh(
        &self,
        layer: &mut TsdfLayer,
        mesh_layer: &mut MeshLayer,
        only_mesh_updated_blocks: bool,
        clear_updated_flag: bool,
    ) -> MeshStats {
        let start = Instant::now();
        let indices = if only_mesh_updated_blocks {
            layer.updated_block_indices()
        } else {
            layer.allocated_block_indices()
        };

        let source: &TsdfLayer = layer;
        let meshes: Vec<(BlockIndex, BlockMesh)> = indices
            .par_iter()
            .map(|&index| (index, self.mesh_block(source, index)))
            .collect();

        if !only_mesh_updated_blocks {
            mesh_layer.retain(|index| source.has_block(index));
        }

        let mut triangles = 0;
        for (index, mesh) in meshes {
            triangles += mesh.num_triangles();
            mesh_layer.insert(index, mesh);
        }

        if clear_updated_flag {
            for index in &indices {
                if let Some(block) = layer.block_by_index_mut(*index) {
                    block.set_updated(false);
                }
            }
        }

        let stats = MeshStats {
            blocks_meshed: indices.len(),
            triangles,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        log::debug!(
            "Meshed {} blocks ({} triangles) in {:.2} ms",
            stats.blocks_meshed,
            stats.triangles,
            stats.elapsed_ms
        );
        stats
    }

    fn mesh_block(&self, layer: &TsdfLayer, index: BlockIndex) -> BlockMesh {
        let mut mesh = BlockMesh {
            updated: true,
            ..Default::default()
        };
        let Some(block) = layer.block_by_index(index) else {
            return mesh;
        };

        let mut vertex_ids: HashMap<GlobalIndex, Option<u32>> = HashMap::new();
        for (linear, voxel) in block.voxels().iter().enumerate() {
            if !voxel.is_observed(self.config.min_weight) {
                continue;
            }
            let global = layer.global_index(index, block.local_index(linear));
            let inside = voxel.distance < 0.0;

            for axis in 0..3 {
                let Some(neighbor) = layer.voxel_by_global_index(global + AXES[axis]) else {
                    continue;
                };
                if !neighbor.is_observed(self.config.min_weight) || (neighbor.distance < 0.0) == inside {
                    continue;
                }

                let b = AXES[(axis + 1) % 3];
                let c = AXES[(axis + 2) % 3];
                let cells = [global, global - b, global - b - c, global - c];
                let mut quad = [0u32; 4];
                let mut complete = true;
                for (slot, cell) in quad.iter_mut().zip(cells) {
                    let id = *vertex_ids.entry(cell).or_insert_with(|| {
                        self.cell_vertex(layer, cell).map(|v| {
                            mesh.vertices.push(v.position);
                            mesh.normals.push(v.normal);
                            mesh.colors.push(v.color);
                            (mesh.vertices.len() - 1) as u32
                        })
                    });
                    match id {
                        Some(id) => *slot = id,
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if !complete {
                    continue;
                }

                // Quads face the side with positive distance.
                let [q0, q1, q2, q3] = quad;
                if inside {
                    mesh.indices.extend_from_slice(&[q0, q1, q2, q0, q2, q3]);
                } else {
                    mesh.indices.extend_from_slice(&[q0, q2, q1, q0, q3, q2]);
                }
            }
        }
        mesh
    }

    /// Vertex of the cell whose lowest corner is the voxel `cell`.
    fn cell_vertex(&self, layer: &TsdfLayer, cell: GlobalIndex) -> Option<CellVertex> {
        let mut distances = [0.0f32; 8];
        let mut colors = [Color::default(); 8];
        for (i, offset) in CORNERS.iter().enumerate() {
            let voxel = layer.voxel_by_global_index(cell + *offset)?;
            if !voxel.is_observed(self.config.min_weight) {
                return None;
            }
            distances[i] = voxel.distance;
            colors[i] = voxel.color;
        }

        let mut crossing_sum = Vec3::ZERO;
        let mut color_sum = [0.0f32; 3];
        let mut crossings = 0;
        for (a, b) in EDGES {
            let (da, db) = (distances[a], distances[b]);
            if (da < 0.0) == (db < 0.0) {
                continue;
            }
            let t = da / (da - db);
            crossing_sum += CORNERS[a].as_vec3().lerp(CORNERS[b].as_vec3(), t);
            let blended = Color::blend(colors[a], 1.0 - t, colors[b], t);
            color_sum[0] += blended.r as f32;
            color_sum[1] += blended.g as f32;
            color_sum[2] += blended.b as f32;
            crossings += 1;
        }
        if crossings == 0 {
            return None;
        }

        let n = crossings as f32;
        let voxel_size = layer.voxel_size();
        let position = layer.global_index_center(cell) + crossing_sum / n * voxel_size;

        let mut gradient = Vec3::ZERO;
        for (i, offset) in CORNERS.iter().enumerate() {
            let sign = offset.as_vec3() * 2.0 - Vec3::ONE;
            gradient += sign * distances[i];
        }
        let normal = gradient.try_normalize().unwrap_or(Vec3::Z);

        let color = if self.config.use_color {
            Color::rgb(
                (color_sum[0] / n).round() as u8,
                (color_sum[1] / n).round() as u8,
                (color_sum[2] / n).round() as u8,
            )
        } else {
            Color::gray()
        };

        Some(CellVertex { position, normal, color })
    }
}
