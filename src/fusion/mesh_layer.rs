//! Block-structured triangle mesh mirroring the TSDF block layout.

use std::collections::HashMap;

use glam::Vec3;

use crate::core::Color;

use super::tsdf_volume::BlockIndex;

/// Triangle mesh of a single TSDF block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<Color>,
    /// Triangle list, three indices per triangle
    pub indices: Vec<u32>,
    /// Set when the mesh was regenerated and not yet published
    pub updated: bool,
}

impl BlockMesh {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty() && self.colors.len() == self.vertices.len()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.vertices.len()
    }
}

/// A single mesh with all block meshes concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<Color>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Mesh blocks keyed by the index of the TSDF block they were extracted from.
#[derive(Debug, Clone)]
pub struct MeshLayer {
    block_size: f32,
    meshes: HashMap<BlockIndex, BlockMesh>,
}

impl MeshLayer {
    pub fn new(block_size: f32) -> Self {
        Self {
            block_size,
            meshes: HashMap::new(),
        }
    }

    pub fn block_size(&self) -> f32 {
        self.block_size
    }

    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, index: BlockIndex) -> Option<&BlockMesh> {
        self.meshes.get(&index)
    }

    pub fn mesh_mut(&mut self, index: BlockIndex) -> Option<&mut BlockMesh> {
        self.meshes.get_mut(&index)
    }

    /// Store a freshly generated block mesh, replacing the previous one.
    pub fn insert(&mut self, index: BlockIndex, mesh: BlockMesh) {
        self.meshes.insert(index, mesh);
    }

    pub fn remove(&mut self, index: BlockIndex) -> Option<BlockMesh> {
        self.meshes.remove(&index)
    }

    /// Keep only the meshes whose index satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(BlockIndex) -> bool) {
        self.meshes.retain(|index, _| keep(*index));
    }

    pub fn meshes(&self) -> impl Iterator<Item = (&BlockIndex, &BlockMesh)> {
        self.meshes.iter()
    }

    pub fn meshes_mut(&mut self) -> impl Iterator<Item = (&BlockIndex, &mut BlockMesh)> {
        self.meshes.iter_mut()
    }

    pub fn updated_indices(&self) -> Vec<BlockIndex> {
        self.meshes
            .iter()
            .filter(|(_, m)| m.updated)
            .map(|(idx, _)| *idx)
            .collect()
    }

    pub fn num_triangles(&self) -> usize {
        self.meshes.values().map(BlockMesh::num_triangles).sum()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }

    /// Concatenate all block meshes into one mesh, in block index order.
    pub fn combined_mesh(&self) -> Mesh {
        let mut indices: Vec<&BlockIndex> = self.meshes.keys().collect();
        indices.sort_by_key(|idx| (idx.x, idx.y, idx.z));

        let mut mesh = Mesh::default();
        for idx in indices {
            let block = &self.meshes[idx];
            let offset = mesh.vertices.len() as u32;
            mesh.vertices.extend_from_slice(&block.vertices);
            if block.has_normals() {
                mesh.normals.extend_from_slice(&block.normals);
            } else {
                mesh.normals.extend(std::iter::repeat(Vec3::Z).take(block.vertices.len()));
            }
            if block.has_colors() {
                mesh.colors.extend_from_slice(&block.colors);
            } else {
                mesh.colors.extend(std::iter::repeat(Color::gray()).take(block.vertices.len()));
            }
            mesh.triangles.extend(
                block
                    .indices
                    .chunks_exact(3)
                    .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
            );
        }
        mesh
    }
}
