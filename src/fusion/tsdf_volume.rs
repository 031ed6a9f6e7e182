//! Block-hashed TSDF volume
//!
//! The volume is a sparse set of fixed-size cubic blocks, each holding
//! `voxels_per_side³` voxels. Blocks are allocated on demand when a ray touches
//! them and carry an `updated` flag consumed by incremental meshing.

use std::collections::HashMap;

use glam::{IVec3, Vec3};
use thiserror::Error;

use crate::core::Color;

/// Integer index of a block in the block grid.
pub type BlockIndex = IVec3;
/// Integer index of a voxel in the global voxel grid.
pub type GlobalIndex = IVec3;

/// A voxel of the truncated signed distance field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsdfVoxel {
    /// Signed distance to the closest surface (meters, positive in front)
    pub distance: f32,
    /// Accumulated observation weight, 0 = never observed
    pub weight: f32,
    /// Accumulated color
    pub color: Color,
}

impl Default for TsdfVoxel {
    fn default() -> Self {
        Self {
            distance: 0.0,
            weight: 0.0,
            color: Color::default(),
        }
    }
}

impl TsdfVoxel {
    /// Whether the voxel has been observed with at least `min_weight`.
    pub fn is_observed(&self, min_weight: f32) -> bool {
        self.weight >= min_weight && self.weight > 0.0
    }

    /// Fuse another voxel into this one by weighted averaging.
    pub fn merge(&mut self, other: &TsdfVoxel) {
        let combined = self.weight + other.weight;
        if combined <= 0.0 {
            return;
        }
        self.color = Color::blend(self.color, self.weight, other.color, other.weight);
        self.distance = (self.distance * self.weight + other.distance * other.weight) / combined;
        self.weight = combined;
    }
}

/// How a block read from elsewhere is combined with an existing block at the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMergingStrategy {
    /// Fail if a block already exists.
    Prohibit,
    /// Overwrite the existing block.
    Replace,
    /// Keep the existing block and drop the incoming one.
    Discard,
    /// Fuse voxel by voxel.
    Merge,
}

#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("block {0} already exists and merging is prohibited")]
    BlockExists(BlockIndex),
    #[error("block has {found} voxels per side, layer expects {expected}")]
    VoxelsPerSideMismatch { expected: usize, found: usize },
}

/// A cube of voxels
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    origin: Vec3,
    voxels_per_side: usize,
    voxel_size: f32,
    voxels: Vec<TsdfVoxel>,
    updated: bool,
    has_data: bool,
}

impl Block {
    /// Create an empty block whose minimum corner sits at `origin`.
    pub fn new(origin: Vec3, voxels_per_side: usize, voxel_size: f32) -> Self {
        let n = voxels_per_side * voxels_per_side * voxels_per_side;
        Self {
            origin,
            voxels_per_side,
            voxel_size,
            voxels: vec![TsdfVoxel::default(); n],
            updated: false,
            has_data: false,
        }
    }

    /// Build a block from existing voxel data, `None` if the count does not match.
    pub fn from_voxels(
        origin: Vec3,
        voxels_per_side: usize,
        voxel_size: f32,
        voxels: Vec<TsdfVoxel>,
    ) -> Option<Self> {
        if voxels.len() != voxels_per_side * voxels_per_side * voxels_per_side {
            return None;
        }
        let has_data = voxels.iter().any(|v| v.weight > 0.0);
        Some(Self {
            origin,
            voxels_per_side,
            voxel_size,
            voxels,
            updated: false,
            has_data,
        })
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn voxels_per_side(&self) -> usize {
        self.voxels_per_side
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn block_size(&self) -> f32 {
        self.voxel_size * self.voxels_per_side as f32
    }

    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    pub fn voxels(&self) -> &[TsdfVoxel] {
        &self.voxels
    }

    pub fn voxels_mut(&mut self) -> &mut [TsdfVoxel] {
        &mut self.voxels
    }

    /// Linear index of a local voxel index (x fastest).
    pub fn linear_index(&self, local: IVec3) -> usize {
        let n = self.voxels_per_side;
        local.x as usize + n * (local.y as usize + n * local.z as usize)
    }

    /// Local voxel index of a linear index.
    pub fn local_index(&self, linear: usize) -> IVec3 {
        let n = self.voxels_per_side;
        IVec3::new((linear % n) as i32, ((linear / n) % n) as i32, (linear / (n * n)) as i32)
    }

    pub fn voxel_by_local_index(&self, local: IVec3) -> &TsdfVoxel {
        &self.voxels[self.linear_index(local)]
    }

    pub fn voxel_by_local_index_mut(&mut self, local: IVec3) -> &mut TsdfVoxel {
        let idx = self.linear_index(local);
        &mut self.voxels[idx]
    }

    /// Center of a voxel in world coordinates.
    pub fn voxel_center(&self, linear: usize) -> Vec3 {
        let local = self.local_index(linear).as_vec3();
        self.origin + (local + Vec3::splat(0.5)) * self.voxel_size
    }

    /// Whether the block changed since the last mesh pass.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.updated = updated;
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn set_has_data(&mut self, has_data: bool) {
        self.has_data = has_data;
    }

    /// Approximate heap + inline memory in bytes.
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.voxels.len() * std::mem::size_of::<TsdfVoxel>()
    }

    fn merge_from(&mut self, other: &Block) {
        for (dst, src) in self.voxels.iter_mut().zip(other.voxels.iter()) {
            dst.merge(src);
        }
        self.has_data |= other.has_data;
    }
}

/// Sparse layer of TSDF blocks
#[derive(Debug, Clone)]
pub struct TsdfLayer {
    voxel_size: f32,
    voxels_per_side: usize,
    blocks: HashMap<BlockIndex, Block>,
}

impl TsdfLayer {
    pub fn new(voxel_size: f32, voxels_per_side: usize) -> Self {
        Self {
            voxel_size,
            voxels_per_side,
            blocks: HashMap::new(),
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn voxels_per_side(&self) -> usize {
        self.voxels_per_side
    }

    pub fn block_size(&self) -> f32 {
        self.voxel_size * self.voxels_per_side as f32
    }

    /// Block containing a world position.
    pub fn block_index_from_coordinates(&self, pos: Vec3) -> BlockIndex {
        (pos / self.block_size()).floor().as_ivec3()
    }

    /// Global voxel containing a world position.
    pub fn global_index_from_coordinates(&self, pos: Vec3) -> GlobalIndex {
        (pos / self.voxel_size).floor().as_ivec3()
    }

    /// Center of a global voxel.
    pub fn global_index_center(&self, global: GlobalIndex) -> Vec3 {
        (global.as_vec3() + Vec3::splat(0.5)) * self.voxel_size
    }

    /// Split a global voxel index into block index and local voxel index.
    pub fn split_global_index(&self, global: GlobalIndex) -> (BlockIndex, IVec3) {
        let n = self.voxels_per_side as i32;
        let block = IVec3::new(global.x.div_euclid(n), global.y.div_euclid(n), global.z.div_euclid(n));
        let local = IVec3::new(global.x.rem_euclid(n), global.y.rem_euclid(n), global.z.rem_euclid(n));
        (block, local)
    }

    /// Global index of a voxel inside a block.
    pub fn global_index(&self, block: BlockIndex, local: IVec3) -> GlobalIndex {
        block * self.voxels_per_side as i32 + local
    }

    /// Origin (minimum corner) of a block.
    pub fn block_origin(&self, index: BlockIndex) -> Vec3 {
        index.as_vec3() * self.block_size()
    }

    pub fn has_block(&self, index: BlockIndex) -> bool {
        self.blocks.contains_key(&index)
    }

    pub fn block_by_index(&self, index: BlockIndex) -> Option<&Block> {
        self.blocks.get(&index)
    }

    pub fn block_by_index_mut(&mut self, index: BlockIndex) -> Option<&mut Block> {
        self.blocks.get_mut(&index)
    }

    /// Get block at index (create if not exists)
    pub fn allocate_block_by_index(&mut self, index: BlockIndex) -> &mut Block {
        let origin = self.block_origin(index);
        let (vps, voxel_size) = (self.voxels_per_side, self.voxel_size);
        self.blocks
            .entry(index)
            .or_insert_with(|| Block::new(origin, vps, voxel_size))
    }

    /// Get the block containing a world position (create if not exists)
    pub fn allocate_block_by_coordinates(&mut self, pos: Vec3) -> &mut Block {
        let index = self.block_index_from_coordinates(pos);
        self.allocate_block_by_index(index)
    }

    /// Voxel at a global index, if its block is allocated.
    pub fn voxel_by_global_index(&self, global: GlobalIndex) -> Option<&TsdfVoxel> {
        let (block, local) = self.split_global_index(global);
        self.blocks.get(&block).map(|b| b.voxel_by_local_index(local))
    }

    /// Voxel containing a world position, if its block is allocated.
    pub fn voxel_by_coordinates(&self, pos: Vec3) -> Option<&TsdfVoxel> {
        self.voxel_by_global_index(self.global_index_from_coordinates(pos))
    }

    /// Indices of all allocated blocks.
    pub fn allocated_block_indices(&self) -> Vec<BlockIndex> {
        self.blocks.keys().copied().collect()
    }

    /// Indices of blocks flagged as updated.
    pub fn updated_block_indices(&self) -> Vec<BlockIndex> {
        self.blocks
            .iter()
            .filter(|(_, b)| b.is_updated())
            .map(|(idx, _)| *idx)
            .collect()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&BlockIndex, &Block)> {
        self.blocks.iter()
    }

    pub fn num_allocated_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Approximate memory used by all blocks in bytes.
    pub fn memory_size(&self) -> usize {
        self.blocks.values().map(Block::memory_size).sum()
    }

    pub fn remove_block(&mut self, index: BlockIndex) -> Option<Block> {
        self.blocks.remove(&index)
    }

    /// Clear the volume
    pub fn remove_all_blocks(&mut self) {
        self.blocks.clear();
    }

    /// Insert a block produced elsewhere (e.g. decoded from a file).
    pub fn insert_block(
        &mut self,
        index: BlockIndex,
        block: Block,
        strategy: BlockMergingStrategy,
    ) -> Result<(), LayerError> {
        if block.voxels_per_side() != self.voxels_per_side {
            return Err(LayerError::VoxelsPerSideMismatch {
                expected: self.voxels_per_side,
                found: block.voxels_per_side(),
            });
        }

        match (self.blocks.get_mut(&index), strategy) {
            (None, _) => {
                self.blocks.insert(index, block);
            }
            (Some(_), BlockMergingStrategy::Prohibit) => return Err(LayerError::BlockExists(index)),
            (Some(existing), BlockMergingStrategy::Replace) => *existing = block,
            (Some(_), BlockMergingStrategy::Discard) => {}
            (Some(existing), BlockMergingStrategy::Merge) => {
                existing.merge_from(&block);
                existing.set_updated(true);
            }
        }
        Ok(())
    }
}

/// TSDF map configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfMapConfig {
    /// Voxel edge length in meters
    pub tsdf_voxel_size: f32,
    /// Voxels per block edge, power of two
    pub tsdf_voxels_per_side: usize,
}

impl Default for TsdfMapConfig {
    fn default() -> Self {
        Self {
            tsdf_voxel_size: 0.2,
            tsdf_voxels_per_side: 16,
        }
    }
}

/// Owner of the TSDF layer.
#[derive(Debug, Clone)]
pub struct TsdfMap {
    config: TsdfMapConfig,
    layer: TsdfLayer,
}

impl TsdfMap {
    pub fn new(config: TsdfMapConfig) -> Self {
        let layer = TsdfLayer::new(config.tsdf_voxel_size, config.tsdf_voxels_per_side);
        Self { config, layer }
    }

    pub fn config(&self) -> &TsdfMapConfig {
        &self.config
    }

    pub fn layer(&self) -> &TsdfLayer {
        &self.layer
    }

    pub fn layer_mut(&mut self) -> &mut TsdfLayer {
        &mut self.layer
    }

    pub fn voxel_size(&self) -> f32 {
        self.layer.voxel_size()
    }

    pub fn block_size(&self) -> f32 {
        self.layer.block_size()
    }
}

impl Default for TsdfMap {
    fn default() -> Self {
        Self::new(TsdfMapConfig::default())
    }
}
