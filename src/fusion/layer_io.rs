//! TSDF layer persistence.
//!
//! Layers are stored as JSON: a header with the grid geometry followed by one
//! record per block holding flat per-voxel arrays. Loading decodes and validates
//! the whole file before the first block touches the target layer, so a failed
//! load leaves the layer exactly as it was.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::IVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Color;

use super::tsdf_volume::{Block, BlockIndex, BlockMergingStrategy, LayerError, TsdfLayer, TsdfVoxel};

pub const LAYER_FILE_VERSION: u32 = 1;

const VOXEL_SIZE_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Error)]
pub enum LayerIoError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("failed to write layer {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("failed to read layer {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to serialize layer {path}: {source}")]
    Serialize { path: PathBuf, source: serde_json::Error },
    #[error("failed to deserialize layer {path}: {source}")]
    Deserialize { path: PathBuf, source: serde_json::Error },
    #[error("unsupported layer version {found} in {path}")]
    UnsupportedVersion { path: PathBuf, found: u32 },
    #[error("layer {path} has voxel size {found} and {found_vps} voxels per side, expected {expected} and {expected_vps}")]
    GeometryMismatch {
        path: PathBuf,
        expected: f32,
        found: f32,
        expected_vps: usize,
        found_vps: usize,
    },
    #[error("corrupt block {index} in {path}: {reason}")]
    CorruptBlock {
        path: PathBuf,
        index: BlockIndex,
        reason: String,
    },
    #[error("cannot insert block from {path}: {source}")]
    Insert { path: PathBuf, source: LayerError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayerFile {
    version: u32,
    voxel_size: f32,
    voxels_per_side: usize,
    blocks: Vec<BlockRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockRecord {
    index: [i32; 3],
    distances: Vec<f32>,
    weights: Vec<f32>,
    colors: Vec<[u8; 4]>,
}

impl BlockRecord {
    fn from_block(index: BlockIndex, block: &Block) -> Self {
        let voxels = block.voxels();
        Self {
            index: index.to_array(),
            distances: voxels.iter().map(|v| v.distance).collect(),
            weights: voxels.iter().map(|v| v.weight).collect(),
            colors: voxels.iter().map(|v| v.color.to_array()).collect(),
        }
    }

    fn to_block(&self, layer: &TsdfLayer, path: &Path) -> Result<(BlockIndex, Block), LayerIoError> {
        let index = IVec3::from_array(self.index);
        let corrupt = |reason: String| LayerIoError::CorruptBlock {
            path: path.to_path_buf(),
            index,
            reason,
        };

        let vps = layer.voxels_per_side();
        let expected = vps * vps * vps;
        if self.distances.len() != expected || self.weights.len() != expected || self.colors.len() != expected {
            return Err(corrupt(format!(
                "expected {expected} voxels, found {} distances, {} weights, {} colors",
                self.distances.len(),
                self.weights.len(),
                self.colors.len()
            )));
        }
        if let Some(bad) = self
            .distances
            .iter()
            .chain(self.weights.iter())
            .find(|value| !value.is_finite())
        {
            return Err(corrupt(format!("non-finite voxel value {bad}")));
        }

        let voxels = self
            .distances
            .iter()
            .zip(&self.weights)
            .zip(&self.colors)
            .map(|((&distance, &weight), &rgba)| TsdfVoxel {
                distance,
                weight,
                color: Color::from_array(rgba),
            })
            .collect();
        let mut block = Block::from_voxels(layer.block_origin(index), vps, layer.voxel_size(), voxels)
            .ok_or_else(|| corrupt("voxel count mismatch".to_string()))?;
        block.set_updated(true);
        Ok((index, block))
    }
}

/// Serialize all blocks of `layer` to `path`.
pub fn save_layer(layer: &TsdfLayer, path: &Path) -> Result<(), LayerIoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
        fs::create_dir_all(parent).map_err(|source| LayerIoError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut blocks: Vec<(&BlockIndex, &Block)> = layer.blocks().collect();
    blocks.sort_by_key(|(idx, _)| (idx.x, idx.y, idx.z));
    let file_contents = LayerFile {
        version: LAYER_FILE_VERSION,
        voxel_size: layer.voxel_size(),
        voxels_per_side: layer.voxels_per_side(),
        blocks: blocks
            .into_iter()
            .map(|(idx, block)| BlockRecord::from_block(*idx, block))
            .collect(),
    };

    let file = File::create(path).map_err(|source| LayerIoError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &file_contents).map_err(|source| LayerIoError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(|source| LayerIoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the blocks stored at `path` into `layer` using `strategy`.
///
/// Returns the number of blocks read from the file. Loaded blocks are flagged as
/// updated so the next incremental mesh pass picks them up.
pub fn load_blocks_from_file(
    path: &Path,
    strategy: BlockMergingStrategy,
    layer: &mut TsdfLayer,
) -> Result<usize, LayerIoError> {
    let file = File::open(path).map_err(|source| LayerIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let contents: LayerFile =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| LayerIoError::Deserialize {
            path: path.to_path_buf(),
            source,
        })?;

    if contents.version != LAYER_FILE_VERSION {
        return Err(LayerIoError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: contents.version,
        });
    }
    if (contents.voxel_size - layer.voxel_size()).abs() > VOXEL_SIZE_TOLERANCE
        || contents.voxels_per_side != layer.voxels_per_side()
    {
        return Err(LayerIoError::GeometryMismatch {
            path: path.to_path_buf(),
            expected: layer.voxel_size(),
            found: contents.voxel_size,
            expected_vps: layer.voxels_per_side(),
            found_vps: contents.voxels_per_side,
        });
    }

    let mut seen = HashSet::new();
    let mut decoded = Vec::with_capacity(contents.blocks.len());
    for record in &contents.blocks {
        let (index, block) = record.to_block(layer, path)?;
        if !seen.insert(index) {
            return Err(LayerIoError::CorruptBlock {
                path: path.to_path_buf(),
                index,
                reason: "duplicate block".to_string(),
            });
        }
        if strategy == BlockMergingStrategy::Prohibit && layer.has_block(index) {
            return Err(LayerIoError::Insert {
                path: path.to_path_buf(),
                source: LayerError::BlockExists(index),
            });
        }
        decoded.push((index, block));
    }

    let count = decoded.len();
    for (index, block) in decoded {
        layer
            .insert_block(index, block, strategy)
            .map_err(|source| LayerIoError::Insert {
                path: path.to_path_buf(),
                source,
            })?;
    }
    Ok(count)
}
