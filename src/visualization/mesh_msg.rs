//! Mesh messages and vertex coloring.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{Color, Header};
use crate::fusion::{BlockMesh, MeshLayer};

/// Height band mapped onto one full rainbow cycle (meters).
const HEIGHT_COLOR_PERIOD: f32 = 5.0;

/// How mesh vertices are colored in published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Fused voxel colors
    Color,
    /// Rainbow by vertex height
    Height,
    /// Normal direction mapped to RGB
    Normals,
    /// Gray with Lambertian shading
    Lambert,
    /// Fused colors with Lambertian shading
    LambertColor,
    #[default]
    Gray,
}

impl ColorMode {
    /// Parse a mode name; unknown names give [`ColorMode::Gray`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "color" | "colors" => Self::Color,
            "height" => Self::Height,
            "normals" => Self::Normals,
            "lambert" => Self::Lambert,
            "lambert_color" => Self::LambertColor,
            _ => Self::Gray,
        }
    }

    /// Color of one vertex under this mode.
    pub fn vertex_color(&self, position: Vec3, normal: Vec3, color: Color) -> Color {
        match self {
            Self::Color => color,
            Self::Height => Color::from_rainbow((position.z / HEIGHT_COLOR_PERIOD).rem_euclid(1.0)),
            Self::Normals => {
                let n = normal * 0.5 + Vec3::splat(0.5);
                Color::rgb(to_u8(n.x), to_u8(n.y), to_u8(n.z))
            }
            Self::Lambert => lambert(Color::gray(), normal),
            Self::LambertColor => lambert(color, normal),
            Self::Gray => Color::gray(),
        }
    }
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Two-light Lambertian shading with a little ambient term.
fn lambert(color: Color, normal: Vec3) -> Color {
    const AMBIENT: f32 = 0.3;
    const DIFFUSE: f32 = 0.7;
    let lights = [Vec3::new(0.8, -0.2, 0.7).normalize(), Vec3::new(-0.5, 0.2, 0.2).normalize()];
    let shade = lights
        .iter()
        .map(|light| AMBIENT + DIFFUSE * normal.dot(*light).max(0.0))
        .sum::<f32>()
        * 0.5;
    let base = Vec3::new(color.r as f32, color.g as f32, color.b as f32) / 255.0;
    let shaded = base * shade;
    Color::new(to_u8(shaded.x), to_u8(shaded.y), to_u8(shaded.z), color.a)
}

/// Mesh of one block inside a [`MeshMsg`]; an empty block clears a previously sent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshBlockMsg {
    pub index: [i32; 3],
    pub vertices: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
    pub triangles: Vec<[u32; 3]>,
}

/// Incremental mesh update, stamped with the world frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshMsg {
    pub header: Header,
    pub block_edge_length: f32,
    pub mesh_blocks: Vec<MeshBlockMsg>,
}

impl MeshMsg {
    pub fn num_triangles(&self) -> usize {
        self.mesh_blocks.iter().map(|b| b.triangles.len()).sum()
    }
}

fn block_msg(index: [i32; 3], mesh: &BlockMesh, mode: ColorMode) -> MeshBlockMsg {
    let colors = mesh
        .vertices
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let normal = mesh.normals.get(i).copied().unwrap_or(Vec3::Z);
            let color = mesh.colors.get(i).copied().unwrap_or_else(Color::gray);
            mode.vertex_color(p, normal, color).to_array()
        })
        .collect();
    MeshBlockMsg {
        index,
        vertices: mesh.vertices.iter().map(|v| v.to_array()).collect(),
        colors,
        triangles: mesh
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect(),
    }
}

/// Build a message from the block meshes regenerated since the last message.
///
/// The `updated` flag of every included block mesh is cleared, so a second call
/// without regeneration in between yields an empty message.
pub fn generate_mesh_msg(mesh_layer: &mut MeshLayer, mode: ColorMode, header: Header) -> MeshMsg {
    let mut mesh_blocks = Vec::new();
    for (index, mesh) in mesh_layer.meshes_mut() {
        if !mesh.updated {
            continue;
        }
        mesh_blocks.push(block_msg(index.to_array(), mesh, mode));
        mesh.updated = false;
    }
    mesh_blocks.sort_by_key(|b| b.index);
    MeshMsg {
        header,
        block_edge_length: mesh_layer.block_size(),
        mesh_blocks,
    }
}
