//! Mesh export utilities (PLY and OBJ).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::mesh_layer::{Mesh, MeshLayer};

#[derive(Debug, Error)]
pub enum MeshIoError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: String, source: std::io::Error },
    #[error("failed to write mesh {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("unsupported mesh format for {path}, expected .ply or .obj")]
    UnsupportedFormat { path: String },
}

fn write_error(path: &Path) -> impl Fn(std::io::Error) -> MeshIoError + '_ {
    move |source| MeshIoError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn create_parent_dir(path: &Path) -> Result<(), MeshIoError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent).map_err(|source| MeshIoError::CreateDir {
                path: parent.display().to_string(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Write an ASCII PLY with positions, normals and vertex colors.
pub fn save_mesh_ply(path: &Path, mesh: &Mesh) -> Result<(), MeshIoError> {
    create_parent_dir(path)?;
    let err = write_error(path);
    let file = File::create(path).map_err(&err)?;
    let mut writer = BufWriter::new(file);

    write!(
        writer,
        "ply\n\
         format ascii 1.0\n\
         comment rustvox mesh\n\
         element vertex {}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property float nx\n\
         property float ny\n\
         property float nz\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         element face {}\n\
         property list uchar int vertex_indices\n\
         end_header\n",
        mesh.vertices.len(),
        mesh.triangles.len()
    )
    .map_err(&err)?;

    for (i, v) in mesh.vertices.iter().enumerate() {
        let n = mesh.normals.get(i).copied().unwrap_or_default();
        let c = mesh.colors.get(i).copied().unwrap_or_default();
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {}",
            v.x, v.y, v.z, n.x, n.y, n.z, c.r, c.g, c.b
        )
        .map_err(&err)?;
    }

    for tri in &mesh.triangles {
        writeln!(writer, "3 {} {} {}", tri[0], tri[1], tri[2]).map_err(&err)?;
    }

    writer.flush().map_err(&err)
}

/// Write a Wavefront OBJ with per-vertex colors and normals.
pub fn save_mesh_obj(path: &Path, mesh: &Mesh) -> Result<(), MeshIoError> {
    create_parent_dir(path)?;
    let err = write_error(path);
    let file = File::create(path).map_err(&err)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "# rustvox mesh").map_err(&err)?;
    writeln!(writer, "# vertices {}", mesh.vertices.len()).map_err(&err)?;
    writeln!(writer, "# triangles {}", mesh.triangles.len()).map_err(&err)?;

    for (i, v) in mesh.vertices.iter().enumerate() {
        let c = mesh.colors.get(i).copied().unwrap_or_default();
        writeln!(
            writer,
            "v {} {} {} {} {} {}",
            v.x,
            v.y,
            v.z,
            c.r as f32 / 255.0,
            c.g as f32 / 255.0,
            c.b as f32 / 255.0
        )
        .map_err(&err)?;
    }
    for n in &mesh.normals {
        writeln!(writer, "vn {} {} {}", n.x, n.y, n.z).map_err(&err)?;
    }
    for tri in &mesh.triangles {
        let (a, b, c) = (tri[0] + 1, tri[1] + 1, tri[2] + 1);
        writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}").map_err(&err)?;
    }

    writer.flush().map_err(&err)
}

/// Export the whole mesh layer, format chosen by the file extension.
pub fn export_mesh_layer(path: &Path, mesh_layer: &MeshLayer) -> Result<(), MeshIoError> {
    let mesh = mesh_layer.combined_mesh();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("ply") => save_mesh_ply(path, &mesh),
        Some("obj") => save_mesh_obj(path, &mesh),
        _ => Err(MeshIoError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Color;
    use crate::fusion::mesh_layer::BlockMesh;
    use glam::{IVec3, Vec3};
    use tempfile::tempdir;

    fn mesh_layer() -> MeshLayer {
        let mut layer = MeshLayer::new(1.0);
        layer.insert(
            IVec3::ZERO,
            BlockMesh {
                vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                normals: vec![Vec3::Z; 3],
                colors: vec![Color::rgb(255, 0, 0), Color::rgb(0, 255, 0), Color::rgb(0, 0, 255)],
                indices: vec![0, 1, 2],
                updated: true,
            },
        );
        layer
    }

    #[test]
    fn test_export_ply_and_obj() {
        let dir = tempdir().unwrap();
        let ply_path = dir.path().join("nested").join("mesh.ply");
        let obj_path = dir.path().join("mesh.obj");

        export_mesh_layer(&ply_path, &mesh_layer()).unwrap();
        export_mesh_layer(&obj_path, &mesh_layer()).unwrap();

        let ply = std::fs::read_to_string(ply_path).unwrap();
        assert!(ply.starts_with("ply\n"));
        assert!(ply.contains("element vertex 3"));
        assert!(ply.contains("element face 1"));
        assert!(ply.contains("3 0 1 2"));
        assert!(ply.contains("0 0 0 0 0 1 255 0 0"));

        let obj = std::fs::read_to_string(obj_path).unwrap();
        assert!(obj.contains("vn 0 0 1"));
        assert!(obj.contains("f 1//1 2//2 3//3"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let err = export_mesh_layer(&dir.path().join("mesh.stl"), &mesh_layer()).unwrap_err();
        assert!(matches!(err, MeshIoError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as a file.
        let path = dir.path().join("taken.ply");
        std::fs::create_dir(&path).unwrap();
        let err = export_mesh_layer(&path, &mesh_layer()).unwrap_err();
        assert!(matches!(err, MeshIoError::Write { .. }));
    }
}
