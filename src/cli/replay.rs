//! Offline replay of a recorded session through the server.

use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use log::{debug, info};
use serde::Serialize;

use crate::core::{TransformBuffer, Transformation};
use crate::io::{RecordedMessage, RecordingError, RecordingReader};
use crate::pipeline::IngestOutcome;
use crate::server::TsdfServer;

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Incremental mesh update after this many integrated clouds, 0 disables
    pub mesh_every: usize,
    /// Messages buffered between the reader thread and the server
    pub queue_size: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mesh_every: 0,
            queue_size: 1,
        }
    }
}

/// What happened to the recorded messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub transforms: usize,
    pub pointclouds: usize,
    pub freespace_pointclouds: usize,
    pub integrated: usize,
    pub throttled: usize,
    pub no_transform: usize,
    pub disabled: usize,
    pub mesh_updates: usize,
}

impl ReplayReport {
    fn count(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Integrated => self.integrated += 1,
            IngestOutcome::Throttled => self.throttled += 1,
            IngestOutcome::NoTransform => self.no_transform += 1,
            IngestOutcome::Disabled => self.disabled += 1,
        }
    }
}

/// Replay `path` into `server`, feeding transforms into `buffer`.
///
/// The recording is parsed on a separate thread and handed over through a bounded
/// channel; messages are applied in file order.
pub fn replay(
    path: &Path,
    buffer: &TransformBuffer,
    server: &TsdfServer,
    options: ReplayOptions,
) -> Result<ReplayReport, RecordingError> {
    let reader = RecordingReader::open(path)?;
    let (tx, rx) = bounded(options.queue_size.max(1));

    thread::scope(|scope| {
        scope.spawn(move || {
            for message in reader {
                let failed = message.is_err();
                if tx.send(message).is_err() || failed {
                    break;
                }
            }
        });
        consume(rx, buffer, server, options)
    })
}

fn consume(
    rx: Receiver<Result<RecordedMessage, RecordingError>>,
    buffer: &TransformBuffer,
    server: &TsdfServer,
    options: ReplayOptions,
) -> Result<ReplayReport, RecordingError> {
    let mut report = ReplayReport::default();
    let mut since_mesh = 0usize;

    for message in rx.iter() {
        match message? {
            RecordedMessage::Transform {
                frame,
                stamp,
                quaternion,
                translation,
            } => {
                buffer.insert(&frame, stamp, Transformation::from_arrays(quaternion, translation));
                report.transforms += 1;
            }
            RecordedMessage::Pointcloud(msg) => {
                report.pointclouds += 1;
                let outcome = server.insert_pointcloud(&msg);
                report.count(outcome);
                if outcome.is_integrated() {
                    since_mesh += 1;
                }
            }
            RecordedMessage::FreespacePointcloud(msg) => {
                report.freespace_pointclouds += 1;
                report.count(server.insert_freespace_pointcloud(&msg));
            }
        }

        if options.mesh_every > 0 && since_mesh >= options.mesh_every {
            let stats = server.update_mesh();
            debug!(
                "Mesh update: {} blocks, {} triangles in {:.1} ms",
                stats.blocks_meshed, stats.triangles, stats.elapsed_ms
            );
            report.mesh_updates += 1;
            since_mesh = 0;
        }
    }

    info!(
        "Replayed {} transforms, {} clouds ({} freespace): {} integrated, {} throttled, {} without transform",
        report.transforms,
        report.pointclouds + report.freespace_pointclouds,
        report.freespace_pointclouds,
        report.integrated,
        report.throttled,
        report.no_transform
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TsdfServerConfig;
    use crate::io::RecordingWriter;
    use crate::test_utils::planar_scan;
    use glam::Vec3;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_session(path: &Path) {
        let mut writer = RecordingWriter::create(path).unwrap();
        for i in 0..4 {
            let stamp = i as f64;
            let pose = Transformation::from_translation(Vec3::new(0.05 * i as f32, 0.0, 0.0));
            writer.write(&RecordedMessage::transform("sensor", stamp, &pose)).unwrap();
            writer
                .write(&RecordedMessage::Pointcloud(planar_scan("sensor", stamp, 1.5, 12)))
                .unwrap();
        }
        // No pose was ever recorded for this frame.
        writer
            .write(&RecordedMessage::Pointcloud(planar_scan("lidar", 10.0, 1.5, 4)))
            .unwrap();
        writer
            .write(&RecordedMessage::FreespacePointcloud(planar_scan("sensor", 3.0, 3.0, 4)))
            .unwrap();
        writer.finish().unwrap();
    }

    fn server(buffer: Arc<TransformBuffer>) -> TsdfServer {
        let mut config = TsdfServerConfig::default();
        config.server.verbose = false;
        config.map.tsdf_voxel_size = 0.1;
        config.map.tsdf_voxels_per_side = 8;
        TsdfServer::builder(config).frame_resolver(buffer).build()
    }

    #[test]
    fn test_replay_counts_outcomes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_session(&path);

        let buffer = Arc::new(TransformBuffer::new("world"));
        let server = server(Arc::clone(&buffer));
        let options = ReplayOptions {
            mesh_every: 2,
            queue_size: 2,
        };
        let report = replay(&path, &buffer, &server, options).unwrap();

        assert_eq!(report.transforms, 4);
        assert_eq!(report.pointclouds, 5);
        assert_eq!(report.freespace_pointclouds, 1);
        assert_eq!(report.integrated, 4);
        assert_eq!(report.no_transform, 1);
        assert_eq!(report.disabled, 1);
        assert_eq!(report.mesh_updates, 2);
        assert!(server.num_allocated_blocks() > 0);
        assert!(server.with_mesh_layer(|mesh| mesh.num_triangles()) > 0);
    }

    #[test]
    fn test_replay_stops_on_corrupt_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, "{\"type\":\"transform\"}\n").unwrap();

        let buffer = Arc::new(TransformBuffer::new("world"));
        let server = server(Arc::clone(&buffer));
        let result = replay(&path, &buffer, &server, ReplayOptions::default());
        assert!(matches!(result, Err(RecordingError::Parse { line: 1, .. })));
    }
}
