use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use glam::Vec3;
use rustvox::config::TsdfServerConfig;
use rustvox::core::{Color, PointXYZRGB, TransformBuffer, Transformation};
use rustvox::fusion::{TsdfLayer, TsdfVoxel};
use rustvox::pipeline::{IngestOutcome, Stream};
use rustvox::server::TsdfServer;
use rustvox::test_utils::{identity_resolver, planar_scan, WORLD_FRAME};
use rustvox::visualization::{
    MapPublisher, MarkerArray, MeshMsg, PointCloudXYZI, PointCloudXYZRGB, RecordingPublisher,
};
use tempfile::tempdir;

fn base_config() -> TsdfServerConfig {
    let mut config = TsdfServerConfig::default();
    config.server.verbose = false;
    config.map.tsdf_voxel_size = 0.1;
    config.map.tsdf_voxels_per_side = 8;
    config
}

fn server_with(config: TsdfServerConfig) -> (TsdfServer, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::new());
    let server = TsdfServer::builder(config)
        .frame_resolver(identity_resolver("sensor"))
        .publisher(publisher.clone())
        .build();
    (server, publisher)
}

type Snapshot = Vec<([i32; 3], Vec<TsdfVoxel>)>;

fn snapshot(layer: &TsdfLayer) -> Snapshot {
    let mut blocks: Snapshot = layer
        .blocks()
        .map(|(index, block)| (index.to_array(), block.voxels().to_vec()))
        .collect();
    blocks.sort_by_key(|(index, _)| *index);
    blocks
}

fn map_snapshot(server: &TsdfServer) -> Snapshot {
    server.with_map(|map| snapshot(map.layer()))
}

#[test]
fn throttled_batch_leaves_map_untouched() {
    let mut config = base_config();
    config.server.min_time_between_msgs_sec = 0.5;

    let (throttled, _) = server_with(config.clone());
    assert!(throttled.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 10)).is_integrated());
    assert_eq!(
        throttled.insert_pointcloud(&planar_scan("sensor", 1.2, 2.5, 10)),
        IngestOutcome::Throttled
    );
    // Older than the last accepted batch.
    assert_eq!(
        throttled.insert_pointcloud(&planar_scan("sensor", 0.1, 2.5, 10)),
        IngestOutcome::Throttled
    );

    let (reference, _) = server_with(config);
    reference.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 10));

    assert_eq!(map_snapshot(&throttled), map_snapshot(&reference));
    assert_eq!(throttled.last_accepted(Stream::Pointcloud), Some(1.0));
}

#[test]
fn non_finite_points_do_not_reach_the_map() {
    let clean = planar_scan("sensor", 1.0, 1.5, 8);
    let mut noisy = clean.clone();
    noisy
        .points
        .insert(3, PointXYZRGB::new(f32::NAN, 0.0, 1.0, Color::rgb(255, 0, 0)));
    noisy
        .points
        .push(PointXYZRGB::new(0.0, f32::INFINITY, 1.0, Color::rgb(0, 255, 0)));

    let (a, _) = server_with(base_config());
    let (b, _) = server_with(base_config());
    a.insert_pointcloud(&clean);
    b.insert_pointcloud(&noisy);
    assert_eq!(map_snapshot(&a), map_snapshot(&b));
}

#[test]
fn integrator_selection_follows_method_name() {
    let cases = [
        (Some("merged_discard"), "merged", true),
        (Some("merged"), "merged", false),
        (Some("fast"), "fast", false),
        (Some("simple"), "simple", false),
        (Some("voxel_hashing"), "simple", false),
        (None, "simple", false),
    ];
    for (method, name, anti_grazing) in cases {
        let mut config = base_config();
        config.integrator.method = method.map(str::to_string);
        let (server, _) = server_with(config);
        assert_eq!(server.integrator_name(), name, "method {:?}", method);
        assert_eq!(server.anti_grazing_enabled(), anti_grazing, "method {:?}", method);
    }
}

#[test]
fn invalid_voxels_per_side_is_corrected_and_reported() {
    let mut config = base_config();
    config.map.tsdf_voxels_per_side = 10;
    let (server, _) = server_with(config);

    assert_eq!(server.config().map.tsdf_voxels_per_side, 16);
    server.with_map(|map| assert_eq!(map.layer().voxels_per_side(), 16));
    let correction = server
        .config_corrections()
        .iter()
        .find(|c| c.field == "map.tsdf_voxels_per_side")
        .expect("correction recorded");
    assert_eq!(correction.provided, "10");
    assert_eq!(correction.replaced_with, "16");
}

#[test]
fn save_clear_load_restores_the_layer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("maps").join("room.json");
    let (server, _) = server_with(base_config());
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));
    server.update_mesh();
    let before = map_snapshot(&server);
    assert!(!before.is_empty());

    assert!(server.save_map(&path));
    server.clear();
    assert_eq!(server.num_allocated_blocks(), 0);
    assert_eq!(server.with_mesh_layer(|mesh| mesh.num_meshes()), 0);

    assert!(server.load_map(&path));
    assert_eq!(map_snapshot(&server), before);

    // Loading does not mesh, the next incremental update picks the blocks up.
    assert_eq!(server.with_mesh_layer(|mesh| mesh.num_meshes()), 0);
    let stats = server.update_mesh();
    assert_eq!(stats.blocks_meshed, before.len());
    assert!(server.with_mesh_layer(|mesh| mesh.num_triangles()) > 0);
}

#[test]
fn load_replaces_existing_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("map.json");
    let (server, _) = server_with(base_config());
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));
    let saved = map_snapshot(&server);
    assert!(server.save_map(&path));

    server.insert_pointcloud(&planar_scan("sensor", 2.0, 1.5, 12));
    assert_ne!(map_snapshot(&server), saved);
    assert!(server.load_map(&path));
    assert_eq!(map_snapshot(&server), saved);
}

#[test]
fn second_mesh_update_publishes_without_block_work() {
    let (server, publisher) = server_with(base_config());
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));

    let first = server.update_mesh();
    assert!(first.blocks_meshed > 0);
    let first_msg = publisher.last_mesh().unwrap();
    assert!(first_msg.num_triangles() > 0);
    assert_eq!(first_msg.header.frame_id, WORLD_FRAME);

    let second = server.update_mesh();
    assert_eq!(second.blocks_meshed, 0);
    assert_eq!(publisher.counts().mesh, 2);
    assert!(publisher.last_mesh().unwrap().mesh_blocks.is_empty());
    assert!(server.with_mesh_layer(|mesh| mesh.num_triangles()) > 0);
}

#[test]
fn freespace_batches_never_create_surfaces() {
    let mut config = base_config();
    config.server.use_freespace_pointcloud = true;
    let (server, publisher) = server_with(config);

    let outcome = server.insert_freespace_pointcloud(&planar_scan("sensor", 1.0, 3.0, 16));
    assert!(outcome.is_integrated());
    assert!(server.num_allocated_blocks() > 0);

    let truncation = server.config().integrator_config().truncation_distance;
    server.with_map(|map| {
        for (_, block) in map.layer().blocks() {
            for voxel in block.voxels().iter().filter(|v| v.weight > 0.0) {
                assert!(voxel.distance >= truncation - 1e-6);
            }
        }
    });

    assert!(server.generate_mesh());
    assert_eq!(server.with_mesh_layer(|mesh| mesh.num_triangles()), 0);
    assert_eq!(publisher.last_mesh().unwrap().num_triangles(), 0);
}

#[test]
fn failed_load_leaves_layer_unchanged() {
    let dir = tempdir().unwrap();
    let (server, _) = server_with(base_config());
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 10));
    let before = map_snapshot(&server);

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{\"version\": 1, \"blocks\": [").unwrap();
    assert!(!server.load_map(&corrupt));
    assert!(!server.load_map(dir.path().join("missing.json")));
    assert_eq!(map_snapshot(&server), before);

    // A map saved with another voxel size does not fit this layer.
    let mut coarse_config = base_config();
    coarse_config.map.tsdf_voxel_size = 0.2;
    let (coarse, _) = server_with(coarse_config);
    coarse.insert_pointcloud(&planar_scan("sensor", 1.0, 2.0, 10));
    let coarse_path = dir.path().join("coarse.json");
    assert!(coarse.save_map(&coarse_path));

    assert!(!server.load_map(&coarse_path));
    assert_eq!(map_snapshot(&server), before);
}

#[test]
fn generate_mesh_succeeds_when_export_fails() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let mut config = base_config();
    config.server.mesh_filename = blocker.join("mesh.ply").display().to_string();
    let (server, publisher) = server_with(config);
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));

    assert!(server.generate_mesh());
    assert_eq!(publisher.counts().mesh, 1);
    assert!(publisher.last_mesh().unwrap().num_triangles() > 0);
    assert!(server.timings().stats("mesh/output").is_some());
}

#[test]
fn generate_mesh_exports_ply() {
    let dir = tempdir().unwrap();
    let mesh_path = dir.path().join("out").join("mesh.ply");
    let mut config = base_config();
    config.server.mesh_filename = mesh_path.display().to_string();
    let (server, _) = server_with(config);
    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));

    assert!(server.generate_mesh());
    let content = std::fs::read_to_string(&mesh_path).unwrap();
    assert!(content.starts_with("ply"));
    assert!(server.timings().stats("mesh/generate").is_some());
    assert!(server.timings().stats("mesh/publish").is_some());
}

#[test]
fn transform_failure_consumes_admission_slot() {
    let mut config = base_config();
    config.server.min_time_between_msgs_sec = 0.1;
    let buffer = Arc::new(TransformBuffer::new(WORLD_FRAME));
    let server = TsdfServer::builder(config)
        .frame_resolver(buffer.clone())
        .build();

    assert_eq!(
        server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 6)),
        IngestOutcome::NoTransform
    );
    assert_eq!(server.last_accepted(Stream::Pointcloud), Some(1.0));
    assert_eq!(server.num_allocated_blocks(), 0);

    buffer.insert("sensor", 1.05, Transformation::identity());
    buffer.insert("sensor", 1.2, Transformation::identity());
    assert_eq!(
        server.insert_pointcloud(&planar_scan("sensor", 1.05, 1.5, 6)),
        IngestOutcome::Throttled
    );
    assert!(server.insert_pointcloud(&planar_scan("sensor", 1.2, 1.5, 6)).is_integrated());
}

#[test]
fn non_finite_stamp_is_throttled() {
    let buffer = Arc::new(TransformBuffer::new(WORLD_FRAME));
    buffer.insert("sensor", 1.0, Transformation::identity());
    buffer.insert("sensor", 2.0, Transformation::identity());
    let server = TsdfServer::builder(base_config())
        .frame_resolver(buffer.clone())
        .build();

    assert_eq!(
        server.insert_pointcloud(&planar_scan("sensor", f64::NAN, 1.5, 6)),
        IngestOutcome::Throttled
    );
    assert_eq!(server.last_accepted(Stream::Pointcloud), None);
    assert_eq!(server.num_allocated_blocks(), 0);
    assert!(server.insert_pointcloud(&planar_scan("sensor", 1.5, 1.5, 6)).is_integrated());
}

#[test]
fn pose_hook_fires_once_per_integrated_batch() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let sensor_pose = Transformation::from_translation(Vec3::new(0.5, 0.0, 0.0));

    let mut config = base_config();
    config.server.min_time_between_msgs_sec = 0.5;
    let server = TsdfServer::builder(config)
        .frame_resolver(rustvox::test_utils::fixed_pose_resolver("sensor", sensor_pose))
        .pose_callback(move |pose| {
            assert_eq!(pose.translation(), Vec3::new(0.5, 0.0, 0.0));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 6));
    server.insert_pointcloud(&planar_scan("sensor", 1.1, 1.5, 6)); // throttled
    server.insert_pointcloud(&planar_scan("lidar", 2.0, 1.5, 6)); // no transform
    server.insert_freespace_pointcloud(&planar_scan("sensor", 3.0, 1.5, 6)); // disabled
    server.insert_pointcloud(&planar_scan("sensor", 3.0, 1.5, 6));

    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn mesh_timer_respects_interval() {
    let (server, _) = server_with(base_config());
    let server = Arc::new(server);
    assert!(!server.start_mesh_timer());
    assert!(!server.mesh_timer_running());

    let mut config = base_config();
    config.server.update_mesh_every_n_sec = 0.02;
    let publisher = Arc::new(RecordingPublisher::new());
    let server = TsdfServer::builder(config)
        .frame_resolver(identity_resolver("sensor"))
        .publisher(publisher.clone())
        .build_shared();
    assert!(server.mesh_timer_running());
    assert!(!server.start_mesh_timer());

    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.with_mesh_layer(|mesh| mesh.num_triangles()) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(server.with_mesh_layer(|mesh| mesh.num_triangles()) > 0);
    assert!(publisher.counts().mesh >= 1);

    server.stop_mesh_timer();
    assert!(!server.mesh_timer_running());
    let published = publisher.counts().mesh;
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(publisher.counts().mesh, published);
}

#[test]
fn tsdf_info_published_only_for_surface_stream() {
    let mut config = base_config();
    config.server.publish_tsdf_info = true;
    config.server.publish_slices = true;
    config.server.slice_level = 0.05;
    config.server.use_freespace_pointcloud = true;
    let (server, publisher) = server_with(config);

    server.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 12));
    let counts = publisher.counts();
    assert_eq!(counts.distance_pointcloud, 1);
    assert_eq!(counts.surface_pointcloud, 1);
    assert_eq!(counts.occupancy_markers, 1);
    assert_eq!(counts.slice, 1);
    assert_eq!(counts.mesh, 0);

    let distances = publisher.last_distance_pointcloud().unwrap();
    assert_eq!(distances.header.frame_id, WORLD_FRAME);
    assert!(!distances.points.is_empty());
    assert!(!publisher.last_surface_pointcloud().unwrap().points.is_empty());

    server.insert_freespace_pointcloud(&planar_scan("sensor", 2.0, 3.0, 12));
    assert_eq!(publisher.counts(), counts);
}

/// Clears the server from inside every publication.
#[derive(Default)]
struct ClearingPublisher {
    server: OnceLock<Weak<TsdfServer>>,
    calls: AtomicUsize,
}

impl ClearingPublisher {
    fn clear(&self) {
        if let Some(server) = self.server.get().and_then(Weak::upgrade) {
            server.clear();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl MapPublisher for ClearingPublisher {
    fn publish_mesh(&self, _mesh: &MeshMsg) {
        self.clear();
    }
    fn publish_distance_pointcloud(&self, _cloud: &PointCloudXYZI) {
        self.clear();
    }
    fn publish_surface_pointcloud(&self, _cloud: &PointCloudXYZRGB) {
        self.clear();
    }
    fn publish_occupancy_markers(&self, _markers: &MarkerArray) {
        self.clear();
    }
    fn publish_slice(&self, _cloud: &PointCloudXYZI) {
        self.clear();
    }
}

#[test]
fn publishers_may_write_the_map() {
    let mut config = base_config();
    config.server.publish_tsdf_info = true;
    config.server.publish_slices = true;
    let publisher = Arc::new(ClearingPublisher::default());
    let server = Arc::new(
        TsdfServer::builder(config)
            .frame_resolver(identity_resolver("sensor"))
            .publisher(publisher.clone())
            .build(),
    );
    publisher.server.set(Arc::downgrade(&server)).ok();

    let (done_tx, done_rx) = mpsc::channel();
    let worker = Arc::clone(&server);
    std::thread::spawn(move || {
        worker.insert_pointcloud(&planar_scan("sensor", 1.0, 1.5, 8));
        worker.insert_pointcloud(&planar_scan("sensor", 2.0, 1.5, 8));
        worker.update_mesh();
        worker.generate_mesh();
        done_tx.send(()).ok();
    });

    assert!(
        done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
        "publication blocked on a held map lock"
    );
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 10);
    assert_eq!(server.num_allocated_blocks(), 0);
}

#[test]
fn clear_keeps_admission_clocks() {
    let mut config = base_config();
    config.server.min_time_between_msgs_sec = 1.0;
    let (server, _) = server_with(config);
    server.insert_pointcloud(&planar_scan("sensor", 5.0, 1.5, 8));
    server.generate_mesh();

    server.clear();
    assert_eq!(server.num_allocated_blocks(), 0);
    assert_eq!(server.last_accepted(Stream::Pointcloud), Some(5.0));
    assert_eq!(
        server.insert_pointcloud(&planar_scan("sensor", 5.5, 1.5, 8)),
        IngestOutcome::Throttled
    );
}

#[test]
fn concurrent_ingestion_and_meshing() {
    let mut config = base_config();
    config.server.use_freespace_pointcloud = true;
    let (server, publisher) = server_with(config);
    let server = Arc::new(server);

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let server = Arc::clone(&server);
            std::thread::spawn(move || {
                for i in 0..5 {
                    let stamp = (i * 3 + worker) as f64;
                    match worker {
                        0 => {
                            server.insert_pointcloud(&planar_scan("sensor", stamp, 1.5, 8));
                        }
                        1 => {
                            server.insert_freespace_pointcloud(&planar_scan("sensor", stamp, 3.0, 8));
                        }
                        _ => {
                            server.update_mesh();
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(publisher.counts().mesh, 5);
    assert!(server.num_allocated_blocks() > 0);
}
