//! TSDF server: the orchestration layer around integration and meshing
//!
//! The server accepts posed point cloud batches on two streams, integrates them
//! into the TSDF layer, keeps a block mesh up to date and answers persistence
//! commands. It is `Send + Sync` and can be driven from several threads at once:
//!
//! ```text
//! sensor thread ──> insert_pointcloud ──┐
//! timer thread  ──> update_mesh ────────┼──> stream lock ─> map lock ─> mesh lock
//! commands      ──> generate/save/load ─┘
//! ```
//!
//! Locks are always taken in that order (stream, map, mesh).

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::{ConfigCorrection, TsdfServerConfig};
use crate::core::{FrameResolver, Header, PointCloudMsg, StaticFrameResolver, Transformation};
use crate::fusion::{
    export_mesh_layer, load_blocks_from_file, save_layer, BlockMergingStrategy, MeshIntegrator, MeshLayer,
    MeshStats, TsdfIntegrator, TsdfMap,
};
use crate::pipeline::{preprocess, IngestOutcome, IngestionClock, MeshUpdateTimer, Stream};
use crate::timing::{now_seconds, Timings};
use crate::visualization::{
    create_distance_pointcloud, create_distance_slice, create_occupancy_markers, create_surface_pointcloud,
    generate_mesh_msg, ColorMode, MapPublisher, NullPublisher,
};

/// Hook invoked with the sensor pose of every integrated batch.
pub type PoseCallback = Box<dyn Fn(&Transformation) + Send + Sync>;

/// Surface points are voxels closer than this many voxel sizes to the surface.
const SURFACE_DISTANCE_VOXELS: f32 = 0.75;

/// The TSDF map together with the integrator that writes into it.
struct MapState {
    map: TsdfMap,
    integrator: TsdfIntegrator,
}

pub struct TsdfServer {
    config: TsdfServerConfig,
    corrections: Vec<ConfigCorrection>,
    color_mode: ColorMode,
    resolver: Arc<dyn FrameResolver>,
    publisher: Arc<dyn MapPublisher>,
    pose_callback: Option<PoseCallback>,
    pointcloud_clock: Mutex<IngestionClock>,
    freespace_clock: Mutex<IngestionClock>,
    state: RwLock<MapState>,
    mesh_layer: Mutex<MeshLayer>,
    mesh_integrator: MeshIntegrator,
    timings: Timings,
    mesh_timer: Mutex<Option<MeshUpdateTimer>>,
}

/// Builder for [`TsdfServer`]
pub struct TsdfServerBuilder {
    config: TsdfServerConfig,
    resolver: Option<Arc<dyn FrameResolver>>,
    publisher: Option<Arc<dyn MapPublisher>>,
    pose_callback: Option<PoseCallback>,
}

impl TsdfServerBuilder {
    pub fn new(config: TsdfServerConfig) -> Self {
        Self {
            config,
            resolver: None,
            publisher: None,
            pose_callback: None,
        }
    }

    /// Transform source; defaults to a resolver that only knows the world frame.
    pub fn frame_resolver(mut self, resolver: Arc<dyn FrameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Publication sink; defaults to [`NullPublisher`].
    pub fn publisher(mut self, publisher: Arc<dyn MapPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn pose_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Transformation) + Send + Sync + 'static,
    {
        self.pose_callback = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> TsdfServer {
        let mut config = self.config;
        let corrections = config.validate();

        let map = TsdfMap::new(config.map_config());
        let integrator = TsdfIntegrator::new(config.integrator_method(), config.integrator_config());
        let mesh_layer = MeshLayer::new(map.block_size());
        let min_spacing = config.server.min_time_between_msgs_sec;

        log::debug!(
            "TSDF server: voxel size {}, {} voxels per side, {} integrator",
            map.voxel_size(),
            map.config().tsdf_voxels_per_side,
            integrator.name()
        );

        TsdfServer {
            corrections,
            color_mode: config.color_mode(),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(StaticFrameResolver::new(config.server.world_frame.clone()))),
            publisher: self.publisher.unwrap_or_else(|| Arc::new(NullPublisher)),
            pose_callback: self.pose_callback,
            pointcloud_clock: Mutex::new(IngestionClock::new(min_spacing)),
            freespace_clock: Mutex::new(IngestionClock::new(min_spacing)),
            state: RwLock::new(MapState { map, integrator }),
            mesh_layer: Mutex::new(mesh_layer),
            mesh_integrator: MeshIntegrator::new(config.mesh_config()),
            timings: Timings::new(),
            mesh_timer: Mutex::new(None),
            config,
        }
    }

    /// Build behind an `Arc` and start the periodic mesh update if configured.
    pub fn build_shared(self) -> Arc<TsdfServer> {
        let server = Arc::new(self.build());
        server.start_mesh_timer();
        server
    }
}

impl TsdfServer {
    pub fn builder(config: TsdfServerConfig) -> TsdfServerBuilder {
        TsdfServerBuilder::new(config)
    }

    pub fn new(config: TsdfServerConfig) -> Self {
        TsdfServerBuilder::new(config).build()
    }

    /// Configuration after validation.
    pub fn config(&self) -> &TsdfServerConfig {
        &self.config
    }

    /// Values replaced during validation.
    pub fn config_corrections(&self) -> &[ConfigCorrection] {
        &self.corrections
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn integrator_name(&self) -> &'static str {
        self.state.read().integrator.name()
    }

    /// Whether the integrator discards grazing rays.
    pub fn anti_grazing_enabled(&self) -> bool {
        self.state.read().integrator.config().enable_anti_grazing
    }

    /// Read access to the map; holds the map lock while `f` runs.
    pub fn with_map<R>(&self, f: impl FnOnce(&TsdfMap) -> R) -> R {
        f(&self.state.read().map)
    }

    /// Read access to the mesh layer; holds the mesh lock while `f` runs.
    pub fn with_mesh_layer<R>(&self, f: impl FnOnce(&MeshLayer) -> R) -> R {
        f(&self.mesh_layer.lock())
    }

    pub fn num_allocated_blocks(&self) -> usize {
        self.state.read().map.layer().num_allocated_blocks()
    }

    /// Timestamp of the last admitted batch of a stream.
    pub fn last_accepted(&self, stream: Stream) -> Option<f64> {
        self.clock(stream).lock().last_accepted()
    }

    /// Integrate a batch of surface measurements.
    pub fn insert_pointcloud(&self, msg: &PointCloudMsg) -> IngestOutcome {
        let outcome = self.ingest(msg, Stream::Pointcloud);
        if !outcome.is_integrated() {
            return outcome;
        }

        if self.config.server.publish_tsdf_info {
            self.publish_all_updated_tsdf_voxels();
            self.publish_tsdf_surface_points();
            self.publish_tsdf_occupied_nodes();
        }
        if self.config.server.publish_slices {
            self.publish_slices();
        }
        if self.config.server.verbose {
            log::info!("Timings:\n{}", self.timings.summary());
            log::info!("Layer memory: {}", self.state.read().map.layer().memory_size());
        }
        outcome
    }

    /// Integrate a batch that only marks free space beyond the truncation band.
    pub fn insert_freespace_pointcloud(&self, msg: &PointCloudMsg) -> IngestOutcome {
        if !self.config.server.use_freespace_pointcloud {
            log::trace!("Freespace stream disabled, dropping batch at {}", msg.header.stamp);
            return IngestOutcome::Disabled;
        }
        self.ingest(msg, Stream::Freespace)
    }

    fn clock(&self, stream: Stream) -> &Mutex<IngestionClock> {
        match stream {
            Stream::Pointcloud => &self.pointcloud_clock,
            Stream::Freespace => &self.freespace_clock,
        }
    }

    fn ingest(&self, msg: &PointCloudMsg, stream: Stream) -> IngestOutcome {
        // Held until integration is done, so batches of one stream integrate in order.
        let mut clock = self.clock(stream).lock();
        let stamp = msg.header.stamp;
        if !clock.try_admit(stamp) {
            log::trace!("Throttling {} batch at {}", stream, stamp);
            return IngestOutcome::Throttled;
        }

        let Some(t_g_c) = self
            .resolver
            .lookup(&msg.header.frame_id, &self.config.server.world_frame, stamp)
        else {
            log::debug!(
                "No transform from '{}' to '{}' at {}, dropping {} batch",
                msg.header.frame_id,
                self.config.server.world_frame,
                stamp,
                stream
            );
            return IngestOutcome::NoTransform;
        };

        let (points, colors) = {
            let _timer = self.timings.start("ptcloud_preprocess");
            preprocess(msg)
        };
        if self.config.server.verbose {
            log::info!("Integrating a pointcloud with {} points.", points.len());
        }

        let started = Instant::now();
        let num_blocks = {
            let _timer = self.timings.start("integrate");
            let mut state = self.state.write();
            let MapState { map, integrator } = &mut *state;
            integrator.integrate_point_cloud(map.layer_mut(), &t_g_c, &points, &colors, stream.is_freespace());
            map.layer().num_allocated_blocks()
        };
        if self.config.server.verbose {
            log::info!(
                "Finished integrating in {:.6} seconds, have {} blocks.",
                started.elapsed().as_secs_f64(),
                num_blocks
            );
        }
        drop(clock);

        if let Some(callback) = &self.pose_callback {
            callback(&t_g_c);
        }
        IngestOutcome::Integrated
    }

    fn header(&self) -> Header {
        Header::new(self.config.server.world_frame.clone(), now_seconds())
    }

    /// Publish every observed voxel with its distance as intensity.
    pub fn publish_all_updated_tsdf_voxels(&self) {
        let cloud = create_distance_pointcloud(self.state.read().map.layer(), self.header());
        self.publisher.publish_distance_pointcloud(&cloud);
    }

    /// Publish colored voxels near the surface.
    pub fn publish_tsdf_surface_points(&self) {
        let cloud = {
            let state = self.state.read();
            let threshold = state.map.voxel_size() * SURFACE_DISTANCE_VOXELS;
            create_surface_pointcloud(state.map.layer(), threshold, self.header())
        };
        self.publisher.publish_surface_pointcloud(&cloud);
    }

    pub fn publish_tsdf_occupied_nodes(&self) {
        let markers = create_occupancy_markers(self.state.read().map.layer(), self.header());
        self.publisher.publish_occupancy_markers(&markers);
    }

    /// Publish the horizontal distance slice at the configured height.
    pub fn publish_slices(&self) {
        let cloud = create_distance_slice(
            self.state.read().map.layer(),
            self.config.server.slice_level,
            self.header(),
        );
        self.publisher.publish_slice(&cloud);
    }

    fn publish_mesh(&self) {
        let _timer = self.timings.start("mesh/publish");
        let msg = generate_mesh_msg(&mut self.mesh_layer.lock(), self.color_mode, self.header());
        self.publisher.publish_mesh(&msg);
    }

    /// Mesh the blocks changed since the last pass and publish the result.
    pub fn update_mesh(&self) -> MeshStats {
        if self.config.server.verbose {
            log::info!("Updating mesh.");
        }
        let stats = {
            let _timer = self.timings.start("mesh/update");
            let mut state = self.state.write();
            let mut mesh_layer = self.mesh_layer.lock();
            self.mesh_integrator
                .generate_mesh(state.map.layer_mut(), &mut mesh_layer, true, true)
        };
        self.publish_mesh();
        stats
    }

    /// Mesh every block, publish, and write the mesh file if one is configured.
    ///
    /// Always returns `true`; a failed export is only logged.
    pub fn generate_mesh(&self) -> bool {
        {
            let _timer = self.timings.start("mesh/generate");
            let mut state = self.state.write();
            let mut mesh_layer = self.mesh_layer.lock();
            self.mesh_integrator
                .generate_mesh(state.map.layer_mut(), &mut mesh_layer, false, true);
        }
        self.publish_mesh();

        let mesh_filename = &self.config.server.mesh_filename;
        if !mesh_filename.is_empty() {
            let result = {
                let _timer = self.timings.start("mesh/output");
                export_mesh_layer(Path::new(mesh_filename), &self.mesh_layer.lock())
            };
            match result {
                Ok(()) => log::info!("Output file as PLY: {}", mesh_filename),
                Err(err) => log::warn!("Failed to output mesh as PLY {}: {}", mesh_filename, err),
            }
        }

        log::info!("Mesh Timings:\n{}", self.timings.summary());
        true
    }

    /// Write the TSDF layer (not the mesh) to `path`.
    pub fn save_map(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let state = self.state.read();
        match save_layer(state.map.layer(), path) {
            Ok(()) => {
                if self.config.server.verbose {
                    log::info!(
                        "Saved {} blocks to {}",
                        state.map.layer().num_allocated_blocks(),
                        path.display()
                    );
                }
                true
            }
            Err(err) => {
                log::error!("Failed to save map: {}", err);
                false
            }
        }
    }

    /// Load TSDF blocks from `path`, replacing blocks at the same index.
    ///
    /// Does not mesh; the loaded blocks are meshed by the next update.
    pub fn load_map(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut state = self.state.write();
        match load_blocks_from_file(path, BlockMergingStrategy::Replace, state.map.layer_mut()) {
            Ok(count) => {
                if self.config.server.verbose {
                    log::info!("Loaded {} blocks from {}", count, path.display());
                }
                true
            }
            Err(err) => {
                log::error!("Failed to load map: {}", err);
                false
            }
        }
    }

    /// Remove all voxel and mesh blocks. Admission clocks and configuration stay.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.map.layer_mut().remove_all_blocks();
        self.mesh_layer.lock().clear();
        if self.config.server.verbose {
            log::info!("Cleared map and mesh.");
        }
    }

    /// Start the periodic incremental mesh update.
    ///
    /// Does nothing and returns `false` when `update_mesh_every_n_sec <= 0` or the
    /// timer already runs.
    pub fn start_mesh_timer(self: &Arc<Self>) -> bool {
        let mut slot = self.mesh_timer.lock();
        if slot.is_some() {
            return false;
        }
        let weak: Weak<TsdfServer> = Arc::downgrade(self);
        let timer = MeshUpdateTimer::start(self.config.server.update_mesh_every_n_sec, move || {
            if let Some(server) = weak.upgrade() {
                server.update_mesh();
            }
        });
        let started = timer.is_some();
        *slot = timer;
        started
    }

    pub fn stop_mesh_timer(&self) {
        let timer = self.mesh_timer.lock().take();
        if let Some(mut timer) = timer {
            timer.stop();
        }
    }

    pub fn mesh_timer_running(&self) -> bool {
        self.mesh_timer.lock().as_ref().map(|t| t.is_running()).unwrap_or(false)
    }
}
