//! Publication fan-out.

use parking_lot::Mutex;

use super::layer_msgs::{MarkerArray, PointCloudXYZI, PointCloudXYZRGB};
use super::mesh_msg::MeshMsg;

/// Sink for everything the server publishes.
///
/// The server builds each payload under the map lock and releases it before
/// publishing, so implementations may block without stalling integration.
pub trait MapPublisher: Send + Sync {
    fn publish_mesh(&self, mesh: &MeshMsg);
    fn publish_distance_pointcloud(&self, cloud: &PointCloudXYZI);
    fn publish_surface_pointcloud(&self, cloud: &PointCloudXYZRGB);
    fn publish_occupancy_markers(&self, markers: &MarkerArray);
    fn publish_slice(&self, cloud: &PointCloudXYZI);
}

/// Drops every publication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl MapPublisher for NullPublisher {
    fn publish_mesh(&self, _mesh: &MeshMsg) {}
    fn publish_distance_pointcloud(&self, _cloud: &PointCloudXYZI) {}
    fn publish_surface_pointcloud(&self, _cloud: &PointCloudXYZRGB) {}
    fn publish_occupancy_markers(&self, _markers: &MarkerArray) {}
    fn publish_slice(&self, _cloud: &PointCloudXYZI) {}
}

/// Number of publications per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicationCounts {
    pub mesh: usize,
    pub distance_pointcloud: usize,
    pub surface_pointcloud: usize,
    pub occupancy_markers: usize,
    pub slice: usize,
}

#[derive(Debug, Default)]
struct Recorded {
    counts: PublicationCounts,
    mesh: Option<MeshMsg>,
    distance_pointcloud: Option<PointCloudXYZI>,
    surface_pointcloud: Option<PointCloudXYZRGB>,
    occupancy_markers: Option<MarkerArray>,
    slice: Option<PointCloudXYZI>,
}

/// Keeps the latest payload of each channel and counts publications.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    recorded: Mutex<Recorded>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> PublicationCounts {
        self.recorded.lock().counts
    }

    pub fn last_mesh(&self) -> Option<MeshMsg> {
        self.recorded.lock().mesh.clone()
    }

    pub fn last_distance_pointcloud(&self) -> Option<PointCloudXYZI> {
        self.recorded.lock().distance_pointcloud.clone()
    }

    pub fn last_surface_pointcloud(&self) -> Option<PointCloudXYZRGB> {
        self.recorded.lock().surface_pointcloud.clone()
    }

    pub fn last_occupancy_markers(&self) -> Option<MarkerArray> {
        self.recorded.lock().occupancy_markers.clone()
    }

    pub fn last_slice(&self) -> Option<PointCloudXYZI> {
        self.recorded.lock().slice.clone()
    }
}

impl MapPublisher for RecordingPublisher {
    fn publish_mesh(&self, mesh: &MeshMsg) {
        let mut recorded = self.recorded.lock();
        recorded.counts.mesh += 1;
        recorded.mesh = Some(mesh.clone());
    }

    fn publish_distance_pointcloud(&self, cloud: &PointCloudXYZI) {
        let mut recorded = self.recorded.lock();
        recorded.counts.distance_pointcloud += 1;
        recorded.distance_pointcloud = Some(cloud.clone());
    }

    fn publish_surface_pointcloud(&self, cloud: &PointCloudXYZRGB) {
        let mut recorded = self.recorded.lock();
        recorded.counts.surface_pointcloud += 1;
        recorded.surface_pointcloud = Some(cloud.clone());
    }

    fn publish_occupancy_markers(&self, markers: &MarkerArray) {
        let mut recorded = self.recorded.lock();
        recorded.counts.occupancy_markers += 1;
        recorded.occupancy_markers = Some(markers.clone());
    }

    fn publish_slice(&self, cloud: &PointCloudXYZI) {
        let mut recorded = self.recorded.lock();
        recorded.counts.slice += 1;
        recorded.slice = Some(cloud.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Header;

    #[test]
    fn test_recording_publisher_counts_and_keeps_last() {
        let publisher = RecordingPublisher::new();
        publisher.publish_mesh(&MeshMsg::default());
        publisher.publish_mesh(&MeshMsg {
            header: Header::new("world", 3.0),
            ..Default::default()
        });
        publisher.publish_slice(&PointCloudXYZI::default());

        let counts = publisher.counts();
        assert_eq!(counts.mesh, 2);
        assert_eq!(counts.slice, 1);
        assert_eq!(counts.occupancy_markers, 0);
        assert_eq!(publisher.last_mesh().unwrap().header.stamp, 3.0);
        assert!(publisher.last_surface_pointcloud().is_none());
    }
}
