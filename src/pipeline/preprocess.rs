//! Conversion of raw point batches into integrator input.

use glam::Vec3;

use crate::core::{Colors, PointCloudMsg, Pointcloud};

/// Split a raw batch into positions and parallel colors, dropping any point with a
/// NaN or infinite coordinate. Order is preserved.
pub fn preprocess(msg: &PointCloudMsg) -> (Pointcloud, Colors) {
    let mut points = Vec::with_capacity(msg.points.len());
    let mut colors = Vec::with_capacity(msg.points.len());
    for point in msg.points.iter().filter(|p| p.is_finite()) {
        points.push(Vec3::new(point.x, point.y, point.z));
        colors.push(point.color());
    }
    (points, colors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Color, Header, PointXYZRGB};

    #[test]
    fn test_drops_non_finite_points_with_their_colors() {
        let msg = PointCloudMsg::new(
            Header::new("sensor", 1.0),
            vec![
                PointXYZRGB::new(1.0, 2.0, 3.0, Color::rgb(1, 0, 0)),
                PointXYZRGB::new(f32::NAN, 0.0, 0.0, Color::rgb(2, 0, 0)),
                PointXYZRGB::new(0.0, f32::INFINITY, 0.0, Color::rgb(3, 0, 0)),
                PointXYZRGB::new(4.0, 5.0, 6.0, Color::rgb(4, 0, 0)),
                PointXYZRGB::new(0.0, 0.0, f32::NEG_INFINITY, Color::rgb(5, 0, 0)),
            ],
        );

        let (points, colors) = preprocess(&msg);
        assert_eq!(points, vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
        assert_eq!(colors, vec![Color::rgb(1, 0, 0), Color::rgb(4, 0, 0)]);
    }

    #[test]
    fn test_empty_batch() {
        let (points, colors) = preprocess(&PointCloudMsg::default());
        assert!(points.is_empty());
        assert!(colors.is_empty());
    }
}
