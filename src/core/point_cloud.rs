//! Point cloud containers exchanged between the sensor side and the mapper.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Points in a single frame.
pub type Pointcloud = Vec<Vec3>;
/// Colors parallel to a [`Pointcloud`].
pub type Colors = Vec<Color>;

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn gray() -> Self {
        Self::rgb(127, 127, 127)
    }

    /// Weighted blend of two colors, weights need not be normalized.
    pub fn blend(first: Color, first_weight: f32, second: Color, second_weight: f32) -> Color {
        let total = first_weight + second_weight;
        if total <= 0.0 {
            return first;
        }
        let w1 = first_weight / total;
        let w2 = second_weight / total;
        let mix = |a: u8, b: u8| -> u8 { (a as f32 * w1 + b as f32 * w2).round().clamp(0.0, 255.0) as u8 };
        Color {
            r: mix(first.r, second.r),
            g: mix(first.g, second.g),
            b: mix(first.b, second.b),
            a: mix(first.a, second.a),
        }
    }

    /// Rainbow color for a value in `[0, 1]`.
    pub fn from_rainbow(value: f32) -> Color {
        let h = value.clamp(0.0, 1.0) * 5.0 + 1.0;
        let i = h.floor() as i32;
        let mut f = h - i as f32;
        if i % 2 == 0 {
            f = 1.0 - f;
        }
        let n = ((1.0 - f) * 255.0).round() as u8;
        match i {
            1 => Color::rgb(n, 0, 255),
            2 => Color::rgb(0, n, 255),
            3 => Color::rgb(0, 255, n),
            4 => Color::rgb(n, 255, 0),
            _ => Color::rgb(255, n, 0),
        }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array(rgba: [u8; 4]) -> Self {
        Self::new(rgba[0], rgba[1], rgba[2], rgba[3])
    }
}

/// A colored point as delivered by the sensor driver. Coordinates may be non-finite.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointXYZRGB {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub r: u8,
    #[serde(default)]
    pub g: u8,
    #[serde(default)]
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    255
}

impl PointXYZRGB {
    pub fn new(x: f32, y: f32, z: f32, color: Color) -> Self {
        Self {
            x,
            y,
            z,
            r: color.r,
            g: color.g,
            b: color.b,
            a: color.a,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn color(&self) -> Color {
        Color::new(self.r, self.g, self.b, self.a)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Message header: source frame and acquisition time in seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub frame_id: String,
    pub stamp: f64,
}

impl Header {
    pub fn new(frame_id: impl Into<String>, stamp: f64) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
        }
    }
}

/// Raw point cloud batch in the sensor frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointCloudMsg {
    pub header: Header,
    pub points: Vec<PointXYZRGB>,
}

impl PointCloudMsg {
    pub fn new(header: Header, points: Vec<PointXYZRGB>) -> Self {
        Self { header, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
