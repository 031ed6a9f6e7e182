//! Rigid body transforms between sensor and world frames.

use glam::{Mat4, Quat, Vec3};

/// Rigid transform `T_A_B` mapping points expressed in frame B into frame A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    rotation: Quat,
    translation: Vec3,
}

impl Transformation {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }

    /// Create from a rotation and a translation. The rotation is normalized.
    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(Quat::IDENTITY, translation)
    }

    /// Create from `[x, y, z, w]` quaternion and `[x, y, z]` translation arrays.
    pub fn from_arrays(quaternion: [f32; 4], translation: [f32; 3]) -> Self {
        Self::new(Quat::from_array(quaternion), Vec3::from_array(translation))
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// Rotate a direction vector (no translation).
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        Self {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    /// Composition `self * other`.
    pub fn compose(&self, other: &Transformation) -> Self {
        Self {
            rotation: (self.rotation * other.rotation).normalize(),
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Interpolate between two transforms, `t` in `[0, 1]`.
    pub fn interpolate(&self, other: &Transformation, t: f32) -> Self {
        Self {
            rotation: self.rotation.slerp(other.rotation, t).normalize(),
            translation: self.translation.lerp(other.translation, t),
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}

impl Default for Transformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transformation {
    type Output = Transformation;

    fn mul(self, rhs: Transformation) -> Self::Output {
        self.compose(&rhs)
    }
}
