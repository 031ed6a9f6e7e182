//! Frame resolution: looking up the sensor-to-world transform for a timestamp.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::pose::Transformation;

/// Source of rigid transforms between named frames.
///
/// Returns `None` when no transform is available for the requested time; callers
/// treat that as a normal, transient condition.
pub trait FrameResolver: Send + Sync {
    fn lookup(&self, source_frame: &str, target_frame: &str, timestamp: f64) -> Option<Transformation>;
}

/// Fixed transforms from named frames into a single world frame.
#[derive(Debug, Clone)]
pub struct StaticFrameResolver {
    world_frame: String,
    transforms: HashMap<String, Transformation>,
}

impl StaticFrameResolver {
    pub fn new(world_frame: impl Into<String>) -> Self {
        Self {
            world_frame: world_frame.into(),
            transforms: HashMap::new(),
        }
    }

    /// Register `T_world_frame`.
    pub fn with_transform(mut self, frame: impl Into<String>, transform: Transformation) -> Self {
        self.transforms.insert(frame.into(), transform);
        self
    }

    pub fn set_transform(&mut self, frame: impl Into<String>, transform: Transformation) {
        self.transforms.insert(frame.into(), transform);
    }
}

impl FrameResolver for StaticFrameResolver {
    fn lookup(&self, source_frame: &str, target_frame: &str, _timestamp: f64) -> Option<Transformation> {
        if source_frame == target_frame {
            return Some(Transformation::identity());
        }
        if target_frame != self.world_frame {
            return None;
        }
        self.transforms.get(source_frame).copied()
    }
}

/// Transform buffer configuration.
#[derive(Debug, Clone)]
pub struct TransformBufferConfig {
    /// Samples further than this from the query time are not used when the
    /// query falls outside the buffered interval (seconds).
    pub timestamp_tolerance: f64,
    /// Maximum number of samples kept per frame.
    pub max_history: usize,
}

impl Default for TransformBufferConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: 0.01,
            max_history: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StampedTransform {
    stamp: f64,
    transform: Transformation,
}

/// Time-indexed transforms from sensor frames into the world frame.
///
/// Queries inside the buffered interval are interpolated between the two bracketing
/// samples; queries outside it are answered by the nearest sample only when it lies
/// within the tolerance.
#[derive(Debug)]
pub struct TransformBuffer {
    world_frame: String,
    config: TransformBufferConfig,
    frames: RwLock<HashMap<String, VecDeque<StampedTransform>>>,
}

impl TransformBuffer {
    pub fn new(world_frame: impl Into<String>) -> Self {
        Self::with_config(world_frame, TransformBufferConfig::default())
    }

    pub fn with_config(world_frame: impl Into<String>, config: TransformBufferConfig) -> Self {
        Self {
            world_frame: world_frame.into(),
            config,
            frames: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `T_world_frame` at `stamp`. Samples may arrive out of order.
    pub fn insert(&self, frame: &str, stamp: f64, transform: Transformation) {
        if !stamp.is_finite() {
            log::warn!("Ignoring transform for '{}' with non-finite stamp", frame);
            return;
        }
        let mut frames = self.frames.write();
        let samples = frames.entry(frame.to_string()).or_default();
        let pos = samples.partition_point(|s| s.stamp < stamp);
        if samples.get(pos).map(|s| s.stamp == stamp).unwrap_or(false) {
            samples[pos].transform = transform;
        } else {
            samples.insert(pos, StampedTransform { stamp, transform });
        }
        while samples.len() > self.config.max_history.max(1) {
            samples.pop_front();
        }
    }

    pub fn num_samples(&self, frame: &str) -> usize {
        self.frames.read().get(frame).map(|s| s.len()).unwrap_or(0)
    }

    fn lookup_world(&self, frame: &str, timestamp: f64) -> Option<Transformation> {
        if !timestamp.is_finite() {
            return None;
        }
        let frames = self.frames.read();
        let samples = frames.get(frame)?;
        let first = samples.front()?;
        let last = samples.back()?;

        if timestamp <= first.stamp {
            return (first.stamp - timestamp <= self.config.timestamp_tolerance).then_some(first.transform);
        }
        if timestamp >= last.stamp {
            return (timestamp - last.stamp <= self.config.timestamp_tolerance).then_some(last.transform);
        }

        let upper = samples.partition_point(|s| s.stamp < timestamp);
        let after = samples[upper];
        if after.stamp == timestamp {
            return Some(after.transform);
        }
        let before = samples[upper - 1];
        let span = after.stamp - before.stamp;
        let t = if span > 0.0 { ((timestamp - before.stamp) / span) as f32 } else { 0.0 };
        Some(before.transform.interpolate(&after.transform, t))
    }
}

impl FrameResolver for TransformBuffer {
    fn lookup(&self, source_frame: &str, target_frame: &str, timestamp: f64) -> Option<Transformation> {
        if source_frame == target_frame {
            return Some(Transformation::identity());
        }
        if target_frame == self.world_frame {
            return self.lookup_world(source_frame, timestamp);
        }
        if source_frame == self.world_frame {
            return self.lookup_world(target_frame, timestamp).map(|t| t.inverse());
        }
        let t_w_s = self.lookup_world(source_frame, timestamp)?;
        let t_w_t = self.lookup_world(target_frame, timestamp)?;
        Some(t_w_t.inverse() * t_w_s)
    }
}
