//! Admission control for incoming point cloud batches.

use std::fmt;

/// The two logical input streams, each with its own admission clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Pointcloud,
    Freespace,
}

impl Stream {
    pub fn is_freespace(&self) -> bool {
        matches!(self, Stream::Freespace)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Pointcloud => write!(f, "pointcloud"),
            Stream::Freespace => write!(f, "freespace_pointcloud"),
        }
    }
}

/// What happened to a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Resolved, preprocessed and integrated
    Integrated,
    /// Arrived too soon after (or before) the last accepted batch
    Throttled,
    /// Accepted, but no transform to the world frame was available
    NoTransform,
    /// The stream is switched off in configuration
    Disabled,
}

impl IngestOutcome {
    pub fn is_integrated(&self) -> bool {
        matches!(self, IngestOutcome::Integrated)
    }
}

/// Timestamp of the last accepted batch of one stream.
///
/// A batch is admitted when no batch was accepted yet or when at least
/// `min_spacing` seconds passed since the last accepted one. Admission updates the
/// clock immediately, whatever happens to the batch afterwards.
#[derive(Debug, Clone)]
pub struct IngestionClock {
    min_spacing: f64,
    last_accepted: Option<f64>,
}

impl IngestionClock {
    pub fn new(min_spacing: f64) -> Self {
        Self {
            min_spacing,
            last_accepted: None,
        }
    }

    pub fn min_spacing(&self) -> f64 {
        self.min_spacing
    }

    pub fn last_accepted(&self) -> Option<f64> {
        self.last_accepted
    }

    /// Admit a batch stamped `timestamp`, advancing the clock on success.
    ///
    /// Non-finite stamps are never admitted.
    pub fn try_admit(&mut self, timestamp: f64) -> bool {
        if !timestamp.is_finite() {
            return false;
        }
        if let Some(last) = self.last_accepted {
            if timestamp - last < self.min_spacing {
                return false;
            }
        }
        self.last_accepted = Some(timestamp);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_batch_always_admitted() {
        let mut clock = IngestionClock::new(100.0);
        assert_eq!(clock.last_accepted(), None);
        assert!(clock.try_admit(-5.0));
        assert_eq!(clock.last_accepted(), Some(-5.0));
    }

    #[test]
    fn test_spacing_is_measured_from_last_accepted() {
        let mut clock = IngestionClock::new(1.0);
        assert!(clock.try_admit(10.0));
        assert!(!clock.try_admit(10.5));
        // Rejected batches do not move the clock.
        assert!(clock.try_admit(11.0));
        assert!(!clock.try_admit(11.9));
        assert_eq!(clock.last_accepted(), Some(11.0));
    }

    #[test]
    fn test_zero_spacing_rejects_older_batches() {
        let mut clock = IngestionClock::new(0.0);
        assert!(clock.try_admit(2.0));
        assert!(clock.try_admit(2.0));
        assert!(!clock.try_admit(1.5));
    }

    #[test]
    fn test_non_finite_stamps_rejected() {
        let mut clock = IngestionClock::new(0.0);
        assert!(!clock.try_admit(f64::NAN));
        assert!(!clock.try_admit(f64::INFINITY));
        assert_eq!(clock.last_accepted(), None);
        assert!(clock.try_admit(1.0));
        assert!(!clock.try_admit(f64::NAN));
        assert_eq!(clock.last_accepted(), Some(1.0));
    }

    #[test]
    fn test_outcome_flags() {
        assert!(IngestOutcome::Integrated.is_integrated());
        assert!(!IngestOutcome::NoTransform.is_integrated());
        assert!(Stream::Freespace.is_freespace());
        assert_eq!(Stream::Pointcloud.to_string(), "pointcloud");
    }
}
