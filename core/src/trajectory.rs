//! Waypoint loading and the continuous-trajectory contract.
//!
//! This module provides:
//! - A struct (`Waypoint`) for a single timestamped pose sample
//! - `WaypointStore` for reading and validating a plain-text trajectory file
//! - The `ContinuousTrajectory` trait that the measurement synthesizer is
//!   written against, so alternative curve representations can be plugged in
//!   (the crate ships a B-spline implementation in [`crate::spline`])
//!
//! The trajectory file format is one waypoint per line with fields
//! `time qx qy qz qw px py pz`, separated by whitespace and/or commas. Blank
//! lines and lines starting with `#` are skipped.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use std::fs;
use std::path::Path;

use crate::SimError;

/// Tolerance applied when validating the time ordering of input waypoints.
/// Two samples closer than this are treated as duplicates and the later one
/// is dropped; a sample earlier than its predecessor by more than this is a
/// hard ordering error.
pub const TIME_ORDER_TOLERANCE: f64 = 1e-6;

/// Slack applied to span checks so that periodically accumulated timestamps
/// (`t0 + n * period`) landing a few ulps past the end of the span still
/// evaluate.
pub const SPAN_TOLERANCE: f64 = 1e-9;

/// A single raw trajectory sample: a timestamped pose.
///
/// Waypoints are immutable once loaded. The orientation rotates body-frame
/// vectors into the world frame; the position locates the body in the world
/// frame.
#[derive(Clone, Copy, Debug)]
pub struct Waypoint {
    /// Sample time in seconds.
    pub time: f64,
    /// Body orientation, normalized on load.
    pub orientation: UnitQuaternion<f64>,
    /// Body position in meters.
    pub position: Vector3<f64>,
}

/// Ordered, deduplicated list of raw trajectory samples.
///
/// Built once at startup from the input file; immutable thereafter.
#[derive(Clone, Debug)]
pub struct WaypointStore {
    waypoints: Vec<Waypoint>,
}

impl WaypointStore {
    /// Load a trajectory file from disk.
    ///
    /// # Arguments
    /// * `path` - Path to the plain-text trajectory file.
    ///
    /// # Errors
    /// * `SimError::Io` if the file cannot be read.
    /// * `SimError::MalformedInput` for wrong field counts or non-finite values.
    /// * `SimError::UnsortedInput` if timestamps go backwards.
    /// * `SimError::InsufficientData` if fewer than 2 usable waypoints remain.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let contents = fs::read_to_string(path)?;
        Self::from_lines(&contents)
    }

    /// Parse trajectory records from an in-memory string.
    ///
    /// Same validation rules as [`WaypointStore::from_file`]; useful for tests.
    pub fn from_lines(contents: &str) -> Result<Self, SimError> {
        let mut waypoints: Vec<Waypoint> = Vec::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<f64> = trimmed
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<f64>().map_err(|_| SimError::MalformedInput {
                        line,
                        reason: format!("field '{}' is not a number", s),
                    })
                })
                .collect::<Result<_, _>>()?;
            if fields.len() != 8 {
                return Err(SimError::MalformedInput {
                    line,
                    reason: format!("expected 8 fields (time qx qy qz qw px py pz), found {}", fields.len()),
                });
            }
            if fields.iter().any(|v| !v.is_finite()) {
                return Err(SimError::MalformedInput {
                    line,
                    reason: "non-finite value".to_string(),
                });
            }
            let time = fields[0];
            let quat = Quaternion::new(fields[4], fields[1], fields[2], fields[3]);
            if quat.norm() < 1e-9 {
                return Err(SimError::MalformedInput {
                    line,
                    reason: "orientation quaternion has near-zero norm".to_string(),
                });
            }
            let orientation = UnitQuaternion::from_quaternion(quat);
            let position = Vector3::new(fields[5], fields[6], fields[7]);

            if let Some(prev) = waypoints.last() {
                if time < prev.time - TIME_ORDER_TOLERANCE {
                    return Err(SimError::UnsortedInput {
                        line,
                        time,
                        previous: prev.time,
                    });
                }
                // Duplicate timestamp: keep the first occurrence.
                if (time - prev.time).abs() <= TIME_ORDER_TOLERANCE {
                    continue;
                }
            }
            waypoints.push(Waypoint {
                time,
                orientation,
                position,
            });
        }
        if waypoints.len() < 2 {
            return Err(SimError::InsufficientData {
                count: waypoints.len(),
            });
        }
        Ok(Self { waypoints })
    }

    /// Number of loaded waypoints.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Time of the first waypoint in seconds.
    pub fn first_time(&self) -> f64 {
        self.waypoints[0].time
    }

    /// Time of the last waypoint in seconds.
    pub fn last_time(&self) -> f64 {
        self.waypoints[self.waypoints.len() - 1].time
    }

    /// All waypoints in time order.
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}

/// Full kinematic evaluation of a trajectory at one instant.
///
/// Rates are expressed in the world frame; the measurement synthesizer rotates
/// them into the body frame using `orientation`.
#[derive(Clone, Copy, Debug)]
pub struct TrajectoryPoint {
    /// Body orientation.
    pub orientation: UnitQuaternion<f64>,
    /// Body position in the world frame, meters.
    pub position: Vector3<f64>,
    /// Linear velocity in the world frame, m/s.
    pub linear_velocity: Vector3<f64>,
    /// Linear acceleration in the world frame, m/s^2.
    pub linear_acceleration: Vector3<f64>,
    /// Angular velocity in the world frame, rad/s.
    pub angular_velocity: Vector3<f64>,
}

/// Contract for a continuous-time trajectory evaluator.
///
/// Implementations must be differentiable to second order in position and
/// first order in orientation over `[start_time(), end_time()]`, and must
/// reject queries outside that span rather than extrapolate. Evaluation is a
/// pure function of immutable state; implementations take `&self` and hold no
/// interior mutability.
pub trait ContinuousTrajectory {
    /// Lower bound of the fitted span, seconds.
    fn start_time(&self) -> f64;

    /// Upper bound of the fitted span, seconds.
    fn end_time(&self) -> f64;

    /// Whether `t` lies within the fitted span (with [`SPAN_TOLERANCE`] slack).
    fn feasible(&self, t: f64) -> bool {
        t >= self.start_time() - SPAN_TOLERANCE && t <= self.end_time() + SPAN_TOLERANCE
    }

    /// Evaluate pose and derivatives at time `t`.
    ///
    /// # Errors
    /// * `SimError::OutOfRange` if `t` is not feasible.
    fn evaluate(&self, t: f64) -> Result<TrajectoryPoint, SimError>;
}
