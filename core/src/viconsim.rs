//! Vicon-inertial measurement simulator for state estimation filters
//!
//! This crate synthesizes time-synchronized sensor streams from a single
//! continuous-time ground-truth trajectory. Given a discrete list of timestamped
//! poses, it fits a continuous curve over SE(3) and then, for each simulated
//! clock tick, derives physically consistent inertial measurements (angular
//! velocity and specific force) and an independently-noised external pose
//! observation from a motion-capture style tracker ("vicon"). Slowly drifting
//! sensor biases are injected as a random-walk process whose history is
//! recorded, so the true state of the platform (including the true bias values)
//! remains queryable at any time inside the trajectory span.
//!
//! The crate is not a state estimator and does not model camera optics: the
//! camera stream carries trigger timestamps only. It is intended as a
//! reproducible input generator for testing filters; with fixed seeds the full
//! trio of measurement sequences is bit-for-bit repeatable.
//!
//! Primarily built off of two crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra types
//!   (vectors, unit quaternions) used throughout.
//! - [`rand`](https://crates.io/crates/rand) / [`rand_distr`](https://crates.io/crates/rand_distr):
//!   Provide the seeded pseudo-random streams for measurement noise and bias walks.
//!
//! # Measurement model
//!
//! With $R$ the body orientation, $a$ the world-frame linear acceleration of the
//! body, $\omega$ the world-frame angular velocity, and $g$ the gravity vector,
//! the IMU measurements at time $t$ are
//!
//! $$
//! \omega_m = R^\top \omega + b_g + n_g, \qquad
//! a_m = R^\top (a + g) + b_a + n_a
//! $$
//!
//! where $b_g, b_a$ follow independent Gaussian random walks and $n_g, n_a$ are
//! white noise scaled for the sampling interval. The vicon measurement applies a
//! fixed body-to-marker extrinsic transform and perturbs the result with a
//! small-angle rotation and additive position noise drawn from a stream that is
//! fully independent of the IMU noise stream.
//!
//! # Modules
//!
//! - [`trajectory`]: waypoint file loading and the continuous-trajectory contract
//! - [`spline`]: cumulative B-spline trajectory evaluator with analytic derivatives
//! - [`noise`]: seeded noise streams and the bias random-walk process
//! - [`sim`]: configuration and the pull-based simulator facade

pub mod noise;
pub mod sim;
pub mod spline;
pub mod trajectory;

use nalgebra::{SVector, UnitQuaternion, Vector3};
use std::fmt::Display;
use thiserror::Error;

/// Errors produced while loading trajectory data or querying the simulator.
///
/// Load-time variants (`MalformedInput`, `UnsortedInput`, `InsufficientData`)
/// are fatal: construction fails and no partial simulator is usable.
/// `OutOfRange` is recoverable and surfaces as a `None` on the pull API.
#[derive(Debug, Error)]
pub enum SimError {
    /// A trajectory record had the wrong field count or a non-finite value.
    #[error("malformed trajectory record on line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },
    /// Waypoint timestamps went backwards by more than the allowed tolerance.
    #[error("trajectory times out of order on line {line}: {time} follows {previous}")]
    UnsortedInput {
        line: usize,
        time: f64,
        previous: f64,
    },
    /// Fewer than two usable waypoints were found.
    #[error("trajectory needs at least 2 waypoints, found {count}")]
    InsufficientData { count: usize },
    /// A query time fell outside the fitted trajectory span.
    #[error("query time {time:.6} outside fitted span [{start:.6}, {end:.6}]")]
    OutOfRange { time: f64, start: f64, end: f64 },
    /// A configuration value was out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single synthetic IMU reading.
///
/// Both vectors are expressed in the body frame. The gyroscope reports angular
/// rate in rad/s and the accelerometer reports specific force in m/s^2 (true
/// acceleration plus gravity, rotated into the body frame, plus bias and noise).
#[derive(Clone, Copy, Debug)]
pub struct ImuMeasurement {
    /// Timestamp of the reading in seconds.
    pub time: f64,
    /// Angular velocity measurement in rad/s, body frame x, y, z axis.
    pub gyro: Vector3<f64>,
    /// Specific force measurement in m/s^2, body frame x, y, z axis.
    pub accel: Vector3<f64>,
}

impl Display for ImuMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImuMeasurement {{ t: {:.4}, gyro: [{:.4}, {:.4}, {:.4}], accel: [{:.4}, {:.4}, {:.4}] }}",
            self.time,
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
            self.accel[0],
            self.accel[1],
            self.accel[2]
        )
    }
}

/// A single synthetic pose-tracker reading.
///
/// The orientation rotates marker-frame vectors into the world frame and the
/// position locates the marker body in the world frame, both already perturbed
/// by the configured measurement noise.
#[derive(Clone, Copy, Debug)]
pub struct ViconMeasurement {
    /// Timestamp of the reading in seconds.
    pub time: f64,
    /// Measured orientation of the marker body.
    pub orientation: UnitQuaternion<f64>,
    /// Measured position of the marker body in meters.
    pub position: Vector3<f64>,
}

/// Ground-truth platform state at a point in time.
///
/// Assembled on demand by [`sim::Simulator::get_state`]; never stored. The
/// bias fields come from the recorded random-walk history, so a state queried
/// after the simulation has advanced reflects the biases that were actually
/// injected into the measurements around that time.
#[derive(Clone, Copy, Debug)]
pub struct ImuState {
    /// Timestamp in seconds.
    pub time: f64,
    /// True orientation of the body.
    pub orientation: UnitQuaternion<f64>,
    /// True position in the world frame, meters.
    pub position: Vector3<f64>,
    /// True linear velocity in the world frame, m/s.
    pub velocity: Vector3<f64>,
    /// True gyroscope bias, rad/s.
    pub gyro_bias: Vector3<f64>,
    /// True accelerometer bias, m/s^2.
    pub accel_bias: Vector3<f64>,
}

impl ImuState {
    /// Convert the state to a one dimensional vector, nalgebra style.
    ///
    /// # Returns
    /// * `SVector<f64, 17>` in the order `[t, qx, qy, qz, qw, px, py, pz,
    ///   vx, vy, vz, bgx, bgy, bgz, bax, bay, baz]`
    pub fn to_vector(&self) -> SVector<f64, 17> {
        SVector::from_vec(self.to_vec())
    }

    /// Convert the state to a one dimensional vector, native `Vec<f64>` style.
    ///
    /// Ordering matches [`ImuState::to_vector`].
    pub fn to_vec(&self) -> Vec<f64> {
        let q = self.orientation.coords; // x, y, z, w
        vec![
            self.time,
            q[0],
            q[1],
            q[2],
            q[3],
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            self.gyro_bias[0],
            self.gyro_bias[1],
            self.gyro_bias[2],
            self.accel_bias[0],
            self.accel_bias[1],
            self.accel_bias[2],
        ]
    }
}
