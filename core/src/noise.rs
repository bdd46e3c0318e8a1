//! Seeded noise streams and the bias random-walk process.
//!
//! Three independently-seeded generators back the simulator: one for IMU
//! measurement noise, one for vicon measurement noise, and one for the state
//! perturbations that drive the bias random walk. Keeping the streams separate
//! means consuming draws on one stream never shifts another stream's sequence,
//! which is what makes the full measurement trio reproducible regardless of
//! the order in which the caller pulls the streams.

use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Draw a vector of three independent zero-mean Gaussian samples.
fn gaussian_vec3(rng: &mut StdRng, std: f64) -> Vector3<f64> {
    let normal = Normal::new(0.0, std.max(0.0)).unwrap();
    Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng))
}

/// The three pseudo-random streams used by the simulator.
///
/// Each stream is a [`StdRng`] seeded from configuration at construction.
/// There is no cross-stream coupling: re-seeding or consuming one stream must
/// not affect the others' subsequent draws.
#[derive(Clone, Debug)]
pub struct NoiseStreams {
    imu: StdRng,
    vicon: StdRng,
    perturb: StdRng,
}

impl NoiseStreams {
    /// Construct the three streams from their configured seeds.
    pub fn from_seeds(seed_imu: u64, seed_vicon: u64, seed_perturb: u64) -> Self {
        Self {
            imu: StdRng::seed_from_u64(seed_imu),
            vicon: StdRng::seed_from_u64(seed_vicon),
            perturb: StdRng::seed_from_u64(seed_perturb),
        }
    }

    /// Gaussian 3-vector from the IMU measurement stream.
    pub fn imu_gaussian_vec3(&mut self, std: f64) -> Vector3<f64> {
        gaussian_vec3(&mut self.imu, std)
    }

    /// Gaussian 3-vector from the vicon measurement stream.
    pub fn vicon_gaussian_vec3(&mut self, std: f64) -> Vector3<f64> {
        gaussian_vec3(&mut self.vicon, std)
    }

    /// Gaussian 3-vector from the state-perturbation stream. Consumed by
    /// [`BiasProcess::advance`].
    pub fn perturb_gaussian_vec3(&mut self, std: f64) -> Vector3<f64> {
        gaussian_vec3(&mut self.perturb, std)
    }
}

/// One recorded step of the bias random walk.
#[derive(Clone, Copy, Debug)]
pub struct BiasHistoryEntry {
    /// Time the step was taken, seconds.
    pub time: f64,
    /// Gyroscope bias after the step, rad/s.
    pub gyro_bias: Vector3<f64>,
    /// Accelerometer bias after the step, m/s^2.
    pub accel_bias: Vector3<f64>,
}

/// Random-walk bias process with a queryable history.
///
/// The current value always equals the last history entry (or the initial
/// value before any step). History is strictly time-ordered and append-only,
/// so ground-truth replay via [`BiasProcess::bias_at`] stays consistent with
/// the biases that were injected into measurements.
#[derive(Clone, Debug)]
pub struct BiasProcess {
    gyro_bias: Vector3<f64>,
    accel_bias: Vector3<f64>,
    initial_gyro: Vector3<f64>,
    initial_accel: Vector3<f64>,
    history: Vec<BiasHistoryEntry>,
}

impl BiasProcess {
    /// Start the walk from the configured initial biases.
    pub fn new(initial_gyro: Vector3<f64>, initial_accel: Vector3<f64>) -> Self {
        Self {
            gyro_bias: initial_gyro,
            accel_bias: initial_accel,
            initial_gyro,
            initial_accel,
            history: Vec::new(),
        }
    }

    /// Start the walk from zero bias.
    pub fn zeroed() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Current bias values `(gyro, accel)` without advancing the walk.
    pub fn current(&self) -> (Vector3<f64>, Vector3<f64>) {
        (self.gyro_bias, self.accel_bias)
    }

    /// Recorded history in time order.
    pub fn history(&self) -> &[BiasHistoryEntry] {
        &self.history
    }

    /// Step the random walk forward to `time` over an interval of `dt` seconds.
    ///
    /// Draws six independent Gaussian increments scaled by `sqrt(dt) * walk_std`
    /// from the perturbation stream, adds them to the current biases, and
    /// appends the result to history. `dt == 0` is an idempotent no-op: the
    /// current value is returned and neither the history nor the perturbation
    /// stream is touched. The walk must only ever move forward in time.
    ///
    /// # Returns
    /// * The new `(gyro, accel)` bias pair.
    pub fn advance(
        &mut self,
        time: f64,
        dt: f64,
        walk_std_gyro: f64,
        walk_std_accel: f64,
        streams: &mut NoiseStreams,
    ) -> (Vector3<f64>, Vector3<f64>) {
        debug_assert!(dt >= 0.0, "bias walk cannot move backwards");
        if dt <= 0.0 {
            return self.current();
        }
        let scale = dt.sqrt();
        self.gyro_bias += streams.perturb_gaussian_vec3(scale * walk_std_gyro);
        self.accel_bias += streams.perturb_gaussian_vec3(scale * walk_std_accel);
        self.history.push(BiasHistoryEntry {
            time,
            gyro_bias: self.gyro_bias,
            accel_bias: self.accel_bias,
        });
        self.current()
    }

    /// Bias values that were in effect at time `t`.
    ///
    /// Returns the most recent history entry with `time <= t` (the walk is a
    /// right-continuous step function), or the initial biases if `t` precedes
    /// all recorded steps. Never mutates the process.
    pub fn bias_at(&self, t: f64) -> (Vector3<f64>, Vector3<f64>) {
        let idx = self.history.partition_point(|e| e.time <= t);
        if idx == 0 {
            (self.initial_gyro, self.initial_accel)
        } else {
            let entry = &self.history[idx - 1];
            (entry.gyro_bias, entry.accel_bias)
        }
    }
}
