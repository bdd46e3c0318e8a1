//! Cumulative B-spline trajectory evaluator.
//!
//! Fits a uniform cubic B-spline through the loaded waypoints and evaluates
//! pose, linear velocity, linear acceleration, and angular velocity at
//! arbitrary times inside the fitted span. Position uses a plain R^3 B-spline
//! with analytic first and second derivatives; orientation uses the cumulative
//! formulation on SO(3),
//!
//! $$
//! R(u) = R_j \, \mathrm{Exp}(\tilde B_1(u)\,\omega_1)
//!             \, \mathrm{Exp}(\tilde B_2(u)\,\omega_2)
//!             \, \mathrm{Exp}(\tilde B_3(u)\,\omega_3)
//! $$
//!
//! with $\omega_k = \mathrm{Log}(R_{j+k-1}^{-1} R_{j+k})$ and the cumulative
//! basis $\tilde B_k$ of the uniform cubic B-spline. Differentiating each
//! exponential factor (the axis is fixed within a segment, so the derivative
//! commutes with the exponential) gives the body-frame angular velocity
//!
//! $$
//! \omega_b = (A_2 A_3)^\top \tilde B_1' \omega_1
//!           + A_3^\top \tilde B_2' \omega_2 + \tilde B_3' \omega_3
//! $$
//!
//! Control poses are resampled from the waypoints onto a uniform time grid
//! (linear interpolation for position, slerp for orientation) and the first
//! and last control are replicated so the fitted span covers the full
//! `[t_first, t_last]` range of the input. The spline approximates rather than
//! interpolates the waypoints, which is what makes it differentiable to the
//! orders the measurement synthesis requires. The whole structure is an
//! immutable value after construction.

use nalgebra::{UnitQuaternion, Vector3};

use crate::SimError;
use crate::trajectory::{ContinuousTrajectory, TrajectoryPoint, Waypoint, WaypointStore};

/// Uniform cubic B-spline over SO(3) x R^3, the concrete
/// [`ContinuousTrajectory`] used by the simulator.
#[derive(Clone, Debug)]
pub struct BsplineTrajectory {
    /// Control orientations, end controls replicated.
    control_orientations: Vec<UnitQuaternion<f64>>,
    /// Control positions, end controls replicated.
    control_positions: Vec<Vector3<f64>>,
    /// Span start, seconds.
    start: f64,
    /// Span end, seconds.
    end: f64,
    /// Uniform control spacing, seconds.
    dt: f64,
    /// Number of spline segments.
    segments: usize,
}

/// Cumulative basis of the uniform cubic B-spline.
fn cumulative_basis(u: f64) -> (f64, f64, f64) {
    let u2 = u * u;
    let u3 = u2 * u;
    (
        (u3 - 3.0 * u2 + 3.0 * u + 5.0) / 6.0,
        (-2.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0,
        u3 / 6.0,
    )
}

/// First derivative of the cumulative basis with respect to `u`.
fn cumulative_basis_d1(u: f64) -> (f64, f64, f64) {
    let u2 = u * u;
    (
        (3.0 * u2 - 6.0 * u + 3.0) / 6.0,
        (-6.0 * u2 + 6.0 * u + 3.0) / 6.0,
        u2 / 2.0,
    )
}

/// Second derivative of the cumulative basis with respect to `u`.
fn cumulative_basis_d2(u: f64) -> (f64, f64, f64) {
    (u - 1.0, 1.0 - 2.0 * u, u)
}

/// Linearly interpolate the waypoint list at time `t` (slerp for orientation).
fn interpolate_waypoints(waypoints: &[Waypoint], t: f64) -> (UnitQuaternion<f64>, Vector3<f64>) {
    let first = &waypoints[0];
    let last = &waypoints[waypoints.len() - 1];
    if t <= first.time {
        return (first.orientation, first.position);
    }
    if t >= last.time {
        return (last.orientation, last.position);
    }
    let idx = waypoints.partition_point(|w| w.time <= t) - 1;
    let a = &waypoints[idx];
    let b = &waypoints[idx + 1];
    let alpha = (t - a.time) / (b.time - a.time);
    let position = a.position + alpha * (b.position - a.position);
    let orientation = a
        .orientation
        .try_slerp(&b.orientation, alpha, 1e-9)
        .unwrap_or(a.orientation);
    (orientation, position)
}

impl BsplineTrajectory {
    /// Fit a spline to the loaded waypoints.
    ///
    /// The control grid spacing is the average waypoint spacing, so a uniformly
    /// sampled input keeps one control per sample. Requires at least 2
    /// waypoints, which [`WaypointStore`] already guarantees.
    pub fn fit(store: &WaypointStore) -> Self {
        let waypoints = store.waypoints();
        let start = store.first_time();
        let end = store.last_time();
        let span = end - start;
        let segments = (waypoints.len() - 1).max(3);
        let dt = span / segments as f64;

        // Uniform grid poses, then replicate the end controls so every
        // segment in [start, end] has a full support of four controls.
        let mut control_orientations = Vec::with_capacity(segments + 3);
        let mut control_positions = Vec::with_capacity(segments + 3);
        for i in -1i64..=(segments as i64 + 1) {
            let g = start + (i.clamp(0, segments as i64) as f64) * dt;
            let (q, p) = interpolate_waypoints(waypoints, g);
            control_orientations.push(q);
            control_positions.push(p);
        }

        Self {
            control_orientations,
            control_positions,
            start,
            end,
            dt,
            segments,
        }
    }

    /// Locate the spline segment for time `t` and the normalized offset within it.
    fn segment(&self, t: f64) -> (usize, f64) {
        let t = t.clamp(self.start, self.end);
        let s = (t - self.start) / self.dt;
        let j = (s.floor() as usize).min(self.segments - 1);
        (j, s - j as f64)
    }
}

impl ContinuousTrajectory for BsplineTrajectory {
    fn start_time(&self) -> f64 {
        self.start
    }

    fn end_time(&self) -> f64 {
        self.end
    }

    fn evaluate(&self, t: f64) -> Result<TrajectoryPoint, SimError> {
        if !self.feasible(t) {
            return Err(SimError::OutOfRange {
                time: t,
                start: self.start,
                end: self.end,
            });
        }
        let (j, u) = self.segment(t);
        let (b1, b2, b3) = cumulative_basis(u);
        let (b1d, b2d, b3d) = cumulative_basis_d1(u);
        let (b1dd, b2dd, b3dd) = cumulative_basis_d2(u);

        // Position spline and its derivatives.
        let p = &self.control_positions[j..j + 4];
        let d1 = p[1] - p[0];
        let d2 = p[2] - p[1];
        let d3 = p[3] - p[2];
        let position = p[0] + b1 * d1 + b2 * d2 + b3 * d3;
        let linear_velocity = (b1d * d1 + b2d * d2 + b3d * d3) / self.dt;
        let linear_acceleration = (b1dd * d1 + b2dd * d2 + b3dd * d3) / (self.dt * self.dt);

        // Orientation spline.
        let q = &self.control_orientations[j..j + 4];
        let w1 = (q[0].inverse() * q[1]).scaled_axis();
        let w2 = (q[1].inverse() * q[2]).scaled_axis();
        let w3 = (q[2].inverse() * q[3]).scaled_axis();
        let a1 = UnitQuaternion::from_scaled_axis(b1 * w1);
        let a2 = UnitQuaternion::from_scaled_axis(b2 * w2);
        let a3 = UnitQuaternion::from_scaled_axis(b3 * w3);
        let orientation = q[0] * a1 * a2 * a3;

        let omega_body = (a3.inverse_transform_vector(
            &(a2.inverse_transform_vector(&(b1d * w1)) + b2d * w2),
        ) + b3d * w3)
            / self.dt;
        let angular_velocity = orientation * omega_body;

        Ok(TrajectoryPoint {
            orientation,
            position,
            linear_velocity,
            linear_acceleration,
            angular_velocity,
        })
    }
}
