//! End-to-end integration tests for the vicon-inertial simulator
//!
//! These tests exercise the full pipeline (waypoint loading, B-spline fitting,
//! stream scheduling, measurement synthesis) the way a filter test harness
//! would consume it, not just the API level. The expected sample counts are
//! exact: a trajectory spanning 10 seconds pulled at 100 Hz must yield
//! exactly 1000 IMU samples and then fail deterministically, regardless of
//! floating-point accumulation in the due-time cursors.

use assert_approx_eq::assert_approx_eq;
use nalgebra::Vector3;
use viconsim::sim::{SimulationConfig, Simulator};
use viconsim::spline::BsplineTrajectory;
use viconsim::trajectory::{ContinuousTrajectory, WaypointStore};

/// A gently curving trajectory spanning [0, 10] seconds, sampled every half
/// second: constant forward motion with a slow yaw and a lateral weave.
fn wiggly_lines() -> String {
    let mut text = String::new();
    let mut t = 0.0;
    while t <= 10.0 + 1e-9 {
        let yaw: f64 = 0.05 * t;
        let (qz, qw) = ((yaw / 2.0).sin(), (yaw / 2.0).cos());
        text.push_str(&format!(
            "{} 0 0 {} {} {} {} 0\n",
            t,
            qz,
            qw,
            0.8 * t,
            (0.3 * t).sin()
        ));
        t += 0.5;
    }
    text
}

fn wiggly_simulator(config: SimulationConfig) -> Simulator {
    let store = WaypointStore::from_lines(&wiggly_lines()).expect("valid trajectory");
    Simulator::with_trajectory(config, BsplineTrajectory::fit(&store)).expect("valid config")
}

fn standard_config() -> SimulationConfig {
    SimulationConfig {
        imu_rate: 100.0,
        cam_rate: 10.0,
        vicon_rate: 50.0,
        ..Default::default()
    }
}

#[test]
fn test_exact_sample_counts_over_full_span() {
    let mut sim = wiggly_simulator(standard_config().noiseless());

    let mut imu_count = 0usize;
    let mut last_imu_time = 0.0;
    while let Some(m) = sim.get_next_imu() {
        imu_count += 1;
        last_imu_time = m.time;
    }
    assert_eq!(imu_count, 1000);
    assert_approx_eq!(last_imu_time, 10.0, 1e-9);
    assert!(!sim.ok());
    // Failure is sticky and deterministic.
    assert!(sim.get_next_imu().is_none());

    let mut cam_count = 0usize;
    while sim.get_next_cam().is_some() {
        cam_count += 1;
    }
    assert_eq!(cam_count, 100);

    let mut vicon_count = 0usize;
    while sim.get_next_vicon().is_some() {
        vicon_count += 1;
    }
    assert_eq!(vicon_count, 500);
}

#[test]
fn test_identical_seeds_reproduce_bit_for_bit() {
    let mut a = wiggly_simulator(standard_config());
    let mut b = wiggly_simulator(standard_config());
    loop {
        let (ma, mb) = (a.get_next_imu(), b.get_next_imu());
        match (ma, mb) {
            (Some(ma), Some(mb)) => {
                assert_eq!(ma.time, mb.time);
                assert_eq!(ma.gyro, mb.gyro);
                assert_eq!(ma.accel, mb.accel);
            }
            (None, None) => break,
            _ => panic!("streams exhausted at different points"),
        }
        let (va, vb) = (a.get_next_vicon(), b.get_next_vicon());
        if let (Some(va), Some(vb)) = (va, vb) {
            assert_eq!(va.position, vb.position);
            assert_eq!(
                va.orientation.coords.as_slice(),
                vb.orientation.coords.as_slice()
            );
        }
    }
}

#[test]
fn test_noise_streams_do_not_couple() {
    // Changing only the vicon seed must leave the IMU sequence untouched,
    // even when the vicon stream is pulled at a different cadence.
    let mut a = wiggly_simulator(SimulationConfig {
        seed_vicon: 1000,
        ..standard_config()
    });
    let mut b = wiggly_simulator(SimulationConfig {
        seed_vicon: 2000,
        ..standard_config()
    });
    for k in 0..200 {
        let ma = a.get_next_imu().expect("in range");
        let mb = b.get_next_imu().expect("in range");
        assert_eq!(ma.gyro, mb.gyro);
        assert_eq!(ma.accel, mb.accel);
        if k % 2 == 0 {
            let _ = a.get_next_vicon();
        }
        if k % 5 == 0 {
            let _ = b.get_next_vicon();
        }
    }
}

#[test]
fn test_stream_timestamps_form_arithmetic_sequences() {
    let mut sim = wiggly_simulator(standard_config().noiseless());
    for k in 1..=50 {
        let m = sim.get_next_imu().expect("in range");
        assert_approx_eq!(m.time, k as f64 * 0.01, 1e-9);
    }
    for k in 1..=5 {
        let t = sim.get_next_cam().expect("in range");
        assert_approx_eq!(t, k as f64 * 0.1, 1e-9);
    }
    for k in 1..=25 {
        let v = sim.get_next_vicon().expect("in range");
        assert_approx_eq!(v.time, k as f64 * 0.02, 1e-9);
    }
    // The shared clock sits at the most recent pull overall.
    assert_approx_eq!(sim.current_time(), 0.5, 1e-9);
}

#[test]
fn test_noiseless_vicon_matches_ground_truth() {
    let mut sim = wiggly_simulator(standard_config().noiseless());
    for _ in 0..100 {
        let v = sim.get_next_vicon().expect("in range");
        let state = sim.get_state(v.time).expect("in range");
        assert!((v.position - state.position).norm() < 1e-9);
        assert!(v.orientation.angle_to(&state.orientation) < 1e-9);
    }
}

#[test]
fn test_noiseless_imu_integrates_back_to_truth() {
    // Euler-integrate the noiseless specific force and angular rate and check
    // the result stays close to the ground-truth velocity. First-order
    // integration at 100 Hz over 5 seconds accumulates a small but nonzero
    // truncation error, hence the loose bound.
    let mut sim = wiggly_simulator(standard_config().noiseless());
    let gravity = Vector3::new(0.0, 0.0, 9.81);
    let start = sim.get_state(0.0).expect("in range");
    let mut velocity = start.velocity;
    let dt = 0.01;
    let mut last = None;
    for _ in 0..500 {
        let m = sim.get_next_imu().expect("in range");
        let state = sim.get_state(m.time).expect("in range");
        let accel_world = state.orientation * m.accel - gravity;
        velocity += accel_world * dt;
        last = Some((m.time, state.velocity));
    }
    let (t, truth) = last.expect("pulled samples");
    assert_approx_eq!(t, 5.0, 1e-9);
    assert!(
        (velocity - truth).norm() < 0.05,
        "integrated velocity drifted {} m/s from truth",
        (velocity - truth).norm()
    );
}

#[test]
fn test_bias_walk_appears_in_both_measurement_and_state() {
    // Large walk, zero white noise: the measured gyro minus the true body
    // rate must equal the recorded bias exactly.
    let config = SimulationConfig {
        sigma_gyro_walk: 0.1,
        sigma_accel_walk: 0.1,
        ..standard_config().noiseless()
    };
    let mut sim = wiggly_simulator(config);
    for _ in 0..100 {
        let m = sim.get_next_imu().expect("in range");
        let state = sim.get_state(m.time).expect("in range");
        let world_to_body = state.orientation.inverse();
        let point = sim
            .trajectory()
            .evaluate(m.time)
            .expect("in range");
        let true_gyro = world_to_body * point.angular_velocity;
        let residual = m.gyro - true_gyro;
        assert!((residual - state.gyro_bias).norm() < 1e-12);
        assert!(state.gyro_bias.norm() > 0.0);
    }
}

#[test]
fn test_from_config_with_files_on_disk() {
    let dir = std::env::temp_dir().join("viconsim_it");
    std::fs::create_dir_all(&dir).expect("temp dir");
    let trajectory_path = dir.join("trajectory.txt");
    std::fs::write(&trajectory_path, wiggly_lines()).expect("write trajectory");

    let config = SimulationConfig {
        trajectory_path: trajectory_path.to_string_lossy().into_owned(),
        imu_rate: 200.0,
        ..Default::default()
    };
    let config_path = dir.join("config.toml");
    config.to_file(&config_path).expect("write config");

    let loaded = SimulationConfig::from_file(&config_path).expect("read config");
    let mut sim = Simulator::from_config(loaded).expect("build simulator");
    let (start, end) = sim.trajectory_span();
    assert_approx_eq!(start, 0.0, 1e-12);
    assert_approx_eq!(end, 10.0, 1e-12);

    let mut count = 0usize;
    while sim.get_next_imu().is_some() {
        count += 1;
    }
    assert_eq!(count, 2000);

    let _ = std::fs::remove_file(&trajectory_path);
    let _ = std::fs::remove_file(&config_path);
    let _ = std::fs::remove_dir(&dir);
}

#[test]
fn test_malformed_trajectory_fails_construction() {
    let dir = std::env::temp_dir();
    let path = dir.join("viconsim_bad_trajectory.txt");
    std::fs::write(&path, "0.0 0 0 0 1 0 0\n").expect("write file");
    let config = SimulationConfig {
        trajectory_path: path.to_string_lossy().into_owned(),
        ..Default::default()
    };
    assert!(Simulator::from_config(config).is_err());
    let _ = std::fs::remove_file(&path);
}
