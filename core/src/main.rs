//! VICONSIM: generate reproducible vicon-inertial sensor data from a waypoint trajectory.
//!
//! The program fits a continuous trajectory to a timestamped pose file, then
//! drains the three simulated sensor streams (IMU, camera triggers, vicon
//! poses) to CSV files together with the ground-truth state sampled at the
//! IMU timestamps.
//!
//! Two subcommands:
//!   - `run`: run a simulation from a configuration file (TOML/JSON)
//!   - `config`: write a template configuration file to fill in

use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use viconsim::sim::{SimulationConfig, Simulator};

const LONG_ABOUT: &str = "VICONSIM: a deterministic vicon-inertial measurement simulator.

Given a plain-text trajectory file (one 'time qx qy qz qw px py pz' record per
line), the simulator fits a smooth B-spline through the poses and synthesizes
three time-synchronized sensor streams from it:

- IMU: angular velocity and specific force in the body frame, with seeded white
  noise and slowly drifting random-walk biases
- Camera: trigger timestamps only (no image content is modeled)
- Vicon: marker pose observations with an optional body-to-marker extrinsic and
  independent pose noise

With fixed seeds the output is bit-for-bit repeatable, which makes the streams
suitable as regression inputs for state estimation filters.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A deterministic vicon-inertial measurement simulator.", long_about = LONG_ABOUT)]
struct Cli {
    /// Command to execute
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run a simulation from a configuration file",
        long_about = "Load a TOML or JSON configuration, fit the trajectory named in it, drain all three sensor streams to the end of the trajectory span, and write imu.csv, cam.csv, vicon.csv, and state.csv to the output directory."
    )]
    Run(RunArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Arguments for the `run` subcommand
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file path (.toml or .json)
    #[arg(short, long, value_parser)]
    config: PathBuf,

    /// Output directory for the generated CSV files
    #[arg(short, long, value_parser, default_value = "output")]
    output: PathBuf,
}

/// Arguments for the `config` subcommand
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Where to write the template (.toml or .json)
    #[arg(short, long, value_parser, default_value = "viconsim.toml")]
    output: PathBuf,
}

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// One row of the IMU output file.
#[derive(Serialize)]
struct ImuRecord {
    time: f64,
    gyro_x: f64,
    gyro_y: f64,
    gyro_z: f64,
    accel_x: f64,
    accel_y: f64,
    accel_z: f64,
}

/// One row of the camera trigger output file.
#[derive(Serialize)]
struct CamRecord {
    time: f64,
}

/// One row of the vicon pose output file.
#[derive(Serialize)]
struct ViconRecord {
    time: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
    px: f64,
    py: f64,
    pz: f64,
}

/// One row of the ground-truth state output file.
#[derive(Serialize)]
struct StateRecord {
    time: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
    px: f64,
    py: f64,
    pz: f64,
    vx: f64,
    vy: f64,
    vz: f64,
    bias_gyro_x: f64,
    bias_gyro_y: f64,
    bias_gyro_z: f64,
    bias_accel_x: f64,
    bias_accel_y: f64,
    bias_accel_z: f64,
}

fn run_simulation(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = SimulationConfig::from_file(&args.config)?;
    let mut sim = Simulator::from_config(config)?;
    let (start, end) = sim.trajectory_span();
    info!("fitted trajectory span [{:.3}, {:.3}] s", start, end);

    std::fs::create_dir_all(&args.output)?;

    // Drain the IMU first so the bias history is complete before the
    // ground-truth states are sampled at the IMU timestamps.
    let mut imu = Vec::new();
    while let Some(m) = sim.get_next_imu() {
        imu.push(m);
    }
    let mut cam = Vec::new();
    while let Some(t) = sim.get_next_cam() {
        cam.push(t);
    }
    let mut vicon = Vec::new();
    while let Some(v) = sim.get_next_vicon() {
        vicon.push(v);
    }
    info!(
        "generated {} imu, {} cam, {} vicon measurements",
        imu.len(),
        cam.len(),
        vicon.len()
    );

    let mut writer = csv::Writer::from_path(args.output.join("imu.csv"))?;
    for m in &imu {
        writer.serialize(ImuRecord {
            time: m.time,
            gyro_x: m.gyro[0],
            gyro_y: m.gyro[1],
            gyro_z: m.gyro[2],
            accel_x: m.accel[0],
            accel_y: m.accel[1],
            accel_z: m.accel[2],
        })?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(args.output.join("cam.csv"))?;
    for &t in &cam {
        writer.serialize(CamRecord { time: t })?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(args.output.join("vicon.csv"))?;
    for v in &vicon {
        let q = v.orientation.coords;
        writer.serialize(ViconRecord {
            time: v.time,
            qx: q[0],
            qy: q[1],
            qz: q[2],
            qw: q[3],
            px: v.position[0],
            py: v.position[1],
            pz: v.position[2],
        })?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_path(args.output.join("state.csv"))?;
    let mut states = 0usize;
    for m in &imu {
        if let Some(state) = sim.get_state(m.time) {
            let q = state.orientation.coords;
            writer.serialize(StateRecord {
                time: state.time,
                qx: q[0],
                qy: q[1],
                qz: q[2],
                qw: q[3],
                px: state.position[0],
                py: state.position[1],
                pz: state.position[2],
                vx: state.velocity[0],
                vy: state.velocity[1],
                vz: state.velocity[2],
                bias_gyro_x: state.gyro_bias[0],
                bias_gyro_y: state.gyro_bias[1],
                bias_gyro_z: state.gyro_bias[2],
                bias_accel_x: state.accel_bias[0],
                bias_accel_y: state.accel_bias[1],
                bias_accel_z: state.accel_bias[2],
            })?;
            states += 1;
        }
    }
    writer.flush()?;

    info!(
        "wrote {} ground-truth states to {}",
        states,
        args.output.display()
    );
    Ok(())
}

fn create_config(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    let template = SimulationConfig {
        trajectory_path: "trajectory.txt".to_string(),
        ..Default::default()
    };
    template.to_file(&args.output)?;
    info!("wrote template configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;
    match &cli.command {
        Command::Run(args) => run_simulation(args),
        Command::CreateConfig(args) => create_config(args),
    }
}
