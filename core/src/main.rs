use chrono::Duration;
use clap::{Parser, Subcommand};

use reconav::kalman::{ErrorStateEkf, FilterConfig};
use reconav::messages::{Event, SensorMailbox, build_event_stream};
use reconav::recovery::RecoverySystem;
use reconav::sim::{DescentScenario, FlightDataRecord, SolutionRecord, synthetic_descent};

/// Replay recorded or synthetic flight data through the navigation filter.
#[derive(Parser)]
#[command(name = "reconav", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a flight log CSV through the filter and recovery logic.
    Replay {
        /// Flight log CSV (one row per IMU sample, NaN for absent sensors).
        input: String,
        /// Filter configuration JSON; defaults apply when omitted.
        #[arg(short, long)]
        config: Option<String>,
        /// Navigation solution output CSV.
        #[arg(short, long, default_value = "solution.csv")]
        output: String,
    },
    /// Generate a synthetic steady-descent flight log.
    Simulate {
        /// Flight log output CSV.
        #[arg(short, long, default_value = "flight.csv")]
        output: String,
        /// Log length in seconds.
        #[arg(long, default_value_t = 60.0)]
        duration: f32,
        /// RNG seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            input,
            config,
            output,
        } => {
            let config = match config {
                Some(path) => FilterConfig::from_json(&path)?,
                None => FilterConfig::default(),
            };
            let records = FlightDataRecord::from_csv(&input)?;
            log::info!("replaying {} records from {input}", records.len());
            let solution = replay(&records, &config);
            SolutionRecord::to_csv(&solution, &output)?;
            log::info!("wrote {} solution rows to {output}", solution.len());
        }
        Command::Simulate {
            output,
            duration,
            seed,
        } => {
            let scenario = DescentScenario {
                duration_s: duration,
                ..DescentScenario::default()
            };
            let records = synthetic_descent(&scenario, chrono::Utc::now(), seed);
            FlightDataRecord::to_csv(&records, &output)?;
            log::info!("wrote {} records to {output}", records.len());
        }
    }
    Ok(())
}

/// Push a flight log through the filter one navigation cycle per IMU event.
///
/// Aiding events land in the mailbox as they occur; each IMU event drains one
/// snapshot, runs the filter cycle, and checks the recovery triggers, exactly
/// as the flight loop does.
fn replay(records: &[FlightDataRecord], config: &FilterConfig) -> Vec<SolutionRecord> {
    let stream = build_event_stream(records);
    let mailbox = SensorMailbox::new();
    let mut ekf = ErrorStateEkf::new(config);
    let mut recovery = RecoverySystem::new();

    let mut solution = Vec::new();
    for event in &stream.events {
        match *event {
            Event::Gps { position, .. } => mailbox.post_gps(position),
            Event::Mag { field, .. } => mailbox.post_mag(field),
            Event::Baro { pressure, .. } => mailbox.post_baro(pressure),
            Event::Imu {
                dt_s,
                imu,
                elapsed_s,
            } => {
                mailbox.post_imu(imu);
                let snapshot = mailbox.take_snapshot();
                ekf.process(&snapshot, dt_s);

                let state = ekf.state();
                let command = recovery.check((elapsed_s * 1000.0) as u64, state);
                if command.fire_drogue {
                    log::info!("drogue fired at t={elapsed_s:.2} s");
                }
                if command.fire_main {
                    log::info!("main fired at t={elapsed_s:.2} s");
                }

                solution.push(SolutionRecord {
                    time: stream.start_time
                        + Duration::milliseconds((elapsed_s * 1000.0) as i64),
                    latitude: state.latitude(),
                    longitude: state.longitude(),
                    altitude: state.altitude(),
                    vel_n: state.velocity[0],
                    vel_e: state.velocity[1],
                    vel_d: state.velocity[2],
                    drogue_deployed: recovery.drogue_deployed(),
                    main_deployed: recovery.main_deployed(),
                });
            }
        }
    }
    solution
}
