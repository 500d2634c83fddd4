//! Flight-log CSV handling and synthetic flight generation.
//!
//! This module provides:
//! - A struct (`FlightDataRecord`) for reading and writing recorded flight data
//!   to/from CSV files
//! - A synthetic descent generator for exercising the filter and the recovery
//!   logic without recorded data
//! - `SolutionRecord` for exporting the filtered navigation solution
//!
//! A flight log is one row per IMU sample. The aiding sensors run slower than
//! the IMU, so rows where a sensor did not report carry `NaN` in that sensor's
//! columns; the playback layer skips them (see
//! [`build_event_stream`](crate::messages::build_event_stream)).

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::{atmosphere, earth};

/// Struct representing a single row of recorded flight data.
///
/// Fields correspond to columns in the CSV. Inertial rates are body-frame
/// (rad/s and m/s²), the magnetometer is a body-frame unit vector, GPS is
/// geodetic degrees and meters, and pressure is static pressure in Pa.
/// Columns for a sensor that did not report on this row hold `NaN`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct FlightDataRecord {
    /// UTC timestamp of the IMU sample.
    pub time: DateTime<Utc>,
    /// X-acceleration in m/s^2
    pub acc_x: f32,
    /// Y-acceleration in m/s^2
    pub acc_y: f32,
    /// Z-acceleration in m/s^2
    pub acc_z: f32,
    /// Rotation rate around the x-axis in radians/s
    pub gyro_x: f32,
    /// Rotation rate around the y-axis in radians/s
    pub gyro_y: f32,
    /// Rotation rate around the z-axis in radians/s
    pub gyro_z: f32,
    /// Magnetic field unit vector, x-component
    pub mag_x: f32,
    /// Magnetic field unit vector, y-component
    pub mag_y: f32,
    /// Magnetic field unit vector, z-component
    pub mag_z: f32,
    /// Latitude in degrees
    pub latitude: f32,
    /// Longitude in degrees
    pub longitude: f32,
    /// Altitude in meters
    pub altitude: f32,
    /// Static pressure in Pa
    pub pressure: f32,
}

impl FlightDataRecord {
    /// Reads a CSV file and returns a vector of `FlightDataRecord` structs.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Vec<FlightDataRecord>)` if successful.
    /// * `Err` if the file cannot be read or parsed.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes a vector of `FlightDataRecord` structs to a CSV file.
    ///
    /// # Arguments
    /// * `records` - Records to write
    /// * `path` - Path where the CSV file will be saved
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Parameters for the synthetic descent generator.
#[derive(Debug, Clone, Copy)]
pub struct DescentScenario {
    /// Fixed latitude of the descent, degrees.
    pub latitude: f32,
    /// Fixed longitude of the descent, degrees.
    pub longitude: f32,
    /// Altitude at the first record, meters.
    pub start_altitude: f32,
    /// Steady descent rate (positive down), m/s.
    pub descent_rate: f32,
    /// Length of the generated log, seconds.
    pub duration_s: f32,
    /// IMU cadence, Hz.
    pub imu_rate_hz: f32,
    /// Aiding sensors report every this many IMU rows.
    pub aiding_decimation: usize,
    /// 1-sigma accelerometer noise, m/s².
    pub accel_sigma: f32,
    /// 1-sigma gyroscope noise, rad/s.
    pub gyro_sigma: f32,
    /// 1-sigma GPS horizontal noise, degrees.
    pub gps_sigma_deg: f32,
    /// 1-sigma GPS altitude noise, meters.
    pub gps_sigma_alt: f32,
    /// 1-sigma barometer noise, Pa.
    pub baro_sigma: f32,
}

impl Default for DescentScenario {
    fn default() -> DescentScenario {
        DescentScenario {
            latitude: 30.9275,
            longitude: -81.514_72,
            start_altitude: 3000.0,
            descent_rate: 25.0,
            duration_s: 60.0,
            imu_rate_hz: 100.0,
            aiding_decimation: 10,
            accel_sigma: 0.05,
            gyro_sigma: 0.002,
            gps_sigma_deg: 1.0e-5,
            gps_sigma_alt: 2.0,
            baro_sigma: 5.0,
        }
    }
}

/// Generate a synthetic steady-descent flight log.
///
/// The vehicle hangs level under canopy at a fixed descent rate: the
/// accelerometer reads canopy drag (gravity support) plus noise, the
/// gyroscope reads noise only, and altitude decreases linearly. Aiding rows
/// carry GPS, magnetometer, and pressure readings; all other rows hold `NaN`
/// in those columns. Seeded, so a scenario reproduces exactly.
pub fn synthetic_descent(
    scenario: &DescentScenario,
    start_time: DateTime<Utc>,
    seed: u64,
) -> Vec<FlightDataRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let accel_noise = Normal::new(0.0, scenario.accel_sigma.max(0.0)).unwrap();
    let gyro_noise = Normal::new(0.0, scenario.gyro_sigma.max(0.0)).unwrap();
    let gps_noise = Normal::new(0.0, scenario.gps_sigma_deg.max(0.0)).unwrap();
    let alt_noise = Normal::new(0.0, scenario.gps_sigma_alt.max(0.0)).unwrap();
    let baro_noise = Normal::new(0.0, scenario.baro_sigma.max(0.0)).unwrap();

    let dt = 1.0 / scenario.imu_rate_hz;
    let count = (scenario.duration_s * scenario.imu_rate_hz) as usize;
    let gravity = earth::gravity_partials(scenario.latitude, scenario.start_altitude).g;
    // Level body frame, z down: drag supports the full weight.
    let steady_accel = [0.0, 0.0, -gravity];
    // A mid-latitude field vector, NED components, for the aiding rows.
    let mag_field = [0.497_f32, -0.052, 0.866];

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let elapsed = i as f32 * dt;
        let altitude = scenario.start_altitude - scenario.descent_rate * elapsed;
        let aiding = i % scenario.aiding_decimation.max(1) == 0;

        let (mag, gps, pressure) = if aiding {
            (
                mag_field,
                [
                    scenario.latitude + gps_noise.sample(&mut rng),
                    scenario.longitude + gps_noise.sample(&mut rng),
                    altitude + alt_noise.sample(&mut rng),
                ],
                atmosphere::pressure_from_altitude(altitude) + baro_noise.sample(&mut rng),
            )
        } else {
            ([f32::NAN; 3], [f32::NAN; 3], f32::NAN)
        };

        records.push(FlightDataRecord {
            time: start_time + Duration::milliseconds((elapsed * 1000.0) as i64),
            acc_x: steady_accel[0] + accel_noise.sample(&mut rng),
            acc_y: steady_accel[1] + accel_noise.sample(&mut rng),
            acc_z: steady_accel[2] + accel_noise.sample(&mut rng),
            gyro_x: gyro_noise.sample(&mut rng),
            gyro_y: gyro_noise.sample(&mut rng),
            gyro_z: gyro_noise.sample(&mut rng),
            mag_x: mag[0],
            mag_y: mag[1],
            mag_z: mag[2],
            latitude: gps[0],
            longitude: gps[1],
            altitude: gps[2],
            pressure,
        });
    }
    records
}

/// One row of the exported navigation solution.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct SolutionRecord {
    /// UTC timestamp of the cycle.
    pub time: DateTime<Utc>,
    /// Latitude in degrees
    pub latitude: f32,
    /// Longitude in degrees
    pub longitude: f32,
    /// Altitude in meters
    pub altitude: f32,
    /// North velocity in m/s
    pub vel_n: f32,
    /// East velocity in m/s
    pub vel_e: f32,
    /// Down velocity in m/s
    pub vel_d: f32,
    /// Whether the drogue charge has fired by this cycle.
    pub drogue_deployed: bool,
    /// Whether the main charge has fired by this cycle.
    pub main_deployed: bool,
}

impl SolutionRecord {
    /// Writes a navigation solution to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a navigation solution back from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_start() -> DateTime<Utc> {
        chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 4, 12, 14, 0, 0).unwrap()
    }

    #[test]
    fn synthetic_descent_row_count_and_cadence() {
        let scenario = DescentScenario {
            duration_s: 2.0,
            imu_rate_hz: 100.0,
            ..DescentScenario::default()
        };
        let records = synthetic_descent(&scenario, scenario_start(), 7);
        assert_eq!(records.len(), 200);

        let step = records[1].time - records[0].time;
        assert_eq!(step.num_milliseconds(), 10);
    }

    #[test]
    fn synthetic_descent_decimates_aiding_sensors() {
        let scenario = DescentScenario {
            duration_s: 1.0,
            aiding_decimation: 10,
            ..DescentScenario::default()
        };
        let records = synthetic_descent(&scenario, scenario_start(), 7);
        for (i, r) in records.iter().enumerate() {
            let aiding = i % 10 == 0;
            assert_eq!(!r.latitude.is_nan(), aiding, "row {i}");
            assert_eq!(!r.pressure.is_nan(), aiding, "row {i}");
            assert_eq!(!r.mag_x.is_nan(), aiding, "row {i}");
            // IMU columns are always present.
            assert!(!r.acc_z.is_nan());
            assert!(!r.gyro_x.is_nan());
        }
    }

    #[test]
    fn synthetic_descent_altitude_and_pressure_track() {
        let scenario = DescentScenario::default();
        let records = synthetic_descent(&scenario, scenario_start(), 42);
        // 10 s in: 250 m below the start.
        let row = &records[1000];
        assert!(!row.altitude.is_nan());
        assert!((row.altitude - 2750.0).abs() < 10.0, "altitude {}", row.altitude);
        // Pressure should be consistent with the altitude to within noise.
        let expected = atmosphere::pressure_from_altitude(2750.0);
        assert!((row.pressure - expected).abs() < 50.0);
    }

    #[test]
    fn synthetic_descent_is_reproducible() {
        let scenario = DescentScenario {
            duration_s: 0.5,
            ..DescentScenario::default()
        };
        let a = synthetic_descent(&scenario, scenario_start(), 99);
        let b = synthetic_descent(&scenario, scenario_start(), 99);
        for (ra, rb) in a.iter().zip(b.iter()) {
            assert_eq!(ra.acc_x, rb.acc_x);
            assert_eq!(ra.gyro_z, rb.gyro_z);
        }
    }

    #[test]
    fn flight_data_round_trips_through_csv() {
        let scenario = DescentScenario {
            duration_s: 0.3,
            ..DescentScenario::default()
        };
        let records = synthetic_descent(&scenario, scenario_start(), 5);

        let temp_file = std::env::temp_dir().join("flight_data_roundtrip.csv");
        FlightDataRecord::to_csv(&records, &temp_file).expect("Failed to write CSV");
        let read_back = FlightDataRecord::from_csv(&temp_file).expect("Failed to read CSV");
        let _ = std::fs::remove_file(&temp_file);

        assert_eq!(records.len(), read_back.len());
        for (w, r) in records.iter().zip(read_back.iter()) {
            assert_eq!(w.time, r.time);
            assert_eq!(w.acc_z, r.acc_z);
            // NaN columns must survive the round trip as NaN.
            assert_eq!(w.latitude.is_nan(), r.latitude.is_nan());
        }
    }

    #[test]
    fn from_csv_invalid_path_errors() {
        let result = FlightDataRecord::from_csv("nonexistent.csv");
        assert!(result.is_err(), "Should error on missing file");
    }

    #[test]
    fn solution_record_round_trips_through_csv() {
        let rows = vec![
            SolutionRecord {
                time: scenario_start(),
                latitude: 30.9275,
                longitude: -81.5147,
                altitude: 2999.5,
                vel_n: 0.1,
                vel_e: -0.2,
                vel_d: 24.8,
                drogue_deployed: true,
                main_deployed: false,
            };
            3
        ];

        let temp_file = std::env::temp_dir().join("solution_roundtrip.csv");
        SolutionRecord::to_csv(&rows, &temp_file).expect("Failed to write CSV");
        let read_back = SolutionRecord::from_csv(&temp_file).expect("Failed to read CSV");
        let _ = std::fs::remove_file(&temp_file);

        assert_eq!(read_back.len(), 3);
        assert!(read_back[0].drogue_deployed);
        assert!(!read_back[0].main_deployed);
        assert!((read_back[0].vel_d - 24.8).abs() < 1e-6);
    }
}
