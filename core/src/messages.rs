//! Sensor snapshot mailbox and flight-log event playback.
//!
//! Two paths feed the filter. In flight, sensor drivers post readings into a
//! [`SensorMailbox`] from their interrupt contexts and the navigation cycle
//! drains one [`SensorSnapshot`] per tick. In replay, a recorded flight log is
//! turned into a time-ordered [`EventStream`] and pushed through the same
//! mailbox, so the filter cannot tell the difference.
//!
//! The mailbox is a single slot per sensor with an atomic freshness counter:
//! posting overwrites the slot and increments the counter, and each snapshot
//! consumes at most one count per sensor. A sensor that has not posted since
//! the last snapshot contributes `None`, so a measurement is never fused
//! twice and a stale value never masquerades as a fresh one.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ImuSample;
use crate::sim::FlightDataRecord;

/// Everything the filter consumes in one cycle.
///
/// The IMU sample is always present (the propagation step needs it every
/// tick); the aiding sensors are `Some` only when a fresh reading arrived
/// since the previous snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensorSnapshot {
    /// Latest IMU sample.
    pub imu: ImuSample,
    /// Fresh GPS fix: latitude (deg), longitude (deg), altitude (m).
    pub gps: Option<Vector3<f32>>,
    /// Fresh magnetometer reading in the body frame.
    pub mag: Option<Vector3<f32>>,
    /// Fresh barometer static pressure.
    pub baro: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default)]
struct LatestReadings {
    imu: ImuSample,
    gps: Vector3<f32>,
    mag: Vector3<f32>,
    baro: f32,
}

/// Single-slot mailbox between sensor producers and the filter cycle.
///
/// Producers call the `post_*` methods from any thread; the filter calls
/// [`take_snapshot`](SensorMailbox::take_snapshot) once per cycle. Posting
/// twice between snapshots leaves the newest value in the slot with a
/// freshness count of two, so the value is consumed on two consecutive
/// snapshots; this matches treating a burst of fixes as repeated evidence
/// rather than dropping it.
#[derive(Debug, Default)]
pub struct SensorMailbox {
    latest: Mutex<LatestReadings>,
    gps_fresh: AtomicU32,
    mag_fresh: AtomicU32,
    baro_fresh: AtomicU32,
}

impl SensorMailbox {
    pub fn new() -> SensorMailbox {
        SensorMailbox::default()
    }

    fn latest(&self) -> std::sync::MutexGuard<'_, LatestReadings> {
        // A poisoned lock only means a producer panicked mid-store; the slot
        // still holds plain values, so recover it.
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store the latest IMU sample. IMU data carries no freshness counter:
    /// propagation runs every cycle on whatever is newest.
    pub fn post_imu(&self, sample: ImuSample) {
        self.latest().imu = sample;
    }

    /// Store a GPS fix and mark it fresh.
    pub fn post_gps(&self, position: Vector3<f32>) {
        self.latest().gps = position;
        self.gps_fresh.fetch_add(1, Ordering::AcqRel);
    }

    /// Store a magnetometer reading and mark it fresh.
    pub fn post_mag(&self, field: Vector3<f32>) {
        self.latest().mag = field;
        self.mag_fresh.fetch_add(1, Ordering::AcqRel);
    }

    /// Store a barometer pressure and mark it fresh.
    pub fn post_baro(&self, pressure: f32) {
        self.latest().baro = pressure;
        self.baro_fresh.fetch_add(1, Ordering::AcqRel);
    }

    /// Drain one snapshot: the latest IMU sample plus each aiding sensor
    /// whose freshness counter is nonzero, consuming one count per sensor.
    pub fn take_snapshot(&self) -> SensorSnapshot {
        let latest = *self.latest();
        SensorSnapshot {
            imu: latest.imu,
            gps: Self::consume(&self.gps_fresh).then_some(latest.gps),
            mag: Self::consume(&self.mag_fresh).then_some(latest.mag),
            baro: Self::consume(&self.baro_fresh).then_some(latest.baro),
        }
    }

    fn consume(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A playback event delivered to the filter in time order.
///
/// Events are built from recorded flight data and carry the elapsed time
/// since the start of the log, so a replay loop can reproduce the original
/// cycle cadence.
#[derive(Clone, Copy, Debug)]
pub enum Event {
    /// IMU step driving one propagation cycle.
    Imu {
        /// Time since the previous record, seconds.
        dt_s: f32,
        imu: ImuSample,
        elapsed_s: f32,
    },
    /// GPS fix: latitude (deg), longitude (deg), altitude (m).
    Gps {
        position: Vector3<f32>,
        elapsed_s: f32,
    },
    /// Magnetometer reading in the body frame.
    Mag {
        field: Vector3<f32>,
        elapsed_s: f32,
    },
    /// Barometer static pressure.
    Baro { pressure: f32, elapsed_s: f32 },
}

/// Time-ordered events reconstructed from a flight log.
pub struct EventStream {
    pub start_time: DateTime<Utc>,
    pub events: Vec<Event>,
}

/// Build a time-ordered event stream from recorded flight data.
///
/// Timestamps are normalized to elapsed seconds from the first record. Each
/// record after the first contributes an [`Event::Imu`] when its inertial
/// fields are present, plus one aiding event per sensor whose fields are
/// present; missing fields are recorded as NaN and skipped, which lets a log
/// mix a fast IMU column block with slower GPS and barometer columns.
pub fn build_event_stream(records: &[FlightDataRecord]) -> EventStream {
    let start_time = records.first().map(|r| r.time).unwrap_or_else(Utc::now);
    let with_elapsed: Vec<(f32, &FlightDataRecord)> = records
        .iter()
        .map(|r| {
            (
                (r.time - start_time).num_milliseconds() as f32 / 1000.0,
                r,
            )
        })
        .collect();

    let mut events = Vec::with_capacity(records.len().saturating_mul(2));
    for w in with_elapsed.windows(2) {
        let (t0, _) = (w[0].0, w[0].1);
        let (t1, r) = (w[1].0, w[1].1);
        let dt = t1 - t0;

        let imu_fields = [r.acc_x, r.acc_y, r.acc_z, r.gyro_x, r.gyro_y, r.gyro_z];
        if imu_fields.iter().all(|v| !v.is_nan()) {
            events.push(Event::Imu {
                dt_s: dt,
                imu: ImuSample::new(
                    Vector3::new(r.acc_x, r.acc_y, r.acc_z),
                    Vector3::new(r.gyro_x, r.gyro_y, r.gyro_z),
                ),
                elapsed_s: t1,
            });
        }

        let gps_fields = [r.latitude, r.longitude, r.altitude];
        if gps_fields.iter().all(|v| !v.is_nan()) {
            events.push(Event::Gps {
                position: Vector3::new(r.latitude, r.longitude, r.altitude),
                elapsed_s: t1,
            });
        }

        let mag_fields = [r.mag_x, r.mag_y, r.mag_z];
        if mag_fields.iter().all(|v| !v.is_nan()) {
            events.push(Event::Mag {
                field: Vector3::new(r.mag_x, r.mag_y, r.mag_z),
                elapsed_s: t1,
            });
        }

        if !r.pressure.is_nan() {
            events.push(Event::Baro {
                pressure: r.pressure,
                elapsed_s: t1,
            });
        }
    }
    EventStream { start_time, events }
}
