//! Navigation and recovery-deployment filter core for rocket flight computers.
//!
//! This crate implements the state estimation and parachute-deployment logic
//! of a flight-recovery computer: an error-state extended Kalman filter over a
//! 22-element physical state (attitude quaternion, geodetic position, NED
//! velocity, and six IMU calibration vectors) with GPS, magnetometer, and
//! barometer measurement updates, plus debounced drogue and main deployment
//! triggers driven by the filtered state.
//!
//! The crate is a toolbox, not a firmware image: sensor drivers, telemetry
//! formatting, and flight-event sequencing outside of recovery live elsewhere.
//! What lives here is everything between "a fresh sensor snapshot exists" and
//! "fire the charge": strapdown mechanization, analytic linearization,
//! covariance propagation and conditioning, measurement fusion, the pressure
//! altimeter, and the deployment debounce state machines. A CSV replay binary
//! exercises the whole pipeline against recorded or synthetic flight logs.
//!
//! Primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra) for
//! the fixed-size linear algebra; the per-cycle path allocates nothing on the
//! heap. The primary reference text is _Principles of GNSS, Inertial, and
//! Multisensor Integrated Navigation Systems, 2nd Edition_ by Paul D. Groves.
//! Variables are generally named for the quantity they represent rather than
//! the symbol used in the book.
//!
//! # State conventions
//!
//! The physical state is single precision and ordered as:
//!
//! $$
//! x = [q_w, q_x, q_y, q_z, \phi, \lambda, h, v_n, v_e, v_d, b_g, b_a, s_g, s_a]
//! $$
//!
//! - the attitude quaternion is scalar-first and maps **body to NED**;
//! - latitude $\phi$ and longitude $\lambda$ are WGS84 geodetic **degrees**,
//!   altitude $h$ is meters above the ellipsoid;
//! - $v_n, v_e, v_d$ are NED velocities in m/s;
//! - $b_g$ (rad/s), $b_a$ (m/s²), $s_g$, $s_a$ (unitless) are the gyro and
//!   accelerometer bias and scale-factor triads.
//!
//! The companion 21-element *error* state drops the quaternion's redundant
//! dimension: rows 0-2 are the attitude error angle, then position, velocity,
//! and the four calibration triads in the same order.

pub mod atmosphere;
pub mod earth;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod messages;
pub mod recovery;
pub mod sim;

use nalgebra::{Matrix3, Vector3, Vector4};
use std::fmt::{Debug, Display};

/// One IMU sample: specific force and angular rate in the body frame.
///
/// The vectors are raw sensed quantities. Bias, scale factor, and gravity
/// compensation are the filter's job, not the caller's.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImuSample {
    /// Specific force in m/s², body frame x, y, z axis.
    pub accel: Vector3<f32>,
    /// Angular rate in rad/s, body frame x, y, z axis.
    pub gyro: Vector3<f32>,
}
impl Display for ImuSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImuSample {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}
impl ImuSample {
    /// Create a new sample from specific-force and angular-rate vectors.
    pub fn new(accel: Vector3<f32>, gyro: Vector3<f32>) -> ImuSample {
        ImuSample { accel, gyro }
    }
}

/// The 22-element physical navigation state.
///
/// See the crate-level documentation for ordering and units. The struct keeps
/// the blocks as named vectors rather than one flat array; the error-state
/// bookkeeping that needs flat indexing lives in [`kalman`].
#[derive(Clone, Copy)]
pub struct NavState {
    /// Attitude quaternion, scalar first, body to NED.
    pub attitude: Vector4<f32>,
    /// Latitude (deg), longitude (deg), altitude (m).
    pub position: Vector3<f32>,
    /// NED velocity in m/s.
    pub velocity: Vector3<f32>,
    /// Gyroscope bias in rad/s.
    pub gyro_bias: Vector3<f32>,
    /// Accelerometer bias in m/s².
    pub accel_bias: Vector3<f32>,
    /// Gyroscope scale-factor error, unitless.
    pub gyro_scale: Vector3<f32>,
    /// Accelerometer scale-factor error, unitless.
    pub accel_scale: Vector3<f32>,
}

impl Default for NavState {
    fn default() -> Self {
        NavState {
            attitude: Vector4::new(1.0, 0.0, 0.0, 0.0),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            gyro_bias: Vector3::zeros(),
            accel_bias: Vector3::zeros(),
            gyro_scale: Vector3::zeros(),
            accel_scale: Vector3::zeros(),
        }
    }
}

impl Debug for NavState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NavState {{ q: [{:.4}, {:.4}, {:.4}, {:.4}], lat: {:.6} deg, lon: {:.6} deg, alt: {:.2} m, v: [{:.3}, {:.3}, {:.3}] m/s }}",
            self.attitude[0],
            self.attitude[1],
            self.attitude[2],
            self.attitude[3],
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
        )
    }
}

impl NavState {
    /// Latitude in degrees.
    pub fn latitude(&self) -> f32 {
        self.position[0]
    }
    /// Longitude in degrees.
    pub fn longitude(&self) -> f32 {
        self.position[1]
    }
    /// Altitude in meters above the ellipsoid.
    pub fn altitude(&self) -> f32 {
        self.position[2]
    }
    /// Down velocity in m/s (positive while descending).
    pub fn velocity_down(&self) -> f32 {
        self.velocity[2]
    }
    /// Renormalize the attitude quaternion in place.
    pub fn normalize_attitude(&mut self) {
        let norm = self.attitude.norm();
        if norm > 0.0 {
            self.attitude /= norm;
        }
    }
}

/// Hamilton product of two scalar-first quaternions, $a \otimes b$.
pub fn quaternion_product(a: &Vector4<f32>, b: &Vector4<f32>) -> Vector4<f32> {
    Vector4::new(
        a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
        a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
        a[0] * b[2] - a[1] * b[3] + a[2] * b[0] + a[3] * b[1],
        a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + a[3] * b[0],
    )
}

/// Conjugate of a scalar-first quaternion.
pub fn quaternion_conjugate(q: &Vector4<f32>) -> Vector4<f32> {
    Vector4::new(q[0], -q[1], -q[2], -q[3])
}

/// Quaternion exponential of a rotation-vector half-angle.
///
/// For small arguments the closed form degenerates, so below 1e-6 the result
/// falls back to the normalized first-order quaternion $[1, v]$.
pub fn quaternion_exponential(v: &Vector3<f32>) -> Vector4<f32> {
    let angle = v.norm();
    if angle < 1e-6 {
        let q = Vector4::new(1.0, v[0], v[1], v[2]);
        q / q.norm()
    } else {
        let s = angle.sin() / angle;
        Vector4::new(angle.cos(), s * v[0], s * v[1], s * v[2])
    }
}

/// Rotate a vector by a scalar-first quaternion: $\mathrm{vec}(q \otimes [0, v] \otimes q^*)$.
pub fn quaternion_rotate(q: &Vector4<f32>, v: &Vector3<f32>) -> Vector3<f32> {
    let qv = Vector4::new(0.0, v[0], v[1], v[2]);
    let rotated = quaternion_product(&quaternion_product(q, &qv), &quaternion_conjugate(q));
    Vector3::new(rotated[1], rotated[2], rotated[3])
}

/// Direction-cosine matrix (body to NED) of a scalar-first quaternion.
///
/// $C = (s^2 - v \cdot v) I + 2 v v^T + 2 s [v \times]$
///
/// The quaternion is normalized before the expansion, so a slightly drifted
/// attitude still yields a proper rotation.
pub fn quaternion_to_dcm(q: &Vector4<f32>) -> Matrix3<f32> {
    let q = q / q.norm();
    let s = q[0];
    let v = Vector3::new(q[1], q[2], q[3]);
    let identity = Matrix3::identity();
    (s * s - v.dot(&v)) * identity
        + 2.0 * v * v.transpose()
        + 2.0 * s * earth::vector_to_skew_symmetric(&v)
}
