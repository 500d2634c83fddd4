//! Error-state extended Kalman filter over the full navigation state.
//!
//! This module contains the filter proper: forward-Euler strapdown propagation
//! of the 22-element physical state, covariance propagation through the
//! analytic Jacobians from [`linearize`](crate::linearize), and the GPS,
//! magnetometer, and barometer measurement updates. It builds on the
//! quaternion and earth-model functions provided in the top-level
//! [reconav](crate) module.
//!
//! # Mathematical Background
//!
//! The filter carries the physical state nonlinearly and a 21-element error
//! state statistically. The predict step is
//!
//! $$
//! \begin{aligned}
//! \bar{x}_{k+1} &= x_k + \dot{x}(x_k, u_k)\,dt \\\\
//! \bar{P}_{k+1} &= P_k + (F P_k + P_k F^T + G Q G^T)\,dt
//! \end{aligned}
//! $$
//!
//! with the quaternion renormalized in place after the Euler step. Updates use
//! the Joseph-form covariance correction
//!
//! $$
//! P = (I - K H) P (I - K H)^T + K R K^T
//! $$
//!
//! with the gain solved in double precision (see [`linalg`](crate::linalg)).
//!
//! A separate 6×6 attitude/gyro-bias covariance rides alongside the main
//! covariance and feeds the magnetometer update, which corrects the quaternion
//! multiplicatively through a small-angle quaternion exponential rather than
//! through the additive error state.
//!
//! # References
//!
//! - Groves, P. D. "Principles of GNSS, Inertial, and Multisensor Integrated
//!   Navigation Systems, 2nd Edition", Chapters 14.2-14.3
//! - Markley, F. L. "Attitude Error Representations for Kalman Filtering"

use crate::atmosphere;
use crate::earth::{self, cosd, sind, vector_to_skew_symmetric};
use crate::linalg::{nearest_psd, solve_gain, symmetrize};
use crate::linearize;
use crate::messages::SensorSnapshot;
use crate::{
    ImuSample, NavState, quaternion_conjugate, quaternion_exponential, quaternion_product,
    quaternion_rotate, quaternion_to_dcm,
};

use nalgebra::{Matrix3, SMatrix, SVector, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Position-covariance trace above which the GPS innovation covariance is
/// inflated by 25%.
const GPS_INFLATION_TRACE: f32 = 1000.0;
/// GPS innovation-covariance inflation factor when the trace trips.
const GPS_INFLATION: f32 = 0.25;
/// Process-noise time scaling: Q enters the covariance as `Q · 10 dt`.
const PROCESS_NOISE_SCALE: f32 = 10.0;

/// Filter initialization constants.
///
/// Serializable so a launch-site profile can be stored as JSON and loaded at
/// startup; `Default` carries the reference launch configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Initial attitude quaternion, scalar first, body to NED.
    pub attitude: [f32; 4],
    /// Initial latitude (deg), longitude (deg), altitude (m).
    pub position: [f32; 3],
    /// Initial NED velocity in m/s.
    pub velocity: [f32; 3],
    /// Initial attitude-error variance, per axis.
    pub attitude_uncertainty: f32,
    /// Initial position variance, per axis.
    pub position_uncertainty: f32,
    /// Initial velocity variance, per axis.
    pub velocity_uncertainty: f32,
    /// Initial gyro-bias variance, per axis.
    pub gyro_bias_uncertainty: f32,
    /// Initial accel-bias variance, per axis.
    pub accel_bias_uncertainty: f32,
    /// Initial gyro scale-factor variance, per axis.
    pub gyro_scale_uncertainty: f32,
    /// Initial accel scale-factor variance, per axis.
    pub accel_scale_uncertainty: f32,
    /// Gyro white-noise magnitude, rad/s.
    pub gyro_noise: f32,
    /// Gyro-bias random-walk magnitude, rad/s.
    pub gyro_walk: f32,
    /// Accel white-noise magnitude, m/s².
    pub accel_noise: f32,
    /// Accel-bias random-walk magnitude, m/s².
    pub accel_walk: f32,
    /// GPS measurement-noise diagonal: lat (deg²), lon (deg²), alt (m²).
    pub gps_noise: [f32; 3],
    /// Magnetometer measurement-noise diagonal.
    pub mag_noise: [f32; 3],
    /// Barometer measurement-noise variance.
    pub baro_noise: f32,
    /// Reference magnetic field direction in NED at the launch site.
    pub mag_reference: [f32; 3],
    /// Whether the magnetometer update runs. Off until the reference field
    /// has been surveyed for the launch site.
    pub use_magnetometer: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            // Nose-up on the rail: 90 degrees of pitch.
            attitude: [0.707_106_8, 0.0, 0.707_106_8, 0.0],
            position: [30.9275, -81.514_72, 45.0],
            velocity: [0.0, 0.0, 0.0],
            attitude_uncertainty: 1e-4,
            position_uncertainty: 1e-4,
            velocity_uncertainty: 1e-4,
            gyro_bias_uncertainty: 1e-4,
            accel_bias_uncertainty: 1e-4,
            gyro_scale_uncertainty: 1e-4,
            accel_scale_uncertainty: 1e-4,
            gyro_noise: (12.0e-3_f32).to_radians(),
            gyro_walk: (3.0_f32 / 3600.0).to_radians(),
            accel_noise: 200.0e-6 * 9.81,
            accel_walk: 40.0e-6 * 9.8,
            gps_noise: [1.35e-5, 1.65e-5, 2.0],
            mag_noise: [3.2e-7, 4.1e-7, 3.2e-7],
            baro_noise: 2.5e-3,
            // Mid-latitude field direction, about 60 degrees of inclination.
            mag_reference: [0.497, -0.052, 0.866],
            use_magnetometer: false,
        }
    }
}

impl FilterConfig {
    /// Serialize the configuration to a JSON file.
    pub fn to_json(&self, path: &str) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(std::io::Error::other)
    }
    /// Load a configuration from a JSON file.
    pub fn from_json(path: &str) -> std::io::Result<FilterConfig> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(file).map_err(std::io::Error::other)
    }
}

/// Error-state EKF over the 22-element physical navigation state.
#[derive(Clone, Debug)]
pub struct ErrorStateEkf {
    state: NavState,
    /// 21×21 error-state covariance.
    covariance: SMatrix<f32, 21, 21>,
    /// 6×6 attitude/gyro-bias covariance for the magnetometer update.
    attitude_covariance: SMatrix<f32, 6, 6>,
    /// Unscaled 12×12 process-noise diagonal.
    process_noise: SMatrix<f32, 12, 12>,
    /// Unscaled 6×6 attitude-channel process noise.
    attitude_process_noise: SMatrix<f32, 6, 6>,
    gps_noise: Matrix3<f32>,
    mag_noise: Matrix3<f32>,
    baro_noise: f32,
    mag_reference: Vector3<f32>,
    use_magnetometer: bool,
}

impl ErrorStateEkf {
    /// Build a filter from initialization constants.
    pub fn new(config: &FilterConfig) -> ErrorStateEkf {
        let mut state = NavState::default();
        state.attitude = Vector4::from_column_slice(&config.attitude);
        state.position = Vector3::from_column_slice(&config.position);
        state.velocity = Vector3::from_column_slice(&config.velocity);
        state.normalize_attitude();

        let mut covariance = SMatrix::<f32, 21, 21>::zeros();
        let block_variances = [
            config.attitude_uncertainty,
            config.position_uncertainty,
            config.velocity_uncertainty,
            config.gyro_bias_uncertainty,
            config.accel_bias_uncertainty,
            config.gyro_scale_uncertainty,
            config.accel_scale_uncertainty,
        ];
        for (block, variance) in block_variances.iter().enumerate() {
            for axis in 0..3 {
                covariance[(3 * block + axis, 3 * block + axis)] = *variance;
            }
        }

        let mut attitude_covariance = SMatrix::<f32, 6, 6>::zeros();
        for axis in 0..3 {
            attitude_covariance[(axis, axis)] = config.attitude_uncertainty;
            attitude_covariance[(axis + 3, axis + 3)] = config.gyro_bias_uncertainty;
        }

        let mut process_noise = SMatrix::<f32, 12, 12>::zeros();
        let noise_blocks = [
            config.gyro_noise,
            config.gyro_walk,
            config.accel_noise,
            config.accel_walk,
        ];
        for (block, magnitude) in noise_blocks.iter().enumerate() {
            for axis in 0..3 {
                process_noise[(3 * block + axis, 3 * block + axis)] = *magnitude;
            }
        }

        let mut attitude_process_noise = SMatrix::<f32, 6, 6>::zeros();
        for axis in 0..3 {
            attitude_process_noise[(axis, axis)] = config.gyro_noise;
            attitude_process_noise[(axis + 3, axis + 3)] = config.gyro_walk;
        }

        ErrorStateEkf {
            state,
            covariance,
            attitude_covariance,
            process_noise,
            attitude_process_noise,
            gps_noise: Matrix3::from_diagonal(&Vector3::from_column_slice(&config.gps_noise)),
            mag_noise: Matrix3::from_diagonal(&Vector3::from_column_slice(&config.mag_noise)),
            baro_noise: config.baro_noise,
            mag_reference: Vector3::from_column_slice(&config.mag_reference),
            use_magnetometer: config.use_magnetometer,
        }
    }

    /// Current physical state estimate.
    pub fn state(&self) -> &NavState {
        &self.state
    }
    /// Current 21×21 error-state covariance.
    pub fn covariance(&self) -> &SMatrix<f32, 21, 21> {
        &self.covariance
    }
    /// Current 6×6 attitude-channel covariance.
    pub fn attitude_covariance(&self) -> &SMatrix<f32, 6, 6> {
        &self.attitude_covariance
    }

    /// Predict step: propagate state and covariance one Euler step forward.
    ///
    /// All rates are evaluated at the pre-update state, then applied at once:
    /// quaternion (renormalized in place), position (lat/lon in deg/s),
    /// velocity, and both covariances. The bias and scale-factor states are
    /// random walks and do not move here.
    pub fn propagate(&mut self, imu: &ImuSample, dt: f32) {
        let state = self.state;
        let latitude = state.latitude();
        let altitude = state.altitude();
        let (vn, ve, vd) = (state.velocity[0], state.velocity[1], state.velocity[2]);

        let w_hat = linearize::corrected_angular_rate(&state, &imu.gyro);
        let a_hat = linearize::corrected_specific_force(&state, &imu.accel);

        // Quaternion kinematics: q_dot = 0.5 q x [0, w_hat].
        let rate_quat = Vector4::new(0.0, w_hat[0], w_hat[1], w_hat[2]);
        let attitude_rate = 0.5 * quaternion_product(&state.attitude, &rate_quat);

        // Geodetic position rate, converted to deg/s for the angular states.
        let radii = earth::principal_radii(latitude);
        let r_phi_h = radii.meridian + altitude;
        let r_lamb_h = radii.transverse + altitude;
        let cos_phi = cosd(latitude);
        let sin_phi = sind(latitude);
        let position_rate = Vector3::new(
            (vn / r_phi_h).to_degrees(),
            (ve / (r_lamb_h * cos_phi)).to_degrees(),
            -vd,
        );

        // NED velocity rate: transport, Coriolis, gravity, specific force.
        let we = earth::ROTATION_RATE;
        let gravity = earth::gravity_partials(latitude, altitude).g;
        let velocity_rate = Vector3::new(
            -(ve / (r_lamb_h * cos_phi) + 2.0 * we) * ve * sin_phi
                + (vn * vd) / r_phi_h
                + a_hat[0],
            (ve / (r_lamb_h * cos_phi) + 2.0 * we) * vn * sin_phi
                + (ve * vd) / r_lamb_h
                + 2.0 * we * vd * cos_phi
                + a_hat[1],
            -(ve * ve) / r_lamb_h - (vn * vn) / r_phi_h - 2.0 * we * ve * cos_phi
                + gravity
                + a_hat[2],
        );

        // Covariance rate through the analytic Jacobians.
        let f = linearize::state_transition_jacobian(&state, imu);
        let g = linearize::process_noise_jacobian(&state);
        let q_scaled = self.process_noise * (PROCESS_NOISE_SCALE * dt);
        let covariance_rate =
            f * self.covariance + self.covariance * f.transpose() + g * q_scaled * g.transpose();

        // Attitude-channel covariance rate. The rotation term uses the
        // bias-corrected body rate only.
        let dcm = quaternion_to_dcm(&state.attitude);
        let body_rate = imu.gyro - state.gyro_bias;
        let mut fq = SMatrix::<f32, 6, 6>::zeros();
        fq.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-Matrix3::identity()));
        fq.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&vector_to_skew_symmetric(&(dcm * body_rate)));
        let mut gq = SMatrix::<f32, 6, 6>::zeros();
        gq.fixed_view_mut::<3, 3>(0, 0).copy_from(&dcm);
        gq.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-dcm));
        let qq_scaled = self.attitude_process_noise * (PROCESS_NOISE_SCALE * dt);
        let attitude_covariance_rate = fq * self.attitude_covariance
            + self.attitude_covariance * fq.transpose()
            + gq * qq_scaled * gq.transpose();

        // Euler step.
        self.state.attitude += dt * attitude_rate;
        self.state.normalize_attitude();
        self.state.position += dt * position_rate;
        self.state.velocity += dt * velocity_rate;
        self.covariance = symmetrize(&(self.covariance + dt * covariance_rate));
        self.attitude_covariance =
            symmetrize(&(self.attitude_covariance + dt * attitude_covariance_rate));
    }

    /// GPS position update: latitude (deg), longitude (deg), altitude (m).
    ///
    /// The projected covariance `H P Hᵀ` is inflated by 25% when the position
    /// covariance trace exceeds 1000 (the measurement noise is left alone),
    /// so a fix acquired while the estimate is badly lost is blended in
    /// rather than snapped to.
    ///
    /// The attitude and gyro-bias states are not corrected by position
    /// measurements; those channels belong to the magnetometer.
    pub fn update_gps(&mut self, position_measurement: &Vector3<f32>) {
        let mut h = SMatrix::<f32, 3, 21>::zeros();
        h.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Matrix3::identity());

        let cross = self.covariance * h.transpose();
        let projected = h * cross;

        let position_trace =
            self.covariance[(3, 3)] + self.covariance[(4, 4)] + self.covariance[(5, 5)];
        let inflation = if position_trace > GPS_INFLATION_TRACE {
            log::warn!("position covariance trace {position_trace:.1}, inflating GPS innovation");
            1.0 + GPS_INFLATION
        } else {
            1.0
        };

        let w = (inflation * projected + self.gps_noise).cast::<f64>();
        let k = solve_gain(&w, &cross.cast::<f64>()).cast::<f32>();

        let residual = position_measurement - self.state.position;
        let dx: SVector<f32, 21> = k * residual;
        self.apply_translational_correction(&dx);
        let r = self.gps_noise;
        self.joseph_update(&k, &h, &r);
    }

    /// Magnetometer update.
    ///
    /// Corrects the attitude quaternion and gyro bias through the 6×6
    /// attitude-channel covariance: the residual between the reference field
    /// and the body measurement rotated into NED drives a small-angle
    /// quaternion correction `dq = exp(-c_q / 2)` applied on the left, and a
    /// bias correction rotated back into the body frame. The main covariance
    /// takes a Joseph update with the same measurement geometry so the two
    /// channels stay consistent; no additive state correction comes from it.
    pub fn update_mag(&mut self, mag_body: &Vector3<f32>) {
        let field_skew = vector_to_skew_symmetric(&self.mag_reference);

        // Attitude-channel gain.
        let mut hq = SMatrix::<f32, 3, 6>::zeros();
        hq.fixed_view_mut::<3, 3>(0, 0).copy_from(&field_skew);
        let cross_q = self.attitude_covariance * hq.transpose();
        let innovation_q = hq * cross_q + self.mag_noise;
        let kq = solve_gain(&innovation_q.cast::<f64>(), &cross_q.cast::<f64>()).cast::<f32>();

        // Main-channel gain, for the covariance only.
        let mut h = SMatrix::<f32, 3, 21>::zeros();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&field_skew);
        let cross = self.covariance * h.transpose();
        let innovation = h * cross + self.mag_noise;
        let k = solve_gain(&innovation.cast::<f64>(), &cross.cast::<f64>()).cast::<f32>();

        let predicted_field = quaternion_rotate(&self.state.attitude, mag_body);
        let residual = self.mag_reference - predicted_field;
        let err: SVector<f32, 6> = kq * residual;

        // Quaternion correction applied multiplicatively on the left.
        let half_angle = Vector3::new(-err[0] / 2.0, -err[1] / 2.0, -err[2] / 2.0);
        let dq = quaternion_exponential(&half_angle);
        self.state.attitude = quaternion_product(&dq, &self.state.attitude);
        self.state.normalize_attitude();

        // Bias correction mapped into the body frame of the corrected
        // attitude.
        let bias_correction = Vector3::new(err[3], err[4], err[5]);
        let body_correction =
            quaternion_rotate(&quaternion_conjugate(&self.state.attitude), &bias_correction);
        self.state.gyro_bias -= body_correction;

        // Joseph updates on both channels.
        let identity_q = SMatrix::<f32, 6, 6>::identity();
        let i_kh_q = identity_q - kq * hq;
        self.attitude_covariance = symmetrize(
            &(i_kh_q * self.attitude_covariance * i_kh_q.transpose()
                + kq * self.mag_noise * kq.transpose()),
        );
        let r = self.mag_noise;
        self.joseph_update(&k, &h, &r);
    }

    /// Barometer static-pressure update.
    ///
    /// Scalar measurement: the expected pressure comes from the forward
    /// atmosphere fit at the current altitude and the Jacobian row holds its
    /// derivative in the altitude column.
    pub fn update_baro(&mut self, pressure_measurement: f32) {
        let altitude = self.state.altitude();
        let mut h = SMatrix::<f32, 1, 21>::zeros();
        h[(0, 5)] = atmosphere::baro_pressure_jacobian(altitude);

        let cross = self.covariance * h.transpose();
        let innovation_cov = h * cross + SMatrix::<f32, 1, 1>::new(self.baro_noise);
        let k = solve_gain(&innovation_cov.cast::<f64>(), &cross.cast::<f64>()).cast::<f32>();

        let residual = pressure_measurement - atmosphere::baro_pressure_model(altitude);
        let dx: SVector<f32, 21> = k * residual;
        self.apply_translational_correction(&dx);

        let r = SMatrix::<f32, 1, 1>::new(self.baro_noise);
        let identity = SMatrix::<f32, 21, 21>::identity();
        let i_kh = identity - k * h;
        self.covariance =
            symmetrize(&(i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose()));
    }

    /// One full filter cycle against a sensor snapshot.
    ///
    /// Propagates on the IMU sample, runs whichever measurement updates the
    /// snapshot carries (the magnetometer only when enabled), then checks the
    /// covariance diagonal and projects back to PSD if any variance has gone
    /// negative.
    pub fn process(&mut self, snapshot: &SensorSnapshot, dt: f32) {
        self.propagate(&snapshot.imu, dt);
        if let Some(position) = snapshot.gps {
            self.update_gps(&position);
        }
        if self.use_magnetometer
            && let Some(mag) = snapshot.mag
        {
            self.update_mag(&mag);
        }
        if let Some(pressure) = snapshot.baro {
            self.update_baro(pressure);
        }
        self.condition_covariance();
    }

    /// Scan the covariance diagonal and project onto the PSD cone if any
    /// variance has gone negative.
    pub fn condition_covariance(&mut self) {
        let negative = (0..21).any(|i| self.covariance[(i, i)] < 0.0);
        if negative {
            let clamped = nearest_psd(&mut self.covariance);
            log::warn!("negative variance on covariance diagonal, reconditioned: {clamped}");
        }
    }

    /// Apply a translational error-state correction.
    ///
    /// Position, velocity, accel bias, and both scale-factor triads move; the
    /// attitude and gyro-bias channels are left alone (they are owned by the
    /// magnetometer update).
    fn apply_translational_correction(&mut self, dx: &SVector<f32, 21>) {
        for axis in 0..3 {
            self.state.position[axis] += dx[3 + axis];
            self.state.velocity[axis] += dx[6 + axis];
            self.state.accel_bias[axis] += dx[12 + axis];
            self.state.gyro_scale[axis] += dx[15 + axis];
            self.state.accel_scale[axis] += dx[18 + axis];
        }
    }

    /// Joseph-form covariance update for a 3-row measurement.
    fn joseph_update(
        &mut self,
        k: &SMatrix<f32, 21, 3>,
        h: &SMatrix<f32, 3, 21>,
        r: &Matrix3<f32>,
    ) {
        let identity = SMatrix::<f32, 21, 21>::identity();
        let i_kh = identity - k * h;
        self.covariance =
            symmetrize(&(i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose()));
    }
}
