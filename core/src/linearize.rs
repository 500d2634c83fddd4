//! Analytic linearization of the strapdown mechanization.
//!
//! This module produces the continuous-time Jacobians the covariance
//! propagation needs: the 21×21 state-transition matrix F and the 21×12
//! process-noise mapping G, assembled block-by-block from analytically derived
//! sub-Jacobians. It also computes the bias- and scale-factor-corrected IMU
//! quantities (the "hatted" angular rate and specific force) that both the
//! mechanization and the linearization consume.
//!
//! # Error-state ordering
//!
//! The 21 error states are ordered in triads:
//! ```text
//! dx = [theta, dp, dv, db_g, db_a, ds_g, ds_a]
//! ```
//! attitude error angle, position (lat deg, lon deg, alt m), NED velocity,
//! gyro bias, accel bias, gyro scale factor, accel scale factor.
//!
//! The driving white-noise vector is 12 elements:
//! ```text
//! w = [n_g, n_bg, n_a, n_ba]
//! ```
//! gyro noise, gyro-bias random walk, accel noise, accel-bias random walk.
//!
//! # A note on units
//!
//! The position states are degree-valued, so the position-rate blocks carry
//! rad→deg factors on their latitude and longitude rows, matching the
//! mechanization in [`kalman`](crate::kalman).

use crate::earth::{self, cosd, secd, sind, tand, vector_to_skew_symmetric};
use crate::{ImuSample, NavState, quaternion_to_dcm};
use nalgebra::{Matrix3, SMatrix, Vector3};

/// Corrected body-frame angular rate ("omega hat").
///
/// Removes the estimated gyro bias and scale factor from the measurement,
/// then subtracts the navigation-frame rotation (earth rate plus transport
/// rate) mapped into the body frame:
///
/// $\hat\omega = \frac{\omega_{meas} - b_g}{1 + s_g} - C_n^b\,\omega_{in}^n$
pub fn corrected_angular_rate(state: &NavState, gyro_meas: &Vector3<f32>) -> Vector3<f32> {
    let dcm_body_to_nav = quaternion_to_dcm(&state.attitude);
    let nav_rate = earth::navigation_frame_rate(
        state.latitude(),
        state.altitude(),
        &state.velocity,
    );
    let mut corrected = Vector3::zeros();
    for i in 0..3 {
        corrected[i] = (gyro_meas[i] - state.gyro_bias[i]) / (1.0 + state.gyro_scale[i]);
    }
    corrected - dcm_body_to_nav.transpose() * nav_rate
}

/// Corrected navigation-frame specific force ("a hat").
///
/// $\hat a^n = C_b^n\,\frac{a_{meas} - b_a}{1 + s_a}$
pub fn corrected_specific_force(state: &NavState, accel_meas: &Vector3<f32>) -> Vector3<f32> {
    let dcm_body_to_nav = quaternion_to_dcm(&state.attitude);
    let mut corrected = Vector3::zeros();
    for i in 0..3 {
        corrected[i] = (accel_meas[i] - state.accel_bias[i]) / (1.0 + state.accel_scale[i]);
    }
    dcm_body_to_nav * corrected
}

/// Jacobian of the position rate with respect to position.
fn position_rate_wrt_position(latitude: f32, altitude: f32, vn: f32, ve: f32) -> Matrix3<f32> {
    let radii = earth::principal_radii(latitude);
    let square_phi = (radii.meridian + altitude) * (radii.meridian + altitude);
    let square_lamb = (radii.transverse + altitude) * (radii.transverse + altitude);
    let sec_phi = secd(latitude);
    let tan_phi = tand(latitude);

    // Groves eqn 7.80a terms; latitude/longitude rows convert to deg/s.
    let m11 = -vn / square_phi * radii.d_meridian;
    let m13 = (-vn / square_phi).to_degrees();
    let m21 = -(ve * sec_phi) / square_lamb * radii.d_transverse
        + (ve * sec_phi * tan_phi) / (radii.transverse + altitude);
    let m23 = (-ve * sec_phi / square_lamb).to_degrees();

    Matrix3::new(
        m11, 0.0, m13, //
        m21, 0.0, m23, //
        0.0, 0.0, 0.0,
    )
}

/// Jacobian of the position rate with respect to NED velocity.
fn position_rate_wrt_velocity(latitude: f32, altitude: f32) -> Matrix3<f32> {
    let radii = earth::principal_radii(latitude);
    let m11 = (1.0 / (radii.meridian + altitude)).to_degrees();
    let m22 = (secd(latitude) / (radii.transverse + altitude)).to_degrees();

    Matrix3::new(
        m11, 0.0, 0.0, //
        0.0, m22, 0.0, //
        0.0, 0.0, -1.0,
    )
}

/// Jacobian of the NED acceleration with respect to position.
fn velocity_rate_wrt_position(
    latitude: f32,
    altitude: f32,
    velocity: &Vector3<f32>,
) -> Matrix3<f32> {
    let (vn, ve, vd) = (velocity[0], velocity[1], velocity[2]);
    let we = earth::ROTATION_RATE;
    let radii = earth::principal_radii(latitude);
    let gravity = earth::gravity_partials(latitude, altitude);

    let sin_phi = sind(latitude);
    let cos_phi = cosd(latitude);
    let sec_phi = 1.0 / cos_phi;
    let tan_phi = sin_phi / cos_phi;
    let sec_phi2 = sec_phi * sec_phi;

    let r_phi_h = radii.meridian + altitude;
    let r_lamb_h = radii.transverse + altitude;
    let r_phi_h2 = r_phi_h * r_phi_h;
    let r_lamb_h2 = r_lamb_h * r_lamb_h;

    let y11 = -(ve * ve * sec_phi2) / r_lamb_h
        + (ve * ve * tan_phi) / r_lamb_h2 * radii.d_transverse
        - 2.0 * we * ve * cos_phi
        - (vn * vd) / r_phi_h2 * radii.d_meridian;
    let y13 = (ve * ve * tan_phi) / r_lamb_h2 - (vn * vd) / r_phi_h2;

    let y21 = (ve * vn * sec_phi2) / r_lamb_h
        - (ve * vn * tan_phi) / r_lamb_h2 * radii.d_transverse
        + 2.0 * we * vn * cos_phi
        - (ve * vd) / r_lamb_h2 * radii.d_transverse
        - 2.0 * we * vd * sin_phi;
    let y23 = -ve * ((vn * tan_phi + vd) / r_lamb_h2);

    let y31 = (ve * ve) / r_lamb_h2 * radii.d_transverse
        + (vn * vn) / r_phi_h2 * radii.d_meridian
        + 2.0 * we * ve * sin_phi
        + gravity.d_lat;
    let y33 = (ve * ve) / r_lamb_h2 + (vn * vn) / r_phi_h2 + gravity.d_alt;

    Matrix3::new(
        y11, 0.0, y13, //
        y21, 0.0, y23, //
        y31, 0.0, y33,
    )
}

/// Jacobian of the NED acceleration with respect to NED velocity.
fn velocity_rate_wrt_velocity(
    latitude: f32,
    altitude: f32,
    velocity: &Vector3<f32>,
) -> Matrix3<f32> {
    let (vn, ve, vd) = (velocity[0], velocity[1], velocity[2]);
    let we = earth::ROTATION_RATE;
    let radii = earth::principal_radii(latitude);

    let sin_phi = sind(latitude);
    let cos_phi = cosd(latitude);
    let tan_phi = sin_phi / cos_phi;

    let r_phi_h = radii.meridian + altitude;
    let r_lamb_h = radii.transverse + altitude;

    let z11 = vd / r_phi_h;
    let z12 = (-2.0 * ve * tan_phi) / r_lamb_h + 2.0 * we * sin_phi;
    let z13 = vn / r_phi_h;

    let z21 = (ve * tan_phi) / r_lamb_h + 2.0 * we * sin_phi;
    let z22 = (vd + vn * tan_phi) / r_lamb_h;
    let z23 = ve / r_lamb_h + 2.0 * we * cos_phi;

    let z31 = (-2.0 * vn) / r_phi_h;
    let z32 = (-2.0 * ve) / r_lamb_h - 2.0 * we * cos_phi;

    Matrix3::new(
        z11, z12, z13, //
        z21, z22, z23, //
        z31, z32, 0.0,
    )
}

/// Jacobian of the navigation-frame rotation rate with respect to position.
fn nav_rate_wrt_position(latitude: f32, altitude: f32, vn: f32, ve: f32) -> Matrix3<f32> {
    let we = earth::ROTATION_RATE;
    let radii = earth::principal_radii(latitude);

    let sin_phi = sind(latitude);
    let cos_phi = cosd(latitude);
    let tan_phi = tand(latitude);
    let sec_phi = secd(latitude);
    let sec_phi2 = sec_phi * sec_phi;

    let r_lh = radii.transverse + altitude;
    let r_ph = radii.meridian + altitude;

    let m11 = -we * sin_phi - ve / (r_lh * r_lh) * radii.d_transverse;
    let m13 = -ve / (r_lh * r_lh);
    let m21 = vn / (r_ph * r_ph) * radii.d_meridian;
    let m23 = vn / (r_ph * r_ph);
    let m31 = -we * cos_phi - (ve * sec_phi2) / r_lh
        + (ve * tan_phi / (r_lh * r_lh)) * radii.d_transverse;
    let m33 = (ve * tan_phi) / (r_lh * r_lh);

    Matrix3::new(
        m11, 0.0, m13, //
        m21, 0.0, m23, //
        m31, 0.0, m33,
    )
}

/// Jacobian of the navigation-frame rotation rate with respect to velocity.
fn nav_rate_wrt_velocity(latitude: f32, altitude: f32) -> Matrix3<f32> {
    let radii = earth::principal_radii(latitude);
    let m12 = 1.0 / (radii.transverse + altitude);
    let m21 = -1.0 / (radii.meridian + altitude);
    let m32 = -tand(latitude) / (radii.transverse + altitude);

    Matrix3::new(
        0.0, m12, 0.0, //
        m21, 0.0, 0.0, //
        0.0, m32, 0.0,
    )
}

/// Assemble the continuous-time 21×21 state-transition Jacobian F.
///
/// F is not used to propagate the state itself; it drives the covariance
/// time update
///
/// $\dot P = F P + P F^T + G Q G^T$
///
/// Block layout (triad row/column indices):
///
/// ```text
///        theta   dp      dv      db_g    db_a    ds_g    ds_a
/// theta  F11     F12     F13     F14     0       F16     0
/// dp     0       F22     F23     0       0       0       0
/// dv     F31     F32     F33     0       F35     0       F37
/// (rest) 0 — biases and scale factors are random-walk states
/// ```
pub fn state_transition_jacobian(state: &NavState, imu: &ImuSample) -> SMatrix<f32, 21, 21> {
    let latitude = state.latitude();
    let altitude = state.altitude();
    let (vn, ve) = (state.velocity[0], state.velocity[1]);

    let dcm_body_to_nav = quaternion_to_dcm(&state.attitude);
    let dcm_nav_to_body = dcm_body_to_nav.transpose();

    let mut f = SMatrix::<f32, 21, 21>::zeros();

    // F11: skew of the negated bias/scale-corrected angular rate.
    let mut rate_scaled = Vector3::zeros();
    for i in 0..3 {
        rate_scaled[i] =
            -1.0 / (1.0 + state.gyro_scale[i]) * (imu.gyro[i] - state.gyro_bias[i]);
    }
    let f11 = vector_to_skew_symmetric(&rate_scaled);
    f.fixed_view_mut::<3, 3>(0, 0).copy_from(&f11);

    // F12, F13: navigation-rate sensitivity mapped into the body frame.
    let f12 = -dcm_nav_to_body * nav_rate_wrt_position(latitude, altitude, vn, ve);
    f.fixed_view_mut::<3, 3>(0, 3).copy_from(&f12);
    let f13 = -dcm_nav_to_body * nav_rate_wrt_velocity(latitude, altitude);
    f.fixed_view_mut::<3, 3>(0, 6).copy_from(&f13);

    // F14: gyro-bias feedthrough. F16: gyro scale-factor feedthrough.
    let mut f14 = Matrix3::zeros();
    let mut f16 = Matrix3::zeros();
    for i in 0..3 {
        f14[(i, i)] = -1.0 / (1.0 + state.gyro_scale[i]);
        f16[(i, i)] = -(imu.gyro[i] - state.gyro_bias[i]);
    }
    f.fixed_view_mut::<3, 3>(0, 9).copy_from(&f14);
    f.fixed_view_mut::<3, 3>(0, 15).copy_from(&f16);

    // Row block 2 (rows 3-5): position rate.
    let f22 = position_rate_wrt_position(latitude, altitude, vn, ve);
    f.fixed_view_mut::<3, 3>(3, 3).copy_from(&f22);
    let f23 = position_rate_wrt_velocity(latitude, altitude);
    f.fixed_view_mut::<3, 3>(3, 6).copy_from(&f23);

    // Row block 3 (rows 6-8): velocity rate.
    let a_hat_nav = corrected_specific_force(state, &imu.accel);
    let a_hat_body = dcm_nav_to_body * a_hat_nav;
    let f31 = -dcm_body_to_nav * vector_to_skew_symmetric(&a_hat_body);
    f.fixed_view_mut::<3, 3>(6, 0).copy_from(&f31);

    let f32_block = velocity_rate_wrt_position(latitude, altitude, &state.velocity);
    f.fixed_view_mut::<3, 3>(6, 3).copy_from(&f32_block);
    let f33 = velocity_rate_wrt_velocity(latitude, altitude, &state.velocity);
    f.fixed_view_mut::<3, 3>(6, 6).copy_from(&f33);

    // F35: accel-bias feedthrough. F37: accel scale-factor feedthrough.
    let mut inv_sfa = Matrix3::zeros();
    let mut meas_diff = Matrix3::zeros();
    for i in 0..3 {
        inv_sfa[(i, i)] = 1.0 / (1.0 + state.accel_scale[i]);
        meas_diff[(i, i)] = imu.accel[i] - state.accel_bias[i];
    }
    let f35 = -dcm_body_to_nav * inv_sfa;
    f.fixed_view_mut::<3, 3>(6, 12).copy_from(&f35);
    let f37 = -dcm_body_to_nav * meas_diff;
    f.fixed_view_mut::<3, 3>(6, 18).copy_from(&f37);

    f
}

/// Assemble the continuous-time 21×12 process-noise mapping G.
///
/// Gyro noise enters the attitude rows through the scale-factor correction;
/// accel noise enters the velocity rows through the attitude; the two random
/// walks pass straight through to the gyro-bias and gyro-scale rows.
pub fn process_noise_jacobian(state: &NavState) -> SMatrix<f32, 21, 12> {
    let dcm_body_to_nav = quaternion_to_dcm(&state.attitude);

    let mut g = SMatrix::<f32, 21, 12>::zeros();

    let mut g11 = Matrix3::zeros();
    let mut inv_sfa = Matrix3::zeros();
    for i in 0..3 {
        g11[(i, i)] = -1.0 / (1.0 + state.gyro_scale[i]);
        inv_sfa[(i, i)] = 1.0 / (1.0 + state.accel_scale[i]);
    }
    g.fixed_view_mut::<3, 3>(0, 0).copy_from(&g11);

    let g33 = -dcm_body_to_nav * inv_sfa;
    g.fixed_view_mut::<3, 3>(6, 6).copy_from(&g33);

    g.fixed_view_mut::<3, 3>(9, 3)
        .copy_from(&Matrix3::identity());
    g.fixed_view_mut::<3, 3>(15, 9)
        .copy_from(&Matrix3::identity());

    g
}
