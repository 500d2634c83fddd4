//! Atmospheric pressure models and the pressure altimeter.
//!
//! Two polynomial fits of the standard atmosphere live here. The barometer
//! measurement model is an eighth-coefficient base-10 fit, `baro_pressure_model`,
//! with an analytic derivative for the measurement Jacobian. The altimeter is
//! a fifth-order natural-log fit inverted by a seeded Laguerre root solve,
//! valid on a pressure-altitude band of [-1000, 12000] m and extended by its
//! tangent lines outside that band, so `altitude_from_pressure` is continuous
//! (and differentiable) across the band edges.
//!
//! Both fits work in *pressure altitude*: geodetic altitude plus a fixed
//! launch-site offset. Public functions take and return geodetic altitude.

/// Offset between geodetic altitude and the fits' pressure altitude, meters.
pub const ALTIMETER_OFFSET: f32 = 111.794_93;
/// Lower edge of the polynomial fit band, pressure altitude in meters.
pub const ALTITUDE_FLOOR: f32 = -1000.0;
/// Upper edge of the polynomial fit band, pressure altitude in meters.
pub const ALTITUDE_CEILING: f32 = 12_000.0;

/// Natural log of the normalizing surface pressure (about 100.6 kPa).
const LOG_SURFACE_PRESSURE: f64 = 11.518971;

/// Altimeter polynomial: log-normalized pressure as
/// `f(x) = sum_i COEFFS[i] * x^(i+1)` over pressure altitude `x`.
const ALTIMETER_COEFFS: [f64; 5] = [
    -0.00011933408,
    -6.295912e-10,
    -1.06790716e-13,
    3.986928e-18,
    -2.5322159e-24,
];

/// Tangent-line slope and intercept at the floor of the fit band.
const SLOPE_FLOOR: f64 = -0.00011841112;
const INTERCEPT_FLOOR: f64 = 0.11881527;
/// Tangent-line slope and intercept at the ceiling of the fit band.
const SLOPE_CEILING: f64 = -0.00015328368;
const INTERCEPT_CEILING: f64 = -1.6251616;

/// Barometer measurement fit: `P(x) = 10^poly(x)` over pressure altitude.
const BARO_COEFFS: [f64; 8] = [
    5.0122185,
    -4.9929004e-5,
    -5.415637e-10,
    -3.837231e-14,
    2.55155e-18,
    -5.321706e-23,
    4.813401e-28,
    -1.6294356e-33,
];

const LN_10: f64 = core::f64::consts::LN_10;

/// Convergence threshold on the log-pressure residual.
const RESIDUAL_EPS: f64 = 1e-7;
/// Convergence threshold on the Laguerre step, meters.
const STEP_EPS: f64 = 1e-7;
/// The altimeter polynomial has degree five.
const POLY_DEGREE: f64 = 5.0;

fn altimeter_poly(x: f64) -> (f64, f64, f64) {
    // Value, first and second derivative of the log-normalized pressure fit.
    let mut f = 0.0;
    let mut df = 0.0;
    let mut ddf = 0.0;
    for (i, c) in ALTIMETER_COEFFS.iter().enumerate() {
        let n = (i + 1) as f64;
        let xp = x.powi(i as i32);
        f += c * xp * x;
        df += c * n * xp;
        if i >= 1 {
            ddf += c * n * (n - 1.0) * x.powi(i as i32 - 1);
        }
    }
    (f, df, ddf)
}

fn log_normalized_pressure(x: f64) -> f64 {
    if x < ALTITUDE_FLOOR as f64 {
        INTERCEPT_FLOOR + SLOPE_FLOOR * (x - ALTITUDE_FLOOR as f64)
    } else if x > ALTITUDE_CEILING as f64 {
        INTERCEPT_CEILING + SLOPE_CEILING * (x - ALTITUDE_CEILING as f64)
    } else {
        altimeter_poly(x).0
    }
}

/// Static pressure at a geodetic altitude, from the altimeter fit.
///
/// This is the exact forward model of [`altitude_from_pressure`]: the two
/// functions invert each other to well under a millimeter inside the fit
/// band.
pub fn pressure_from_altitude(altitude: f32) -> f32 {
    let x = altitude as f64 + ALTIMETER_OFFSET as f64;
    (log_normalized_pressure(x) + LOG_SURFACE_PRESSURE).exp() as f32
}

/// Geodetic altitude at a static pressure, by inverting the altimeter fit.
///
/// Inside the fit band the fifth-order polynomial is solved by Laguerre's
/// method, seeded with linear interpolation between the band-edge values and
/// run for at most two iterations. Outside the band the tangent-line
/// extensions are inverted directly, which keeps the output continuous at
/// the edges.
pub fn altitude_from_pressure(pressure: f32) -> f32 {
    let y_hat = (pressure as f64).ln() - LOG_SURFACE_PRESSURE;

    // Log-normalized pressure decreases with altitude, so a value above the
    // floor intercept means we are below the fit band.
    if y_hat > INTERCEPT_FLOOR {
        let x = ALTITUDE_FLOOR as f64 + (y_hat - INTERCEPT_FLOOR) / SLOPE_FLOOR;
        return (x - ALTIMETER_OFFSET as f64) as f32;
    }
    if y_hat < INTERCEPT_CEILING {
        let x = ALTITUDE_CEILING as f64 + (y_hat - INTERCEPT_CEILING) / SLOPE_CEILING;
        return (x - ALTIMETER_OFFSET as f64) as f32;
    }

    // Linear seed between the band edges.
    let span = (ALTITUDE_CEILING - ALTITUDE_FLOOR) as f64;
    let mut x = ALTITUDE_FLOOR as f64
        + (y_hat - INTERCEPT_FLOOR) * span / (INTERCEPT_CEILING - INTERCEPT_FLOOR);

    for _ in 0..2 {
        let (f, df, ddf) = altimeter_poly(x);
        let residual = f - y_hat;
        if residual.abs() < RESIDUAL_EPS {
            break;
        }
        let g = df / residual;
        let h = g * g - ddf / residual;
        let lambda = (POLY_DEGREE - 1.0) * (POLY_DEGREE * h - g * g);
        if lambda < 0.0 {
            break;
        }
        let sq = lambda.sqrt();
        // Pick the denominator of larger magnitude.
        let denom = if (g + sq).abs() >= (g - sq).abs() {
            g + sq
        } else {
            g - sq
        };
        let step = POLY_DEGREE / denom;
        x -= step;
        if step.abs() < STEP_EPS {
            break;
        }
    }

    (x - ALTIMETER_OFFSET as f64) as f32
}

fn baro_poly(x: f64) -> (f64, f64) {
    let mut f = 0.0;
    let mut df = 0.0;
    for (i, c) in BARO_COEFFS.iter().enumerate() {
        f += c * x.powi(i as i32);
        if i >= 1 {
            df += c * (i as f64) * x.powi(i as i32 - 1);
        }
    }
    (f, df)
}

/// Barometer measurement function: expected static pressure in Pa at a
/// geodetic altitude.
pub fn baro_pressure_model(altitude: f32) -> f32 {
    let x = altitude as f64 + ALTIMETER_OFFSET as f64;
    let (f, _) = baro_poly(x);
    (10.0_f64).powf(f) as f32
}

/// Derivative of [`baro_pressure_model`] with respect to altitude, Pa/m.
/// This is the altitude entry of the barometer measurement Jacobian.
pub fn baro_pressure_jacobian(altitude: f32) -> f32 {
    let x = altitude as f64 + ALTIMETER_OFFSET as f64;
    let (f, df) = baro_poly(x);
    (LN_10 * df * (10.0_f64).powf(f)) as f32
}
