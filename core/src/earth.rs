//! Earth geometry and gravity models for the navigation filter.
//!
//! This module provides the WGS84 ellipsoid quantities the mechanization and
//! linearization need: the principal radii of curvature together with their
//! latitude derivatives, the normal-gravity series with its latitude and
//! altitude partials, and the rotation of the navigation frame (earth rate
//! plus transport rate) expressed in NED axes.
//!
//! All latitudes are geodetic and in **degrees**, matching the filter's
//! degree-valued position state; altitudes are meters above the ellipsoid.
//! Values are single precision, like the rest of the filter core.

use nalgebra::{Matrix3, Vector3};

/// Earth's rotation rate in radians per second ($\omega_{ie}$).
pub const ROTATION_RATE: f32 = 7.29211e-5;
/// WGS84 semi-major axis (equatorial radius) in meters.
pub const EQUATORIAL_RADIUS: f32 = 6_378_137.0;
/// WGS84 semi-minor axis (polar radius) in meters.
pub const POLAR_RADIUS: f32 = 6_356_752.314_25;

/// Sine of an angle given in degrees.
#[inline]
pub fn sind(deg: f32) -> f32 {
    deg.to_radians().sin()
}
/// Cosine of an angle given in degrees.
#[inline]
pub fn cosd(deg: f32) -> f32 {
    deg.to_radians().cos()
}
/// Tangent of an angle given in degrees.
#[inline]
pub fn tand(deg: f32) -> f32 {
    deg.to_radians().tan()
}
/// Secant of an angle given in degrees.
#[inline]
pub fn secd(deg: f32) -> f32 {
    1.0 / cosd(deg)
}

/// Convert a three-element vector to a skew-symmetric matrix.
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// so that $X u = x \times u$ for any vector $u$.
///
/// # Example
/// ```rust
/// use nalgebra::{Vector3, Matrix3};
/// use reconav::earth;
/// let v: Vector3<f32> = Vector3::new(1.0, 2.0, 3.0);
/// let skew: Matrix3<f32> = earth::vector_to_skew_symmetric(&v);
/// assert_eq!(skew[(0, 1)], -3.0);
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f32>) -> Matrix3<f32> {
    let mut skew: Matrix3<f32> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}

/// Principal radii of curvature of the WGS84 ellipsoid and their latitude
/// derivatives.
///
/// `meridian` ($R_\phi$) is the radius of curvature in the meridional plane;
/// `transverse` ($R_\lambda$) is the radius of curvature in the prime
/// vertical. The derivative terms feed the position-rate and velocity-rate
/// Jacobian blocks.
#[derive(Clone, Copy, Debug)]
pub struct PrincipalRadii {
    /// Meridional radius of curvature $R_\phi$ in meters.
    pub meridian: f32,
    /// Transverse radius of curvature $R_\lambda$ in meters.
    pub transverse: f32,
    /// $\partial R_\phi / \partial \phi$ in meters per radian.
    pub d_meridian: f32,
    /// $\partial R_\lambda / \partial \phi$ in meters per radian.
    pub d_transverse: f32,
}

/// Calculate the WGS84 principal radii of curvature and their latitude
/// derivatives.
///
/// # Parameters
/// - `latitude` - geodetic latitude in degrees
///
/// # Returns
/// A [`PrincipalRadii`] with both radii and the derivatives the Jacobian
/// blocks need.
///
/// # Example
/// ```rust
/// use reconav::earth;
/// let radii = earth::principal_radii(0.0);
/// // At the equator the transverse radius equals the semi-major axis.
/// assert!((radii.transverse - 6_378_137.0).abs() < 1.0);
/// ```
pub fn principal_radii(latitude: f32) -> PrincipalRadii {
    let a = EQUATORIAL_RADIUS;
    let b = POLAR_RADIUS;
    // First eccentricity squared.
    let ecc = 1.0 - (b / a) * (b / a);

    let sin_lat = sind(latitude);
    let cos_lat = cosd(latitude);
    let w = 1.0 - ecc * sin_lat * sin_lat;

    let meridian = a * (1.0 - ecc) / w.powf(1.5);
    let transverse = a / w.sqrt();

    let d_meridian = 3.0 * a * (1.0 - ecc) * ecc * sin_lat * cos_lat / w.powf(2.5);
    let d_transverse = a * ecc * sin_lat * cos_lat / w.powf(1.5);

    PrincipalRadii {
        meridian,
        transverse,
        d_meridian,
        d_transverse,
    }
}

/// Normal gravity and its partial derivatives.
#[derive(Clone, Copy, Debug)]
pub struct GravityPartials {
    /// Downward normal gravity magnitude in m/s².
    pub g: f32,
    /// $\partial g / \partial \phi$ in m/s² per radian of latitude.
    pub d_lat: f32,
    /// $\partial g / \partial h$ in m/s² per meter of altitude.
    pub d_alt: f32,
}

/// Calculate the normal-gravity series with free-air correction, plus the
/// latitude and altitude partials the velocity-rate Jacobian block needs.
///
/// # Parameters
/// - `latitude` - geodetic latitude in degrees
/// - `altitude` - meters above the WGS84 ellipsoid
///
/// # Example
/// ```rust
/// use reconav::earth;
/// let grav = earth::gravity_partials(45.0, 0.0);
/// assert!(grav.g > 9.79 && grav.g < 9.82);
/// ```
pub fn gravity_partials(latitude: f32, altitude: f32) -> GravityPartials {
    let sin_lat = sind(latitude);
    let cos_lat = cosd(latitude);
    let sin_lat_sq = sin_lat * sin_lat;
    let sin_2lat = sind(2.0 * latitude);

    let g = 9.780327 * (1.0 + 5.3024e-3 * sin_lat_sq - 5.8e-6 * sin_2lat * sin_2lat)
        - (3.0877e-6 - 4.4e-9 * sin_lat_sq) * altitude
        + 7.2e-14 * altitude * altitude;

    let term1 = 1.06048e-2 * sin_lat * cos_lat;
    let term2 =
        4.64e-5 * (sin_lat * cos_lat * cos_lat * cos_lat - sin_lat * sin_lat * sin_lat * cos_lat);
    let term3 = 8.8e-9 * altitude * sin_lat * cos_lat;
    let d_lat = 9.780327 * (term1 - term2) + term3;

    let d_alt = -3.0877e-6 + 4.4e-9 * sin_lat_sq + 1.44e-13 * altitude;

    GravityPartials { g, d_lat, d_alt }
}

/// Calculate the Earth rotation rate vector in the local-level NED frame.
///
/// $\omega_{ie}^n = \omega_e \[\cos\phi,\ 0,\ -\sin\phi\]^T$
///
/// # Parameters
/// - `latitude` - geodetic latitude in degrees
///
/// # Example
/// ```rust
/// use reconav::earth;
/// let omega_ie = earth::earth_rate_lla(45.0);
/// ```
pub fn earth_rate_lla(latitude: f32) -> Vector3<f32> {
    Vector3::new(
        ROTATION_RATE * cosd(latitude),
        0.0,
        -ROTATION_RATE * sind(latitude),
    )
}

/// Calculate the transport rate vector in the local-level NED frame.
///
/// The transport rate is the rotation of the NED frame caused by the vehicle
/// moving over the curved ellipsoid surface:
///
/// $\omega_{en}^n = \[\frac{v_e}{R_\lambda + h},\ \frac{-v_n}{R_\phi + h},\
/// \frac{-v_e \tan\phi}{R_\lambda + h}\]^T$
///
/// # Parameters
/// - `latitude` - geodetic latitude in degrees
/// - `altitude` - meters above the WGS84 ellipsoid
/// - `velocity` - NED velocity in m/s
pub fn transport_rate(latitude: f32, altitude: f32, velocity: &Vector3<f32>) -> Vector3<f32> {
    let radii = principal_radii(latitude);
    Vector3::new(
        velocity[1] / (radii.transverse + altitude),
        -velocity[0] / (radii.meridian + altitude),
        -(velocity[1] * tand(latitude)) / (radii.transverse + altitude),
    )
}

/// Total rotation of the navigation frame relative to the inertial frame in
/// NED axes: earth rate plus transport rate.
///
/// This is the rotation the attitude propagation subtracts from the corrected
/// gyro measurement.
pub fn navigation_frame_rate(
    latitude: f32,
    altitude: f32,
    velocity: &Vector3<f32>,
) -> Vector3<f32> {
    earth_rate_lla(latitude) + transport_rate(latitude, altitude, velocity)
}

// === Unit tests ===
#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn skew_symmetric_is_cross_product() {
        let v: Vector3<f32> = Vector3::new(1.0, -2.0, 0.5);
        let u: Vector3<f32> = Vector3::new(0.3, 4.0, -1.0);
        let skew = vector_to_skew_symmetric(&v);
        let cross = v.cross(&u);
        let applied = skew * u;
        for i in 0..3 {
            assert_approx_eq!(applied[i], cross[i], 1e-6);
        }
        assert_eq!(skew[(0, 1)], -v[2]);
        assert_eq!(skew[(2, 0)], -v[1]);
    }

    #[test]
    fn radii_at_equator() {
        let radii = principal_radii(0.0);
        assert_approx_eq!(radii.transverse, EQUATORIAL_RADIUS, 1.0);
        // Meridian radius at the equator is a(1 - e^2).
        let ecc = 1.0 - (POLAR_RADIUS / EQUATORIAL_RADIUS) * (POLAR_RADIUS / EQUATORIAL_RADIUS);
        assert_approx_eq!(radii.meridian, EQUATORIAL_RADIUS * (1.0 - ecc), 5.0);
        // Derivatives vanish where sin(lat)*cos(lat) = 0.
        assert_approx_eq!(radii.d_meridian, 0.0, 1e-2);
        assert_approx_eq!(radii.d_transverse, 0.0, 1e-2);
    }

    #[test]
    fn radii_increase_toward_pole() {
        let low = principal_radii(10.0);
        let high = principal_radii(80.0);
        assert!(high.meridian > low.meridian);
        assert!(high.transverse > low.transverse);
    }

    #[test]
    fn radii_derivatives_match_finite_difference() {
        let lat: f32 = 31.0;
        let d_deg: f32 = 0.05;
        let lo = principal_radii(lat - d_deg);
        let hi = principal_radii(lat + d_deg);
        let d_rad = (2.0 * d_deg).to_radians();
        let mid = principal_radii(lat);
        let fd_meridian = (hi.meridian - lo.meridian) / d_rad;
        let fd_transverse = (hi.transverse - lo.transverse) / d_rad;
        // The radii are ~6.4e6 m in f32, so the finite differences carry a
        // few hundred meters of rounding noise.
        assert_approx_eq!(mid.d_meridian, fd_meridian, 500.0);
        assert_approx_eq!(mid.d_transverse, fd_transverse, 500.0);
    }

    #[test]
    fn gravity_at_reference_latitudes() {
        let equator = gravity_partials(0.0, 0.0);
        assert_approx_eq!(equator.g, 9.780327, 1e-4);
        let pole = gravity_partials(90.0, 0.0);
        assert!(pole.g > equator.g);
        // Gravity decreases with altitude.
        let aloft = gravity_partials(45.0, 10_000.0);
        let ground = gravity_partials(45.0, 0.0);
        assert!(aloft.g < ground.g);
        assert!(ground.d_alt < 0.0);
    }

    #[test]
    fn gravity_latitude_partial_matches_finite_difference() {
        let lat: f32 = 30.9275;
        let h: f32 = 45.0;
        let d_deg: f32 = 0.05;
        let lo = gravity_partials(lat - d_deg, h);
        let hi = gravity_partials(lat + d_deg, h);
        let fd = (hi.g - lo.g) / (2.0 * d_deg).to_radians();
        let mid = gravity_partials(lat, h);
        assert_approx_eq!(mid.d_lat, fd, 1e-2);
    }

    #[test]
    fn earth_rate_components() {
        let rate = earth_rate_lla(90.0);
        assert_approx_eq!(rate[0], 0.0, 1e-9);
        assert_approx_eq!(rate[2], -ROTATION_RATE, 1e-9);
        let rate = earth_rate_lla(0.0);
        assert_approx_eq!(rate[0], ROTATION_RATE, 1e-9);
        assert_approx_eq!(rate[2], 0.0, 1e-9);
    }

    #[test]
    fn transport_rate_stationary_is_zero() {
        let rate = transport_rate(42.0, 120.0, &Vector3::zeros());
        assert_approx_eq!(rate.norm(), 0.0, 1e-12);
    }

    #[test]
    fn navigation_frame_rate_sums_terms() {
        let lat = 30.0;
        let alt = 500.0;
        let vel = Vector3::new(120.0, -35.0, 10.0);
        let total = navigation_frame_rate(lat, alt, &vel);
        let sum = earth_rate_lla(lat) + transport_rate(lat, alt, &vel);
        for i in 0..3 {
            assert_approx_eq!(total[i], sum[i], 1e-10);
        }
    }
}
