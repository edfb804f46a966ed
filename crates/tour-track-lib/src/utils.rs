//! Utility functions for coordinate conversions between WGS84 and the normalized map plane
//!
//! The map plane is the unit square: x grows eastward from 0 (lon -180) to 1 (lon 180),
//! y grows southward from 0 (north edge of Web Mercator) to 1 (south edge).

use std::f64::consts::PI;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Fixed-point factor for [`crate::GeoPoint`] coordinates (1e-6 degree units)
pub const MICRO_DEGREES: f64 = 1_000_000.0;

/// Precomputed constant: 1 / (4 * PI)
const INV_4PI: f64 = 1.0 / (4.0 * PI);

/// Convert a longitude in degrees to plane x in [0, 1]
#[inline(always)]
pub fn longitude_to_plane_x(lon: f64) -> f64 {
    (lon + 180.0) / 360.0
}

/// Convert a latitude in degrees to plane y in [0, 1]
///
/// Latitude is clamped to the valid Web Mercator range first.
#[inline(always)]
pub fn latitude_to_plane_y(lat: f64) -> f64 {
    let sin_lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians().sin();
    0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() * INV_4PI
}

/// Convert WGS84 (lat, lon) to plane (x, y)
#[inline(always)]
pub fn wgs84_to_plane(lat: f64, lon: f64) -> (f64, f64) {
    (longitude_to_plane_x(lon), latitude_to_plane_y(lat))
}

/// Convert plane (x, y) back to WGS84
///
/// # Returns
/// A tuple of (latitude, longitude) in degrees
#[inline(always)]
pub fn plane_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 360.0 - 180.0;
    let lat = 90.0 - 360.0 * ((y - 0.5) * 2.0 * PI).exp().atan() / PI;
    (lat, lon)
}

/// Wrap a plane x difference into (-0.5, 0.5]
///
/// Used to pick the copy of the world closest to the camera.
#[inline]
pub fn wrap_plane_delta(mut dx: f64) -> f64 {
    while dx <= -0.5 {
        dx += 1.0;
    }
    while dx > 0.5 {
        dx -= 1.0;
    }
    dx
}
