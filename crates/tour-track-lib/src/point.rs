//! Fixed-point geographic coordinate

use crate::utils::MICRO_DEGREES;
use crate::{Result, TrackError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A geographic position stored as signed 1e-6 degree units
///
/// Immutable value type; track order is defined by the containing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoPoint {
    lat_e6: i32,
    lon_e6: i32,
}

impl GeoPoint {
    /// Create a point directly from 1e-6 degree units
    pub const fn from_micro_degrees(lat_e6: i32, lon_e6: i32) -> Self {
        Self { lat_e6, lon_e6 }
    }

    /// Create a point from degrees
    ///
    /// Rejects non-finite values and values outside [-90, 90] x [-180, 180].
    pub fn from_degrees(lat: f64, lon: f64) -> Result<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(TrackError::InvalidCoordinate(format!(
                "non-finite coordinate ({lat}, {lon})"
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(TrackError::InvalidCoordinate(format!(
                "coordinate out of range ({lat}, {lon})"
            )));
        }
        Ok(Self {
            lat_e6: (lat * MICRO_DEGREES).round() as i32,
            lon_e6: (lon * MICRO_DEGREES).round() as i32,
        })
    }

    #[inline]
    pub fn lat_e6(&self) -> i32 {
        self.lat_e6
    }

    #[inline]
    pub fn lon_e6(&self) -> i32 {
        self.lon_e6
    }

    /// Latitude in degrees
    #[inline]
    pub fn latitude(&self) -> f64 {
        self.lat_e6 as f64 / MICRO_DEGREES
    }

    /// Longitude in degrees
    #[inline]
    pub fn longitude(&self) -> f64 {
        self.lon_e6 as f64 / MICRO_DEGREES
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(point: GeoPoint) -> Self {
        geo::Point::new(point.longitude(), point.latitude())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_degrees() {
        let point = GeoPoint::from_degrees(47.376887, 8.541694).unwrap();
        assert_eq!(point.lat_e6(), 47_376_887);
        assert_eq!(point.lon_e6(), 8_541_694);
        assert!((point.latitude() - 47.376887).abs() < 1e-9);
    }

    #[test]
    fn test_from_degrees_rejects_invalid() {
        assert!(GeoPoint::from_degrees(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::from_degrees(91.0, 0.0).is_err());
        assert!(GeoPoint::from_degrees(0.0, -180.5).is_err());
    }

    #[test]
    fn test_into_geo_point() {
        let point: geo::Point<f64> = GeoPoint::from_micro_degrees(1_000_000, -2_000_000).into();
        assert_eq!(point.x(), -2.0);
        assert_eq!(point.y(), 1.0);
    }
}
