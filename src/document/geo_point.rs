use crate::database::error::{invalid_argument, DatabaseResult};

/// Latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> DatabaseResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(invalid_argument("Latitude must be between -90 and 90 degrees."));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid_argument("Longitude must be between -180 and 180 degrees."));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_coordinates() {
        let point = GeoPoint::new(48.85, 2.35).unwrap();
        assert_eq!(point.latitude(), 48.85);
        assert_eq!(point.longitude(), 2.35);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert_eq!(
            GeoPoint::new(100.0, 0.0).unwrap_err().code_str(),
            "database/invalid-argument"
        );
        assert!(GeoPoint::new(0.0, -180.5).is_err());
    }
}
