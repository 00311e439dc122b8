//! Mount geometry hook for dome slews
//!
//! A dome that blindly follows the telescope azimuth points its slit wrong
//! whenever the optical axis is offset from the dome center. The facade
//! accepts an implementation of [`MountGeometry`] and routes every slew
//! target through it; without one the requested coordinates pass through
//! unchanged.

/// Side of the pier the optical tube currently sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PierSide {
    East,
    West,
}

/// Mount state a geometry correction works from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountCoordinates {
    /// Hour angle in hours
    pub hour_angle: f64,
    /// Declination in degrees
    pub declination: f64,
    /// Site latitude in degrees
    pub latitude: f64,
    pub pier_side: PierSide,
}

/// Source of mount state and the slit-offset correction
pub trait MountGeometry: Send + Sync {
    /// Current mount pointing state
    fn coordinates(&self) -> MountCoordinates;

    /// Correct a requested (altitude, azimuth) target for the offset
    /// between optical axis and dome center, returning the corrected pair
    fn transform(&self, coordinates: &MountCoordinates, altitude: f64, azimuth: f64) -> (f64, f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOffset;

    impl MountGeometry for FixedOffset {
        fn coordinates(&self) -> MountCoordinates {
            MountCoordinates {
                hour_angle: 1.5,
                declination: 45.0,
                latitude: 48.0,
                pier_side: PierSide::West,
            }
        }

        fn transform(
            &self,
            _coordinates: &MountCoordinates,
            altitude: f64,
            azimuth: f64,
        ) -> (f64, f64) {
            (altitude, (azimuth + 3.5) % 360.0)
        }
    }

    #[test]
    fn test_transform_applies_offset() {
        let geometry = FixedOffset;
        let coords = geometry.coordinates();
        let (alt, az) = geometry.transform(&coords, 30.0, 359.0);
        assert_eq!(alt, 30.0);
        assert!((az - 2.5).abs() < 1e-9);
        assert_eq!(coords.pier_side, PierSide::West);
    }
}
