use crate::math::Ellipsoid;
use bevy::math::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Web-mercator extent half-width in meters.
pub const MERCATOR_MAX: f64 = 20037508.342789244;

/// Latitude beyond which the mercator projection is undefined.
pub const MERCATOR_MAX_LAT: f64 = 85.0511287798066;

/// A named spatial reference: an ellipsoid plus a classification of how
/// coordinates relate to it. Values are cheap to copy and compare.
///
/// This engine works with a closed set of references; arbitrary projection
/// databases are the business of a driver, not the terrain core.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Srs {
    /// Geodetic longitude/latitude in degrees on the WGS84 ellipsoid.
    Wgs84,
    /// Projected spherical web-mercator meters (EPSG:3857).
    SphericalMercator,
    /// Geocentric earth-centered earth-fixed meters.
    Ecef,
}

impl Srs {
    pub const WGS84: Srs = Srs::Wgs84;
    pub const SPHERICAL_MERCATOR: Srs = Srs::SphericalMercator;
    pub const ECEF: Srs = Srs::Ecef;

    pub fn is_geodetic(&self) -> bool {
        matches!(self, Srs::Wgs84)
    }

    pub fn is_projected(&self) -> bool {
        matches!(self, Srs::SphericalMercator)
    }

    pub fn is_geocentric(&self) -> bool {
        matches!(self, Srs::Ecef)
    }

    pub fn ellipsoid(&self) -> Ellipsoid {
        Ellipsoid::WGS84
    }

    /// The geodetic reference sharing this reference's ellipsoid.
    pub fn geodetic_srs(&self) -> Srs {
        Srs::Wgs84
    }

    /// Two references are horizontally equivalent when they agree on the
    /// horizontal coordinate meaning, ignoring any vertical datum.
    pub fn horizontally_equivalent_to(&self, rhs: &Srs) -> bool {
        self == rhs
    }

    /// The legal coordinate bounds of this reference as
    /// (xmin, ymin, xmax, ymax).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        match self {
            Srs::Wgs84 => (-180.0, -90.0, 180.0, 90.0),
            Srs::SphericalMercator => (-MERCATOR_MAX, -MERCATOR_MAX, MERCATOR_MAX, MERCATOR_MAX),
            Srs::Ecef => (f64::MIN, f64::MIN, f64::MAX, f64::MAX),
        }
    }

    /// An operator transforming coordinates from this reference to another.
    pub fn to(&self, target: Srs) -> SrsTransform {
        SrsTransform {
            from: *self,
            to: target,
        }
    }
}

impl fmt::Display for Srs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Srs::Wgs84 => write!(f, "wgs84"),
            Srs::SphericalMercator => write!(f, "spherical-mercator"),
            Srs::Ecef => write!(f, "ecef"),
        }
    }
}

/// A pure coordinate transform between two references.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SrsTransform {
    pub from: Srs,
    pub to: Srs,
}

impl SrsTransform {
    /// Transforms a single point, or `None` when the point lies outside the
    /// target projection's domain (e.g. mercator at the poles).
    pub fn transform(&self, p: DVec3) -> Option<DVec3> {
        if self.from == self.to {
            return Some(p);
        }

        // route everything through geodetic
        let geodetic = match self.from {
            Srs::Wgs84 => p,
            Srs::SphericalMercator => mercator_to_geodetic(p),
            Srs::Ecef => self.from.ellipsoid().ecef_to_geodetic(p),
        };

        match self.to {
            Srs::Wgs84 => Some(geodetic),
            Srs::SphericalMercator => geodetic_to_mercator(geodetic),
            Srs::Ecef => Some(self.to.ellipsoid().geodetic_to_ecef(geodetic)),
        }
    }

    /// Transforms a point set in place, failing if any point fails.
    pub fn transform_range(&self, points: &mut [DVec3]) -> bool {
        for p in points.iter_mut() {
            match self.transform(*p) {
                Some(q) => *p = q,
                None => return false,
            }
        }
        true
    }

    /// The inverse operator.
    pub fn inverse(&self) -> SrsTransform {
        SrsTransform {
            from: self.to,
            to: self.from,
        }
    }
}

fn geodetic_to_mercator(p: DVec3) -> Option<DVec3> {
    // tolerate round-trip jitter exactly on the projection boundary
    if p.y.abs() > MERCATOR_MAX_LAT + 1e-9 {
        return None;
    }

    let r = Ellipsoid::WGS84.semi_major_axis;
    let lat = p.y.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = p.x.to_radians() * r;
    let y = (std::f64::consts::FRAC_PI_4 + 0.5 * lat.to_radians()).tan().ln() * r;
    Some(DVec3::new(x, y, p.z))
}

fn mercator_to_geodetic(p: DVec3) -> DVec3 {
    let r = Ellipsoid::WGS84.semi_major_axis;
    let lon = (p.x / r).to_degrees();
    let lat = (2.0 * (p.y / r).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    DVec3::new(lon, lat, p.z)
}

/// Converts a linear distance expressed in `from` units into `to` units,
/// using the given reference latitude when degrees are involved.
pub fn transform_units(value: f64, from: &Srs, to: &Srs, lat_deg: f64) -> f64 {
    match (from.is_geodetic(), to.is_geodetic()) {
        (true, true) | (false, false) => value,
        // degrees -> meters
        (true, false) => from
            .ellipsoid()
            .longitudinal_degrees_to_meters(value, lat_deg),
        // meters -> degrees
        (false, true) => {
            let one_degree = to.ellipsoid().longitudinal_degrees_to_meters(1.0, lat_deg);
            value / one_degree
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercator_round_trip() {
        let to = Srs::WGS84.to(Srs::SPHERICAL_MERCATOR);
        let back = to.inverse();

        for &(lon, lat) in &[(0.0, 0.0), (45.0, 30.0), (-180.0, -60.0), (12.0, 85.0)] {
            let m = to.transform(DVec3::new(lon, lat, 0.0)).unwrap();
            let g = back.transform(m).unwrap();
            assert!((g.x - lon).abs() < 1e-9 && (g.y - lat).abs() < 1e-9);
        }
    }

    #[test]
    fn mercator_rejects_poles() {
        let to = Srs::WGS84.to(Srs::SPHERICAL_MERCATOR);
        assert!(to.transform(DVec3::new(0.0, 90.0, 0.0)).is_none());
        assert!(to.transform(DVec3::new(0.0, -89.0, 0.0)).is_none());
    }

    #[test]
    fn mercator_world_corner() {
        let to = Srs::WGS84.to(Srs::SPHERICAL_MERCATOR);
        let m = to.transform(DVec3::new(180.0, 0.0, 0.0)).unwrap();
        assert!((m.x - MERCATOR_MAX).abs() < 1e-3);
    }

    #[test]
    fn ecef_round_trip_meters() {
        let to = Srs::WGS84.to(Srs::ECEF);
        let back = Srs::ECEF.to(Srs::WGS84);

        let p = DVec3::new(-71.06, 42.36, 12.0);
        let ecef = to.transform(p).unwrap();
        let rt = to.transform(back.transform(ecef).unwrap()).unwrap();
        assert!((ecef - rt).length() < 1e-6);
    }

    #[test]
    fn identity_transform() {
        let t = Srs::WGS84.to(Srs::WGS84);
        let p = DVec3::new(1.0, 2.0, 3.0);
        assert_eq!(t.transform(p), Some(p));
    }
}
