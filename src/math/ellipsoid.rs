use bevy::math::{DMat4, DQuat, DVec3};

/// A reference ellipsoid described by its semi-major and semi-minor axes in meters.
///
/// Geodetic coordinates are always (longitude, latitude) in degrees and
/// height in meters above the ellipsoid surface.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ellipsoid {
    pub semi_major_axis: f64,
    pub semi_minor_axis: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        semi_major_axis: 6378137.0,
        semi_minor_axis: 6356752.314245179,
    };

    pub fn eccentricity_squared(&self) -> f64 {
        let a2 = self.semi_major_axis * self.semi_major_axis;
        let b2 = self.semi_minor_axis * self.semi_minor_axis;
        (a2 - b2) / a2
    }

    /// Converts geodetic (lon deg, lat deg, height m) to earth-centered earth-fixed meters.
    pub fn geodetic_to_ecef(&self, geodetic: DVec3) -> DVec3 {
        let lon = geodetic.x.to_radians();
        let lat = geodetic.y.to_radians();
        let height = geodetic.z;

        let e2 = self.eccentricity_squared();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();

        // prime vertical radius of curvature
        let n = self.semi_major_axis / (1.0 - e2 * sin_lat * sin_lat).sqrt();

        DVec3::new(
            (n + height) * cos_lat * lon.cos(),
            (n + height) * cos_lat * lon.sin(),
            (n * (1.0 - e2) + height) * sin_lat,
        )
    }

    /// Converts ECEF meters back to geodetic (lon deg, lat deg, height m)
    /// using Bowring's closed-form approximation, which is accurate to
    /// well under a millimeter for terrestrial points.
    pub fn ecef_to_geodetic(&self, ecef: DVec3) -> DVec3 {
        let a = self.semi_major_axis;
        let b = self.semi_minor_axis;
        let e2 = self.eccentricity_squared();
        let ep2 = (a * a - b * b) / (b * b);

        let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();

        if p < 1e-9 {
            // on the polar axis
            let lat = if ecef.z >= 0.0 { 90.0 } else { -90.0 };
            return DVec3::new(0.0, lat, ecef.z.abs() - b);
        }

        let theta = (ecef.z * a).atan2(p * b);
        let lat = (ecef.z + ep2 * b * theta.sin().powi(3))
            .atan2(p - e2 * a * theta.cos().powi(3));
        let lon = ecef.y.atan2(ecef.x);

        let sin_lat = lat.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let height = p / lat.cos() - n;

        DVec3::new(lon.to_degrees(), lat.to_degrees(), height)
    }

    /// Surface normal (geodetic up) at a geodetic location.
    pub fn geodetic_up(&self, lon_deg: f64, lat_deg: f64) -> DVec3 {
        let lon = lon_deg.to_radians();
        let lat = lat_deg.to_radians();
        DVec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }

    /// Length in meters of one degree of longitude at the given latitude.
    pub fn longitudinal_degrees_to_meters(&self, degrees: f64, lat_deg: f64) -> f64 {
        degrees.to_radians() * self.semi_major_axis * lat_deg.to_radians().cos()
    }

    /// Length in meters of one degree of latitude (spherical approximation).
    pub fn latitudinal_degrees_to_meters(&self, degrees: f64) -> f64 {
        degrees.to_radians() * self.semi_major_axis
    }

    /// The local east-north-up frame at a geodetic location, as a matrix
    /// transforming ENU coordinates into ECEF.
    pub fn enu_frame(&self, lon_deg: f64, lat_deg: f64, height: f64) -> DMat4 {
        let origin = self.geodetic_to_ecef(DVec3::new(lon_deg, lat_deg, height));

        let lon = lon_deg.to_radians();
        let lat = lat_deg.to_radians();

        let east = DVec3::new(-lon.sin(), lon.cos(), 0.0);
        let up = self.geodetic_up(lon_deg, lat_deg);
        let north = up.cross(east).normalize();

        DMat4::from_cols(
            east.extend(0.0),
            north.extend(0.0),
            up.extend(0.0),
            origin.extend(1.0),
        )
    }

    /// Rotation taking the unit Z axis onto the geodetic up at a location,
    /// with the Y axis pointing north.
    pub fn enu_rotation(&self, lon_deg: f64, lat_deg: f64) -> DQuat {
        let frame = self.enu_frame(lon_deg, lat_deg, 0.0);
        DQuat::from_mat4(&DMat4::from_cols(
            frame.x_axis,
            frame.y_axis,
            frame.z_axis,
            DVec3::ZERO.extend(1.0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecef_round_trip() {
        let e = Ellipsoid::WGS84;

        for &(lon, lat, h) in &[
            (0.0, 0.0, 0.0),
            (12.5, 47.9, 1234.0),
            (-122.3, 37.8, -20.0),
            (179.99, -89.0, 0.0),
            (-180.0, 45.0, 8848.0),
        ] {
            let ecef = e.geodetic_to_ecef(DVec3::new(lon, lat, h));
            let back = e.ecef_to_geodetic(ecef);
            let fwd = e.geodetic_to_ecef(back);
            assert!(
                (ecef - fwd).length() < 1e-6,
                "round trip failed for ({lon}, {lat}, {h}): {ecef:?} vs {fwd:?}"
            );
        }
    }

    #[test]
    fn equator_radius() {
        let e = Ellipsoid::WGS84;
        let p = e.geodetic_to_ecef(DVec3::new(0.0, 0.0, 0.0));
        assert!((p.x - 6378137.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6 && p.z.abs() < 1e-6);
    }

    #[test]
    fn enu_frame_axes_are_orthonormal() {
        let e = Ellipsoid::WGS84;
        let frame = e.enu_frame(30.0, 60.0, 0.0);
        let east = frame.x_axis.truncate();
        let north = frame.y_axis.truncate();
        let up = frame.z_axis.truncate();

        assert!((east.length() - 1.0).abs() < 1e-12);
        assert!((north.length() - 1.0).abs() < 1e-12);
        assert!((up.length() - 1.0).abs() < 1e-12);
        assert!(east.dot(north).abs() < 1e-12);
        assert!(east.cross(north).dot(up) > 0.999);
    }
}
