mod ellipsoid;
mod extent;
mod horizon;
mod srs;

pub use crate::math::{
    ellipsoid::Ellipsoid,
    extent::GeoExtent,
    horizon::Horizon,
    srs::{transform_units, Srs, SrsTransform, MERCATOR_MAX, MERCATOR_MAX_LAT},
};

use bevy::math::DVec3;

/// A double-precision bounding sphere.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl DSphere {
    pub fn valid(&self) -> bool {
        self.radius > 0.0
    }

    /// Distance from a point to the sphere surface, zero inside.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        ((point - self.center).length() - self.radius).max(0.0)
    }
}
