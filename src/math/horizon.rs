use crate::math::Ellipsoid;
use bevy::math::DVec3;

/// Ellipsoidal horizon occlusion for geocentric worlds.
///
/// Works in a scaled space where the ellipsoid becomes the unit sphere, so a
/// single dot-product test decides whether a world point is hidden behind
/// the planet from the current eye point.
#[derive(Copy, Clone, Debug)]
pub struct Horizon {
    scale: DVec3,
    eye_scaled: DVec3,
    /// |eye|^2 - 1 in scaled space; negative when the eye is inside the
    /// ellipsoid, in which case nothing is occluded.
    vh_magnitude_squared: f64,
}

impl Horizon {
    pub fn new(ellipsoid: Ellipsoid, eye_world: DVec3) -> Self {
        let scale = DVec3::new(
            1.0 / ellipsoid.semi_major_axis,
            1.0 / ellipsoid.semi_major_axis,
            1.0 / ellipsoid.semi_minor_axis,
        );
        let eye_scaled = eye_world * scale;

        Self {
            scale,
            eye_scaled,
            vh_magnitude_squared: eye_scaled.length_squared() - 1.0,
        }
    }

    /// True when the world-space point is not occluded by the ellipsoid.
    pub fn is_visible(&self, world_point: DVec3) -> bool {
        if self.vh_magnitude_squared <= 0.0 {
            return true;
        }

        let target = world_point * self.scale;

        // vector from the eye to the target, and the eye-to-center direction
        let vt = target - self.eye_scaled;
        let vc = -self.eye_scaled;

        let vt_dot_vc = vt.dot(vc);

        // occluded iff the target lies beyond the horizon plane and inside
        // the shadow cone
        let behind_plane = vt_dot_vc > self.vh_magnitude_squared;
        let inside_cone =
            vt_dot_vc * vt_dot_vc / vt.length_squared().max(1e-30) > self.vh_magnitude_squared;

        !(behind_plane && inside_cone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_under_eye_is_visible() {
        let e = Ellipsoid::WGS84;
        let eye = e.geodetic_to_ecef(DVec3::new(0.0, 0.0, 1_000_000.0));
        let below = e.geodetic_to_ecef(DVec3::new(0.0, 0.0, 0.0));

        assert!(Horizon::new(e, eye).is_visible(below));
    }

    #[test]
    fn antipode_is_hidden() {
        let e = Ellipsoid::WGS84;
        let eye = e.geodetic_to_ecef(DVec3::new(0.0, 0.0, 1_000_000.0));
        let antipode = e.geodetic_to_ecef(DVec3::new(180.0, 0.0, 0.0));

        assert!(!Horizon::new(e, eye).is_visible(antipode));
    }

    #[test]
    fn nothing_hidden_from_inside() {
        let e = Ellipsoid::WGS84;
        let horizon = Horizon::new(e, DVec3::ZERO);
        let anywhere = e.geodetic_to_ecef(DVec3::new(45.0, 45.0, 0.0));

        assert!(horizon.is_visible(anywhere));
    }

    #[test]
    fn high_point_beyond_limb_is_visible() {
        let e = Ellipsoid::WGS84;
        let eye = e.geodetic_to_ecef(DVec3::new(0.0, 0.0, 400_000.0));

        // just past the geometric horizon on the ground, but tall enough
        // to poke above it
        let ground = e.geodetic_to_ecef(DVec3::new(25.0, 0.0, 0.0));
        let peak = e.geodetic_to_ecef(DVec3::new(25.0, 0.0, 60_000.0));

        let horizon = Horizon::new(e, eye);
        assert!(!horizon.is_visible(ground));
        assert!(horizon.is_visible(peak));
    }
}
