use crate::math::{DSphere, Srs};
use bevy::math::{DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge snapping tolerance for extent arithmetic.
const EPSILON: f64 = 1e-6;

/// Snapping tolerance for the antimeridian itself.
const WRAP_EPSILON: f64 = 1e-8;

fn is_valid(n: f64) -> bool {
    !n.is_nan() && n != f64::MAX && n != -f64::MAX
}

/// An SRS-aware axis-aligned 2D extent, stored as origin + size.
///
/// In a geodetic reference the extent may wrap the antimeridian, in which
/// case `east() < west()`. Width never exceeds 360 degrees.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct GeoExtent {
    srs: Srs,
    west: f64,
    south: f64,
    width: f64,
    height: f64,
}

impl Default for GeoExtent {
    fn default() -> Self {
        Self::INVALID
    }
}

impl GeoExtent {
    pub const INVALID: GeoExtent = GeoExtent {
        srs: Srs::Wgs84,
        west: 0.0,
        south: 0.0,
        width: -1.0,
        height: -1.0,
    };

    pub fn new(srs: Srs, west: f64, south: f64, east: f64, north: f64) -> Self {
        let mut extent = GeoExtent {
            srs,
            ..Self::INVALID
        };
        extent.set(west, south, east, north);
        extent
    }

    fn set(&mut self, west: f64, south: f64, mut east: f64, north: f64) {
        if !is_valid(west) || !is_valid(south) || !is_valid(east) || !is_valid(north) || south > north
        {
            self.west = 0.0;
            self.south = 0.0;
            self.width = -1.0;
            self.height = -1.0;
            return;
        }

        // in this frame east is always east of west; if it appears not to
        // be, the extent crosses the antimeridian
        let west = self.normalize_x(west);
        if self.srs.is_geodetic() {
            while east < west {
                east += 360.0;
            }
        }

        self.set_origin_and_size(west, south, (east - west).max(0.0), (north - south).max(0.0));
    }

    fn set_origin_and_size(&mut self, west: f64, south: f64, width: f64, height: f64) {
        self.west = west;
        self.south = south;
        self.width = width;
        self.height = height;
        self.clamp();
    }

    pub fn valid(&self) -> bool {
        self.width >= 0.0 && self.height >= 0.0
    }

    pub fn srs(&self) -> Srs {
        self.srs
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    /// Eastern edge, wrapped into (-180, 180] so that an extent ending
    /// exactly on the antimeridian does not read as crossing it.
    pub fn east(&self) -> f64 {
        let mut east = self.west + self.width;
        if self.srs.is_geodetic() {
            while east > 180.0 {
                east -= 360.0;
            }
            while east <= -180.0 {
                east += 360.0;
            }
        }
        east
    }

    pub fn north(&self) -> f64 {
        self.south + self.height
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Bounds as (xmin, ymin, xmax, ymax), without antimeridian wrapping.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.west,
            self.south,
            self.west + self.width,
            self.south + self.height,
        )
    }

    pub fn centroid(&self) -> (f64, f64) {
        (
            self.normalize_x(self.west + 0.5 * self.width),
            self.south + 0.5 * self.height,
        )
    }

    pub fn is_whole_earth(&self) -> bool {
        self.srs.is_geodetic() && self.width == 360.0 && self.height == 180.0
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.srs.is_geodetic() && self.valid() && self.east() < self.west()
    }

    /// Brings an X coordinate into this extent's legal range. Geodetic X
    /// snaps to -180 near either end of the antimeridian and otherwise
    /// wraps into [-180, 180).
    pub fn normalize_x(&self, x: f64) -> f64 {
        if !is_valid(x) || !self.srs.is_geodetic() {
            return x;
        }

        if (x - -180.0).abs() < WRAP_EPSILON || (x - 180.0).abs() < WRAP_EPSILON {
            return -180.0;
        }

        let mut x = x;
        while x < -180.0 {
            x += 360.0;
        }
        while x >= 180.0 {
            x -= 360.0;
        }
        x
    }

    /// Snaps near-integer edges and clamps to the legal geodetic range.
    fn clamp(&mut self) {
        for v in [
            &mut self.west,
            &mut self.south,
            &mut self.width,
            &mut self.height,
        ] {
            if (*v - v.floor()).abs() < EPSILON {
                *v = v.floor();
            } else if (*v - v.ceil()).abs() < EPSILON {
                *v = v.ceil();
            }
        }

        if self.srs.is_geodetic() {
            self.width = self.width.clamp(0.0, 360.0);

            if self.south < -90.0 {
                self.height -= -90.0 - self.south;
                self.south = -90.0;
            } else if self.north() > 90.0 {
                self.height -= self.north() - 90.0;
            }

            self.height = self.height.clamp(0.0, 180.0);
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.contains_in(x, y, None)
    }

    /// Point containment, reprojecting `(x, y)` from `xy_srs` if given.
    pub fn contains_in(&self, x: f64, y: f64, xy_srs: Option<Srs>) -> bool {
        if !self.valid() || !is_valid(x) || !is_valid(y) {
            return false;
        }

        if let Some(from) = xy_srs {
            if !from.horizontally_equivalent_to(&self.srs) {
                return match from.to(self.srs).transform(DVec3::new(x, y, 0.0)) {
                    Some(p) => self.contains_in(p.x, p.y, None),
                    None => false,
                };
            }
        }

        // quantize to absorb tiny rounding errors
        let mut local_y = y;
        if (self.south - local_y).abs() < EPSILON {
            local_y = self.south;
        }
        if (self.north() - local_y).abs() < EPSILON {
            local_y = self.north();
        }

        if local_y < self.south || local_y > self.north() {
            return false;
        }

        let mut local_x = self.normalize_x(x);
        if (self.west - local_x).abs() < EPSILON {
            local_x = self.west;
        }
        if (self.east() - local_x).abs() < EPSILON {
            local_x = self.east();
        }

        // test both intervals to account for the antimeridian wrap
        let (a0, a1) = (self.west, self.west + self.width);
        let (b0, b1) = (self.east() - self.width, self.east());
        (a0 <= local_x && local_x <= a1) || (b0 <= local_x && local_x <= b1)
    }

    pub fn contains_extent(&self, rhs: &GeoExtent) -> bool {
        let (cx, cy) = match rhs.valid() {
            true => rhs.centroid(),
            false => return false,
        };

        self.valid()
            && self.contains_in(rhs.west(), rhs.south(), Some(rhs.srs))
            && self.contains_in(rhs.east(), rhs.north(), Some(rhs.srs))
            && self.contains_in(cx, cy, Some(rhs.srs))
    }

    pub fn intersects(&self, rhs: &GeoExtent) -> bool {
        if !self.valid() || !rhs.valid() {
            return false;
        }

        // reproject through the geodetic reference when the frames differ
        if !self.srs.horizontally_equivalent_to(&rhs.srs) {
            let geo = self.srs.geodetic_srs();
            return self.transform(geo).intersects(&rhs.transform(geo));
        }

        // trivial reject on Y first
        if self.south >= rhs.north() || self.north() <= rhs.south() {
            return false;
        }

        if !self.srs.is_geodetic() {
            return !(self.west >= rhs.east() || self.east() <= rhs.west());
        }

        // geodetic: compare both unwrapped intervals of both extents
        let overlaps = |a: f64, b: f64, c: f64, d: f64| !(b <= c || a >= d);

        let (a0, a1) = (self.east() - self.width, self.east());
        let (b0, b1) = (self.west, self.west + self.width);
        let (c0, c1) = (rhs.east() - rhs.width, rhs.east());
        let (d0, d1) = (rhs.west, rhs.west + rhs.width);

        overlaps(a0, a1, c0, c1)
            || overlaps(a0, a1, d0, d1)
            || overlaps(b0, b1, c0, c1)
            || overlaps(b0, b1, d0, d1)
    }

    /// Intersection assuming both extents share an SRS.
    pub fn intersection_same_srs(&self, rhs: &GeoExtent) -> GeoExtent {
        if !self.valid() || !rhs.valid() || !self.intersects(rhs) {
            return GeoExtent::INVALID;
        }

        let mut result = *self;

        if self.srs.is_geodetic() {
            if self.width == 360.0 {
                result.west = rhs.west;
                result.width = rhs.width;
            } else if rhs.width == 360.0 {
                // keep our own X interval
            } else if self.west < self.east() && rhs.west < rhs.east() {
                // no antimeridian involvement
                result.west = self.west.max(rhs.west);
                result.width = self.east().min(rhs.east()) - result.west;
            } else {
                let mut lhs_west = self.west;
                let mut rhs_west = rhs.west;

                if (self.west - rhs.west).abs() >= 180.0 {
                    if self.west < rhs.west {
                        lhs_west += 360.0;
                    } else {
                        rhs_west += 360.0;
                    }
                }

                let new_west = lhs_west.max(rhs_west);
                result.west = self.normalize_x(new_west);
                result.width =
                    (lhs_west + self.width).min(rhs_west + rhs.width) - new_west;
            }
        } else {
            result.west = self.west.max(rhs.west);
            result.width = (self.west + self.width).min(rhs.west + rhs.width) - result.west;
        }

        result.south = self.south.max(rhs.south);
        result.height = self.north().min(rhs.north()) - result.south;
        result.clamp();

        if result.width < 0.0 || result.height < 0.0 {
            GeoExtent::INVALID
        } else {
            result
        }
    }

    /// Grows the extent to include a point. In a geodetic frame the
    /// expansion direction that yields the smaller resulting width wins,
    /// which may wrap the result across the antimeridian.
    pub fn expand_to_include(&mut self, x: f64, y: f64) {
        if !is_valid(x) || !is_valid(y) {
            return;
        }

        let x = self.normalize_x(x);

        if !self.valid() {
            self.set(x, y, x, y);
            return;
        }

        let (cx, cy) = self.centroid();
        let contains_x = self.contains(x, cy);
        let contains_y = self.contains(cx, y);

        if !contains_y {
            if y < self.south {
                self.height += self.south - y;
                self.south = y;
            } else if y > self.north() {
                self.height = y - self.south;
            }
        }

        if !contains_x {
            if self.srs.is_geodetic() {
                // the unwrapped interval is [west, west + width]
                let east_unwrapped = self.west + self.width;

                let west_direct = self.west.min(x);
                let width_direct = east_unwrapped.max(x) - west_direct;

                // the wrap candidate shifts the point by a full revolution
                // to approach the extent from the other side
                let (west_wrap, width_wrap) = if x < self.west {
                    (self.west, east_unwrapped.max(x + 360.0) - self.west)
                } else {
                    (x, east_unwrapped + 360.0 - x)
                };

                if width_wrap < width_direct {
                    self.west = self.normalize_x(west_wrap);
                    self.width = width_wrap;
                } else {
                    self.west = west_direct;
                    self.width = width_direct;
                }
            } else if x < self.west {
                self.width += self.west - x;
                self.west = x;
            } else if x > self.east() {
                self.width = x - self.west;
            }
        }

        if !contains_x || !contains_y {
            self.clamp();
        }
    }

    pub fn expand_to_include_extent(&mut self, rhs: &GeoExtent) -> bool {
        if !rhs.valid() {
            return false;
        }

        if !rhs.srs.horizontally_equivalent_to(&self.srs) {
            return self.expand_to_include_extent(&rhs.transform(self.srs));
        }

        if !self.valid() {
            *self = *rhs;
            return true;
        }

        // corners plus centroid; the centroid disambiguates wrapping
        let (cx, cy) = rhs.centroid();
        self.expand_to_include(rhs.west(), rhs.south());
        self.expand_to_include(rhs.east(), rhs.south());
        self.expand_to_include(rhs.east(), rhs.north());
        self.expand_to_include(rhs.west(), rhs.north());
        self.expand_to_include(cx, cy);

        true
    }

    /// Splits a wrapping extent into its western [west, 180) and eastern
    /// [-180, east] halves.
    pub fn split_across_antimeridian(&self) -> Option<(GeoExtent, GeoExtent)> {
        if self.crosses_antimeridian() {
            let mut west_part = *self;
            west_part.set_origin_and_size(self.west, self.south, 180.0 - self.west, self.height);

            let mut east_part = *self;
            east_part.set_origin_and_size(-180.0, self.south, self.east() + 180.0, self.height);

            Some((west_part, east_part))
        } else if !self.srs.is_geodetic() {
            let geo = self.transform(self.srs.geodetic_srs());
            geo.split_across_antimeridian()
                .map(|(w, e)| (w.transform(self.srs), e.transform(self.srs)))
        } else {
            None
        }
    }

    /// Reprojects the extent by sampling the centroid, corners, and edges
    /// and taking the minimum bounding rectangle of the results. Returns
    /// `INVALID` if the transform degenerates.
    pub fn transform(&self, to_srs: Srs) -> GeoExtent {
        if !self.valid() {
            return GeoExtent::INVALID;
        }

        if to_srs.is_geocentric() {
            return self.transform(to_srs.geodetic_srs());
        }

        if self.srs.horizontally_equivalent_to(&to_srs) {
            return *self;
        }

        let (xmin, ymin, xmax, ymax) = self.bounds();
        let mut samples = Vec::with_capacity(25);

        // centroid first; it anchors the wrap check below
        samples.push(DVec3::new(
            xmin + self.width * 0.5,
            ymin + self.height * 0.5,
            0.0,
        ));
        samples.push(DVec3::new(xmin, ymin, 0.0));
        samples.push(DVec3::new(xmin, ymax, 0.0));
        samples.push(DVec3::new(xmax, ymax, 0.0));
        samples.push(DVec3::new(xmax, ymin, 0.0));

        // edge samples catch projections that bow the box edges outward
        const N: usize = 5;
        for i in 0..N {
            let fx = xmin + self.width * i as f64 / (N - 1) as f64;
            let fy = ymin + self.height * i as f64 / (N - 1) as f64;
            samples.push(DVec3::new(xmin, fy, 0.0));
            samples.push(DVec3::new(xmax, fy, 0.0));
            samples.push(DVec3::new(fx, ymin, 0.0));
            samples.push(DVec3::new(fx, ymax, 0.0));
        }

        let xform = self.srs.to(to_srs);
        if !xform.transform_range(&mut samples) {
            return GeoExtent::INVALID;
        }

        let mut out_xmin = f64::MAX;
        let mut out_ymin = f64::MAX;
        let mut out_xmax = -f64::MAX;
        let mut out_ymax = -f64::MAX;

        // a geodetic target can wrap corner points past the centroid
        if to_srs.is_geodetic() {
            if samples[1].x > samples[0].x || samples[2].x > samples[0].x {
                out_xmin = -180.0;
            }
            if samples[3].x < samples[0].x || samples[4].x < samples[0].x {
                out_xmax = 180.0;
            }
        }

        for p in &samples {
            out_xmin = out_xmin.min(p.x);
            out_ymin = out_ymin.min(p.y);
            out_xmax = out_xmax.max(p.x);
            out_ymax = out_ymax.max(p.y);
        }

        if to_srs.is_geodetic() {
            out_xmin = out_xmin.max(-180.0);
            out_ymin = out_ymin.max(-90.0);
            out_xmax = out_xmax.min(180.0);
            out_ymax = out_ymax.min(90.0);
        }

        GeoExtent::new(to_srs, out_xmin, out_ymin, out_xmax, out_ymax)
    }

    /// Bounding sphere of the extent in world (ECEF) space, sampled over a
    /// 7x7 grid at both elevation limits.
    pub fn create_world_bounding_sphere(&self, min_elev: f64, max_elev: f64) -> DSphere {
        if self.srs.is_projected() {
            let (xmin, ymin, xmax, ymax) = self.bounds();
            let lo = DVec3::new(xmin, ymin, min_elev);
            let hi = DVec3::new(xmax, ymax, max_elev);
            return DSphere {
                center: (lo + hi) * 0.5,
                radius: (hi - lo).length() * 0.5,
            };
        }

        const SAMPLES: usize = 7;
        let mut points = Vec::with_capacity(SAMPLES * SAMPLES * 2);
        let (xmin, ymin, ..) = self.bounds();

        let x_step = self.width / (SAMPLES - 1) as f64;
        let y_step = self.height / (SAMPLES - 1) as f64;

        for c in 0..SAMPLES {
            let x = xmin + c as f64 * x_step;
            for r in 0..SAMPLES {
                let y = ymin + r as f64 * y_step;
                points.push(DVec3::new(x, y, min_elev));
                points.push(DVec3::new(x, y, max_elev));
            }
        }

        // geodetic to ECEF cannot fail
        let _ = self.srs.to(Srs::ECEF).transform_range(&mut points);

        let mut lo = DVec3::splat(f64::MAX);
        let mut hi = DVec3::splat(-f64::MAX);
        for p in &points {
            lo = lo.min(*p);
            hi = hi.max(*p);
        }

        let center = (lo + hi) * 0.5;
        let radius2 = points
            .iter()
            .map(|p| (*p - center).length_squared())
            .fold(0.0, f64::max);

        DSphere {
            center,
            radius: radius2.sqrt(),
        }
    }

    /// A matrix mapping this extent's unit UV square into the sub-region it
    /// occupies within the `ancestor` extent.
    pub fn scale_bias(&self, ancestor: &GeoExtent) -> DMat4 {
        let scale_x = self.width / ancestor.width;
        let scale_y = self.height / ancestor.height;
        let bias_x = (self.west - ancestor.west) / ancestor.width;
        let bias_y = (self.south - ancestor.south) / ancestor.height;

        DMat4::from_cols(
            DVec4::new(scale_x, 0.0, 0.0, 0.0),
            DVec4::new(0.0, scale_y, 0.0, 0.0),
            DVec4::new(0.0, 0.0, 1.0, 0.0),
            DVec4::new(bias_x, bias_y, 0.0, 1.0),
        )
    }
}

impl PartialEq for GeoExtent {
    fn eq(&self, rhs: &Self) -> bool {
        if !self.valid() && !rhs.valid() {
            return true;
        }
        if !self.valid() || !rhs.valid() {
            return false;
        }

        (self.west - rhs.west).abs() < EPSILON
            && (self.south - rhs.south).abs() < EPSILON
            && (self.width - rhs.width).abs() < EPSILON
            && (self.height - rhs.height).abs() < EPSILON
            && self.srs.horizontally_equivalent_to(&rhs.srs)
    }
}

impl fmt::Display for GeoExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid() {
            write!(f, "INVALID")
        } else {
            write!(
                f,
                "SW={},{} NE={},{} SRS={}",
                self.west(),
                self.south(),
                self.east(),
                self.north(),
                self.srs
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(w: f64, s: f64, e: f64, n: f64) -> GeoExtent {
        GeoExtent::new(Srs::WGS84, w, s, e, n)
    }

    #[test]
    fn clamped_extents_stay_legal() {
        for ext in [
            geo(-180.0, -90.0, 180.0, 90.0),
            geo(170.0, -10.0, 190.0, 10.0),
            geo(-200.0, -95.0, 200.0, 95.0),
            geo(10.0000000001, 20.0, 30.0, 40.0),
        ] {
            assert!(ext.west() >= -180.0 && ext.west() <= 180.0);
            assert!(ext.width() >= 0.0 && ext.width() <= 360.0);
            assert!(ext.south() >= -90.0);
            assert!(ext.south() + ext.height() <= 90.0);
        }
    }

    #[test]
    fn antimeridian_wrap_detection() {
        let ext = geo(170.0, -10.0, -170.0, 10.0);
        assert!(ext.crosses_antimeridian());
        assert!((ext.width() - 20.0).abs() < 1e-9);
        assert!(ext.contains(180.0, 0.0));
        assert!(ext.contains(-175.0, 0.0));
        assert!(!ext.contains(0.0, 0.0));

        assert!(!geo(-10.0, -10.0, 10.0, 10.0).crosses_antimeridian());
    }

    #[test]
    fn split_and_rejoin_preserves_width() {
        let ext = geo(150.0, -20.0, -160.0, 20.0);
        assert!(ext.crosses_antimeridian());

        let (mut w, e) = ext.split_across_antimeridian().unwrap();
        assert!(!w.crosses_antimeridian() && !e.crosses_antimeridian());
        assert!((w.width() + e.width() - ext.width()).abs() < 1e-9);

        w.expand_to_include_extent(&e);
        assert!((w.width() - ext.width()).abs() < 1e-9);
    }

    #[test]
    fn non_crossing_extent_does_not_split() {
        assert!(geo(-10.0, 0.0, 10.0, 5.0).split_across_antimeridian().is_none());
    }

    #[test]
    fn intersects_is_symmetric_and_consistent_with_contains() {
        let a = geo(-20.0, -20.0, 20.0, 20.0);
        let b = geo(-5.0, -5.0, 5.0, 5.0);
        let c = geo(30.0, 30.0, 40.0, 40.0);

        assert!(a.contains_extent(&b));
        assert!(a.intersects(&b) && b.intersects(&a));
        assert!(!a.intersects(&c) && !c.intersects(&a));
    }

    #[test]
    fn intersects_across_antimeridian() {
        let wrap = geo(170.0, -10.0, -170.0, 10.0);
        let east_side = geo(-175.0, -5.0, -160.0, 5.0);
        let far = geo(0.0, -5.0, 10.0, 5.0);

        assert!(wrap.intersects(&east_side));
        assert!(east_side.intersects(&wrap));
        assert!(!wrap.intersects(&far));
    }

    #[test]
    fn intersects_across_srs() {
        let geodetic = geo(-10.0, -10.0, 10.0, 10.0);
        let mercator = geodetic.transform(Srs::SPHERICAL_MERCATOR);
        assert!(mercator.valid());
        assert!(geodetic.intersects(&mercator));
        assert!(mercator.intersects(&geodetic));
    }

    #[test]
    fn transform_fails_past_projection_domain() {
        let poles = geo(-180.0, -90.0, 180.0, 90.0);
        assert!(!poles.transform(Srs::SPHERICAL_MERCATOR).valid());
    }

    #[test]
    fn expand_to_include_prefers_smaller_width() {
        let mut ext = geo(170.0, -10.0, 175.0, 10.0);
        ext.expand_to_include(-175.0, 0.0);
        assert!(ext.crosses_antimeridian());
        assert!((ext.width() - 15.0).abs() < 1e-9);

        let mut ext = geo(-10.0, -10.0, 10.0, 10.0);
        ext.expand_to_include(20.0, 0.0);
        assert!(!ext.crosses_antimeridian());
        assert!((ext.width() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn intersection_same_srs_basics() {
        let a = geo(-20.0, -20.0, 20.0, 20.0);
        let b = geo(0.0, 0.0, 40.0, 40.0);

        let i = a.intersection_same_srs(&b);
        assert_eq!(i, geo(0.0, 0.0, 20.0, 20.0));

        assert!(!a.intersection_same_srs(&geo(50.0, 50.0, 60.0, 60.0)).valid());
    }

    #[test]
    fn scale_bias_of_quadrants() {
        let parent = geo(0.0, 0.0, 10.0, 10.0);
        let lower_left = geo(0.0, 0.0, 5.0, 5.0);
        let upper_right = geo(5.0, 5.0, 10.0, 10.0);

        let m = lower_left.scale_bias(&parent);
        assert!((m.x_axis.x - 0.5).abs() < 1e-12);
        assert!(m.w_axis.x.abs() < 1e-12 && m.w_axis.y.abs() < 1e-12);

        let m = upper_right.scale_bias(&parent);
        assert!((m.w_axis.x - 0.5).abs() < 1e-12);
        assert!((m.w_axis.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn world_bounding_sphere_encloses_corners() {
        let ext = geo(-10.0, -10.0, 10.0, 10.0);
        let sphere = ext.create_world_bounding_sphere(0.0, 1000.0);

        let to_world = Srs::WGS84.to(Srs::ECEF);
        for &(x, y) in &[(-10.0, -10.0), (10.0, 10.0), (0.0, 0.0)] {
            let p = to_world.transform(DVec3::new(x, y, 1000.0)).unwrap();
            assert!((p - sphere.center).length() <= sphere.radius + 1e-6);
        }
    }
}
