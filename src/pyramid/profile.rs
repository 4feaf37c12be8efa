use crate::{
    math::{transform_units, GeoExtent, Srs, MERCATOR_MAX},
    pyramid::TileKey,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const GLOBAL_GEODETIC: &str = "global-geodetic";
pub const SPHERICAL_MERCATOR: &str = "spherical-mercator";

#[derive(Debug)]
struct ProfileData {
    extent: GeoExtent,
    geographic_extent: GeoExtent,
    tiles_wide_at_lod0: u32,
    tiles_high_at_lod0: u32,
    well_known_name: Option<String>,
}

/// A tile pyramid: a spatial reference, a root extent, and the tile grid
/// shape at LOD 0. Cheap to clone (shared handle).
#[derive(Clone, Debug)]
pub struct Profile {
    data: Arc<ProfileData>,
}

impl Profile {
    /// A profile from one of the well-known names.
    ///
    /// `"global-geodetic"` covers (-180, -90)..(180, 90) with 2x1 root
    /// tiles; `"spherical-mercator"` covers the mercator square with one.
    pub fn well_known(name: &str) -> Option<Profile> {
        if name.eq_ignore_ascii_case(GLOBAL_GEODETIC) {
            Some(Self::with_name(
                GeoExtent::new(Srs::WGS84, -180.0, -90.0, 180.0, 90.0),
                2,
                1,
                Some(GLOBAL_GEODETIC.to_string()),
            ))
        } else if name.eq_ignore_ascii_case(SPHERICAL_MERCATOR) {
            Some(Self::with_name(
                GeoExtent::new(
                    Srs::SPHERICAL_MERCATOR,
                    -MERCATOR_MAX,
                    -MERCATOR_MAX,
                    MERCATOR_MAX,
                    MERCATOR_MAX,
                ),
                1,
                1,
                Some(SPHERICAL_MERCATOR.to_string()),
            ))
        } else {
            None
        }
    }

    pub fn global_geodetic() -> Profile {
        Self::well_known(GLOBAL_GEODETIC).unwrap()
    }

    pub fn spherical_mercator() -> Profile {
        Self::well_known(SPHERICAL_MERCATOR).unwrap()
    }

    /// A custom profile over an arbitrary root extent.
    pub fn new(extent: GeoExtent, tiles_wide_at_lod0: u32, tiles_high_at_lod0: u32) -> Profile {
        Self::with_name(extent, tiles_wide_at_lod0, tiles_high_at_lod0, None)
    }

    fn with_name(
        extent: GeoExtent,
        tx: u32,
        ty: u32,
        well_known_name: Option<String>,
    ) -> Profile {
        let geographic_extent = if extent.srs().is_geodetic() {
            extent
        } else {
            extent.transform(extent.srs().geodetic_srs())
        };

        Profile {
            data: Arc::new(ProfileData {
                extent,
                geographic_extent,
                tiles_wide_at_lod0: tx.max(1),
                tiles_high_at_lod0: ty.max(1),
                well_known_name,
            }),
        }
    }

    pub fn srs(&self) -> Srs {
        self.data.extent.srs()
    }

    pub fn extent(&self) -> &GeoExtent {
        &self.data.extent
    }

    /// The root extent expressed in the geodetic reference.
    pub fn geographic_extent(&self) -> &GeoExtent {
        &self.data.geographic_extent
    }

    pub fn well_known_name(&self) -> Option<&str> {
        self.data.well_known_name.as_deref()
    }

    pub fn num_tiles(&self, lod: u32) -> (u32, u32) {
        (
            self.data.tiles_wide_at_lod0 << lod,
            self.data.tiles_high_at_lod0 << lod,
        )
    }

    pub fn tile_dimensions(&self, lod: u32) -> (f64, f64) {
        // computed in floating point; the LOD search below may probe
        // deeper than a u32 tile count can represent
        let factor = 2f64.powi(lod as i32);
        (
            self.data.extent.width() / self.data.tiles_wide_at_lod0 as f64 / factor,
            self.data.extent.height() / self.data.tiles_high_at_lod0 as f64 / factor,
        )
    }

    /// The extent of one tile. Row 0 sits at the top of the root extent.
    pub fn tile_extent(&self, lod: u32, x: u32, y: u32) -> GeoExtent {
        let (width, height) = self.tile_dimensions(lod);
        let (xmin_root, _, _, ymax_root) = self.data.extent.bounds();

        let xmin = xmin_root + width * x as f64;
        let ymax = ymax_root - height * y as f64;

        GeoExtent::new(self.srs(), xmin, ymax - height, xmin + width, ymax)
    }

    pub fn root_keys(&self) -> Vec<TileKey> {
        self.all_keys_at_lod(0)
    }

    pub fn all_keys_at_lod(&self, lod: u32) -> Vec<TileKey> {
        let (tx, ty) = self.num_tiles(lod);
        let mut keys = Vec::with_capacity((tx * ty) as usize);
        for x in 0..tx {
            for y in 0..ty {
                keys.push(TileKey::new(lod, x, y, self.clone()));
            }
        }
        keys
    }

    /// The smallest LOD whose tiles meet the given horizontal resolution
    /// (units per pixel) at the given tile size.
    pub fn lod_for_horiz_resolution(&self, resolution: f64, tile_size: u32) -> u32 {
        if tile_size == 0 || resolution <= 0.0 {
            return 23;
        }

        let mut tile_res =
            (self.data.extent.width() / self.data.tiles_wide_at_lod0 as f64) / tile_size as f64;
        let mut lod = 0;
        while tile_res > resolution {
            lod += 1;
            tile_res *= 0.5;
        }
        lod
    }

    /// The LOD in this profile whose tile height most closely matches an
    /// `rhs_lod` tile of `rhs`, converting units through the SRS.
    pub fn equivalent_lod(&self, rhs: &Profile, rhs_lod: u32) -> u32 {
        if self == rhs {
            return rhs_lod;
        }

        // geodetic and mercator pyramids line up level for level
        let names = (self.well_known_name(), rhs.well_known_name());
        if matches!(
            names,
            (Some(GLOBAL_GEODETIC), Some(SPHERICAL_MERCATOR))
                | (Some(SPHERICAL_MERCATOR), Some(GLOBAL_GEODETIC))
        ) {
            return rhs_lod;
        }

        let (_, rhs_height) = rhs.tile_dimensions(rhs_lod);
        if rhs_height <= 0.0 {
            return rhs_lod;
        }

        let target_height = transform_units(rhs_height, &rhs.srs(), &self.srs(), 0.0);

        let mut lod = 0;
        let mut best = 0;
        let mut delta = f64::MAX;
        loop {
            let (_, height) = self.tile_dimensions(lod);
            let d = (height - target_height).abs();
            if d < delta {
                delta = d;
                best = lod;
            } else {
                break;
            }
            lod += 1;
        }
        best
    }

    /// Transforms an extent into this profile's SRS, clamped to the
    /// profile's root extent. If the direct transform degenerates (e.g.
    /// mercator cannot represent the poles), fall back through the
    /// geodetic reference, clamp there, and retransform.
    pub fn clamp_and_transform_extent(&self, input: &GeoExtent) -> GeoExtent {
        if !input.valid() {
            return GeoExtent::INVALID;
        }

        if input.is_whole_earth() {
            return *self.extent();
        }

        let in_my_srs = input.transform(self.srs());
        if in_my_srs.valid() {
            return in_my_srs.intersection_same_srs(self.extent());
        }

        // plan B through lat/long
        let geo_srs = self.srs().geodetic_srs();
        let gcs_input = if input.srs().is_geodetic() {
            *input
        } else {
            input.transform(geo_srs)
        };

        if !gcs_input.valid() || !gcs_input.intersects(self.geographic_extent()) {
            return GeoExtent::INVALID;
        }

        let ge = self.geographic_extent();
        let (gxmin, gymin, gxmax, gymax) = ge.bounds();
        let (ixmin, iymin, ixmax, iymax) = gcs_input.bounds();

        let clamped = GeoExtent::new(
            geo_srs,
            ixmin.clamp(gxmin, gxmax),
            iymin.clamp(gymin, gymax),
            ixmax.clamp(gxmin, gxmax),
            iymax.clamp(gymin, gymax),
        );

        clamped.transform(self.srs())
    }

    /// Transforms the input into this profile's SRS and splits the result
    /// at the antimeridian if it wraps.
    pub fn transform_and_extract_contiguous_extents(
        &self,
        input: &GeoExtent,
    ) -> Option<Vec<GeoExtent>> {
        if !input.valid() {
            return None;
        }

        let target = if self.srs().horizontally_equivalent_to(&input.srs()) {
            *input
        } else {
            self.clamp_and_transform_extent(input)
        };

        if !target.valid() {
            return None;
        }

        Some(match target.split_across_antimeridian() {
            Some((w, e)) => vec![w, e],
            None => vec![target],
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("profile serialization is infallible")
    }

    pub fn from_json(json: &str) -> anyhow::Result<Profile> {
        Ok(serde_json::from_str(json)?)
    }
}

impl PartialEq for Profile {
    fn eq(&self, rhs: &Self) -> bool {
        if Arc::ptr_eq(&self.data, &rhs.data) {
            return true;
        }

        if let (Some(a), Some(b)) = (self.well_known_name(), rhs.well_known_name()) {
            if a == b {
                return true;
            }
        }

        self.data.extent == rhs.data.extent
            && self.data.tiles_wide_at_lod0 == rhs.data.tiles_wide_at_lod0
            && self.data.tiles_high_at_lod0 == rhs.data.tiles_high_at_lod0
    }
}

impl Eq for Profile {}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ProfileRepr {
    WellKnown(String),
    Custom {
        extent: GeoExtent,
        tx: u32,
        ty: u32,
    },
}

impl Serialize for Profile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self.well_known_name() {
            Some(name) => ProfileRepr::WellKnown(name.to_string()),
            None => ProfileRepr::Custom {
                extent: *self.extent(),
                tx: self.data.tiles_wide_at_lod0,
                ty: self.data.tiles_high_at_lod0,
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ProfileRepr::deserialize(deserializer)? {
            ProfileRepr::WellKnown(name) => Profile::well_known(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown profile \"{name}\""))),
            ProfileRepr::Custom { extent, tx, ty } => Ok(Profile::new(extent, tx, ty)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodetic_root_keys() {
        let profile = Profile::global_geodetic();
        let roots = profile.root_keys();

        assert_eq!(roots.len(), 2);
        assert_eq!((roots[0].lod, roots[0].x, roots[0].y), (0, 0, 0));
        assert_eq!((roots[1].lod, roots[1].x, roots[1].y), (0, 1, 0));

        assert_eq!(
            roots[0].extent(),
            GeoExtent::new(Srs::WGS84, -180.0, -90.0, 0.0, 90.0)
        );
        assert_eq!(
            roots[1].extent(),
            GeoExtent::new(Srs::WGS84, 0.0, -90.0, 180.0, 90.0)
        );
    }

    #[test]
    fn tile_counts_double_per_lod() {
        let profile = Profile::global_geodetic();
        assert_eq!(profile.num_tiles(0), (2, 1));
        assert_eq!(profile.num_tiles(3), (16, 8));

        let (w, h) = profile.tile_dimensions(3);
        assert!((w - 180.0 / 8.0).abs() < 1e-12);
        assert!((h - 180.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn tile_rows_count_from_the_top() {
        let profile = Profile::global_geodetic();
        let top = profile.tile_extent(1, 0, 0);
        let bottom = profile.tile_extent(1, 0, 1);

        assert!((top.north() - 90.0).abs() < 1e-12);
        assert!((bottom.south() - -90.0).abs() < 1e-12);
    }

    #[test]
    fn lod_for_horiz_resolution_matches_halving() {
        let profile = Profile::global_geodetic();
        // lod 0 tile is 90 degrees wide over 256 pixels
        let lod0_res = 90.0 / 256.0;
        assert_eq!(profile.lod_for_horiz_resolution(lod0_res, 256), 0);
        assert_eq!(profile.lod_for_horiz_resolution(lod0_res / 2.0, 256), 1);
        assert_eq!(profile.lod_for_horiz_resolution(lod0_res / 16.0, 256), 4);
    }

    #[test]
    fn equivalent_lod_between_wellknown_profiles() {
        let geodetic = Profile::global_geodetic();
        let mercator = Profile::spherical_mercator();
        assert_eq!(geodetic.equivalent_lod(&mercator, 7), 7);
        assert_eq!(mercator.equivalent_lod(&geodetic, 3), 3);
    }

    #[test]
    fn clamp_and_transform_survives_pole_extent() {
        let mercator = Profile::spherical_mercator();
        let over_pole = GeoExtent::new(Srs::WGS84, -10.0, 80.0, 10.0, 90.0);

        // the direct transform degenerates; the geodetic fallback clamps
        let clamped = mercator.clamp_and_transform_extent(&over_pole);
        assert!(clamped.valid());
        assert!(clamped.north() <= MERCATOR_MAX + 1.0);
    }

    #[test]
    fn json_round_trip() {
        for profile in [
            Profile::global_geodetic(),
            Profile::spherical_mercator(),
            Profile::new(GeoExtent::new(Srs::WGS84, 0.0, 0.0, 90.0, 45.0), 2, 1),
        ] {
            let json = profile.to_json();
            let back = Profile::from_json(&json).unwrap();
            assert_eq!(profile, back, "round trip failed for {json}");
        }
    }
}
