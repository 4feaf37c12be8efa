use crate::{math::GeoExtent, pyramid::Profile};
use std::fmt;
use std::hash::{Hash, Hasher};

/// The address of one tile in a pyramid: `(lod, x, y)` plus the profile
/// that defines the pyramid. Y grows downward (row 0 at the top).
#[derive(Clone, Debug)]
pub struct TileKey {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
    pub profile: Profile,
}

impl TileKey {
    pub fn new(lod: u32, x: u32, y: u32, profile: Profile) -> Self {
        Self { lod, x, y, profile }
    }

    pub fn valid(&self) -> bool {
        let (tx, ty) = self.profile.num_tiles(self.lod);
        self.x < tx && self.y < ty
    }

    pub fn extent(&self) -> GeoExtent {
        self.profile.tile_extent(self.lod, self.x, self.y)
    }

    /// The quadrant this key occupies within its parent:
    /// 0 = upper-left, 1 = upper-right, 2 = lower-left, 3 = lower-right.
    pub fn quadrant(&self) -> u32 {
        (self.x & 1) | ((self.y & 1) << 1)
    }

    pub fn child(&self, quadrant: u32) -> TileKey {
        debug_assert!(quadrant < 4);
        TileKey {
            lod: self.lod + 1,
            x: (self.x << 1) + (quadrant & 1),
            y: (self.y << 1) + (quadrant >> 1),
            profile: self.profile.clone(),
        }
    }

    pub fn children(&self) -> impl Iterator<Item = TileKey> + '_ {
        (0..4).map(|q| self.child(q))
    }

    pub fn parent(&self) -> Option<TileKey> {
        self.lod.checked_sub(1).map(|lod| TileKey {
            lod,
            x: self.x >> 1,
            y: self.y >> 1,
            profile: self.profile.clone(),
        })
    }

    /// The ancestor at the given (coarser or equal) lod.
    pub fn ancestor(&self, lod: u32) -> Option<TileKey> {
        if lod > self.lod {
            return None;
        }
        let delta = self.lod - lod;
        Some(TileKey {
            lod,
            x: self.x >> delta,
            y: self.y >> delta,
            profile: self.profile.clone(),
        })
    }
}

impl PartialEq for TileKey {
    fn eq(&self, rhs: &Self) -> bool {
        self.lod == rhs.lod && self.x == rhs.x && self.y == rhs.y && self.profile == rhs.profile
    }
}

impl Eq for TileKey {}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // the profile is invariant within one pager, so the address alone
        // is a sufficient hash
        self.lod.hash(state);
        self.x.hash(state);
        self.y.hash(state);
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.lod, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(lod: u32, x: u32, y: u32) -> TileKey {
        TileKey::new(lod, x, y, Profile::global_geodetic())
    }

    #[test]
    fn child_parent_round_trip() {
        let parent = key(4, 9, 5);
        for q in 0..4 {
            assert_eq!(parent.child(q).parent().unwrap(), parent);
            assert_eq!(parent.child(q).quadrant(), q);
        }
    }

    #[test]
    fn child_extents_tile_the_parent() {
        let parent = key(3, 5, 2);
        let pe = parent.extent();

        let mut union = GeoExtent::INVALID;
        let mut area = 0.0;
        for child in parent.children() {
            let ce = child.extent();
            assert!(pe.contains_extent(&ce));
            union.expand_to_include_extent(&ce);
            area += ce.width() * ce.height();
        }

        assert!((union.west() - pe.west()).abs() < 1e-9);
        assert!((union.south() - pe.south()).abs() < 1e-9);
        assert!((union.width() - pe.width()).abs() < 1e-9);
        assert!((union.height() - pe.height()).abs() < 1e-9);
        assert!((area - pe.width() * pe.height()).abs() < 1e-9);
    }

    #[test]
    fn quadrant_zero_is_upper_left() {
        let parent = key(2, 1, 1);
        let child = parent.child(0);
        let pe = parent.extent();
        let ce = child.extent();

        assert!((ce.west() - pe.west()).abs() < 1e-12);
        assert!((ce.north() - pe.north()).abs() < 1e-12);
    }

    #[test]
    fn ancestor_walk() {
        let k = key(7, 40, 30);
        let a = k.ancestor(5).unwrap();
        assert_eq!((a.lod, a.x, a.y), (5, 10, 7));
        assert_eq!(k.ancestor(7).unwrap(), k);
        assert!(k.ancestor(8).is_none());
    }

    #[test]
    fn validity_respects_grid_shape() {
        assert!(key(0, 1, 0).valid());
        assert!(!key(0, 2, 0).valid());
        assert!(!key(0, 0, 1).valid());
        assert!(key(1, 3, 1).valid());
    }
}
