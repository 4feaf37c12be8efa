mod profile;
mod tile_key;

pub use crate::pyramid::{
    profile::{Profile, GLOBAL_GEODETIC, SPHERICAL_MERCATOR},
    tile_key::TileKey,
};
