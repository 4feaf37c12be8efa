//! Streaming geospatial globe terrain for the Bevy Engine.
//!
//! This crate renders the surface of a planet (or a projected map) as a
//! hierarchical quadtree of textured, elevation-deformed tiles, streaming
//! imagery and height data from georeferenced sources on demand and
//! drawing only the tiles the current views actually need.
//!
//! # How it fits together
//!
//! ## Addressing the planet
//! A [`Profile`](pyramid::Profile) defines a tile pyramid: a spatial
//! reference ([`Srs`](math::Srs)), a root extent, and the root grid
//! shape. Every tile is addressed by a [`TileKey`](pyramid::TileKey),
//! and [`GeoExtent`](math::GeoExtent) handles the SRS-aware extent
//! arithmetic, antimeridian wrap included.
//!
//! ## Getting data
//! A [`Map`](map::Map) is an ordered, revisioned stack of
//! [`Layer`](layer::Layer)s. Each layer wraps a tile source driver (an
//! MBTiles store ships in [`layer::mbtiles`]) behind a uniform
//! `read(key) -> raster` contract. The
//! [`TileModelFactory`](terrain_data::TileModelFactory) composites a key
//! against the stack into a per-tile bundle of color, elevation, and
//! normal rasters, walking up the pyramid when a layer has no data at
//! the requested level.
//!
//! ## Paging and drawing
//! The [`TilePager`](terrain_data::TilePager) owns every resident tile.
//! During the record pass each view walks the resident quadtree, decides
//! subdivision by screen-space size, and pings what it touches; the
//! update pass dispatches prioritized async loads, merges finished
//! results into the scene one step per frame, and expires tiles nobody
//! pinged. Tile surfaces are plain Bevy entities sharing pooled meshes
//! and a per-tile [`TerrainTileMaterial`](render::TerrainTileMaterial).

pub mod jobs;
pub mod layer;
pub mod map;
pub mod math;
pub mod plugin;
pub mod pyramid;
pub mod raster;
pub mod render;
pub mod terrain;
pub mod terrain_data;
pub mod terrain_view;

pub mod prelude {
    //! `use bevy_globe_terrain::prelude::*;` to import the common types.
    pub use crate::{
        layer::{
            mbtiles::{MbtilesElevationSource, MbtilesImageSource, MbtilesOptions},
            ElevationLayer, ImageLayer, IoContext, Layer,
        },
        map::Map,
        math::{GeoExtent, Srs},
        plugin::{TerrainPlugin, TerrainSettings},
        pyramid::{Profile, TileKey},
        raster::{GeoHeightfield, GeoRaster, Heightfield, Interpolation, Raster},
        terrain::{Terrain, TerrainConfig},
        terrain_data::TilePager,
        terrain_view::TerrainView,
    };
}
