//! The paging side of the terrain: tile models and their factory, the
//! shared tile geometry, the per-tile scene nodes, and the pager that
//! decides which tiles exist.

pub mod geometry_pool;
pub mod model_factory;
pub mod pager;
pub mod tile_model;
pub mod tile_node;
pub mod tracker;

pub use crate::terrain_data::{
    geometry_pool::{GeometryKey, GeometryPool},
    model_factory::{CreateTileManifest, MapSnapshot, TileModelFactory},
    pager::TilePager,
    tile_model::{
        quadrant_scale_bias, ColorLayerModel, ElevationModel, NormalModel, RenderBinding,
        TerrainTileRenderModel, TileModel,
    },
    tile_node::{should_subdivide, NewSubtile, SurfaceNode, TileNode},
    tracker::SentryTracker,
};
