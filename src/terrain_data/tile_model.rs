use crate::{
    pyramid::TileKey,
    raster::{Heightfield, Raster},
};
use bevy::math::{DMat4, DVec4};
use std::sync::Arc;

/// Scale/bias matrices carrying a child quadrant's UV square into the
/// matching quarter of its parent's rasters.
/// Quadrants: 0 = upper-left, 1 = upper-right, 2 = lower-left, 3 = lower-right.
pub fn quadrant_scale_bias(quadrant: u32) -> DMat4 {
    let (bias_x, bias_y) = match quadrant {
        0 => (0.0, 0.5),
        1 => (0.5, 0.5),
        2 => (0.0, 0.0),
        _ => (0.5, 0.0),
    };

    DMat4::from_cols(
        DVec4::new(0.5, 0.0, 0.0, 0.0),
        DVec4::new(0.0, 0.5, 0.0, 0.0),
        DVec4::new(0.0, 0.0, 1.0, 0.0),
        DVec4::new(bias_x, bias_y, 0.0, 1.0),
    )
}

/// One color layer's contribution to a tile.
#[derive(Clone, Debug)]
pub struct ColorLayerModel {
    pub layer_uid: i32,
    /// The key the raster actually came from; an ancestor of the tile's
    /// own key when the layer had no data at the requested level.
    pub key: TileKey,
    pub raster: Arc<Raster>,
    pub matrix: DMat4,
}

#[derive(Clone, Debug)]
pub struct ElevationModel {
    pub key: TileKey,
    pub heightfield: Arc<Heightfield>,
    pub matrix: DMat4,
}

#[derive(Clone, Debug)]
pub struct NormalModel {
    pub key: TileKey,
    pub raster: Arc<Raster>,
    pub matrix: DMat4,
}

/// Everything the factory gathered for one tile. Channels are
/// independently optional: a partial model is normal and merges what it
/// has, leaving the rest inherited from the parent.
#[derive(Clone, Debug, Default)]
pub struct TileModel {
    /// Map revision at fetch time.
    pub revision: i32,
    pub colors: Vec<ColorLayerModel>,
    pub elevation: Option<ElevationModel>,
    pub normal: Option<NormalModel>,
}

impl TileModel {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.elevation.is_none() && self.normal.is_none()
    }
}

/// One texture channel of a tile's render model.
#[derive(Clone, Debug)]
pub struct RenderBinding<T> {
    pub name: String,
    pub data: Option<T>,
    pub matrix: DMat4,
}

impl<T> Default for RenderBinding<T> {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: None,
            matrix: DMat4::IDENTITY,
        }
    }
}

/// The GPU-facing bundle for one tile: three texture channels with their
/// scale/bias matrices, plus the matrix placing the tile in the world.
#[derive(Clone, Debug, Default)]
pub struct TerrainTileRenderModel {
    pub color: RenderBinding<Arc<Raster>>,
    pub elevation: RenderBinding<Arc<Heightfield>>,
    pub normal: RenderBinding<Arc<Raster>>,
    pub model_matrix: DMat4,
}

impl TerrainTileRenderModel {
    /// Composes every channel matrix with a quadrant scale/bias, used when
    /// a child inherits its parent's rasters.
    pub fn apply_scale_bias(&mut self, scale_bias: &DMat4) {
        self.color.matrix *= *scale_bias;
        self.elevation.matrix *= *scale_bias;
        self.normal.matrix *= *scale_bias;
    }
}
