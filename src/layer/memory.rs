use crate::{
    layer::{
        ElevationTileSource, Failure, FailureKind, ImageTileSource, IoContext, SourceInfo,
        TileSource,
    },
    math::GeoExtent,
    pyramid::{Profile, TileKey},
    raster::{GeoHeightfield, GeoRaster, Heightfield, Raster},
};
use std::collections::HashMap;
use std::sync::Arc;

fn address(key: &TileKey) -> (u32, u32, u32) {
    (key.lod, key.x, key.y)
}

/// An image source backed by a plain in-memory table. Useful for
/// procedurally generated layers and as a stand-in source in tests.
pub struct MemoryImageSource {
    profile: Profile,
    tiles: HashMap<(u32, u32, u32), Arc<Raster>>,
}

impl MemoryImageSource {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            tiles: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: &TileKey, raster: Raster) {
        self.tiles.insert(address(key), Arc::new(raster));
    }

    fn info(&self) -> SourceInfo {
        let max_lod = self
            .tiles
            .keys()
            .map(|&(lod, ..)| lod)
            .max()
            .unwrap_or_default();

        SourceInfo {
            profile: self.profile.clone(),
            data_extent: GeoExtent::INVALID,
            min_lod: 0,
            max_lod,
        }
    }
}

impl TileSource for MemoryImageSource {
    fn type_name(&self) -> &'static str {
        "memory.image"
    }

    fn open(&mut self, _io: &IoContext) -> Result<SourceInfo, Failure> {
        Ok(self.info())
    }
}

impl ImageTileSource for MemoryImageSource {
    fn read_image(&self, key: &TileKey, io: &IoContext) -> Result<GeoRaster, Failure> {
        if io.canceled() {
            return Err(FailureKind::OperationCanceled.into());
        }

        match self.tiles.get(&address(key)) {
            Some(raster) => Ok(GeoRaster {
                raster: raster.clone(),
                extent: key.extent(),
            }),
            None => Err(FailureKind::ResourceUnavailable.into()),
        }
    }
}

/// The elevation twin of [`MemoryImageSource`].
pub struct MemoryElevationSource {
    profile: Profile,
    tiles: HashMap<(u32, u32, u32), Arc<Heightfield>>,
}

impl MemoryElevationSource {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            tiles: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: &TileKey, heightfield: Heightfield) {
        self.tiles.insert(address(key), Arc::new(heightfield));
    }
}

impl TileSource for MemoryElevationSource {
    fn type_name(&self) -> &'static str {
        "memory.elevation"
    }

    fn open(&mut self, _io: &IoContext) -> Result<SourceInfo, Failure> {
        let max_lod = self
            .tiles
            .keys()
            .map(|&(lod, ..)| lod)
            .max()
            .unwrap_or_default();

        Ok(SourceInfo {
            profile: self.profile.clone(),
            data_extent: GeoExtent::INVALID,
            min_lod: 0,
            max_lod,
        })
    }
}

impl ElevationTileSource for MemoryElevationSource {
    fn read_heightfield(&self, key: &TileKey, io: &IoContext) -> Result<GeoHeightfield, Failure> {
        if io.canceled() {
            return Err(FailureKind::OperationCanceled.into());
        }

        match self.tiles.get(&address(key)) {
            Some(heightfield) => Ok(GeoHeightfield {
                heightfield: heightfield.clone(),
                extent: key.extent(),
            }),
            None => Err(FailureKind::ResourceUnavailable.into()),
        }
    }
}
