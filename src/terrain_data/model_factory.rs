use crate::{
    layer::{ElevationLayer, FailureKind, ImageLayer, IoContext},
    map::Map,
    math::Ellipsoid,
    pyramid::TileKey,
    raster::{Heightfield, Interpolation, PixelFormat, Raster, NO_DATA_VALUE},
    terrain_data::tile_model::{ColorLayerModel, ElevationModel, NormalModel, TileModel},
};
use bevy::log::debug;
use bevy::math::{DVec3, DVec4};
use itertools::iproduct;
use std::collections::HashSet;
use std::sync::Arc;

/// The layer stack captured at dispatch time, safe to carry onto a worker
/// thread while the live map keeps changing.
#[derive(Clone)]
pub struct MapSnapshot {
    pub revision: i32,
    pub image_layers: Vec<Arc<ImageLayer>>,
    pub elevation_layers: Vec<Arc<ElevationLayer>>,
}

impl MapSnapshot {
    pub fn of(map: &Map) -> Self {
        Self {
            revision: map.revision(),
            image_layers: map.image_layers().cloned().collect(),
            elevation_layers: map.elevation_layers().cloned().collect(),
        }
    }
}

/// Restricts a model fetch to a subset of layers; `None` means all.
#[derive(Clone, Debug, Default)]
pub struct CreateTileManifest {
    layers: Option<HashSet<i32>>,
}

impl CreateTileManifest {
    pub fn only(uids: impl IntoIterator<Item = i32>) -> Self {
        Self {
            layers: Some(uids.into_iter().collect()),
        }
    }

    pub fn includes(&self, uid: i32) -> bool {
        match &self.layers {
            Some(layers) => layers.contains(&uid),
            None => true,
        }
    }
}

/// Composites a tile key against the active layer stack into a
/// [`TileModel`]: one raster per color layer (or one composite), an
/// elevation channel, and a normal map derived from it.
pub struct TileModelFactory {
    /// Collapse all color layers into a single raster, alpha-over in map
    /// order.
    pub composite_colors: bool,
}

impl Default for TileModelFactory {
    fn default() -> Self {
        Self {
            composite_colors: true,
        }
    }
}

impl TileModelFactory {
    /// Builds the model for a key. Failures are channel-local: whatever
    /// could not be fetched is simply absent from the result, and a
    /// cancelation returns whatever was gathered so far.
    pub fn create_tile_model(
        &self,
        map: &MapSnapshot,
        key: &TileKey,
        manifest: &CreateTileManifest,
        io: &IoContext,
    ) -> TileModel {
        let mut model = TileModel {
            revision: map.revision,
            ..Default::default()
        };

        for layer in &map.image_layers {
            if io.canceled() {
                return model;
            }
            if !manifest.includes(layer.uid()) || !layer.is_open() || !layer.may_have_data(key) {
                continue;
            }

            // fetch at the key, else walk up to the nearest ancestor with
            // data; the matrix records the sub-region we ended up with
            let mut walk = Some(key.clone());
            while let Some(k) = walk {
                if io.canceled() {
                    return model;
                }

                match layer.create_image(&k, io) {
                    Ok(image) => {
                        model.colors.push(ColorLayerModel {
                            layer_uid: layer.uid(),
                            matrix: key.extent().scale_bias(&image.extent),
                            key: k,
                            raster: image.raster,
                        });
                        break;
                    }
                    Err(failure) if failure.kind == FailureKind::ResourceUnavailable => {
                        walk = k.parent();
                    }
                    Err(failure) if failure.kind == FailureKind::OperationCanceled => {
                        return model;
                    }
                    Err(failure) => {
                        debug!("layer \"{}\" failed for {key}: {failure}", layer.name);
                        break;
                    }
                }
            }
        }

        if self.composite_colors && model.colors.len() > 1 {
            model.colors = vec![composite(&model.colors, key)];
        }

        for layer in &map.elevation_layers {
            if io.canceled() {
                return model;
            }
            if !manifest.includes(layer.uid()) || !layer.is_open() || !layer.may_have_data(key) {
                continue;
            }

            let mut walk = Some(key.clone());
            while let Some(k) = walk {
                if io.canceled() {
                    return model;
                }

                match layer.create_heightfield(&k, io) {
                    Ok(tile) => {
                        model.elevation = Some(ElevationModel {
                            matrix: key.extent().scale_bias(&tile.extent),
                            key: k,
                            heightfield: tile.heightfield,
                        });
                        break;
                    }
                    Err(failure) if failure.kind == FailureKind::ResourceUnavailable => {
                        walk = k.parent();
                    }
                    Err(failure) if failure.kind == FailureKind::OperationCanceled => {
                        return model;
                    }
                    Err(failure) => {
                        debug!("layer \"{}\" failed for {key}: {failure}", layer.name);
                        break;
                    }
                }
            }

            if model.elevation.is_some() {
                break;
            }
        }

        if let Some(elevation) = &model.elevation {
            model.normal = Some(NormalModel {
                key: elevation.key.clone(),
                raster: Arc::new(normal_map(&elevation.heightfield, &elevation.key)),
                matrix: elevation.matrix,
            });
        }

        model
    }
}

/// Alpha-over compositing of the gathered color layers into one raster,
/// resampling each through its scale/bias matrix.
fn composite(colors: &[ColorLayerModel], key: &TileKey) -> ColorLayerModel {
    let size = colors
        .iter()
        .map(|c| c.raster.width().max(c.raster.height()))
        .max()
        .unwrap_or(256);

    let mut out = Raster::new(PixelFormat::Rgba8, size, size);

    for (row, col) in iproduct!(0..size, 0..size) {
        let u = (col as f64 + 0.5) / size as f64;
        let v = (row as f64 + 0.5) / size as f64;

        let mut result = [0.0f32; 4];
        for layer in colors {
            let uv = layer.matrix * DVec4::new(u, v, 0.0, 1.0);
            let lc = ((uv.x * layer.raster.width() as f64) as u32).min(layer.raster.width() - 1);
            let lr = ((uv.y * layer.raster.height() as f64) as u32).min(layer.raster.height() - 1);

            let src = layer.raster.read(lc, lr);
            let a = src[3];
            for c in 0..3 {
                result[c] = src[c] * a + result[c] * (1.0 - a);
            }
            result[3] = a + result[3] * (1.0 - a);
        }

        out.write(col, row, result);
    }

    ColorLayerModel {
        layer_uid: -1,
        key: key.clone(),
        raster: Arc::new(out),
        matrix: bevy::math::DMat4::IDENTITY,
    }
}

/// Derives a tangent-space normal map by finite-differencing the
/// heightfield, with sample spacing taken from the source tile's extent.
fn normal_map(heightfield: &Heightfield, key: &TileKey) -> Raster {
    let width = heightfield.width();
    let height = heightfield.height();
    let mut out = Raster::new(PixelFormat::Rgb8, width, height);

    let extent = key.extent();
    let ellipsoid = key.profile.srs().ellipsoid();

    // meters between posts
    let (_, center_lat) = extent.centroid();
    let (dx, dy) = if key.profile.srs().is_geodetic() {
        (
            ellipsoid.longitudinal_degrees_to_meters(
                extent.width() / (width.max(2) - 1) as f64,
                center_lat,
            ),
            ellipsoid.latitudinal_degrees_to_meters(extent.height() / (height.max(2) - 1) as f64),
        )
    } else {
        (
            extent.width() / (width.max(2) - 1) as f64,
            extent.height() / (height.max(2) - 1) as f64,
        )
    };

    let sample = |c: i64, r: i64| -> f64 {
        let c = c.clamp(0, width as i64 - 1) as u32;
        let r = r.clamp(0, height as i64 - 1) as u32;
        let h = heightfield.height_at(c, r);
        if h == NO_DATA_VALUE {
            0.0
        } else {
            h as f64
        }
    };

    for (row, col) in iproduct!(0..height as i64, 0..width as i64) {
        let west = sample(col - 1, row);
        let east = sample(col + 1, row);
        let south = sample(col, row - 1);
        let north = sample(col, row + 1);

        let normal = DVec3::new(
            (west - east) / (2.0 * dx.max(1e-9)),
            (south - north) / (2.0 * dy.max(1e-9)),
            1.0,
        )
        .normalize();

        // pack into [0, 1]
        out.write(
            col as u32,
            row as u32,
            [
                (normal.x * 0.5 + 0.5) as f32,
                (normal.y * 0.5 + 0.5) as f32,
                (normal.z * 0.5 + 0.5) as f32,
                1.0,
            ],
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::{MemoryElevationSource, MemoryImageSource};
    use crate::layer::{ElevationLayer, ImageLayer, Layer};
    use crate::pyramid::Profile;

    fn flat_raster(size: u32, value: f32) -> Raster {
        let mut raster = Raster::new(PixelFormat::Rgba8, size, size);
        raster.fill([value, value, value, 1.0]);
        raster
    }

    fn map_with_color_at(profile: &Profile, lods: &[(u32, u32, u32)]) -> Map {
        let mut source = MemoryImageSource::new(profile.clone());
        for &(lod, x, y) in lods {
            source.insert(&TileKey::new(lod, x, y, profile.clone()), flat_raster(8, 0.5));
        }

        let mut map = Map::new("test");
        map.add_layer(Layer::image(ImageLayer::new("color", Box::new(source))));
        map.open_all_layers(&IoContext::default());
        map
    }

    #[test]
    fn direct_hit_has_identity_matrix() {
        let profile = Profile::global_geodetic();
        let map = map_with_color_at(&profile, &[(2, 1, 1)]);
        let key = TileKey::new(2, 1, 1, profile);

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &IoContext::default(),
        );

        assert_eq!(model.colors.len(), 1);
        let color = &model.colors[0];
        assert_eq!(color.key, key);
        assert!((color.matrix.x_axis.x - 1.0).abs() < 1e-12);
        assert!(color.matrix.w_axis.x.abs() < 1e-12);
    }

    #[test]
    fn ancestor_fallback_builds_the_scale_bias() {
        let profile = Profile::global_geodetic();
        // data at lod 5 only
        let map = map_with_color_at(&profile, &[(5, 10, 7)]);
        let key = TileKey::new(7, 40, 30, profile.clone());

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &IoContext::default(),
        );

        assert_eq!(model.colors.len(), 1);
        let color = &model.colors[0];
        assert_eq!(color.key, TileKey::new(5, 10, 7, profile));
        assert!((color.matrix.x_axis.x - 0.25).abs() < 1e-9);
        assert!((color.matrix.y_axis.y - 0.25).abs() < 1e-9);
        assert!(color.matrix.w_axis.x.abs() < 1e-9);
        assert!((color.matrix.w_axis.y - 0.25).abs() < 1e-9);
    }

    #[test]
    fn no_ancestor_means_no_channel() {
        let profile = Profile::global_geodetic();
        let map = map_with_color_at(&profile, &[]);
        let key = TileKey::new(3, 1, 1, profile);

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &IoContext::default(),
        );

        assert!(model.colors.is_empty());
        assert!(model.elevation.is_none());
        assert!(model.normal.is_none());
    }

    #[test]
    fn elevation_brings_a_normal_map() {
        let profile = Profile::global_geodetic();
        let key = TileKey::new(1, 0, 0, profile.clone());

        let mut source = MemoryElevationSource::new(profile.clone());
        let mut hf = Heightfield::new(8, 8);
        for (r, c) in iproduct!(0..8, 0..8) {
            hf.set_height(c, r, (c * 100) as f32);
        }
        source.insert(&key, hf);

        let mut map = Map::new("test");
        map.add_layer(Layer::elevation(ElevationLayer::new(
            "terrain",
            Box::new(source),
        )));
        map.open_all_layers(&IoContext::default());

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &IoContext::default(),
        );

        let elevation = model.elevation.expect("elevation channel");
        assert_eq!(elevation.key, key);

        let normal = model.normal.expect("normal channel");
        assert_eq!(normal.raster.width(), 8);

        // slope rises to the east, so packed x < 0.5 at an interior pixel
        let px = normal.raster.read(4, 4);
        assert!(px[0] < 0.5);
        assert!(px[2] > 0.5);
    }

    #[test]
    fn manifest_filters_layers() {
        let profile = Profile::global_geodetic();
        let map = map_with_color_at(&profile, &[(1, 0, 0)]);
        let key = TileKey::new(1, 0, 0, profile);

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::only([-42]),
            &IoContext::default(),
        );
        assert!(model.colors.is_empty());
    }

    #[test]
    fn cancelation_returns_a_partial_model() {
        let profile = Profile::global_geodetic();
        let map = map_with_color_at(&profile, &[(1, 0, 0)]);
        let key = TileKey::new(1, 0, 0, profile);

        let io = IoContext::default();
        io.cancel.cancel();

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &io,
        );
        assert!(model.is_empty());
    }

    #[test]
    fn composites_two_layers_into_one() {
        let profile = Profile::global_geodetic();
        let key = TileKey::new(1, 0, 0, profile.clone());

        let mut base = MemoryImageSource::new(profile.clone());
        base.insert(&key, flat_raster(4, 1.0));
        let mut over = MemoryImageSource::new(profile.clone());
        let mut half = Raster::new(PixelFormat::Rgba8, 4, 4);
        half.fill([0.0, 0.0, 0.0, 0.5]);
        over.insert(&key, half);

        let mut map = Map::new("test");
        map.add_layer(Layer::image(ImageLayer::new("base", Box::new(base))));
        map.add_layer(Layer::image(ImageLayer::new("over", Box::new(over))));
        map.open_all_layers(&IoContext::default());

        let model = TileModelFactory::default().create_tile_model(
            &MapSnapshot::of(&map),
            &key,
            &CreateTileManifest::default(),
            &IoContext::default(),
        );

        assert_eq!(model.colors.len(), 1);
        let px = model.colors[0].raster.read(2, 2);
        // white base under a half-transparent black overlay
        assert!((px[0] - 0.5).abs() < 0.02);
    }
}
