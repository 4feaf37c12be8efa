use crate::layer::{ElevationLayer, ImageLayer, IoContext, Layer};
use bevy::{log::warn, prelude::*};
use serde_json::{json, Value};
use std::sync::Arc;

/// An ordered, revisioned stack of raster layers. Lives on the terrain
/// entity; the pager snapshots it when it dispatches tile loads.
///
/// Every structural change bumps `revision`, which is how downstream
/// consumers (and `Changed<Map>` queries) notice.
#[derive(Component, Default)]
pub struct Map {
    pub name: String,
    layers: Vec<Layer>,
    revision: i32,
}

impl Map {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn revision(&self) -> i32 {
        self.revision
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn image_layers(&self) -> impl Iterator<Item = &Arc<ImageLayer>> {
        self.layers.iter().filter_map(Layer::as_image)
    }

    pub fn elevation_layers(&self) -> impl Iterator<Item = &Arc<ElevationLayer>> {
        self.layers.iter().filter_map(Layer::as_elevation)
    }

    pub fn layer_by_uid(&self, uid: i32) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.uid() == uid)
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.revision += 1;
    }

    pub fn insert_layer(&mut self, index: usize, layer: Layer) {
        self.layers.insert(index.min(self.layers.len()), layer);
        self.revision += 1;
    }

    pub fn remove_layer(&mut self, uid: i32) -> Option<Layer> {
        let index = self.layers.iter().position(|layer| layer.uid() == uid)?;
        self.revision += 1;
        Some(self.layers.remove(index))
    }

    pub fn replace_layer(&mut self, uid: i32, layer: Layer) -> Option<Layer> {
        let index = self.layers.iter().position(|l| l.uid() == uid)?;
        self.revision += 1;
        Some(std::mem::replace(&mut self.layers[index], layer))
    }

    pub fn set_layers(&mut self, layers: Vec<Layer>) {
        self.layers = layers;
        self.revision += 1;
    }

    /// Opens every closed layer marked for automatic opening. A failure
    /// marks that layer failed and moves on; the layer stays in the map so
    /// the user can `dirty()` and retry.
    pub fn open_all_layers(&self, io: &IoContext) {
        for layer in &self.layers {
            if layer.open_automatically() && !layer.is_open() {
                if let Err(failure) = layer.open(io) {
                    warn!("failed to open layer \"{}\": {failure}", layer.name());
                }
            }
        }
    }

    /// Serializes to `{name, layers: [...]}`, preserving layer order.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "layers": self.layers.iter().map(Layer::to_json).collect::<Vec<_>>(),
        })
    }

    pub fn from_json(value: &Value) -> anyhow::Result<Map> {
        let mut map = Map::new(
            value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );

        if let Some(layers) = value.get("layers").and_then(Value::as_array) {
            for layer_value in layers {
                map.add_layer(Layer::from_json(layer_value)?);
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryImageSource;
    use crate::layer::{mbtiles, ElevationLayer, ImageLayer};
    use crate::pyramid::Profile;

    fn memory_layer(name: &str) -> Layer {
        Layer::image(ImageLayer::new(
            name,
            Box::new(MemoryImageSource::new(Profile::global_geodetic())),
        ))
    }

    #[test]
    fn structural_changes_bump_the_revision() {
        let mut map = Map::new("test");
        assert_eq!(map.revision(), 0);

        let layer = memory_layer("a");
        let uid = layer.uid();
        map.add_layer(layer);
        assert_eq!(map.revision(), 1);

        map.replace_layer(uid, memory_layer("b"));
        assert_eq!(map.revision(), 2);

        let uid = map.layers()[0].uid();
        assert!(map.remove_layer(uid).is_some());
        assert_eq!(map.revision(), 3);
        assert!(map.layers().is_empty());

        // removing a layer that is not there changes nothing
        assert!(map.remove_layer(uid).is_none());
        assert_eq!(map.revision(), 3);
    }

    #[test]
    fn layer_order_is_preserved() {
        let mut map = Map::new("test");
        map.add_layer(memory_layer("base"));
        map.add_layer(memory_layer("overlay"));
        map.insert_layer(1, memory_layer("middle"));

        let names: Vec<_> = map.layers().iter().map(Layer::name).collect();
        assert_eq!(names, ["base", "middle", "overlay"]);
    }

    #[test]
    fn json_round_trip_preserves_order_and_types() {
        let mut map = Map::new("earth");
        map.add_layer(Layer::image(ImageLayer::new(
            "imagery",
            Box::new(mbtiles::MbtilesImageSource::new(mbtiles::MbtilesOptions {
                uri: "world.mbtiles".into(),
                ..Default::default()
            })),
        )));
        map.add_layer(Layer::elevation(ElevationLayer::new(
            "terrain",
            Box::new(mbtiles::MbtilesElevationSource::new(
                mbtiles::MbtilesOptions {
                    uri: "elevation.mbtiles".into(),
                    format: Some("tif".into()),
                    ..Default::default()
                },
            )),
        )));

        let json = map.to_json();
        let back = Map::from_json(&json).unwrap();

        assert_eq!(back.name, "earth");
        assert_eq!(back.layers().len(), 2);
        assert_eq!(back.layers()[0].name(), "imagery");
        assert_eq!(back.layers()[1].name(), "terrain");
        assert_eq!(json, back.to_json());
    }
}
