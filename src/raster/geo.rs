use crate::{
    math::GeoExtent,
    raster::{Heightfield, Interpolation, Raster, NO_DATA_VALUE},
};
use std::sync::Arc;

/// A raster bound to the extent it covers.
#[derive(Clone, Debug)]
pub struct GeoRaster {
    pub raster: Arc<Raster>,
    pub extent: GeoExtent,
}

impl GeoRaster {
    pub fn new(raster: Raster, extent: GeoExtent) -> Self {
        Self {
            raster: Arc::new(raster),
            extent,
        }
    }

    pub fn valid(&self) -> bool {
        self.extent.valid() && self.raster.width() > 0 && self.raster.height() > 0
    }
}

/// A heightfield bound to the extent it covers.
#[derive(Clone, Debug)]
pub struct GeoHeightfield {
    pub heightfield: Arc<Heightfield>,
    pub extent: GeoExtent,
}

impl GeoHeightfield {
    pub fn new(heightfield: Heightfield, extent: GeoExtent) -> Self {
        Self {
            heightfield: Arc::new(heightfield),
            extent,
        }
    }

    pub fn valid(&self) -> bool {
        self.extent.valid() && self.heightfield.width() > 0 && self.heightfield.height() > 0
    }

    /// Samples the elevation at a coordinate in the extent's SRS.
    pub fn height_at(&self, x: f64, y: f64, interp: Interpolation) -> f32 {
        if !self.extent.contains(x, y) {
            return NO_DATA_VALUE;
        }

        let u = (x - self.extent.west()) / self.extent.width();
        let v = (y - self.extent.south()) / self.extent.height();
        self.heightfield.height_at_uv(u, v, interp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Srs;

    #[test]
    fn samples_by_coordinate() {
        let mut hf = Heightfield::new(2, 2);
        hf.set_height(0, 0, 0.0);
        hf.set_height(1, 0, 100.0);
        hf.set_height(0, 1, 200.0);
        hf.set_height(1, 1, 300.0);

        let geo = GeoHeightfield::new(hf, GeoExtent::new(Srs::WGS84, 0.0, 0.0, 10.0, 10.0));

        assert_eq!(geo.height_at(0.0, 0.0, Interpolation::Bilinear), 0.0);
        assert_eq!(geo.height_at(10.0, 10.0, Interpolation::Bilinear), 300.0);
        assert!((geo.height_at(5.0, 5.0, Interpolation::Bilinear) - 150.0).abs() < 1e-4);
        assert_eq!(geo.height_at(20.0, 0.0, Interpolation::Bilinear), NO_DATA_VALUE);
    }
}
