mod geo;
mod heightfield;

pub use crate::raster::{
    geo::{GeoHeightfield, GeoRaster},
    heightfield::{Heightfield, Interpolation, NO_DATA_VALUE},
};

use bytemuck::cast_slice;
use itertools::iproduct;

/// The pixel format of a [`Raster`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    R16,
    R32F,
    R64F,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::R8 | PixelFormat::R16 | PixelFormat::R32F | PixelFormat::R64F => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::R16 => 2,
            PixelFormat::R32F => 4,
            PixelFormat::R64F => 8,
        }
    }
}

/// A typed raster container.
///
/// Rasters are stored bottom-up: row 0 is the southern edge and maps to
/// `v = 0`, both when sampling on the CPU and when uploaded as a texture.
/// Decoders for top-down formats flip on read.
#[derive(Clone, Debug)]
pub struct Raster {
    format: PixelFormat,
    width: u32,
    height: u32,
    depth: u32,
    data: Vec<u8>,
}

impl Raster {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self::with_depth(format, width, height, 1)
    }

    pub fn with_depth(format: PixelFormat, width: u32, height: u32, depth: u32) -> Self {
        let size = format.bytes_per_pixel() * (width * height * depth) as usize;
        Self {
            format,
            width,
            height,
            depth,
            data: vec![0; size],
        }
    }

    pub fn from_bytes(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Option<Self> {
        if data.len() != format.bytes_per_pixel() * (width * height) as usize {
            return None;
        }
        Some(Self {
            format,
            width,
            height,
            depth: 1,
            data,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn size_in_pixels(&self) -> usize {
        (self.width * self.height * self.depth) as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, col: u32, row: u32) -> usize {
        debug_assert!(col < self.width && row < self.height);
        (row * self.width + col) as usize
    }

    /// Reads a pixel as normalized floats, missing channels zero and alpha
    /// defaulting to one.
    pub fn read(&self, col: u32, row: u32) -> [f32; 4] {
        let i = self.offset(col, row);
        let mut out = [0.0, 0.0, 0.0, 1.0];

        match self.format {
            PixelFormat::R8 => out[0] = self.data[i] as f32 / 255.0,
            PixelFormat::Rg8 => {
                out[0] = self.data[i * 2] as f32 / 255.0;
                out[1] = self.data[i * 2 + 1] as f32 / 255.0;
            }
            PixelFormat::Rgb8 => {
                for c in 0..3 {
                    out[c] = self.data[i * 3 + c] as f32 / 255.0;
                }
            }
            PixelFormat::Rgba8 => {
                for c in 0..4 {
                    out[c] = self.data[i * 4 + c] as f32 / 255.0;
                }
            }
            PixelFormat::R16 => {
                let v: u16 = cast_slice(&self.data)[i];
                out[0] = v as f32 / u16::MAX as f32;
            }
            PixelFormat::R32F => out[0] = cast_slice(&self.data)[i],
            PixelFormat::R64F => out[0] = cast_slice::<u8, f64>(&self.data)[i] as f32,
        }

        out
    }

    /// Writes a pixel from normalized floats, ignoring channels the format
    /// does not carry.
    pub fn write(&mut self, col: u32, row: u32, value: [f32; 4]) {
        let i = self.offset(col, row);

        match self.format {
            PixelFormat::R8 => self.data[i] = (value[0] * 255.0) as u8,
            PixelFormat::Rg8 => {
                self.data[i * 2] = (value[0] * 255.0) as u8;
                self.data[i * 2 + 1] = (value[1] * 255.0) as u8;
            }
            PixelFormat::Rgb8 => {
                for c in 0..3 {
                    self.data[i * 3 + c] = (value[c] * 255.0) as u8;
                }
            }
            PixelFormat::Rgba8 => {
                for c in 0..4 {
                    self.data[i * 4 + c] = (value[c] * 255.0) as u8;
                }
            }
            PixelFormat::R16 => {
                bytemuck::cast_slice_mut::<u8, u16>(&mut self.data)[i] =
                    (value[0] * u16::MAX as f32) as u16;
            }
            PixelFormat::R32F => {
                bytemuck::cast_slice_mut::<u8, f32>(&mut self.data)[i] = value[0];
            }
            PixelFormat::R64F => {
                bytemuck::cast_slice_mut::<u8, f64>(&mut self.data)[i] = value[0] as f64;
            }
        }
    }

    pub fn fill(&mut self, value: [f32; 4]) {
        for (row, col) in iproduct!(0..self.height, 0..self.width) {
            self.write(col, row, value);
        }
    }

    /// Reverses the row order in place, for data decoded from top-down
    /// image formats.
    pub fn flip_vertical(&mut self) {
        let stride = self.format.bytes_per_pixel() * self.width as usize;
        let height = self.height as usize;
        for row in 0..height / 2 {
            let (top, bottom) = (row * stride, (height - 1 - row) * stride);
            for i in 0..stride {
                self.data.swap(top + i, bottom + i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let mut raster = Raster::new(PixelFormat::Rgba8, 4, 4);
        raster.write(2, 3, [1.0, 0.5, 0.25, 1.0]);

        let px = raster.read(2, 3);
        assert_eq!(px[0], 1.0);
        assert!((px[1] - 0.5).abs() < 1.0 / 255.0);
        assert!((px[2] - 0.25).abs() < 1.0 / 255.0);
    }

    #[test]
    fn r32f_is_exact() {
        let mut raster = Raster::new(PixelFormat::R32F, 2, 2);
        raster.write(1, 0, [1234.5678, 0.0, 0.0, 1.0]);
        assert_eq!(raster.read(1, 0)[0], 1234.5678);
    }

    #[test]
    fn fill_covers_every_pixel() {
        let mut raster = Raster::new(PixelFormat::R8, 3, 3);
        raster.fill([1.0, 0.0, 0.0, 1.0]);
        assert!(raster.data().iter().all(|&b| b == 255));
    }

    #[test]
    fn from_bytes_validates_length() {
        assert!(Raster::from_bytes(PixelFormat::R16, 2, 2, vec![0; 8]).is_some());
        assert!(Raster::from_bytes(PixelFormat::R16, 2, 2, vec![0; 7]).is_none());
    }
}
