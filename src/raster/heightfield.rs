use crate::raster::{PixelFormat, Raster};
use bevy::math::DVec3;
use bytemuck::cast_slice;

/// Sentinel for missing elevation samples. Interpolation never produces
/// this value.
pub const NO_DATA_VALUE: f32 = -f32::MAX;

/// How to sample a heightfield between posts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Triangulate,
    Average,
}

/// A single-channel `R32F` raster whose values are elevations in meters.
#[derive(Clone, Debug)]
pub struct Heightfield {
    raster: Raster,
}

impl Heightfield {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            raster: Raster::new(PixelFormat::R32F, cols, rows),
        }
    }

    /// Wraps an existing raster; anything but `R32F` is refused.
    pub fn from_raster(raster: Raster) -> Option<Self> {
        (raster.format() == PixelFormat::R32F).then_some(Self { raster })
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn into_raster(self) -> Raster {
        self.raster
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn heights(&self) -> &[f32] {
        cast_slice(self.raster.data())
    }

    pub fn height_at(&self, col: u32, row: u32) -> f32 {
        self.heights()[(row * self.width() + col) as usize]
    }

    pub fn set_height(&mut self, col: u32, row: u32, value: f32) {
        let i = (row * self.width() + col) as usize;
        bytemuck::cast_slice_mut::<u8, f32>(self.raster.data_mut())[i] = value;
    }

    pub fn fill(&mut self, value: f32) {
        bytemuck::cast_slice_mut::<u8, f32>(self.raster.data_mut()).fill(value);
    }

    /// The (min, max) over all valid samples, or `None` if every sample is
    /// no-data.
    pub fn height_range(&self) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for &h in self.heights() {
            if h != NO_DATA_VALUE {
                let (lo, hi) = range.get_or_insert((h, h));
                *lo = lo.min(h);
                *hi = hi.max(h);
            }
        }
        range
    }

    /// Samples at normalized coordinates, (0, 0) at the lower-left post.
    pub fn height_at_uv(&self, u: f64, v: f64, interp: Interpolation) -> f32 {
        let c = u.clamp(0.0, 1.0) * (self.width() - 1) as f64;
        let r = v.clamp(0.0, 1.0) * (self.height() - 1) as f64;
        self.height_at_pixel(c, r, interp)
    }

    /// Samples at fractional pixel coordinates.
    pub fn height_at_pixel(&self, c: f64, r: f64, interp: Interpolation) -> f32 {
        match interp {
            Interpolation::Nearest => self.height_at(
                (c.round() as u32).min(self.width() - 1),
                (r.round() as u32).min(self.height() - 1),
            ),
            Interpolation::Bilinear => self.sample_bilinear(c, r),
            Interpolation::Average => self.sample_average(c, r),
            Interpolation::Triangulate => self.sample_triangulate(c, r),
        }
    }

    fn corner_indices(&self, c: f64, r: f64) -> (u32, u32, u32, u32) {
        let row_min = (r.floor() as i64).max(0) as u32;
        let row_max = ((r.ceil() as i64).min(self.height() as i64 - 1)).max(0) as u32;
        let col_min = (c.floor() as i64).max(0) as u32;
        let col_max = ((c.ceil() as i64).min(self.width() as i64 - 1)).max(0) as u32;

        (
            col_min.min(col_max),
            col_max,
            row_min.min(row_max),
            row_max,
        )
    }

    fn sample_bilinear(&self, c: f64, r: f64) -> f32 {
        let (col_min, col_max, row_min, row_max) = self.corner_indices(c, r);

        let ur = self.height_at(col_max, row_max);
        let ll = self.height_at(col_min, row_min);
        let ul = self.height_at(col_min, row_max);
        let lr = self.height_at(col_max, row_min);

        let Some([ur, ll, ul, lr]) = validate_samples([ur, ll, ul, lr]) else {
            return NO_DATA_VALUE;
        };

        if col_max == col_min && row_max == row_min {
            ll
        } else if col_max == col_min {
            // degenerate column, lerp vertically
            ((row_max as f64 - r) * ll as f64 + (r - row_min as f64) * ul as f64) as f32
        } else if row_max == row_min {
            // degenerate row, lerp horizontally
            ((col_max as f64 - c) * ll as f64 + (c - col_min as f64) * lr as f64) as f32
        } else {
            let r1 = (col_max as f64 - c) * ll as f64 + (c - col_min as f64) * lr as f64;
            let r2 = (col_max as f64 - c) * ul as f64 + (c - col_min as f64) * ur as f64;
            ((row_max as f64 - r) * r1 + (r - row_min as f64) * r2) as f32
        }
    }

    fn sample_average(&self, c: f64, r: f64) -> f32 {
        let (col_min, col_max, row_min, row_max) = self.corner_indices(c, r);

        let ur = self.height_at(col_max, row_max);
        let ll = self.height_at(col_min, row_min);
        let ul = self.height_at(col_min, row_max);
        let lr = self.height_at(col_max, row_min);

        let Some([ur, ll, ul, lr]) = validate_samples([ur, ll, ul, lr]) else {
            return NO_DATA_VALUE;
        };

        let x_rem = c - c.floor();
        let y_rem = r - r.floor();

        let w00 = (1.0 - y_rem) * (1.0 - x_rem) * ll as f64;
        let w01 = (1.0 - y_rem) * x_rem * lr as f64;
        let w10 = y_rem * (1.0 - x_rem) * ul as f64;
        let w11 = y_rem * x_rem * ur as f64;

        (w00 + w01 + w10 + w11) as f32
    }

    fn sample_triangulate(&self, c: f64, r: f64) -> f32 {
        let (mut col_min, mut col_max, mut row_min, mut row_max) = self.corner_indices(c, r);

        // widen a degenerate cell so there is a triangle to stand on
        if row_min == row_max {
            if row_min < self.height() - 1 {
                row_max = row_min + 1;
            } else if row_max > 0 {
                row_min = row_max - 1;
            }
        }
        if col_min == col_max {
            if col_min < self.width() - 1 {
                col_max = col_min + 1;
            } else if col_max > 0 {
                col_min = col_max - 1;
            }
        }

        let ur = self.height_at(col_max, row_max);
        let ll = self.height_at(col_min, row_min);
        let ul = self.height_at(col_min, row_max);
        let lr = self.height_at(col_max, row_min);

        let Some([ur, ll, ul, lr]) = validate_samples([ur, ll, ul, lr]) else {
            return NO_DATA_VALUE;
        };

        // the quad splits into two triangles along the ll-ur diagonal
        let dx = c - col_min as f64;
        let dy = r - row_min as f64;

        let (v0, v1, v2) = if dx > dy {
            (
                DVec3::new(col_min as f64, row_min as f64, ll as f64),
                DVec3::new(col_max as f64, row_min as f64, lr as f64),
                DVec3::new(col_max as f64, row_max as f64, ur as f64),
            )
        } else {
            (
                DVec3::new(col_min as f64, row_min as f64, ll as f64),
                DVec3::new(col_max as f64, row_max as f64, ur as f64),
                DVec3::new(col_min as f64, row_max as f64, ul as f64),
            )
        };

        let n = (v1 - v0).cross(v2 - v0);
        ((n.x * (c - v0.x) + n.y * (r - v0.y)) / -n.z + v0.z) as f32
    }
}

/// If all four samples are no-data there is nothing to interpolate.
/// Otherwise no-data samples take the value of the first valid one, in a
/// fixed order so results are deterministic.
fn validate_samples(samples: [f32; 4]) -> Option<[f32; 4]> {
    let valid = samples.iter().copied().find(|&s| s != NO_DATA_VALUE)?;
    Some(samples.map(|s| if s == NO_DATA_VALUE { valid } else { s }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(values: &[&[f32]]) -> Heightfield {
        let rows = values.len() as u32;
        let cols = values[0].len() as u32;
        let mut hf = Heightfield::new(cols, rows);
        for (r, row) in values.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                hf.set_height(c as u32, r as u32, v);
            }
        }
        hf
    }

    #[test]
    fn bilinear_interpolates_center() {
        let hf = field(&[&[0.0, 10.0], &[20.0, 30.0]]);
        assert!((hf.height_at_pixel(0.5, 0.5, Interpolation::Bilinear) - 15.0).abs() < 1e-5);
        assert!((hf.height_at_uv(0.0, 0.0, Interpolation::Bilinear) - 0.0).abs() < 1e-5);
        assert!((hf.height_at_uv(1.0, 1.0, Interpolation::Bilinear) - 30.0).abs() < 1e-5);
    }

    #[test]
    fn bilinear_no_data_only_when_all_corners_missing() {
        let n = NO_DATA_VALUE;

        let all_missing = field(&[&[n, n], &[n, n]]);
        assert_eq!(
            all_missing.height_at_pixel(0.5, 0.5, Interpolation::Bilinear),
            NO_DATA_VALUE
        );

        let one_valid = field(&[&[n, n], &[n, 42.0]]);
        assert_eq!(
            one_valid.height_at_pixel(0.5, 0.5, Interpolation::Bilinear),
            42.0
        );

        let partial = field(&[&[10.0, n], &[n, n]]);
        assert_eq!(
            partial.height_at_pixel(0.5, 0.5, Interpolation::Bilinear),
            10.0
        );
    }

    #[test]
    fn nearest_rounds_both_axes() {
        let hf = field(&[&[0.0, 1.0], &[2.0, 3.0]]);
        assert_eq!(hf.height_at_pixel(0.4, 0.4, Interpolation::Nearest), 0.0);
        assert_eq!(hf.height_at_pixel(0.6, 0.4, Interpolation::Nearest), 1.0);
        assert_eq!(hf.height_at_pixel(0.4, 0.6, Interpolation::Nearest), 2.0);
        assert_eq!(hf.height_at_pixel(0.6, 0.6, Interpolation::Nearest), 3.0);
    }

    #[test]
    fn triangulate_follows_the_diagonal_split() {
        // ll=0, lr=12, ul=6, ur=0: the two triangles span different planes
        let hf = field(&[&[0.0, 12.0], &[6.0, 0.0]]);

        // (c-c0) > (r-r0) picks the right triangle (ll, lr, ur)
        let right = hf.height_at_pixel(0.75, 0.25, Interpolation::Triangulate);
        assert!((right - 6.0).abs() < 1e-5);

        // otherwise the left triangle (ll, ur, ul)
        let left = hf.height_at_pixel(0.25, 0.75, Interpolation::Triangulate);
        assert!((left - 3.0).abs() < 1e-5);
    }

    #[test]
    fn sampling_clamps_outside_the_grid() {
        let hf = field(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert_eq!(hf.height_at_pixel(-1.0, -1.0, Interpolation::Bilinear), 1.0);
        assert_eq!(hf.height_at_pixel(5.0, 5.0, Interpolation::Bilinear), 4.0);
    }

    #[test]
    fn height_range_skips_no_data() {
        let n = NO_DATA_VALUE;
        let hf = field(&[&[n, 5.0], &[-3.0, n]]);
        assert_eq!(hf.height_range(), Some((-3.0, 5.0)));
        assert_eq!(field(&[&[n], &[n]]).height_range(), None);
    }
}
