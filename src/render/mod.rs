//! The GPU-facing side: the per-tile material with its three texture
//! channels and scale/bias uniform block, the placeholder images every
//! tile falls back on, and raster-to-texture conversion.

pub(crate) mod shaders;

pub(crate) use shaders::load_terrain_shaders;

use crate::{
    raster::{Heightfield, PixelFormat, Raster},
    terrain_data::tile_model::TerrainTileRenderModel,
};
use bevy::{
    asset::RenderAssetUsages,
    image::{ImageFilterMode, ImageSampler, ImageSamplerDescriptor},
    math::Mat4,
    prelude::*,
    render::render_resource::{AsBindGroup, Extent3d, ShaderRef, ShaderType, TextureDimension, TextureFormat},
};
use itertools::{iproduct, Itertools};

/// The texture channels of a tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TileChannel {
    Elevation,
    Color,
    Normal,
}

/// Per-tile uniform block: the scale/bias matrix of each channel. The
/// model matrix rides on the mesh transform.
#[derive(Clone, Default, Debug, ShaderType)]
pub struct TerrainTileUniform {
    pub elevation_matrix: Mat4,
    pub color_matrix: Mat4,
    pub normal_matrix: Mat4,
}

/// The material bound to every tile surface. Channels that have no data
/// yet point at the shared placeholder images, so the bind group is
/// always complete.
///
/// A tile's material is replaced, never mutated: frames in flight may
/// still reference the old bind group, so the retired handle goes through
/// the deferred disposal ring.
#[derive(Asset, TypePath, AsBindGroup, Clone)]
pub struct TerrainTileMaterial {
    #[uniform(0)]
    pub tile: TerrainTileUniform,
    #[texture(10)]
    #[sampler(13)]
    pub elevation: Option<Handle<Image>>,
    #[texture(11)]
    #[sampler(14)]
    pub color: Option<Handle<Image>>,
    #[texture(12)]
    #[sampler(15)]
    pub normal: Option<Handle<Image>>,
}

impl Material for TerrainTileMaterial {
    fn vertex_shader() -> ShaderRef {
        shaders::TERRAIN_SHADER.into()
    }

    fn fragment_shader() -> ShaderRef {
        shaders::TERRAIN_SHADER.into()
    }
}

/// Shared placeholder images: 1x1 orange color, zero height, straight-up
/// normal.
#[derive(Resource, Clone)]
pub struct TerrainStateDefaults {
    pub elevation: Handle<Image>,
    pub color: Handle<Image>,
    pub normal: Handle<Image>,
}

impl FromWorld for TerrainStateDefaults {
    fn from_world(world: &mut World) -> Self {
        let mut images = world.resource_mut::<Assets<Image>>();

        let mut color = Raster::new(PixelFormat::Rgba8, 1, 1);
        color.fill([1.0, 0.65, 0.0, 1.0]);

        let elevation = Heightfield::new(1, 1);

        let mut normal = Raster::new(PixelFormat::Rgb8, 1, 1);
        normal.fill([0.5, 0.5, 1.0, 1.0]);

        Self {
            elevation: images.add(raster_to_image(elevation.raster(), TileChannel::Elevation)),
            color: images.add(raster_to_image(&color, TileChannel::Color)),
            normal: images.add(raster_to_image(&normal, TileChannel::Normal)),
        }
    }
}

/// Number of mip levels the color sampler may walk down.
const COLOR_MIP_LEVELS: u32 = 5;

fn channel_sampler(channel: TileChannel) -> ImageSamplerDescriptor {
    match channel {
        // fetched with textureLoad; the sampler is a formality
        TileChannel::Elevation => ImageSamplerDescriptor {
            label: Some("terrain_elevation_sampler".into()),
            mag_filter: ImageFilterMode::Nearest,
            min_filter: ImageFilterMode::Nearest,
            lod_max_clamp: 16.0,
            ..clamped()
        },
        TileChannel::Color => ImageSamplerDescriptor {
            label: Some("terrain_color_sampler".into()),
            mag_filter: ImageFilterMode::Linear,
            min_filter: ImageFilterMode::Linear,
            mipmap_filter: ImageFilterMode::Linear,
            lod_max_clamp: COLOR_MIP_LEVELS as f32,
            anisotropy_clamp: 4,
            ..clamped()
        },
        TileChannel::Normal => ImageSamplerDescriptor {
            label: Some("terrain_normal_sampler".into()),
            mag_filter: ImageFilterMode::Linear,
            min_filter: ImageFilterMode::Linear,
            lod_max_clamp: 16.0,
            ..clamped()
        },
    }
}

fn clamped() -> ImageSamplerDescriptor {
    ImageSamplerDescriptor {
        address_mode_u: bevy::image::ImageAddressMode::ClampToEdge,
        address_mode_v: bevy::image::ImageAddressMode::ClampToEdge,
        address_mode_w: bevy::image::ImageAddressMode::ClampToEdge,
        ..Default::default()
    }
}

/// Converts a raster into a GPU image for the given channel. Color data
/// becomes sRGB with a small mip chain; elevation stays R32Float; normal
/// maps are linear RGBA.
pub fn raster_to_image(raster: &Raster, channel: TileChannel) -> Image {
    let (format, mut data) = match (channel, raster.format()) {
        (TileChannel::Elevation, PixelFormat::R32F) => {
            (TextureFormat::R32Float, raster.data().to_vec())
        }
        (TileChannel::Color, PixelFormat::Rgba8) => {
            (TextureFormat::Rgba8UnormSrgb, raster.data().to_vec())
        }
        // pad three channels out to four
        (_, PixelFormat::Rgb8) => {
            let format = match channel {
                TileChannel::Color => TextureFormat::Rgba8UnormSrgb,
                _ => TextureFormat::Rgba8Unorm,
            };
            let data = raster
                .data()
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect_vec();
            (format, data)
        }
        (_, PixelFormat::Rgba8) => (TextureFormat::Rgba8Unorm, raster.data().to_vec()),
        (_, PixelFormat::R8) => (TextureFormat::R8Unorm, raster.data().to_vec()),
        (_, PixelFormat::Rg8) => (TextureFormat::Rg8Unorm, raster.data().to_vec()),
        (_, PixelFormat::R16) => (TextureFormat::R16Unorm, raster.data().to_vec()),
        (_, PixelFormat::R32F) => (TextureFormat::R32Float, raster.data().to_vec()),
        (_, PixelFormat::R64F) => {
            // the GPU has no 64-bit floats; narrow on upload
            let narrowed = bytemuck::cast_slice::<u8, f64>(raster.data())
                .iter()
                .flat_map(|&v| (v as f32).to_ne_bytes())
                .collect_vec();
            (TextureFormat::R32Float, narrowed)
        }
    };

    let mut mip_level_count = 1;
    if channel == TileChannel::Color && format == TextureFormat::Rgba8UnormSrgb {
        mip_level_count = generate_rgba_mipmaps(&mut data, raster.width(), raster.height());
    }

    let mut image = Image::new(
        Extent3d {
            width: raster.width(),
            height: raster.height(),
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        data,
        format,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.mip_level_count = mip_level_count;
    image.sampler = ImageSampler::Descriptor(channel_sampler(channel));
    image
}

/// Appends a box-filtered rgba8 mip chain to `data`, stopping at
/// [`COLOR_MIP_LEVELS`] or when the size stops halving evenly. Returns
/// the level count.
fn generate_rgba_mipmaps(data: &mut Vec<u8>, width: u32, height: u32) -> u32 {
    let mut levels = 1;
    let mut start = 0usize;
    let (mut parent_w, mut parent_h) = (width as usize, height as usize);

    while levels < COLOR_MIP_LEVELS && parent_w % 2 == 0 && parent_h % 2 == 0 && parent_w > 1 {
        let (child_w, child_h) = (parent_w / 2, parent_h / 2);

        for (y, x) in iproduct!(0..child_h, 0..child_w) {
            let mut sum = [0u32; 4];
            for (dy, dx) in iproduct!(0..2, 0..2) {
                let index = start + ((y * 2 + dy) * parent_w + x * 2 + dx) * 4;
                for c in 0..4 {
                    sum[c] += data[index + c] as u32;
                }
            }
            for s in sum {
                data.push((s / 4) as u8);
            }
        }

        start += parent_w * parent_h * 4;
        parent_w = child_w;
        parent_h = child_h;
        levels += 1;
    }

    levels
}

/// Assembles a complete material for a tile's render model, falling back
/// to the placeholders wherever a channel is missing.
pub fn make_tile_material(
    render_model: &TerrainTileRenderModel,
    images: &mut Assets<Image>,
    defaults: &TerrainStateDefaults,
) -> TerrainTileMaterial {
    let elevation = render_model
        .elevation
        .data
        .as_ref()
        .map(|hf| images.add(raster_to_image(hf.raster(), TileChannel::Elevation)))
        .unwrap_or_else(|| defaults.elevation.clone());

    let color = render_model
        .color
        .data
        .as_ref()
        .map(|raster| images.add(raster_to_image(raster, TileChannel::Color)))
        .unwrap_or_else(|| defaults.color.clone());

    let normal = render_model
        .normal
        .data
        .as_ref()
        .map(|raster| images.add(raster_to_image(raster, TileChannel::Normal)))
        .unwrap_or_else(|| defaults.normal.clone());

    TerrainTileMaterial {
        tile: TerrainTileUniform {
            elevation_matrix: render_model.elevation.matrix.as_mat4(),
            color_matrix: render_model.color.matrix.as_mat4(),
            normal_matrix: render_model.normal.matrix.as_mat4(),
        },
        elevation: Some(elevation),
        color: Some(color),
        normal: Some(normal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_rasters_get_a_mip_chain() {
        let mut raster = Raster::new(PixelFormat::Rgba8, 16, 16);
        raster.fill([0.5, 0.5, 0.5, 1.0]);

        let image = raster_to_image(&raster, TileChannel::Color);
        assert_eq!(image.texture_descriptor.mip_level_count, 5);

        // 16^2 + 8^2 + 4^2 + 2^2 + 1 pixels, 4 bytes each
        let expected = (256 + 64 + 16 + 4 + 1) * 4;
        assert_eq!(image.data.len(), expected);
        assert_eq!(image.texture_descriptor.format, TextureFormat::Rgba8UnormSrgb);
    }

    #[test]
    fn elevation_stays_r32float_without_mips() {
        let image = raster_to_image(Heightfield::new(4, 4).raster(), TileChannel::Elevation);
        assert_eq!(image.texture_descriptor.format, TextureFormat::R32Float);
        assert_eq!(image.texture_descriptor.mip_level_count, 1);
    }

    #[test]
    fn normal_rgb8_pads_to_linear_rgba() {
        let mut raster = Raster::new(PixelFormat::Rgb8, 2, 2);
        raster.fill([0.5, 0.5, 1.0, 1.0]);

        let image = raster_to_image(&raster, TileChannel::Normal);
        assert_eq!(image.texture_descriptor.format, TextureFormat::Rgba8Unorm);
        assert_eq!(image.data.len(), 2 * 2 * 4);
        assert_eq!(image.data[3], 255);
    }

    #[test]
    fn mip_generation_averages_quads() {
        // 2x2 black/white checker collapses to mid gray
        let mut data = vec![
            0, 0, 0, 255, 255, 255, 255, 255, //
            255, 255, 255, 255, 0, 0, 0, 255,
        ];
        let levels = generate_rgba_mipmaps(&mut data, 2, 2);
        assert_eq!(levels, 2);
        assert_eq!(&data[16..20], &[127, 127, 127, 255]);
    }
}
