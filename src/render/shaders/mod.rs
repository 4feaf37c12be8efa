use bevy::asset::load_internal_asset;
use bevy::prelude::*;

pub(crate) const TERRAIN_SHADER: Handle<Shader> =
    Handle::weak_from_u128(0x4c6f_8d21_aa04_43b1_92e5_cf70_1b6d_e2a7);

pub(crate) fn load_terrain_shaders(app: &mut App) {
    load_internal_asset!(app, TERRAIN_SHADER, "terrain.wgsl", Shader::from_wgsl);
}
