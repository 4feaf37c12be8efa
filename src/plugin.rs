use crate::{
    jobs::{DisposalRing, JobSystem, RenderRequests},
    layer::IoContext,
    map::Map,
    render::{load_terrain_shaders, TerrainStateDefaults, TerrainTileMaterial},
    terrain_data::TilePager,
    terrain_view::{sync_view_states, TerrainViewComponents, ViewState},
};
use bevy::{prelude::*, window::RequestRedraw};

/// Tuning knobs of the terrain engine.
#[derive(Resource, Clone)]
pub struct TerrainSettings {
    /// Grid vertices per tile side.
    pub tile_size: u32,
    /// Skirt depth as a fraction of tile width.
    pub skirt_ratio: f32,
    /// On-screen size a tile is meant to occupy, in pixels.
    pub tile_pixel_size: f32,
    /// Extra screen-space slack before subdividing, in pixels.
    pub screen_space_error: f32,
    /// Deepest level the pager will subdivide to.
    pub max_lod: u32,
    /// Worker threads loading tile data.
    pub concurrency: usize,
    /// Frames a tile may go unpinged before it expires.
    pub expiration_frames: u32,
    /// Ping subtiles only while their parent descends into them, paging
    /// quads out as soon as the view moves away. Trades memory for
    /// popping.
    pub aggressive_pageout: bool,
    /// Reserved for record traversals running in parallel across views;
    /// the ECS schedule records views sequentially.
    pub support_multi_threaded_record: bool,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            tile_size: 17,
            skirt_ratio: 0.025,
            tile_pixel_size: 256.0,
            screen_space_error: 25.0,
            max_lod: 19,
            concurrency: 4,
            expiration_frames: 2,
            aggressive_pageout: true,
            support_multi_threaded_record: false,
        }
    }
}

/// The terrain plugin: registers the tile material, the job system, and
/// the record/update passes that drive the pager.
pub struct TerrainPlugin;

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(MaterialPlugin::<TerrainTileMaterial>::default())
            .init_resource::<TerrainSettings>()
            .init_resource::<JobSystem>()
            .init_resource::<DisposalRing>()
            .init_resource::<RenderRequests>()
            .init_resource::<TerrainViewComponents<ViewState>>()
            .init_resource::<TerrainStateDefaults>()
            .add_systems(
                Last,
                (
                    open_map_layers,
                    TilePager::initialize,
                    sync_view_states,
                    TilePager::record,
                    JobSystem::run,
                    TilePager::update,
                    TilePager::apply_visibility,
                    DisposalRing::rotate,
                    forward_render_requests,
                )
                    .chain(),
            );
    }

    fn finish(&self, app: &mut App) {
        load_terrain_shaders(app);
    }
}

/// Opens newly added or changed maps' layers.
fn open_map_layers(maps: Query<&Map, Changed<Map>>) {
    for map in &maps {
        map.open_all_layers(&IoContext::default());
    }
}

/// Render-on-demand: turn pending frame requests into window redraws.
fn forward_render_requests(
    requests: Res<RenderRequests>,
    mut redraw: EventWriter<RequestRedraw>,
) {
    if requests.drain() > 0 {
        redraw.send(RequestRedraw);
    }
}
