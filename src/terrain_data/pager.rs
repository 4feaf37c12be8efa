use crate::{
    jobs::{DisposalRing, Job, JobSystem, RenderRequests, UpdateQueue},
    layer::IoContext,
    map::Map,
    plugin::TerrainSettings,
    pyramid::{Profile, TileKey},
    render::{make_tile_material, TerrainStateDefaults, TerrainTileMaterial},
    terrain::{Terrain, TerrainConfig},
    terrain_data::{
        geometry_pool::GeometryPool,
        model_factory::{CreateTileManifest, MapSnapshot, TileModelFactory},
        tile_model::{RenderBinding, TileModel},
        tile_node::{build_subtiles, should_subdivide, NewSubtile, TileNode},
        tracker::SentryTracker,
    },
    terrain_view::{TerrainViewComponents, ViewState},
};
use bevy::{prelude::*, utils::HashMap};

/// A finished subtile build waiting its turn to enter the scene graph.
struct AttachOp {
    parent: TileKey,
    subtiles: Vec<NewSubtile>,
}

fn load_priority(range: f32, lod: u32) -> f32 {
    -(range.max(0.0).sqrt() * lod as f32)
}

/// The LOD scheduler and tile registry of one terrain.
///
/// Record traversals ping the pager with what each tile needs; the update
/// pass drains those queues, dispatches async loads, merges finished
/// results into the live tiles, and expires whatever stopped being
/// pinged. Tiles reference each other only through the registry, so the
/// pager owns every tile's lifetime outright.
#[derive(Component)]
pub struct TilePager {
    profile: Profile,
    pub(crate) tiles: HashMap<TileKey, TileNode>,
    tracker: SentryTracker<TileKey>,

    update_data: Vec<TileKey>,
    load_subtiles: Vec<TileKey>,
    load_data: Vec<TileKey>,
    merge_data: Vec<TileKey>,
    attach_queue: UpdateQueue<AttachOp>,

    pub(crate) geometry_pool: GeometryPool,
    frame: u32,
    last_flush_frame: u32,
    map_revision: i32,
}

impl TilePager {
    pub fn new(profile: Profile, settings: &TerrainSettings) -> Self {
        Self {
            geometry_pool: GeometryPool::new(settings.tile_size, settings.skirt_ratio),
            profile,
            tiles: HashMap::default(),
            tracker: SentryTracker::default(),
            update_data: Vec::new(),
            load_subtiles: Vec::new(),
            load_data: Vec::new(),
            merge_data: Vec::new(),
            attach_queue: UpdateQueue::default(),
            frame: 0,
            last_flush_frame: 0,
            map_revision: 0,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn get_tile(&self, key: &TileKey) -> Option<&TileNode> {
        self.tiles.get(key)
    }

    /// Creates the root tiles. They never expire and anchor every
    /// traversal.
    pub fn create_root_tiles(&mut self, mut spawn: impl FnMut(&mut TileNode, &mut GeometryPool)) {
        for key in self.profile.root_keys() {
            let mut node = TileNode::new(key.clone(), true);
            spawn(&mut node, &mut self.geometry_pool);
            node.tracker_token = Some(self.tracker.use_(&key, None));
            self.tiles.insert(key, node);
        }
    }

    /// The record-time half of the contract: walk the resident quadtree
    /// for one view, decide what is drawn and what is needed, and ping
    /// every live tile.
    pub(crate) fn record_view(&mut self, view: &ViewState, settings: &TerrainSettings) {
        enum Visit {
            Full(TileKey),
            PingOnly(TileKey),
        }

        let geocentric = self.profile.srs().is_geodetic();
        let mut stack: Vec<Visit> = self
            .profile
            .root_keys()
            .into_iter()
            .map(Visit::Full)
            .collect();

        while let Some(visit) = stack.pop() {
            let (key, full) = match visit {
                Visit::Full(key) => (key, true),
                Visit::PingOnly(key) => (key, false),
            };

            let frame = self.frame;
            let Some(tile) = self.tiles.get_mut(&key) else {
                continue;
            };

            let new_frame = tile.last_traversal_frame != frame;
            tile.last_traversal_frame = frame;

            let distance = view.distance_to(tile.surface.bound.center) as f32;
            tile.last_traversal_range = if new_frame {
                distance
            } else {
                tile.last_traversal_range.min(distance)
            };

            if tile.subtiles_attached {
                tile.needs_subtiles = false;
            }

            if full {
                let visible = tile.surface.is_visible(view, geocentric);
                let subdivide = visible
                    && key.lod < settings.max_lod
                    && should_subdivide(
                        distance as f64,
                        tile.surface.bound.radius,
                        settings.tile_pixel_size,
                        settings.screen_space_error,
                        view.viewport_height,
                    );

                if visible {
                    if subdivide && tile.subtiles_attached {
                        // subtiles substitute for this tile; visit all
                        // four so the quad lives and dies as a unit
                        for quadrant in 0..4 {
                            stack.push(Visit::Full(key.child(quadrant)));
                        }
                    } else {
                        tile.draw = true;
                        if subdivide && tile.subtiles_loader.empty() {
                            tile.needs_subtiles = true;
                        }
                    }
                }

                // without aggressive pageout, resident subtiles stay
                // pinged even while the parent draws itself
                if !settings.aggressive_pageout
                    && tile.subtiles_attached
                    && !(visible && subdivide)
                {
                    for quadrant in 0..4 {
                        stack.push(Visit::PingOnly(key.child(quadrant)));
                    }
                }
            }

            self.ping(&key);
        }
    }

    /// Record-time ping: refresh the tracker and enqueue whatever the
    /// tile needs next.
    pub(crate) fn ping(&mut self, key: &TileKey) {
        let parent_has_data = match key.parent() {
            Some(parent_key) => self
                .tiles
                .get(&parent_key)
                .map(TileNode::has_data)
                .unwrap_or(true),
            None => true,
        };

        let TilePager {
            tiles,
            tracker,
            update_data,
            load_subtiles,
            load_data,
            merge_data,
            ..
        } = self;

        let Some(tile) = tiles.get_mut(key) else {
            return;
        };

        tile.tracker_token = Some(tracker.use_(key, tile.tracker_token));

        // progressive loading: a tile loads only once its parent merged
        if parent_has_data && tile.data_loader.empty() {
            load_data.push(key.clone());
        }

        // subtiles wait for this tile's own data (and with it, elevation)
        if tile.has_data() && tile.needs_subtiles {
            load_subtiles.push(key.clone());
        }

        // the empty merger slot caps this at one merge per tile per frame
        if tile.data_loader.available() && tile.data_merger.empty() {
            merge_data.push(key.clone());
        }

        if tile.needs_update {
            update_data.push(key.clone());
        }

        if tile.do_not_expire {
            tile.tracker_token = Some(tracker.use_(key, tile.tracker_token));
        }
    }

    /// Resets merged tiles when the map's layer stack changes so the ping
    /// protocol reloads them against the new revision.
    pub(crate) fn refresh_map_revision(&mut self, map_revision: i32) {
        if map_revision == self.map_revision {
            return;
        }
        self.map_revision = map_revision;

        for tile in self.tiles.values_mut() {
            tile.data_loader.reset();
            tile.data_merger = Job::Empty;
        }
    }

    /// Polls every async slot and queues finished subtile quads for
    /// attachment.
    pub(crate) fn poll_jobs(&mut self) {
        let mut ready = Vec::new();

        for (key, tile) in self.tiles.iter_mut() {
            tile.data_loader.poll();
            tile.subtiles_loader.poll();

            // canceled work is forgotten so the ping protocol can retry
            if tile.data_loader.canceled() {
                tile.data_loader = Job::Empty;
            }
            if tile.subtiles_loader.canceled() {
                tile.subtiles_loader = Job::Empty;
            }

            if !tile.subtiles_attached
                && !tile.subtiles_pending
                && tile.subtiles_loader.available()
            {
                if let Some(subtiles) = tile.subtiles_loader.take() {
                    if subtiles.len() == 4 {
                        // stays resolved while the children are alive
                        tile.subtiles_loader.resolve(Vec::new());
                        tile.subtiles_pending = true;
                        let priority = load_priority(tile.last_traversal_range, key.lod);
                        ready.push((key.clone(), subtiles, priority));
                    } else {
                        // the build observed cancelation
                        tile.subtiles_loader = Job::Empty;
                    }
                }
            }
        }

        for (parent, subtiles, priority) in ready {
            self.attach_queue.push(AttachOp { parent, subtiles }, priority);
        }
    }

    /// Runs the per-tile update hooks queued during record.
    pub(crate) fn drain_update_queue(&mut self) {
        for key in std::mem::take(&mut self.update_data) {
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.needs_update = false;
            }
        }
    }

    /// Dispatches subtile builds queued during record.
    pub(crate) fn dispatch_subtile_builds(&mut self, jobs: &mut JobSystem) {
        for key in std::mem::take(&mut self.load_subtiles) {
            let Some(tile) = self.tiles.get_mut(&key) else {
                continue;
            };
            if !tile.subtiles_loader.empty() {
                continue;
            }

            let parent_key = key.clone();
            let parent_model = tile.render_model.clone();
            let revision = tile.revision;
            let priority = load_priority(tile.last_traversal_range, key.lod);

            tile.subtiles_loader = jobs.dispatch(priority, move |cancel| {
                build_subtiles(&parent_key, &parent_model, revision, cancel)
            });
            tile.needs_subtiles = false;
        }
    }

    /// Dispatches tile-data loads queued during record.
    pub(crate) fn dispatch_data_loads(&mut self, jobs: &mut JobSystem, snapshot: &MapSnapshot) {
        for key in std::mem::take(&mut self.load_data) {
            let Some(tile) = self.tiles.get_mut(&key) else {
                continue;
            };
            if !tile.data_loader.empty() {
                continue;
            }

            let snapshot = snapshot.clone();
            let job_key = key.clone();
            let priority = load_priority(tile.last_traversal_range, key.lod);

            tile.data_loader = jobs.dispatch(priority, move |cancel| {
                if cancel.canceled() {
                    return TileModel::default();
                }
                TileModelFactory::default().create_tile_model(
                    &snapshot,
                    &job_key,
                    &CreateTileManifest::default(),
                    &IoContext::with_cancel(cancel.clone()),
                )
            });
        }
    }

    /// Applies finished tile models to their tiles. This runs on the
    /// update thread: loads for a tile stay strictly ordered behind the
    /// previous merge.
    pub(crate) fn merge_ready(&mut self, mut on_merged: impl FnMut(&mut TileNode, bool)) {
        for key in std::mem::take(&mut self.merge_data) {
            let Some(tile) = self.tiles.get_mut(&key) else {
                continue;
            };
            if !tile.data_merger.empty() || !tile.data_loader.available() {
                continue;
            }

            let Some(model) = tile.data_loader.take() else {
                continue;
            };
            tile.data_loader.resolve(TileModel::default());

            let mut updated = false;

            if let Some(color) = model.colors.into_iter().next() {
                tile.render_model.color = RenderBinding {
                    name: format!("color {}", color.key),
                    data: Some(color.raster),
                    matrix: color.matrix,
                };
                updated = true;
            }

            if let Some(elevation) = model.elevation {
                tile.render_model.elevation = RenderBinding {
                    name: format!("elevation {}", elevation.key),
                    data: Some(elevation.heightfield.clone()),
                    matrix: elevation.matrix,
                };
                // the surface rebuilds its bounds from the new raster
                tile.set_elevation(Some(elevation.heightfield), elevation.matrix);
                updated = true;
            }

            if let Some(normal) = model.normal {
                tile.render_model.normal = RenderBinding {
                    name: format!("normal {}", normal.key),
                    data: Some(normal.raster),
                    matrix: normal.matrix,
                };
                updated = true;
            }

            tile.render_model.model_matrix = tile.surface.matrix;
            if updated {
                tile.revision = model.revision;
            }

            tile.data_merger.resolve(());
            on_merged(tile, updated);
        }
    }

    /// Attaches at most one finished subtile quad per frame, bounding the
    /// update-thread cost of scene edits. Returns the nodes the new quad
    /// displaced (stale tiles from an earlier quad that had not expired
    /// yet) so the caller can retire their scene state, or `None` when
    /// nothing was attached.
    pub(crate) fn attach_one(
        &mut self,
        mut spawn: impl FnMut(&mut TileNode, &mut GeometryPool),
    ) -> Option<Vec<TileNode>> {
        let tiles = &self.tiles;
        let op = self.attach_queue.pop(|op| !tiles.contains_key(&op.parent))?;

        let mut replaced = Vec::new();

        for subtile in op.subtiles {
            let key = subtile.key.clone();
            let mut node = TileNode::from_subtile(subtile);
            spawn(&mut node, &mut self.geometry_pool);
            node.tracker_token = Some(self.tracker.use_(&key, None));

            if let Some(mut old) = self.tiles.insert(key, node) {
                old.cancel_all();
                if let Some(token) = old.tracker_token.take() {
                    self.tracker.remove(token);
                }
                replaced.push(old);
            }
        }

        if let Some(parent) = self.tiles.get_mut(&op.parent) {
            parent.subtiles_attached = true;
            parent.subtiles_pending = false;
        }
        Some(replaced)
    }

    /// Expires tiles that went unpinged for the expiration window. An
    /// evicted tile clears its parent's subtile slot so the parent draws
    /// its own surface again.
    pub(crate) fn flush_expired(
        &mut self,
        expiration_frames: u32,
        mut dispose: impl FnMut(&mut TileNode),
    ) {
        if self.frame.wrapping_sub(self.last_flush_frame) < expiration_frames {
            return;
        }

        let TilePager { tiles, tracker, .. } = self;

        tracker.flush(|key| {
            let Some(tile) = tiles.get(key) else {
                return true;
            };
            if tile.do_not_expire {
                return false;
            }

            let mut tile = tiles.remove(key).unwrap();
            tile.cancel_all();
            dispose(&mut tile);

            if let Some(parent_key) = key.parent() {
                if let Some(parent) = tiles.get_mut(&parent_key) {
                    parent.unload_subtiles();
                }
            }
            true
        });

        self.last_flush_frame = self.frame;
    }

    // -- systems ----------------------------------------------------------

    /// Builds a pager (and its root tiles) for every terrain that gained
    /// a config and a map.
    pub fn initialize(
        terrains: Query<(Entity, &TerrainConfig), (With<Terrain>, With<Map>, Without<TilePager>)>,
        settings: Res<TerrainSettings>,
        defaults: Res<TerrainStateDefaults>,
        mut meshes: ResMut<Assets<Mesh>>,
        mut materials: ResMut<Assets<TerrainTileMaterial>>,
        mut images: ResMut<Assets<Image>>,
        mut commands: Commands,
    ) {
        for (terrain, config) in &terrains {
            let mut pager = TilePager::new(config.profile.clone(), &settings);

            pager.create_root_tiles(|node, pool| {
                spawn_tile_entity(
                    terrain,
                    node,
                    pool,
                    &defaults,
                    &mut meshes,
                    &mut materials,
                    &mut images,
                    &mut commands,
                );
            });

            info!(
                "terrain pager ready: {} root tiles over {}",
                pager.tile_count(),
                pager.profile.extent()
            );
            commands.entity(terrain).insert(pager);
        }
    }

    /// The record pass: traverse the resident tiles for every view.
    pub fn record(
        mut pagers: Query<(Entity, &mut TilePager)>,
        view_states: Res<TerrainViewComponents<ViewState>>,
        settings: Res<TerrainSettings>,
    ) {
        for (terrain, mut pager) in &mut pagers {
            pager.frame = pager.frame.wrapping_add(1);

            for tile in pager.tiles.values_mut() {
                tile.draw = false;
            }

            for ((terrain_entity, _view), view_state) in view_states.iter() {
                if *terrain_entity == terrain {
                    pager.record_view(view_state, &settings);
                }
            }
        }
    }

    /// The update pass: drain the record queues, move async work along,
    /// and expire orphans.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        mut pagers: Query<(Entity, &mut TilePager, &Map), With<Terrain>>,
        settings: Res<TerrainSettings>,
        defaults: Res<TerrainStateDefaults>,
        render_requests: Res<RenderRequests>,
        mut jobs: ResMut<JobSystem>,
        mut disposal: ResMut<DisposalRing>,
        mut meshes: ResMut<Assets<Mesh>>,
        mut materials: ResMut<Assets<TerrainTileMaterial>>,
        mut images: ResMut<Assets<Image>>,
        mut commands: Commands,
    ) {
        for (terrain, mut pager, map) in &mut pagers {
            pager.refresh_map_revision(map.revision());
            pager.poll_jobs();
            pager.drain_update_queue();
            pager.dispatch_subtile_builds(&mut jobs);

            let snapshot = MapSnapshot::of(map);
            pager.dispatch_data_loads(&mut jobs, &snapshot);

            pager.merge_ready(|tile, updated| {
                if !updated {
                    return;
                }

                let material = materials.add(make_tile_material(
                    &tile.render_model,
                    &mut images,
                    &defaults,
                ));
                if let Some(old) = tile.material.take() {
                    disposal.dispose(old);
                }
                if let Some(entity) = tile.entity {
                    commands.entity(entity).insert((
                        MeshMaterial3d(material.clone()),
                        Transform::from_matrix(tile.surface.matrix.as_mat4()),
                    ));
                }
                tile.material = Some(material);
                render_requests.request_frame();
            });

            let attached = pager.attach_one(|node, pool| {
                spawn_tile_entity(
                    terrain,
                    node,
                    pool,
                    &defaults,
                    &mut meshes,
                    &mut materials,
                    &mut images,
                    &mut commands,
                );
            });
            if let Some(mut replaced) = attached {
                for old in &mut replaced {
                    if let Some(entity) = old.entity.take() {
                        commands.entity(entity).despawn();
                    }
                    if let Some(material) = old.material.take() {
                        disposal.dispose(material);
                    }
                }
                render_requests.request_frame();
            }

            pager.flush_expired(settings.expiration_frames, |tile| {
                if let Some(entity) = tile.entity.take() {
                    commands.entity(entity).despawn();
                }
                if let Some(material) = tile.material.take() {
                    disposal.dispose(material);
                }
            });
        }
    }

    /// Syncs the frame's draw set onto the tile entities.
    pub fn apply_visibility(
        pagers: Query<&TilePager>,
        mut visibilities: Query<&mut Visibility>,
    ) {
        for pager in &pagers {
            for tile in pager.tiles.values() {
                let Some(entity) = tile.entity else { continue };
                if let Ok(mut visibility) = visibilities.get_mut(entity) {
                    let target = if tile.draw {
                        Visibility::Inherited
                    } else {
                        Visibility::Hidden
                    };
                    if *visibility != target {
                        *visibility = target;
                    }
                }
            }
        }
    }
}

/// Gives a tile its scene-graph presence: the pooled mesh, a material
/// built from its (possibly inherited) render model, and an entity
/// parented to the terrain.
#[allow(clippy::too_many_arguments)]
fn spawn_tile_entity(
    terrain: Entity,
    node: &mut TileNode,
    pool: &mut GeometryPool,
    defaults: &TerrainStateDefaults,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<TerrainTileMaterial>,
    images: &mut Assets<Image>,
    commands: &mut Commands,
) {
    let mesh = pool.get_pooled_geometry(&node.key, meshes);
    let material = materials.add(make_tile_material(&node.render_model, images, defaults));

    let entity = commands
        .spawn((
            Mesh3d(mesh),
            MeshMaterial3d(material.clone()),
            Transform::from_matrix(node.surface.matrix.as_mat4()),
            Visibility::Hidden,
        ))
        .set_parent(terrain)
        .id();

    node.entity = Some(entity);
    node.material = Some(material);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::memory::MemoryImageSource;
    use crate::layer::{ImageLayer, Layer};
    use crate::raster::{PixelFormat, Raster};
    use std::time::Duration;

    fn test_settings() -> TerrainSettings {
        TerrainSettings {
            concurrency: 2,
            ..Default::default()
        }
    }

    fn test_pager() -> TilePager {
        let mut pager = TilePager::new(Profile::global_geodetic(), &test_settings());
        pager.create_root_tiles(|_, _| {});
        pager
    }

    fn key(pager: &TilePager, lod: u32, x: u32, y: u32) -> TileKey {
        TileKey::new(lod, x, y, pager.profile.clone())
    }

    fn test_map(profile: &Profile, tiles: &[(u32, u32, u32)]) -> Map {
        let mut source = MemoryImageSource::new(profile.clone());
        for &(lod, x, y) in tiles {
            let mut raster = Raster::new(PixelFormat::Rgba8, 4, 4);
            raster.fill([0.3, 0.6, 0.9, 1.0]);
            source.insert(&TileKey::new(lod, x, y, profile.clone()), raster);
        }
        let mut map = Map::new("test");
        map.add_layer(Layer::image(ImageLayer::new("color", Box::new(source))));
        map.open_all_layers(&IoContext::default());
        map
    }

    fn settle(pager: &mut TilePager, jobs: &mut JobSystem) {
        for _ in 0..400 {
            jobs.pump();
            pager.poll_jobs();
            let busy = pager
                .tiles
                .values()
                .any(|tile| tile.data_loader.working() || tile.subtiles_loader.working());
            if !busy {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("pager jobs did not settle");
    }

    #[test]
    fn roots_exist_and_never_expire() {
        let mut pager = test_pager();
        assert_eq!(pager.tile_count(), 2);

        // many updates without a single ping
        for _ in 0..10 {
            pager.frame += 1;
            pager.flush_expired(2, |_| {});
        }
        assert_eq!(pager.tile_count(), 2);
    }

    #[test]
    fn load_merge_cycle_for_a_root() {
        let mut pager = test_pager();
        let mut jobs = JobSystem::new(2);
        let map = test_map(&pager.profile.clone(), &[(0, 0, 0), (0, 1, 0)]);
        let root = key(&pager, 0, 0, 0);

        // record frame: root has no loader, parent is None
        pager.frame += 1;
        pager.ping(&root);
        assert_eq!(pager.load_data, [root.clone()]);

        pager.dispatch_data_loads(&mut jobs, &MapSnapshot::of(&map));
        assert!(pager.get_tile(&root).unwrap().data_loader.working());

        settle(&mut pager, &mut jobs);
        assert!(pager.get_tile(&root).unwrap().data_loader.available());

        // next ping queues the merge, not another load
        pager.ping(&root);
        assert!(pager.load_data.is_empty());
        assert_eq!(pager.merge_data, [root.clone()]);

        let mut merged = 0;
        pager.merge_ready(|tile, updated| {
            assert!(updated);
            assert!(tile.render_model.color.data.is_some());
            merged += 1;
        });
        assert_eq!(merged, 1);

        let tile = pager.get_tile(&root).unwrap();
        assert!(tile.has_data());
        // the loader slot stays resolved: no reload until a revision change
        assert!(tile.data_loader.available());
    }

    #[test]
    fn merge_is_gated_to_one_per_tile() {
        let mut pager = test_pager();
        let root = key(&pager, 0, 0, 0);

        pager
            .tiles
            .get_mut(&root)
            .unwrap()
            .data_loader
            .resolve(TileModel::default());

        // two views ping in the same frame
        pager.ping(&root);
        pager.ping(&root);
        assert_eq!(pager.merge_data.len(), 2);

        let mut merged = 0;
        pager.merge_ready(|_, _| merged += 1);
        assert_eq!(merged, 1, "the second queue entry must find the merger busy");
    }

    #[test]
    fn subtile_quads_attach_as_a_unit() {
        let mut pager = test_pager();
        let mut jobs = JobSystem::new(2);
        let root = key(&pager, 0, 0, 0);

        {
            let tile = pager.tiles.get_mut(&root).unwrap();
            tile.data_merger.resolve(());
            tile.needs_subtiles = true;
        }

        pager.ping(&root);
        assert_eq!(pager.load_subtiles, [root.clone()]);

        pager.dispatch_subtile_builds(&mut jobs);
        settle(&mut pager, &mut jobs);
        pager.poll_jobs();

        assert!(pager.attach_one(|_, _| {}).is_some());
        assert_eq!(pager.tile_count(), 2 + 4);
        assert!(pager.get_tile(&root).unwrap().subtiles_attached);

        for quadrant in 0..4 {
            let child = root.child(quadrant);
            assert!(pager.get_tile(&child).is_some(), "missing child {child}");
        }
    }

    #[test]
    fn unpinged_children_expire_and_release_the_parent() {
        let mut pager = test_pager();
        let mut jobs = JobSystem::new(2);
        let root = key(&pager, 0, 0, 0);

        {
            let tile = pager.tiles.get_mut(&root).unwrap();
            tile.data_merger.resolve(());
            tile.needs_subtiles = true;
        }

        // frame F: everything pinged
        pager.frame += 1;
        pager.ping(&root);
        pager.dispatch_subtile_builds(&mut jobs);
        settle(&mut pager, &mut jobs);
        pager.poll_jobs();
        pager.attach_one(|_, _| {});

        for quadrant in 0..4 {
            pager.ping(&root.child(quadrant));
        }
        pager.ping(&root);
        pager.flush_expired(2, |_| {});
        assert_eq!(pager.tile_count(), 6);

        // the camera looks elsewhere; only the root keeps itself alive
        let mut disposed = Vec::new();
        for _ in 0..4 {
            pager.frame += 1;
            pager.ping(&root);
            pager.flush_expired(2, |tile| disposed.push(tile.key.clone()));
        }

        assert_eq!(disposed.len(), 4);
        assert_eq!(pager.tile_count(), 2);

        let parent = pager.get_tile(&root).unwrap();
        assert!(!parent.subtiles_attached);
        assert!(parent.subtiles_loader.empty());
    }

    #[test]
    fn cancel_on_unload_discards_the_load() {
        let mut pager = test_pager();
        let mut jobs = JobSystem::new(1);
        let map = test_map(&pager.profile.clone(), &[(0, 0, 0)]);
        let root = key(&pager, 0, 0, 0);

        pager.ping(&root);
        pager.dispatch_data_loads(&mut jobs, &MapSnapshot::of(&map));

        // evicted before the job resolves: pretend the root may expire
        pager.tiles.get_mut(&root).unwrap().do_not_expire = false;
        pager.frame += 2;
        pager.flush_expired(2, |_| {});
        pager.frame += 2;
        pager.flush_expired(2, |_| {});
        assert!(pager.get_tile(&root).is_none());

        // no tile, no merge: the queues stay empty
        jobs.pump();
        pager.poll_jobs();
        pager.merge_ready(|_, _| panic!("nothing should merge"));
        assert!(pager.merge_data.is_empty());
    }

    #[test]
    fn map_revision_change_resets_merged_tiles() {
        let mut pager = test_pager();
        let root = key(&pager, 0, 0, 0);

        {
            let tile = pager.tiles.get_mut(&root).unwrap();
            tile.data_loader.resolve(TileModel::default());
            tile.data_merger.resolve(());
        }

        pager.refresh_map_revision(1);
        let tile = pager.get_tile(&root).unwrap();
        assert!(tile.data_loader.empty());
        assert!(tile.data_merger.empty());

        // pinging now requests a fresh load
        pager.ping(&root);
        assert_eq!(pager.load_data, [root]);
    }
}
