use crate::{
    jobs::Job,
    math::DSphere,
    pyramid::TileKey,
    raster::Heightfield,
    render::TerrainTileMaterial,
    terrain_data::{
        geometry_pool::{surface_point, tile_frame},
        tile_model::{quadrant_scale_bias, TerrainTileRenderModel, TileModel},
    },
    terrain_view::ViewState,
};
use bevy::math::{DMat4, DVec3};
use bevy::prelude::*;
use std::sync::Arc;

/// Holds the transform and bounds information for one terrain tile
/// surface: the local-to-world matrix, the bounding sphere, and a cache
/// of world-space sample points (a 3x3 grid at both elevation limits)
/// used for culling. The points are recomputed whenever the elevation
/// changes.
#[derive(Clone, Debug)]
pub struct SurfaceNode {
    key: TileKey,
    pub matrix: DMat4,
    pub bound: DSphere,
    world_points: [DVec3; 18],
    elevation: Option<(Arc<Heightfield>, DMat4)>,
}

impl SurfaceNode {
    pub fn new(key: TileKey) -> Self {
        let mut surface = Self {
            matrix: tile_frame(&key),
            key,
            bound: DSphere::default(),
            world_points: [DVec3::ZERO; 18],
            elevation: None,
        };
        surface.recompute_bound();
        surface
    }

    pub fn elevation(&self) -> Option<&(Arc<Heightfield>, DMat4)> {
        self.elevation.as_ref()
    }

    pub fn set_elevation(&mut self, heightfield: Option<Arc<Heightfield>>, matrix: DMat4) {
        self.elevation = heightfield.map(|hf| (hf, matrix));
        self.recompute_bound();
    }

    /// The world-space elevation limits covered by the current raster.
    fn elevation_limits(&self) -> (f64, f64) {
        match &self.elevation {
            Some((heightfield, _)) => match heightfield.height_range() {
                Some((min, max)) => (min as f64, max as f64),
                None => (0.0, 0.0),
            },
            None => (0.0, 0.0),
        }
    }

    pub fn recompute_bound(&mut self) {
        let (min_elev, max_elev) = self.elevation_limits();
        let geodetic = self.key.profile.srs().is_geodetic();
        let extent = self.key.extent();

        let mut index = 0;
        for elev in [min_elev, max_elev] {
            for j in 0..3 {
                for i in 0..3 {
                    let u = i as f64 / 2.0;
                    let v = j as f64 / 2.0;
                    let (base, up) = surface_point(&self.key, u, v, geodetic);
                    self.world_points[index] = base + up * elev;
                    index += 1;
                }
            }
        }

        if geodetic {
            self.bound = extent.create_world_bounding_sphere(min_elev, max_elev);
        } else {
            let mut lo = DVec3::splat(f64::MAX);
            let mut hi = DVec3::splat(-f64::MAX);
            for p in &self.world_points {
                lo = lo.min(*p);
                hi = hi.max(*p);
            }
            let center = (lo + hi) * 0.5;
            let radius = self
                .world_points
                .iter()
                .map(|p| (*p - center).length())
                .fold(0.0, f64::max);
            self.bound = DSphere { center, radius };
        }
    }

    /// World-space visibility: the sample-point set against the frustum,
    /// then against the horizon for geocentric worlds.
    pub fn is_visible(&self, view: &ViewState, geocentric: bool) -> bool {
        for half_space in &view.frustum.half_spaces {
            let plane = half_space.normal_d();
            let outside = self
                .world_points
                .iter()
                .all(|p| plane.dot(p.as_vec3().extend(1.0)) < 0.0);
            if outside {
                return false;
            }
        }

        if geocentric {
            if let Some(horizon) = &view.horizon {
                // the upper sample points; a tile is gone only when every
                // one of them is below the horizon
                return self.world_points[9..]
                    .iter()
                    .any(|p| horizon.is_visible(*p));
            }
        }

        true
    }
}

/// The result of building one subtile on a worker: everything the update
/// thread needs to attach it to the live graph.
pub struct NewSubtile {
    pub key: TileKey,
    pub surface: SurfaceNode,
    pub render_model: TerrainTileRenderModel,
    pub revision: i32,
}

/// One resident terrain tile: its render model, surface bounds, async
/// work slots, and traversal bookkeeping. Tiles reference each other by
/// key through the pager's registry, never directly.
pub struct TileNode {
    pub key: TileKey,
    /// Root tiles never expire.
    pub do_not_expire: bool,
    /// Map revision currently reflected by the render model.
    pub revision: i32,
    pub render_model: TerrainTileRenderModel,
    pub surface: SurfaceNode,
    pub entity: Option<Entity>,
    pub material: Option<Handle<TerrainTileMaterial>>,

    pub data_loader: Job<TileModel>,
    pub data_merger: Job<()>,
    pub subtiles_loader: Job<Vec<NewSubtile>>,
    /// A finished quad is sitting in the attach queue.
    pub subtiles_pending: bool,
    /// The four children are present in the registry and the graph.
    pub subtiles_attached: bool,

    pub needs_subtiles: bool,
    pub needs_update: bool,
    pub last_traversal_frame: u32,
    pub last_traversal_range: f32,
    /// This tile's own surface is part of the current frame's draw set.
    pub draw: bool,
    pub tracker_token: Option<usize>,
}

impl TileNode {
    pub fn new(key: TileKey, do_not_expire: bool) -> Self {
        let surface = SurfaceNode::new(key.clone());
        let mut render_model = TerrainTileRenderModel::default();
        render_model.model_matrix = surface.matrix;

        Self {
            key,
            do_not_expire,
            revision: 0,
            render_model,
            surface,
            entity: None,
            material: None,
            data_loader: Job::Empty,
            data_merger: Job::Empty,
            subtiles_loader: Job::Empty,
            subtiles_pending: false,
            subtiles_attached: false,
            needs_subtiles: false,
            needs_update: false,
            last_traversal_frame: 0,
            last_traversal_range: f32::MAX,
            draw: false,
            tracker_token: None,
        }
    }

    /// Builds one child: it starts life with the parent's render model
    /// seen through the child's quadrant window, so it has something
    /// correct-ish to draw while its own data loads.
    pub fn build_subtile(&self, quadrant: u32) -> NewSubtile {
        build_subtile(&self.key, &self.render_model, self.revision, quadrant)
    }

    pub fn from_subtile(subtile: NewSubtile) -> Self {
        let mut node = Self::new(subtile.key, false);
        node.surface = subtile.surface;
        node.render_model = subtile.render_model;
        node.revision = subtile.revision;
        node
    }

    /// A tile has data once its first merge has resolved.
    pub fn has_data(&self) -> bool {
        self.data_merger.available()
    }

    pub fn set_elevation(&mut self, heightfield: Option<Arc<Heightfield>>, matrix: DMat4) {
        let unchanged = match (&self.surface.elevation, &heightfield) {
            (Some((current, m)), Some(new)) => Arc::ptr_eq(current, new) && *m == matrix,
            (None, None) => true,
            _ => false,
        };

        if !unchanged || !self.surface.bound.valid() {
            self.surface.set_elevation(heightfield, matrix);
        }
    }

    /// Drops the child quad: called when the subtiles expire so this
    /// tile draws its own surface again.
    pub fn unload_subtiles(&mut self) {
        self.subtiles_loader.reset();
        self.subtiles_pending = false;
        self.subtiles_attached = false;
        self.needs_subtiles = false;
    }

    /// Abandon all in-flight work, before the tile is dropped.
    pub fn cancel_all(&mut self) {
        self.data_loader.cancel();
        self.subtiles_loader.cancel();
    }
}

/// One child of a tile, built from the parent's state alone so it can
/// run on a worker thread.
pub fn build_subtile(
    parent_key: &TileKey,
    parent_model: &TerrainTileRenderModel,
    revision: i32,
    quadrant: u32,
) -> NewSubtile {
    let key = parent_key.child(quadrant);

    let mut render_model = parent_model.clone();
    render_model.apply_scale_bias(&quadrant_scale_bias(quadrant));

    let mut surface = SurfaceNode::new(key.clone());
    surface.set_elevation(
        render_model.elevation.data.clone(),
        render_model.elevation.matrix,
    );
    render_model.model_matrix = surface.matrix;

    NewSubtile {
        key,
        surface,
        render_model,
        revision,
    }
}

/// All four children as a unit; a cancelation mid-build yields an empty
/// set, which the pager treats as "never happened".
pub fn build_subtiles(
    parent_key: &TileKey,
    parent_model: &TerrainTileRenderModel,
    revision: i32,
    cancel: &crate::jobs::CancelToken,
) -> Vec<NewSubtile> {
    let mut subtiles = Vec::with_capacity(4);
    for quadrant in 0..4 {
        if cancel.canceled() {
            return Vec::new();
        }
        subtiles.push(build_subtile(parent_key, parent_model, revision, quadrant));
    }
    subtiles
}

/// The screen-space-size subdivision criterion: subdivide when the
/// bound's projected radius exceeds the pixel budget.
pub fn should_subdivide(
    distance: f64,
    radius: f64,
    tile_pixel_size: f32,
    screen_space_error: f32,
    viewport_height: f32,
) -> bool {
    let min_screen_height_ratio =
        ((tile_pixel_size + screen_space_error) / viewport_height) as f64;
    distance > 0.0 && radius > distance * min_screen_height_ratio
}
