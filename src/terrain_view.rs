//! Types for configuring terrain views.

use crate::{
    math::{Ellipsoid, Horizon},
    terrain::Terrain,
};
use bevy::{math::DVec3, prelude::*, render::primitives::Frustum, utils::HashMap};
use derive_more::{Deref, DerefMut};

/// Marks a camera as a terrain viewer. Every (terrain, view) pair gets
/// its own [`ViewState`].
#[derive(Component, Clone, Copy, Default)]
pub struct TerrainView;

/// Resource that stores components associated to a terrain entity and a
/// view entity.
#[derive(Resource, Deref, DerefMut)]
pub struct TerrainViewComponents<C>(pub HashMap<(Entity, Entity), C>);

impl<C> Default for TerrainViewComponents<C> {
    fn default() -> Self {
        Self(HashMap::default())
    }
}

/// The per-view transient data the pager consumes during record: where
/// the eye is, the frustum, the viewport height driving the screen-space
/// error, and the horizon occluder for geocentric worlds.
#[derive(Clone, Debug)]
pub struct ViewState {
    pub eye: DVec3,
    pub viewport_height: f32,
    pub frustum: Frustum,
    pub horizon: Option<Horizon>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            eye: DVec3::ZERO,
            viewport_height: 1080.0,
            frustum: Frustum::default(),
            horizon: None,
        }
    }
}

impl ViewState {
    /// Distance from the eye to a world point.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (point - self.eye).length()
    }
}

/// Refreshes the view states from the live cameras, once per frame
/// before the pager records.
pub fn sync_view_states(
    mut view_states: ResMut<TerrainViewComponents<ViewState>>,
    terrains: Query<Entity, With<Terrain>>,
    views: Query<(Entity, &GlobalTransform, &Camera, &Frustum), With<TerrainView>>,
) {
    for terrain in &terrains {
        for (view, transform, camera, frustum) in &views {
            let eye = transform.translation().as_dvec3();

            let viewport_height = camera
                .physical_viewport_size()
                .map(|size| size.y as f32)
                .unwrap_or(1080.0);

            view_states.insert(
                (terrain, view),
                ViewState {
                    eye,
                    viewport_height,
                    frustum: frustum.clone(),
                    horizon: Some(Horizon::new(Ellipsoid::WGS84, eye)),
                },
            );
        }
    }
}
