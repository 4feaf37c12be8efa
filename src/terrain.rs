use crate::pyramid::Profile;
use bevy::{prelude::*, utils::HashMap};
use derive_more::{Deref, DerefMut};

/// Marks an entity as a terrain. The pager, its map, and the spawned
/// tile surfaces all hang off this entity.
#[derive(Component, Clone, Copy, Default)]
#[require(Transform, Visibility)]
pub struct Terrain;

/// Static configuration of one terrain: which tile pyramid it pages.
#[derive(Component, Clone)]
pub struct TerrainConfig {
    pub profile: Profile,
}

impl TerrainConfig {
    pub fn geodetic() -> Self {
        Self {
            profile: Profile::global_geodetic(),
        }
    }

    pub fn mercator() -> Self {
        Self {
            profile: Profile::spherical_mercator(),
        }
    }
}

/// Resource that stores components associated to a terrain entity.
#[derive(Resource, Deref, DerefMut)]
pub struct TerrainComponents<C>(pub HashMap<Entity, C>);

impl<C> Default for TerrainComponents<C> {
    fn default() -> Self {
        Self(HashMap::default())
    }
}
