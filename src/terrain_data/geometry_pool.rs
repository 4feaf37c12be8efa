use crate::{math::Srs, pyramid::TileKey};
use bevy::{
    asset::RenderAssetUsages,
    math::DVec3,
    prelude::*,
    render::mesh::{Indices, PrimitiveTopology},
};
use itertools::iproduct;
use std::collections::HashMap;

/// Identifies a congruence class of tile meshes.
///
/// Geodetic tiles of the same (lod, row) are congruent up to a rotation
/// about the polar axis, so they can share one mesh built in the tile's
/// centroid frame. Projected tiles only differ per lod.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    pub lod: u32,
    pub row: u32,
}

impl GeometryKey {
    pub fn for_tile(key: &TileKey) -> Self {
        if key.profile.srs().is_geodetic() {
            Self {
                lod: key.lod,
                row: key.y,
            }
        } else {
            Self {
                lod: key.lod,
                row: 0,
            }
        }
    }
}

/// Shared, key-parameterised tile meshes: a regular grid with a skirt
/// ring hanging from its boundary to hide cracks between LODs.
pub struct GeometryPool {
    /// Grid vertices per tile side.
    pub tile_size: u32,
    /// Skirt depth as a fraction of the tile's width.
    pub skirt_ratio: f32,
    meshes: HashMap<GeometryKey, Handle<Mesh>>,
}

impl GeometryPool {
    pub fn new(tile_size: u32, skirt_ratio: f32) -> Self {
        Self {
            tile_size: tile_size.max(2),
            skirt_ratio,
            meshes: HashMap::new(),
        }
    }

    pub fn pooled_count(&self) -> usize {
        self.meshes.len()
    }

    /// Returns the shared mesh for a tile, building it on first use.
    pub fn get_pooled_geometry(
        &mut self,
        key: &TileKey,
        meshes: &mut Assets<Mesh>,
    ) -> Handle<Mesh> {
        let geometry_key = GeometryKey::for_tile(key);
        if let Some(handle) = self.meshes.get(&geometry_key) {
            return handle.clone();
        }

        let mesh = self.build_mesh(key);
        let handle = meshes.add(mesh);
        self.meshes.insert(geometry_key, handle.clone());
        handle
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }

    fn build_mesh(&self, key: &TileKey) -> Mesh {
        let grid = self.tile_size;
        let extent = key.extent();

        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut normals: Vec<[f32; 3]> = Vec::new();
        let mut uvs: Vec<[f32; 2]> = Vec::new();

        // vertex positions in the tile's local frame
        let geodetic = key.profile.srs().is_geodetic();
        let frame = tile_frame(key);
        let inverse = frame.inverse();

        let skirt_depth = if geodetic {
            let width_m = key
                .profile
                .srs()
                .ellipsoid()
                .longitudinal_degrees_to_meters(extent.width(), extent.centroid().1);
            width_m.abs() * self.skirt_ratio as f64
        } else {
            extent.width() * self.skirt_ratio as f64
        };

        for (j, i) in iproduct!(0..grid, 0..grid) {
            let u = i as f64 / (grid - 1) as f64;
            let v = j as f64 / (grid - 1) as f64;

            let (position, normal) = surface_point(key, u, v, geodetic);
            let local = inverse.transform_point3(position);
            let local_normal = inverse.transform_vector3(normal);

            positions.push(local.as_vec3().to_array());
            normals.push(local_normal.as_vec3().to_array());
            uvs.push([u as f32, v as f32]);
        }

        let index = |i: u32, j: u32| j * grid + i;
        let mut indices: Vec<u32> = Vec::with_capacity(((grid - 1) * (grid - 1) * 6) as usize);

        for (j, i) in iproduct!(0..grid - 1, 0..grid - 1) {
            let a = index(i, j);
            let b = index(i + 1, j);
            let c = index(i, j + 1);
            let d = index(i + 1, j + 1);

            indices.extend_from_slice(&[a, b, d, a, d, c]);
        }

        // the skirt: boundary vertices duplicated and dropped along their
        // normals, stitched to the rim
        let boundary = boundary_loop(grid);
        let mut skirt_of = HashMap::new();

        for &b in &boundary {
            let skirt_index = positions.len() as u32;
            skirt_of.insert(b, skirt_index);

            let p = Vec3::from_array(positions[b as usize]);
            let n = Vec3::from_array(normals[b as usize]);
            positions.push((p - n * skirt_depth as f32).to_array());
            normals.push(n.to_array());
            uvs.push(uvs[b as usize]);
        }

        for pair in boundary.windows(2).chain(std::iter::once(
            &[*boundary.last().unwrap(), boundary[0]][..],
        )) {
            let (a, b) = (pair[0], pair[1]);
            let (sa, sb) = (skirt_of[&a], skirt_of[&b]);
            indices.extend_from_slice(&[a, sa, b, b, sa, sb]);
        }

        let mut mesh = Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::default(),
        );
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
        mesh.insert_indices(Indices::U32(indices));
        mesh
    }
}

/// The local-to-world matrix of a tile: the centroid ENU frame on a
/// globe, a translation to the south-west corner on a projected map
/// (east = +X, up = +Y, north = -Z).
pub fn tile_frame(key: &TileKey) -> bevy::math::DMat4 {
    let extent = key.extent();

    if key.profile.srs().is_geodetic() {
        let (lon, lat) = extent.centroid();
        key.profile.srs().ellipsoid().enu_frame(lon, lat, 0.0)
    } else {
        bevy::math::DMat4::from_translation(DVec3::new(
            extent.west(),
            0.0,
            -extent.south(),
        ))
    }
}

/// A point on the tile surface (zero elevation) and its up direction, in
/// world coordinates. `v = 0` is the tile's southern edge.
pub fn surface_point(key: &TileKey, u: f64, v: f64, geodetic: bool) -> (DVec3, DVec3) {
    let extent = key.extent();
    let x = extent.west() + extent.width() * u;
    let y = extent.south() + extent.height() * v;

    if geodetic {
        let srs = key.profile.srs();
        let position = srs
            .ellipsoid()
            .geodetic_to_ecef(DVec3::new(x, y, 0.0));
        let normal = srs.ellipsoid().geodetic_up(x, y);
        (position, normal)
    } else {
        (DVec3::new(x, 0.0, -y), DVec3::Y)
    }
}

fn boundary_loop(grid: u32) -> Vec<u32> {
    let index = |i: u32, j: u32| j * grid + i;
    let mut boundary = Vec::with_capacity((4 * (grid - 1)) as usize);

    for i in 0..grid {
        boundary.push(index(i, 0));
    }
    for j in 1..grid {
        boundary.push(index(grid - 1, j));
    }
    for i in (0..grid - 1).rev() {
        boundary.push(index(i, grid - 1));
    }
    for j in (1..grid - 1).rev() {
        boundary.push(index(0, j));
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::Profile;

    fn mesh_for(key: &TileKey, pool: &mut GeometryPool) -> Mesh {
        pool.build_mesh(key)
    }

    #[test]
    fn grid_and_skirt_vertex_counts() {
        let profile = Profile::global_geodetic();
        let key = TileKey::new(2, 1, 1, profile);
        let mut pool = GeometryPool::new(17, 0.05);

        let mesh = mesh_for(&key, &mut pool);
        let grid_verts = 17 * 17;
        let skirt_verts = 4 * (17 - 1);
        assert_eq!(
            mesh.count_vertices(),
            (grid_verts + skirt_verts) as usize
        );
    }

    #[test]
    fn same_row_tiles_share_geometry() {
        let profile = Profile::global_geodetic();
        let mut pool = GeometryPool::new(9, 0.02);
        let mut meshes = Assets::<Mesh>::default();

        let a = pool.get_pooled_geometry(&TileKey::new(3, 0, 2, profile.clone()), &mut meshes);
        let b = pool.get_pooled_geometry(&TileKey::new(3, 5, 2, profile.clone()), &mut meshes);
        let c = pool.get_pooled_geometry(&TileKey::new(3, 5, 3, profile), &mut meshes);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.pooled_count(), 2);
    }

    #[test]
    fn projected_tiles_share_per_lod() {
        let profile = Profile::spherical_mercator();
        let mut pool = GeometryPool::new(9, 0.02);
        let mut meshes = Assets::<Mesh>::default();

        let a = pool.get_pooled_geometry(&TileKey::new(4, 1, 2, profile.clone()), &mut meshes);
        let b = pool.get_pooled_geometry(&TileKey::new(4, 9, 13, profile), &mut meshes);
        assert_eq!(a, b);
        assert_eq!(pool.pooled_count(), 1);
    }

    #[test]
    fn local_positions_are_small_relative_to_the_frame() {
        // congruence only works if vertices are expressed tile-locally
        let profile = Profile::global_geodetic();
        let key = TileKey::new(4, 3, 5, profile);
        let mut pool = GeometryPool::new(5, 0.0);

        let mesh = mesh_for(&key, &mut pool);
        let positions = mesh
            .attribute(Mesh::ATTRIBUTE_POSITION)
            .unwrap()
            .as_float3()
            .unwrap();

        let tile_span = 1e7;
        for p in positions {
            let len = Vec3::from_array(*p).length();
            assert!(len < tile_span as f32, "vertex {p:?} is not tile-local");
        }
    }
}
