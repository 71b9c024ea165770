// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::prelude::*;

/// The welded mesh plus the index remapping that produced it. `vertex_map[i]`
/// is the index in `mesh` that original vertex `i` was merged into.
#[derive(Debug, Clone)]
pub struct WeldedMesh {
    pub mesh: TriMesh,
    pub vertex_map: Vec<u32>,
    /// For each surviving face, its index in the input face list.
    pub face_map: Vec<u32>,
    pub faces_dropped: usize,
}

/// Merges vertices closer than `tolerance` and drops faces that degenerate
/// under the merge. Exported garment meshes routinely duplicate vertices
/// along every quad border, which would make every edge a boundary edge for
/// the downstream topology stages.
///
/// Welding never fails: a non-positive tolerance returns the input unchanged.
///
/// When colors are present, a merged vertex keeps the color of its reddest
/// member, so seam markers survive welding.
#[profiling::function]
pub fn weld_vertices(mesh: &TriMesh, tolerance: f32) -> WeldedMesh {
    if tolerance <= 0.0 || mesh.positions.is_empty() {
        return WeldedMesh {
            mesh: mesh.clone(),
            vertex_map: (0..mesh.num_vertices() as u32).collect(),
            face_map: (0..mesh.num_faces() as u32).collect(),
            faces_dropped: 0,
        };
    }

    // Cells an order of magnitude wider than the tolerance keep the candidate
    // scan to the 27 cells around the query point.
    let cell_size = tolerance * 10.0;
    let cell_of = |p: Vec3| -> (i32, i32, i32) {
        (
            (p.x / cell_size).floor() as i32,
            (p.y / cell_size).floor() as i32,
            (p.z / cell_size).floor() as i32,
        )
    };

    let mut grid = HashMap::<(i32, i32, i32), SVec<u32>>::new();
    let mut positions: Vec<Vec3> = Vec::new();
    let mut colors = mesh.colors.as_ref().map(|_| Vec::new());
    let mut vertex_map = Vec::with_capacity(mesh.num_vertices());

    for (i, &p) in mesh.positions.iter().enumerate() {
        let (cx, cy, cz) = cell_of(p);
        let mut merged_into = None;

        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(candidates) = grid.get(&(cx + dx, cy + dy, cz + dz)) {
                        for &c in candidates {
                            if positions[c as usize].distance_squared(p) <= tolerance * tolerance {
                                merged_into = Some(c);
                                break 'search;
                            }
                        }
                    }
                }
            }
        }

        match merged_into {
            Some(c) => {
                vertex_map.push(c);
                if let (Some(colors), Some(mesh_colors)) = (colors.as_mut(), &mesh.colors) {
                    let incoming: Vec3 = mesh_colors[i];
                    let current: &mut Vec3 = &mut colors[c as usize];
                    if incoming.x > current.x {
                        *current = incoming;
                    }
                }
            }
            None => {
                let new_index = positions.len() as u32;
                positions.push(p);
                if let (Some(colors), Some(mesh_colors)) = (colors.as_mut(), &mesh.colors) {
                    colors.push(mesh_colors[i]);
                }
                grid.entry((cx, cy, cz)).or_default().push(new_index);
                vertex_map.push(new_index);
            }
        }
    }

    // Second pass: remap faces, dropping any that collapsed.
    let mut faces = Vec::with_capacity(mesh.num_faces());
    let mut face_map = Vec::with_capacity(mesh.num_faces());
    let mut faces_dropped = 0;
    for (f, [a, b, c]) in mesh.faces.iter_cpy().enumerate() {
        let (a, b, c) = (
            vertex_map[a as usize],
            vertex_map[b as usize],
            vertex_map[c as usize],
        );
        if a == b || b == c || a == c {
            faces_dropped += 1;
        } else {
            faces.push([a, b, c]);
            face_map.push(f as u32);
        }
    }

    if faces_dropped > 0 {
        log::debug!("Welding dropped {faces_dropped} degenerate faces");
    }

    WeldedMesh {
        mesh: TriMesh {
            positions,
            colors,
            faces,
        },
        vertex_map,
        face_map,
        faces_dropped,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn split_quad() -> TriMesh {
        // Two triangles that should share an edge but duplicate its vertices
        let positions = vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::X + Vec3::new(0.0, 0.0, 1e-7),
            Vec3::Y + Vec3::new(1e-7, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        TriMesh::build_from_triangles(&positions, None, &[[0u32, 1, 2], [4, 3, 5]]).unwrap()
    }

    #[test]
    pub fn coincident_vertices_are_merged() {
        let welded = weld_vertices(&split_quad(), 1e-5);
        assert_eq!(welded.mesh.num_vertices(), 4);
        assert_eq!(welded.mesh.num_faces(), 2);
        assert_eq!(welded.faces_dropped, 0);
        // The shared diagonal is now an interior edge
        let index = HalfEdgeIndex::from_mesh(&welded.mesh);
        assert_eq!(index.num_edges(), 5);
        assert_eq!(index.faces_of_edge(edge_key(1, 2)).len(), 2);
    }

    #[test]
    pub fn welding_is_idempotent() {
        let welded = weld_vertices(&split_quad(), 1e-5);
        let again = weld_vertices(&welded.mesh, 1e-5);
        assert_eq!(again.mesh.num_vertices(), welded.mesh.num_vertices());
        assert_eq!(again.mesh.faces, welded.mesh.faces);
        assert_eq!(again.faces_dropped, 0);
        for (i, &m) in again.vertex_map.iter().enumerate() {
            assert_eq!(i as u32, m);
        }
    }

    #[test]
    pub fn merged_color_keeps_seam_marker() {
        let positions = vec![Vec3::ZERO, Vec3::ZERO, Vec3::X, Vec3::Y];
        let colors = vec![
            Vec3::new(0.2, 0.2, 0.2),
            Vec3::new(0.9, 0.1, 0.1),
            Vec3::new(0.2, 0.2, 0.2),
            Vec3::new(0.2, 0.2, 0.2),
        ];
        let mesh =
            TriMesh::build_from_triangles(&positions, Some(&colors), &[[1u32, 2, 3]]).unwrap();
        let welded = weld_vertices(&mesh, 1e-5);
        assert_eq!(welded.mesh.num_vertices(), 3);
        let merged = welded.vertex_map[0];
        assert_eq!(welded.vertex_map[1], merged);
        assert_eq!(
            welded.mesh.colors.as_ref().unwrap()[merged as usize],
            Vec3::new(0.9, 0.1, 0.1)
        );
    }

    #[test]
    pub fn collapsed_faces_are_dropped() {
        let positions = vec![Vec3::ZERO, Vec3::new(1e-7, 0.0, 0.0), Vec3::X, Vec3::Y];
        let mesh =
            TriMesh::build_from_triangles(&positions, None, &[[0u32, 1, 2], [0, 2, 3]]).unwrap();
        let welded = weld_vertices(&mesh, 1e-5);
        assert_eq!(welded.faces_dropped, 1);
        assert_eq!(welded.mesh.num_faces(), 1);
    }
}
