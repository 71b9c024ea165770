// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use crate::prelude::*;

/// Connected components of the face graph induced by shared edges, sorted by
/// descending face count. Ties break on the smallest face index so the
/// ordering is stable for a given mesh.
#[derive(Debug)]
pub struct FaceComponents {
    /// Component id for each face.
    pub component_of_face: Vec<u32>,
    /// Face lists per component, each in ascending face order.
    pub components: Vec<Vec<u32>>,
}

pub fn face_components(index: &HalfEdgeIndex) -> FaceComponents {
    let num_faces = index.num_faces();
    const UNVISITED: u32 = u32::MAX;
    let mut component_of_face = vec![UNVISITED; num_faces];
    let mut components = Vec::new();

    for seed in 0..num_faces as u32 {
        if component_of_face[seed as usize] != UNVISITED {
            continue;
        }
        let id = components.len() as u32;
        let mut faces = vec![seed];
        component_of_face[seed as usize] = id;
        let mut queue = VecDeque::from([seed]);
        while let Some(face) = queue.pop_front() {
            for neighbor in index.face_neighbors(face) {
                if component_of_face[neighbor as usize] == UNVISITED {
                    component_of_face[neighbor as usize] = id;
                    faces.push(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
        faces.sort_unstable();
        components.push(faces);
    }

    // Descending by size; the BFS seeds already order ties by smallest face.
    let mut order: Vec<usize> = (0..components.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(components[i].len()));
    let components: Vec<Vec<u32>> = order.iter().map(|&i| components[i].clone()).collect();
    let mut remapped = vec![0u32; num_faces];
    for (new_id, faces) in components.iter().enumerate() {
        for &f in faces {
            remapped[f as usize] = new_id as u32;
        }
    }

    FaceComponents {
        component_of_face: remapped,
        components,
    }
}

#[derive(Debug)]
pub struct FilteredMesh {
    pub mesh: TriMesh,
    /// For each surviving vertex, its index in the input mesh.
    pub vertex_map: Vec<u32>,
    /// For each surviving face, its index in the input mesh.
    pub face_map: Vec<u32>,
    pub fragments_dropped: usize,
    pub faces_dropped: usize,
}

/// Removes fragment components below `min_faces`, keeping at least the
/// largest component. Isolated specks and duplicated shells poison the
/// segmenter, so they go before any seam analysis happens.
#[profiling::function]
pub fn filter_small_components(mesh: &TriMesh, min_faces: usize) -> FilteredMesh {
    let index = HalfEdgeIndex::from_mesh(mesh);
    let components = face_components(&index);

    if components.components.len() <= 1 {
        return FilteredMesh {
            mesh: mesh.clone(),
            vertex_map: (0..mesh.num_vertices() as u32).collect(),
            face_map: (0..mesh.num_faces() as u32).collect(),
            fragments_dropped: 0,
            faces_dropped: 0,
        };
    }

    // The largest component always survives, even below the threshold.
    let kept: Vec<&Vec<u32>> = components
        .components
        .iter()
        .enumerate()
        .filter(|(i, faces)| *i == 0 || faces.len() >= min_faces)
        .map(|(_, faces)| faces)
        .collect();
    let fragments_dropped = components.components.len() - kept.len();
    let faces_dropped = mesh.num_faces() - kept.iter().map(|f| f.len()).sum::<usize>();

    if fragments_dropped > 0 {
        log::info!(
            "Dropped {fragments_dropped} fragment components ({faces_dropped} faces) below {min_faces} faces"
        );
    }

    // Rebuild with compacted vertices, keeping faces in their original order.
    let mut kept_faces: Vec<u32> = kept.iter().flat_map(|f| f.iter_cpy()).collect();
    kept_faces.sort_unstable();

    let mut local_of_global = vec![u32::MAX; mesh.num_vertices()];
    let mut positions = Vec::new();
    let mut colors = mesh.colors.as_ref().map(|_| Vec::new());
    let mut vertex_map = Vec::new();
    let mut faces = Vec::with_capacity(kept_faces.len());
    for &f in &kept_faces {
        let mut face = [0u32; 3];
        for (slot, &v) in mesh.faces[f as usize].iter().enumerate() {
            if local_of_global[v as usize] == u32::MAX {
                local_of_global[v as usize] = positions.len() as u32;
                positions.push(mesh.positions[v as usize]);
                if let (Some(colors), Some(mesh_colors)) = (colors.as_mut(), &mesh.colors) {
                    colors.push(mesh_colors[v as usize]);
                }
                vertex_map.push(v);
            }
            face[slot] = local_of_global[v as usize];
        }
        faces.push(face);
    }

    FilteredMesh {
        mesh: TriMesh {
            positions,
            colors,
            faces,
        },
        vertex_map,
        face_map: kept_faces,
        fragments_dropped,
        faces_dropped,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::primitives::Grid;

    #[test]
    pub fn single_component_is_untouched() {
        let mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 4, 4);
        let filtered = filter_small_components(&mesh, 100);
        assert_eq!(filtered.fragments_dropped, 0);
        assert_eq!(filtered.mesh.num_faces(), mesh.num_faces());
    }

    #[test]
    pub fn speck_is_dropped() {
        let mut mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 10, 10);
        let speck = Grid::build(Vec3::new(5.0, 0.0, 0.0), Vec2::ONE, 1, 1);
        let offset = mesh.num_vertices() as u32;
        mesh.positions.extend_from_slice(&speck.positions);
        mesh.faces
            .extend(speck.faces.iter().map(|f| f.map(|v| v + offset)));

        let filtered = filter_small_components(&mesh, 100);
        assert_eq!(filtered.fragments_dropped, 1);
        assert_eq!(filtered.faces_dropped, 2);
        assert_eq!(filtered.mesh.num_faces(), 200);
        // Speck vertices are gone from the vertex list too
        assert_eq!(filtered.mesh.num_vertices(), 121);
    }

    #[test]
    pub fn largest_component_survives_threshold() {
        let mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 2, 2);
        let mut two = mesh.clone();
        let offset = two.num_vertices() as u32;
        let other = Grid::build(Vec3::new(5.0, 0.0, 0.0), Vec2::ONE, 1, 1);
        two.positions.extend_from_slice(&other.positions);
        two.faces
            .extend(other.faces.iter().map(|f| f.map(|v| v + offset)));

        let filtered = filter_small_components(&two, 1000);
        assert_eq!(filtered.fragments_dropped, 1);
        assert_eq!(filtered.mesh.num_faces(), 8);
    }
}
