// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::flatten::segmentation::Patch;
use crate::prelude::*;

/// Topological type of a patch, indexed by Euler characteristic and boundary
/// loop count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchClass {
    /// χ = 1: unfolds directly.
    Disk,
    /// χ = 0 with at least two boundary loops: needs a geodesic cut first.
    Cylinder,
    /// χ = 2 with no boundary: closed surface, nothing to unfold along.
    Sphere,
    /// Anything else. Repair is skipped and the unfold attempted anyway.
    Complex,
}

#[derive(Debug)]
pub struct PatchTopology {
    pub num_vertices: usize,
    pub num_edges: usize,
    pub num_faces: usize,
    pub euler: i64,
    /// Boundary loops as vertex lists, largest first. Strictly these are the
    /// connected components of the boundary-edge subgraph, which covers
    /// non-manifold rims as well.
    pub boundary_loops: Vec<Vec<u32>>,
    pub class: PatchClass,
}

pub fn inspect(patch: &Patch, index: &HalfEdgeIndex) -> PatchTopology {
    // Vertices actually used by faces; patches can carry isolated vertices
    // after surgery on malformed input and those must not skew χ.
    let num_vertices = (0..patch.num_vertices() as u32)
        .filter(|&v| index.vertex_is_used(v))
        .count();
    let num_edges = index.num_edges();
    let num_faces = patch.num_faces();
    let euler = num_vertices as i64 - num_edges as i64 + num_faces as i64;

    let boundary_loops = boundary_loops(index);
    let class = classify(euler, boundary_loops.len());

    PatchTopology {
        num_vertices,
        num_edges,
        num_faces,
        euler,
        boundary_loops,
        class,
    }
}

fn classify(euler: i64, loops: usize) -> PatchClass {
    match (euler, loops) {
        (1, n) if n >= 1 => PatchClass::Disk,
        (0, n) if n >= 2 => PatchClass::Cylinder,
        (2, 0) => PatchClass::Sphere,
        _ => PatchClass::Complex,
    }
}

/// Connected components of the boundary-edge subgraph, as vertex lists in
/// walk order. Largest first, ties by smallest starting vertex.
fn boundary_loops(index: &HalfEdgeIndex) -> Vec<Vec<u32>> {
    let mut neighbors = HashMap::<u32, SVec<u32>>::new();
    for (a, b) in index.boundary_edges() {
        neighbors.entry(a).or_default().push(b);
        neighbors.entry(b).or_default().push(a);
    }

    let mut starts: Vec<u32> = neighbors.keys().copied().collect();
    starts.sort_unstable();

    let mut visited = HashSet::new();
    let mut loops = Vec::new();
    for &start in &starts {
        if !visited.insert(start) {
            continue;
        }
        let mut walk = vec![start];
        let mut current = start;
        loop {
            // Pick the smallest unvisited boundary neighbor. On a clean rim
            // every vertex has exactly two and this walks the loop around.
            let next = neighbors[&current]
                .iter_cpy()
                .filter(|v| !visited.contains(v))
                .min();
            match next {
                Some(v) => {
                    visited.insert(v);
                    walk.push(v);
                    current = v;
                }
                None => break,
            }
        }
        loops.push(walk);
    }

    loops.sort_by_key(|l| (std::cmp::Reverse(l.len()), l[0]));
    loops
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::primitives::{Grid, IcoSphere, Tube};

    fn patch_of(mesh: &TriMesh) -> Patch {
        let faces: Vec<u32> = (0..mesh.num_faces() as u32).collect();
        let red = vec![false; mesh.num_vertices()];
        Patch::from_faces(mesh, &faces, &red)
    }

    #[test]
    pub fn grid_is_a_disk() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 4, 4));
        let index = patch.adjacency();
        let topo = inspect(&patch, &index);
        assert_eq!(topo.euler, 1);
        assert_eq!(topo.boundary_loops.len(), 1);
        assert_eq!(topo.class, PatchClass::Disk);
        // 16 boundary vertices around the rim of a 4x4 grid
        assert_eq!(topo.boundary_loops[0].len(), 16);
    }

    #[test]
    pub fn tube_is_a_cylinder() {
        let patch = patch_of(&Tube::build(Vec3::ZERO, 1.0, 1.0, 2.0, 16, 4));
        let index = patch.adjacency();
        let topo = inspect(&patch, &index);
        assert_eq!(topo.euler, 0);
        assert_eq!(topo.boundary_loops.len(), 2);
        assert_eq!(topo.class, PatchClass::Cylinder);
    }

    #[test]
    pub fn icosphere_is_a_sphere() {
        let patch = patch_of(&IcoSphere::build(Vec3::ZERO, 1.0, 1));
        let index = patch.adjacency();
        let topo = inspect(&patch, &index);
        assert_eq!(topo.euler, 2);
        assert!(topo.boundary_loops.is_empty());
        assert_eq!(topo.class, PatchClass::Sphere);
    }

    #[test]
    pub fn euler_matches_unique_edge_count() {
        let mesh = Tube::build(Vec3::ZERO, 1.0, 0.5, 2.0, 12, 3);
        let patch = patch_of(&mesh);
        let index = patch.adjacency();
        let topo = inspect(&patch, &index);
        let unique_edges = index.iter_unique_edges().count();
        assert_eq!(topo.num_edges, unique_edges);
        assert_eq!(
            topo.euler,
            topo.num_vertices as i64 - unique_edges as i64 + topo.num_faces as i64
        );
    }
}
