// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use nonmax::NonMaxU32;

use crate::prelude::*;

/// Unordered pair of vertex indices, stored as (min, max). Used to
/// deduplicate undirected edges and to index barrier edge sets.
pub type EdgeKey = (u32, u32);

pub fn edge_key(a: u32, b: u32) -> EdgeKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A half-edge index over a triangle mesh, storing the halfedge pointers in
/// contiguous arrays. Face `f` owns the three directed edges `3f`, `3f + 1`
/// and `3f + 2`, so `next` and `prev` are analytic and only the `twin` and
/// source-vertex arrays are stored.
///
/// The index is ephemeral: stages build it on entry and drop it on exit, it
/// never outlives the mesh it was built from.
///
/// Non-manifold configurations are not an error. Any undirected edge with
/// three or more incident faces is treated as boundary on all sides: none of
/// its halfedges get a twin.
#[derive(Debug)]
pub struct HalfEdgeIndex {
    /// Twin of each directed edge, or None when the edge lies on a boundary.
    /// Uses NonMaxU32 to ensure elements are the same size as `u32`.
    twin: Vec<Option<NonMaxU32>>,
    /// Source vertex of each directed edge.
    vert: Vec<u32>,
    /// Undirected edge -> incident faces (1 on boundary, 2 interior, more
    /// when non-manifold).
    edge_faces: HashMap<EdgeKey, SVecN<u32, 2>>,
    /// Vertex -> faces containing it, in face-index order.
    vertex_faces: Vec<SVecN<u32, 8>>,
    /// Vertex -> neighboring vertices across undirected edges, in discovery
    /// order, deduplicated.
    vertex_neighbors: Vec<SVecN<u32, 8>>,
    /// Vertices with at least one incident boundary edge.
    boundary_vertex: Vec<bool>,
    num_vertices: usize,
}

impl HalfEdgeIndex {
    #[profiling::function]
    pub fn build(num_vertices: usize, faces: &[[u32; 3]]) -> Self {
        let num_halfedges = faces.len() * 3;
        let mut vert = Vec::with_capacity(num_halfedges);
        let mut edge_faces = HashMap::<EdgeKey, SVecN<u32, 2>>::with_capacity(num_halfedges);
        let mut vertex_faces = vec![SVecN::<u32, 8>::new(); num_vertices];
        let mut vertex_neighbors = vec![SVecN::<u32, 8>::new(); num_vertices];

        // Maps an undirected edge to the directed edges laid over it, so twin
        // resolution below is a single pass over this table.
        let mut edge_halfedges = HashMap::<EdgeKey, SVecN<u32, 2>>::with_capacity(num_halfedges);

        for (f, face) in faces.iter().enumerate() {
            for slot in 0..3 {
                let a = face[slot];
                let b = face[(slot + 1) % 3];
                let h = (f * 3 + slot) as u32;
                vert.push(a);

                let key = edge_key(a, b);
                edge_faces.entry(key).or_default().push(f as u32);
                edge_halfedges.entry(key).or_default().push(h);

                vertex_faces[a as usize].push(f as u32);
                for (v, w) in [(a, b), (b, a)] {
                    let neighbors = &mut vertex_neighbors[v as usize];
                    if !neighbors.contains(&w) {
                        neighbors.push(w);
                    }
                }
            }
        }

        let mut twin = vec![None; num_halfedges];
        for halfedges in edge_halfedges.values() {
            // Incidence 1 is boundary, incidence >= 3 is non-manifold and
            // degrades to boundary on every side.
            if let [h0, h1] = halfedges[..] {
                twin[h0 as usize] = NonMaxU32::new(h1);
                twin[h1 as usize] = NonMaxU32::new(h0);
            }
        }

        let mut boundary_vertex = vec![false; num_vertices];
        for (&(a, b), incident) in edge_faces.iter() {
            if incident.len() != 2 {
                boundary_vertex[a as usize] = true;
                boundary_vertex[b as usize] = true;
            }
        }

        Self {
            twin,
            vert,
            edge_faces,
            vertex_faces,
            vertex_neighbors,
            boundary_vertex,
            num_vertices,
        }
    }

    pub fn from_mesh(mesh: &TriMesh) -> Self {
        Self::build(mesh.num_vertices(), &mesh.faces)
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn num_faces(&self) -> usize {
        self.twin.len() / 3
    }

    /// Number of unique undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edge_faces.len()
    }

    pub fn next(h: u32) -> u32 {
        if h % 3 == 2 {
            h - 2
        } else {
            h + 1
        }
    }

    pub fn prev(h: u32) -> u32 {
        if h % 3 == 0 {
            h + 2
        } else {
            h - 1
        }
    }

    pub fn face_of(h: u32) -> u32 {
        h / 3
    }

    pub fn halfedges_of(face: u32) -> [u32; 3] {
        [face * 3, face * 3 + 1, face * 3 + 2]
    }

    pub fn twin(&self, h: u32) -> Option<u32> {
        self.twin[h as usize].map(|t| t.get())
    }

    pub fn src(&self, h: u32) -> u32 {
        self.vert[h as usize]
    }

    pub fn dst(&self, h: u32) -> u32 {
        self.vert[Self::next(h) as usize]
    }

    pub fn halfedge_edge_key(&self, h: u32) -> EdgeKey {
        edge_key(self.src(h), self.dst(h))
    }

    /// Faces sharing an edge with `face`. At most three for a triangle.
    pub fn face_neighbors(&self, face: u32) -> SVecN<u32, 3> {
        let mut neighbors = SVecN::new();
        for h in Self::halfedges_of(face) {
            if let Some(t) = self.twin(h) {
                neighbors.push(Self::face_of(t));
            }
        }
        neighbors
    }

    pub fn faces_of_edge(&self, key: EdgeKey) -> &[u32] {
        self.edge_faces.get(&key).map(|f| &f[..]).unwrap_or(&[])
    }

    /// An edge is boundary when its face incidence is anything but 2. This
    /// folds the non-manifold case into the boundary case.
    pub fn is_boundary_edge(&self, key: EdgeKey) -> bool {
        self.edge_faces.get(&key).map(|f| f.len() != 2).unwrap_or(false)
    }

    pub fn is_boundary_vertex(&self, v: u32) -> bool {
        self.boundary_vertex[v as usize]
    }

    pub fn vertex_faces(&self, v: u32) -> &[u32] {
        &self.vertex_faces[v as usize]
    }

    pub fn vertex_neighbors(&self, v: u32) -> &[u32] {
        &self.vertex_neighbors[v as usize]
    }

    /// True for vertices referenced by at least one face.
    pub fn vertex_is_used(&self, v: u32) -> bool {
        !self.vertex_faces[v as usize].is_empty()
    }

    /// Unique undirected edges in deterministic order: each edge is reported
    /// at its first halfedge in face-index order, tagged with whether it is
    /// boundary. Float accumulation downstream relies on this order being
    /// reproducible across runs, which a HashMap walk would not be.
    pub fn iter_unique_edges(&self) -> impl Iterator<Item = (EdgeKey, bool)> + '_ {
        let mut seen = HashSet::with_capacity(self.edge_faces.len());
        (0..self.twin.len() as u32).filter_map(move |h| {
            let key = self.halfedge_edge_key(h);
            if seen.insert(key) {
                Some((key, self.is_boundary_edge(key)))
            } else {
                None
            }
        })
    }

    /// Boundary edges in deterministic (face-index) order.
    pub fn boundary_edges(&self) -> Vec<EdgeKey> {
        self.iter_unique_edges()
            .filter_map(|(key, boundary)| boundary.then(|| key))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Two triangles sharing the (1, 2) diagonal.
    fn quad() -> Vec<[u32; 3]> {
        vec![[0, 1, 2], [2, 1, 3]]
    }

    #[test]
    pub fn shared_edge_has_two_faces() {
        let index = HalfEdgeIndex::build(4, &quad());
        assert_eq!(index.num_edges(), 5);
        assert_eq!(index.faces_of_edge(edge_key(1, 2)), &[0u32, 1][..]);
        assert!(!index.is_boundary_edge(edge_key(1, 2)));
        assert!(index.is_boundary_edge(edge_key(0, 1)));
        assert_eq!(&index.face_neighbors(0)[..], &[1u32][..]);
        assert_eq!(index.boundary_edges().len(), 4);
    }

    #[test]
    pub fn twins_are_symmetric() {
        let index = HalfEdgeIndex::build(4, &quad());
        for h in 0..6u32 {
            if let Some(t) = index.twin(h) {
                assert_eq!(index.twin(t), Some(h));
                assert_eq!(index.src(h), index.dst(t));
            }
        }
    }

    #[test]
    pub fn nonmanifold_edge_degrades_to_boundary() {
        // Three triangles hanging off the same (0, 1) edge
        let faces = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
        let index = HalfEdgeIndex::build(5, &faces);
        assert!(index.is_boundary_edge(edge_key(0, 1)));
        for h in 0..9u32 {
            if index.halfedge_edge_key(h) == edge_key(0, 1) {
                assert_eq!(index.twin(h), None);
            }
        }
    }
}
