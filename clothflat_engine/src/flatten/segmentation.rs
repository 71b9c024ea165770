// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use crate::prelude::*;

/// A self-contained piece of the segmented mesh. Faces are disjoint between
/// patches; vertex sets may overlap at cut seams after surgery.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Local geometry. Colors are carried over from the source mesh so the
    /// surgery stage can still recognize seam markers.
    pub mesh: TriMesh,
    /// Local vertex index -> vertex index in the segmented source mesh.
    /// Surjective onto the vertices this patch touches; duplicates appear
    /// after surgery, all mapping back to the same source vertex.
    pub vertex_map: Vec<u32>,
    /// Indices into the source face list, ascending.
    pub global_faces: Vec<u32>,
    /// Local indices of vertices that carried a red marker, ascending.
    pub red_vertices: Vec<u32>,
    /// Set when topology inspection failed to classify the patch as
    /// something the unfolder fully supports.
    pub topology_error: bool,
}

impl Patch {
    /// Builds a patch from a face subset of `mesh`. Local vertices appear in
    /// first-use order over the given faces.
    pub fn from_faces(mesh: &TriMesh, faces: &[u32], red_flags: &[bool]) -> Self {
        let mut local_of_global = HashMap::<u32, u32>::new();
        let mut positions = Vec::new();
        let mut colors = mesh.colors.as_ref().map(|_| Vec::new());
        let mut vertex_map = Vec::new();
        let mut red_vertices = Vec::new();
        let mut local_faces = Vec::with_capacity(faces.len());

        for &f in faces {
            let mut face = [0u32; 3];
            for (slot, &v) in mesh.faces[f as usize].iter().enumerate() {
                let local = *local_of_global.entry(v).or_insert_with(|| {
                    let local = positions.len() as u32;
                    positions.push(mesh.positions[v as usize]);
                    if let (Some(colors), Some(mesh_colors)) = (colors.as_mut(), &mesh.colors) {
                        colors.push(mesh_colors[v as usize]);
                    }
                    vertex_map.push(v);
                    if red_flags[v as usize] {
                        red_vertices.push(local);
                    }
                    local
                });
                face[slot] = local;
            }
            local_faces.push(face);
        }
        red_vertices.sort_unstable();

        Patch {
            mesh: TriMesh {
                positions,
                colors,
                faces: local_faces,
            },
            vertex_map,
            global_faces: faces.to_vec(),
            red_vertices,
            topology_error: false,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.mesh.num_vertices()
    }

    pub fn num_faces(&self) -> usize {
        self.mesh.num_faces()
    }

    pub fn adjacency(&self) -> HalfEdgeIndex {
        HalfEdgeIndex::from_mesh(&self.mesh)
    }

    /// Longest bounding box side at least 1.8x the second longest. Elongated
    /// patches unroll better than they smooth.
    pub fn is_elongated(&self) -> bool {
        let (_, size) = self.mesh.bounding_box();
        let mut sides = [size.x, size.y, size.z];
        sides.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        sides[1] > 0.0 && sides[0] >= 1.8 * sides[1]
    }
}

#[derive(Debug, Default)]
pub struct Segmentation {
    /// Patches ordered by descending face count.
    pub patches: Vec<Patch>,
    /// Faces removed by the kerf policy across all surviving patches.
    pub kerf_faces_removed: usize,
    /// Patches dropped for being below the face threshold.
    pub patches_dropped: usize,
}

/// How many rounds of plurality voting reattach faces that sit on a barrier
/// edge. A fixed point is almost always reached earlier.
const REASSIGN_ROUNDS: usize = 5;

/// Splits the mesh into patches separated by barrier edges, then applies the
/// laser-kerf policy: every face touching a red vertex is cutting medium and
/// is removed from its patch.
///
/// Red marks have positive width by design. Removing the whole red-adjacent
/// strip eliminates slivers along the cut and means no seam edge ever
/// appears inside a surviving patch with a twin on the far side.
#[profiling::function]
pub fn segment_mesh(
    mesh: &TriMesh,
    index: &HalfEdgeIndex,
    barriers: &HashSet<EdgeKey>,
    red_flags: &[bool],
    min_patch_faces: usize,
) -> Segmentation {
    let num_faces = mesh.num_faces();
    if num_faces == 0 {
        return Segmentation::default();
    }

    const UNASSIGNED: u32 = u32::MAX;
    let mut patch_of_face = vec![UNASSIGNED; num_faces];

    // Round 1: faces holding a barrier edge are frozen, everything else
    // flood-fills across non-barrier edges.
    let is_boundary_face = |f: u32| -> bool {
        HalfEdgeIndex::halfedges_of(f)
            .iter()
            .any(|&h| barriers.contains(&index.halfedge_edge_key(h)))
    };
    let frozen: Vec<bool> = (0..num_faces as u32).map(is_boundary_face).collect();

    let mut base_patches: Vec<Vec<u32>> = Vec::new();
    for seed in 0..num_faces as u32 {
        if frozen[seed as usize] || patch_of_face[seed as usize] != UNASSIGNED {
            continue;
        }
        let id = base_patches.len() as u32;
        let mut faces = vec![seed];
        patch_of_face[seed as usize] = id;
        let mut queue = VecDeque::from([seed]);
        while let Some(face) = queue.pop_front() {
            for h in HalfEdgeIndex::halfedges_of(face) {
                let twin = match index.twin(h) {
                    Some(t) => t,
                    None => continue,
                };
                if barriers.contains(&index.halfedge_edge_key(h)) {
                    continue;
                }
                let neighbor = HalfEdgeIndex::face_of(twin);
                if !frozen[neighbor as usize] && patch_of_face[neighbor as usize] == UNASSIGNED {
                    patch_of_face[neighbor as usize] = id;
                    faces.push(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }
        base_patches.push(faces);
    }

    // Adjacency vote: frozen faces attach to the patch holding the plurality
    // of their non-barrier neighbors. Ties go to the lowest patch id.
    for _ in 0..REASSIGN_ROUNDS {
        let mut changed = false;
        for face in 0..num_faces as u32 {
            if patch_of_face[face as usize] != UNASSIGNED {
                continue;
            }
            let mut votes = SVecN::<(u32, u32), 3>::new();
            for h in HalfEdgeIndex::halfedges_of(face) {
                if barriers.contains(&index.halfedge_edge_key(h)) {
                    continue;
                }
                let neighbor_patch = match index.twin(h) {
                    Some(t) => patch_of_face[HalfEdgeIndex::face_of(t) as usize],
                    None => continue,
                };
                if neighbor_patch == UNASSIGNED {
                    continue;
                }
                match votes.iter_mut().find(|(p, _)| *p == neighbor_patch) {
                    Some((_, count)) => *count += 1,
                    None => votes.push((neighbor_patch, 1)),
                }
            }
            if let Some(&(winner, _)) = votes
                .iter()
                .max_by_key(|&&(patch, count)| (count, std::cmp::Reverse(patch)))
            {
                patch_of_face[face as usize] = winner;
                base_patches[winner as usize].push(face);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Keep patch indices stable: descending face count, ties by the smallest
    // contained face index.
    base_patches.iter_mut().for_each(|faces| faces.sort_unstable());
    base_patches.sort_by_key(|faces| (std::cmp::Reverse(faces.len()), faces[0]));

    let sized: Vec<Vec<u32>> = base_patches
        .iter()
        .filter(|faces| faces.len() >= min_patch_faces)
        .cloned()
        .collect();
    let patches_dropped = base_patches.len() - sized.len();
    if patches_dropped > 0 {
        log::info!("Dropped {patches_dropped} patches below {min_patch_faces} faces");
    }

    // Kerf pass: the red-adjacent strip of each surviving patch is removed
    // and the patch is rebuilt from what is left.
    let mut patches = Vec::with_capacity(sized.len());
    let mut kerf_faces_removed = 0;
    for faces in &sized {
        let keep: Vec<u32> = faces
            .iter_cpy()
            .filter(|&f| {
                mesh.faces[f as usize]
                    .iter()
                    .all(|&v| !red_flags[v as usize])
            })
            .collect();
        kerf_faces_removed += faces.len() - keep.len();
        if !keep.is_empty() {
            patches.push(Patch::from_faces(mesh, &keep, red_flags));
        }
    }

    log::info!(
        "Segmentation produced {} patches, kerf removed {kerf_faces_removed} faces",
        patches.len()
    );

    Segmentation {
        patches,
        kerf_faces_removed,
        patches_dropped,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flatten::seams::{extract_seams, RedThreshold, SeamSet};
    use crate::mesh::primitives::{paint_red, Grid};

    fn striped_grid(quads: u32) -> (TriMesh, SeamSet) {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, quads, quads);
        paint_red(&mut mesh, |p| (p.y - 0.5).abs() < 1e-4);
        let seams = extract_seams(&mesh, &RedThreshold::default(), 0.0, 0.05);
        (mesh, seams)
    }

    #[test]
    pub fn stripe_splits_grid_in_two() {
        let (mesh, seams) = striped_grid(4);
        let index = HalfEdgeIndex::from_mesh(&mesh);
        let seg = segment_mesh(&mesh, &index, &seams.barrier_edges, &seams.red_flags, 1);
        assert_eq!(seg.patches.len(), 2);
        // Two quad rows touch the red stripe: 16 faces of kerf
        assert_eq!(seg.kerf_faces_removed, 16);
        for patch in &seg.patches {
            assert_eq!(patch.num_faces(), 8);
        }
    }

    #[test]
    pub fn kerf_removes_every_red_face() {
        let (mesh, seams) = striped_grid(6);
        let index = HalfEdgeIndex::from_mesh(&mesh);
        let seg = segment_mesh(&mesh, &index, &seams.barrier_edges, &seams.red_flags, 1);
        for patch in &seg.patches {
            assert!(patch.red_vertices.is_empty());
            for &f in &patch.global_faces {
                for &v in &mesh.faces[f as usize] {
                    assert!(!seams.red_flags[v as usize]);
                }
            }
        }
    }

    #[test]
    pub fn coverage_accounts_for_all_faces() {
        let (mesh, seams) = striped_grid(6);
        let index = HalfEdgeIndex::from_mesh(&mesh);
        let seg = segment_mesh(&mesh, &index, &seams.barrier_edges, &seams.red_flags, 1);
        let patch_faces: usize = seg.patches.iter().map(|p| p.num_faces()).sum();
        assert_eq!(patch_faces + seg.kerf_faces_removed, mesh.num_faces());
        // Face sets are disjoint
        let mut seen = HashSet::new();
        for patch in &seg.patches {
            for &f in &patch.global_faces {
                assert!(seen.insert(f));
            }
        }
    }

    #[test]
    pub fn no_barriers_means_single_patch() {
        let mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 4, 4);
        let index = HalfEdgeIndex::from_mesh(&mesh);
        let red = vec![false; mesh.num_vertices()];
        let seg = segment_mesh(&mesh, &index, &HashSet::new(), &red, 1);
        assert_eq!(seg.patches.len(), 1);
        assert_eq!(seg.patches[0].num_faces(), mesh.num_faces());
    }

    #[test]
    pub fn undersized_patches_are_dropped() {
        let (mesh, seams) = striped_grid(4);
        let index = HalfEdgeIndex::from_mesh(&mesh);
        let seg = segment_mesh(&mesh, &index, &seams.barrier_edges, &seams.red_flags, 100);
        assert!(seg.patches.is_empty());
        assert_eq!(seg.patches_dropped, 2);
    }
}
