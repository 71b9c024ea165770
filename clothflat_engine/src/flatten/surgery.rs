// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use float_ord::FloatOrd;

use crate::flatten::segmentation::Patch;
use crate::flatten::topology::PatchTopology;
use crate::prelude::*;

/// Cuts the patch open along the given seam edges by duplicating vertices.
///
/// At every vertex touched by a seam edge, the incident face fan is
/// partitioned into sectors: faces stay in the same sector when they share a
/// non-seam edge at that vertex. The sector containing the lowest face index
/// keeps the original vertex; every other sector gets a fresh duplicate with
/// the same 3D position. After the rewrite the two sides of a seam edge
/// reference disjoint vertex pairs, so no twin links them.
///
/// Sectors are computed per vertex rather than from a global face labeling
/// because a seam need not separate the patch: a geodesic cut across a
/// cylinder or a dart slit leaves the face graph connected, yet still has
/// two distinct sides at every interior seam vertex.
///
/// Returns the number of duplicates created.
pub fn split_along_seams(patch: &mut Patch, seam_edges: &HashSet<EdgeKey>) -> usize {
    if seam_edges.is_empty() {
        return 0;
    }

    let orig_faces = patch.mesh.faces.clone();
    let index = HalfEdgeIndex::build(patch.num_vertices(), &orig_faces);

    let mut seam_vertices: Vec<u32> = seam_edges
        .iter()
        .flat_map(|&(a, b)| [a, b])
        .filter(|&v| index.vertex_is_used(v))
        .collect();
    seam_vertices.sort_unstable();
    seam_vertices.dedup();

    let red_flags: Vec<bool> = {
        let mut flags = vec![false; patch.num_vertices()];
        for &v in &patch.red_vertices {
            flags[v as usize] = true;
        }
        flags
    };
    let mut new_red = Vec::new();

    let mut duplicates = 0;
    for &v in &seam_vertices {
        let incident = index.vertex_faces(v);
        let sectors = fan_sectors(&index, v, incident, seam_edges);
        if sectors.len() <= 1 {
            continue;
        }

        // The sector holding the smallest incident face keeps the original
        // index; the iteration below visits sectors in that order already.
        for sector in &sectors[1..] {
            let dup = patch.mesh.positions.len() as u32;
            patch.mesh.positions.push(patch.mesh.positions[v as usize]);
            if let Some(colors) = patch.mesh.colors.as_mut() {
                let c = colors[v as usize];
                colors.push(c);
            }
            patch.vertex_map.push(patch.vertex_map[v as usize]);
            if red_flags[v as usize] {
                new_red.push(dup);
            }
            duplicates += 1;

            for &f in sector {
                for (slot, &w) in orig_faces[f as usize].iter().enumerate() {
                    if w == v {
                        patch.mesh.faces[f as usize][slot] = dup;
                    }
                }
            }
        }
    }

    if duplicates > 0 {
        patch.red_vertices.extend(new_red);
        patch.red_vertices.sort_unstable();
        log::debug!("Seam split duplicated {duplicates} vertices");
    }
    duplicates
}

/// Partitions the faces incident to `v` into connectivity sectors, crossing
/// only non-seam edges that contain `v`. Sectors come out ordered by their
/// smallest face index.
fn fan_sectors(
    index: &HalfEdgeIndex,
    v: u32,
    incident: &[u32],
    seam_edges: &HashSet<EdgeKey>,
) -> Vec<SVec<u32>> {
    let mut sector_of = HashMap::<u32, usize>::with_capacity(incident.len());
    let mut sectors: Vec<SVec<u32>> = Vec::new();

    for &seed in incident {
        if sector_of.contains_key(&seed) {
            continue;
        }
        let id = sectors.len();
        let mut sector: SVec<u32> = smallvec::smallvec![seed];
        sector_of.insert(seed, id);
        let mut queue = VecDeque::from([seed]);
        while let Some(face) = queue.pop_front() {
            for h in HalfEdgeIndex::halfedges_of(face) {
                // Only edges containing v separate or join fan sectors
                if index.src(h) != v && index.dst(h) != v {
                    continue;
                }
                let key = index.halfedge_edge_key(h);
                if seam_edges.contains(&key) {
                    continue;
                }
                if let Some(t) = index.twin(h) {
                    let neighbor = HalfEdgeIndex::face_of(t);
                    if !sector_of.contains_key(&neighbor) {
                        sector_of.insert(neighbor, id);
                        sector.push(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        sectors.push(sector);
    }
    sectors
}

/// Cuts the patch along its internal seam edges when the kerf left any
/// behind. Returns whether a cut happened.
///
/// The trigger requires at least two red vertices and one interior
/// (twin-linked) edge between two of them; seam edges lying entirely on the
/// patch boundary have nothing to cut.
pub fn cut_internal_seams(patch: &mut Patch) -> bool {
    if patch.red_vertices.len() < 2 {
        return false;
    }
    let index = patch.adjacency();
    let red_flags = {
        let mut flags = vec![false; patch.num_vertices()];
        for &v in &patch.red_vertices {
            flags[v as usize] = true;
        }
        flags
    };

    let mut seam_edges = HashSet::new();
    let mut any_interior = false;
    for (key, boundary) in index.iter_unique_edges() {
        if red_flags[key.0 as usize] && red_flags[key.1 as usize] {
            seam_edges.insert(key);
            any_interior |= !boundary;
        }
    }
    if !any_interior {
        return false;
    }

    drop(index);
    split_along_seams(patch, &seam_edges) > 0
}

/// How many vertices of each boundary loop participate in the nearest-pair
/// search for the cylinder cut.
const LOOP_SAMPLES: usize = 20;

/// Lifts a cylinder patch (χ = 0, two or more boundary loops) to a disk by
/// cutting along the shortest mesh path connecting its two largest loops.
pub fn cut_cylinder(patch: &mut Patch, topo: &PatchTopology) -> Result<bool> {
    if topo.boundary_loops.len() < 2 {
        return Ok(false);
    }
    let loop_a = &topo.boundary_loops[0];
    let loop_b = &topo.boundary_loops[1];

    let positions = &patch.mesh.positions;
    let sample = |l: &Vec<u32>| -> Vec<u32> {
        let stride = (l.len() + LOOP_SAMPLES - 1) / LOOP_SAMPLES;
        l.iter_cpy().step_by(stride.max(1)).collect()
    };
    let samples_a = sample(loop_a);
    let samples_b = sample(loop_b);

    // Closest endpoints over the sub-sampled loops; the geodesic between
    // them is the least distorting cut.
    let mut best = (samples_a[0], samples_b[0]);
    let mut best_dist = f32::MAX;
    for &a in &samples_a {
        for &b in &samples_b {
            let d = positions[a as usize].distance_squared(positions[b as usize]);
            if d < best_dist {
                best_dist = d;
                best = (a, b);
            }
        }
    }
    let (start, goal) = best;

    let index = patch.adjacency();
    let path = bfs_vertex_path(&index, start, goal)
        .ok_or_else(|| anyhow!("No mesh path between the two boundary loops"))?;
    drop(index);

    // Snap the path ends onto their loops if BFS terminated elsewhere
    let mut path = path;
    let on_loop = |l: &Vec<u32>, v: u32| l.contains(&v);
    if !on_loop(loop_a, path[0]) {
        let p = positions[path[0] as usize];
        let nearest = loop_a
            .iter_cpy()
            .min_by_key(|&v| FloatOrd(positions[v as usize].distance_squared(p)))
            .ok_or_else(|| anyhow!("Empty boundary loop"))?;
        path.insert(0, nearest);
    }
    if !on_loop(loop_b, path[path.len() - 1]) {
        let p = positions[path[path.len() - 1] as usize];
        let nearest = loop_b
            .iter_cpy()
            .min_by_key(|&v| FloatOrd(positions[v as usize].distance_squared(p)))
            .ok_or_else(|| anyhow!("Empty boundary loop"))?;
        path.push(nearest);
    }

    let seam_edges: HashSet<EdgeKey> = path
        .iter()
        .tuple_windows()
        .filter(|(a, b)| a != b)
        .map(|(&a, &b)| edge_key(a, b))
        .collect();

    log::debug!(
        "Cylinder cut along {} edges between loops of {} and {} vertices",
        seam_edges.len(),
        loop_a.len(),
        loop_b.len()
    );

    Ok(split_along_seams(patch, &seam_edges) > 0)
}

fn bfs_vertex_path(index: &HalfEdgeIndex, start: u32, goal: u32) -> Option<Vec<u32>> {
    if start == goal {
        return Some(vec![start]);
    }
    const UNSEEN: u32 = u32::MAX;
    let mut parent = vec![UNSEEN; index.num_vertices()];
    parent[start as usize] = start;
    let mut queue = VecDeque::from([start]);
    while let Some(v) = queue.pop_front() {
        for &w in index.vertex_neighbors(v) {
            if parent[w as usize] == UNSEEN {
                parent[w as usize] = v;
                if w == goal {
                    let mut path = vec![goal];
                    let mut cursor = goal;
                    while cursor != start {
                        cursor = parent[cursor as usize];
                        path.push(cursor);
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(w);
            }
        }
    }
    None
}
