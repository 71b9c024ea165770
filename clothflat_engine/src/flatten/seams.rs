// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// The color predicate that marks a vertex as part of a seam stroke.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedThreshold {
    pub min_red: f32,
    pub max_green: f32,
    pub max_blue: f32,
}

impl Default for RedThreshold {
    fn default() -> Self {
        Self {
            min_red: 0.7,
            max_green: 0.4,
            max_blue: 0.4,
        }
    }
}

impl RedThreshold {
    pub fn matches(&self, color: Vec3) -> bool {
        color.x >= self.min_red && color.y <= self.max_green && color.z <= self.max_blue
    }
}

/// Everything the seam extractor learned about a mesh. Only `barrier_edges`
/// and `red_flags` drive the segmenter; clusters and paths exist for
/// diagnostics and host display.
#[derive(Debug, Default)]
pub struct SeamSet {
    /// Red vertex indices, ascending.
    pub red_vertices: Vec<u32>,
    /// Per-vertex red flag, same length as the mesh vertex list.
    pub red_flags: Vec<bool>,
    /// Mesh edges whose both endpoints are red.
    pub barrier_edges: HashSet<EdgeKey>,
    /// DBSCAN clusters of size >= 2, largest first, members ascending.
    pub clusters: Vec<Vec<u32>>,
    /// One display polyline per cluster.
    pub paths: Vec<Vec<Vec3>>,
}

struct RedPoint {
    vertex: u32,
    pos: Vec3,
}

impl RTreeObject for RedPoint {
    type Envelope = AABB<[f32; 3]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos.to_array())
    }
}

impl PointDistance for RedPoint {
    fn distance_2(
        &self,
        point: &<Self::Envelope as rstar::Envelope>::Point,
    ) -> <<Self::Envelope as rstar::Envelope>::Point as rstar::Point>::Scalar {
        self.pos.distance_squared(Vec3::from_slice(point))
    }
}

/// Finds red vertices, clusters them with DBSCAN, and extracts the barrier
/// edge set the segmenter honors.
///
/// The cluster radius adapts to the mesh: `max(user_eps, eps_fraction *
/// bounding_diameter)`. Sparse hand-tagging still merges into one stroke
/// while separate seams on the same garment stay apart.
#[profiling::function]
pub fn extract_seams(
    mesh: &TriMesh,
    threshold: &RedThreshold,
    user_eps: f32,
    eps_fraction: f32,
) -> SeamSet {
    let colors = match &mesh.colors {
        Some(colors) => colors,
        None => {
            return SeamSet {
                red_flags: vec![false; mesh.num_vertices()],
                ..Default::default()
            }
        }
    };

    let red_flags: Vec<bool> = colors.iter().map(|&c| threshold.matches(c)).collect();
    let red_vertices: Vec<u32> = red_flags
        .iter()
        .enumerate()
        .filter_map(|(i, &red)| red.then(|| i as u32))
        .collect();

    if red_vertices.is_empty() {
        log::info!("No red markers found; the mesh will flatten as a single patch");
        return SeamSet {
            red_flags,
            ..Default::default()
        };
    }

    let eps = user_eps.max(eps_fraction * mesh.bounding_diameter());
    let clusters = cluster_red_vertices(mesh, &red_vertices, eps);
    let paths = clusters
        .iter()
        .map(|cluster| chain_cluster(mesh, cluster))
        .collect();

    // Only mesh edges can act as barriers: the flood segmenter walks face
    // adjacency, so an off-mesh geodesic stroke would be invisible to it.
    let mut barrier_edges = HashSet::new();
    for face in &mesh.faces {
        for slot in 0..3 {
            let a = face[slot];
            let b = face[(slot + 1) % 3];
            if red_flags[a as usize] && red_flags[b as usize] {
                barrier_edges.insert(edge_key(a, b));
            }
        }
    }

    log::info!(
        "Seam extraction: {} red vertices, {} clusters, {} barrier edges (eps {eps:.4})",
        red_vertices.len(),
        clusters.len(),
        barrier_edges.len()
    );

    SeamSet {
        red_vertices,
        red_flags,
        barrier_edges,
        clusters,
        paths,
    }
}

/// Classical density-based clustering: transitively absorb every red vertex
/// within `eps` of the growing cluster. Clusters of size 1 are tagging noise
/// and get discarded.
fn cluster_red_vertices(mesh: &TriMesh, red_vertices: &[u32], eps: f32) -> Vec<Vec<u32>> {
    use rayon::prelude::*;

    let tree = RTree::bulk_load(
        red_vertices
            .iter()
            .map(|&v| RedPoint {
                vertex: v,
                pos: mesh.positions[v as usize],
            })
            .collect(),
    );

    // Neighborhoods are queried once per red vertex; this is the hot part of
    // clustering, and each query is independent.
    let neighborhoods: HashMap<u32, Vec<u32>> = red_vertices
        .par_iter()
        .map(|&v| {
            let mut near: Vec<u32> = tree
                .locate_within_distance(mesh.positions[v as usize].to_array(), eps * eps)
                .map(|p| p.vertex)
                .filter(|&w| w != v)
                .collect();
            near.sort_unstable();
            (v, near)
        })
        .collect();

    let mut visited = HashSet::new();
    let mut clusters = Vec::new();
    for &seed in red_vertices {
        if !visited.insert(seed) {
            continue;
        }
        let mut members = vec![seed];
        let mut cursor = 0;
        while cursor < members.len() {
            let v = members[cursor];
            cursor += 1;
            for &w in &neighborhoods[&v] {
                if visited.insert(w) {
                    members.push(w);
                }
            }
        }
        if members.len() >= 2 {
            members.sort_unstable();
            clusters.push(members);
        }
    }

    clusters.sort_by_key(|c| (std::cmp::Reverse(c.len()), c[0]));
    clusters
}

/// Orders a cluster into a display polyline by greedy nearest-neighbor
/// chaining from the member farthest from the cluster centroid.
fn chain_cluster(mesh: &TriMesh, cluster: &[u32]) -> Vec<Vec3> {
    let centroid = cluster
        .iter()
        .fold(Vec3::ZERO, |acc, &v| acc + mesh.positions[v as usize])
        / cluster.len() as f32;

    let mut start = cluster[0];
    let mut best = f32::MIN;
    for &v in cluster {
        let d = mesh.positions[v as usize].distance_squared(centroid);
        if d > best {
            best = d;
            start = v;
        }
    }

    let mut remaining: Vec<u32> = cluster.iter_cpy().filter(|&v| v != start).collect();
    let mut path = vec![mesh.positions[start as usize]];
    let mut current = start;
    while !remaining.is_empty() {
        let mut nearest = 0;
        let mut best = f32::MAX;
        for (i, &v) in remaining.iter().enumerate() {
            let d = mesh.positions[v as usize]
                .distance_squared(mesh.positions[current as usize]);
            if d < best {
                best = d;
                nearest = i;
            }
        }
        current = remaining.swap_remove(nearest);
        path.push(mesh.positions[current as usize]);
    }
    path
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::primitives::{paint_red, Grid};

    fn striped_grid() -> TriMesh {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, 4, 4);
        paint_red(&mut mesh, |p| (p.y - 0.5).abs() < 1e-4);
        mesh
    }

    #[test]
    pub fn red_stripe_becomes_one_cluster() {
        let mesh = striped_grid();
        // The grid is sparse relative to its diameter, so pass an explicit
        // cluster radius wider than the 0.25 vertex spacing.
        let seams = extract_seams(&mesh, &RedThreshold::default(), 0.3, 0.05);
        assert_eq!(seams.red_vertices.len(), 5);
        assert_eq!(seams.clusters.len(), 1);
        assert_eq!(seams.clusters[0].len(), 5);
        // Four horizontal edges along the stripe
        assert_eq!(seams.barrier_edges.len(), 4);
        assert_eq!(seams.paths[0].len(), 5);
    }

    #[test]
    pub fn extraction_is_idempotent() {
        let mesh = striped_grid();
        let a = extract_seams(&mesh, &RedThreshold::default(), 0.0, 0.05);
        let b = extract_seams(&mesh, &RedThreshold::default(), 0.0, 0.05);
        assert_eq!(a.red_vertices, b.red_vertices);
        assert_eq!(a.barrier_edges, b.barrier_edges);
        assert_eq!(a.clusters, b.clusters);
    }

    #[test]
    pub fn uncolored_mesh_has_no_seams() {
        let mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 4, 4);
        let seams = extract_seams(&mesh, &RedThreshold::default(), 0.0, 0.05);
        assert!(seams.red_vertices.is_empty());
        assert!(seams.barrier_edges.is_empty());
    }

    #[test]
    pub fn distant_strokes_stay_apart() {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, 8, 8);
        paint_red(&mut mesh, |p| {
            (p.y - 0.0).abs() < 1e-4 || (p.y - 1.0).abs() < 1e-4
        });
        let seams = extract_seams(&mesh, &RedThreshold::default(), 0.3, 0.05);
        assert_eq!(seams.clusters.len(), 2);
    }
}
