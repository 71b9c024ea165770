// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::flatten::segmentation::Patch;
use crate::prelude::*;

/// The initial embedding strategies, tried in the order the orchestrator
/// routes them. A plain enum plus a router: none of this needs runtime
/// polymorphism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialStrategy {
    /// Cylinder-style unrolling around the principal axis.
    Tube,
    /// Laplacian-smoothed conformal embedding with two pinned vertices.
    Lscm,
    /// Face-by-face development by triangle intersection. Always succeeds on
    /// a connected patch, whatever its curvature.
    BfsFan,
    /// Raw projection onto the PCA plane. The embedding of last resort.
    Planar,
}

#[derive(Debug, Clone, Copy)]
pub struct UnfoldParams {
    pub lscm_iterations: usize,
    pub lscm_alpha: f32,
}

impl Default for UnfoldParams {
    fn default() -> Self {
        Self {
            lscm_iterations: 30,
            lscm_alpha: 0.4,
        }
    }
}

/// Runs the given strategies in order and returns the first embedding that
/// covers every vertex with finite coordinates.
#[profiling::function]
pub fn initial_embedding(
    patch: &Patch,
    index: &HalfEdgeIndex,
    strategies: &[InitialStrategy],
    params: &UnfoldParams,
) -> (Vec<Vec2>, InitialStrategy) {
    for &strategy in strategies {
        let attempt = match strategy {
            InitialStrategy::Tube => tube_unroll(patch, index),
            InitialStrategy::Lscm => lscm(patch, index, params),
            InitialStrategy::BfsFan => bfs_fan(patch, index),
            InitialStrategy::Planar => Ok(planar_projection(patch)),
        };
        match attempt {
            Ok(uv) if embedding_is_complete(&uv, patch) => return (uv, strategy),
            Ok(_) => log::warn!("{strategy:?} produced non-finite coordinates, trying next"),
            Err(e) => log::debug!("{strategy:?} unavailable for this patch: {e}"),
        }
    }

    // Planar projection cannot fail; reaching this point means the caller
    // passed an empty strategy list.
    (planar_projection(patch), InitialStrategy::Planar)
}

fn embedding_is_complete(uv: &[Vec2], patch: &Patch) -> bool {
    uv.len() == patch.num_vertices() && uv.iter().all(|p| p.is_finite())
}

/// Centroid and the two in-plane axes of the patch, from a power iteration
/// on the position covariance. Falls back to world axes for degenerate
/// clouds.
fn pca_axes(positions: &[Vec3]) -> (Vec3, Vec3, Vec3) {
    let n = positions.len().max(1) as f32;
    let centroid = positions.iter().fold(Vec3::ZERO, |a, &p| a + p) / n;

    let (mut xx, mut xy, mut xz, mut yy, mut yz, mut zz) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for &p in positions {
        let d = p - centroid;
        xx += d.x * d.x;
        xy += d.x * d.y;
        xz += d.x * d.z;
        yy += d.y * d.y;
        yz += d.y * d.z;
        zz += d.z * d.z;
    }
    let cov = glam::Mat3::from_cols(
        Vec3::new(xx, xy, xz),
        Vec3::new(xy, yy, yz),
        Vec3::new(xz, yz, zz),
    );

    let mut axis = Vec3::ONE.normalize();
    for _ in 0..32 {
        let next = cov * axis;
        if next.length_squared() < 1e-18 {
            break;
        }
        axis = next.normalize();
    }
    if !axis.is_finite() || axis.length_squared() < 0.5 {
        axis = Vec3::X;
    }

    // Second axis: Gram-Schmidt against a world axis non-parallel to the
    // first. Of the eligible axes, take the one carrying the most variance;
    // picking by angle alone would grab the surface normal of an
    // axis-aligned flat patch and collapse the projection to a line.
    let candidates = [(Vec3::X, xx), (Vec3::Y, yy), (Vec3::Z, zz)];
    let mut second = axis.any_orthonormal_vector();
    let mut best = f32::MIN;
    for &(c, variance) in &candidates {
        if axis.dot(c).abs() > 0.9 {
            continue;
        }
        if variance > best {
            best = variance;
            second = c;
        }
    }
    let second = (second - axis * axis.dot(second)).normalize();
    let second = if second.is_finite() {
        second
    } else {
        axis.any_orthonormal_vector()
    };

    (centroid, axis, second)
}

/// Projection of the patch onto its PCA plane. Always finite.
pub fn planar_projection(patch: &Patch) -> Vec<Vec2> {
    let (centroid, e1, e2) = pca_axes(&patch.mesh.positions);
    patch
        .mesh
        .positions
        .iter()
        .map(|&p| {
            let d = p - centroid;
            Vec2::new(d.dot(e1), d.dot(e2))
        })
        .collect()
}

/// Least-squares conformal embedding, approximated by uniform Laplacian
/// smoothing with two pinned vertices. The pins are chosen farthest-first so
/// the system stays well conditioned; full cotangent LSCM buys little for
/// garment patches and costs a sparse solver.
pub fn lscm(patch: &Patch, index: &HalfEdgeIndex, params: &UnfoldParams) -> Result<Vec<Vec2>> {
    let positions = &patch.mesh.positions;
    let used: Vec<u32> = (0..patch.num_vertices() as u32)
        .filter(|&v| index.vertex_is_used(v))
        .collect();
    if used.len() < 3 {
        // Deterministic fallback spread for degenerate patches
        return Ok((0..patch.num_vertices())
            .map(|i| Vec2::new(i as f32, 0.0))
            .collect());
    }

    let farthest_from = |v: u32| -> u32 {
        let p = positions[v as usize];
        let mut best = v;
        let mut best_dist = f32::MIN;
        for &w in &used {
            let d = positions[w as usize].distance_squared(p);
            if d > best_dist {
                best_dist = d;
                best = w;
            }
        }
        best
    };
    let pin_a = farthest_from(used[0]);
    let pin_b = farthest_from(pin_a);

    let mut uv = planar_projection(patch);

    for _ in 0..params.lscm_iterations {
        let mut next = uv.clone();
        for &v in &used {
            if v == pin_a || v == pin_b {
                continue;
            }
            let neighbors = index.vertex_neighbors(v);
            if neighbors.is_empty() {
                continue;
            }
            let mean = neighbors
                .iter_cpy()
                .fold(Vec2::ZERO, |acc, w| acc + uv[w as usize])
                / neighbors.len() as f32;
            next[v as usize] = uv[v as usize].lerp(mean, params.lscm_alpha);
        }
        uv = next;
    }

    nan_guard(&mut uv, index);
    Ok(uv)
}

/// Replaces non-finite UVs with the mean of their finite neighbors, and
/// anything still broken with the origin. Downstream stages rely on every
/// coordinate being finite.
fn nan_guard(uv: &mut [Vec2], index: &HalfEdgeIndex) {
    for v in 0..uv.len() {
        if uv[v].is_finite() {
            continue;
        }
        let mut sum = Vec2::ZERO;
        let mut count = 0;
        for &w in index.vertex_neighbors(v as u32) {
            if uv[w as usize].is_finite() {
                sum += uv[w as usize];
                count += 1;
            }
        }
        uv[v] = if count > 0 {
            sum / count as f32
        } else {
            Vec2::ZERO
        };
    }
}

/// Unrolls an elongated or cylinder-cut patch around its long axis, mapping
/// angle to arc length and height to the other coordinate.
pub fn tube_unroll(patch: &Patch, index: &HalfEdgeIndex) -> Result<Vec<Vec2>> {
    let positions = &patch.mesh.positions;
    if positions.is_empty() {
        bail!("Empty patch");
    }

    let n = positions.len() as f32;
    let centroid = positions.iter().fold(Vec3::ZERO, |a, &p| a + p) / n;

    // Pick the box axis the patch actually wraps around: radii must stay
    // clear of zero (a sheet passing through its own axis has no meaningful
    // angles) and as even as possible. A kerf-split sleeve ring is wider
    // than it is tall, so the longest box side alone picks the wrong axis.
    let mut axis = Vec3::X;
    let mut best_spread = f32::MAX;
    for candidate in [Vec3::X, Vec3::Y, Vec3::Z] {
        let (mut sum, mut sum_sq, mut min) = (0.0f32, 0.0f32, f32::MAX);
        for &p in positions.iter() {
            let d = p - centroid;
            let radial = d - candidate * d.dot(candidate);
            let r = radial.length();
            sum += r;
            sum_sq += r * r;
            min = min.min(r);
        }
        let mean = sum / n;
        if mean <= f32::EPSILON || min < 0.3 * mean {
            continue;
        }
        let spread = (sum_sq / n - mean * mean).max(0.0).sqrt() / mean;
        if spread < best_spread {
            best_spread = spread;
            axis = candidate;
        }
    }
    if best_spread == f32::MAX {
        bail!("Patch does not wrap around any box axis");
    }
    let e1 = axis.any_orthonormal_vector();
    let e2 = axis.cross(e1);

    let mut height = vec![0.0f32; positions.len()];
    let mut theta = vec![f32::NAN; positions.len()];
    let mut radius_sum = 0.0f32;
    for (i, &p) in positions.iter().enumerate() {
        let d = p - centroid;
        let (x, y) = (d.dot(e1), d.dot(e2));
        height[i] = d.dot(axis);
        theta[i] = y.atan2(x);
        radius_sum += (x * x + y * y).sqrt();
    }
    let radius = radius_sum / n;

    unwrap_angles(&mut theta, index);

    let (mut theta_min, mut theta_max) = (f32::MAX, f32::MIN);
    let (mut h_min, mut h_max) = (f32::MAX, f32::MIN);
    for v in 0..positions.len() {
        if !index.vertex_is_used(v as u32) {
            continue;
        }
        theta_min = theta_min.min(theta[v]);
        theta_max = theta_max.max(theta[v]);
        h_min = h_min.min(height[v]);
        h_max = h_max.max(height[v]);
    }
    let theta_span = theta_max - theta_min;
    if theta_span <= f32::EPSILON || h_max - h_min <= f32::EPSILON {
        bail!("Patch is too flat to unroll");
    }

    let arc_length = radius * theta_span;
    let uv = (0..positions.len())
        .map(|v| {
            Vec2::new(
                (theta[v] - theta_min) / theta_span * arc_length,
                height[v] - h_min,
            )
        })
        .collect();
    Ok(uv)
}

/// Restores angular continuity across the atan2 branch cut by walking mesh
/// edges and snapping each neighbor to the closest 2π multiple. A patch that
/// was cut open never wraps all the way around, so the propagation is
/// consistent; duplicated seam vertices end up a full turn apart, one per
/// side of the cut.
fn unwrap_angles(theta: &mut [f32], index: &HalfEdgeIndex) {
    use std::f32::consts::TAU;

    let mut visited = vec![false; theta.len()];
    for seed in 0..theta.len() as u32 {
        if visited[seed as usize] || !index.vertex_is_used(seed) {
            continue;
        }
        visited[seed as usize] = true;
        let mut queue = VecDeque::from([seed]);
        while let Some(v) = queue.pop_front() {
            for &w in index.vertex_neighbors(v) {
                if visited[w as usize] {
                    continue;
                }
                visited[w as usize] = true;
                let delta = theta[w as usize] - theta[v as usize];
                theta[w as usize] -= (delta / TAU).round() * TAU;
                queue.push_back(w);
            }
        }
    }
}

/// Develops the patch face by face starting from the triangle nearest the
/// centroid. Each new vertex is placed by intersecting the two circles
/// around its already-placed anchors, picking the side that preserves the
/// seed winding. Works for any connected disk, no linear solves involved.
pub fn bfs_fan(patch: &Patch, index: &HalfEdgeIndex) -> Result<Vec<Vec2>> {
    let positions = &patch.mesh.positions;
    let faces = &patch.mesh.faces;
    if faces.is_empty() {
        bail!("Patch has no faces");
    }

    let n = positions.len() as f32;
    let centroid = positions.iter().fold(Vec3::ZERO, |a, &p| a + p) / n;
    let mut seed = 0u32;
    let mut best = f32::MAX;
    for f in 0..faces.len() as u32 {
        let d = patch.mesh.face_center(f).distance_squared(centroid);
        if d < best {
            best = d;
            seed = f;
        }
    }

    let mut uv = vec![Vec2::NAN; positions.len()];
    let mut placed = vec![false; positions.len()];

    // Seed triangle via the law of cosines: one vertex at the origin, one on
    // the +u axis, the third in the upper half plane.
    let [a, b, c] = faces[seed as usize];
    let ab = positions[a as usize].distance(positions[b as usize]);
    let ac = positions[a as usize].distance(positions[c as usize]);
    let bc = positions[b as usize].distance(positions[c as usize]);
    let d = ab.max(f32::EPSILON);
    let cx = (ac * ac - bc * bc + d * d) / (2.0 * d);
    let cy = (ac * ac - cx * cx).max(0.0).sqrt();
    uv[a as usize] = Vec2::ZERO;
    uv[b as usize] = Vec2::new(d, 0.0);
    uv[c as usize] = Vec2::new(cx, cy);
    placed[a as usize] = true;
    placed[b as usize] = true;
    placed[c as usize] = true;

    let mut visited = vec![false; faces.len()];
    visited[seed as usize] = true;
    let mut queue = VecDeque::from([seed]);
    while let Some(face) = queue.pop_front() {
        for neighbor in index.face_neighbors(face) {
            if visited[neighbor as usize] {
                continue;
            }
            visited[neighbor as usize] = true;
            place_third_vertex(positions, faces[neighbor as usize], &mut uv, &mut placed);
            queue.push_back(neighbor);
        }
    }

    // Vertices in face islands the BFS never reached fall back to their
    // neighbor mean or the PCA plane.
    if placed.iter().any(|&p| !p) {
        let projected = planar_projection(patch);
        for v in 0..positions.len() {
            if placed[v] {
                continue;
            }
            let mut sum = Vec2::ZERO;
            let mut count = 0;
            for &w in index.vertex_neighbors(v as u32) {
                if placed[w as usize] {
                    sum += uv[w as usize];
                    count += 1;
                }
            }
            uv[v] = if count > 0 {
                sum / count as f32
            } else {
                projected[v]
            };
        }
    }

    Ok(uv)
}

/// Places the single unplaced vertex of `face` by two-circle intersection,
/// on the side of its anchor edge that keeps the face counter-clockwise.
fn place_third_vertex(positions: &[Vec3], face: [u32; 3], uv: &mut [Vec2], placed: &mut [bool]) {
    let unplaced = (0..3usize)
        .filter(|&i| !placed[face[i] as usize])
        .collect_svec();
    // All three placed: nothing to do. Two or more unplaced cannot happen
    // when flooding across shared edges, except on non-manifold input;
    // leave those for the fallback pass.
    if unplaced.len() != 1 {
        return;
    }
    let slot = unplaced[0];
    // Anchors in cyclic face order, so (anchor1, anchor2, new) matches the
    // face winding.
    let new = face[slot];
    let anchor1 = face[(slot + 1) % 3];
    let anchor2 = face[(slot + 2) % 3];

    let q1 = uv[anchor1 as usize];
    let q2 = uv[anchor2 as usize];
    let r1 = positions[anchor1 as usize].distance(positions[new as usize]);
    let r2 = positions[anchor2 as usize].distance(positions[new as usize]);
    let d = q1.distance(q2).max(f32::EPSILON);

    let along = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
    let h = (r1 * r1 - along * along).max(0.0).sqrt();
    let dir = (q2 - q1) / d;
    let perp = Vec2::new(-dir.y, dir.x);
    uv[new as usize] = q1 + dir * along + perp * h;
    placed[new as usize] = true;
}
