// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use glam::DVec2;

use crate::flatten::segmentation::Patch;
use crate::prelude::*;

/// Stiffness and integration parameters for the mass-spring relaxation.
///
/// The defaults encode the "steel boundary, rubber interior" split: boundary
/// springs hold sewing-line lengths to their 3D truth while the interior
/// stays permissive enough to flatten cone-like bunching into a fan.
#[derive(Debug, Clone, Copy)]
pub struct RelaxParams {
    pub iterations: usize,
    pub boundary_stiffness: f32,
    pub interior_stiffness: f32,
    /// Freeze boundary vertices at their initial UVs. Off by default: an
    /// unpinned boundary lets a sleeve discover its naturally curved
    /// outline instead of being forced into a rigid rectangle.
    pub pin_boundary: bool,
    pub damping: f32,
}

impl Default for RelaxParams {
    fn default() -> Self {
        Self {
            iterations: 200,
            boundary_stiffness: 50.0,
            interior_stiffness: 0.2,
            pin_boundary: false,
            damping: 0.995,
        }
    }
}

const TIME_STEP: f64 = 1.0 / 60.0;

struct Spring {
    a: u32,
    b: u32,
    rest: f64,
    stiffness: f64,
}

/// Relaxes an initial embedding so edge lengths approach their 3D rest
/// lengths, boundary first. Integration is semi-implicit Verlet-like with a
/// per-step damping factor that anneals over the last 40% of iterations.
///
/// The patch is never pinned as a whole, so the centroid is restored after
/// every step; without that the system translates freely.
///
/// If the integration ever produces a non-finite coordinate the initial
/// embedding is returned unchanged.
#[profiling::function]
pub fn relax_embedding(
    patch: &Patch,
    index: &HalfEdgeIndex,
    initial: &[Vec2],
    params: &RelaxParams,
) -> Vec<Vec2> {
    use rayon::prelude::*;

    if initial.len() != patch.num_vertices() || initial.is_empty() {
        return initial.to_vec();
    }

    let mut springs: Vec<Spring> = index
        .iter_unique_edges()
        .map(|((a, b), boundary)| Spring {
            a,
            b,
            rest: 0.0,
            stiffness: if boundary {
                params.boundary_stiffness as f64
            } else {
                params.interior_stiffness as f64
            },
        })
        .collect();
    springs.par_iter_mut().for_each(|s| {
        s.rest = patch.mesh.edge_length(s.a, s.b) as f64;
    });

    let pinned: Vec<bool> = if params.pin_boundary {
        (0..patch.num_vertices() as u32)
            .map(|v| index.is_boundary_vertex(v))
            .collect()
    } else {
        vec![false; patch.num_vertices()]
    };

    let mut position: Vec<DVec2> = initial.iter().map(|p| p.as_dvec2()).collect();
    let mut velocity = vec![DVec2::ZERO; position.len()];
    let mut force = vec![DVec2::ZERO; position.len()];

    let anneal_from = params.iterations - params.iterations * 2 / 5;
    let mut damping = params.damping as f64;

    for iteration in 0..params.iterations {
        let centroid_before = centroid(&position);

        for f in force.iter_mut() {
            *f = DVec2::ZERO;
        }
        for spring in &springs {
            let delta = position[spring.b as usize] - position[spring.a as usize];
            let length = delta.length();
            if length <= f64::EPSILON {
                continue;
            }
            let pull = delta / length * (spring.stiffness * (length - spring.rest));
            force[spring.a as usize] += pull;
            force[spring.b as usize] -= pull;
        }

        for v in 0..position.len() {
            if pinned[v] {
                velocity[v] = DVec2::ZERO;
                continue;
            }
            velocity[v] = (velocity[v] + force[v] * TIME_STEP) * damping;
            position[v] += velocity[v] * TIME_STEP;
        }

        // Drift cancellation. The springs are internal forces, but the
        // damping asymmetries still walk the patch around without this.
        if !params.pin_boundary {
            let shift = centroid_before - centroid(&position);
            for p in position.iter_mut() {
                *p += shift;
            }
        }

        if iteration >= anneal_from {
            damping *= 0.995;
        }
    }

    if position.iter().any(|p| !p.is_finite()) {
        log::warn!("Relaxation diverged; keeping the initial embedding");
        return initial.to_vec();
    }
    position.iter().map(|p| p.as_vec2()).collect()
}

fn centroid(positions: &[DVec2]) -> DVec2 {
    positions.iter().fold(DVec2::ZERO, |a, &p| a + p) / positions.len() as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flatten::segmentation::Patch;
    use crate::flatten::unfold::planar_projection;
    use crate::mesh::primitives::Grid;

    fn patch_of(mesh: &TriMesh) -> Patch {
        let faces: Vec<u32> = (0..mesh.num_faces() as u32).collect();
        let red = vec![false; mesh.num_vertices()];
        Patch::from_faces(mesh, &faces, &red)
    }

    #[test]
    pub fn exact_embedding_is_a_fixed_point() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 4, 4));
        let index = patch.adjacency();
        let initial = planar_projection(&patch);
        let relaxed = relax_embedding(&patch, &index, &initial, &RelaxParams::default());
        for (a, b) in initial.iter().zip(&relaxed) {
            assert!(a.distance(*b) < 1e-5);
        }
    }

    #[test]
    pub fn centroid_never_drifts() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 6, 6));
        let index = patch.adjacency();
        // Shrink the embedding so springs actually fire
        let initial: Vec<Vec2> = planar_projection(&patch).iter().map(|p| *p * 0.7).collect();
        let before = initial.iter().fold(Vec2::ZERO, |a, &p| a + p) / initial.len() as f32;
        let relaxed = relax_embedding(&patch, &index, &initial, &RelaxParams::default());
        let after = relaxed.iter().fold(Vec2::ZERO, |a, &p| a + p) / relaxed.len() as f32;
        assert!(before.distance(after) < 1e-4);
    }

    #[test]
    pub fn shrunken_boundary_recovers_rest_lengths() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 6, 6));
        let index = patch.adjacency();
        let initial: Vec<Vec2> = planar_projection(&patch).iter().map(|p| *p * 0.8).collect();
        let params = RelaxParams {
            iterations: 2000,
            ..Default::default()
        };
        let relaxed = relax_embedding(&patch, &index, &initial, &params);
        for (key, boundary) in index.iter_unique_edges() {
            if !boundary {
                continue;
            }
            let rest = patch.mesh.edge_length(key.0, key.1);
            let got = relaxed[key.0 as usize].distance(relaxed[key.1 as usize]);
            assert!(
                (got - rest).abs() / rest < 0.10,
                "boundary edge {key:?}: {got} vs {rest}"
            );
        }
    }

    #[test]
    pub fn pinned_boundary_stays_put() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 5, 5));
        let index = patch.adjacency();
        let initial: Vec<Vec2> = planar_projection(&patch).iter().map(|p| *p * 0.9).collect();
        let params = RelaxParams {
            pin_boundary: true,
            ..Default::default()
        };
        let relaxed = relax_embedding(&patch, &index, &initial, &params);
        for v in 0..patch.num_vertices() as u32 {
            if index.is_boundary_vertex(v) {
                assert_eq!(relaxed[v as usize], initial[v as usize]);
            }
        }
    }

    #[test]
    pub fn relaxation_is_deterministic() {
        let patch = patch_of(&Grid::build(Vec3::ZERO, Vec2::ONE, 5, 5));
        let index = patch.adjacency();
        let initial: Vec<Vec2> = planar_projection(&patch).iter().map(|p| *p * 0.85).collect();
        let a = relax_embedding(&patch, &index, &initial, &RelaxParams::default());
        let b = relax_embedding(&patch, &index, &initial, &RelaxParams::default());
        assert_eq!(a, b);
    }
}
