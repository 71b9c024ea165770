// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use crate::flatten::packing::{self, PackOrder, UvBounds};
use crate::flatten::relax::{relax_embedding, RelaxParams};
use crate::flatten::seams::{extract_seams, RedThreshold};
use crate::flatten::segmentation::{segment_mesh, Patch};
use crate::flatten::surgery::{cut_cylinder, cut_internal_seams};
use crate::flatten::topology::{inspect, PatchClass};
use crate::flatten::unfold::{initial_embedding, InitialStrategy, UnfoldParams};
use crate::mesh::connectivity::filter_small_components;
use crate::mesh::weld::weld_vertices;
use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenConfig {
    /// Vertex weld tolerance in world units.
    pub weld_tolerance: f32,
    /// Patches below this face count are discarded by the segmenter.
    pub min_patch_faces: usize,
    /// Connected components below this face count are discarded before
    /// seam extraction.
    pub min_component_faces: usize,
    pub red_threshold: RedThreshold,
    /// Absolute floor for the seam cluster radius.
    pub cluster_eps: f32,
    /// Fraction of the bounding diameter used as the adaptive cluster
    /// radius.
    pub cluster_eps_fraction: f32,
    pub relaxation_iterations: usize,
    pub boundary_stiffness: f32,
    pub interior_stiffness: f32,
    pub pin_boundary: bool,
    pub damping: f32,
    pub packer_row_width: f32,
    pub packer_padding: f32,
    pub pack_order: PackOrder,
    pub lscm_iterations: usize,
    pub lscm_alpha: f32,
    /// One Laplacian pass over boundary vertex 3D positions before
    /// unfolding. Smooths jagged kerf rims; off until its effect on length
    /// faithfulness is settled.
    pub smooth_boundary_3d: bool,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            weld_tolerance: 1e-5,
            min_patch_faces: 500,
            min_component_faces: 100,
            red_threshold: RedThreshold::default(),
            cluster_eps: 0.0,
            cluster_eps_fraction: 0.05,
            relaxation_iterations: 200,
            boundary_stiffness: 50.0,
            interior_stiffness: 0.2,
            pin_boundary: false,
            damping: 0.995,
            packer_row_width: 4.0,
            packer_padding: 0.02,
            pack_order: PackOrder::Pipeline,
            lscm_iterations: 30,
            lscm_alpha: 0.4,
            smooth_boundary_3d: false,
        }
    }
}

/// Pipeline stages, in execution order. Reported through the progress
/// callback so a host can show where a long run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Weld,
    Components,
    Seams,
    Segmentation,
    Flatten,
    Pack,
}

/// One flattened pattern piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatPatch {
    pub uv: Vec<Vec2>,
    /// Triangles indexing into `uv`.
    pub local_faces: Vec<[u32; 3]>,
    /// Indices into the original face list.
    pub global_faces: Vec<u32>,
    /// Local vertex -> original vertex. Several locals may map to the same
    /// original after seam surgery.
    pub vertex_map: Vec<u32>,
    pub bounds: UvBounds,
    pub topology_error: bool,
    /// The initial embedding that was actually used.
    pub strategy: InitialStrategy,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenResult {
    pub patches: Vec<FlatPatch>,
    /// Bounds of the packed sheet.
    pub bounds: UvBounds,
    /// Sum of patch bounding box areas.
    pub total_area: f32,
    /// Extracted seam polylines, for display only.
    pub seams: Vec<Vec<Vec3>>,
    pub kerf_faces_removed: usize,
    pub fragments_dropped: usize,
}

pub fn flatten_mesh(mesh: &TriMesh, config: &FlattenConfig) -> FlattenResult {
    flatten_mesh_with_progress(mesh, config, &mut |_, _| true)
}

/// Runs the whole pipeline. The progress callback is invoked at stage
/// boundaries and between patches; returning `false` cancels the run, and
/// every patch completed so far is still packed and returned. A failure
/// inside one patch never aborts the others.
#[profiling::function]
pub fn flatten_mesh_with_progress(
    mesh: &TriMesh,
    config: &FlattenConfig,
    progress: &mut dyn FnMut(Stage, f32) -> bool,
) -> FlattenResult {
    if mesh.is_empty() {
        return FlattenResult::default();
    }

    if !progress(Stage::Weld, 0.0) {
        return FlattenResult::default();
    }
    let welded = weld_vertices(mesh, config.weld_tolerance);

    // Original-face index per welded face, and a representative original
    // vertex per welded vertex, to express results in input indices.
    let mut weld_rep = vec![u32::MAX; welded.mesh.num_vertices()];
    for (old, &new) in welded.vertex_map.iter().enumerate() {
        if weld_rep[new as usize] == u32::MAX {
            weld_rep[new as usize] = old as u32;
        }
    }

    if !progress(Stage::Components, 0.0) {
        return FlattenResult::default();
    }
    let filtered = filter_small_components(&welded.mesh, config.min_component_faces);

    if !progress(Stage::Seams, 0.0) {
        return FlattenResult::default();
    }
    let seams = extract_seams(
        &filtered.mesh,
        &config.red_threshold,
        config.cluster_eps,
        config.cluster_eps_fraction,
    );

    if !progress(Stage::Segmentation, 0.0) {
        return FlattenResult::default();
    }
    let index = HalfEdgeIndex::from_mesh(&filtered.mesh);
    let segmentation = segment_mesh(
        &filtered.mesh,
        &index,
        &seams.barrier_edges,
        &seams.red_flags,
        config.min_patch_faces,
    );
    drop(index);

    let num_patches = segmentation.patches.len();
    let mut patches = Vec::with_capacity(num_patches);
    for (i, patch) in segmentation.patches.into_iter().enumerate() {
        if !progress(Stage::Flatten, i as f32 / num_patches.max(1) as f32) {
            log::info!("Flattening cancelled after {i} of {num_patches} patches");
            break;
        }
        let flattened = flatten_patch(patch, config);

        let global_faces = flattened
            .patch
            .global_faces
            .iter_cpy()
            .map(|f| welded.face_map[filtered.face_map[f as usize] as usize])
            .collect();
        let vertex_map = flattened
            .patch
            .vertex_map
            .iter_cpy()
            .map(|v| weld_rep[filtered.vertex_map[v as usize] as usize])
            .collect();

        patches.push(FlatPatch {
            uv: flattened.uv,
            local_faces: flattened.patch.mesh.faces,
            global_faces,
            vertex_map,
            bounds: UvBounds::default(),
            topology_error: flattened.patch.topology_error,
            strategy: flattened.strategy,
            warnings: flattened.warnings,
        });
    }

    progress(Stage::Pack, 0.0);
    let mut uvs: Vec<Vec<Vec2>> = patches.iter_mut().map(|p| std::mem::take(&mut p.uv)).collect();
    let layout = packing::pack(
        &mut uvs,
        config.packer_row_width,
        config.packer_padding,
        config.pack_order,
    );
    for ((patch, uv), bounds) in patches.iter_mut().zip(uvs).zip(layout.patch_bounds) {
        patch.uv = uv;
        patch.bounds = bounds;
    }

    FlattenResult {
        patches,
        bounds: layout.bounds,
        total_area: layout.total_area,
        seams: seams.paths,
        kerf_faces_removed: segmentation.kerf_faces_removed,
        fragments_dropped: filtered.fragments_dropped,
    }
}

struct FlattenedPatch {
    patch: Patch,
    uv: Vec<Vec2>,
    strategy: InitialStrategy,
    warnings: Vec<String>,
}

/// The per-patch subpipeline: surgery, topology inspection, initial
/// embedding, relaxation.
fn flatten_patch(mut patch: Patch, config: &FlattenConfig) -> FlattenedPatch {
    let mut warnings = Vec::new();

    if cut_internal_seams(&mut patch) {
        log::debug!("Cut internal seams in a patch of {} faces", patch.num_faces());
    }

    let mut topo = inspect(&patch, &patch.adjacency());
    let mut was_cylinder = false;
    if topo.class == PatchClass::Cylinder {
        match cut_cylinder(&mut patch, &topo) {
            Ok(cut) => {
                was_cylinder = cut;
                topo = inspect(&patch, &patch.adjacency());
            }
            Err(e) => {
                log::warn!("Cylinder repair failed: {e}");
                warnings.push(format!("Cylinder repair failed: {e}"));
            }
        }
    }

    match topo.class {
        PatchClass::Sphere => {
            patch.topology_error = true;
            warnings.push(
                "Patch is a closed surface; draw a red seam line to cut it open".to_owned(),
            );
        }
        PatchClass::Complex => {
            patch.topology_error = true;
            warnings.push(format!(
                "Unsupported topology (euler {}, {} boundary loops); flattened anyway",
                topo.euler,
                topo.boundary_loops.len()
            ));
        }
        _ => {}
    }

    if config.smooth_boundary_3d {
        smooth_boundary_positions(&mut patch);
    }

    let index = patch.adjacency();
    let strategies: &[InitialStrategy] = if patch.topology_error {
        &[InitialStrategy::BfsFan, InitialStrategy::Planar]
    } else if was_cylinder || patch.is_elongated() {
        &[
            InitialStrategy::Tube,
            InitialStrategy::Lscm,
            InitialStrategy::BfsFan,
            InitialStrategy::Planar,
        ]
    } else {
        &[
            InitialStrategy::Lscm,
            InitialStrategy::BfsFan,
            InitialStrategy::Planar,
        ]
    };
    let unfold_params = UnfoldParams {
        lscm_iterations: config.lscm_iterations,
        lscm_alpha: config.lscm_alpha,
    };
    let (initial, strategy) = initial_embedding(&patch, &index, strategies, &unfold_params);

    let relax_params = RelaxParams {
        iterations: config.relaxation_iterations,
        boundary_stiffness: config.boundary_stiffness,
        interior_stiffness: config.interior_stiffness,
        pin_boundary: config.pin_boundary,
        damping: config.damping,
    };
    let uv = relax_embedding(&patch, &index, &initial, &relax_params);

    FlattenedPatch {
        patch,
        uv,
        strategy,
        warnings,
    }
}

/// One uniform Laplacian pass over the 3D positions of boundary vertices,
/// averaging each with its neighbors along the boundary.
fn smooth_boundary_positions(patch: &mut Patch) {
    let index = patch.adjacency();
    let mut neighbors = HashMap::<u32, SVec<u32>>::new();
    for (a, b) in index.boundary_edges() {
        neighbors.entry(a).or_default().push(b);
        neighbors.entry(b).or_default().push(a);
    }
    let old = patch.mesh.positions.clone();
    for (&v, adjacent) in neighbors.iter() {
        if adjacent.len() < 2 {
            continue;
        }
        let mean = adjacent
            .iter_cpy()
            .fold(Vec3::ZERO, |acc, w| acc + old[w as usize])
            / adjacent.len() as f32;
        patch.mesh.positions[v as usize] = (old[v as usize] + mean) * 0.5;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::primitives::{paint_red, Grid};

    fn small_config() -> FlattenConfig {
        FlattenConfig {
            min_patch_faces: 1,
            min_component_faces: 1,
            ..Default::default()
        }
    }

    #[test]
    pub fn empty_mesh_returns_empty_result() {
        let result = flatten_mesh(&TriMesh::new(), &FlattenConfig::default());
        assert!(result.patches.is_empty());
        assert_eq!(result.total_area, 0.0);
    }

    #[test]
    pub fn uncolored_mesh_is_a_single_patch() {
        let mesh = Grid::build(Vec3::ZERO, Vec2::ONE, 6, 6);
        let result = flatten_mesh(&mesh, &small_config());
        assert_eq!(result.patches.len(), 1);
        assert_eq!(result.patches[0].global_faces.len(), mesh.num_faces());
        assert!(!result.patches[0].topology_error);
        assert!(result.seams.is_empty());
    }

    #[test]
    pub fn runs_are_deterministic() {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, 8, 8);
        paint_red(&mut mesh, |p| (p.y - 0.5).abs() < 1e-4);
        let a = flatten_mesh(&mesh, &small_config());
        let b = flatten_mesh(&mesh, &small_config());
        assert_eq!(a, b);
    }

    #[test]
    pub fn cancellation_keeps_completed_patches() {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, 8, 8);
        paint_red(&mut mesh, |p| (p.y - 0.5).abs() < 1e-4);
        let mut flatten_calls = 0;
        let result = flatten_mesh_with_progress(&mesh, &small_config(), &mut |stage, _| {
            if stage == Stage::Flatten {
                flatten_calls += 1;
                flatten_calls <= 1
            } else {
                true
            }
        });
        assert_eq!(result.patches.len(), 1);
    }

    #[test]
    pub fn vertex_map_points_at_original_positions() {
        let mut mesh = Grid::build(Vec3::new(0.5, 0.5, 0.0), Vec2::ONE, 6, 6);
        paint_red(&mut mesh, |p| (p.y - 0.5).abs() < 1e-4);
        let result = flatten_mesh(&mesh, &small_config());
        for patch in &result.patches {
            assert_eq!(patch.uv.len(), patch.vertex_map.len());
            for &v in &patch.vertex_map {
                assert!((v as usize) < mesh.num_vertices());
            }
            for &f in &patch.global_faces {
                assert!((f as usize) < mesh.num_faces());
            }
        }
    }
}
