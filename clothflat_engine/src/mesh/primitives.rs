// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f32::consts::PI;

use crate::prelude::*;

/// A flat grid of quads in the XY plane, each split into two triangles.
pub struct Grid;
impl Grid {
    pub fn build(center: Vec3, size: Vec2, quads_x: u32, quads_y: u32) -> TriMesh {
        let cols = quads_x + 1;
        let rows = quads_y + 1;
        let mut positions = Vec::with_capacity((cols * rows) as usize);
        for j in 0..rows {
            for i in 0..cols {
                let u = i as f32 / quads_x as f32 - 0.5;
                let v = j as f32 / quads_y as f32 - 0.5;
                positions.push(center + Vec3::new(u * size.x, v * size.y, 0.0));
            }
        }

        let mut faces = Vec::with_capacity((quads_x * quads_y * 2) as usize);
        for j in 0..quads_y {
            for i in 0..quads_x {
                let v00 = j * cols + i;
                let v10 = v00 + 1;
                let v01 = v00 + cols;
                let v11 = v01 + 1;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }

        TriMesh {
            positions,
            colors: None,
            faces,
        }
    }
}

/// An open tube around the Y axis, optionally tapered. `rings` counts the
/// quad rows between the two rims; there are no caps.
pub struct Tube;
impl Tube {
    pub fn build(
        center: Vec3,
        radius_bottom: f32,
        radius_top: f32,
        height: f32,
        segments: u32,
        rings: u32,
    ) -> TriMesh {
        let mut positions = Vec::with_capacity((segments * (rings + 1)) as usize);
        for ring in 0..=rings {
            let t = ring as f32 / rings as f32;
            let radius = lerp(radius_bottom, radius_top, t);
            let y = (t - 0.5) * height;
            for s in 0..segments {
                let theta = 2.0 * PI * s as f32 / segments as f32;
                positions.push(
                    center + Vec3::new(radius * theta.cos(), y, radius * theta.sin()),
                );
            }
        }

        let mut faces = Vec::with_capacity((segments * rings * 2) as usize);
        for ring in 0..rings {
            let r0 = ring * segments;
            let r1 = r0 + segments;
            for s in 0..segments {
                let s1 = (s + 1) % segments;
                let (a, b, c, d) = (r0 + s, r0 + s1, r1 + s1, r1 + s);
                faces.push([a, b, c]);
                faces.push([a, c, d]);
            }
        }

        TriMesh {
            positions,
            colors: None,
            faces,
        }
    }
}

/// A sphere built by subdividing an icosahedron. Face count is
/// `20 * 4.pow(subdivisions)`.
pub struct IcoSphere;
impl IcoSphere {
    pub fn build(center: Vec3, radius: f32, subdivisions: u32) -> TriMesh {
        let phi = (1.0 + 5.0f32.sqrt()) / 2.0;
        let mut positions: Vec<Vec3> = [
            (-1.0, phi, 0.0),
            (1.0, phi, 0.0),
            (-1.0, -phi, 0.0),
            (1.0, -phi, 0.0),
            (0.0, -1.0, phi),
            (0.0, 1.0, phi),
            (0.0, -1.0, -phi),
            (0.0, 1.0, -phi),
            (phi, 0.0, -1.0),
            (phi, 0.0, 1.0),
            (-phi, 0.0, -1.0),
            (-phi, 0.0, 1.0),
        ]
        .iter()
        .map(|&(x, y, z)| Vec3::new(x, y, z).normalize())
        .collect();

        let mut faces: Vec<[u32; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoint = HashMap::<EdgeKey, u32>::new();
            let mut new_faces = Vec::with_capacity(faces.len() * 4);
            for [a, b, c] in faces.iter_cpy() {
                let mut mid = |u: u32, v: u32, positions: &mut Vec<Vec3>| -> u32 {
                    *midpoint.entry(edge_key(u, v)).or_insert_with(|| {
                        let p = ((positions[u as usize] + positions[v as usize]) * 0.5)
                            .normalize();
                        positions.push(p);
                        positions.len() as u32 - 1
                    })
                };
                let ab = mid(a, b, &mut positions);
                let bc = mid(b, c, &mut positions);
                let ca = mid(c, a, &mut positions);
                new_faces.push([a, ab, ca]);
                new_faces.push([b, bc, ab]);
                new_faces.push([c, ca, bc]);
                new_faces.push([ab, bc, ca]);
            }
            faces = new_faces;
        }

        for p in &mut positions {
            *p = center + *p * radius;
        }

        TriMesh {
            positions,
            colors: None,
            faces,
        }
    }
}

pub const SEAM_RED: Vec3 = Vec3::new(0.9, 0.05, 0.05);
pub const NEUTRAL_GRAY: Vec3 = Vec3::new(0.5, 0.5, 0.5);

/// Paints vertices matching the predicate seam-red and everything else
/// neutral gray, allocating the color channel if the mesh had none.
pub fn paint_red(mesh: &mut TriMesh, predicate: impl Fn(Vec3) -> bool) {
    let colors = mesh
        .colors
        .get_or_insert_with(|| vec![NEUTRAL_GRAY; mesh.positions.len()]);
    for (p, c) in mesh.positions.iter().zip(colors.iter_mut()) {
        if predicate(*p) {
            *c = SEAM_RED;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn grid_counts() {
        let grid = Grid::build(Vec3::ZERO, Vec2::ONE, 3, 3);
        assert_eq!(grid.num_vertices(), 16);
        assert_eq!(grid.num_faces(), 18);
        let (center, size) = grid.bounding_box();
        assert!(center.length() < 1e-6);
        assert!((size - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    pub fn tube_is_open_and_closed_around() {
        let tube = Tube::build(Vec3::ZERO, 1.0, 1.0, 2.0, 16, 4);
        assert_eq!(tube.num_vertices(), 16 * 5);
        assert_eq!(tube.num_faces(), 16 * 4 * 2);
        let index = HalfEdgeIndex::from_mesh(&tube);
        // Two rims of 16 boundary edges each
        assert_eq!(index.boundary_edges().len(), 32);
    }

    #[test]
    pub fn icosphere_is_closed() {
        let sphere = IcoSphere::build(Vec3::ZERO, 1.0, 2);
        assert_eq!(sphere.num_faces(), 320);
        // Midpoint caching must not duplicate subdivision vertices
        let unique: HashSet<Vec3Ord> = sphere.positions.iter().map(|p| p.to_ord()).collect();
        assert_eq!(unique.len(), sphere.num_vertices());
        let index = HalfEdgeIndex::from_mesh(&sphere);
        assert!(index.boundary_edges().is_empty());
        // V - E + F = 2 for a sphere
        let euler =
            sphere.num_vertices() as i64 - index.num_edges() as i64 + sphere.num_faces() as i64;
        assert_eq!(euler, 2);
    }
}
