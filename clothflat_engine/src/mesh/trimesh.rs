// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// An indexed triangle mesh. This is the representation at the boundary of the
/// pipeline: loaders produce it, every stage borrows it immutably, and
/// conditioning stages return fresh ones.
///
/// Colors, when present, are per-vertex RGB in the [0,1] range. The color
/// vector always has the same length as `positions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriMesh {
    pub positions: Vec<Vec3>,
    pub colors: Option<Vec<Vec3>>,
    pub faces: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mesh from a list of positions and a list of triangles
    /// containing indices that reference those positions.
    ///
    /// - Generic over Index: Use as much precision as you need / want.
    /// - Generic over Triangle: Use whatever input layout you want.
    ///
    /// If unsure, you can pass `Vec<[u32; 3]>` as `triangles`. You can also
    /// use `&[&[u32]]` or `u16` / `usize` indices.
    pub fn build_from_triangles<Index, Triangle>(
        positions: &[Vec3],
        colors: Option<&[Vec3]>,
        triangles: &[Triangle],
    ) -> Result<Self>
    where
        Index: num_traits::AsPrimitive<usize> + 'static + Copy,
        Triangle: AsRef<[Index]>,
    {
        if let Some(colors) = colors {
            if colors.len() != positions.len() {
                bail!(
                    "Color count ({}) does not match vertex count ({})",
                    colors.len(),
                    positions.len()
                )
            }
        }

        let mut faces = Vec::with_capacity(triangles.len());
        for triangle in triangles.iter().map(|t| t.as_ref()) {
            if triangle.len() != 3 {
                bail!("Cannot build a triangle mesh from non-triangle faces")
            }
            let (a, b, c) = (triangle[0].as_(), triangle[1].as_(), triangle[2].as_());
            if a == b || b == c || a == c {
                bail!("Cannot build meshes where a triangle has duplicate vertices")
            }
            for i in [a, b, c] {
                if i >= positions.len() {
                    bail!("Out-of-bounds index in the triangle array {}", i)
                }
            }
            faces.push([a as u32, b as u32, c as u32]);
        }

        Ok(Self {
            positions: positions.to_vec(),
            colors: colors.map(|c| c.to_vec()),
            faces,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.faces.is_empty()
    }

    pub fn color(&self, vertex: u32) -> Option<Vec3> {
        self.colors.as_ref().map(|c| c[vertex as usize])
    }

    /// Returns the center and size of the axis-aligned bounding box.
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Vec3::new(f32::MIN, f32::MIN, f32::MIN);
        for v in &self.positions {
            min = min.min(*v);
            max = max.max(*v);
        }
        let center = (min + max) * 0.5;
        let size = max - min;
        (center, size)
    }

    /// Diameter of the bounding box. Used as the scale reference for adaptive
    /// tolerances.
    pub fn bounding_diameter(&self) -> f32 {
        if self.positions.is_empty() {
            return 0.0;
        }
        let (_, size) = self.bounding_box();
        size.length()
    }

    /// The vertex average of a face. For triangles this is also the centroid.
    pub fn face_center(&self, face: u32) -> Vec3 {
        let [a, b, c] = self.faces[face as usize];
        (self.positions[a as usize] + self.positions[b as usize] + self.positions[c as usize])
            / 3.0
    }

    pub fn edge_length(&self, a: u32, b: u32) -> f32 {
        self.positions[a as usize].distance(self.positions[b as usize])
    }
}

/// Twice the signed area of a 2D triangle. Positive when (a, b, c) wind
/// counter-clockwise.
pub fn signed_area_2d(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b - a).perp_dot(c - a)
}

/// An embedding is valid when all face triangles have non-zero signed area
/// with a consistent sign.
pub fn embedding_is_valid(uvs: &[Vec2], faces: &[[u32; 3]]) -> bool {
    let mut sign = 0.0f32;
    for [a, b, c] in faces.iter_cpy() {
        let area = signed_area_2d(uvs[a as usize], uvs[b as usize], uvs[c as usize]);
        if area == 0.0 || !area.is_finite() {
            return false;
        }
        if sign == 0.0 {
            sign = area.signum();
        } else if area.signum() != sign {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn build_rejects_degenerate_input() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!(TriMesh::build_from_triangles(&positions, None, &[[0u32, 1, 1]]).is_err());
        assert!(TriMesh::build_from_triangles(&positions, None, &[[0u32, 1, 3]]).is_err());
        let mesh = TriMesh::build_from_triangles(&positions, None, &[[0u32, 1, 2]]).unwrap();
        assert_eq!(mesh.num_faces(), 1);
        assert_eq!(mesh.num_vertices(), 3);
    }

    #[test]
    pub fn signed_area_detects_flips() {
        let uvs = [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::new(1.0, 1.0)];
        // Both triangles counter-clockwise
        assert!(embedding_is_valid(&uvs, &[[0, 1, 2], [1, 3, 2]]));
        // Second triangle flipped
        assert!(!embedding_is_valid(&uvs, &[[0, 1, 2], [3, 1, 2]]));
    }
}
