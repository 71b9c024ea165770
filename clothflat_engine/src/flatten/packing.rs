// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use float_ord::FloatOrd;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Axis-aligned UV rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Default for UvBounds {
    fn default() -> Self {
        Self {
            min: Vec2::ZERO,
            max: Vec2::ZERO,
        }
    }
}

impl UvBounds {
    pub fn of_points(points: &[Vec2]) -> Self {
        let mut min = Vec2::new(f32::MAX, f32::MAX);
        let mut max = Vec2::new(f32::MIN, f32::MIN);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        if points.is_empty() {
            return Self::default();
        }
        Self { min, max }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn union(&self, other: &UvBounds) -> UvBounds {
        UvBounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn overlaps(&self, other: &UvBounds) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }
}

/// The order patches are fed to the shelf packer. Pipeline order keeps patch
/// indices meaningful to the host; area-descending wastes less vertical
/// space on mixed-size results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackOrder {
    Pipeline,
    AreaDescending,
}

#[derive(Debug)]
pub struct PackedLayout {
    /// Post-pack bounds of each patch, aligned with the input slice.
    pub patch_bounds: Vec<UvBounds>,
    /// Bounds of the whole packed sheet.
    pub bounds: UvBounds,
    /// Sum of patch bounding box areas.
    pub total_area: f32,
}

/// Shelf packing: patches are laid out left to right in rows of at most
/// `row_width`, each row as tall as its tallest patch. The UVs are
/// translated in place.
pub fn pack(
    uvs: &mut [Vec<Vec2>],
    row_width: f32,
    padding: f32,
    order: PackOrder,
) -> PackedLayout {
    let mut order_indices: Vec<usize> = (0..uvs.len()).collect();
    if order == PackOrder::AreaDescending {
        order_indices.sort_by_key(|&i| {
            std::cmp::Reverse(FloatOrd(UvBounds::of_points(&uvs[i]).area()))
        });
    }

    let mut patch_bounds = vec![UvBounds::default(); uvs.len()];
    let mut cursor_x = 0.0f32;
    let mut row_y = 0.0f32;
    let mut row_height = 0.0f32;
    let mut total_area = 0.0f32;
    let mut sheet: Option<UvBounds> = None;

    for &i in &order_indices {
        let bounds = UvBounds::of_points(&uvs[i]);
        let (w, h) = (bounds.width(), bounds.height());

        if cursor_x > 0.0 && cursor_x + w > row_width {
            row_y += row_height + padding;
            cursor_x = 0.0;
            row_height = 0.0;
        }

        let offset = Vec2::new(cursor_x - bounds.min.x, row_y - bounds.min.y);
        for p in uvs[i].iter_mut() {
            *p += offset;
        }
        let placed = UvBounds {
            min: bounds.min + offset,
            max: bounds.max + offset,
        };
        patch_bounds[i] = placed;
        sheet = Some(match sheet {
            Some(s) => s.union(&placed),
            None => placed,
        });

        cursor_x += w + padding;
        row_height = row_height.max(h);
        total_area += bounds.area();
    }

    PackedLayout {
        patch_bounds,
        bounds: sheet.unwrap_or_default(),
        total_area,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rect(origin: Vec2, w: f32, h: f32) -> Vec<Vec2> {
        vec![
            origin,
            origin + Vec2::new(w, 0.0),
            origin + Vec2::new(w, h),
            origin + Vec2::new(0.0, h),
        ]
    }

    #[test]
    pub fn packed_patches_never_overlap() {
        let mut uvs = vec![
            rect(Vec2::new(-3.0, 2.0), 1.5, 1.0),
            rect(Vec2::new(10.0, 10.0), 2.0, 0.5),
            rect(Vec2::ZERO, 1.0, 2.0),
            rect(Vec2::new(0.3, -0.7), 1.8, 1.1),
            rect(Vec2::new(5.0, 5.0), 0.5, 0.5),
        ];
        let layout = pack(&mut uvs, 4.0, 0.02, PackOrder::Pipeline);
        for i in 0..uvs.len() {
            for j in (i + 1)..uvs.len() {
                assert!(
                    !layout.patch_bounds[i].overlaps(&layout.patch_bounds[j]),
                    "{i} and {j} overlap"
                );
            }
        }
        // Disjoint rectangles cannot share corners either
        let corners: HashSet<Vec2Ord> = uvs.iter().flatten().map(|p| p.to_ord()).collect();
        assert_eq!(corners.len(), 4 * uvs.len());
        // Rows respect the sheet width for patches narrower than a row
        assert!(layout.bounds.width() <= 4.0 + 0.02);
        assert!(layout.bounds.min.x.abs() < 1e-6);
        assert!(layout.bounds.min.y.abs() < 1e-6);
    }

    #[test]
    pub fn packing_is_idempotent() {
        let mut uvs = vec![
            rect(Vec2::new(2.0, -1.0), 1.2, 0.8),
            rect(Vec2::new(-4.0, 3.0), 2.2, 1.4),
            rect(Vec2::ZERO, 0.9, 0.9),
        ];
        let first = pack(&mut uvs, 4.0, 0.02, PackOrder::Pipeline);
        let snapshot = uvs.clone();
        let second = pack(&mut uvs, 4.0, 0.02, PackOrder::Pipeline);
        assert_eq!(snapshot, uvs);
        assert_eq!(first.patch_bounds, second.patch_bounds);
    }

    #[test]
    pub fn area_descending_places_largest_first() {
        let mut uvs = vec![
            rect(Vec2::ZERO, 0.5, 0.5),
            rect(Vec2::ZERO, 2.0, 2.0),
        ];
        let layout = pack(&mut uvs, 4.0, 0.02, PackOrder::AreaDescending);
        // The big patch claims the row origin
        assert!(layout.patch_bounds[1].min.x.abs() < 1e-6);
        assert!(layout.patch_bounds[0].min.x > 1.0);
        assert_eq!(layout.total_area, 0.25 + 4.0);
    }

    #[test]
    pub fn overflowing_patch_starts_a_new_row() {
        let mut uvs = vec![
            rect(Vec2::ZERO, 3.0, 1.0),
            rect(Vec2::ZERO, 3.0, 1.0),
        ];
        let layout = pack(&mut uvs, 4.0, 0.02, PackOrder::Pipeline);
        assert!(layout.patch_bounds[1].min.y >= 1.0);
        assert!((layout.bounds.height() - 2.02).abs() < 1e-5);
    }
}
