// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The indexed triangle mesh at the boundary of the pipeline
pub mod trimesh;

/// An ephemeral half-edge adjacency index over a triangle mesh
pub mod adjacency;

/// Spatial-hash merging of coincident vertices
pub mod weld;

/// Connected-component discovery and fragment filtering
pub mod connectivity;

/// Primitive shapes, like grids, tubes or icospheres
pub mod primitives;
