// Copyright (C) 2023 setzer22 and contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Red-vertex detection, clustering and barrier edge extraction
pub mod seams;

/// Face-level flood segmentation with seam barriers and kerf removal
pub mod segmentation;

/// Euler characteristic, boundary loops and patch classification
pub mod topology;

/// Topological surgery: seam vertex splitting and cylinder geodesic cuts
pub mod surgery;

/// Initial planar embeddings: Laplacian LSCM, tube unrolling, BFS fan
pub mod unfold;

/// Differentiated mass-spring relaxation of planar embeddings
pub mod relax;

/// Shelf packing of flattened patches into a shared UV domain
pub mod packing;

/// The pipeline orchestrator and its configuration and result types
pub mod pipeline;
