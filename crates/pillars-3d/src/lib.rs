#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// I/O utilities for reading PLY scans and writing KITTI binaries.
pub mod io;

/// Artifact commit and the KITTI directory layout.
pub mod output;

/// End-to-end conversion of one scan into scene artifacts.
pub mod pipeline;

/// Point cloud types.
pub mod pointcloud;

/// Splitting point clouds into bounded-size scenes.
pub mod scene;
