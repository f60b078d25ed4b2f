/// KITTI velodyne binary encoder.
pub mod kitti;

/// PLY reader module.
pub mod ply;
