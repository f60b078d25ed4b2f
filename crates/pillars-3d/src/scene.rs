use std::num::NonZeroUsize;

use crate::pointcloud::{points_of, Point, PointCloud, PointSchema};

/// Error types for the scene module.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The points-per-scene budget must be positive.
    #[error("points_per_scene must be a positive integer, got {0}")]
    InvalidBudget(usize),
}

/// A contiguous run of points taken from a [`PointCloud`].
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    index: usize,
    schema: &'a PointSchema,
    data: &'a [f64],
}

impl<'a> Scene<'a> {
    /// The 0-based position of the scene within its cloud's partitioning.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of points in the scene.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.schema.num_fields()
    }

    /// Always `false` for scenes built by [`ScenePartitioner`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The schema shared with the source cloud.
    pub fn schema(&self) -> &'a PointSchema {
        self.schema
    }

    /// The scene's point records, row-major.
    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// Iterate over the scene's points in order.
    pub fn points(&self) -> impl ExactSizeIterator<Item = Point<'a>> + 'a {
        points_of(self.data, self.schema)
    }
}

/// Splits a point cloud into bounded-size scenes.
///
/// Scene `i` holds the points at indices `[i * budget, min((i + 1) * budget, len))`.
/// The split keeps the source order and never resamples, so the same cloud and budget
/// always give the same scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenePartitioner {
    points_per_scene: NonZeroUsize,
}

impl ScenePartitioner {
    /// Create a partitioner with the given budget.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::InvalidBudget`] when `points_per_scene` is zero.
    pub fn new(points_per_scene: usize) -> Result<Self, SceneError> {
        let points_per_scene =
            NonZeroUsize::new(points_per_scene).ok_or(SceneError::InvalidBudget(points_per_scene))?;
        Ok(Self { points_per_scene })
    }

    /// The maximum number of points in one scene.
    pub fn points_per_scene(&self) -> usize {
        self.points_per_scene.get()
    }

    /// Number of scenes a cloud of `total_points` is split into.
    pub fn num_scenes(&self, total_points: usize) -> usize {
        total_points.div_ceil(self.points_per_scene.get())
    }

    /// Split `cloud` into scenes. An empty cloud gives no scenes.
    pub fn partition<'a>(&self, cloud: &'a PointCloud) -> Vec<Scene<'a>> {
        let budget = self.points_per_scene.get();
        if cloud.len() < budget && !cloud.is_empty() {
            log::warn!(
                "points_per_scene ({budget}) exceeds the number of points ({}), using a single scene",
                cloud.len()
            );
        }

        let schema = cloud.schema();
        cloud
            .as_slice()
            .chunks(budget.saturating_mul(schema.num_fields()))
            .enumerate()
            .map(|(index, data)| Scene {
                index,
                schema,
                data,
            })
            .collect()
    }
}

/// Split `cloud` into scenes of at most `points_per_scene` points.
///
/// # Errors
///
/// Returns [`SceneError::InvalidBudget`] when `points_per_scene` is zero.
pub fn partition(cloud: &PointCloud, points_per_scene: usize) -> Result<Vec<Scene<'_>>, SceneError> {
    Ok(ScenePartitioner::new(points_per_scene)?.partition(cloud))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_cloud(len: usize) -> PointCloud {
        let schema = PointSchema::new(["intensity"]).unwrap();
        let data = (0..len)
            .flat_map(|i| {
                let v = i as f64;
                [v, -v, 2.0 * v, 0.5]
            })
            .collect();
        PointCloud::from_flat(schema, data).unwrap()
    }

    #[test]
    fn test_scene_count_law() -> Result<(), SceneError> {
        let cloud = sequential_cloud(250_000);
        let scenes = partition(&cloud, 120_000)?;
        let sizes: Vec<_> = scenes.iter().map(Scene::len).collect();
        assert_eq!(sizes, [120_000, 120_000, 10_000]);
        let indices: Vec<_> = scenes.iter().map(Scene::index).collect();
        assert_eq!(indices, [0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_partition_is_lossless() -> Result<(), SceneError> {
        let cloud = sequential_cloud(1_003);
        for budget in [1, 2, 7, 100, 1_003, 5_000] {
            let scenes = partition(&cloud, budget)?;
            assert_eq!(scenes.len(), 1_003usize.div_ceil(budget));
            assert!(scenes.iter().all(|s| (1..=budget).contains(&s.len())));

            let joined: Vec<f64> = scenes.iter().flat_map(|s| s.as_slice()).copied().collect();
            assert_eq!(joined.as_slice(), cloud.as_slice());
        }
        Ok(())
    }

    #[test]
    fn test_exact_multiple_has_no_empty_scene() -> Result<(), SceneError> {
        let cloud = sequential_cloud(300);
        let scenes = partition(&cloud, 100)?;
        assert_eq!(scenes.len(), 3);
        assert!(scenes.iter().all(|s| s.len() == 100));
        Ok(())
    }

    #[test]
    fn test_scene_points_follow_source_order() -> Result<(), SceneError> {
        let cloud = sequential_cloud(10);
        let scenes = partition(&cloud, 4)?;
        let first = scenes[2].points().next().unwrap();
        assert_eq!(first.position(), [8.0, -8.0, 16.0]);
        assert_eq!(scenes[2].points().len(), 2);
        Ok(())
    }

    #[test]
    fn test_empty_cloud() -> Result<(), SceneError> {
        let cloud = PointCloud::new(PointSchema::xyz());
        assert!(partition(&cloud, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_zero_budget() {
        let cloud = sequential_cloud(3);
        assert!(matches!(
            partition(&cloud, 0),
            Err(SceneError::InvalidBudget(0))
        ));
    }

    #[test]
    fn test_num_scenes() -> Result<(), SceneError> {
        let partitioner = ScenePartitioner::new(120_000)?;
        assert_eq!(partitioner.num_scenes(0), 0);
        assert_eq!(partitioner.num_scenes(120_000), 1);
        assert_eq!(partitioner.num_scenes(120_001), 2);
        Ok(())
    }
}
