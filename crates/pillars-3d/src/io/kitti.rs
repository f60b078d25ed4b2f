use std::io::{BufWriter, Write};
use std::path::Path;

use crate::pointcloud::PointSchema;
use crate::scene::Scene;

/// Per-point features read by the PointPillars KITTI loader, in record order.
pub const POINTPILLARS_FEATURES: [&str; 4] = ["x", "y", "z", "intensity"];

/// Size in bytes of one encoded value (`f32`).
pub const KITTI_VALUE_SIZE: usize = 4;

/// Error types for the KITTI module.
#[derive(Debug, thiserror::Error)]
pub enum KittiError {
    /// The scene schema lacks a feature the detector requires.
    #[error("Point schema lacks required feature `{0}`")]
    MissingFeature(String),

    /// Failed to read or write KITTI data.
    #[error("Failed to read or write KITTI data: {0}")]
    Io(#[from] std::io::Error),

    /// The byte length is not a whole number of records.
    #[error("KITTI data length {len} is not a multiple of the {record_size}-byte record")]
    InvalidLength {
        /// Length of the data in bytes.
        len: usize,
        /// Bytes per record.
        record_size: usize,
    },
}

/// Serializes scenes into artifact bytes.
pub trait SceneEncoder {
    /// Check that a schema carries everything the encoder needs.
    ///
    /// Called once per run, before any artifact is written.
    fn validate(&self, schema: &PointSchema) -> Result<(), KittiError>;

    /// Stream the encoded scene into `writer`.
    fn encode_into(&self, scene: &Scene<'_>, writer: &mut dyn Write) -> Result<(), KittiError>;

    /// Encode the scene into a byte vector.
    fn encode(&self, scene: &Scene<'_>) -> Result<Vec<u8>, KittiError> {
        let mut bytes = Vec::with_capacity(scene.as_slice().len() * KITTI_VALUE_SIZE);
        self.encode_into(scene, &mut bytes)?;
        Ok(bytes)
    }
}

/// Encodes scenes as KITTI velodyne binaries.
///
/// Each point becomes one record of little-endian `f32` values: `x, y, z`, then the
/// remaining attributes in the order the source declared them. Records are packed back to
/// back with no header, so the point count is `len / (4 * num_fields)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KittiEncoder {
    required_features: Vec<String>,
}

impl Default for KittiEncoder {
    fn default() -> Self {
        Self::pointpillars()
    }
}

impl KittiEncoder {
    /// Create an encoder requiring the given features.
    pub fn new<I, S>(required_features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_features: required_features.into_iter().map(Into::into).collect(),
        }
    }

    /// The encoder for PointPillars: requires `x, y, z, intensity`.
    pub fn pointpillars() -> Self {
        Self::new(POINTPILLARS_FEATURES)
    }

    /// The features a schema must provide.
    pub fn required_features(&self) -> &[String] {
        &self.required_features
    }
}

impl SceneEncoder for KittiEncoder {
    fn validate(&self, schema: &PointSchema) -> Result<(), KittiError> {
        match self
            .required_features
            .iter()
            .find(|feature| !schema.contains(feature))
        {
            Some(missing) => Err(KittiError::MissingFeature(missing.clone())),
            None => Ok(()),
        }
    }

    fn encode_into(&self, scene: &Scene<'_>, writer: &mut dyn Write) -> Result<(), KittiError> {
        self.validate(scene.schema())?;

        let mut writer = BufWriter::new(writer);
        for value in scene.as_slice() {
            writer.write_all(&(*value as f32).to_le_bytes())?;
        }
        writer.flush()?;

        Ok(())
    }
}

/// Decode KITTI bytes into a flat `f32` buffer of `num_fields` values per point.
pub fn decode_kitti(bytes: &[u8], num_fields: usize) -> Result<Vec<f32>, KittiError> {
    let record_size = num_fields * KITTI_VALUE_SIZE;
    if record_size == 0 || bytes.len() % record_size != 0 {
        return Err(KittiError::InvalidLength {
            len: bytes.len(),
            record_size,
        });
    }

    Ok(bytes
        .chunks_exact(KITTI_VALUE_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Read a KITTI `.bin` artifact. See [`decode_kitti`].
pub fn read_kitti_bin(path: impl AsRef<Path>, num_fields: usize) -> Result<Vec<f32>, KittiError> {
    let bytes = std::fs::read(path)?;
    decode_kitti(&bytes, num_fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::PointCloud;
    use crate::scene::partition;
    use approx::assert_relative_eq;

    fn cloud(attributes: &[&str], data: Vec<f64>) -> PointCloud {
        let schema = PointSchema::new(attributes.iter().copied()).unwrap();
        PointCloud::from_flat(schema, data).unwrap()
    }

    #[test]
    fn test_encode_layout() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = cloud(&["intensity"], vec![1.0, 2.0, 3.0, 0.5, -4.0, 5.5, 0.0, 1.0]);
        let scenes = partition(&cloud, 10)?;
        let bytes = KittiEncoder::pointpillars().encode(&scenes[0])?;

        assert_eq!(bytes.len(), 2 * 4 * KITTI_VALUE_SIZE);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &(-4.0f32).to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_extra_attributes_keep_declared_order() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = cloud(&["intensity", "ring"], vec![0.1, 0.2, 0.3, 0.9, 12.0]);
        let scenes = partition(&cloud, 1)?;
        let bytes = KittiEncoder::pointpillars().encode(&scenes[0])?;
        let values = decode_kitti(&bytes, 5)?;

        assert_relative_eq!(values[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(values[3], 0.9, epsilon = 1e-6);
        assert_relative_eq!(values[4], 12.0);
        Ok(())
    }

    #[test]
    fn test_encode_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let data = (0..400).map(|i| i as f64 * 0.37).collect();
        let cloud = cloud(&["intensity"], data);
        let scenes = partition(&cloud, 30)?;
        let encoder = KittiEncoder::default();
        for scene in &scenes {
            assert_eq!(encoder.encode(scene)?, encoder.encode(scene)?);
        }
        Ok(())
    }

    #[test]
    fn test_missing_feature() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = cloud(&["reflectance"], vec![0.0, 0.0, 0.0, 1.0]);
        let scenes = partition(&cloud, 1)?;
        let encoder = KittiEncoder::pointpillars();

        let err = encoder.validate(cloud.schema()).unwrap_err();
        assert!(matches!(err, KittiError::MissingFeature(ref f) if f == "intensity"));

        let mut sink = Vec::new();
        assert!(encoder.encode_into(&scenes[0], &mut sink).is_err());
        assert!(sink.is_empty());
        Ok(())
    }

    #[test]
    fn test_custom_feature_list() {
        let encoder = KittiEncoder::new(["x", "y", "z"]);
        assert!(encoder.validate(&PointSchema::xyz()).is_ok());
        assert_eq!(encoder.required_features().len(), 3);
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        assert!(matches!(
            decode_kitti(&[0u8; 20], 4),
            Err(KittiError::InvalidLength {
                len: 20,
                record_size: 16
            })
        ));
        assert!(decode_kitti(&[], 0).is_err());
    }
}
