mod parser;
mod properties;

pub use parser::*;
pub use properties::*;

use crate::pointcloud::PointCloudError;

/// Error types for the PLY module.
#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    /// Failed to read PLY file
    #[error("Failed to read PLY file: {0}")]
    Io(#[from] std::io::Error),

    /// The header could not be parsed.
    #[error("Malformed PLY header at line {line}: {reason}")]
    MalformedHeader {
        /// 1-based header line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The header declares no `vertex` element.
    #[error("PLY header declares no vertex element")]
    MissingVertexElement,

    /// A spatial coordinate property is not declared on `vertex`.
    #[error("PLY vertex element has no `{0}` property")]
    MissingCoordinate(&'static str),

    /// The per-point schema is inconsistent.
    #[error("Inconsistent PLY vertex schema: {0}")]
    InconsistentSchema(String),

    /// An ASCII value could not be parsed as its declared type.
    #[error("Invalid value `{token}` in vertex record {record}")]
    InvalidValue {
        /// 0-based vertex record index.
        record: usize,
        /// The offending token.
        token: String,
    },

    /// The body ended before all declared vertices were read.
    #[error("PLY file is truncated: {declared} vertices declared, {parsed} present")]
    Truncated {
        /// Vertex count from the header.
        declared: usize,
        /// Complete vertex records found.
        parsed: usize,
    },

    /// The body holds data past the declared vertices.
    #[error("PLY file holds more data than the {declared} vertices declared")]
    TrailingData {
        /// Vertex count from the header.
        declared: usize,
    },
}

impl From<PointCloudError> for PlyError {
    fn from(err: PointCloudError) -> Self {
        PlyError::InconsistentSchema(err.to_string())
    }
}
