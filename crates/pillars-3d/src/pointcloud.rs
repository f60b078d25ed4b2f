use serde::Serialize;

/// Names of the spatial coordinates, always the first three fields of a point.
pub const SPATIAL_FIELDS: [&str; 3] = ["x", "y", "z"];

/// Error types for the point cloud module.
#[derive(Debug, thiserror::Error)]
pub enum PointCloudError {
    /// The same attribute name appears twice in a schema.
    #[error("Duplicate attribute in point schema: {0}")]
    DuplicateAttribute(String),

    /// A record does not have one value per schema field.
    #[error("Point record has {got} values, the schema expects {expected}")]
    SchemaMismatch {
        /// Number of fields in the schema.
        expected: usize,
        /// Number of values in the record.
        got: usize,
    },
}

/// The ordered per-point attribute schema of a point cloud.
///
/// The spatial coordinates are implicit: every point starts with `x, y, z`, followed by
/// the attributes in the order they were declared by the source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PointSchema {
    attributes: Vec<String>,
}

impl PointSchema {
    /// Create a schema from the attribute names that follow `x, y, z`.
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::DuplicateAttribute`] if a name repeats or shadows a
    /// spatial coordinate.
    pub fn new<I, S>(attributes: I) -> Result<Self, PointCloudError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in attributes {
            let name = name.into();
            if SPATIAL_FIELDS.contains(&name.as_str()) || names.contains(&name) {
                return Err(PointCloudError::DuplicateAttribute(name));
            }
            names.push(name);
        }
        Ok(Self { attributes: names })
    }

    /// A schema with the spatial coordinates only.
    pub fn xyz() -> Self {
        Self::default()
    }

    /// The attribute names, excluding the spatial coordinates.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Number of values per point, spatial coordinates included.
    #[inline]
    pub fn num_fields(&self) -> usize {
        SPATIAL_FIELDS.len() + self.attributes.len()
    }

    /// All field names in record order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        SPATIAL_FIELDS
            .iter()
            .copied()
            .chain(self.attributes.iter().map(String::as_str))
    }

    /// Position of a field within a point record.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_names().position(|field| field == name)
    }

    /// Whether the schema has a field with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.field_index(name).is_some()
    }
}

/// A borrowed view of one point record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point<'a> {
    values: &'a [f64],
}

impl<'a> Point<'a> {
    /// The x coordinate.
    #[inline]
    pub fn x(&self) -> f64 {
        self.values[0]
    }

    /// The y coordinate.
    #[inline]
    pub fn y(&self) -> f64 {
        self.values[1]
    }

    /// The z coordinate.
    #[inline]
    pub fn z(&self) -> f64 {
        self.values[2]
    }

    /// The spatial coordinates as an array.
    pub fn position(&self) -> [f64; 3] {
        [self.x(), self.y(), self.z()]
    }

    /// The attribute values, in schema order.
    pub fn attributes(&self) -> &'a [f64] {
        &self.values[SPATIAL_FIELDS.len()..]
    }

    /// Every value of the record, spatial coordinates first.
    pub fn values(&self) -> &'a [f64] {
        self.values
    }
}

/// An ordered point cloud whose points share one attribute schema.
///
/// Points are stored row-major in a single buffer, `schema.num_fields()` values per point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    // The per-point field layout.
    schema: PointSchema,
    // The point records, back to back.
    data: Vec<f64>,
}

impl PointCloud {
    /// Create an empty point cloud with the given schema.
    pub fn new(schema: PointSchema) -> Self {
        Self::with_capacity(schema, 0)
    }

    /// Create an empty point cloud with room for `capacity` points.
    ///
    /// A capacity whose buffer size overflows `usize` reserves nothing.
    pub fn with_capacity(schema: PointSchema, capacity: usize) -> Self {
        let data = Vec::with_capacity(capacity.checked_mul(schema.num_fields()).unwrap_or(0));
        Self { schema, data }
    }

    /// Create a point cloud from a row-major buffer of point records.
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::SchemaMismatch`] if the buffer does not hold a whole
    /// number of records.
    pub fn from_flat(schema: PointSchema, data: Vec<f64>) -> Result<Self, PointCloudError> {
        let width = schema.num_fields();
        if data.len() % width != 0 {
            return Err(PointCloudError::SchemaMismatch {
                expected: width,
                got: data.len() % width,
            });
        }
        Ok(Self { schema, data })
    }

    /// Append one point record.
    ///
    /// # Errors
    ///
    /// Returns [`PointCloudError::SchemaMismatch`] if the record width differs from the schema.
    pub fn push(&mut self, record: &[f64]) -> Result<(), PointCloudError> {
        let expected = self.schema.num_fields();
        if record.len() != expected {
            return Err(PointCloudError::SchemaMismatch {
                expected,
                got: record.len(),
            });
        }
        self.data.extend_from_slice(record);
        Ok(())
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.schema.num_fields()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The attribute schema shared by every point.
    pub fn schema(&self) -> &PointSchema {
        &self.schema
    }

    /// The raw row-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Get the point at `index`.
    pub fn point(&self, index: usize) -> Option<Point<'_>> {
        let width = self.schema.num_fields();
        let start = index.checked_mul(width)?;
        self.data
            .get(start..start.checked_add(width)?)
            .map(|values| Point { values })
    }

    /// Iterate over the points in order.
    pub fn points(&self) -> impl ExactSizeIterator<Item = Point<'_>> + '_ {
        self.data
            .chunks_exact(self.schema.num_fields())
            .map(|values| Point { values })
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> [f64; 3] {
        self.fold_positions(f64::min)
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> [f64; 3] {
        self.fold_positions(f64::max)
    }

    fn fold_positions(&self, f: impl Fn(f64, f64) -> f64) -> [f64; 3] {
        let mut points = self.points();
        let Some(first) = points.next() else {
            return [0.0; 3];
        };
        points.fold(first.position(), |acc, p| {
            let pos = p.position();
            [f(acc[0], pos[0]), f(acc[1], pos[1]), f(acc[2], pos[2])]
        })
    }
}

/// Iterate over a row-major buffer as points.
pub(crate) fn points_of<'a>(
    data: &'a [f64],
    schema: &PointSchema,
) -> impl ExactSizeIterator<Item = Point<'a>> + 'a {
    data.chunks_exact(schema.num_fields())
        .map(|values| Point { values })
}
