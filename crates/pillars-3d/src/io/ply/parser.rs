use std::io::{BufRead, Read};
use std::path::Path;

use super::{
    properties::{PlyDataType, PlyElement, PlyEncoding, PlyPropertyDefinition, PlyPropertyKind},
    PlyError,
};
use crate::pointcloud::{PointCloud, PointSchema, SPATIAL_FIELDS};

// The declared count is untrusted, so up-front allocation is capped in bytes.
const MAX_PREALLOCATED_BYTES: usize = 64 * 1024 * 1024;

/// The parsed header of a PLY file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    /// Encoding of the body.
    pub encoding: PlyEncoding,
    /// Elements in declaration order.
    pub elements: Vec<PlyElement>,
}

impl PlyHeader {
    /// The `vertex` element, if declared.
    pub fn vertex(&self) -> Option<&PlyElement> {
        self.elements.iter().find(|e| e.name == "vertex")
    }
}

/// Vertex record layout resolved against the canonical `x, y, z, attrs…` order.
struct VertexLayout {
    count: usize,
    // declared property types, in file order
    types: Vec<PlyDataType>,
    // canonical field index of each declared property
    targets: Vec<usize>,
    schema: PointSchema,
}

impl VertexLayout {
    fn new(element: &PlyElement) -> Result<Self, PlyError> {
        let mut names: Vec<&str> = Vec::with_capacity(element.properties.len());
        let mut types = Vec::with_capacity(element.properties.len());

        for property in &element.properties {
            let PlyPropertyKind::Scalar(data_type) = property.kind else {
                return Err(PlyError::InconsistentSchema(format!(
                    "list property `{}` on vertex element",
                    property.name
                )));
            };
            if names.contains(&property.name.as_str()) {
                return Err(PlyError::InconsistentSchema(format!(
                    "property `{}` declared twice",
                    property.name
                )));
            }
            names.push(&property.name);
            types.push(data_type);
        }

        let mut coordinate_types = Vec::with_capacity(SPATIAL_FIELDS.len());
        for coordinate in SPATIAL_FIELDS {
            let index = names
                .iter()
                .position(|name| *name == coordinate)
                .ok_or(PlyError::MissingCoordinate(coordinate))?;
            coordinate_types.push(types[index]);
        }
        if coordinate_types.iter().any(|t| *t != coordinate_types[0]) {
            return Err(PlyError::InconsistentSchema(
                "x, y and z are declared with different types".to_string(),
            ));
        }

        let schema = PointSchema::new(
            names
                .iter()
                .copied()
                .filter(|name| !SPATIAL_FIELDS.contains(name)),
        )?;
        let targets = names
            .iter()
            .map(|name| schema.field_index(name))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PlyError::InconsistentSchema("unresolved property".to_string()))?;

        Ok(Self {
            count: element.count,
            types,
            targets,
            schema,
        })
    }

    fn record_size(&self) -> usize {
        self.types.iter().map(|t| t.size()).sum()
    }

    fn empty_cloud(&self) -> PointCloud {
        let point_size = self.schema.num_fields() * std::mem::size_of::<f64>();
        let capacity = (MAX_PREALLOCATED_BYTES / point_size).min(self.count);
        PointCloud::with_capacity(self.schema.clone(), capacity)
    }
}

/// Parse the header of a PLY file, leaving the reader at the first body byte.
pub fn parse_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader, PlyError> {
    let mut line = String::new();
    let mut line_no = 0;
    let mut encoding = None;
    let mut elements: Vec<PlyElement> = Vec::new();

    let malformed = |line: usize, reason: String| PlyError::MalformedHeader { line, reason };

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(malformed(line_no, "missing end_header".to_string()));
        }
        line_no += 1;
        let trimmed = line.trim();

        if line_no == 1 {
            if trimmed != "ply" {
                return Err(malformed(1, "missing `ply` magic".to_string()));
            }
            continue;
        }

        let mut tokens = trimmed.split_whitespace();
        match tokens.next() {
            Some("end_header") => break,
            Some("comment") | Some("obj_info") | None => {}
            Some("format") => {
                let name = tokens.next().unwrap_or_default();
                let parsed = PlyEncoding::parse(name)
                    .ok_or_else(|| malformed(line_no, format!("unsupported format `{name}`")))?;
                encoding = Some(parsed);
            }
            Some("element") => {
                let (Some(name), Some(count)) = (tokens.next(), tokens.next()) else {
                    return Err(malformed(
                        line_no,
                        "expected `element <name> <count>`".to_string(),
                    ));
                };
                let count = count
                    .parse::<usize>()
                    .map_err(|_| malformed(line_no, format!("invalid element count `{count}`")))?;
                elements.push(PlyElement {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Some("property") => {
                let property = parse_property(tokens).map_err(|reason| malformed(line_no, reason))?;
                let element = elements.last_mut().ok_or_else(|| {
                    malformed(line_no, "property declared before any element".to_string())
                })?;
                element.properties.push(property);
            }
            Some(keyword) => {
                return Err(malformed(line_no, format!("unknown keyword `{keyword}`")));
            }
        }
    }

    let encoding = encoding.ok_or_else(|| malformed(line_no, "missing format line".to_string()))?;

    Ok(PlyHeader { encoding, elements })
}

fn parse_data_type(token: Option<&str>) -> Result<PlyDataType, String> {
    let token = token.ok_or_else(|| "incomplete property declaration".to_string())?;
    PlyDataType::parse(token).ok_or_else(|| format!("unsupported property type `{token}`"))
}

fn parse_property<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<PlyPropertyDefinition, String> {
    let first = tokens.next();
    let kind = if first == Some("list") {
        let count = parse_data_type(tokens.next())?;
        let item = parse_data_type(tokens.next())?;
        if count.is_float() {
            return Err("list length type must be an integer".to_string());
        }
        PlyPropertyKind::List { count, item }
    } else {
        PlyPropertyKind::Scalar(parse_data_type(first)?)
    };
    let name = tokens
        .next()
        .ok_or_else(|| "property has no name".to_string())?;

    Ok(PlyPropertyDefinition {
        name: name.to_string(),
        kind,
    })
}

/// Read a PLY point cloud from disk.
///
/// The `vertex` element supplies the points; its properties become the point schema with
/// `x, y, z` moved to the front. ASCII, little-endian and big-endian bodies are supported.
///
/// # Arguments
///
/// * `path` - The path to the PLY file.
///
/// # Errors
///
/// * [`PlyError::MalformedHeader`] / [`PlyError::MissingVertexElement`] when the header is unusable.
/// * [`PlyError::MissingCoordinate`] / [`PlyError::InconsistentSchema`] for schema problems.
/// * [`PlyError::Truncated`] / [`PlyError::TrailingData`] when the body does not hold exactly
///   the declared number of vertices.
pub fn read_ply(path: impl AsRef<Path>) -> Result<PointCloud, PlyError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    read_ply_from_reader(reader)
}

/// Read a PLY point cloud from any buffered source. See [`read_ply`].
pub fn read_ply_from_reader<R: BufRead>(mut reader: R) -> Result<PointCloud, PlyError> {
    let header = parse_header(&mut reader)?;
    let vertex_pos = header
        .elements
        .iter()
        .position(|e| e.name == "vertex")
        .ok_or(PlyError::MissingVertexElement)?;
    let layout = VertexLayout::new(&header.elements[vertex_pos])?;

    for element in &header.elements[..vertex_pos] {
        skip_element(&mut reader, element, header.encoding)
            .map_err(|e| truncation_or_io(e, layout.count, 0))?;
    }

    let cloud = match header.encoding {
        PlyEncoding::Ascii => read_vertices_ascii(&mut reader, &layout)?,
        PlyEncoding::BinaryLittleEndian => read_vertices_binary(&mut reader, &layout, false)?,
        PlyEncoding::BinaryBigEndian => read_vertices_binary(&mut reader, &layout, true)?,
    };

    // trailing bytes are only decidable when nothing is declared after the vertices
    if vertex_pos + 1 == header.elements.len() {
        ensure_consumed(&mut reader, header.encoding, layout.count)?;
    }

    Ok(cloud)
}

fn truncation_or_io(err: std::io::Error, declared: usize, parsed: usize) -> PlyError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        PlyError::Truncated { declared, parsed }
    } else {
        PlyError::Io(err)
    }
}

fn read_vertices_binary<R: Read>(
    reader: &mut R,
    layout: &VertexLayout,
    big_endian: bool,
) -> Result<PointCloud, PlyError> {
    let mut cloud = layout.empty_cloud();
    let mut buffer = vec![0u8; layout.record_size()];
    let mut record = vec![0.0; layout.types.len()];

    for parsed in 0..layout.count {
        reader
            .read_exact(&mut buffer)
            .map_err(|e| truncation_or_io(e, layout.count, parsed))?;

        let mut offset = 0;
        for (data_type, target) in layout.types.iter().zip(&layout.targets) {
            let size = data_type.size();
            record[*target] = data_type.decode(&buffer[offset..offset + size], big_endian);
            offset += size;
        }
        cloud.push(&record)?;
    }

    Ok(cloud)
}

fn read_vertices_ascii<R: BufRead>(
    reader: &mut R,
    layout: &VertexLayout,
) -> Result<PointCloud, PlyError> {
    let width = layout.types.len();
    let mut cloud = layout.empty_cloud();
    let mut record = vec![0.0; width];
    let mut line = String::new();

    for parsed in 0..layout.count {
        if !next_data_line(reader, &mut line)? {
            return Err(PlyError::Truncated {
                declared: layout.count,
                parsed,
            });
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != width {
            return Err(PlyError::InconsistentSchema(format!(
                "vertex record {parsed} has {} values, expected {width}",
                tokens.len()
            )));
        }

        for ((data_type, target), token) in layout.types.iter().zip(&layout.targets).zip(tokens) {
            record[*target] =
                data_type
                    .parse_token(token)
                    .ok_or_else(|| PlyError::InvalidValue {
                        record: parsed,
                        token: token.to_string(),
                    })?;
        }
        cloud.push(&record)?;
    }

    Ok(cloud)
}

/// Read the next non-blank line into `line`. Returns `false` at end of input.
fn next_data_line<R: BufRead>(reader: &mut R, line: &mut String) -> std::io::Result<bool> {
    loop {
        line.clear();
        if reader.read_line(line)? == 0 {
            return Ok(false);
        }
        if !line.trim().is_empty() {
            return Ok(true);
        }
    }
}

fn skip_bytes<R: Read>(reader: &mut R, len: u64) -> std::io::Result<()> {
    let copied = std::io::copy(&mut reader.by_ref().take(len), &mut std::io::sink())?;
    if copied < len {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn skip_element<R: BufRead>(
    reader: &mut R,
    element: &PlyElement,
    encoding: PlyEncoding,
) -> std::io::Result<()> {
    let big_endian = match encoding {
        PlyEncoding::Ascii => {
            let mut line = String::new();
            for _ in 0..element.count {
                if !next_data_line(reader, &mut line)? {
                    return Err(std::io::ErrorKind::UnexpectedEof.into());
                }
            }
            return Ok(());
        }
        PlyEncoding::BinaryLittleEndian => false,
        PlyEncoding::BinaryBigEndian => true,
    };

    let mut len_buf = [0u8; 8];
    for _ in 0..element.count {
        for property in &element.properties {
            match property.kind {
                PlyPropertyKind::Scalar(data_type) => {
                    skip_bytes(reader, data_type.size() as u64)?;
                }
                PlyPropertyKind::List { count, item } => {
                    let len_bytes = &mut len_buf[..count.size()];
                    reader.read_exact(len_bytes)?;
                    let len = count.decode(len_bytes, big_endian);
                    if len < 0.0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("negative list length in `{}`", property.name),
                        ));
                    }
                    skip_bytes(reader, len as u64 * item.size() as u64)?;
                }
            }
        }
    }

    Ok(())
}

fn ensure_consumed<R: BufRead>(
    reader: &mut R,
    encoding: PlyEncoding,
    declared: usize,
) -> Result<(), PlyError> {
    let has_more = match encoding {
        PlyEncoding::Ascii => next_data_line(reader, &mut String::new())?,
        PlyEncoding::BinaryLittleEndian | PlyEncoding::BinaryBigEndian => {
            !reader.fill_buf()?.is_empty()
        }
    };
    if has_more {
        return Err(PlyError::TrailingData { declared });
    }
    Ok(())
}
