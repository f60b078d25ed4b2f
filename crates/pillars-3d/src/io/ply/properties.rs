/// Encoding of the PLY body.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyEncoding {
    /// Whitespace separated text, one record per line.
    Ascii,
    /// Packed little-endian binary records.
    BinaryLittleEndian,
    /// Packed big-endian binary records.
    BinaryBigEndian,
}

impl PlyEncoding {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }
}

/// Scalar types allowed in a PLY property declaration.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyDataType {
    /// `float` / `float32`
    Float32,
    /// `double` / `float64`
    Float64,
    /// `char` / `int8`
    Int8,
    /// `uchar` / `uint8`
    UInt8,
    /// `short` / `int16`
    Int16,
    /// `ushort` / `uint16`
    UInt16,
    /// `int` / `int32`
    Int32,
    /// `uint` / `uint32`
    UInt32,
}

// Decode a fixed-size scalar from a slice of exactly its width.
macro_rules! decode_as {
    ($ty:ty, $bytes:expr, $big_endian:expr) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        buf.copy_from_slice($bytes);
        if $big_endian {
            <$ty>::from_be_bytes(buf)
        } else {
            <$ty>::from_le_bytes(buf)
        }
    }};
}

impl PlyDataType {
    /// Parse a type name as it appears in a `property` line.
    pub fn parse(type_str: &str) -> Option<Self> {
        match type_str {
            "float" | "float32" => Some(PlyDataType::Float32),
            "double" | "float64" => Some(PlyDataType::Float64),
            "char" | "int8" => Some(PlyDataType::Int8),
            "uchar" | "uint8" => Some(PlyDataType::UInt8),
            "short" | "int16" => Some(PlyDataType::Int16),
            "ushort" | "uint16" => Some(PlyDataType::UInt16),
            "int" | "int32" => Some(PlyDataType::Int32),
            "uint" | "uint32" => Some(PlyDataType::UInt32),
            _ => None,
        }
    }

    /// Size in bytes of one binary value.
    pub fn size(&self) -> usize {
        match self {
            PlyDataType::Float32 | PlyDataType::Int32 | PlyDataType::UInt32 => 4,
            PlyDataType::Float64 => 8,
            PlyDataType::Int16 | PlyDataType::UInt16 => 2,
            PlyDataType::Int8 | PlyDataType::UInt8 => 1,
        }
    }

    /// Whether the type is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, PlyDataType::Float32 | PlyDataType::Float64)
    }

    /// Decode one binary value, widened to `f64`.
    ///
    /// `bytes` must be exactly [`PlyDataType::size`] long.
    pub(crate) fn decode(&self, bytes: &[u8], big_endian: bool) -> f64 {
        match self {
            PlyDataType::Float32 => decode_as!(f32, bytes, big_endian) as f64,
            PlyDataType::Float64 => decode_as!(f64, bytes, big_endian),
            PlyDataType::Int8 => bytes[0] as i8 as f64,
            PlyDataType::UInt8 => bytes[0] as f64,
            PlyDataType::Int16 => decode_as!(i16, bytes, big_endian) as f64,
            PlyDataType::UInt16 => decode_as!(u16, bytes, big_endian) as f64,
            PlyDataType::Int32 => decode_as!(i32, bytes, big_endian) as f64,
            PlyDataType::UInt32 => decode_as!(u32, bytes, big_endian) as f64,
        }
    }

    /// Parse one ASCII token, widened to `f64`.
    ///
    /// Integer types only accept integer literals within range.
    pub(crate) fn parse_token(&self, token: &str) -> Option<f64> {
        match self {
            PlyDataType::Float32 | PlyDataType::Float64 => token.parse::<f64>().ok(),
            PlyDataType::Int8 => token.parse::<i8>().ok().map(f64::from),
            PlyDataType::UInt8 => token.parse::<u8>().ok().map(f64::from),
            PlyDataType::Int16 => token.parse::<i16>().ok().map(f64::from),
            PlyDataType::UInt16 => token.parse::<u16>().ok().map(f64::from),
            PlyDataType::Int32 => token.parse::<i32>().ok().map(f64::from),
            PlyDataType::UInt32 => token.parse::<u32>().ok().map(f64::from),
        }
    }
}

/// Shape of a declared property.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyPropertyKind {
    /// A single value.
    Scalar(PlyDataType),
    /// A length-prefixed list of values.
    List {
        /// Type of the length prefix.
        count: PlyDataType,
        /// Type of each item.
        item: PlyDataType,
    },
}

/// A `property` line of the header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PlyPropertyDefinition {
    /// Property name.
    pub name: String,
    /// Scalar or list shape.
    pub kind: PlyPropertyKind,
}

/// An `element` line of the header together with its properties.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PlyElement {
    /// Element name, e.g. `vertex` or `face`.
    pub name: String,
    /// Declared number of records.
    pub count: usize,
    /// Properties in declaration order.
    pub properties: Vec<PlyPropertyDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parsing() {
        assert_eq!(PlyDataType::parse("float"), Some(PlyDataType::Float32));
        assert_eq!(PlyDataType::parse("uchar"), Some(PlyDataType::UInt8));
        assert_eq!(PlyDataType::parse("double"), Some(PlyDataType::Float64));
        assert_eq!(PlyDataType::parse("int64"), None);
    }

    #[test]
    fn test_decode_endianness() {
        let le = 1.5f32.to_le_bytes();
        let be = 1.5f32.to_be_bytes();
        assert_eq!(PlyDataType::Float32.decode(&le, false), 1.5);
        assert_eq!(PlyDataType::Float32.decode(&be, true), 1.5);
        assert_eq!(PlyDataType::Int16.decode(&(-300i16).to_be_bytes(), true), -300.0);
        assert_eq!(PlyDataType::Int8.decode(&[0xff], false), -1.0);
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(PlyDataType::Float32.parse_token("-0.25"), Some(-0.25));
        assert_eq!(PlyDataType::UInt8.parse_token("255"), Some(255.0));
        assert_eq!(PlyDataType::UInt8.parse_token("256"), None);
        assert_eq!(PlyDataType::Int32.parse_token("1.5"), None);
    }
}
