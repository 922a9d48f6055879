//! Reader for NumPy `.npy` array files.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use ndarray::{Array, ArrayD, Dimension, IxDyn, ShapeBuilder};

use crate::error::{ImagingError, Result};

pub(crate) const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Magic, two version bytes and the shortest (v1) length field.
const NPY_PREAMBLE_SIZE: usize = 10;

/// Element type of an array file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    fn parse(kind: char, size: &str) -> Option<Self> {
        let dtype = match (kind, size) {
            ('b', "1") => Self::Bool,
            ('u', "1") => Self::U8,
            ('u', "2") => Self::U16,
            ('u', "4") => Self::U32,
            ('u', "8") => Self::U64,
            ('i', "1") => Self::I8,
            ('i', "2") => Self::I16,
            ('i', "4") => Self::I32,
            ('i', "8") => Self::I64,
            ('f', "4") => Self::F32,
            ('f', "8") => Self::F64,
            _ => return None,
        };
        Some(dtype)
    }
}

/// Parsed `.npy` header.
#[derive(Clone, Debug)]
pub struct NpyHeader {
    pub dtype: DType,
    pub little_endian: bool,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Byte offset of the first element.
    pub data_offset: usize,
    /// Element bytes following `data_offset`; checked against overflow when
    /// the header is parsed.
    data_len: usize,
}

impl NpyHeader {
    pub fn element_count(&self) -> usize {
        self.data_len / self.dtype.size()
    }

    pub fn data_byte_size(&self) -> usize {
        self.data_len
    }

    /// One past the last data byte.
    pub fn data_end(&self) -> usize {
        self.data_offset + self.data_len
    }
}

/// One decoded element, before conversion to the caller's type.
#[derive(Clone, Copy, Debug)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// Types arrays can be decoded into and encoded from.
pub trait NpyElement: Copy + Send + Sync + 'static {
    /// Little-endian type descriptor written by the encoder.
    const DESCR: &'static str;

    fn from_scalar(value: Scalar) -> Option<Self>;

    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! numeric_element {
    ($ty:ty, $descr:literal, $write:expr) => {
        impl NpyElement for $ty {
            const DESCR: &'static str = $descr;

            fn from_scalar(value: Scalar) -> Option<Self> {
                match value {
                    Scalar::Bool(b) => Some(if b { 1 as $ty } else { 0 as $ty }),
                    Scalar::Int(v) => <$ty as num_traits::NumCast>::from(v),
                    Scalar::UInt(v) => <$ty as num_traits::NumCast>::from(v),
                    Scalar::Float(v) => <$ty as num_traits::NumCast>::from(v),
                }
            }

            fn write_le(self, out: &mut Vec<u8>) {
                let write: fn(&mut Vec<u8>, $ty) = $write;
                write(out, self);
            }
        }
    };
}

numeric_element!(u8, "|u1", |out, v| out.push(v));
numeric_element!(u16, "<u2", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(u32, "<u4", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(u64, "<u8", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(i32, "<i4", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(i64, "<i8", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(f32, "<f4", |out, v| out.extend_from_slice(&v.to_le_bytes()));
numeric_element!(f64, "<f8", |out, v| out.extend_from_slice(&v.to_le_bytes()));

impl NpyElement for bool {
    const DESCR: &'static str = "|b1";

    fn from_scalar(value: Scalar) -> Option<Self> {
        Some(match value {
            Scalar::Bool(b) => b,
            Scalar::Int(v) => v != 0,
            Scalar::UInt(v) => v != 0,
            Scalar::Float(v) => v != 0.0,
        })
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(<u8 as From<bool>>::from(self));
    }
}

/// Memory-mapped `.npy` file.
pub struct NpyFile {
    mmap: Mmap,
    pub header: NpyHeader,
}

impl NpyFile {
    /// Open an array file and parse its header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() < NPY_PREAMBLE_SIZE as u64 {
            return Err(ImagingError::InvalidArray(format!(
                "{}: file too small for an array header",
                path.display()
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let header = parse_header(&mmap)
            .map_err(|e| ImagingError::InvalidArray(format!("{}: {e}", path.display())))?;
        if mmap.len() < header.data_end() {
            return Err(ImagingError::InvalidArray(format!(
                "{}: truncated, expected {} data bytes after offset {}, got {}",
                path.display(),
                header.data_byte_size(),
                header.data_offset,
                mmap.len().saturating_sub(header.data_offset)
            )));
        }
        Ok(Self { mmap, header })
    }

    pub fn shape(&self) -> &[usize] {
        &self.header.shape
    }

    /// Raw element bytes (zero-copy from the mmap).
    pub fn data_raw(&self) -> &[u8] {
        let start = self.header.data_offset;
        &self.mmap[start..self.header.data_end()]
    }

    pub fn to_array<T: NpyElement>(&self) -> Result<ArrayD<T>> {
        decode_data(&self.header, self.data_raw())
    }
}

/// Decode an in-memory `.npy` image, such as an archive member.
pub fn decode_npy<T: NpyElement>(bytes: &[u8]) -> Result<ArrayD<T>> {
    let header = parse_header(bytes).map_err(ImagingError::InvalidArray)?;
    let end = header.data_end();
    if bytes.len() < end {
        return Err(ImagingError::InvalidArray(format!(
            "truncated array: need {end} bytes, got {}",
            bytes.len()
        )));
    }
    decode_data(&header, &bytes[header.data_offset..end])
}

/// Read a `.npy` file with a fixed dimensionality.
pub fn read_npy<T: NpyElement, D: Dimension>(path: &Path) -> Result<Array<T, D>> {
    let array = NpyFile::open(path)?.to_array::<T>()?;
    into_dim(array).map_err(|shape| {
        ImagingError::ShapeMismatch(format!(
            "{}: expected {} dimension(s), found shape {:?}",
            path.display(),
            D::NDIM.map_or_else(|| "any".to_string(), |n| n.to_string()),
            shape
        ))
    })
}

/// Fix the dimensionality of a dynamic array, returning its shape on failure.
pub fn into_dim<T, D: Dimension>(array: ArrayD<T>) -> std::result::Result<Array<T, D>, Vec<usize>> {
    let shape = array.shape().to_vec();
    array.into_dimensionality::<D>().map_err(|_| shape)
}

fn parse_header(buf: &[u8]) -> std::result::Result<NpyHeader, String> {
    if buf.len() < NPY_PREAMBLE_SIZE || &buf[..6] != NPY_MAGIC {
        return Err("missing \\x93NUMPY magic".into());
    }

    let major = buf[6];
    let mut cursor = Cursor::new(&buf[8..]);
    let (header_len, len_field) = match major {
        1 => (cursor.read_u16::<LittleEndian>().map_err(|e| e.to_string())? as usize, 2),
        2 | 3 => (cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize, 4),
        other => return Err(format!("unsupported format version {other}")),
    };

    let data_offset = 8 + len_field + header_len;
    if buf.len() < data_offset {
        return Err("header extends past end of data".into());
    }
    let text = std::str::from_utf8(&buf[8 + len_field..data_offset])
        .map_err(|_| "header is not valid text".to_string())?;

    let descr = dict_value(text, "descr").ok_or("header lacks 'descr'")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    let (little_endian, dtype) = parse_descr(descr)?;

    let fortran_order = match dict_value(text, "fortran_order") {
        Some("True") => true,
        Some("False") => false,
        _ => return Err("header lacks 'fortran_order'".into()),
    };

    let shape = parse_shape(dict_value(text, "shape").ok_or("header lacks 'shape'")?)?;
    let data_len = byte_len(&shape, dtype)
        .filter(|len| data_offset.checked_add(*len).is_some())
        .ok_or_else(|| format!("shape {shape:?} is too large to address"))?;

    Ok(NpyHeader {
        dtype,
        little_endian,
        fortran_order,
        shape,
        data_offset,
        data_len,
    })
}

/// Total element bytes, or `None` when the product overflows.
fn byte_len(shape: &[usize], dtype: DType) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &dim| acc.checked_mul(dim))
}

/// Raw text of a value in the header's Python dict literal.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text
        .find(&format!("'{key}'"))
        .or_else(|| text.find(&format!("\"{key}\"")))?;
    let rest = &text[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else if let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') {
        rest[1..].find(quote)? + 2
    } else {
        rest.find([',', '}']).unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

fn parse_descr(descr: &str) -> std::result::Result<(bool, DType), String> {
    let mut chars = descr.chars();
    let (little_endian, kind) = match chars.next() {
        Some('<') | Some('|') | Some('=') => (true, chars.next()),
        Some('>') => (false, chars.next()),
        first => (true, first),
    };
    let kind = kind.ok_or_else(|| format!("empty dtype descriptor '{descr}'"))?;
    if kind == 'O' {
        return Err("object arrays are not supported".into());
    }
    let size = chars.as_str();
    DType::parse(kind, size)
        .map(|dtype| (little_endian, dtype))
        .ok_or_else(|| format!("unsupported dtype '{descr}'"))
}

fn parse_shape(text: &str) -> std::result::Result<Vec<usize>, String> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| format!("malformed shape '{text}'"))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| format!("malformed shape '{text}'"))
        })
        .collect()
}

fn decode_data<T: NpyElement>(header: &NpyHeader, raw: &[u8]) -> Result<ArrayD<T>> {
    let size = header.dtype.size();
    let mut values = Vec::with_capacity(header.element_count());
    for chunk in raw.chunks_exact(size) {
        let scalar = if header.little_endian {
            read_scalar::<LittleEndian>(header.dtype, chunk)
        } else {
            read_scalar::<BigEndian>(header.dtype, chunk)
        };
        let value = T::from_scalar(scalar).ok_or_else(|| {
            ImagingError::InvalidArray(format!(
                "{scalar:?} does not fit the requested element type {}",
                T::DESCR
            ))
        })?;
        values.push(value);
    }

    let shape = IxDyn(&header.shape);
    let array = if header.fortran_order {
        ArrayD::from_shape_vec(shape.f(), values)
    } else {
        ArrayD::from_shape_vec(shape, values)
    };
    array.map_err(|e| ImagingError::InvalidArray(e.to_string()))
}

fn read_scalar<B: ByteOrder>(dtype: DType, bytes: &[u8]) -> Scalar {
    match dtype {
        DType::Bool => Scalar::Bool(bytes[0] != 0),
        DType::U8 => Scalar::UInt(<u64 as From<u8>>::from(bytes[0])),
        DType::U16 => Scalar::UInt(<u64 as From<u16>>::from(B::read_u16(bytes))),
        DType::U32 => Scalar::UInt(<u64 as From<u32>>::from(B::read_u32(bytes))),
        DType::U64 => Scalar::UInt(B::read_u64(bytes)),
        DType::I8 => Scalar::Int(<i64 as From<i8>>::from(bytes[0] as i8)),
        DType::I16 => Scalar::Int(<i64 as From<i16>>::from(B::read_i16(bytes))),
        DType::I32 => Scalar::Int(<i64 as From<i32>>::from(B::read_i32(bytes))),
        DType::I64 => Scalar::Int(B::read_i64(bytes)),
        DType::F32 => Scalar::Float(<f64 as From<f32>>::from(B::read_f32(bytes))),
        DType::F64 => Scalar::Float(B::read_f64(bytes)),
    }
}
