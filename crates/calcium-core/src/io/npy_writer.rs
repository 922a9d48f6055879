use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{ArrayBase, Data, Dimension};

use crate::error::Result;
use crate::io::npy::{NpyElement, NPY_MAGIC};

/// Header block (magic through padding) is aligned to this many bytes.
const HEADER_ALIGNMENT: usize = 64;

/// Encode an array as a version 1.0, C-order, little-endian `.npy` image.
pub fn encode_npy<T, S, D>(array: &ArrayBase<S, D>) -> Vec<u8>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let mut out = Vec::with_capacity(HEADER_ALIGNMENT + array.len() * 8);
    write_header(&mut out, T::DESCR, array.shape());
    // `iter` walks in logical (row-major) order regardless of memory layout.
    for &value in array.iter() {
        value.write_le(&mut out);
    }
    out
}

/// Write an array to `path` as `.npy`.
pub fn write_npy<T, S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<()>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&encode_npy(array))?;
    writer.flush()?;
    Ok(())
}

fn write_header(out: &mut Vec<u8>, descr: &str, shape: &[usize]) {
    let shape_text = match shape {
        [] => "()".to_string(),
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_text}, }}");

    // Magic (6) + version (2) + length (2) + dict + trailing newline.
    let unpadded = 10 + dict.len() + 1;
    let padding = (HEADER_ALIGNMENT - unpadded % HEADER_ALIGNMENT) % HEADER_ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());

    debug_assert_eq!(out.len() % HEADER_ALIGNMENT, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::npy::decode_npy;
    use ndarray::{array, Ix2};

    #[test]
    fn test_encoded_header_is_aligned_and_decodable() {
        let data = array![[1.5f32, -2.0, 3.25], [4.0, 5.0, f32::NAN]];
        let bytes = encode_npy(&data);
        let decoded = decode_npy::<f32>(&bytes).unwrap().into_dimensionality::<Ix2>().unwrap();
        assert_eq!(decoded.shape(), &[2, 3]);
        assert_eq!(decoded[[0, 2]], 3.25);
        assert!(decoded[[1, 2]].is_nan());
    }

    #[test]
    fn test_transposed_view_written_in_logical_order() {
        let data = array![[1i64, 2], [3, 4]];
        let bytes = encode_npy(&data.t());
        let decoded = decode_npy::<i64>(&bytes).unwrap();
        assert_eq!(decoded.iter().copied().collect::<Vec<_>>(), vec![1, 3, 2, 4]);
    }
}
