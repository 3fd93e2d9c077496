//! Minimal NumPy `.npy` support for the per-file embedding artifacts.
//!
//! Only little-endian f32 arrays of rank 1 or 2 in C order are supported,
//! which is exactly what this crate writes and what evaluation tooling
//! reads back with `numpy.load`.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use ndarray::ArrayView2;

use crate::error::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// A loaded `.npy` array: shape plus flat C-order data.
#[derive(Debug)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

fn header_bytes(shape: &[usize]) -> Vec<u8> {
    let shape_str = match shape {
        [n] => format!("({n},)"),
        dims => {
            let joined: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", joined.join(", "))
        }
    };
    let dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape_str}, }}");
    // Preamble (magic + version + u16 length) is 10 bytes; pad the dict with
    // spaces so the data section starts on a 64-byte boundary.
    let unpadded = 10 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = (dict.len() + padding + 1) as u16;

    let mut out = Vec::with_capacity(10 + header_len as usize);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[0x01, 0x00]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out
}

fn write_floats<W: Write>(mut w: W, data: &[f32]) -> Result<()> {
    let mut buf = Vec::with_capacity(data.len() * 4);
    for value in data {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    w.write_all(&buf)?;
    Ok(())
}

pub fn write_1d<P: AsRef<Path>>(path: P, data: &[f32]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header_bytes(&[data.len()]))?;
    write_floats(&mut out, data)?;
    out.flush()?;
    Ok(())
}

pub fn write_2d<P: AsRef<Path>>(path: P, array: ArrayView2<'_, f32>) -> Result<()> {
    let (rows, cols) = array.dim();
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&header_bytes(&[rows, cols]))?;
    match array.as_slice() {
        Some(flat) => write_floats(&mut out, flat)?,
        None => {
            // Logical order is row-major even when the view is not contiguous.
            let flat: Vec<f32> = array.iter().copied().collect();
            write_floats(&mut out, &flat)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Extracts a quoted value following `key` in the header dict.
fn header_field<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(key)? + key.len();
    let rest = &header[start..];
    let open = rest.find('\'')? + 1;
    let close = rest[open..].find('\'')? + open;
    Some(&rest[open..close])
}

pub fn read<P: AsRef<Path>>(path: P) -> Result<NpyArray> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .map_err(|e| Error::artifact(path, format!("cannot open: {e}")))?;
    let mut preamble = [0u8; 8];
    file.read_exact(&mut preamble)
        .map_err(|e| Error::artifact(path, format!("truncated header: {e}")))?;
    if &preamble[..6] != MAGIC {
        return Err(Error::artifact(path, "not an npy file"));
    }
    let major = preamble[6];
    let header_len = match major {
        1 => {
            let mut len = [0u8; 2];
            file.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            file.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => {
            return Err(Error::artifact(path, format!("unsupported npy version {v}")));
        }
    };
    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)
        .map_err(|e| Error::artifact(path, format!("truncated header: {e}")))?;
    let header = String::from_utf8_lossy(&header);

    let descr = header_field(&header, "'descr':")
        .ok_or_else(|| Error::artifact(path, "header missing descr"))?;
    if descr != "<f4" {
        return Err(Error::artifact(
            path,
            format!("dtype {descr:?}, expected '<f4'"),
        ));
    }
    if header.contains("'fortran_order': True") {
        return Err(Error::artifact(path, "fortran order not supported"));
    }

    let open = header
        .find('(')
        .ok_or_else(|| Error::artifact(path, "header missing shape"))?;
    let close = header[open..]
        .find(')')
        .ok_or_else(|| Error::artifact(path, "header missing shape"))?
        + open;
    let mut shape = Vec::new();
    for part in header[open + 1..close].split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let dim: usize = part
            .parse()
            .map_err(|_| Error::artifact(path, format!("bad shape element {part:?}")))?;
        shape.push(dim);
    }
    if shape.is_empty() || shape.len() > 2 {
        return Err(Error::artifact(
            path,
            format!("rank {} arrays are not supported", shape.len()),
        ));
    }

    let count: usize = shape.iter().product();
    let mut bytes = Vec::with_capacity(count * 4);
    file.read_to_end(&mut bytes)?;
    if bytes.len() != count * 4 {
        return Err(Error::artifact(
            path,
            format!("expected {} data bytes, found {}", count * 4, bytes.len()),
        ));
    }
    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(NpyArray { shape, data })
}
