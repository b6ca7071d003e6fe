//! Minimal NPY v1.0 codec for the columnar postings arrays.
//!
//! Only one-dimensional little-endian integer arrays are supported, which is
//! all the on-disk index format uses. Data starts 64-byte aligned, so the
//! memory-mapped payload can be viewed as a typed slice directly.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{EngineError, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const VERSION: [u8; 2] = [1, 0];
const HEADER_ALIGN: usize = 64;

pub trait NpyScalar: Copy {
    const DESCR: &'static str;
    const WIDTH: usize;
    fn write_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

impl NpyScalar for i16 {
    const DESCR: &'static str = "<i2";
    const WIDTH: usize = 2;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl NpyScalar for i32 {
    const DESCR: &'static str = "<i4";
    const WIDTH: usize = 4;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl NpyScalar for i64 {
    const DESCR: &'static str = "<i8";
    const WIDTH: usize = 8;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le(bytes: &[u8]) -> Self {
        i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }
}

pub fn write_npy<T: NpyScalar>(path: &Path, values: &[T]) -> Result<()> {
    let dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({},), }}",
        T::DESCR,
        values.len()
    );
    // Pad so the data section starts HEADER_ALIGN-aligned; the dict must end
    // with a newline per the format.
    let unpadded = MAGIC.len() + VERSION.len() + 2 + dict.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    let header_len = dict.len() + padding + 1;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION)?;
    writer.write_all(&(header_len as u16).to_le_bytes())?;
    writer.write_all(dict.as_bytes())?;
    writer.write_all(&vec![b' '; padding])?;
    writer.write_all(b"\n")?;

    let mut buf = Vec::with_capacity(values.len() * T::WIDTH);
    for &value in values {
        value.write_le(&mut buf);
    }
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

pub fn read_npy<T: NpyScalar>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .map_err(|e| EngineError::index(format!("failed to open {}: {e}", path.display())))?;
    let mmap = unsafe { Mmap::map(&file)? };
    let (count, data_offset) = parse_header::<T>(&mmap, path)?;

    let expected = data_offset + count * T::WIDTH;
    if mmap.len() < expected {
        return Err(EngineError::index(format!(
            "{}: truncated array, expected {} bytes, got {}",
            path.display(),
            expected,
            mmap.len()
        )));
    }

    let data = &mmap[data_offset..expected];
    Ok(data.chunks_exact(T::WIDTH).map(T::from_le).collect())
}

fn parse_header<T: NpyScalar>(mmap: &Mmap, path: &Path) -> Result<(usize, usize)> {
    if mmap.len() < MAGIC.len() + VERSION.len() + 2 || &mmap[..MAGIC.len()] != MAGIC {
        return Err(EngineError::index(format!(
            "{}: not an NPY file",
            path.display()
        )));
    }
    let header_len = u16::from_le_bytes([mmap[8], mmap[9]]) as usize;
    let data_offset = MAGIC.len() + VERSION.len() + 2 + header_len;
    if mmap.len() < data_offset {
        return Err(EngineError::index(format!(
            "{}: truncated NPY header",
            path.display()
        )));
    }

    let dict = std::str::from_utf8(&mmap[10..data_offset])
        .map_err(|_| EngineError::index(format!("{}: malformed NPY header", path.display())))?;

    if !dict.contains(&format!("'descr': '{}'", T::DESCR)) {
        return Err(EngineError::index(format!(
            "{}: dtype mismatch, expected {}",
            path.display(),
            T::DESCR
        )));
    }
    if !dict.contains("'fortran_order': False") {
        return Err(EngineError::index(format!(
            "{}: fortran-ordered arrays are not supported",
            path.display()
        )));
    }

    let count = dict
        .find('(')
        .and_then(|open| {
            let tail = &dict[open + 1..];
            let close = tail.find(')')?;
            tail[..close].trim_end_matches(',').trim().parse::<usize>().ok()
        })
        .ok_or_else(|| {
            EngineError::index(format!("{}: unsupported NPY shape", path.display()))
        })?;

    Ok((count, data_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_each_dtype() {
        let dir = tempdir().unwrap();

        let i16s: Vec<i16> = vec![0, 1, -7, i16::MAX, i16::MIN];
        let path = dir.path().join("a.npy");
        write_npy(&path, &i16s).unwrap();
        assert_eq!(read_npy::<i16>(&path).unwrap(), i16s);

        let i32s: Vec<i32> = vec![42, -42, i32::MAX];
        let path = dir.path().join("b.npy");
        write_npy(&path, &i32s).unwrap();
        assert_eq!(read_npy::<i32>(&path).unwrap(), i32s);

        let i64s: Vec<i64> = (0..1000).collect();
        let path = dir.path().join("c.npy");
        write_npy(&path, &i64s).unwrap();
        assert_eq!(read_npy::<i64>(&path).unwrap(), i64s);
    }

    #[test]
    fn empty_array_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.npy");
        write_npy::<i32>(&path, &[]).unwrap();
        assert!(read_npy::<i32>(&path).unwrap().is_empty());
    }

    #[test]
    fn data_section_is_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aligned.npy");
        write_npy::<i64>(&path, &[1, 2, 3]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
    }

    #[test]
    fn rejects_dtype_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typed.npy");
        write_npy::<i32>(&path, &[1, 2]).unwrap();
        let err = read_npy::<i64>(&path).unwrap_err();
        assert!(err.to_string().contains("dtype mismatch"));
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.npy");
        std::fs::write(&path, b"definitely not numpy data").unwrap();
        assert!(read_npy::<i32>(&path).is_err());
    }
}
