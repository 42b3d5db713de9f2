//! Multi-array zip archive used for sample files and the shared ensemble inputs.
//!
//! Each array is one stored (uncompressed) zip entry named after the array. An
//! entry holds a 4-byte magic, the row and column counts as little-endian `u64`,
//! then the values as little-endian `f32` in row-major order. Readers return the
//! arrays sorted by entry name, independent of the order they were written in.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array2;
use thiserror::Error;

use super::{FeatureBundle, NamedArray};

const ENTRY_MAGIC: &[u8; 4] = b"TZA1";
const HEADER_LEN: usize = 4 + 8 + 8;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive file could not be opened or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The zip container is unreadable.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Array names must be non-empty and must not contain path separators.
    #[error("invalid array name '{0}'")]
    InvalidName(String),
    /// Two arrays share a name.
    #[error("duplicate array name '{0}'")]
    DuplicateName(String),
    /// An array entry has a bad header or payload length.
    #[error("corrupt array '{name}': {reason}")]
    Corrupt { name: String, reason: String },
    /// The requested array is not in the archive.
    #[error("archive has no array named '{0}'")]
    MissingArray(String),
}

/// Write arrays to `path`, replacing any existing file.
pub fn write_arrays(path: &Path, arrays: &[NamedArray]) -> Result<(), ArchiveError> {
    let mut seen = std::collections::BTreeSet::new();
    for array in arrays {
        validate_name(&array.name)?;
        if !seen.insert(array.name.as_str()) {
            return Err(ArchiveError::DuplicateName(array.name.clone()));
        }
    }
    let file = BufWriter::new(File::create(path)?);
    let mut zip = zip::ZipWriter::new(file);
    for array in arrays {
        let bytes = encode_array(&array.data);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .large_file(bytes.len() as u64 >= u32::MAX as u64);
        zip.start_file(array.name.as_str(), options)?;
        zip.write_all(&bytes)?;
    }
    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(())
}

/// Read every array in the archive, sorted by name.
pub fn read_arrays(path: &Path) -> Result<Vec<NamedArray>, ArchiveError> {
    let file = BufReader::new(File::open(path)?);
    let mut archive = zip::ZipArchive::new(file)?;
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    let mut arrays = Vec::with_capacity(names.len());
    for name in names {
        let mut entry = archive.by_name(&name)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let data = decode_array(&name, &bytes)?;
        arrays.push(NamedArray::new(name, data));
    }
    Ok(arrays)
}

/// Read one named array.
pub fn read_array(path: &Path, name: &str) -> Result<Array2<f32>, ArchiveError> {
    let file = BufReader::new(File::open(path)?);
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArchiveError::MissingArray(name.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    decode_array(name, &bytes)
}

pub fn write_bundle(path: &Path, bundle: &FeatureBundle) -> Result<(), ArchiveError> {
    write_arrays(path, bundle.arrays())
}

/// Rebuild a bundle; arrays come back in lexicographic name order.
pub fn read_bundle(path: &Path) -> Result<FeatureBundle, ArchiveError> {
    Ok(FeatureBundle::new(read_arrays(path)?))
}

fn validate_name(name: &str) -> Result<(), ArchiveError> {
    if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
        return Err(ArchiveError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn encode_array(data: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = data.dim();
    let mut out = Vec::with_capacity(HEADER_LEN + rows * cols * 4);
    out.extend_from_slice(ENTRY_MAGIC);
    out.extend_from_slice(&(rows as u64).to_le_bytes());
    out.extend_from_slice(&(cols as u64).to_le_bytes());
    for value in data.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_array(name: &str, bytes: &[u8]) -> Result<Array2<f32>, ArchiveError> {
    let corrupt = |reason: &str| ArchiveError::Corrupt {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if bytes.len() < HEADER_LEN || &bytes[..4] != ENTRY_MAGIC {
        return Err(corrupt("missing array header"));
    }
    let rows = read_u64(&bytes[4..12]) as usize;
    let cols = read_u64(&bytes[12..20]) as usize;
    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|count| count.checked_mul(4))
        .ok_or_else(|| corrupt("shape overflow"))?;
    if body.len() != expected {
        return Err(corrupt(&format!(
            "expected {expected} data bytes for {rows}x{cols}, found {}",
            body.len()
        )));
    }
    let values = body
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|err| corrupt(&err.to_string()))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn sorted_names_round_trip_in_original_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.zip");
        let bundle = FeatureBundle::new(vec![
            NamedArray::new("a", array![[1.0, 2.0], [3.0, 4.0]]),
            NamedArray::new("b", array![[5.0], [6.0]]),
        ]);
        write_bundle(&path, &bundle).unwrap();
        assert_eq!(read_bundle(&path).unwrap(), bundle);
    }

    #[test]
    fn reconstruction_follows_name_order_not_storage_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.zip");
        let b = NamedArray::new("b", array![[1.0]]);
        let a = NamedArray::new("a", array![[2.0, 3.0]]);
        write_bundle(&path, &FeatureBundle::new(vec![b.clone(), a.clone()])).unwrap();
        let loaded = read_bundle(&path).unwrap();
        assert_eq!(loaded.names(), vec!["a", "b"]);
        assert_eq!(loaded.arrays(), &[a, b]);
    }

    #[test]
    fn empty_rows_survive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.zip");
        let empty = Array2::<f32>::zeros((0, 3));
        write_arrays(&path, &[NamedArray::new("scores", empty.clone())]).unwrap();
        assert_eq!(read_array(&path, "scores").unwrap(), empty);
    }

    #[test]
    fn rejects_duplicate_and_invalid_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.zip");
        let dup = [
            NamedArray::new("a", array![[1.0]]),
            NamedArray::new("a", array![[2.0]]),
        ];
        assert!(matches!(
            write_arrays(&path, &dup),
            Err(ArchiveError::DuplicateName(name)) if name == "a"
        ));
        let nested = [NamedArray::new("dir/a", array![[1.0]])];
        assert!(matches!(
            write_arrays(&path, &nested),
            Err(ArchiveError::InvalidName(_))
        ));
    }

    #[test]
    fn missing_array_is_reported_by_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.zip");
        write_arrays(&path, &[NamedArray::new("a", array![[1.0]])]).unwrap();
        assert!(matches!(
            read_array(&path, "scores"),
            Err(ArchiveError::MissingArray(name)) if name == "scores"
        ));
    }

    #[test]
    fn truncated_entry_is_corrupt() {
        let err = decode_array("a", b"TZA1\x01").unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt { .. }));
    }
}
