//! GGUF file validation
//!
//! Checks a model file's magic header before handing it to the (expensive,
//! possibly crashy) backend loader.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// Header size: magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

/// Errors that can occur while validating a model file
#[derive(Debug, Error)]
pub enum GgufError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    #[error("Invalid GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Metadata extracted from a GGUF file header
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    /// GGUF format version
    pub version: u32,
    /// Number of tensors in the model
    pub tensor_count: u64,
    /// Number of metadata key-value pairs
    pub metadata_kv_count: u64,
}

/// Validates that a file has a recognizable GGUF header and extracts the
/// basic counts from it.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufMetadata, GgufError> {
    let mut file = File::open(path)?;

    let file_size = file.seek(SeekFrom::End(0))?;
    if file_size < HEADER_LEN as u64 {
        return Err(GgufError::FileTooSmall);
    }
    file.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)?;

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != GGUF_MAGIC {
        return Err(GgufError::InvalidMagic(magic));
    }

    let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
    // GGUF v2 and v3 are supported
    if !(2..=3).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    let tensor_count = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let metadata_kv_count = u64::from_le_bytes(header[16..24].try_into().unwrap());

    Ok(GgufMetadata {
        version,
        tensor_count,
        metadata_kv_count,
    })
}

/// Checks whether a file looks like a GGUF model: `.gguf` extension plus a
/// valid magic header.
pub fn is_gguf_file<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();

    match path.extension() {
        Some(ext) if ext.to_string_lossy().eq_ignore_ascii_case("gguf") => {}
        _ => return false,
    }

    validate_gguf(path).is_ok()
}
