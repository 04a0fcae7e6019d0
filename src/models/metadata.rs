//! GGUF header parsing
//!
//! Reads the fixed-size prefix of a GGUF weight file:
//! magic (4 bytes), version (u32), tensor count (u64), metadata kv count (u64),
//! all little-endian.

use serde::{Deserialize, Serialize};

/// File magic, the ASCII bytes `GGUF`
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Size of the fixed header prefix in bytes
pub const GGUF_HEADER_LEN: usize = 24;

/// Supported format versions
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// Parsed GGUF header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Parse and validate a GGUF header prefix
pub fn parse_gguf_header(bytes: &[u8]) -> Result<GgufHeader, String> {
    if bytes.len() < GGUF_HEADER_LEN {
        return Err(format!(
            "file too short for a GGUF header ({} bytes)",
            bytes.len()
        ));
    }

    if &bytes[0..4] != GGUF_MAGIC {
        return Err(format!("invalid GGUF magic: {:02x?}", &bytes[0..4]));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(format!("unsupported GGUF version {}", version));
    }

    let mut tensor_count = [0u8; 8];
    tensor_count.copy_from_slice(&bytes[8..16]);
    let mut metadata_kv_count = [0u8; 8];
    metadata_kv_count.copy_from_slice(&bytes[16..24]);

    Ok(GgufHeader {
        version,
        tensor_count: u64::from_le_bytes(tensor_count),
        metadata_kv_count: u64::from_le_bytes(metadata_kv_count),
    })
}

/// Encode a header prefix (used to build fixture files)
pub fn encode_gguf_header(header: &GgufHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(GGUF_HEADER_LEN);
    bytes.extend_from_slice(GGUF_MAGIC);
    bytes.extend_from_slice(&header.version.to_le_bytes());
    bytes.extend_from_slice(&header.tensor_count.to_le_bytes());
    bytes.extend_from_slice(&header.metadata_kv_count.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_header() {
        let header = GgufHeader {
            version: 3,
            tensor_count: 147,
            metadata_kv_count: 30,
        };
        let mut bytes = encode_gguf_header(&header);
        bytes.extend_from_slice(&[0u8; 64]);
        assert_eq!(parse_gguf_header(&bytes), Ok(header));
    }

    #[test]
    fn test_rejects_short_input() {
        let err = parse_gguf_header(b"GGUF").unwrap_err();
        assert!(err.contains("too short"));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = vec![0u8; GGUF_HEADER_LEN];
        bytes[0..4].copy_from_slice(b"PK\x03\x04");
        let err = parse_gguf_header(&bytes).unwrap_err();
        assert!(err.contains("magic"));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let bytes = encode_gguf_header(&GgufHeader {
            version: 9,
            tensor_count: 1,
            metadata_kv_count: 1,
        });
        let err = parse_gguf_header(&bytes).unwrap_err();
        assert!(err.contains("version 9"));
    }
}
