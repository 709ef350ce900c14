//! Compact state encoding: basis diff plus zlib.
//!
//! Real game states differ from a representative reference state in
//! only a few bytes, so byte-subtracting a basis before compression
//! shrinks multi-kilobyte states to a kilobyte or less. Both the
//! checkpoint store and the network dispatcher move large numbers of
//! encoded states, which is why this matters.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Sane upper bound on a decoded state. A header declaring more than
/// this is treated as corrupt rather than allocated.
pub const MAX_DECODED_LEN: u32 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoded state truncated at {0} bytes")]
    Truncated(usize),
    #[error("declared length {0} exceeds limit {MAX_DECODED_LEN}")]
    Oversized(u32),
    #[error("decompression failed: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("decompressed to {got} bytes but header declared {declared}")]
    LengthMismatch { declared: u32, got: usize },
}

/// Encode a raw state: diff against the basis over the shared prefix,
/// compress, and prepend the pre-compression length as a 4-byte
/// little-endian header.
pub fn encode(raw: &[u8], basis: Option<&[u8]>) -> Vec<u8> {
    let mut diffed = raw.to_vec();
    if let Some(basis) = basis {
        let shared = basis.len().min(diffed.len());
        for i in 0..shared {
            diffed[i] = diffed[i].wrapping_sub(basis[i]);
        }
    }

    let mut out = Vec::with_capacity(4 + raw.len() / 4);
    out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder
        .write_all(&diffed)
        .expect("in-memory zlib write cannot fail");
    encoder.finish().expect("in-memory zlib finish cannot fail")
}

/// Exact inverse of [`encode`]. Fails loudly on truncated or malformed
/// input instead of silently producing a corrupt state.
pub fn decode(blob: &[u8], basis: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
    if blob.len() < 4 {
        return Err(CodecError::Truncated(blob.len()));
    }
    let declared = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    if declared > MAX_DECODED_LEN {
        return Err(CodecError::Oversized(declared));
    }

    let mut raw = Vec::with_capacity(declared as usize);
    // Read one byte past the declared length so overlong streams are
    // detected rather than truncated to fit.
    let mut decoder = ZlibDecoder::new(&blob[4..]).take(declared as u64 + 1);
    decoder.read_to_end(&mut raw)?;
    if raw.len() != declared as usize {
        return Err(CodecError::LengthMismatch {
            declared,
            got: raw.len(),
        });
    }

    if let Some(basis) = basis {
        let shared = basis.len().min(raw.len());
        for i in 0..shared {
            raw[i] = raw[i].wrapping_add(basis[i]);
        }
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(raw: &[u8], basis: Option<&[u8]>) {
        let blob = encode(raw, basis);
        let back = decode(&blob, basis).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn round_trips_without_basis() {
        roundtrip(&[], None);
        roundtrip(&[0u8; 64], None);
        roundtrip(&(0..=255u8).collect::<Vec<_>>(), None);
    }

    #[test]
    fn round_trips_with_basis_of_any_relative_length() {
        let raw: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(7)).collect();
        let same: Vec<u8> = raw.clone();
        let shorter: Vec<u8> = raw[..40].to_vec();
        let longer: Vec<u8> = (0..200u8).collect();
        roundtrip(&raw, Some(&same));
        roundtrip(&raw, Some(&shorter));
        roundtrip(&raw, Some(&longer));
        roundtrip(&raw, Some(&[]));
        roundtrip(&[], Some(&raw));
    }

    #[test]
    fn near_basis_states_encode_small() {
        let basis = vec![0xAAu8; 8192];
        let mut raw = basis.clone();
        raw[17] = 0;
        raw[4000] = 1;
        let blob = encode(&raw, Some(&basis));
        assert!(blob.len() < 256, "diff+compress blew up: {}", blob.len());
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            decode(&[1, 0], None),
            Err(CodecError::Truncated(2))
        ));
        let blob = encode(&[5u8; 100], None);
        assert!(decode(&blob[..blob.len() - 3], None).is_err());
    }

    #[test]
    fn oversized_header_fails_before_allocating() {
        let mut blob = (MAX_DECODED_LEN + 1).to_le_bytes().to_vec();
        blob.extend_from_slice(&[0u8; 8]);
        assert!(matches!(decode(&blob, None), Err(CodecError::Oversized(_))));
    }

    #[test]
    fn header_length_mismatch_fails() {
        let mut blob = encode(&[9u8; 50], None);
        // Claim more bytes than the stream holds.
        blob[..4].copy_from_slice(&51u32.to_le_bytes());
        assert!(matches!(
            decode(&blob, None),
            Err(CodecError::LengthMismatch { .. })
        ));
    }
}
