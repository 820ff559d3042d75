//! Small encoding helpers shared by the backends, key derivation and AAD.

use crate::error::Error;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{self, Read};

/// Encodes `len` as 8 little-endian bytes.
#[must_use]
pub fn le64(len: usize) -> [u8; 8] {
    (len as u64).to_le_bytes()
}

/// Unambiguous length-prefixed packing.
///
/// Format: `LE64(count) || (LE64(len) || piece)*`. Two different piece lists
/// never pack to the same bytes.
#[must_use]
pub fn pack(pieces: &[&[u8]]) -> Vec<u8> {
    let total: usize = pieces.iter().map(|p| p.len() + 8).sum();
    let mut out = Vec::with_capacity(8 + total);
    out.extend_from_slice(&le64(pieces.len()));
    for piece in pieces {
        out.extend_from_slice(&le64(piece.len()));
        out.extend_from_slice(piece);
    }
    out
}

/// Keeps the first `bits` bits of `input`, zero-extending short inputs.
///
/// The result is `ceil(bits / 8)` bytes long; unused low bits of the final
/// byte are cleared.
#[must_use]
pub fn and_mask(input: &[u8], bits: u32) -> Vec<u8> {
    let full = (bits / 8) as usize;
    let rem = bits % 8;
    let len = full + usize::from(rem > 0);
    let mut out: Vec<u8> = input.iter().copied().chain(std::iter::repeat(0)).take(len).collect();
    if rem > 0 {
        if let Some(last) = out.last_mut() {
            *last &= 0xFF_u8 << (8 - rem);
        }
    }
    out
}

/// Number of bytes needed to hold `bits` bits.
#[must_use]
pub const fn bytes_for_bits(bits: u32) -> usize {
    bits.div_ceil(8) as usize
}

/// Fills a new buffer from the operating system RNG.
///
/// # Errors
///
/// Returns `Error::CryptoOperation` if the RNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::CryptoOperation(format!("random number generator failed: {e}")))?;
    Ok(buf)
}

/// Reads until `buf` is full or the reader is exhausted.
///
/// Chunk boundaries must not depend on how the underlying reader splits its
/// reads, so short reads are retried.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
