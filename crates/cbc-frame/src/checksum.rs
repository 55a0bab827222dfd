//! One-byte frame checksum.
//!
//! The checksum is the two's-complement negation of the byte sum, so a
//! complete frame (checksum byte included) always sums to zero mod 256.

use crate::error::ChecksumError;

/// Compute the checksum of `bytes`.
///
/// Callers pass every frame byte except the checksum itself.
pub fn calculate(bytes: &[u8]) -> Result<u8, ChecksumError> {
    if bytes.is_empty() {
        return Err(ChecksumError::InvalidParameter);
    }
    Ok(sum(bytes))
}

/// Verify `bytes` against `expected`.
///
/// Returns the computed checksum on success; on mismatch the error carries
/// both values so the caller can log them.
pub fn check(bytes: &[u8], expected: u8) -> Result<u8, ChecksumError> {
    let computed = calculate(bytes)?;
    if computed == expected {
        Ok(computed)
    } else {
        Err(ChecksumError::Mismatch { expected, computed })
    }
}

pub(crate) fn sum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, byte| acc.wrapping_add(0u8.wrapping_sub(*byte)))
}
