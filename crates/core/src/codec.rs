//! Fixed-layout binary codec primitives
//!
//! Every account and instruction payload is a packed struct: little-endian
//! integers, one-byte booleans, raw 32-byte keys and space padded 32-byte
//! strings. No length prefixes, no padding between fields.

use crate::errors::{CodecError, CodecResult};
use crate::types::Pubkey;

/// Width of every fixed string field
pub const STR32_LEN: usize = 32;

/// A struct with a compile-time known packed size
pub trait Layout: Sized {
    /// Packed length in bytes
    const LEN: usize;

    /// Name used in error messages
    const NAME: &'static str;

    /// Write exactly `Self::LEN` bytes into `dst[..Self::LEN]`
    fn pack_into_slice(&self, dst: &mut [u8]);

    /// Read from `src[..Self::LEN]`. Callers guarantee the length.
    fn unpack_from_slice(src: &[u8]) -> CodecResult<Self>;

    fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::LEN];
        self.pack_into_slice(&mut buf);
        buf
    }

    /// Decode from the head of `src`; undersized buffers are rejected
    fn unpack(src: &[u8]) -> CodecResult<Self> {
        check_len(src, Self::LEN, Self::NAME)?;
        Self::unpack_from_slice(&src[..Self::LEN])
    }
}

pub fn check_len(src: &[u8], expected: usize, layout: &'static str) -> CodecResult<()> {
    if src.len() < expected {
        return Err(CodecError::BufferTooShort {
            layout,
            expected,
            actual: src.len(),
        });
    }
    Ok(())
}

pub fn unpack_bool(byte: &[u8; 1]) -> CodecResult<bool> {
    match byte {
        [0] => Ok(false),
        [1] => Ok(true),
        [b] => Err(CodecError::InvalidBool(*b)),
    }
}

pub fn pack_bool(value: bool, dst: &mut [u8; 1]) {
    dst[0] = value as u8;
}

pub fn unpack_pubkey(src: &[u8; 32]) -> Pubkey {
    Pubkey::new_from_array(*src)
}

pub fn pack_pubkey(key: &Pubkey, dst: &mut [u8; 32]) {
    dst.copy_from_slice(key.as_ref());
}

/// Upper-case, truncate to 32 bytes and pad with spaces.
///
/// Strings longer than 32 bytes do not survive a round trip. The cut never
/// splits a multi-byte character.
pub fn pack_str32(value: &str, dst: &mut [u8; STR32_LEN]) {
    let upper = value.to_uppercase();
    let bytes = upper.as_bytes();
    let mut n = bytes.len().min(STR32_LEN);
    while !upper.is_char_boundary(n) {
        n -= 1;
    }
    dst.fill(b' ');
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// Decode a padded string field, trimming trailing spaces and NULs
pub fn unpack_str32(src: &[u8; STR32_LEN]) -> String {
    let end = src
        .iter()
        .rposition(|b| *b != b' ' && *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str32_padding() {
        let mut buf = [0u8; 32];
        pack_str32("btc:usd", &mut buf);
        assert_eq!(&buf[..7], b"BTC:USD");
        assert!(buf[7..].iter().all(|b| *b == b' '));
        assert_eq!(unpack_str32(&buf), "BTC:USD");
    }

    #[test]
    fn test_str32_truncates() {
        let long = "a".repeat(40);
        let mut buf = [0u8; 32];
        pack_str32(&long, &mut buf);
        assert_eq!(unpack_str32(&buf), "A".repeat(32));
    }

    #[test]
    fn test_str32_truncates_on_char_boundary() {
        let value = format!("{}é", "a".repeat(31));
        let mut buf = [0u8; 32];
        pack_str32(&value, &mut buf);
        assert_eq!(buf[31], b' ');
        assert_eq!(unpack_str32(&buf), "A".repeat(31));

        pack_str32("€uro", &mut buf);
        assert_eq!(unpack_str32(&buf), "€URO");
    }

    #[test]
    fn test_str32_nul_padding() {
        let mut buf = [0u8; 32];
        buf[..3].copy_from_slice(b"ETH");
        assert_eq!(unpack_str32(&buf), "ETH");
        assert_eq!(unpack_str32(&[0u8; 32]), "");
    }

    #[test]
    fn test_bool_rejects_garbage() {
        assert_eq!(unpack_bool(&[0]), Ok(false));
        assert_eq!(unpack_bool(&[1]), Ok(true));
        assert_eq!(unpack_bool(&[2]), Err(CodecError::InvalidBool(2)));
    }
}
