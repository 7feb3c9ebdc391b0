//! Little-endian binary wire format.
//!
//! Integers are fixed width and little-endian. Strings and byte blobs are a
//! `u32` length prefix followed by the raw bytes.

use crate::error::ErrorKind;
use thiserror::Error;

/// Errors raised while decoding wire bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    #[error("field too large to encode: {0} bytes")]
    TooLarge(usize),

    #[error("{0} trailing bytes after decoding")]
    TrailingBytes(usize),

    #[error("payload codec error: {0}")]
    Payload(String),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Append-only byte writer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge(bytes.len()))?;
        self.put_u32(len);
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn put_str(&mut self, s: &str) -> Result<&mut Self> {
        self.put_bytes(s.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over encoded bytes.
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.pos;
        if n > remaining {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fail if any input is left over.
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian() {
        let mut enc = Encoder::new();
        enc.put_u32(1).put_i16(-2);
        enc.put_str("ab").unwrap();
        let bytes = enc.finish();
        assert_eq!(bytes, vec![1, 0, 0, 0, 0xFE, 0xFF, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_decode_sequence() {
        let mut enc = Encoder::new();
        enc.put_i64(-7);
        enc.put_bytes(&[9, 8, 7]).unwrap();
        enc.put_str("héllo").unwrap();
        let bytes = enc.finish();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.i64().unwrap(), -7);
        assert_eq!(dec.bytes().unwrap(), &[9, 8, 7]);
        assert_eq!(dec.string().unwrap(), "héllo");
        dec.finish().unwrap();
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = Decoder::new(&[5, 0, 0, 0, b'a']);
        assert!(matches!(
            dec.bytes(),
            Err(CodecError::UnexpectedEof { needed: 5, remaining: 1 })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut dec = Decoder::new(&[1, 0, 0, 0, 0xAA]);
        dec.u32().unwrap();
        assert!(matches!(dec.finish(), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut dec = Decoder::new(&[2, 0, 0, 0, 0xFF, 0xFE]);
        assert!(matches!(dec.string(), Err(CodecError::InvalidUtf8)));
    }
}
