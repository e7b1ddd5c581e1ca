//! Big-endian byte reader and writer for the class-file format.

use crate::error::{ClassFormatError, FormatResult};

/// Cursor over class-file bytes.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Starts reading at offset 0.
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, position: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> FormatResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFormatError::UnexpectedEof(self.position))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Skips `len` bytes.
    pub fn skip(&mut self, len: usize) -> FormatResult<()> {
        self.read_bytes(len).map(|_| ())
    }

    /// Reads one unsigned byte.
    pub fn u1(&mut self) -> FormatResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a big-endian u16.
    pub fn u2(&mut self) -> FormatResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian u32.
    pub fn u4(&mut self) -> FormatResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian i32.
    pub fn i4(&mut self) -> FormatResult<i32> {
        Ok(self.u4()? as i32)
    }

    /// Reads a big-endian u64.
    pub fn u8(&mut self) -> FormatResult<u64> {
        let hi = self.u4()? as u64;
        let lo = self.u4()? as u64;
        Ok(hi << 32 | lo)
    }
}

/// Growable big-endian output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends one byte.
    pub fn u1(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends a big-endian u16.
    pub fn u2(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a big-endian u32.
    pub fn u4(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a big-endian u64.
    pub fn u8(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends raw bytes.
    pub fn bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Overwrites a u16 previously written at `offset`.
    pub fn patch_u2(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Overwrites a u32 previously written at `offset`.
    pub fn patch_u4(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Consumes the writer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decodes the class-file flavour of modified UTF-8.
pub fn decode_modified_utf8(bytes: &[u8]) -> FormatResult<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let a = bytes[i] as u16;
        if a & 0x80 == 0 {
            if a == 0 {
                return Err(ClassFormatError::BadUtf8);
            }
            units.push(a);
            i += 1;
        } else if a & 0xE0 == 0xC0 {
            let b = *bytes.get(i + 1).ok_or(ClassFormatError::BadUtf8)? as u16;
            if b & 0xC0 != 0x80 {
                return Err(ClassFormatError::BadUtf8);
            }
            units.push(((a & 0x1F) << 6) | (b & 0x3F));
            i += 2;
        } else if a & 0xF0 == 0xE0 {
            let b = *bytes.get(i + 1).ok_or(ClassFormatError::BadUtf8)? as u16;
            let c = *bytes.get(i + 2).ok_or(ClassFormatError::BadUtf8)? as u16;
            if b & 0xC0 != 0x80 || c & 0xC0 != 0x80 {
                return Err(ClassFormatError::BadUtf8);
            }
            units.push(((a & 0x0F) << 12) | ((b & 0x3F) << 6) | (c & 0x3F));
            i += 3;
        } else {
            return Err(ClassFormatError::BadUtf8);
        }
    }
    String::from_utf16(&units).map_err(|_| ClassFormatError::BadUtf8)
}

/// Encodes a string as modified UTF-8.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
