//! Field descriptors for values stored inside a parameter block.
//!
//! Every numeric parameter is one of four wire widths:
//! - 7-bit: one data byte
//! - 8/12/16-bit: 2/3/4 bytes, each carrying one nibble in its low bits,
//!   most significant nibble first
//!
//! Signed parameters are stored with a fixed bias added, so the value seen by
//! callers is `raw - bias`.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits7,
    Bits8,
    Bits12,
    Bits16,
}

impl Width {
    pub const fn byte_len(self) -> usize {
        match self {
            Width::Bits7 => 1,
            Width::Bits8 => 2,
            Width::Bits12 => 3,
            Width::Bits16 => 4,
        }
    }

    pub const fn raw_max(self) -> u32 {
        match self {
            Width::Bits7 => 0x7F,
            Width::Bits8 => 0xFF,
            Width::Bits12 => 0xFFF,
            Width::Bits16 => 0xFFFF,
        }
    }
}

/// Spread `value` over `count` bytes, one nibble per byte, MSB first.
pub fn pack_nibbles(value: u32, count: usize) -> Vec<u8> {
    (0..count)
        .rev()
        .map(|i| ((value >> (i * 4)) & 0x0F) as u8)
        .collect()
}

/// Inverse of [`pack_nibbles`]. Only the low nibble of each byte is used.
pub fn unpack_nibbles(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 4) | (b & 0x0F) as u32)
}

/// Numeric field descriptor: `(offset, width, bias, min, max)`.
///
/// `min`/`max` are in the caller's domain, i.e. after the bias is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub width: Width,
    pub bias: i32,
    pub min: i32,
    pub max: i32,
}

impl Field {
    const fn unsigned(offset: usize, width: Width) -> Self {
        Self {
            offset,
            width,
            bias: 0,
            min: 0,
            max: width.raw_max() as i32,
        }
    }

    pub const fn u7(offset: usize) -> Self {
        Self::unsigned(offset, Width::Bits7)
    }

    pub const fn u8(offset: usize) -> Self {
        Self::unsigned(offset, Width::Bits8)
    }

    pub const fn u12(offset: usize) -> Self {
        Self::unsigned(offset, Width::Bits12)
    }

    pub const fn u16(offset: usize) -> Self {
        Self::unsigned(offset, Width::Bits16)
    }

    /// 7-bit value centred on 64.
    pub const fn s7(offset: usize) -> Self {
        Self {
            offset,
            width: Width::Bits7,
            bias: 64,
            min: -64,
            max: 63,
        }
    }

    /// 16-bit value centred on 32768.
    pub const fn s16(offset: usize) -> Self {
        Self {
            offset,
            width: Width::Bits16,
            bias: 32768,
            min: -32768,
            max: 32767,
        }
    }

    pub const fn range(self, min: i32, max: i32) -> Self {
        Self { min, max, ..self }
    }

    pub const fn len(&self) -> usize {
        self.width.byte_len()
    }

    pub const fn end(&self) -> usize {
        self.offset + self.width.byte_len()
    }

    /// Raw stored value read from a full block byte array.
    pub fn decode_raw(&self, block: &[u8]) -> u32 {
        let bytes = &block[self.offset..self.end()];
        match self.width {
            Width::Bits7 => (bytes[0] & 0x7F) as u32,
            _ => unpack_nibbles(bytes),
        }
    }

    pub fn decode(&self, block: &[u8]) -> i32 {
        self.decode_raw(block) as i32 - self.bias
    }

    pub fn encode(&self, value: i32) -> Result<Vec<u8>> {
        if value < self.min || value > self.max {
            return Err(Error::ValueRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        self.encode_raw((value + self.bias) as u32)
    }

    pub fn encode_raw(&self, raw: u32) -> Result<Vec<u8>> {
        let raw_max = self.width.raw_max();
        if raw > raw_max {
            return Err(Error::ValueRange {
                value: raw as i32,
                min: 0,
                max: raw_max as i32,
            });
        }
        Ok(match self.width {
            Width::Bits7 => vec![raw as u8],
            width => pack_nibbles(raw, width.byte_len()),
        })
    }
}

/// Fixed-length text, one printable ASCII character per byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextField {
    pub offset: usize,
    pub len: usize,
}

impl TextField {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn decode(&self, block: &[u8]) -> String {
        block[self.offset..self.offset + self.len]
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Encode `text`, padding with spaces to the field length.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        if text.len() > self.len {
            return Err(Error::ValueRange {
                value: text.len() as i32,
                min: 0,
                max: self.len as i32,
            });
        }
        let mut bytes = Vec::with_capacity(self.len);
        for ch in text.chars() {
            let code = ch as u32;
            if !(0x20..=0x7F).contains(&code) {
                return Err(Error::ValueRange {
                    value: code as i32,
                    min: 0x20,
                    max: 0x7F,
                });
            }
            bytes.push(code as u8);
        }
        bytes.resize(self.len, b' ');
        Ok(bytes)
    }
}
