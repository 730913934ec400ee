//! LSB-first bit I/O.
//!
//! Codeblock payloads are packed least-significant bit first: the first bit of
//! the stream is bit 0 of byte 0, a multi-bit field of width `n` occupies the
//! next `n` bits with its own bit 0 first.

use crate::error::CodecError;

// =============================================================================
// Bit Reader
// =============================================================================

/// Reads bit fields from a byte slice, least significant bit first.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bits from the start of the slice.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread bits.
    #[inline]
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    /// Read a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, CodecError> {
        if self.remaining_bits() == 0 {
            return Err(CodecError::Truncated {
                position: self.position,
                needed: 1,
            });
        }
        let byte = self.data[self.position / 8];
        let bit = (byte >> (self.position % 8)) & 1;
        self.position += 1;
        Ok(bit != 0)
    }

    /// Read an `n`-bit field (`n <= 32`).
    pub fn read_bits(&mut self, n: u32) -> Result<u32, CodecError> {
        debug_assert!(n <= 32);
        if (n as usize) > self.remaining_bits() {
            return Err(CodecError::Truncated {
                position: self.position,
                needed: n,
            });
        }
        let value = self.peek_bits(n);
        self.position += n as usize;
        Ok(value)
    }

    /// Look at the next `n` bits (`n <= 32`) without consuming them.
    ///
    /// Bits past the end of the data read as zero.
    pub fn peek_bits(&self, n: u32) -> u32 {
        let mut value: u64 = 0;
        let mut got = 0u32;
        let mut pos = self.position;
        while got < n {
            let byte_index = pos / 8;
            if byte_index >= self.data.len() {
                break;
            }
            let bit_offset = (pos % 8) as u32;
            let take = (8 - bit_offset).min(n - got);
            let bits = (self.data[byte_index] as u64 >> bit_offset) & ((1u64 << take) - 1);
            value |= bits << got;
            got += take;
            pos += take as usize;
        }
        value as u32
    }

    /// Advance by `n` bits.
    pub fn skip(&mut self, n: u32) -> Result<(), CodecError> {
        if (n as usize) > self.remaining_bits() {
            return Err(CodecError::Truncated {
                position: self.position,
                needed: n,
            });
        }
        self.position += n as usize;
        Ok(())
    }
}

// =============================================================================
// Bit Writer
// =============================================================================

/// Accumulates bit fields into bytes, least significant bit first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_count: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `n` bits of `value` (`n <= 64`).
    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in 0..n {
            if self.bit_count % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (self.bit_count % 8);
            }
            self.bit_count += 1;
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write_bits(bit as u64, 1);
    }

    /// Finish the stream, zero-padding the final byte.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
