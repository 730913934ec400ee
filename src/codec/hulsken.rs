//! Codeblock decompression.
//!
//! A codeblock is the compressed form of one colour channel's coefficients for
//! one tile and one band. Its header depends on the compressor version:
//!
//! ```text
//! v1 ┌──────────┬──────┬──────┬──────────────┬──────────────────────┐
//!    │ L (u32)  │ Z u8 │ C u8 │ Huffman tree │ Huffman-coded stream │
//!    └──────────┴──────┴──────┴──────────────┴──────────────────────┘
//!      message (L bytes) = bitmasks (u16 per sub-band) + present bitplanes
//!
//! v2 ┌───────────────────────┬──────┬──────┬──────────────┬──────────────────────┐
//!    │ bitmask u16/sub-band  │ Z u8 │ C u8 │ Huffman tree │ Huffman-coded stream │
//!    └───────────────────────┴──────┴──────┴──────────────┴──────────────────────┘
//!      message = present bitplanes, length derived from the bitmasks
//! ```
//!
//! Bit `b` of a sub-band's bitmask says whether bitplane `b` is stored. Stored
//! planes follow sub-band by sub-band (HL, LH, HH for the H band), from bit 15
//! (sign) down to bit 0, each `w*h/8` bytes with one bit per coefficient in
//! raster order, LSB first. Absent planes are all zero.

use super::bitstream::BitReader;
use super::huffman::HuffmanTree;
use super::{Band, Coeff, CompressorVersion};
use crate::error::CodecError;
use crate::io::read_u32_le;

/// Number of bitplanes per sub-band.
pub const BITPLANES: usize = 16;

/// Bytes of one bitplane for a block of `width x height` coefficients.
///
/// Returns an error if the coefficient count per sub-band is not a whole
/// number of bytes.
pub fn bitplane_len(width: u32, height: u32) -> Result<usize, CodecError> {
    let count = width as usize * height as usize;
    if width == 0 || height == 0 || count % 8 != 0 {
        return Err(CodecError::InvalidBlockGeometry { width, height });
    }
    Ok(count / 8)
}

/// Parsed codeblock header.
struct Header {
    /// Bitmasks when stored in the header (v2).
    masks: Option<[u16; 3]>,
    /// Message length announced in the header (v1).
    announced_len: Option<usize>,
    zero_run_symbol: u8,
    counter_bits: u32,
    payload_start: usize,
}

fn read_header(
    data: &[u8],
    subbands: usize,
    version: CompressorVersion,
) -> Result<Header, CodecError> {
    let prefix_len = match version {
        CompressorVersion::V1 => 4,
        CompressorVersion::V2 => 2 * subbands,
    };
    let header_len = prefix_len + 2;
    if data.len() < header_len {
        return Err(CodecError::Truncated {
            position: data.len() * 8,
            needed: ((header_len - data.len()) * 8) as u32,
        });
    }

    let (masks, announced_len) = match version {
        CompressorVersion::V1 => (None, Some(read_u32_le(data) as usize)),
        CompressorVersion::V2 => (Some(read_masks(data, subbands)), None),
    };
    let counter_bits = data[prefix_len + 1] as u32;
    if !(1..=32).contains(&counter_bits) {
        return Err(CodecError::InvalidHeader(format!(
            "zero-run counter width {} outside 1..=32",
            counter_bits
        )));
    }
    Ok(Header {
        masks,
        announced_len,
        zero_run_symbol: data[prefix_len],
        counter_bits,
        payload_start: header_len,
    })
}

fn read_masks(bytes: &[u8], subbands: usize) -> [u16; 3] {
    let mut masks = [0u16; 3];
    for (i, mask) in masks.iter_mut().take(subbands).enumerate() {
        *mask = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
    }
    masks
}

fn present_planes(masks: &[u16; 3]) -> usize {
    masks.iter().map(|m| m.count_ones() as usize).sum()
}

/// Decode one codeblock into `out`.
///
/// `out` must hold `width * height * band.subbands()` coefficients; sub-bands
/// are stored one after another (HL, LH, HH for the H band), each in raster
/// order. The function is pure: on error `out` contents are unspecified but no
/// other state is touched.
///
/// # Arguments
/// * `data` - The compressed codeblock bytes
/// * `width`, `height` - Coefficients per sub-band row and column
/// * `band` - Whether this is an LL block (1 sub-band) or H block (3 sub-bands)
/// * `quantization` - Step multiplied into every decoded magnitude
/// * `version` - Compressor version that wrote the block
/// * `out` - Destination coefficient buffer
pub fn decompress_codeblock(
    data: &[u8],
    width: u32,
    height: u32,
    band: Band,
    quantization: u16,
    version: CompressorVersion,
    out: &mut [Coeff],
) -> Result<(), CodecError> {
    let plane_len = bitplane_len(width, height)?;
    let count = plane_len * 8;
    let subbands = band.subbands();
    if out.len() != count * subbands {
        return Err(CodecError::InvalidBlockGeometry { width, height });
    }

    // -------------------------------------------------------------------------
    // Header
    // -------------------------------------------------------------------------
    let header = read_header(data, subbands, version)?;
    let mask_len = 2 * subbands;
    let message_len = match (header.masks, header.announced_len) {
        (Some(masks), _) => present_planes(&masks) * plane_len,
        (None, Some(announced)) => {
            let max_len = mask_len + subbands * BITPLANES * plane_len;
            if announced < mask_len || announced > max_len {
                return Err(CodecError::LengthMismatch {
                    expected: max_len,
                    actual: announced,
                });
            }
            announced
        }
        (None, None) => 0,
    };

    // -------------------------------------------------------------------------
    // Huffman + zero-run expansion
    // -------------------------------------------------------------------------
    let mut reader = BitReader::new(&data[header.payload_start..]);
    let tree = HuffmanTree::read(&mut reader)?;
    let message = expand_message(
        &mut reader,
        &tree,
        header.zero_run_symbol,
        header.counter_bits,
        message_len,
    )?;

    let (masks, planes) = match header.masks {
        Some(masks) => (masks, &message[..]),
        None => {
            let masks = read_masks(&message, subbands);
            let expected = mask_len + present_planes(&masks) * plane_len;
            if expected != message_len {
                return Err(CodecError::LengthMismatch {
                    expected,
                    actual: message_len,
                });
            }
            (masks, &message[mask_len..])
        }
    };

    // -------------------------------------------------------------------------
    // Bitplanes -> coefficients
    // -------------------------------------------------------------------------
    let mut raw = vec![0u16; count * subbands];
    let mut stored = planes.chunks_exact(plane_len);
    for (subband, &mask) in masks.iter().take(subbands).enumerate() {
        let dst = &mut raw[subband * count..(subband + 1) * count];
        for bit in (0..BITPLANES).rev() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let Some(bytes) = stored.next() else {
                return Err(CodecError::LengthMismatch {
                    expected: present_planes(&masks) * plane_len,
                    actual: planes.len(),
                });
            };
            for (byte_index, &byte) in bytes.iter().enumerate() {
                if byte == 0 {
                    continue;
                }
                for b in 0..8 {
                    if (byte >> b) & 1 != 0 {
                        dst[byte_index * 8 + b] |= 1 << bit;
                    }
                }
            }
        }
    }

    let step = quantization.max(1) as i32;
    for (dst, &value) in out.iter_mut().zip(raw.iter()) {
        *dst = dequantize(value, step);
    }
    Ok(())
}

/// Huffman-decode symbols and expand zero runs until `len` bytes exist.
fn expand_message(
    reader: &mut BitReader<'_>,
    tree: &HuffmanTree,
    zero_run_symbol: u8,
    counter_bits: u32,
    len: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut message = vec![0u8; len];
    let mut pos = 0usize;
    while pos < len {
        let symbol = tree.decode(reader)?;
        if symbol != zero_run_symbol {
            message[pos] = symbol;
            pos += 1;
            continue;
        }
        let run = reader.read_bits(counter_bits)? as usize;
        if run == 0 {
            message[pos] = zero_run_symbol;
            pos += 1;
        } else if run > len - pos {
            return Err(CodecError::Overflow { expected: len });
        } else {
            // Buffer starts zeroed
            pos += run;
        }
    }
    Ok(message)
}

/// Convert a sign-magnitude value to a scaled, saturated coefficient.
#[inline]
fn dequantize(value: u16, step: i32) -> Coeff {
    let magnitude = (value & 0x7FFF) as i32 * step;
    let signed = if value & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    };
    signed.clamp(Coeff::MIN as i32, Coeff::MAX as i32) as Coeff
}
