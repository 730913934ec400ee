//! Codeblock compression.
//!
//! Produces codeblocks in the format read by [`decompress_codeblock`]. Used by
//! the synthetic slide writer for demos and test fixtures.
//!
//! [`decompress_codeblock`]: super::decompress_codeblock

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::bitstream::BitWriter;
use super::huffman::MAX_CODE_LENGTH;
use super::hulsken::{bitplane_len, BITPLANES};
use super::{Band, Coeff, CompressorVersion};
use crate::error::CodecError;

/// Zero-run symbol written into every encoded header.
pub const ZERO_RUN_SYMBOL: u8 = 0x80;

/// Zero-run counter width written into every encoded header.
pub const ZERO_RUN_COUNTER_BITS: u32 = 16;

/// Shortest run of zero bytes worth encoding as a run.
const MIN_RUN: usize = 2;

#[derive(Debug, Clone, Copy)]
enum Token {
    Symbol(u8),
    /// `Z` followed by a counter of zero (literal `Z` byte)
    LiteralRunSymbol,
    /// `Z` followed by a non-zero counter
    ZeroRun(u32),
}

enum BuildNode {
    Leaf(u8),
    Branch(usize, usize),
}

/// Compress one codeblock.
///
/// Coefficients are divided by `quantization` (truncating toward zero) and
/// stored as sign-magnitude with magnitudes saturated to 15 bits. Bitplanes
/// that are zero across a whole sub-band are left out of the message.
pub fn compress_codeblock(
    coefficients: &[Coeff],
    width: u32,
    height: u32,
    band: Band,
    quantization: u16,
    version: CompressorVersion,
) -> Result<Vec<u8>, CodecError> {
    let plane_len = bitplane_len(width, height)?;
    let count = plane_len * 8;
    if coefficients.len() != count * band.subbands() {
        return Err(CodecError::InvalidBlockGeometry { width, height });
    }

    let words = sign_magnitude_words(coefficients, quantization.max(1));
    let masks: Vec<u16> = words
        .chunks_exact(count)
        .map(|subband| subband.iter().fold(0, |mask, &word| mask | word))
        .collect();
    let mask_bytes: Vec<u8> = masks.iter().flat_map(|m| m.to_le_bytes()).collect();
    let planes = serialize_bitplanes(&words, &masks, count);

    let message = match version {
        CompressorVersion::V1 => [mask_bytes.as_slice(), planes.as_slice()].concat(),
        CompressorVersion::V2 => planes,
    };
    let tokens = run_length_tokens(&message);

    let mut frequencies = [0u64; 256];
    for token in &tokens {
        match token {
            Token::Symbol(symbol) => frequencies[*symbol as usize] += 1,
            Token::LiteralRunSymbol | Token::ZeroRun(_) => {
                frequencies[ZERO_RUN_SYMBOL as usize] += 1
            }
        }
    }

    let (nodes, root) = build_tree(&frequencies);
    let mut codes = [(0u64, 0u32); 256];
    assign_codes(&nodes, root, 0, 0, &mut codes);

    let mut out = Vec::with_capacity(message.len() / 4 + 16);
    match version {
        CompressorVersion::V1 => out.extend_from_slice(&(message.len() as u32).to_le_bytes()),
        CompressorVersion::V2 => out.extend_from_slice(&mask_bytes),
    }
    out.push(ZERO_RUN_SYMBOL);
    out.push(ZERO_RUN_COUNTER_BITS as u8);

    let mut writer = BitWriter::new();
    write_tree(&nodes, root, &mut writer);
    let (run_code, run_len) = codes[ZERO_RUN_SYMBOL as usize];
    for token in &tokens {
        match *token {
            Token::Symbol(symbol) => {
                let (code, len) = codes[symbol as usize];
                writer.write_bits(code, len);
            }
            Token::LiteralRunSymbol => {
                writer.write_bits(run_code, run_len);
                writer.write_bits(0, ZERO_RUN_COUNTER_BITS);
            }
            Token::ZeroRun(run) => {
                writer.write_bits(run_code, run_len);
                writer.write_bits(run as u64, ZERO_RUN_COUNTER_BITS);
            }
        }
    }
    out.extend_from_slice(&writer.finish());
    Ok(out)
}

fn sign_magnitude_words(coefficients: &[Coeff], quantization: u16) -> Vec<u16> {
    let step = quantization as i32;
    coefficients
        .iter()
        .map(|&coefficient| {
            let value = coefficient as i32 / step;
            let magnitude = value.unsigned_abs().min(0x7FFF) as u16;
            if value < 0 {
                magnitude | 0x8000
            } else {
                magnitude
            }
        })
        .collect()
}

/// Planes present in `masks`, per sub-band from bit 15 down to bit 0.
fn serialize_bitplanes(words: &[u16], masks: &[u16], count: usize) -> Vec<u8> {
    let plane_len = count / 8;
    let mut message = Vec::new();

    for (subband, &mask) in masks.iter().enumerate() {
        let src = &words[subband * count..(subband + 1) * count];
        for bit in (0..BITPLANES).rev() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let start = message.len();
            message.resize(start + plane_len, 0);
            for (i, &word) in src.iter().enumerate() {
                if (word >> bit) & 1 != 0 {
                    message[start + i / 8] |= 1 << (i % 8);
                }
            }
        }
    }
    message
}

fn run_length_tokens(message: &[u8]) -> Vec<Token> {
    let max_run = (1usize << ZERO_RUN_COUNTER_BITS) - 1;
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < message.len() {
        let byte = message[i];
        if byte == 0 {
            let mut run = 1;
            while i + run < message.len() && message[i + run] == 0 && run < max_run {
                run += 1;
            }
            if run >= MIN_RUN {
                tokens.push(Token::ZeroRun(run as u32));
                i += run;
                continue;
            }
        }
        if byte == ZERO_RUN_SYMBOL {
            tokens.push(Token::LiteralRunSymbol);
        } else {
            tokens.push(Token::Symbol(byte));
        }
        i += 1;
    }
    tokens
}

/// Build a Huffman tree from symbol frequencies.
///
/// Falls back to a balanced tree over the used symbols when the optimal tree
/// would exceed the maximum code length.
fn build_tree(frequencies: &[u64; 256]) -> (Vec<BuildNode>, usize) {
    let used: Vec<u8> = (0..=255u8)
        .filter(|&s| frequencies[s as usize] > 0)
        .collect();

    let mut nodes = Vec::new();
    if used.len() <= 1 {
        nodes.push(BuildNode::Leaf(used.first().copied().unwrap_or(0)));
        return (nodes, 0);
    }

    let mut heap = BinaryHeap::new();
    for &symbol in &used {
        let index = nodes.len();
        nodes.push(BuildNode::Leaf(symbol));
        heap.push(Reverse((frequencies[symbol as usize], index)));
    }
    while heap.len() > 1 {
        let (Some(Reverse((fa, a))), Some(Reverse((fb, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        let index = nodes.len();
        nodes.push(BuildNode::Branch(a, b));
        heap.push(Reverse((fa + fb, index)));
    }
    let root = nodes.len() - 1;

    if depth(&nodes, root) > MAX_CODE_LENGTH {
        let mut balanced = Vec::new();
        let root = build_balanced(&used, &mut balanced);
        return (balanced, root);
    }
    (nodes, root)
}

fn build_balanced(symbols: &[u8], nodes: &mut Vec<BuildNode>) -> usize {
    if symbols.len() == 1 {
        nodes.push(BuildNode::Leaf(symbols[0]));
        return nodes.len() - 1;
    }
    let (left, right) = symbols.split_at(symbols.len() / 2);
    let a = build_balanced(left, nodes);
    let b = build_balanced(right, nodes);
    nodes.push(BuildNode::Branch(a, b));
    nodes.len() - 1
}

fn depth(nodes: &[BuildNode], node: usize) -> u32 {
    match nodes[node] {
        BuildNode::Leaf(_) => 0,
        BuildNode::Branch(a, b) => 1 + depth(nodes, a).max(depth(nodes, b)),
    }
}

fn assign_codes(
    nodes: &[BuildNode],
    node: usize,
    code: u64,
    length: u32,
    codes: &mut [(u64, u32); 256],
) {
    match nodes[node] {
        BuildNode::Leaf(symbol) => codes[symbol as usize] = (code, length),
        BuildNode::Branch(a, b) => {
            assign_codes(nodes, a, code, length + 1, codes);
            assign_codes(nodes, b, code | (1 << length), length + 1, codes);
        }
    }
}

fn write_tree(nodes: &[BuildNode], node: usize, writer: &mut BitWriter) {
    match nodes[node] {
        BuildNode::Leaf(symbol) => {
            writer.write_bit(true);
            writer.write_bits(symbol as u64, 8);
        }
        BuildNode::Branch(a, b) => {
            writer.write_bit(false);
            write_tree(nodes, a, writer);
            write_tree(nodes, b, writer);
        }
    }
}
