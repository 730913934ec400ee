//! Huffman trees embedded in codeblock headers.
//!
//! The tree is serialized in pre-order: a `1` bit introduces a leaf followed by
//! its 8-bit symbol, a `0` bit introduces an internal node followed by its left
//! subtree (code bit 0) and then its right subtree (code bit 1).
//!
//! Decoding goes through a direct lookup table indexed by the next
//! [`TABLE_BITS`] bits of the stream; codes longer than that fall back to a
//! node walk starting from the table entry.

use super::bitstream::BitReader;
use crate::error::CodecError;

/// Longest code a tree may assign.
pub const MAX_CODE_LENGTH: u32 = 32;

/// Width of the fast lookup table index.
const TABLE_BITS: u32 = 10;

/// A full binary tree over 256 symbols never has more nodes than this.
const MAX_NODES: usize = 511;

#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf(u8),
    Branch { zero: usize, one: usize },
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Invalid,
    Symbol { symbol: u8, length: u32 },
    /// Code continues below this internal node after `TABLE_BITS` bits.
    Subtree(usize),
}

/// A decoding tree read from a codeblock header.
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    nodes: Vec<Node>,
    table: Vec<Entry>,
    /// Set when the root is a leaf: every symbol is coded with zero bits.
    single_symbol: Option<u8>,
}

impl HuffmanTree {
    /// Read a pre-order serialized tree from the bitstream.
    pub fn read(reader: &mut BitReader<'_>) -> Result<Self, CodecError> {
        let mut nodes = Vec::new();
        read_node(reader, &mut nodes, 0)?;

        let single_symbol = match nodes[0] {
            Node::Leaf(symbol) => Some(symbol),
            Node::Branch { .. } => None,
        };

        let mut tree = Self {
            nodes,
            table: vec![Entry::Invalid; 1 << TABLE_BITS],
            single_symbol,
        };
        if tree.single_symbol.is_none() {
            tree.fill_table(0, 0, 0);
        }
        Ok(tree)
    }

    /// Decode one symbol.
    pub fn decode(&self, reader: &mut BitReader<'_>) -> Result<u8, CodecError> {
        if let Some(symbol) = self.single_symbol {
            return Ok(symbol);
        }

        let start = reader.position();
        let index = reader.peek_bits(TABLE_BITS) as usize;
        match self.table[index] {
            Entry::Symbol { symbol, length } => {
                reader.skip(length)?;
                Ok(symbol)
            }
            Entry::Subtree(mut node) => {
                reader.skip(TABLE_BITS)?;
                loop {
                    match self.nodes[node] {
                        Node::Leaf(symbol) => return Ok(symbol),
                        Node::Branch { zero, one } => {
                            node = if reader.read_bit()? { one } else { zero };
                        }
                    }
                }
            }
            Entry::Invalid => Err(CodecError::InvalidCode(start)),
        }
    }

    /// Populate the lookup table for the subtree rooted at `node`, reached
    /// through `length` code bits whose value is `code`.
    fn fill_table(&mut self, node: usize, code: u32, length: u32) {
        if length == TABLE_BITS {
            let entry = match self.nodes[node] {
                Node::Leaf(symbol) => Entry::Symbol { symbol, length },
                Node::Branch { .. } => Entry::Subtree(node),
            };
            self.table[code as usize] = entry;
            return;
        }

        match self.nodes[node] {
            Node::Leaf(symbol) => {
                // Replicate across every index sharing this prefix
                let step = 1usize << length;
                let mut index = code as usize;
                while index < self.table.len() {
                    self.table[index] = Entry::Symbol { symbol, length };
                    index += step;
                }
            }
            Node::Branch { zero, one } => {
                self.fill_table(zero, code, length + 1);
                self.fill_table(one, code | (1 << length), length + 1);
            }
        }
    }
}

fn read_node(
    reader: &mut BitReader<'_>,
    nodes: &mut Vec<Node>,
    depth: u32,
) -> Result<usize, CodecError> {
    if depth > MAX_CODE_LENGTH {
        return Err(CodecError::InvalidHuffmanTree(format!(
            "code length exceeds {} bits",
            MAX_CODE_LENGTH
        )));
    }
    if nodes.len() >= MAX_NODES {
        return Err(CodecError::InvalidHuffmanTree(format!(
            "more than {} nodes",
            MAX_NODES
        )));
    }

    let index = nodes.len();
    if reader.read_bit()? {
        let symbol = reader.read_bits(8)? as u8;
        nodes.push(Node::Leaf(symbol));
    } else {
        nodes.push(Node::Branch { zero: 0, one: 0 });
        let zero = read_node(reader, nodes, depth + 1)?;
        let one = read_node(reader, nodes, depth + 1)?;
        nodes[index] = Node::Branch { zero, one };
    }
    Ok(index)
}
