//! Codeblock and wavelet codec.
//!
//! ```text
//! codeblock bytes ──► hulsken ──► i16 sub-band coefficients
//!                                      │
//!                     idwt (5/3) ◄─────┘
//!                        │
//!                        ▼
//!                  Y/Co/Cg planes ──► color ──► RGB8
//! ```

mod bitstream;
mod color;
mod encoder;
mod huffman;
mod hulsken;
mod idwt;

use serde::{Deserialize, Serialize};

pub use bitstream::{BitReader, BitWriter};
pub use color::{convert_to_rgb, ycocg_to_rgb};
pub use encoder::{compress_codeblock, ZERO_RUN_COUNTER_BITS, ZERO_RUN_SYMBOL};
pub use huffman::{HuffmanTree, MAX_CODE_LENGTH};
pub use hulsken::{bitplane_len, decompress_codeblock, BITPLANES};
pub use idwt::{inverse_53_1d, inverse_53_2d};

#[cfg(test)]
pub(crate) use idwt::forward;

/// Wavelet coefficient sample.
pub type Coeff = i16;

/// Which coefficients a codeblock carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// Low-pass approximation, one sub-band
    Ll,
    /// High-pass details, three sub-bands (HL, LH, HH)
    H,
}

impl Band {
    /// Number of sub-bands stored in a codeblock of this band.
    pub const fn subbands(self) -> usize {
        match self {
            Band::Ll => 1,
            Band::H => 3,
        }
    }
}

/// Revision of the codeblock compressor that wrote a slide.
///
/// Both store a per-sub-band bitmask of the bitplanes present. Version 1
/// keeps it at the start of the compressed message and announces the message
/// length in the header; version 2 moves the bitmask into the header and
/// derives the length from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressorVersion {
    #[default]
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2")]
    V2,
}
