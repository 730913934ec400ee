use thiserror::Error;

/// I/O errors that can occur when reading chunk data from the slide file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the operating system
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The read returned fewer bytes than requested
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// File not found or not openable
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

/// Errors raised while decoding a compressed codeblock
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bitstream ended before decoding finished
    #[error("Codeblock truncated: needed {needed} more bits at bit position {position}")]
    Truncated { position: usize, needed: u32 },

    /// Header fields are out of range
    #[error("Invalid codeblock header: {0}")]
    InvalidHeader(String),

    /// The embedded Huffman tree is malformed
    #[error("Invalid Huffman tree: {0}")]
    InvalidHuffmanTree(String),

    /// A bit sequence did not resolve to any symbol
    #[error("Invalid Huffman code at bit position {0}")]
    InvalidCode(usize),

    /// Run-length expansion produced more bytes than announced
    #[error("Serialized data overflow: announced {expected} bytes, decoded past the end")]
    Overflow { expected: usize },

    /// Serialized length does not match the block geometry
    #[error("Serialized length mismatch: expected {expected} bytes, header says {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Block dimensions cannot be expressed as whole bitplane bytes
    #[error("Invalid block geometry: {width}x{height}")]
    InvalidBlockGeometry { width: u32, height: u32 },

    /// Codeblock byte range lies outside the resident chunk
    #[error("Codeblock range {offset}+{size} lies outside chunk of {chunk_len} bytes")]
    OutOfChunk {
        offset: u64,
        size: u64,
        chunk_len: usize,
    },
}

/// Errors related to the pyramid geometry description
#[derive(Debug, Clone, Error)]
pub enum GeometryError {
    /// JSON (de)serialization failed
    #[error("Geometry JSON error: {0}")]
    Json(String),

    /// The pyramid has no levels
    #[error("Geometry has no levels")]
    NoLevels,

    /// Block dimensions are unusable
    #[error("Invalid block size {width}x{height}: {reason}")]
    InvalidBlockSize {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// A level's tile array disagrees with its grid dimensions
    #[error("Level {scale}: expected {expected} tiles, found {actual}")]
    TileCountMismatch {
        scale: u32,
        expected: usize,
        actual: usize,
    },

    /// Level grids do not halve from one scale to the next
    #[error("Level {scale}: grid {width}x{height} does not halve level below ({below_width}x{below_height})")]
    InvalidLevelGrid {
        scale: u32,
        width: u32,
        height: u32,
        below_width: u32,
        below_height: u32,
    },

    /// A tile references a chunk or codeblock that does not exist
    #[error("Level {scale} tile ({tile_x}, {tile_y}): {reason}")]
    InvalidTile {
        scale: u32,
        tile_x: u32,
        tile_y: u32,
        reason: String,
    },

    /// A tile exists but its parent does not, so it can never get LL coefficients
    #[error("Level {scale} tile ({tile_x}, {tile_y}) exists but its parent does not")]
    OrphanTile { scale: u32, tile_x: u32, tile_y: u32 },

    /// A data chunk is inconsistent with the codeblock table
    #[error("Chunk {index}: {reason}")]
    InvalidChunk { index: usize, reason: String },
}

impl From<serde_json::Error> for GeometryError {
    fn from(err: serde_json::Error) -> Self {
        GeometryError::Json(err.to_string())
    }
}

/// Errors from the coefficient block pools
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The pool reached its configured block cap
    #[error("Coefficient pool '{pool}' exhausted ({capacity} blocks)")]
    PoolExhausted { pool: &'static str, capacity: usize },
}

/// Errors that can occur while decompressing or reconstructing a tile
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// I/O error while reading chunk data
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Codeblock decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Coefficient pool could not hand out a block
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),

    /// Tile coordinates are outside the level or the tile does not exist
    #[error("Tile ({tile_x}, {tile_y}) at scale {scale} does not exist")]
    NoSuchTile { scale: u32, tile_x: u32, tile_y: u32 },

    /// The tile's own LL or H coefficients are not resident
    #[error("Tile ({tile_x}, {tile_y}) at scale {scale} lacks resident coefficients")]
    MissingCoefficients { scale: u32, tile_x: u32, tile_y: u32 },

    /// An existing neighbour lacks LL or H coefficients
    #[error("Neighbour ({neighbor_x}, {neighbor_y}) of tile at scale {scale} lacks resident coefficients")]
    MissingNeighbor {
        scale: u32,
        neighbor_x: u32,
        neighbor_y: u32,
    },

    /// The tile's data chunk has not been read yet
    #[error("Chunk {0} is not resident")]
    ChunkNotResident(usize),

    /// Failed to encode a finished tile as JPEG
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },
}
