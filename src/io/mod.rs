mod chunk_cache;
mod file_reader;
mod range_reader;

pub use chunk_cache::{ChunkCache, DEFAULT_MAX_RESIDENT_CHUNKS};
pub use file_reader::{FileRangeReader, MemoryRangeReader};
pub use range_reader::{read_u32_le, RangeReader};
