//! Configuration management for the iSyntax streamer.
//!
//! This module provides:
//! - Command-line arguments via clap (`render` and `synth` subcommands)
//! - Environment variables with `ISYNTAX_` prefix for every engine tunable
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use isyntax_streamer::config::StreamerConfig;
//!
//! let config = StreamerConfig::default();
//! assert_eq!(config.padding, 5);
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! - `ISYNTAX_PADDING` - Load region padding in tiles (default: 5)
//! - `ISYNTAX_MAX_CHUNKS_PER_PASS` - Chunks read per streaming pass (default: 64)
//! - `ISYNTAX_MAX_CHUNKS_TO_CHECK` - Chunk candidates collected per pass (default: 512)
//! - `ISYNTAX_CHUNK_IO_BUDGET_MS` - Wall-clock budget for chunk reads (default: 200)
//! - `ISYNTAX_GREEDY` - Also preload the next finer level (default: false)
//! - `ISYNTAX_ASYNC_QUEUE_FACTOR` - Async dispatch threshold per worker (default: 10)
//! - `ISYNTAX_BACKLOG_FACTOR` - Backlog stop threshold per worker (default: 4)
//! - `ISYNTAX_MAX_RESIDENT_CHUNKS` - Resident chunk LRU bound (default: 2048)
//! - `ISYNTAX_MAX_COEFF_BLOCKS` - Cap on coefficient blocks per pool (default: unbounded)
//! - `ISYNTAX_BLOCKS_PER_BATCH` - Blocks allocated per pool growth step (default: 64)
//! - `ISYNTAX_WORKERS` - Worker threads (default: available parallelism)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::codec::CompressorVersion;
use crate::io::DEFAULT_MAX_RESIDENT_CHUNKS;
use crate::tile::{DEFAULT_BLOCKS_PER_BATCH, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Default Values
// =============================================================================

/// Tiles added on every side of the visible region.
pub const DEFAULT_PADDING: i32 = 5;

/// Maximum chunks read in one streaming pass.
pub const DEFAULT_MAX_CHUNKS_PER_PASS: usize = 64;

/// Maximum chunk candidates collected in one streaming pass.
pub const DEFAULT_MAX_CHUNKS_TO_CHECK: usize = 512;

/// Wall-clock budget for the chunk read phase, in milliseconds.
pub const DEFAULT_CHUNK_IO_BUDGET_MS: u64 = 200;

/// Dispatch async while fewer than `workers x factor` tasks wait.
pub const DEFAULT_ASYNC_QUEUE_FACTOR: usize = 10;

/// Stop dispatching reconstructions once more than `workers x factor` tasks wait.
pub const DEFAULT_BACKLOG_FACTOR: usize = 4;

/// Default number of streaming passes the CLI runs before giving up.
pub const DEFAULT_MAX_PASSES: usize = 1024;

/// Number of worker threads when none is configured.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// iSyntax Streamer - tile pyramid streaming and wavelet reconstruction.
#[derive(Parser, Debug, Clone)]
#[command(name = "isyntax-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Stream a viewport of a slide and write every reconstructed tile as JPEG.
    Render(RenderConfig),

    /// Write a synthetic slide and its geometry description.
    Synth(SynthConfig),
}

impl Cli {
    pub fn into_command(self) -> (Command, bool) {
        (self.command, self.verbose)
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Tunables of the streaming engine.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    /// Tiles added around the visible region on every side.
    #[arg(long, default_value_t = DEFAULT_PADDING, env = "ISYNTAX_PADDING")]
    pub padding: i32,

    /// Maximum chunks read from the file in one pass.
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNKS_PER_PASS, env = "ISYNTAX_MAX_CHUNKS_PER_PASS")]
    pub max_chunks_per_pass: usize,

    /// Maximum chunk candidates collected in one pass.
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNKS_TO_CHECK, env = "ISYNTAX_MAX_CHUNKS_TO_CHECK")]
    pub max_chunks_to_check: usize,

    /// Wall-clock budget for reading chunks in one pass, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CHUNK_IO_BUDGET_MS, env = "ISYNTAX_CHUNK_IO_BUDGET_MS")]
    pub chunk_io_budget_ms: u64,

    /// Also preload one level finer than the visible one.
    #[arg(long = "greedy", default_value_t = false, env = "ISYNTAX_GREEDY")]
    pub load_next_level_greedily: bool,

    /// Dispatch to workers while fewer than `workers x factor` tasks wait.
    #[arg(long, default_value_t = DEFAULT_ASYNC_QUEUE_FACTOR, env = "ISYNTAX_ASYNC_QUEUE_FACTOR")]
    pub async_queue_factor: usize,

    /// Stop a pass once more than `workers x factor` tasks wait.
    #[arg(long, default_value_t = DEFAULT_BACKLOG_FACTOR, env = "ISYNTAX_BACKLOG_FACTOR")]
    pub backlog_factor: usize,

    /// Maximum data chunks kept resident (LRU).
    #[arg(long, default_value_t = DEFAULT_MAX_RESIDENT_CHUNKS, env = "ISYNTAX_MAX_RESIDENT_CHUNKS")]
    pub max_resident_chunks: usize,

    /// Cap on live coefficient blocks per pool. Unbounded if not set.
    #[arg(long, env = "ISYNTAX_MAX_COEFF_BLOCKS")]
    pub max_coefficient_blocks: Option<usize>,

    /// Coefficient blocks allocated together when a pool grows.
    #[arg(long, default_value_t = DEFAULT_BLOCKS_PER_BATCH, env = "ISYNTAX_BLOCKS_PER_BATCH")]
    pub blocks_per_batch: usize,

    /// Worker threads. Defaults to the available parallelism.
    #[arg(long = "workers", env = "ISYNTAX_WORKERS")]
    pub worker_threads: Option<usize>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
            max_chunks_per_pass: DEFAULT_MAX_CHUNKS_PER_PASS,
            max_chunks_to_check: DEFAULT_MAX_CHUNKS_TO_CHECK,
            chunk_io_budget_ms: DEFAULT_CHUNK_IO_BUDGET_MS,
            load_next_level_greedily: false,
            async_queue_factor: DEFAULT_ASYNC_QUEUE_FACTOR,
            backlog_factor: DEFAULT_BACKLOG_FACTOR,
            max_resident_chunks: DEFAULT_MAX_RESIDENT_CHUNKS,
            max_coefficient_blocks: None,
            blocks_per_batch: DEFAULT_BLOCKS_PER_BATCH,
            worker_threads: None,
        }
    }
}

impl StreamerConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.padding < 0 {
            return Err("padding must not be negative".to_string());
        }
        if self.max_chunks_per_pass == 0 {
            return Err("max_chunks_per_pass must be greater than 0".to_string());
        }
        if self.max_chunks_to_check < self.max_chunks_per_pass {
            return Err("max_chunks_to_check must be at least max_chunks_per_pass".to_string());
        }
        if self.async_queue_factor == 0 || self.backlog_factor == 0 {
            return Err("queue factors must be greater than 0".to_string());
        }
        if self.max_resident_chunks == 0 {
            return Err("max_resident_chunks must be greater than 0".to_string());
        }
        if self.max_coefficient_blocks == Some(0) {
            return Err("max_coefficient_blocks must be greater than 0".to_string());
        }
        if self.blocks_per_batch == 0 {
            return Err("blocks_per_batch must be greater than 0".to_string());
        }
        if self.worker_threads == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn chunk_io_budget(&self) -> Duration {
        Duration::from_millis(self.chunk_io_budget_ms)
    }

    pub fn workers(&self) -> usize {
        self.worker_threads.unwrap_or_else(default_worker_threads)
    }
}

// =============================================================================
// Render Command
// =============================================================================

/// Arguments of the `render` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Slide data file.
    #[arg(long)]
    pub slide: PathBuf,

    /// Geometry description (JSON) of the slide.
    #[arg(long)]
    pub geometry: PathBuf,

    /// Directory that receives `<scale>/<x>_<y>.jpg` tiles.
    #[arg(short, long, default_value = "tiles")]
    pub output: PathBuf,

    /// Viewport centre X in micrometres. Defaults to the slide centre.
    #[arg(long)]
    pub center_x: Option<f32>,

    /// Viewport centre Y in micrometres. Defaults to the slide centre.
    #[arg(long)]
    pub center_y: Option<f32>,

    /// Viewport width in micrometres. Defaults to the whole slide.
    #[arg(long)]
    pub width_um: Option<f32>,

    /// Viewport height in micrometres. Defaults to the whole slide.
    #[arg(long)]
    pub height_um: Option<f32>,

    /// Zoom level (lowest visible scale).
    #[arg(long, default_value_t = 0)]
    pub zoom: i32,

    /// JPEG quality for written tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "ISYNTAX_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Maximum streaming passes before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
    pub max_passes: usize,

    #[command(flatten)]
    pub streamer: StreamerConfig,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.max_passes == 0 {
            return Err("max_passes must be greater than 0".to_string());
        }
        if self.width_um.is_some_and(|w| w <= 0.0) || self.height_um.is_some_and(|h| h <= 0.0) {
            return Err("viewport size must be positive".to_string());
        }
        self.streamer.validate()
    }
}

// =============================================================================
// Synth Command
// =============================================================================

/// Arguments of the `synth` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SynthConfig {
    /// Output slide data file.
    #[arg(long)]
    pub slide: PathBuf,

    /// Output geometry description (JSON).
    #[arg(long)]
    pub geometry: PathBuf,

    /// Coefficients per codeblock row and column.
    #[arg(long, default_value_t = 64)]
    pub block_size: u32,

    /// Coarsest scale of the pyramid.
    #[arg(long, default_value_t = 5)]
    pub max_scale: u32,

    /// Level 0 width in tiles.
    #[arg(long, default_value_t = 32)]
    pub width_in_tiles: u32,

    /// Level 0 height in tiles.
    #[arg(long, default_value_t = 32)]
    pub height_in_tiles: u32,

    /// Fill every tile with flat grey instead of a test pattern.
    #[arg(long, default_value_t = false)]
    pub flat: bool,

    /// Codeblock compressor version to write (1 or 2).
    #[arg(long, default_value_t = 1)]
    pub compressor_version: u8,
}

impl SynthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size < 4 || self.block_size % 8 != 0 {
            return Err("block_size must be a multiple of 8".to_string());
        }
        if self.width_in_tiles == 0 || self.height_in_tiles == 0 {
            return Err("level 0 must have at least one tile".to_string());
        }
        if self.compressor().is_none() {
            return Err("compressor_version must be 1 or 2".to_string());
        }
        Ok(())
    }

    /// The requested compressor version, if supported.
    pub fn compressor(&self) -> Option<CompressorVersion> {
        match self.compressor_version {
            1 => Some(CompressorVersion::V1),
            2 => Some(CompressorVersion::V2),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.padding, 5);
        assert_eq!(config.max_chunks_per_pass, 64);
        assert_eq!(config.chunk_io_budget(), Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = StreamerConfig::default();
        config.padding = -1;
        assert!(config.validate().unwrap_err().contains("padding"));

        let mut config = StreamerConfig::default();
        config.max_chunks_to_check = 10;
        assert!(config.validate().is_err());

        let mut config = StreamerConfig::default();
        config.backlog_factor = 0;
        assert!(config.validate().is_err());

        let mut config = StreamerConfig::default();
        config.worker_threads = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workers_default() {
        let mut config = StreamerConfig::default();
        assert!(config.workers() >= 1);
        config.worker_threads = Some(3);
        assert_eq!(config.workers(), 3);
    }

    #[test]
    fn test_parse_render_command() {
        let cli = Cli::try_parse_from([
            "isyntax-streamer",
            "render",
            "--slide",
            "slide.bin",
            "--geometry",
            "slide.json",
            "--zoom",
            "2",
            "--padding",
            "3",
            "--greedy",
        ])
        .unwrap();

        let (command, verbose) = cli.into_command();
        assert!(!verbose);
        let Command::Render(render) = command else {
            panic!("expected render command");
        };
        assert_eq!(render.zoom, 2);
        assert_eq!(render.streamer.padding, 3);
        assert!(render.streamer.load_next_level_greedily);
        assert!(render.validate().is_ok());
    }

    #[test]
    fn test_parse_synth_command() {
        let cli = Cli::try_parse_from([
            "isyntax-streamer",
            "-v",
            "synth",
            "--slide",
            "out.bin",
            "--geometry",
            "out.json",
            "--flat",
        ])
        .unwrap();

        let (command, verbose) = cli.into_command();
        assert!(verbose);
        let Command::Synth(synth) = command else {
            panic!("expected synth command");
        };
        assert!(synth.flat);
        assert_eq!(synth.block_size, 64);
        assert_eq!(synth.compressor(), Some(CompressorVersion::V1));
        assert!(synth.validate().is_ok());
    }

    #[test]
    fn test_synth_compressor_version() {
        let parse = |version: &str| {
            let cli = Cli::try_parse_from([
                "isyntax-streamer",
                "synth",
                "--slide",
                "out.bin",
                "--geometry",
                "out.json",
                "--compressor-version",
                version,
            ])
            .unwrap();
            let Command::Synth(synth) = cli.into_command().0 else {
                panic!("expected synth command");
            };
            synth
        };

        assert_eq!(parse("2").compressor(), Some(CompressorVersion::V2));
        assert!(parse("3").validate().is_err());
    }

    #[test]
    fn test_render_rejects_bad_quality() {
        let cli = Cli::try_parse_from([
            "isyntax-streamer",
            "render",
            "--slide",
            "a",
            "--geometry",
            "b",
            "--jpeg-quality",
            "0",
        ])
        .unwrap();
        let (Command::Render(render), _) = cli.into_command() else {
            panic!("expected render command");
        };
        assert!(render.validate().is_err());
    }
}
