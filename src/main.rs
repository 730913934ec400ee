//! iSyntax Streamer - tile pyramid streaming and wavelet reconstruction.
//!
//! This binary renders a viewport of a slide to JPEG tiles, or writes a
//! synthetic slide to disk.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use isyntax_streamer::{
    build_synthetic_slide,
    config::{Cli, Command, RenderConfig, SynthConfig},
    FileRangeReader, JpegDirSink, PyramidGeometry, Slide, SynthContent, SynthOptions,
    TileStreamer, TokioWorkQueue, Viewport, WorkQueue,
};

// The worker pool owns its own runtime, so main stays synchronous.
fn main() -> ExitCode {
    let cli = Cli::parse();
    let (command, verbose) = cli.into_command();
    init_logging(verbose);

    match command {
        Command::Render(config) => run_render(config),
        Command::Synth(config) => run_synth(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "isyntax_streamer=debug"
    } else {
        "isyntax_streamer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Render Command
// =============================================================================

fn run_render(config: RenderConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let geometry = match std::fs::read_to_string(&config.geometry)
        .map_err(|e| e.to_string())
        .and_then(|json| PyramidGeometry::from_json(&json).map_err(|e| e.to_string()))
    {
        Ok(geometry) => geometry,
        Err(e) => {
            error!("Failed to load geometry {}: {}", config.geometry.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let reader = match FileRangeReader::open(&config.slide) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Failed to open slide {}: {}", config.slide.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let sink = Arc::new(JpegDirSink::new(&config.output, config.jpeg_quality));
    let slide = match Slide::open(0, geometry, Box::new(reader), sink.clone(), &config.streamer) {
        Ok(slide) => slide,
        Err(e) => {
            error!("Invalid slide geometry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(viewport) = build_viewport(&config, &slide) else {
        error!("Slide has no level 0");
        return ExitCode::FAILURE;
    };

    let workers = config.streamer.workers();
    let pool = match TokioWorkQueue::new(workers) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            error!("Failed to start worker pool: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Slide: {}", config.slide.display());
    info!("  Output: {}", config.output.display());
    info!("  Workers: {}", workers);
    info!(
        "  Viewport: centre ({:.1}, {:.1}) um, zoom {}",
        viewport.center[0], viewport.center[1], viewport.zoom_level
    );

    let start = Instant::now();
    let queue: Arc<dyn WorkQueue> = pool.clone();
    let streamer = TileStreamer::new(slide, queue, config.streamer.clone());
    let summary = streamer.run_until_idle(&viewport, config.max_passes, || pool.wait_idle());
    pool.wait_idle();
    drop(streamer);

    info!(
        "Rendered {} tiles in {} passes ({} chunks read) in {:.2}s",
        sink.written(),
        summary.passes,
        summary.chunks_read,
        start.elapsed().as_secs_f64()
    );
    if !summary.converged {
        warn!(
            "Stopped after {} passes with work remaining; raise --max-passes to continue",
            summary.passes
        );
    }
    if sink.failed() > 0 {
        error!("{} tiles could not be written", sink.failed());
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Viewport from the command line, defaulting to the whole slide.
fn build_viewport(config: &RenderConfig, slide: &Slide) -> Option<Viewport> {
    let whole = Viewport::whole_level(slide.level(0)?, config.zoom);
    let center = [
        config.center_x.unwrap_or(whole.center[0]),
        config.center_y.unwrap_or(whole.center[1]),
    ];
    let width = config
        .width_um
        .unwrap_or(whole.bounds.max[0] - whole.bounds.min[0]);
    let height = config
        .height_um
        .unwrap_or(whole.bounds.max[1] - whole.bounds.min[1]);
    Some(Viewport::centered(center, width, height, config.zoom))
}

// =============================================================================
// Synth Command
// =============================================================================

fn run_synth(config: SynthConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let options = SynthOptions {
        block_width: config.block_size,
        block_height: config.block_size,
        max_scale: config.max_scale,
        level0_width_in_tiles: config.width_in_tiles,
        level0_height_in_tiles: config.height_in_tiles,
        content: if config.flat {
            SynthContent::Flat
        } else {
            SynthContent::Pattern
        },
        compressor_version: config.compressor().unwrap_or_default(),
        ..SynthOptions::default()
    };

    let synthetic = match build_synthetic_slide(&options) {
        Ok(synthetic) => synthetic,
        Err(e) => {
            error!("Failed to build synthetic slide: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let json = match synthetic.geometry.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize geometry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&config.slide, &synthetic.data) {
        error!("Failed to write {}: {}", config.slide.display(), e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = std::fs::write(&config.geometry, json) {
        error!("Failed to write {}: {}", config.geometry.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "Wrote {} ({} bytes, {} levels, {} chunks) and {}",
        config.slide.display(),
        synthetic.data.len(),
        synthetic.geometry.levels.len(),
        synthetic.geometry.data_chunks.len(),
        config.geometry.display()
    );
    ExitCode::SUCCESS
}
