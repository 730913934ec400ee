//! End-to-end rendering tests.
//!
//! Tests verify the path the `render` command takes:
//! - Synthetic slide and geometry JSON written to disk and read back
//! - Chunks read through the file reader
//! - Every reconstructed tile written as a decodable JPEG

use std::sync::Arc;

use isyntax_streamer::io::FileRangeReader;
use isyntax_streamer::queue::{TokioWorkQueue, WorkQueue};
use isyntax_streamer::slide::{build_synthetic_slide, PyramidGeometry, Slide, SynthOptions};
use isyntax_streamer::stream::{TileStreamer, Viewport};
use isyntax_streamer::tile::{JpegDirSink, TileSink};
use isyntax_streamer::StreamerConfig;

#[test]
fn test_render_synthetic_slide_to_jpeg_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let slide_path = dir.path().join("slide.bin");
    let geometry_path = dir.path().join("slide.json");
    let output = dir.path().join("tiles");

    let synthetic = build_synthetic_slide(&SynthOptions::default()).unwrap();
    std::fs::write(&slide_path, &synthetic.data).unwrap();
    std::fs::write(&geometry_path, synthetic.geometry.to_json().unwrap()).unwrap();

    let json = std::fs::read_to_string(&geometry_path).unwrap();
    let geometry = PyramidGeometry::from_json(&json).unwrap();
    assert_eq!(geometry, synthetic.geometry);

    let config = StreamerConfig::default();
    let sink = Arc::new(JpegDirSink::new(&output, 90));
    let slide = Slide::open(
        1,
        geometry,
        Box::new(FileRangeReader::open(&slide_path).unwrap()),
        sink.clone() as Arc<dyn TileSink>,
        &config,
    )
    .unwrap();

    let pool = Arc::new(TokioWorkQueue::new(2).unwrap());
    let queue: Arc<dyn WorkQueue> = pool.clone();
    let viewport = Viewport::whole_level(slide.level(0).unwrap(), 0);
    let streamer = TileStreamer::new(slide.clone(), queue, config);
    let summary = streamer.run_until_idle(&viewport, 1000, || pool.wait_idle());
    pool.wait_idle();

    assert!(summary.converged);
    assert_eq!(sink.written(), 1 + 4 + 16 + 64);
    assert_eq!(sink.failed(), 0);

    for (scale, x, y) in [(3, 0, 0), (2, 1, 0), (0, 7, 7)] {
        let path = sink.tile_path(scale, x, y);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((image.width(), image.height()), (16, 16));
    }
}
