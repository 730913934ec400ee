//! Viewport-driven streaming.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  set_viewport / stream   ┌──────────────────────┐
//! │    viewer    │ ───────────────────────► │     TileStreamer     │
//! └──────────────┘                          │  (coalesced session) │
//!                                           └──────────┬───────────┘
//!                                                      │ run_pass
//!                  ┌───────────────────────────────────┼───────────────┐
//!                  ▼                                   ▼               ▼
//!          ┌──────────────┐                  ┌──────────────┐  ┌──────────────┐
//!          │  first load  │                  │ load regions │  │   dispatch   │
//!          │ (top chunks) │                  │ + escalation │  │  WorkQueue   │
//!          └──────────────┘                  └──────────────┘  └──────────────┘
//! ```
//!
//! The first pass over a slide only runs the first load. Every later pass
//! picks the visible tile nearest the viewport centre, pulls in what it and
//! its ancestors need, and reconstructs whatever became ready.

mod dispatch;
mod first_load;
mod region;
mod scheduler;
mod viewport;

pub use dispatch::{
    begin_decompress_h_coeff, begin_load_tile, run_decompress_task, run_load_task, DispatchPolicy,
};
pub use first_load::{begin_first_load, do_first_load, FirstLoadStats};
pub use region::{escalate_ll_requirements, LoadRegion, TileRequirement};
pub use scheduler::{PassStats, StreamRequest, StreamSummary, TileStreamer};
pub use viewport::{world_bounds_to_tile_bounds, Bounds2f, Bounds2i, Viewport};
