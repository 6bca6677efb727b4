//! flop: a GPU-accelerated perceptual image-difference engine.
//!
//! Given a reference and a test image of identical dimensions, an analysis
//! produces a per-pixel error map in [0, 1] approximating the perceived
//! difference under foveated viewing (the FLIP metric, Andersson et al.
//! 2020), a 32-bin histogram of that error, and optionally a color-mapped
//! visualization written to disk.
//!
//! The pipeline runs on one Vulkan device: sources are transformed into a
//! linearized opponent color space, pre-filtered by contrast-sensitivity
//! Gaussians, compared with a modified HyAB distance, and amplified where
//! edge or point features differ. A single bindless descriptor set serves
//! every pass; shaders pick their resources by push-constant index.
//!
//! ```no_run
//! use std::path::Path;
//! use flop::{AnalyzeRequest, Context, ContextOptions};
//!
//! let mut context = Context::new(&ContextOptions::default())?;
//! let summary = context.analyze(&AnalyzeRequest::new(
//!     Path::new("reference.png"),
//!     Path::new("test.png"),
//! ))?;
//! println!("{}x{} in {} ms", summary.width, summary.height, summary.milliseconds_elapsed);
//! # Ok::<(), flop::Error>(())
//! ```

pub mod alloc;
pub mod analysis;
pub mod buffer;
pub mod capi;
pub mod colormap;
pub mod context;
pub mod device;
pub mod error;
pub mod fullscreen;
pub mod handle;
pub mod image;
pub mod instance;
pub mod kernel;
pub mod shaders;

pub use analysis::{AnalyzeRequest, Summary, Tonemap, HISTOGRAM_BINS};
pub use capi::FlopSummary;
pub use colormap::ColorMap;
pub use context::{Context, ContextOptions};
pub use error::{Error, Result};
