//! exam-recombiner - Shuffle and repack scanned exam pages
//!
//! Takes object-detector output for scanned exam pages (headers, passages,
//! question blocks, question numbers, figures, footers), cleans it up, groups
//! it into problem sets, shuffles them reproducibly, and lays them out again
//! as a new paginated PDF with an exact placement map.
//!
//! # Pipeline
//!
//! 1. [`detection`] - confidence/area filtering, per-class NMS, split-block
//!    merging, column assignment, question number and figure linking
//! 2. [`grouping`] - state machine turning the ordered stream into logical units
//! 3. [`shuffle`] - seeded two-level shuffle under structural constraints
//! 4. [`layout`] - greedy one/two-column flow layout onto a PDF
//!
//! # Example
//!
//! ```rust,no_run
//! use exam_recombiner::{Pipeline, RecombineConfig, SilentProgress};
//! use std::path::Path;
//!
//! let mut config = RecombineConfig::default();
//! config.shuffle.seed = Some(42);
//!
//! let result = Pipeline::new(config)
//!     .run(Path::new("annotations.json"), Path::new("out/exam.pdf"), &SilentProgress)
//!     .unwrap();
//! println!("placed {} images", result.placed_items);
//! ```

pub mod cli;
pub mod config;
pub mod crop;
pub mod detection;
pub mod geometry;
pub mod grouping;
pub mod layout;
pub mod pipeline;
pub mod shuffle;

pub use config::{ConfigError, ConfigOverrides, RecombineConfig, ShuffleConfig};
pub use crop::{CropCounter, CropError, FileCropper, ImageCropper, ImageRef};
pub use detection::{
    process_page, Detection, DetectionError, DetectionOptions, Label, LinkedDetection,
    PageAnnotations, PageSize,
};
pub use geometry::{BBox, Point};
pub use grouping::{group_units, Component, LogicalUnit};
pub use layout::{
    layout_units, LayoutError, LayoutOptions, PageCanvas, PdfCanvas, PlacementItem, PlacementMap,
};
pub use pipeline::{Pipeline, PipelineError, PipelineResult, ProgressCallback, SilentProgress};
pub use shuffle::{shuffle_units, ShuffleEngine};
