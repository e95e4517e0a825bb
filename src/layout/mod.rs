//! Flow layout and document output
//!
//! Packs shuffled logical units onto fixed-size pages:
//!
//! - One or two columns, greedy top-to-bottom fill
//! - Column then page overflow, headers kept with their passages
//! - Question numbers stamped on question blocks
//! - Figure attachments directly below their host
//! - Exact placement map of every image
//!
//! # Example
//!
//! ```rust,no_run
//! use exam_recombiner::layout::{layout_units, LayoutOptions, PdfCanvas};
//!
//! let options = LayoutOptions::builder().two_column(false).build();
//! let mut canvas = PdfCanvas::new();
//! let map = layout_units(&[], &mut canvas, &options).unwrap();
//! canvas.save(std::path::Path::new("out.pdf")).unwrap();
//! println!("{} items", map.item_count());
//! ```

mod flow;
mod pdf;
mod types;

pub use flow::{layout_units, FlowLayout, PageCanvas};
pub use pdf::PdfCanvas;
pub use types::{
    LayoutError, LayoutOptions, LayoutOptionsBuilder, PlacementItem, PlacementMap, PlacementPage,
    Rect, ATTACHMENT_TYPE, DEFAULT_HEADER_Y, DEFAULT_LINE_WIDTH, DEFAULT_MARGIN, DEFAULT_PAGE_SIZE,
    DEFAULT_SPACING,
};
