//! Detection post-processing
//!
//! Cleans raw object-detector boxes for a scanned exam page and links them
//! spatially:
//!
//! - Per-class confidence / area / aspect filtering
//! - Per-class greedy NMS
//! - Merging of vertically split question blocks
//! - Column assignment by a two-cluster split of x-centers
//! - Question number → question block linking, figure → host attachment
//!
//! Pages are independent, so [`process_page`] can run on parallel workers.

mod associate;
mod clean;
mod types;

pub use associate::{
    associate_page, column_threshold, flatten_pages, ColumnSplit, KMeans2, MedianSplit,
    ScalarSplitter,
};
pub use clean::{clean_page, merge_adjacent_blocks, nms_per_class, non_max_suppression, passes_filter};
pub use types::{
    Detection, DetectionError, DetectionId, DetectionOptions, DetectionOptionsBuilder, Label,
    LinkedDetection, PageAnnotations, PageSize, RawAnnotation, DEFAULT_CONFIDENCE,
    FALLBACK_PAGE_SIZE,
};

/// Clean and associate one page
pub fn process_page(
    page: &PageAnnotations,
    page_index: usize,
    page_size: PageSize,
    options: &DetectionOptions,
) -> Vec<LinkedDetection> {
    let cleaned = clean_page(page, page_index, page_size, options);
    associate_page(cleaned, page_size, options, &KMeans2::default())
}
