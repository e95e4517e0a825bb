//! Detection Cleaner
//!
//! Turns one page of raw detector records into a cleaned detection list:
//!
//! 1. **Filter**: per-label confidence, area ratio, question number aspect
//! 2. **NMS**: greedy per-class non-maximum suppression
//! 3. **Merge**: re-join question blocks the detector split vertically
//!
//! Malformed records are logged and dropped; nothing here fails the page.

use tracing::{debug, warn};

use super::types::{Detection, DetectionOptions, Label, PageAnnotations, PageSize};
use crate::crop::ImageRef;

/// Clean one page of detector output.
///
/// Output order: merged question blocks in (y, x) order, followed by the
/// remaining classes in order of first appearance, each in NMS-kept order.
pub fn clean_page(
    page: &PageAnnotations,
    page_index: usize,
    page_size: PageSize,
    options: &DetectionOptions,
) -> Vec<Detection> {
    let source = ImageRef::new(&page.image_path);

    let mut survivors = Vec::with_capacity(page.annotations.len());
    for (index, raw) in page.annotations.iter().enumerate() {
        match Detection::from_raw(raw, page_index, index, &source) {
            Ok(det) => {
                if passes_filter(&det, page_size, options) {
                    survivors.push(det);
                }
            }
            Err(e) => warn!("Dropping detection: {}", e),
        }
    }
    let filtered_count = survivors.len();

    let kept = nms_per_class(survivors, options.nms_iou);
    let kept_count = kept.len();

    let (blocks, others): (Vec<_>, Vec<_>) = kept
        .into_iter()
        .partition(|d| d.label == Label::QuestionBlock);
    let mut cleaned = merge_adjacent_blocks(
        blocks,
        options.merge_x_overlap,
        options.merge_max_vgap(page_size.height),
    );
    cleaned.extend(others);

    debug!(
        "Page {}: {} raw, {} after filter, {} after NMS, {} after merge",
        page_index,
        page.annotations.len(),
        filtered_count,
        kept_count,
        cleaned.len()
    );

    cleaned
}

/// Confidence / area / aspect filter. A rejection here is not an error.
pub fn passes_filter(det: &Detection, page_size: PageSize, options: &DetectionOptions) -> bool {
    if det.confidence < options.min_confidence_for(&det.label) {
        return false;
    }

    let area_ratio = det.bbox.area() / page_size.area().max(1.0);
    if area_ratio < options.area_ratio_floor {
        return false;
    }

    if det.label == Label::QuestionNumber {
        let w = det.bbox.width();
        let h = det.bbox.height();
        let aspect = w.max(h) / w.min(h).max(1.0);
        if aspect > options.qn_aspect_max {
            return false;
        }
    }

    true
}

/// Greedy NMS over a single class.
///
/// Sorts by descending confidence (stable, so ties keep input order) and keeps a
/// box only if its IoU with every kept box is below `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep
            .iter()
            .all(|kept| det.bbox.iou(&kept.bbox) < iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

/// Run NMS independently per label. Groups are emitted in order of the
/// label's first appearance in the input.
pub fn nms_per_class(detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    let mut groups: Vec<(Label, Vec<Detection>)> = Vec::new();
    for det in detections {
        match groups.iter_mut().find(|(label, _)| *label == det.label) {
            Some((_, group)) => group.push(det),
            None => groups.push((det.label.clone(), vec![det])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(_, group)| non_max_suppression(group, iou_threshold))
        .collect()
}

/// Merge vertically adjacent question blocks that were split by the detector.
///
/// Blocks are scanned in (y_min, x_min) order and each one is folded into the
/// previously kept block when the horizontal overlap covers at least
/// `x_overlap_ratio` of the previous block's width and the vertical gap is in
/// `[0, max_vgap]`. A merged block may absorb further blocks in the same scan.
pub fn merge_adjacent_blocks(
    mut blocks: Vec<Detection>,
    x_overlap_ratio: f64,
    max_vgap: f64,
) -> Vec<Detection> {
    blocks.sort_by(|a, b| {
        a.bbox
            .y_min
            .total_cmp(&b.bbox.y_min)
            .then(a.bbox.x_min.total_cmp(&b.bbox.x_min))
    });

    let mut merged: Vec<Detection> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let Some(last) = merged.last_mut() else {
            merged.push(block);
            continue;
        };

        let overlap = last.bbox.horizontal_overlap(&block.bbox);
        let width_ref = last.bbox.width().max(1.0);
        let vgap = block.bbox.y_min - last.bbox.y_max;

        if overlap / width_ref >= x_overlap_ratio && (0.0..=max_vgap).contains(&vgap) {
            debug!(
                "Merging question block {:?} into {:?} (gap {:.1}px)",
                block.id, last.id, vgap
            );
            last.bbox = last.bbox.union(&block.bbox);
        } else {
            merged.push(block);
        }
    }
    merged
}
