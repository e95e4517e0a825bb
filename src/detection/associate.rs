//! Spatial Associator
//!
//! Tags each cleaned detection with a column, links question numbers to the
//! question block they label, and attaches figures to their nearest host.

use tracing::debug;

use super::types::{Detection, DetectionOptions, Label, LinkedDetection, PageSize};
use crate::geometry::Point;

/// Maximum refinement rounds for the two-center split
const MAX_KMEANS_ITERATIONS: usize = 100;

// ============================================================
// Two-cluster split of scalars
// ============================================================

/// Result of splitting x-centers into two columns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSplit {
    /// Values below this are column 0
    pub threshold: f64,
    /// Reference value of the left cluster
    pub left_center: f64,
}

/// Capability: split a scalar sequence into two clusters
pub trait ScalarSplitter {
    /// Returns `None` for empty input
    fn split(&self, values: &[f64]) -> Option<ColumnSplit>;
}

/// Deterministic 1-D k-means with k = 2.
///
/// Centers start at the minimum and maximum value. When the data has fewer
/// than two distinct values (or a cluster empties) it falls back to
/// [`MedianSplit`].
#[derive(Debug, Clone, Copy)]
pub struct KMeans2 {
    pub max_iterations: usize,
}

impl Default for KMeans2 {
    fn default() -> Self {
        Self {
            max_iterations: MAX_KMEANS_ITERATIONS,
        }
    }
}

impl ScalarSplitter for KMeans2 {
    fn split(&self, values: &[f64]) -> Option<ColumnSplit> {
        let mut xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if xs.is_empty() {
            return None;
        }
        xs.sort_by(f64::total_cmp);

        let mut left = xs[0];
        let mut right = xs[xs.len() - 1];
        if left == right {
            return MedianSplit.split(&xs);
        }

        for _ in 0..self.max_iterations {
            let (mut left_sum, mut left_n) = (0.0, 0usize);
            let (mut right_sum, mut right_n) = (0.0, 0usize);
            for &x in &xs {
                if (x - left).abs() <= (x - right).abs() {
                    left_sum += x;
                    left_n += 1;
                } else {
                    right_sum += x;
                    right_n += 1;
                }
            }
            if left_n == 0 || right_n == 0 {
                return MedianSplit.split(&xs);
            }

            let new_left = left_sum / left_n as f64;
            let new_right = right_sum / right_n as f64;
            let converged = new_left == left && new_right == right;
            left = new_left;
            right = new_right;
            if converged {
                break;
            }
        }

        let (lo, hi) = if left <= right { (left, right) } else { (right, left) };
        Some(ColumnSplit {
            threshold: (lo + hi) / 2.0,
            left_center: lo,
        })
    }
}

/// Median split: threshold at the upper median, reference at the minimum
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianSplit;

impl ScalarSplitter for MedianSplit {
    fn split(&self, values: &[f64]) -> Option<ColumnSplit> {
        let mut xs: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if xs.is_empty() {
            return None;
        }
        xs.sort_by(f64::total_cmp);
        Some(ColumnSplit {
            threshold: xs[xs.len() / 2],
            left_center: xs[0],
        })
    }
}

// ============================================================
// Association
// ============================================================

/// Column threshold for a page: split of non-footer x-centers, or `W / 2`
/// when there is nothing to split.
pub fn column_threshold(
    detections: &[Detection],
    page_size: PageSize,
    splitter: &dyn ScalarSplitter,
) -> f64 {
    let centers: Vec<f64> = detections
        .iter()
        .filter(|d| d.label != Label::Footer)
        .map(|d| d.bbox.center().x)
        .collect();
    splitter
        .split(&centers)
        .map(|s| s.threshold)
        .unwrap_or(page_size.width / 2.0)
}

/// Associate one cleaned page.
///
/// Returns every detection (question numbers and figures included, so the
/// caller can see them) as a [`LinkedDetection`], sorted by
/// (column, y_min, x_min).
pub fn associate_page(
    detections: Vec<Detection>,
    page_size: PageSize,
    options: &DetectionOptions,
    splitter: &dyn ScalarSplitter,
) -> Vec<LinkedDetection> {
    let threshold = column_threshold(&detections, page_size, splitter);

    let mut linked: Vec<LinkedDetection> = detections
        .into_iter()
        .map(|d| {
            let column = if d.bbox.center().x < threshold { 0 } else { 1 };
            LinkedDetection::new(d, column)
        })
        .collect();

    let blocks = indices_of(&linked, &Label::QuestionBlock);
    let passages = indices_of(&linked, &Label::Passage);
    let numbers = indices_of(&linked, &Label::QuestionNumber);
    let figures = indices_of(&linked, &Label::Figure);

    let gate = options.qn_link_gate(page_size.height);
    let mut unlinked = 0usize;
    for &qn in &numbers {
        match find_number_host(&linked, &blocks, qn, gate) {
            Some(host) => {
                let child = linked[qn].detection.clone();
                linked[host].children.push(child);
            }
            None => unlinked += 1,
        }
    }

    let hosts: Vec<usize> = blocks.iter().chain(passages.iter()).copied().collect();
    let mut orphan_figures = 0usize;
    for &fig in &figures {
        let center = linked[fig].bbox().center();
        match nearest(&linked, &hosts, &center) {
            Some((host, _)) => {
                let attachment = linked[fig].detection.clone();
                linked[host].attachments.push(attachment);
            }
            None => orphan_figures += 1,
        }
    }

    linked.sort_by(|a, b| {
        a.column
            .cmp(&b.column)
            .then(a.bbox().y_min.total_cmp(&b.bbox().y_min))
            .then(a.bbox().x_min.total_cmp(&b.bbox().x_min))
    });

    debug!(
        "Column threshold {:.1}; {} question numbers ({} unlinked), {} figures ({} without host)",
        threshold,
        numbers.len(),
        unlinked,
        figures.len(),
        orphan_figures
    );

    linked
}

fn indices_of(linked: &[LinkedDetection], label: &Label) -> Vec<usize> {
    linked
        .iter()
        .enumerate()
        .filter(|(_, l)| l.label() == label)
        .map(|(i, _)| i)
        .collect()
}

/// Host block for a question number.
///
/// Containing blocks win (smallest area, then earliest). Otherwise the nearest
/// block by center distance, searched in the number's column first, accepted
/// only within `gate` pixels.
fn find_number_host(
    linked: &[LinkedDetection],
    blocks: &[usize],
    qn: usize,
    gate: f64,
) -> Option<usize> {
    let center = linked[qn].bbox().center();

    let containing = blocks
        .iter()
        .copied()
        .filter(|&b| linked[b].bbox().contains_point(&center))
        .fold(None::<(usize, f64)>, |best, b| {
            let area = linked[b].bbox().area();
            match best {
                Some((_, best_area)) if best_area <= area => best,
                _ => Some((b, area)),
            }
        });
    if let Some((host, _)) = containing {
        return Some(host);
    }

    let same_column: Vec<usize> = blocks
        .iter()
        .copied()
        .filter(|&b| linked[b].column == linked[qn].column)
        .collect();
    let candidates = if same_column.is_empty() {
        blocks
    } else {
        &same_column[..]
    };

    nearest(linked, candidates, &center)
        .filter(|(_, distance)| *distance <= gate)
        .map(|(host, _)| host)
}

/// Nearest candidate by center distance; ties keep the earlier candidate
fn nearest(linked: &[LinkedDetection], candidates: &[usize], point: &Point) -> Option<(usize, f64)> {
    candidates.iter().copied().fold(None, |best, c| {
        let distance = linked[c].bbox().center().distance_to(point);
        match best {
            Some((_, best_distance)) if best_distance <= distance => best,
            _ => Some((c, distance)),
        }
    })
}

/// Flatten associated pages into the global (page, column, y, x) stream.
/// Pages must already be in page order.
pub fn flatten_pages(pages: Vec<Vec<LinkedDetection>>) -> Vec<LinkedDetection> {
    pages.into_iter().flatten().collect()
}
