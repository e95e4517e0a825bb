//! Detection module core types
//!
//! Raw detector records, validated detections, linked (enriched) detections,
//! and the tuning options shared by the cleaner and the associator.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crop::ImageRef;
use crate::geometry::BBox;

// ============================================================
// Constants
// ============================================================

/// Confidence assumed when the detector omits one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Minimum confidence for labels without an explicit override
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.35;

/// Minimum box area as a fraction of the page area
pub const DEFAULT_AREA_RATIO_FLOOR: f64 = 0.002;

/// Maximum long/short side ratio for question numbers
pub const DEFAULT_QN_ASPECT_MAX: f64 = 5.0;

/// IoU at or above which a lower-confidence box of the same class is suppressed
pub const DEFAULT_NMS_IOU: f64 = 0.5;

/// Horizontal overlap ratio required to merge split question blocks
pub const DEFAULT_MERGE_X_OVERLAP: f64 = 0.6;

/// Maximum vertical gap between split question blocks, as a fraction of page height
pub const DEFAULT_MERGE_MAX_VGAP_RATIO: f64 = 0.03;

/// Question number link gate, as a fraction of page height
pub const DEFAULT_QN_LINK_GATE_RATIO: f64 = 0.1;

/// Lower bound of the question number link gate in pixels
pub const DEFAULT_QN_LINK_GATE_MIN_PX: f64 = 120.0;

/// Page size assumed when neither the record nor the image header provides one
pub const FALLBACK_PAGE_SIZE: (u32, u32) = (2000, 3000);

// ============================================================
// Error Types
// ============================================================

/// Detection parsing error types
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Page {page} annotation {index}: missing label")]
    MissingLabel { page: usize, index: usize },

    #[error("Page {page} annotation {index}: malformed bbox ({reason})")]
    MalformedBox {
        page: usize,
        index: usize,
        reason: String,
    },

    #[error("Page {page} annotation {index}: confidence {value} is not a number in [0, 1]")]
    InvalidConfidence { page: usize, index: usize, value: f64 },
}

// ============================================================
// Labels
// ============================================================

/// Detector class label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Label {
    Header,
    Passage,
    QuestionBlock,
    QuestionNumber,
    Figure,
    Footer,
    /// Any label the detector emits outside the known set
    Other(String),
}

impl Label {
    pub fn as_str(&self) -> &str {
        match self {
            Label::Header => "header",
            Label::Passage => "passage",
            Label::QuestionBlock => "question_block",
            Label::QuestionNumber => "question_number",
            Label::Figure => "figure",
            Label::Footer => "footer",
            Label::Other(name) => name,
        }
    }

    /// Labels folded into a host during association
    pub fn is_linked_child(&self) -> bool {
        matches!(self, Label::QuestionNumber | Label::Figure)
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        match value.as_str() {
            "header" => Label::Header,
            "passage" => Label::Passage,
            "question_block" => Label::QuestionBlock,
            "question_number" => Label::QuestionNumber,
            "figure" => Label::Figure,
            "footer" => Label::Footer,
            _ => Label::Other(value),
        }
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Label::from(value.to_string())
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// Input Records
// ============================================================

/// One detector record as it appears in the annotation file.
///
/// Every field is optional so that a single bad record is dropped
/// instead of failing the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAnnotation {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub bbox: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub text_content: Option<String>,
}

/// Detector output for one page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnnotations {
    pub image_path: PathBuf,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

/// Page raster size in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

// ============================================================
// Detections
// ============================================================

/// Stable identity of a detection: page plus position in the page's input list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetectionId {
    pub page: usize,
    pub index: usize,
}

/// A validated detector box. Immutable once built; links live in [`LinkedDetection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub label: Label,
    pub bbox: BBox,
    pub confidence: f64,
    pub page_index: usize,
    /// Page raster the box was detected on
    pub source: ImageRef,
    pub text_content: String,
}

impl Detection {
    /// Validate a raw record
    pub fn from_raw(
        raw: &RawAnnotation,
        page_index: usize,
        index: usize,
        source: &ImageRef,
    ) -> Result<Self, DetectionError> {
        let label = raw
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(DetectionError::MissingLabel {
                page: page_index,
                index,
            })?;

        let bbox = parse_bbox(raw.bbox.as_ref()).map_err(|reason| DetectionError::MalformedBox {
            page: page_index,
            index,
            reason,
        })?;

        let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DetectionError::InvalidConfidence {
                page: page_index,
                index,
                value: confidence,
            });
        }

        Ok(Self {
            id: DetectionId {
                page: page_index,
                index,
            },
            label: Label::from(label),
            bbox,
            confidence,
            page_index,
            source: source.clone(),
            text_content: raw.text_content.clone().unwrap_or_default(),
        })
    }
}

fn parse_bbox(value: Option<&serde_json::Value>) -> Result<BBox, String> {
    let value = value.ok_or_else(|| "missing".to_string())?;
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected an array, got {}", value))?;
    let coords: Vec<f64> = items
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric coordinate {}", v)))
        .collect::<Result<_, _>>()?;
    if coords.len() != 4 {
        return Err(format!("expected 4 coordinates, got {}", coords.len()));
    }
    BBox::from_slice(&coords).ok_or_else(|| format!("invalid corners {:?}", coords))
}

/// A detection after spatial association: column tag plus owned links.
///
/// `children` holds question numbers (question blocks only) and
/// `attachments` holds figures (question blocks and passages only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedDetection {
    pub detection: Detection,
    pub column: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Detection>,
}

impl LinkedDetection {
    pub fn new(detection: Detection, column: usize) -> Self {
        Self {
            detection,
            column,
            children: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn label(&self) -> &Label {
        &self.detection.label
    }

    pub fn bbox(&self) -> &BBox {
        &self.detection.bbox
    }
}

// ============================================================
// Options
// ============================================================

/// Thresholds for detection cleaning and association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
    /// Per-label minimum confidence, keyed by label name
    pub min_confidence: BTreeMap<String, f64>,
    /// Minimum confidence for labels missing from `min_confidence`
    pub default_min_confidence: f64,
    /// Minimum box area / page area
    pub area_ratio_floor: f64,
    /// Maximum aspect ratio for question numbers
    pub qn_aspect_max: f64,
    /// Per-class NMS IoU threshold
    pub nms_iou: f64,
    /// Minimum horizontal overlap / previous block width for merging
    pub merge_x_overlap: f64,
    /// Maximum merge gap as a fraction of page height
    pub merge_max_vgap_ratio: f64,
    /// Question number link gate as a fraction of page height
    pub qn_link_gate_ratio: f64,
    /// Question number link gate floor in pixels
    pub qn_link_gate_min_px: f64,
    /// Page size used when it cannot be resolved
    pub fallback_page_size: (u32, u32),
}

impl Default for DetectionOptions {
    fn default() -> Self {
        let mut min_confidence = BTreeMap::new();
        min_confidence.insert(Label::QuestionNumber.to_string(), 0.40);
        min_confidence.insert(Label::Figure.to_string(), 0.50);
        Self {
            min_confidence,
            default_min_confidence: DEFAULT_MIN_CONFIDENCE,
            area_ratio_floor: DEFAULT_AREA_RATIO_FLOOR,
            qn_aspect_max: DEFAULT_QN_ASPECT_MAX,
            nms_iou: DEFAULT_NMS_IOU,
            merge_x_overlap: DEFAULT_MERGE_X_OVERLAP,
            merge_max_vgap_ratio: DEFAULT_MERGE_MAX_VGAP_RATIO,
            qn_link_gate_ratio: DEFAULT_QN_LINK_GATE_RATIO,
            qn_link_gate_min_px: DEFAULT_QN_LINK_GATE_MIN_PX,
            fallback_page_size: FALLBACK_PAGE_SIZE,
        }
    }
}

impl DetectionOptions {
    /// Create a new options builder
    pub fn builder() -> DetectionOptionsBuilder {
        DetectionOptionsBuilder::default()
    }

    /// Minimum confidence for a label
    pub fn min_confidence_for(&self, label: &Label) -> f64 {
        self.min_confidence
            .get(label.as_str())
            .copied()
            .unwrap_or(self.default_min_confidence)
    }

    /// Maximum merge gap in pixels for a page of the given height
    pub fn merge_max_vgap(&self, page_height: f64) -> f64 {
        self.merge_max_vgap_ratio * page_height
    }

    /// Question number link gate in pixels: `max(ratio * H, min_px)`
    pub fn qn_link_gate(&self, page_height: f64) -> f64 {
        (self.qn_link_gate_ratio * page_height).max(self.qn_link_gate_min_px)
    }
}

/// Builder for DetectionOptions
#[derive(Debug, Default)]
pub struct DetectionOptionsBuilder {
    options: DetectionOptions,
}

impl DetectionOptionsBuilder {
    /// Set the minimum confidence for one label (clamped to 0-1)
    #[must_use]
    pub fn min_confidence(mut self, label: Label, confidence: f64) -> Self {
        self.options
            .min_confidence
            .insert(label.to_string(), confidence.clamp(0.0, 1.0));
        self
    }

    /// Set the fallback minimum confidence (clamped to 0-1)
    #[must_use]
    pub fn default_min_confidence(mut self, confidence: f64) -> Self {
        self.options.default_min_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the area ratio floor (clamped to 0-1)
    #[must_use]
    pub fn area_ratio_floor(mut self, ratio: f64) -> Self {
        self.options.area_ratio_floor = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum question number aspect ratio (at least 1)
    #[must_use]
    pub fn qn_aspect_max(mut self, ratio: f64) -> Self {
        self.options.qn_aspect_max = ratio.max(1.0);
        self
    }

    /// Set the NMS IoU threshold (clamped to 0-1)
    #[must_use]
    pub fn nms_iou(mut self, iou: f64) -> Self {
        self.options.nms_iou = iou.clamp(0.0, 1.0);
        self
    }

    /// Set the merge overlap ratio (clamped to 0-1)
    #[must_use]
    pub fn merge_x_overlap(mut self, ratio: f64) -> Self {
        self.options.merge_x_overlap = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the merge gap ratio (clamped to 0-1)
    #[must_use]
    pub fn merge_max_vgap_ratio(mut self, ratio: f64) -> Self {
        self.options.merge_max_vgap_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Set the question number link gate
    #[must_use]
    pub fn qn_link_gate(mut self, ratio: f64, min_px: f64) -> Self {
        self.options.qn_link_gate_ratio = ratio.max(0.0);
        self.options.qn_link_gate_min_px = min_px.max(0.0);
        self
    }

    /// Set the fallback page size
    #[must_use]
    pub fn fallback_page_size(mut self, width: u32, height: u32) -> Self {
        self.options.fallback_page_size = (width.max(1), height.max(1));
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> DetectionOptions {
        self.options
    }
}
