//! Layout module core types
//!
//! Page geometry options, the placement map records, and layout errors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crop::ImageRef;

// ============================================================
// Constants
// ============================================================

/// Default page size in points (B4, portrait)
pub const DEFAULT_PAGE_SIZE: (f64, f64) = (842.0, 1191.0);

/// Default page margin in points
pub const DEFAULT_MARGIN: f64 = 50.0;

/// Default vertical spacing between placed images
pub const DEFAULT_SPACING: f64 = 15.0;

/// Default y position of the header rule
pub const DEFAULT_HEADER_Y: f64 = 150.0;

/// Default stroke width for the header rule and column divider
pub const DEFAULT_LINE_WIDTH: f64 = 0.5;

/// Default question number font size
pub const DEFAULT_QUESTION_NUMBER_FONT_SIZE: f64 = 12.0;

/// Default question number offset from a block's top-left corner
pub const DEFAULT_QUESTION_NUMBER_OFFSET: (f64, f64) = (10.0, 12.0);

/// Placement type recorded for figure attachments
pub const ATTACHMENT_TYPE: &str = "attachment";

// ============================================================
// Error Types
// ============================================================

/// Layout error types
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Image asset not found: {0}")]
    MissingAsset(ImageRef),

    #[error("Unreadable image {image}: {reason}")]
    InvalidImage { image: ImageRef, reason: String },

    #[error("Page {0} does not exist")]
    UnknownPage(usize),

    #[error("Document rendering failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Placement map serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================
// Options
// ============================================================

/// Flow layout options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Page size in points (width, height)
    pub page_size: (f64, f64),
    pub margin: f64,
    /// Vertical spacing after each placed image
    pub spacing: f64,
    /// Header rule y position; content starts at `header_y + spacing`
    pub header_y: f64,
    /// Header rule width (no rule when <= 0)
    pub header_line_width: f64,
    pub two_column: bool,
    /// Column divider width (no divider when <= 0)
    pub column_line_width: f64,
    /// Factor applied to natural image size before fitting to the column
    pub image_scale: f64,
    pub start_question_number: u32,
    pub question_number_font_size: f64,
    /// Question number position relative to the block's top-left corner
    pub question_number_offset: (f64, f64),
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            margin: DEFAULT_MARGIN,
            spacing: DEFAULT_SPACING,
            header_y: DEFAULT_HEADER_Y,
            header_line_width: DEFAULT_LINE_WIDTH,
            two_column: true,
            column_line_width: DEFAULT_LINE_WIDTH,
            image_scale: 1.0,
            start_question_number: 1,
            question_number_font_size: DEFAULT_QUESTION_NUMBER_FONT_SIZE,
            question_number_offset: DEFAULT_QUESTION_NUMBER_OFFSET,
        }
    }
}

impl LayoutOptions {
    /// Create a new options builder
    pub fn builder() -> LayoutOptionsBuilder {
        LayoutOptionsBuilder::default()
    }

    pub fn page_width(&self) -> f64 {
        self.page_size.0
    }

    pub fn page_height(&self) -> f64 {
        self.page_size.1
    }

    /// First y position available for content on every page
    pub fn content_start_y(&self) -> f64 {
        self.header_y + self.spacing
    }

    /// Lowest y position content may reach
    pub fn content_bottom(&self) -> f64 {
        self.page_height() - self.margin
    }

    pub fn column_count(&self) -> usize {
        if self.two_column {
            2
        } else {
            1
        }
    }

    /// Width available to one column
    pub fn column_width(&self) -> f64 {
        if self.two_column {
            (self.page_width() - 3.0 * self.margin) / 2.0
        } else {
            self.page_width() - 2.0 * self.margin
        }
    }

    /// Left edge of each column
    pub fn column_origins(&self) -> Vec<f64> {
        if self.two_column {
            vec![self.margin, 2.0 * self.margin + self.column_width()]
        } else {
            vec![self.margin]
        }
    }
}

/// Builder for LayoutOptions
#[derive(Debug, Default)]
pub struct LayoutOptionsBuilder {
    options: LayoutOptions,
}

impl LayoutOptionsBuilder {
    /// Set the page size in points (at least 1pt each side)
    #[must_use]
    pub fn page_size(mut self, width: f64, height: f64) -> Self {
        self.options.page_size = (width.max(1.0), height.max(1.0));
        self
    }

    #[must_use]
    pub fn margin(mut self, margin: f64) -> Self {
        self.options.margin = margin.max(0.0);
        self
    }

    #[must_use]
    pub fn spacing(mut self, spacing: f64) -> Self {
        self.options.spacing = spacing.max(0.0);
        self
    }

    /// Set the header rule position and width
    #[must_use]
    pub fn header(mut self, y: f64, line_width: f64) -> Self {
        self.options.header_y = y.max(0.0);
        self.options.header_line_width = line_width;
        self
    }

    #[must_use]
    pub fn two_column(mut self, enabled: bool) -> Self {
        self.options.two_column = enabled;
        self
    }

    #[must_use]
    pub fn column_line_width(mut self, width: f64) -> Self {
        self.options.column_line_width = width;
        self
    }

    /// Set the image scale factor (clamped to 0.01-10)
    #[must_use]
    pub fn image_scale(mut self, scale: f64) -> Self {
        self.options.image_scale = scale.clamp(0.01, 10.0);
        self
    }

    #[must_use]
    pub fn start_question_number(mut self, number: u32) -> Self {
        self.options.start_question_number = number;
        self
    }

    /// Set the question number font size and offset
    #[must_use]
    pub fn question_number_style(mut self, font_size: f64, offset: (f64, f64)) -> Self {
        self.options.question_number_font_size = font_size.max(1.0);
        self.options.question_number_offset = offset;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> LayoutOptions {
        self.options
    }
}

// ============================================================
// Geometry
// ============================================================

/// Placement rectangle in page points, top-left origin
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }
}

// ============================================================
// Placement Map
// ============================================================

/// One placed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementItem {
    /// Component label, or `"attachment"`
    #[serde(rename = "type")]
    pub kind: String,
    pub image_reference: ImageRef,
    pub page_id: usize,
    pub column: usize,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
}

impl PlacementItem {
    pub fn is_attachment(&self) -> bool {
        self.kind == ATTACHMENT_TYPE
    }
}

/// Items placed on one output page, in placement order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementPage {
    pub page_id: usize,
    pub items: Vec<PlacementItem>,
}

/// Exact record of every image placed in the output document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlacementMap {
    #[serde(default)]
    pub output_pdf: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub pages: Vec<PlacementPage>,
}

impl PlacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an entry for `page_id` unless it is already the last page
    pub fn ensure_page(&mut self, page_id: usize) {
        if self.pages.last().map(|p| p.page_id) != Some(page_id) {
            self.pages.push(PlacementPage {
                page_id,
                items: Vec::new(),
            });
        }
    }

    /// Append an item to its page entry
    pub fn push(&mut self, item: PlacementItem) {
        self.ensure_page(item.page_id);
        if let Some(page) = self.pages.last_mut() {
            page.items.push(item);
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    /// All items in placement order
    pub fn items(&self) -> impl Iterator<Item = &PlacementItem> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    /// Write as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), LayoutError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Placement map path next to an output PDF: `<stem>_placement.json`
    pub fn path_for(output_pdf: &Path) -> PathBuf {
        let stem = output_pdf
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy();
        output_pdf.with_file_name(format!("{}_placement.json", stem))
    }
}
