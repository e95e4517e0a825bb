//! Flow Layout Engine
//!
//! Packs shuffled logical units into paginated one- or two-column pages with
//! a greedy overflow policy, stamps question numbers, draws the page chrome,
//! and records every placed image in a [`PlacementMap`].
//!
//! Placement is sequential: each decision depends on the cursor state left by
//! the previous one.

use tracing::{debug, warn};

use super::types::{LayoutError, LayoutOptions, PlacementItem, PlacementMap, Rect, ATTACHMENT_TYPE};
use crate::crop::ImageRef;
use crate::detection::Label;
use crate::geometry::Point;
use crate::grouping::{Component, LogicalUnit};

/// Page/document drawing capability, top-left origin in points
pub trait PageCanvas {
    /// Natural pixel size of an image asset
    fn image_size(&self, image: &ImageRef) -> Result<(u32, u32), LayoutError>;

    /// Append a page and return its id (0-based, in creation order)
    fn new_page(&mut self, width: f64, height: f64) -> usize;

    fn draw_line(&mut self, page: usize, from: Point, to: Point, width: f64) -> Result<(), LayoutError>;

    fn insert_image(&mut self, page: usize, rect: &Rect, image: &ImageRef) -> Result<(), LayoutError>;

    /// Draw `text` with its baseline starting at `at`
    fn insert_text(&mut self, page: usize, at: Point, text: &str, font_size: f64) -> Result<(), LayoutError>;
}

/// Cursor state of the flow layout
pub struct FlowLayout<'a, C: PageCanvas + ?Sized> {
    canvas: &'a mut C,
    options: &'a LayoutOptions,
    column_width: f64,
    column_x: Vec<f64>,
    y_cursors: Vec<f64>,
    current_column: usize,
    current_page: usize,
    question_number: u32,
    map: PlacementMap,
}

impl<'a, C: PageCanvas + ?Sized> FlowLayout<'a, C> {
    /// Start a layout on a fresh first page
    pub fn new(canvas: &'a mut C, options: &'a LayoutOptions) -> Result<Self, LayoutError> {
        let mut layout = Self {
            canvas,
            options,
            column_width: options.column_width(),
            column_x: options.column_origins(),
            y_cursors: vec![options.content_start_y(); options.column_count()],
            current_column: 0,
            current_page: 0,
            question_number: options.start_question_number,
            map: PlacementMap::new(),
        };
        layout.start_page()?;
        Ok(layout)
    }

    fn start_page(&mut self) -> Result<(), LayoutError> {
        let opts = self.options;
        let (width, height) = opts.page_size;
        self.current_page = self.canvas.new_page(width, height);
        if opts.header_line_width > 0.0 {
            self.canvas.draw_line(
                self.current_page,
                Point::new(opts.margin, opts.header_y),
                Point::new(width - opts.margin, opts.header_y),
                opts.header_line_width,
            )?;
        }
        self.map.ensure_page(self.current_page);
        self.y_cursors = vec![opts.content_start_y(); opts.column_count()];
        self.current_column = 0;
        Ok(())
    }

    /// Fit a natural pixel size into the column. Never upscales; the result
    /// is truncated to whole points.
    pub fn scaled_size(&self, natural: (u32, u32)) -> (f64, f64) {
        let w = natural.0 as f64 * self.options.image_scale;
        let h = natural.1 as f64 * self.options.image_scale;
        if w > self.column_width {
            let scale = self.column_width / w;
            ((w * scale).trunc(), (h * scale).trunc())
        } else {
            (w.trunc(), h.trunc())
        }
    }

    fn resolve(&self, image: &ImageRef) -> Result<(f64, f64), LayoutError> {
        self.canvas
            .image_size(image)
            .map(|natural| self.scaled_size(natural))
    }

    /// Move to the next column or page when `height` does not fit below the
    /// current cursor.
    fn ensure_space(&mut self, height: f64) -> Result<(), LayoutError> {
        if self.y_cursors[self.current_column] + height <= self.options.content_bottom() {
            return Ok(());
        }
        if self.options.two_column && self.current_column == 0 {
            self.current_column = 1;
        } else {
            self.start_page()?;
        }
        Ok(())
    }

    /// Place one image at the current cursor and advance it.
    /// Returns the placement rectangle, or `None` if the canvas rejected it.
    fn place_image(&mut self, image: &ImageRef, size: (f64, f64)) -> Option<Rect> {
        let rect = Rect::new(
            self.column_x[self.current_column],
            self.y_cursors[self.current_column],
            size.0,
            size.1,
        );
        if let Err(e) = self.canvas.insert_image(self.current_page, &rect, image) {
            warn!("Skipping image {}: {}", image, e);
            return None;
        }
        self.y_cursors[self.current_column] = rect.bottom() + self.options.spacing;
        Some(rect)
    }

    fn record(&mut self, kind: &str, image: &ImageRef, rect: Rect, question_number: Option<u32>) {
        self.map.push(PlacementItem {
            kind: kind.to_string(),
            image_reference: image.clone(),
            page_id: self.current_page,
            column: self.current_column,
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            question_number,
        });
    }

    /// Place every component of a unit in order
    pub fn place_unit(&mut self, unit: &LogicalUnit) -> Result<(), LayoutError> {
        let components = unit.components();
        for (i, component) in components.iter().enumerate() {
            let next = components.get(i + 1);
            self.place_component(component, next)?;
        }
        Ok(())
    }

    fn place_component(&mut self, component: &Component, next: Option<&Component>) -> Result<(), LayoutError> {
        let size = match self.resolve(&component.image) {
            Ok(size) => size,
            Err(e) => {
                warn!("Skipping {} component: {}", component.label, e);
                return Ok(());
            }
        };

        let spacing = self.options.spacing;
        let mut required_height = size.1;

        // A header keeps its passage in the same column
        if component.label == Label::Header {
            if let Some(passage) = next.filter(|n| n.label == Label::Passage) {
                if let Ok((_, passage_h)) = self.resolve(&passage.image) {
                    required_height += spacing + passage_h;
                }
            }
        }

        let mut attachments = Vec::with_capacity(component.attachments.len());
        for attachment in &component.attachments {
            match self.resolve(&attachment.image) {
                Ok(att_size) => {
                    required_height += spacing + att_size.1;
                    attachments.push((attachment, att_size));
                }
                Err(e) => warn!("Skipping attachment of {}: {}", component.label, e),
            }
        }

        self.ensure_space(required_height)?;
        let Some(rect) = self.place_image(&component.image, size) else {
            return Ok(());
        };

        let mut question_number = None;
        if component.label == Label::QuestionBlock {
            let (dx, dy) = self.options.question_number_offset;
            self.canvas.insert_text(
                self.current_page,
                Point::new(rect.x + dx, rect.y + dy),
                &format!("{}.", self.question_number),
                self.options.question_number_font_size,
            )?;
            question_number = Some(self.question_number);
            self.question_number += 1;
        }
        self.record(component.label.as_str(), &component.image, rect, question_number);

        for (attachment, att_size) in attachments {
            self.ensure_space(att_size.1)?;
            if let Some(att_rect) = self.place_image(&attachment.image, att_size) {
                self.record(ATTACHMENT_TYPE, &attachment.image, att_rect, None);
            }
        }
        Ok(())
    }

    /// Draw column dividers on every page and return the placement map
    pub fn finish(mut self) -> Result<PlacementMap, LayoutError> {
        let opts = self.options;
        if opts.two_column && opts.column_line_width > 0.0 {
            let center_x = opts.page_width() / 2.0;
            for page in &self.map.pages {
                self.canvas.draw_line(
                    page.page_id,
                    Point::new(center_x, opts.content_start_y()),
                    Point::new(center_x, opts.content_bottom()),
                    opts.column_line_width,
                )?;
            }
        }
        debug!(
            "Placed {} images on {} pages",
            self.map.item_count(),
            self.map.page_count()
        );
        Ok(self.map)
    }
}

/// Lay out `units` in order onto `canvas`
pub fn layout_units<C: PageCanvas + ?Sized>(
    units: &[LogicalUnit],
    canvas: &mut C,
    options: &LayoutOptions,
) -> Result<PlacementMap, LayoutError> {
    let mut layout = FlowLayout::new(canvas, options)?;
    for unit in units {
        layout.place_unit(unit)?;
    }
    layout.finish()
}
