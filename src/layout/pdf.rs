//! PDF page canvas
//!
//! [`PageCanvas`] implementation on `lopdf`. Layout coordinates are top-left
//! origin in points; they are flipped to PDF user space when operators are
//! emitted. Each distinct image is embedded once as an RGB XObject and shared
//! by every page that draws it.

use std::collections::HashMap;
use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use super::flow::PageCanvas;
use super::types::{LayoutError, Rect};
use crate::crop::ImageRef;
use crate::geometry::Point;

/// PDF version written to the output document
const PDF_VERSION: &str = "1.5";

/// Resource name of the question number font
const FONT_NAME: &str = "F1";

#[derive(Debug)]
struct PdfPage {
    width: f64,
    height: f64,
    operations: Vec<Operation>,
    xobjects: Dictionary,
}

/// Output document built page by page
pub struct PdfCanvas {
    doc: Document,
    pages: Vec<PdfPage>,
    images: HashMap<ImageRef, (String, ObjectId)>,
    font_id: ObjectId,
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

impl Default for PdfCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfCanvas {
    pub fn new() -> Self {
        let mut doc = Document::with_version(PDF_VERSION);
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        Self {
            doc,
            pages: Vec::new(),
            images: HashMap::new(),
            font_id,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_mut(&mut self, page: usize) -> Result<&mut PdfPage, LayoutError> {
        self.pages.get_mut(page).ok_or(LayoutError::UnknownPage(page))
    }

    /// Embed `image` once and return its resource name
    fn embed(&mut self, image: &ImageRef) -> Result<(String, ObjectId), LayoutError> {
        if let Some(entry) = self.images.get(image) {
            return Ok(entry.clone());
        }
        if !image.exists() {
            return Err(LayoutError::MissingAsset(image.clone()));
        }
        let rgb = image::open(image.path())
            .map_err(|e| LayoutError::InvalidImage {
                image: image.clone(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(width as i64),
                "Height" => Object::Integer(height as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
            },
            rgb.into_raw(),
        );
        let id = self.doc.add_object(stream);
        let name = format!("Im{}", self.images.len());
        self.images.insert(image.clone(), (name.clone(), id));
        Ok((name, id))
    }

    /// Write all pages and save the document
    pub fn save(mut self, path: &Path) -> Result<(), LayoutError> {
        let pages_id = self.doc.new_object_id();
        let mut kids = Vec::with_capacity(self.pages.len());

        for page in std::mem::take(&mut self.pages) {
            let content = Content {
                operations: page.operations,
            };
            let encoded = content
                .encode()
                .map_err(|e| LayoutError::Render(e.to_string()))?;
            let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));
            let resources = dictionary! {
                "Font" => dictionary! { FONT_NAME => self.font_id },
                "XObject" => page.xobjects,
            };
            let page_id = self.doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![real(0.0), real(0.0), real(page.width), real(page.height)],
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        self.doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();
        self.doc
            .save(path)
            .map_err(|e| LayoutError::Render(e.to_string()))?;

        debug!("Wrote {} pages to {}", count, path.display());
        Ok(())
    }
}

impl PageCanvas for PdfCanvas {
    fn image_size(&self, image: &ImageRef) -> Result<(u32, u32), LayoutError> {
        if !image.exists() {
            return Err(LayoutError::MissingAsset(image.clone()));
        }
        image::image_dimensions(image.path()).map_err(|e| LayoutError::InvalidImage {
            image: image.clone(),
            reason: e.to_string(),
        })
    }

    fn new_page(&mut self, width: f64, height: f64) -> usize {
        self.pages.push(PdfPage {
            width,
            height,
            operations: Vec::new(),
            xobjects: Dictionary::new(),
        });
        self.pages.len() - 1
    }

    fn draw_line(&mut self, page: usize, from: Point, to: Point, width: f64) -> Result<(), LayoutError> {
        let page = self.page_mut(page)?;
        let h = page.height;
        page.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("G", vec![real(0.0)]),
            Operation::new("w", vec![real(width)]),
            Operation::new("m", vec![real(from.x), real(h - from.y)]),
            Operation::new("l", vec![real(to.x), real(h - to.y)]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    fn insert_image(&mut self, page: usize, rect: &Rect, image: &ImageRef) -> Result<(), LayoutError> {
        self.page_mut(page)?;
        let (name, id) = self.embed(image)?;
        let page = self.page_mut(page)?;
        let h = page.height;
        page.xobjects.set(name.as_bytes().to_vec(), id);
        page.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(rect.w),
                    real(0.0),
                    real(0.0),
                    real(rect.h),
                    real(rect.x),
                    real(h - rect.y - rect.h),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    fn insert_text(&mut self, page: usize, at: Point, text: &str, font_size: f64) -> Result<(), LayoutError> {
        let page = self.page_mut(page)?;
        let h = page.height;
        page.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("g", vec![real(0.0)]),
            Operation::new(
                "Tf",
                vec![Object::Name(FONT_NAME.as_bytes().to_vec()), real(font_size)],
            ),
            Operation::new("Td", vec![real(at.x), real(h - at.y)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]);
        Ok(())
    }
}
