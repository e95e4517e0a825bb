//! Crop/mask collaborator
//!
//! Cuts component images out of page rasters and blanks question number
//! regions inside cropped question blocks. Generated files are named from a
//! per-label counter that is safe to share across worker threads.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::Label;
use crate::geometry::BBox;

/// Error type for crop/mask operations
#[derive(Debug, Error)]
pub enum CropError {
    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("Crop region {bbox:?} is empty inside {width}x{height} image")]
    EmptyRegion { bbox: BBox, width: u32, height: u32 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Opaque handle to an image on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(PathBuf);

impl ImageRef {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_path_buf())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Per-label sequence numbers for generated file names
#[derive(Debug, Default)]
pub struct CropCounter {
    counts: Mutex<BTreeMap<String, usize>>,
}

impl CropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free index for `label`, starting at 0
    pub fn next(&self, label: &Label) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let slot = counts.entry(label.as_str().to_string()).or_insert(0);
        let index = *slot;
        *slot += 1;
        index
    }

    /// Number of images issued for `label` so far
    pub fn issued(&self, label: &Label) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(label.as_str()).copied().unwrap_or(0)
    }
}

/// Crop/mask capability used while building components
pub trait ImageCropper {
    /// Crop `bbox` (absolute page pixels) out of `source`
    fn crop(&self, source: &ImageRef, bbox: &BBox, label: &Label) -> Result<ImageRef, CropError>;

    /// Paint `regions` (in the image's own coordinate space) white
    fn mask(&self, image: &ImageRef, regions: &[BBox]) -> Result<ImageRef, CropError>;
}

/// File-backed cropper writing PNGs to `<output_dir>/<label>/`
#[derive(Debug)]
pub struct FileCropper {
    output_dir: PathBuf,
    counter: CropCounter,
}

impl FileCropper {
    /// Create a cropper, creating the output directory if needed
    pub fn new(output_dir: &Path) -> Result<Self, CropError> {
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            counter: CropCounter::new(),
        })
    }

    fn open(image: &ImageRef) -> Result<DynamicImage, CropError> {
        if !image.exists() {
            return Err(CropError::ImageNotFound(image.path().to_path_buf()));
        }
        Ok(image::open(image.path())?)
    }
}

/// Round a box to whole pixels and clamp it to `width` x `height`.
/// Returns `(x, y, w, h)`, or `None` when nothing is left.
pub fn pixel_region(bbox: &BBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clamp = |v: f64, max: u32| v.round().clamp(0.0, max as f64) as u32;
    let x0 = clamp(bbox.x_min, width);
    let y0 = clamp(bbox.y_min, height);
    let x1 = clamp(bbox.x_max, width);
    let y1 = clamp(bbox.y_max, height);
    (x1 > x0 && y1 > y0).then(|| (x0, y0, x1 - x0, y1 - y0))
}

impl ImageCropper for FileCropper {
    fn crop(&self, source: &ImageRef, bbox: &BBox, label: &Label) -> Result<ImageRef, CropError> {
        let page = Self::open(source)?;
        let (x, y, w, h) = pixel_region(bbox, page.width(), page.height()).ok_or(
            CropError::EmptyRegion {
                bbox: *bbox,
                width: page.width(),
                height: page.height(),
            },
        )?;
        let cropped = page.crop_imm(x, y, w, h);

        let label_dir = self.output_dir.join(label.as_str());
        std::fs::create_dir_all(&label_dir)?;
        let stem = source
            .path()
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let index = self.counter.next(label);
        let path = label_dir.join(format!("{}_{}_{}.png", stem, label, index));
        cropped.save(&path)?;

        Ok(ImageRef::new(path))
    }

    fn mask(&self, image: &ImageRef, regions: &[BBox]) -> Result<ImageRef, CropError> {
        if regions.is_empty() {
            return Ok(image.clone());
        }
        let mut canvas = Self::open(image)?.to_rgb8();
        let (width, height) = canvas.dimensions();
        for region in regions {
            if let Some((x, y, w, h)) = pixel_region(region, width, height) {
                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(x as i32, y as i32).of_size(w, h),
                    Rgb([255, 255, 255]),
                );
            }
        }
        canvas.save(image.path())?;
        Ok(image.clone())
    }
}
