//! End-to-end recombination pipeline
//!
//! annotations JSON → clean + associate (parallel per page) → group →
//! shuffle → layout → PDF + placement map.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RecombineConfig};
use crate::crop::{CropError, FileCropper};
use crate::detection::{flatten_pages, process_page, LinkedDetection, PageAnnotations, PageSize};
use crate::grouping::group_units;
use crate::layout::{layout_units, LayoutError, PdfCanvas, PlacementMap};
use crate::shuffle::ShuffleEngine;

/// Directory (next to the output PDF) receiving cropped component images
pub const CROPS_DIR_NAME: &str = "crops";

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Invalid annotation file: {0}")]
    InvalidAnnotations(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crop error: {0}")]
    Crop(#[from] CropError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Progress reporting for long-running steps
pub trait ProgressCallback: Sync {
    fn on_step_start(&self, step: &str);
    fn on_step_progress(&self, current: usize, total: usize);
    fn on_step_complete(&self, step: &str, detail: &str);
    fn on_debug(&self, message: &str);
}

/// Progress callback that reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {
    fn on_step_start(&self, _step: &str) {}
    fn on_step_progress(&self, _current: usize, _total: usize) {}
    fn on_step_complete(&self, _step: &str, _detail: &str) {}
    fn on_debug(&self, _message: &str) {}
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Input pages processed
    pub page_count: usize,
    /// Logical units placed (after footer removal)
    pub unit_count: usize,
    pub placed_items: usize,
    pub output_pages: usize,
    pub output_pdf: PathBuf,
    pub placement_path: PathBuf,
    pub seed: u64,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

/// Detection-to-PDF recombination pipeline
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: RecombineConfig,
}

impl Pipeline {
    pub fn new(config: RecombineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecombineConfig {
        &self.config
    }

    /// Read the annotation file. Relative image paths are resolved against
    /// the file's directory.
    pub fn load_annotations(path: &Path) -> Result<Vec<PageAnnotations>, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let mut pages: Vec<PageAnnotations> = serde_json::from_str(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for page in &mut pages {
            if page.image_path.is_relative() {
                page.image_path = base.join(&page.image_path);
            }
        }
        Ok(pages)
    }

    /// Page size from the record, else the image header, else the fallback
    pub fn resolve_page_size(&self, page: &PageAnnotations) -> PageSize {
        let (width, height) = match (page.width, page.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => match image::image_dimensions(&page.image_path) {
                Ok(dims) => dims,
                Err(e) => {
                    let fallback = self.config.detection.fallback_page_size;
                    warn!(
                        "Cannot read size of {} ({}), assuming {}x{}",
                        page.image_path.display(),
                        e,
                        fallback.0,
                        fallback.1
                    );
                    fallback
                }
            },
        };
        PageSize::new(width as f64, height as f64)
    }

    /// Clean and associate every page on a worker pool; results keep page order
    pub fn detect<P: ProgressCallback>(
        &self,
        pages: &[PageAnnotations],
        progress: &P,
    ) -> Result<Vec<Vec<LinkedDetection>>, PipelineError> {
        let threads = self.config.effective_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        let total = pages.len();
        let done = AtomicUsize::new(0);
        let options = &self.config.detection;

        let linked = pool.install(|| {
            pages
                .par_iter()
                .enumerate()
                .map(|(page_index, page)| {
                    let size = self.resolve_page_size(page);
                    let linked = process_page(page, page_index, size, options);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.on_step_progress(finished, total);
                    linked
                })
                .collect::<Vec<_>>()
        });

        debug!("Processed {} pages on {} threads", total, threads);
        Ok(linked)
    }

    /// Clean and associate only; returns the globally ordered stream
    pub fn inspect(&self, input: &Path) -> Result<Vec<LinkedDetection>, PipelineError> {
        let pages = Self::load_annotations(input)?;
        Ok(flatten_pages(self.detect(&pages, &SilentProgress)?))
    }

    /// Run the full pipeline
    pub fn run<P: ProgressCallback>(
        &self,
        input: &Path,
        output_pdf: &Path,
        progress: &P,
    ) -> Result<PipelineResult, PipelineError> {
        let start_time = Instant::now();
        let started_at = Utc::now();

        let output_dir = output_pdf
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(output_dir)?;

        // Step 1: Load annotations
        progress.on_step_start("Loading annotations...");
        let pages = Self::load_annotations(input)?;
        progress.on_step_complete("Load", &format!("{} pages", pages.len()));

        // Step 2: Clean + associate
        progress.on_step_start("Cleaning detections...");
        let linked = self.detect(&pages, progress)?;
        let stream = flatten_pages(linked);
        progress.on_step_complete("Detection cleanup", &format!("{} detections", stream.len()));

        // Step 3: Crop + group
        progress.on_step_start("Grouping logical units...");
        let cropper = FileCropper::new(&output_dir.join(CROPS_DIR_NAME))?;
        let units = group_units(&stream, &cropper);
        progress.on_step_complete("Grouping", &format!("{} units", units.len()));

        // Step 4: Shuffle
        let seed = self.config.shuffle.seed.unwrap_or_else(rand::random);
        info!("Shuffle seed: {}", seed);
        progress.on_debug(&format!("seed {}", seed));
        let units = ShuffleEngine::new(seed).shuffle(units);

        // Step 5: Layout
        progress.on_step_start("Laying out pages...");
        let mut canvas = PdfCanvas::new();
        let mut map = layout_units(&units, &mut canvas, &self.config.layout)?;
        let output_pages = canvas.page_count();
        canvas.save(output_pdf)?;

        map.output_pdf = std::path::absolute(output_pdf)?;
        map.seed = Some(seed);
        let placement_path = PlacementMap::path_for(output_pdf);
        map.save(&placement_path)?;
        progress.on_step_complete(
            "Layout",
            &format!("{} images on {} pages", map.item_count(), output_pages),
        );

        let elapsed = start_time.elapsed().as_secs_f64();
        info!(
            "Wrote {} ({} pages) in {:.2}s, run started {}",
            output_pdf.display(),
            output_pages,
            elapsed,
            started_at.to_rfc3339()
        );

        Ok(PipelineResult {
            page_count: pages.len(),
            unit_count: units.len(),
            placed_items: map.item_count(),
            output_pages,
            output_pdf: output_pdf.to_path_buf(),
            placement_path,
            seed,
            started_at,
            elapsed_seconds: elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProgress {
        steps: Mutex<Vec<String>>,
        last_progress: Mutex<Option<(usize, usize)>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn on_step_start(&self, step: &str) {
            self.steps.lock().unwrap().push(step.to_string());
        }
        fn on_step_progress(&self, current: usize, total: usize) {
            let mut last = self.last_progress.lock().unwrap();
            if last.map_or(true, |(c, _)| current > c) {
                *last = Some((current, total));
            }
        }
        fn on_step_complete(&self, _step: &str, _detail: &str) {}
        fn on_debug(&self, _message: &str) {}
    }

    fn write_json(dir: &Path, value: serde_json::Value) -> PathBuf {
        let path = dir.join("annotations.json");
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn test_load_missing_input() {
        let result = Pipeline::load_annotations(Path::new("/nonexistent/a.json"));
        assert!(matches!(result, Err(PipelineError::InputNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let result = Pipeline::load_annotations(&path);
        assert!(matches!(result, Err(PipelineError::InvalidAnnotations(_))));
    }

    #[test]
    fn test_relative_image_paths_resolved() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_json(
            tmpdir.path(),
            serde_json::json!([{ "image_path": "pages/p1.png", "annotations": [] }]),
        );
        let pages = Pipeline::load_annotations(&path).unwrap();
        assert_eq!(pages[0].image_path, tmpdir.path().join("pages/p1.png"));
    }

    #[test]
    fn test_page_size_fallback() {
        let pipeline = Pipeline::default();
        let page: PageAnnotations = serde_json::from_value(serde_json::json!({
            "image_path": "/nonexistent/p.png",
            "annotations": []
        }))
        .unwrap();
        assert_eq!(pipeline.resolve_page_size(&page), PageSize::new(2000.0, 3000.0));

        let sized: PageAnnotations = serde_json::from_value(serde_json::json!({
            "image_path": "/nonexistent/p.png",
            "width": 800,
            "height": 1000,
            "annotations": []
        }))
        .unwrap();
        assert_eq!(pipeline.resolve_page_size(&sized), PageSize::new(800.0, 1000.0));
    }

    #[test]
    fn test_detect_keeps_page_order() {
        let mut config = RecombineConfig::default();
        config.threads = Some(3);
        let pipeline = Pipeline::new(config);
        let pages: Vec<PageAnnotations> = (0..6)
            .map(|i| {
                serde_json::from_value(serde_json::json!({
                    "image_path": format!("/nonexistent/p{i}.png"),
                    "width": 1000,
                    "height": 1000,
                    "annotations": [
                        { "label": "question_block", "bbox": [100, 100, 400, 300], "confidence": 0.9 }
                    ]
                }))
                .unwrap()
            })
            .collect();

        let progress = RecordingProgress::default();
        let linked = pipeline.detect(&pages, &progress).unwrap();
        assert_eq!(linked.len(), 6);
        for (i, page) in linked.iter().enumerate() {
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].detection.page_index, i);
        }
        assert_eq!(*progress.last_progress.lock().unwrap(), Some((6, 6)));
    }

    #[test]
    fn test_inspect_empty_input() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = write_json(tmpdir.path(), serde_json::json!([]));
        let stream = Pipeline::default().inspect(&path).unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn test_run_empty_input_writes_empty_document() {
        let tmpdir = tempfile::tempdir().unwrap();
        let input = write_json(tmpdir.path(), serde_json::json!([]));
        let output = tmpdir.path().join("out").join("exam.pdf");
        let mut config = RecombineConfig::default();
        config.shuffle.seed = Some(3);

        let progress = RecordingProgress::default();
        let result = Pipeline::new(config).run(&input, &output, &progress).unwrap();

        assert_eq!(result.page_count, 0);
        assert_eq!(result.unit_count, 0);
        assert_eq!(result.placed_items, 0);
        assert_eq!(result.output_pages, 1);
        assert_eq!(result.seed, 3);
        assert!(output.exists());
        assert!(result.placement_path.ends_with("exam_placement.json"));

        let map = PlacementMap::load(&result.placement_path).unwrap();
        assert_eq!(map.seed, Some(3));
        assert_eq!(map.page_count(), 1);
        assert!(result.started_at <= Utc::now());
        assert!(!progress.steps.lock().unwrap().is_empty());
    }
}
