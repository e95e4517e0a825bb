//! Unit Grouper
//!
//! Walks the globally ordered detection stream and groups it into logical
//! units: problem sets (`header? passage? question_block*`) or single
//! standalone components. Each emitted component carries its cropped image,
//! with question numbers masked out of question blocks, plus its figure
//! attachments.
//!
//! Grouping decisions depend on the previous component's label, so this
//! stage is strictly sequential.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crop::{CropError, ImageCropper, ImageRef};
use crate::detection::{Detection, Label, LinkedDetection};

/// A placed-able piece of a logical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub label: Label,
    pub image: ImageRef,
    #[serde(default)]
    pub text_content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Component>,
}

impl Component {
    pub fn new(label: Label, image: ImageRef) -> Self {
        Self {
            label,
            image,
            text_content: String::new(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Component>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Non-empty ordered sequence of components, shuffled as one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalUnit {
    components: Vec<Component>,
}

impl LogicalUnit {
    /// Returns `None` for an empty component list
    pub fn new(components: Vec<Component>) -> Option<Self> {
        (!components.is_empty()).then_some(Self { components })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn into_components(self) -> Vec<Component> {
        self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn first_label(&self) -> &Label {
        &self.components[0].label
    }

    /// Header (if any) precedes passage (if any) precedes all question blocks,
    /// with at most one header and one passage.
    pub fn is_problem_set(&self) -> bool {
        let rank = |label: &Label| match label {
            Label::Header => Some(0),
            Label::Passage => Some(1),
            Label::QuestionBlock => Some(2),
            _ => None,
        };
        let mut last = None;
        for component in &self.components {
            let Some(r) = rank(&component.label) else {
                return false;
            };
            match last {
                Some(prev) if r < prev || (r == prev && r < 2) => return false,
                _ => last = Some(r),
            }
        }
        true
    }
}

/// What the grouper does with one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStep {
    /// Already folded into a host (question numbers, figures)
    Skip,
    /// Close the current unit and emit a one-component unit
    Standalone,
    /// Append to the current unit, closing it first when `start_new`
    Append { start_new: bool },
}

/// Decide the grouping step for `label` given the current unit's last label
pub fn group_step(label: &Label, last: Option<&Label>) -> GroupStep {
    if label.is_linked_child() {
        return GroupStep::Skip;
    }
    match label {
        Label::Header => GroupStep::Append { start_new: true },
        Label::Passage => GroupStep::Append {
            start_new: matches!(last, None | Some(Label::Passage | Label::QuestionBlock)),
        },
        Label::QuestionBlock => GroupStep::Append {
            start_new: !matches!(last, Some(Label::Passage | Label::QuestionBlock)),
        },
        _ => GroupStep::Standalone,
    }
}

/// Group the ordered stream into logical units.
///
/// A component whose crop fails is skipped with a warning and does not
/// affect the grouping state.
pub fn group_units<C: ImageCropper + ?Sized>(
    stream: &[LinkedDetection],
    cropper: &C,
) -> Vec<LogicalUnit> {
    let mut units = Vec::new();
    let mut current: Vec<Component> = Vec::new();

    for linked in stream {
        let last = current.last().map(|c| &c.label);
        let step = group_step(linked.label(), last);
        if step == GroupStep::Skip {
            continue;
        }

        let component = match build_component(linked, cropper) {
            Ok(component) => component,
            Err(e) => {
                warn!(
                    "Skipping {} {:?}: {}",
                    linked.label(),
                    linked.detection.id,
                    e
                );
                continue;
            }
        };

        match step {
            GroupStep::Standalone => {
                units.extend(LogicalUnit::new(std::mem::take(&mut current)));
                units.extend(LogicalUnit::new(vec![component]));
            }
            GroupStep::Append { start_new } => {
                if start_new {
                    units.extend(LogicalUnit::new(std::mem::take(&mut current)));
                }
                current.push(component);
            }
            GroupStep::Skip => {}
        }
    }
    units.extend(LogicalUnit::new(current));

    debug!("Grouped {} detections into {} units", stream.len(), units.len());
    units
}

/// Crop a linked detection into a component.
///
/// Question blocks get their linked question numbers masked out, in
/// block-relative coordinates. Attachments are cropped without masking; a
/// failed attachment crop drops only that attachment.
pub fn build_component<C: ImageCropper + ?Sized>(
    linked: &LinkedDetection,
    cropper: &C,
) -> Result<Component, CropError> {
    let det = &linked.detection;
    let mut image = cropper.crop(&det.source, &det.bbox, &det.label)?;

    if det.label == Label::QuestionBlock && !linked.children.is_empty() {
        // Crops start at the rounded corner
        let origin = det.bbox.rounded();
        let regions: Vec<_> = linked
            .children
            .iter()
            .map(|child| child.bbox.relative_to(&origin))
            .collect();
        image = cropper.mask(&image, &regions)?;
    }

    let attachments = linked
        .attachments
        .iter()
        .filter_map(|att| match crop_plain(att, cropper) {
            Ok(component) => Some(component),
            Err(e) => {
                warn!("Skipping attachment {:?} of {:?}: {}", att.id, det.id, e);
                None
            }
        })
        .collect();

    Ok(Component {
        label: det.label.clone(),
        image,
        text_content: det.text_content.clone(),
        attachments,
    })
}

fn crop_plain<C: ImageCropper + ?Sized>(
    det: &Detection,
    cropper: &C,
) -> Result<Component, CropError> {
    let image = cropper.crop(&det.source, &det.bbox, &det.label)?;
    Ok(Component {
        label: det.label.clone(),
        image,
        text_content: det.text_content.clone(),
        attachments: Vec::new(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detection::DetectionId;
    use crate::geometry::BBox;
    use std::cell::RefCell;
    use std::path::PathBuf;

    /// Cropper that names images after the detection box and records masks
    #[derive(Default)]
    pub(crate) struct FakeCropper {
        pub masks: RefCell<Vec<(ImageRef, Vec<BBox>)>>,
        pub fail_label: Option<Label>,
    }

    impl ImageCropper for FakeCropper {
        fn crop(&self, _source: &ImageRef, bbox: &BBox, label: &Label) -> Result<ImageRef, CropError> {
            if self.fail_label.as_ref() == Some(label) {
                return Err(CropError::ImageNotFound(PathBuf::from("missing.png")));
            }
            Ok(ImageRef::new(format!(
                "{}_{}_{}.png",
                label, bbox.x_min as i64, bbox.y_min as i64
            )))
        }

        fn mask(&self, image: &ImageRef, regions: &[BBox]) -> Result<ImageRef, CropError> {
            self.masks
                .borrow_mut()
                .push((image.clone(), regions.to_vec()));
            Ok(image.clone())
        }
    }

    pub(crate) fn linked(index: usize, label: &str, bbox: (f64, f64, f64, f64)) -> LinkedDetection {
        LinkedDetection::new(
            Detection {
                id: DetectionId { page: 0, index },
                label: Label::from(label),
                bbox: BBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
                confidence: 0.9,
                page_index: 0,
                source: ImageRef::new("page.png"),
                text_content: String::new(),
            },
            0,
        )
    }

    fn labels(unit: &LogicalUnit) -> Vec<&str> {
        unit.components().iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn test_group_step_table() {
        use GroupStep::*;
        assert_eq!(group_step(&Label::Figure, None), Skip);
        assert_eq!(group_step(&Label::QuestionNumber, None), Skip);
        assert_eq!(group_step(&Label::Footer, None), Standalone);
        assert_eq!(group_step(&Label::Other("logo".into()), None), Standalone);
        assert_eq!(
            group_step(&Label::Header, Some(&Label::Header)),
            Append { start_new: true }
        );
        assert_eq!(group_step(&Label::Passage, None), Append { start_new: true });
        assert_eq!(
            group_step(&Label::Passage, Some(&Label::Header)),
            Append { start_new: false }
        );
        assert_eq!(
            group_step(&Label::Passage, Some(&Label::QuestionBlock)),
            Append { start_new: true }
        );
        assert_eq!(
            group_step(&Label::QuestionBlock, Some(&Label::Passage)),
            Append { start_new: false }
        );
        assert_eq!(
            group_step(&Label::QuestionBlock, Some(&Label::QuestionBlock)),
            Append { start_new: false }
        );
        assert_eq!(
            group_step(&Label::QuestionBlock, Some(&Label::Header)),
            Append { start_new: true }
        );
        assert_eq!(group_step(&Label::QuestionBlock, None), Append { start_new: true });
        assert_eq!(
            group_step(&Label::Passage, Some(&Label::Passage)),
            Append { start_new: true }
        );
    }

    #[test]
    fn test_concrete_scenario_grouping() {
        let stream = vec![
            linked(0, "header", (0.0, 0.0, 100.0, 20.0)),
            linked(1, "passage", (0.0, 25.0, 100.0, 100.0)),
            linked(2, "question_block", (0.0, 110.0, 100.0, 200.0)),
            linked(3, "question_block", (0.0, 210.0, 100.0, 300.0)),
            linked(4, "footer", (0.0, 310.0, 100.0, 330.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert_eq!(units.len(), 2);
        assert_eq!(
            labels(&units[0]),
            vec!["header", "passage", "question_block", "question_block"]
        );
        assert!(units[0].is_problem_set());
        assert_eq!(labels(&units[1]), vec!["footer"]);
    }

    #[test]
    fn test_header_always_starts_new_unit() {
        let stream = vec![
            linked(0, "question_block", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "header", (0.0, 20.0, 10.0, 30.0)),
            linked(2, "question_block", (0.0, 40.0, 10.0, 50.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert_eq!(units.len(), 3);
        assert_eq!(labels(&units[0]), vec!["question_block"]);
        assert_eq!(labels(&units[1]), vec!["header"]);
        assert_eq!(labels(&units[2]), vec!["question_block"]);
    }

    #[test]
    fn test_passage_after_questions_starts_new_set() {
        let stream = vec![
            linked(0, "passage", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "question_block", (0.0, 20.0, 10.0, 30.0)),
            linked(2, "passage", (0.0, 40.0, 10.0, 50.0)),
            linked(3, "question_block", (0.0, 60.0, 10.0, 70.0)),
            linked(4, "question_block", (0.0, 80.0, 10.0, 90.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert_eq!(units.len(), 2);
        assert_eq!(labels(&units[0]), vec!["passage", "question_block"]);
        assert_eq!(
            labels(&units[1]),
            vec!["passage", "question_block", "question_block"]
        );
    }

    #[test]
    fn test_standalone_closes_current_and_resets() {
        let stream = vec![
            linked(0, "header", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "stamp", (0.0, 20.0, 10.0, 30.0)),
            linked(2, "question_block", (0.0, 40.0, 10.0, 50.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert_eq!(units.len(), 3);
        assert_eq!(labels(&units[0]), vec!["header"]);
        assert_eq!(labels(&units[1]), vec!["stamp"]);
        assert!(!units[1].is_problem_set());
        assert_eq!(labels(&units[2]), vec!["question_block"]);
    }

    #[test]
    fn test_skips_numbers_and_figures() {
        let stream = vec![
            linked(0, "question_number", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "figure", (0.0, 20.0, 10.0, 30.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert!(units.is_empty());
    }

    #[test]
    fn test_empty_stream_yields_no_units() {
        let units = group_units(&[], &FakeCropper::default());
        assert!(units.is_empty());
    }

    #[test]
    fn test_consecutive_passages_split_sets() {
        let stream = vec![
            linked(0, "header", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "passage", (0.0, 20.0, 10.0, 30.0)),
            linked(2, "passage", (0.0, 40.0, 10.0, 50.0)),
            linked(3, "question_block", (0.0, 60.0, 10.0, 70.0)),
        ];
        let units = group_units(&stream, &FakeCropper::default());
        assert_eq!(units.len(), 2);
        assert_eq!(labels(&units[0]), vec!["header", "passage"]);
        assert_eq!(labels(&units[1]), vec!["passage", "question_block"]);
        assert!(units.iter().all(LogicalUnit::is_problem_set));
    }

    #[test]
    fn test_mask_regions_relative_to_rounded_origin() {
        let mut block = linked(0, "question_block", (100.6, 200.4, 400.0, 500.0));
        block
            .children
            .push(linked(1, "question_number", (110.0, 210.0, 140.0, 240.0)).detection);

        let cropper = FakeCropper::default();
        build_component(&block, &cropper).unwrap();

        let masks = cropper.masks.borrow();
        assert_eq!(masks[0].1, vec![BBox::new(9.0, 10.0, 39.0, 40.0)]);
    }

    #[test]
    fn test_question_block_masks_children_relative() {
        let mut block = linked(0, "question_block", (100.0, 200.0, 400.0, 500.0));
        block
            .children
            .push(linked(1, "question_number", (110.0, 210.0, 140.0, 240.0)).detection);
        block
            .attachments
            .push(linked(2, "figure", (120.0, 520.0, 300.0, 600.0)).detection);

        let cropper = FakeCropper::default();
        let component = build_component(&block, &cropper).unwrap();

        let masks = cropper.masks.borrow();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].1, vec![BBox::new(10.0, 10.0, 40.0, 40.0)]);
        assert_eq!(component.attachments.len(), 1);
        assert_eq!(component.attachments[0].label, Label::Figure);
        assert!(component.attachments[0].attachments.is_empty());
    }

    #[test]
    fn test_passage_is_not_masked() {
        let mut passage = linked(0, "passage", (0.0, 0.0, 100.0, 100.0));
        passage
            .children
            .push(linked(1, "question_number", (10.0, 10.0, 20.0, 20.0)).detection);
        let cropper = FakeCropper::default();
        build_component(&passage, &cropper).unwrap();
        assert!(cropper.masks.borrow().is_empty());
    }

    #[test]
    fn test_failed_crop_skips_component() {
        let stream = vec![
            linked(0, "header", (0.0, 0.0, 10.0, 10.0)),
            linked(1, "passage", (0.0, 20.0, 10.0, 30.0)),
            linked(2, "question_block", (0.0, 40.0, 10.0, 50.0)),
        ];
        let cropper = FakeCropper {
            fail_label: Some(Label::Passage),
            ..Default::default()
        };
        let units = group_units(&stream, &cropper);
        assert_eq!(units.len(), 2);
        assert_eq!(labels(&units[0]), vec!["header"]);
        assert_eq!(labels(&units[1]), vec!["question_block"]);
    }

    #[test]
    fn test_logical_unit_rejects_empty() {
        assert!(LogicalUnit::new(vec![]).is_none());
        let unit = LogicalUnit::new(vec![Component::new(Label::Header, ImageRef::new("h.png"))])
            .unwrap();
        assert_eq!(unit.len(), 1);
        assert_eq!(unit.first_label(), &Label::Header);
    }

    #[test]
    fn test_is_problem_set_ordering() {
        let unit = |labels: &[Label]| {
            LogicalUnit::new(
                labels
                    .iter()
                    .map(|l| Component::new(l.clone(), ImageRef::new("x.png")))
                    .collect(),
            )
            .unwrap()
        };
        assert!(unit(&[Label::Header, Label::Passage, Label::QuestionBlock]).is_problem_set());
        assert!(unit(&[Label::QuestionBlock, Label::QuestionBlock]).is_problem_set());
        assert!(!unit(&[Label::QuestionBlock, Label::Passage]).is_problem_set());
        assert!(!unit(&[Label::Passage, Label::Passage]).is_problem_set());
        assert!(!unit(&[Label::Footer]).is_problem_set());
    }
}
