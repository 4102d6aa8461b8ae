//! Per-photo metadata stored alongside each vector.
//!
//! Visual-collection entries carry a [`PhotoMetadata`], which is either a
//! plain [`BaseRecord`] (visual-only indexing) or an [`AnalyzedRecord`] when
//! image understanding succeeded. Semantic-collection entries always carry an
//! [`AnalyzedRecord`]. Both shapes reject unknown keys when read back, so the
//! stored form never grows ad hoc fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

/// File-level facts known for every indexed photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseRecord {
    pub path: String,
    pub filename: String,
    pub content_hash: String,
    pub file_size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    /// Cleared by maintenance when the file disappears from disk.
    #[serde(default = "default_true")]
    pub exists: bool,
    /// Managed folder the photo was indexed under, if any.
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl BaseRecord {
    pub fn path(&self) -> &Path {
        Path::new(&self.path)
    }
}

/// Axis-aligned box in pixel coordinates: `[x1, y1, x2, y2]`.
pub type BoundingBox = [f32; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectedObject {
    pub label: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// Output of the image-understanding analyzer for one photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub caption: String,
    pub ocr_text: String,
    pub objects: Vec<DetectedObject>,
}

impl Analysis {
    /// Text fed to the semantic encoder: caption and OCR text joined by a
    /// space and trimmed. `None` when there is nothing to encode.
    pub fn semantic_text(&self) -> Option<String> {
        let text = format!("{} {}", self.caption.trim(), self.ocr_text.trim());
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// A [`BaseRecord`] enriched with analyzer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzedRecord {
    pub base: BaseRecord,
    pub caption: String,
    pub ocr_text: String,
    pub objects: Vec<DetectedObject>,
}

impl AnalyzedRecord {
    /// Build an analyzed record, validating the analyzer output.
    ///
    /// Text fields are trimmed; every detected object needs a non-empty
    /// label, a confidence within `[0, 1]` and finite box coordinates.
    pub fn new(base: BaseRecord, analysis: Analysis) -> Result<Self> {
        for object in &analysis.objects {
            if object.label.trim().is_empty() {
                return Err(Error::InvalidRecord(format!(
                    "detected object without a label in {}",
                    base.path
                )));
            }
            if !(0.0..=1.0).contains(&object.confidence) {
                return Err(Error::InvalidRecord(format!(
                    "confidence {} for '{}' is outside [0, 1]",
                    object.confidence, object.label
                )));
            }
            if object.bounding_box.iter().any(|v| !v.is_finite()) {
                return Err(Error::InvalidRecord(format!(
                    "bounding box for '{}' is not finite",
                    object.label
                )));
            }
        }

        Ok(Self {
            base,
            caption: analysis.caption.trim().to_string(),
            ocr_text: analysis.ocr_text.trim().to_string(),
            objects: analysis.objects,
        })
    }
}

/// Metadata attached to a visual-collection entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum PhotoMetadata {
    Base(BaseRecord),
    Analyzed(AnalyzedRecord),
}

impl PhotoMetadata {
    pub fn base(&self) -> &BaseRecord {
        match self {
            Self::Base(base) => base,
            Self::Analyzed(analyzed) => &analyzed.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseRecord {
        match self {
            Self::Base(base) => base,
            Self::Analyzed(analyzed) => &mut analyzed.base,
        }
    }

    /// Whether image understanding ran successfully for this photo.
    pub fn analyzed(&self) -> bool {
        matches!(self, Self::Analyzed(_))
    }

    pub fn caption(&self) -> Option<&str> {
        match self {
            Self::Base(_) => None,
            Self::Analyzed(a) => Some(&a.caption),
        }
    }

    pub fn ocr_text(&self) -> Option<&str> {
        match self {
            Self::Base(_) => None,
            Self::Analyzed(a) => Some(&a.ocr_text),
        }
    }

    pub fn objects(&self) -> &[DetectedObject] {
        match self {
            Self::Base(_) => &[],
            Self::Analyzed(a) => &a.objects,
        }
    }
}
