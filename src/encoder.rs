//! Collaborator seams for the neural models.
//!
//! The engine never loads models itself. The composing application supplies
//! implementations of these traits as `Arc<dyn Trait>` handles, which keeps
//! model formats and device placement out of this crate and lets tests use
//! small deterministic stubs.

use std::path::Path;

use image::DynamicImage;

use crate::{error::Result, record::Analysis};

/// Maps images and text into a shared visual embedding space.
pub trait VisualEncoder: Send + Sync {
    /// Embed a decoded image.
    fn encode_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Embed a natural-language query into the same space as images.
    fn encode_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Hint that buffered model memory may be released.
    fn release_memory(&self) {}
}

/// Maps text (captions, OCR output, queries) into a text embedding space.
pub trait SemanticEncoder: Send + Sync {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>>;

    fn release_memory(&self) {}
}

/// Automated image understanding: captioning, OCR and object detection.
pub trait ImageAnalyzer: Send + Sync {
    /// Analyze the image at `path`.
    ///
    /// Implementations may return an empty caption or OCR text; the indexing
    /// pipeline treats that as "nothing to encode" rather than an error.
    fn analyze(&self, path: &Path) -> Result<Analysis>;

    fn release_memory(&self) {}
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
///
/// # Examples
///
/// ```
/// use photosearch::encoder::l2_normalize;
///
/// let mut v = vec![3.0, 4.0];
/// l2_normalize(&mut v);
/// assert!((v[0] - 0.6).abs() < 1e-6);
/// assert!((v[1] - 0.8).abs() < 1e-6);
/// ```
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}
