use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Area shared by both rectangles.
    pub fn intersection_area(&self, other: &Rect) -> u64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        (x2 - x1) as u64 * (y2 - y1) as u64
    }

    /// Clamp the rectangle so it lies inside a `width` × `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// A located face: its rectangle in the source image and the grayscale
/// pixels it bounds. Never persisted.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub rect: Rect,
    pub pixels: GrayImage,
}

/// Comparable summary of one face, produced by the extractor.
///
/// Immutable once created: fields are only readable, and re-registration
/// replaces a stored record wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub(crate) intensity_histogram: Vec<u32>,
    pub(crate) texture_histogram: Vec<u32>,
    pub(crate) mean_intensity: f64,
    pub(crate) std_intensity: f64,
    pub(crate) corner_patch: Vec<u8>,
    pub(crate) center_patch: Vec<u8>,
    /// (width, height) of the detected region before normalization.
    pub(crate) dimensions: (u32, u32),
    /// Side of the square the region was normalized to.
    pub(crate) canonical_size: u32,
    /// Hex SHA-256 of the normalized grayscale pixels.
    pub(crate) digest: String,
}

impl FeatureRecord {
    pub fn intensity_histogram(&self) -> &[u32] {
        &self.intensity_histogram
    }

    pub fn texture_histogram(&self) -> &[u32] {
        &self.texture_histogram
    }

    pub fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    pub fn std_intensity(&self) -> f64 {
        self.std_intensity
    }

    pub fn corner_patch(&self) -> &[u8] {
        &self.corner_patch
    }

    pub fn center_patch(&self) -> &[u8] {
        &self.center_patch
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn canonical_size(&self) -> u32 {
        self.canonical_size
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether two records were produced with the same extraction layout
    /// and can therefore be compared term by term.
    pub fn is_compatible(&self, other: &FeatureRecord) -> bool {
        self.canonical_size == other.canonical_size
            && self.intensity_histogram.len() == other.intensity_histogram.len()
            && self.texture_histogram.len() == other.texture_histogram.len()
            && self.corner_patch.len() == other.corner_patch.len()
            && self.center_patch.len() == other.center_patch.len()
    }
}

/// Outcome of comparing two feature records.
///
/// `score` is the weighted similarity in [0, 1]. Sub-scores are `None`
/// when the term was undefined (zero variance on either side) or carried
/// no weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub score: f32,
    pub intensity: Option<f32>,
    pub texture: Option<f32>,
    pub corner: Option<f32>,
    pub center: Option<f32>,
    pub stats: Option<f32>,
    pub area: Option<f32>,
}

impl MatchResult {
    pub(crate) fn zero() -> Self {
        Self {
            score: 0.0,
            intensity: None,
            texture: None,
            corner: None,
            center: None,
            stats: None,
            area: None,
        }
    }
}

/// A positive identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub identity: String,
    /// Weighted similarity in [0, 1]; at least the requested threshold.
    pub confidence: f32,
    /// Face rectangle in the query image.
    pub region: Rect,
}

/// Result of a successful register or update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub identity: String,
    pub region: Rect,
    pub digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 10, 10);
        assert_eq!(a.intersection_area(&b), 0);
    }

    #[test]
    fn test_intersection_touching_edges() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersection_area(&b), 0);
    }

    #[test]
    fn test_intersection_partial() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 0, 10, 10);
        assert_eq!(a.intersection_area(&b), 50);
    }

    #[test]
    fn test_clamp_to_image() {
        let r = Rect::new(90, 40, 30, 30).clamp_to(100, 50);
        assert_eq!(r, Rect::new(90, 40, 10, 10));
    }

    #[test]
    fn test_clamp_outside_image_is_empty() {
        let r = Rect::new(120, 10, 30, 30).clamp_to(100, 50);
        assert_eq!(r.area(), 0);
    }
}
