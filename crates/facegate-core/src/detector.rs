//! Face locator: pluggable detectors, multi-pass candidate collection
//! and overlap de-duplication, plus the largest-face selection policy.

use crate::raster;
use crate::types::{FaceRegion, Rect};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---
const DEFAULT_MIN_AREA: u64 = 1000;
const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.5;
const CONTRAST_THRESHOLD: f64 = 40.0;
const TEXTURE_THRESHOLD: f64 = 18.0;
/// How much of the background's own texture is added to the texture threshold.
const BACKGROUND_TEXTURE_GAIN: f64 = 1.5;
const MIN_ASPECT: f64 = 0.5;
const MAX_ASPECT: f64 = 2.0;
const FULL_FRAME_MIN_STD: f64 = 4.0;
const CASCADE_MIN_FACE_SIZE: u32 = 20;
const CASCADE_BASE_SCORE: f64 = 2.0;
const CASCADE_NEIGHBOR_SCORE_STEP: f64 = 0.5;
const CASCADE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector failed: {0}")]
    Failed(String),
    #[error("unknown detector: {0}")]
    UnknownDetector(String),
    #[error("the cascade detector requires a model file")]
    MissingModel,
    #[error("failed to load detector model {path}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected ({count}); exactly one is required")]
    MultipleFacesDetected { count: usize },
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Parameters for one detection pass. Several passes at different scales
/// trade recall for precision; their candidates are pooled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionPass {
    /// Minimum side of a candidate rectangle, in pixels.
    pub min_size: u32,
    /// Growth of the search window between pyramid levels (> 1).
    pub scale_factor: f32,
    /// Required support for a candidate. The cascade detector raises its
    /// score threshold with it; the contrast detector reads it as the
    /// minimum number of connected cells.
    pub min_neighbors: u32,
    /// Side of the contrast detector's analysis cell, in pixels.
    pub cell_size: u32,
}

pub const DEFAULT_PASSES: [DetectionPass; 3] = [
    DetectionPass { min_size: 30, scale_factor: 1.1, min_neighbors: 4, cell_size: 4 },
    DetectionPass { min_size: 50, scale_factor: 1.2, min_neighbors: 3, cell_size: 6 },
    DetectionPass { min_size: 80, scale_factor: 1.3, min_neighbors: 3, cell_size: 8 },
];

/// A face detection strategy over a grayscale raster.
pub trait FaceDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return candidate face rectangles for one pass, in any order.
    fn detect(&self, gray: &GrayImage, pass: &DetectionPass) -> Result<Vec<Rect>, DetectorError>;
}

/// Which built-in detector to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    #[default]
    Contrast,
    FullFrame,
    Cascade,
}

impl DetectorKind {
    /// Instantiate the detector. Only `Cascade` reads `model_path`.
    pub fn build(self, model_path: Option<&Path>) -> Result<Box<dyn FaceDetector>, DetectorError> {
        Ok(match self {
            DetectorKind::Contrast => Box::new(ContrastDetector::default()),
            DetectorKind::FullFrame => Box::new(FullFrameDetector::default()),
            DetectorKind::Cascade => {
                let path = model_path.ok_or(DetectorError::MissingModel)?;
                Box::new(RustfaceDetector::from_path(path)?)
            }
        })
    }
}

impl FromStr for DetectorKind {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contrast" => Ok(DetectorKind::Contrast),
            "full-frame" => Ok(DetectorKind::FullFrame),
            "cascade" => Ok(DetectorKind::Cascade),
            other => Err(DetectorError::UnknownDetector(other.to_string())),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Contrast => f.write_str("contrast"),
            DetectorKind::FullFrame => f.write_str("full-frame"),
            DetectorKind::Cascade => f.write_str("cascade"),
        }
    }
}

/// SeetaFace frontal cascade (funnel-structured) detector via `rustface`.
///
/// The model is parsed once; each pass runs a fresh detector configured
/// from the pass parameters.
pub struct RustfaceDetector {
    model: rustface::Model,
}

/// Cascade settings derived from one detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CascadeSettings {
    min_face_size: u32,
    pyramid_scale_factor: f32,
    score_thresh: f64,
}

impl CascadeSettings {
    fn for_pass(pass: &DetectionPass) -> Self {
        // rustface shrinks the image per level instead of growing the window.
        let scale = if pass.scale_factor > 1.0 { 1.0 / pass.scale_factor } else { 0.8 };
        Self {
            min_face_size: pass.min_size.max(CASCADE_MIN_FACE_SIZE),
            pyramid_scale_factor: scale.clamp(0.1, 0.99),
            score_thresh: CASCADE_BASE_SCORE
                + CASCADE_NEIGHBOR_SCORE_STEP * (pass.min_neighbors as f64 - 3.0),
        }
    }
}

impl RustfaceDetector {
    /// Load a `seeta_fd_frontal_v1.0.bin` style model file.
    pub fn from_path(path: &Path) -> Result<Self, DetectorError> {
        let load_error = |source| DetectorError::ModelLoad {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(load_error)?;
        let model = rustface::read_model(BufReader::new(file)).map_err(load_error)?;
        tracing::info!(path = %path.display(), "cascade model loaded");
        Ok(Self { model })
    }
}

impl FaceDetector for RustfaceDetector {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect(&self, gray: &GrayImage, pass: &DetectionPass) -> Result<Vec<Rect>, DetectorError> {
        let (w, h) = gray.dimensions();
        let settings = CascadeSettings::for_pass(pass);
        if w.min(h) < settings.min_face_size {
            return Ok(Vec::new());
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(settings.min_face_size);
        detector.set_score_thresh(settings.score_thresh);
        detector.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        detector.set_slide_window_step(CASCADE_WINDOW_STEP, CASCADE_WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), w, h));
        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let x0 = bbox.x().max(0) as u32;
                let y0 = bbox.y().max(0) as u32;
                let x1 = (bbox.x() as i64 + bbox.width() as i64).clamp(0, w as i64) as u32;
                let y1 = (bbox.y() as i64 + bbox.height() as i64).clamp(0, h as i64) as u32;
                (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
            })
            .collect())
    }
}

/// Classical segmentation detector.
///
/// Splits the image into square cells and marks a cell as foreground when
/// its mean departs from the background estimate (border median) or when
/// its local standard deviation shows texture. Both thresholds rise with
/// the texture of the border cells, so a grainy backdrop does not count as
/// foreground. Connected foreground cells (4-connectivity) form a candidate
/// whose bounding box must have a plausible face aspect ratio and must not
/// span the whole frame.
pub struct ContrastDetector {
    contrast_threshold: f64,
    texture_threshold: f64,
    min_aspect: f64,
    max_aspect: f64,
}

impl Default for ContrastDetector {
    fn default() -> Self {
        Self {
            contrast_threshold: CONTRAST_THRESHOLD,
            texture_threshold: TEXTURE_THRESHOLD,
            min_aspect: MIN_ASPECT,
            max_aspect: MAX_ASPECT,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    values[(values.len() - 1) / 2]
}

impl ContrastDetector {
    /// Foreground mask over the cell grid, row-major.
    fn foreground_cells(&self, gray: &GrayImage, cell: u32, cols: u32, rows: u32) -> Vec<bool> {
        let background = raster::border_median(gray) as f64;
        let mut stats = Vec::with_capacity((cols * rows) as usize);
        let mut samples = Vec::with_capacity((cell * cell) as usize);

        for row in 0..rows {
            for col in 0..cols {
                samples.clear();
                for y in row * cell..(row + 1) * cell {
                    for x in col * cell..(col + 1) * cell {
                        samples.push(gray.get_pixel(x, y)[0]);
                    }
                }
                stats.push(raster::mean_std(&samples));
            }
        }

        let mut border_texture: Vec<f64> = stats
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let (col, row) = (*i as u32 % cols, *i as u32 / cols);
                col == 0 || row == 0 || col + 1 == cols || row + 1 == rows
            })
            .map(|(_, &(_, std))| std)
            .collect();
        let grain = median(&mut border_texture);
        let contrast = self.contrast_threshold + grain;
        let texture = self.texture_threshold + BACKGROUND_TEXTURE_GAIN * grain;

        stats
            .iter()
            .map(|&(mean, std)| (mean - background).abs() > contrast || std > texture)
            .collect()
    }
}

impl FaceDetector for ContrastDetector {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn detect(&self, gray: &GrayImage, pass: &DetectionPass) -> Result<Vec<Rect>, DetectorError> {
        let cell = pass.cell_size.max(1);
        let cols = gray.width() / cell;
        let rows = gray.height() / cell;
        if cols == 0 || rows == 0 {
            return Ok(Vec::new());
        }

        let mask = self.foreground_cells(gray, cell, cols, rows);
        let mut visited = vec![false; mask.len()];
        let mut candidates = Vec::new();
        let mut stack = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            stack.push(start);
            let (mut c0, mut r0, mut c1, mut r1) = (u32::MAX, u32::MAX, 0u32, 0u32);
            let mut count = 0u32;

            while let Some(idx) = stack.pop() {
                let col = idx as u32 % cols;
                let row = idx as u32 / cols;
                count += 1;
                c0 = c0.min(col);
                r0 = r0.min(row);
                c1 = c1.max(col);
                r1 = r1.max(row);

                let mut visit = |c: u32, r: u32| {
                    let n = (r * cols + c) as usize;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if col > 0 {
                    visit(col - 1, row);
                }
                if col + 1 < cols {
                    visit(col + 1, row);
                }
                if row > 0 {
                    visit(col, row - 1);
                }
                if row + 1 < rows {
                    visit(col, row + 1);
                }
            }

            if count < pass.min_neighbors {
                continue;
            }
            // A component touching all four edges is backdrop, not a face.
            if c0 == 0 && r0 == 0 && c1 + 1 == cols && r1 + 1 == rows {
                continue;
            }

            let rect = Rect::new(c0 * cell, r0 * cell, (c1 - c0 + 1) * cell, (r1 - r0 + 1) * cell);
            if rect.width.min(rect.height) < pass.min_size {
                continue;
            }
            let aspect = rect.width as f64 / rect.height as f64;
            if aspect < self.min_aspect || aspect > self.max_aspect {
                continue;
            }
            candidates.push(rect);
        }

        Ok(candidates)
    }
}

/// Treats the whole raster as one face, for callers that already hold a
/// tightly cropped face photo. Featureless (near-uniform) rasters yield
/// no candidate.
pub struct FullFrameDetector {
    min_std: f64,
}

impl Default for FullFrameDetector {
    fn default() -> Self {
        Self { min_std: FULL_FRAME_MIN_STD }
    }
}

impl FaceDetector for FullFrameDetector {
    fn name(&self) -> &'static str {
        "full-frame"
    }

    fn detect(&self, gray: &GrayImage, pass: &DetectionPass) -> Result<Vec<Rect>, DetectorError> {
        let (w, h) = gray.dimensions();
        if w.min(h) < pass.min_size {
            return Ok(Vec::new());
        }
        let (_, std) = raster::mean_std(gray.as_raw());
        if std < self.min_std {
            return Ok(Vec::new());
        }
        Ok(vec![Rect::new(0, 0, w, h)])
    }
}

/// How many faces the caller tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatePolicy {
    /// Pick the largest surviving candidate.
    Largest,
    /// Fail when more than one distinct candidate survives.
    ExactlyOne,
}

/// Locator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub passes: Vec<DetectionPass>,
    /// Candidates smaller than this many pixels are discarded.
    pub min_area: u64,
    /// Overlap (intersection over the smaller area) above which the
    /// smaller of two candidates is suppressed.
    pub overlap_threshold: f32,
    /// Equalize the histogram before detection.
    pub equalize: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            passes: DEFAULT_PASSES.to_vec(),
            min_area: DEFAULT_MIN_AREA,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            equalize: false,
        }
    }
}

/// Finds the most plausible face in an image.
pub struct FaceLocator {
    detector: Box<dyn FaceDetector>,
    config: LocatorConfig,
}

impl FaceLocator {
    pub fn new(detector: Box<dyn FaceDetector>, config: LocatorConfig) -> Self {
        Self { detector, config }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Grayscale working copy and all distinct face rectangles in it,
    /// largest first. The copy is not equalized; equalization only feeds
    /// the detector.
    pub fn candidates(&self, image: &DynamicImage) -> Result<(GrayImage, Vec<Rect>), LocateError> {
        let gray = raster::to_gray(image);
        if gray.width() == 0 || gray.height() == 0 {
            return Ok((gray, Vec::new()));
        }

        let equalized;
        let search = if self.config.equalize {
            let mut work = gray.clone();
            raster::equalize_histogram(&mut work);
            equalized = work;
            &equalized
        } else {
            &gray
        };

        let mut pooled = Vec::new();
        for pass in &self.config.passes {
            let found = self.detector.detect(search, pass)?;
            tracing::debug!(
                detector = self.detector.name(),
                min_size = pass.min_size,
                found = found.len(),
                "detection pass"
            );
            pooled.extend(found);
        }

        let faces = deduplicate(pooled, self.config.min_area, self.config.overlap_threshold);
        Ok((gray, faces))
    }

    /// Locate one face and crop its grayscale pixels from the source image.
    pub fn locate(&self, image: &DynamicImage, policy: LocatePolicy) -> Result<FaceRegion, LocateError> {
        let (gray, faces) = self.candidates(image)?;

        let rect = match (faces.first(), faces.len(), policy) {
            (None, _, _) => return Err(LocateError::NoFaceDetected),
            (Some(_), n, LocatePolicy::ExactlyOne) if n > 1 => {
                return Err(LocateError::MultipleFacesDetected { count: n })
            }
            (Some(rect), _, _) => *rect,
        };

        tracing::debug!(
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            candidates = faces.len(),
            "face located"
        );

        Ok(FaceRegion {
            rect,
            pixels: raster::crop(&gray, &rect),
        })
    }
}

/// Overlap coefficient: intersection over the smaller area.
fn overlap(a: &Rect, b: &Rect) -> f32 {
    let smaller = a.area().min(b.area());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection_area(b) as f32 / smaller as f32
}

/// Drop undersized candidates, then suppress overlapping ones (keeping
/// the larger). Distinct faces survive whatever their relative size.
///
/// Output is sorted largest first; equal areas are ordered top-to-bottom,
/// then left-to-right.
fn deduplicate(mut candidates: Vec<Rect>, min_area: u64, overlap_threshold: f32) -> Vec<Rect> {
    candidates.retain(|r| r.area() >= min_area.max(1));
    candidates.sort_by(|a, b| {
        b.area()
            .cmp(&a.area())
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });

    let mut keep: Vec<Rect> = Vec::new();
    for rect in candidates {
        if keep.iter().all(|k| overlap(k, &rect) <= overlap_threshold) {
            keep.push(rect);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn paint_ellipse(gray: &mut GrayImage, cx: f32, cy: f32, rx: f32, ry: f32) {
        for y in 0..gray.height() {
            for x in 0..gray.width() {
                let dx = (x as f32 - cx) / rx;
                let dy = (y as f32 - cy) / ry;
                if dx * dx + dy * dy <= 1.0 {
                    let shade = 150 + ((x + 2 * y) % 40) as u8;
                    gray.put_pixel(x, y, Luma([shade]));
                }
            }
        }
    }

    fn grain(x: u32, y: u32, seed: u32) -> u8 {
        let h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ seed.wrapping_mul(83_492_791))
            .wrapping_mul(0x9E37_79B1);
        ((h >> 24) % 41) as u8
    }

    /// Per-pixel noise in 40..=80, about 12 levels of standard deviation.
    fn grainy(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([40 + grain(x, y, seed)]))
    }

    fn locator() -> FaceLocator {
        FaceLocator::new(Box::new(ContrastDetector::default()), LocatorConfig::default())
    }

    #[test]
    fn test_overlap_nested() {
        let outer = Rect::new(0, 0, 100, 100);
        let inner = Rect::new(10, 10, 20, 20);
        assert!((overlap(&outer, &inner) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(50, 50, 10, 10);
        assert_eq!(overlap(&a, &b), 0.0);
    }

    #[test]
    fn test_dedup_keeps_largest_of_overlapping() {
        let rects = vec![
            Rect::new(12, 12, 60, 60),
            Rect::new(10, 10, 64, 64),
            Rect::new(8, 8, 68, 68),
        ];
        let out = deduplicate(rects, 1000, 0.5);
        assert_eq!(out, vec![Rect::new(8, 8, 68, 68)]);
    }

    #[test]
    fn test_dedup_drops_small_keeps_smaller_distinct_face() {
        let rects = vec![
            Rect::new(0, 0, 20, 20), // below min area
            Rect::new(100, 0, 40, 40),
            Rect::new(200, 0, 80, 80),
        ];
        let out = deduplicate(rects, 1000, 0.5);
        assert_eq!(out, vec![Rect::new(200, 0, 80, 80), Rect::new(100, 0, 40, 40)]);
    }

    #[test]
    fn test_dedup_keeps_two_distinct_faces_in_order() {
        let rects = vec![Rect::new(150, 20, 70, 90), Rect::new(20, 20, 70, 90)];
        let out = deduplicate(rects, 1000, 0.5);
        assert_eq!(out, vec![Rect::new(20, 20, 70, 90), Rect::new(150, 20, 70, 90)]);
    }

    #[test]
    fn test_dedup_empty() {
        assert!(deduplicate(vec![], 1000, 0.5).is_empty());
    }

    #[test]
    fn test_contrast_detector_blank_image() {
        let gray = GrayImage::from_pixel(160, 160, Luma([128]));
        let found = ContrastDetector::default()
            .detect(&gray, &DEFAULT_PASSES[0])
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_contrast_detector_single_blob() {
        let mut gray = GrayImage::from_pixel(200, 200, Luma([60]));
        paint_ellipse(&mut gray, 100.0, 100.0, 35.0, 45.0);
        let found = ContrastDetector::default()
            .detect(&gray, &DEFAULT_PASSES[0])
            .unwrap();
        assert_eq!(found.len(), 1);
        let r = found[0];
        assert!(r.x <= 66 && r.right() >= 134, "{r:?}");
        assert!(r.y <= 56 && r.bottom() >= 144, "{r:?}");
    }

    #[test]
    fn test_contrast_detector_rejects_thin_stripe() {
        let mut gray = GrayImage::from_pixel(200, 200, Luma([60]));
        for y in 90..110 {
            for x in 0..200 {
                gray.put_pixel(x, y, Luma([220]));
            }
        }
        let found = ContrastDetector::default()
            .detect(&gray, &DEFAULT_PASSES[0])
            .unwrap();
        assert!(found.is_empty(), "{found:?}");
    }

    #[test]
    fn test_full_frame_detector() {
        let mut gray = GrayImage::from_pixel(100, 100, Luma([60]));
        paint_ellipse(&mut gray, 50.0, 50.0, 30.0, 40.0);
        let found = FullFrameDetector::default()
            .detect(&gray, &DEFAULT_PASSES[0])
            .unwrap();
        assert_eq!(found, vec![Rect::new(0, 0, 100, 100)]);

        let blank = GrayImage::from_pixel(100, 100, Luma([60]));
        assert!(FullFrameDetector::default()
            .detect(&blank, &DEFAULT_PASSES[0])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_locate_no_face() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 200, Luma([90])));
        let err = locator().locate(&image, LocatePolicy::Largest).unwrap_err();
        assert!(matches!(err, LocateError::NoFaceDetected));
    }

    #[test]
    fn test_locate_two_faces_policy() {
        let mut gray = GrayImage::from_pixel(240, 160, Luma([60]));
        paint_ellipse(&mut gray, 60.0, 80.0, 35.0, 45.0);
        paint_ellipse(&mut gray, 180.0, 80.0, 35.0, 45.0);
        let image = DynamicImage::ImageLuma8(gray);

        let err = locator().locate(&image, LocatePolicy::ExactlyOne).unwrap_err();
        assert!(matches!(err, LocateError::MultipleFacesDetected { count: 2 }));

        let region = locator().locate(&image, LocatePolicy::Largest).unwrap();
        assert!(region.rect.x < 120, "largest-first ties resolve left-to-right");
    }

    #[test]
    fn test_locate_prefers_largest_face() {
        let mut gray = GrayImage::from_pixel(300, 200, Luma([60]));
        paint_ellipse(&mut gray, 70.0, 100.0, 30.0, 40.0);
        paint_ellipse(&mut gray, 200.0, 100.0, 60.0, 80.0);
        let image = DynamicImage::ImageLuma8(gray);

        let region = locator().locate(&image, LocatePolicy::Largest).unwrap();
        assert!(region.rect.x > 120, "{:?}", region.rect);
        assert_eq!(region.pixels.dimensions(), (region.rect.width, region.rect.height));
    }

    #[test]
    fn test_locate_unequal_faces_policy() {
        let mut gray = GrayImage::from_pixel(260, 180, Luma([60]));
        paint_ellipse(&mut gray, 70.0, 90.0, 40.0, 52.0);
        paint_ellipse(&mut gray, 190.0, 90.0, 25.0, 33.0);
        let image = DynamicImage::ImageLuma8(gray);

        let err = locator().locate(&image, LocatePolicy::ExactlyOne).unwrap_err();
        assert!(matches!(err, LocateError::MultipleFacesDetected { count: 2 }), "{err}");

        let region = locator().locate(&image, LocatePolicy::Largest).unwrap();
        assert!(region.rect.right() < 130, "{:?}", region.rect);
    }

    #[test]
    fn test_textured_background_is_not_a_face() {
        let image = DynamicImage::ImageLuma8(grainy(300, 240, 9));
        let err = locator().locate(&image, LocatePolicy::Largest).unwrap_err();
        assert!(matches!(err, LocateError::NoFaceDetected), "{err}");
    }

    #[test]
    fn test_face_on_textured_background() {
        let mut gray = grainy(300, 240, 9);
        paint_ellipse(&mut gray, 150.0, 120.0, 40.0, 52.0);
        let image = DynamicImage::ImageLuma8(gray);

        let region = locator().locate(&image, LocatePolicy::ExactlyOne).unwrap();
        let r = region.rect;
        assert!(r.width < 120 && r.height < 150, "{r:?}");
        assert!(r.x <= 116 && r.right() >= 184, "{r:?}");
        assert!(r.y <= 76 && r.bottom() >= 164, "{r:?}");
    }

    #[test]
    fn test_two_faces_on_textured_background() {
        let mut gray = grainy(300, 240, 9);
        paint_ellipse(&mut gray, 80.0, 100.0, 40.0, 52.0);
        paint_ellipse(&mut gray, 220.0, 130.0, 35.0, 45.0);
        let image = DynamicImage::ImageLuma8(gray);

        let err = locator().locate(&image, LocatePolicy::ExactlyOne).unwrap_err();
        assert!(matches!(err, LocateError::MultipleFacesDetected { count: 2 }), "{err}");
    }

    #[test]
    fn test_cascade_settings_follow_passes() {
        let fine = CascadeSettings::for_pass(&DEFAULT_PASSES[0]);
        assert_eq!(fine.min_face_size, 30);
        assert!((fine.pyramid_scale_factor - 1.0 / 1.1).abs() < 1e-6);
        assert!((fine.score_thresh - 2.5).abs() < 1e-9);

        let coarse = CascadeSettings::for_pass(&DEFAULT_PASSES[2]);
        assert_eq!(coarse.min_face_size, 80);
        assert!(coarse.pyramid_scale_factor < fine.pyramid_scale_factor);
        assert!((coarse.score_thresh - 2.0).abs() < 1e-9);

        let tiny = DetectionPass { min_size: 5, scale_factor: 1.0, min_neighbors: 3, cell_size: 4 };
        let settings = CascadeSettings::for_pass(&tiny);
        assert_eq!(settings.min_face_size, 20);
        assert!(settings.pyramid_scale_factor < 1.0);
    }

    #[test]
    fn test_cascade_requires_model() {
        assert!(matches!(
            DetectorKind::Cascade.build(None),
            Err(DetectorError::MissingModel)
        ));
        assert!(matches!(
            DetectorKind::Cascade.build(Some(Path::new("/nonexistent/seeta.bin"))),
            Err(DetectorError::ModelLoad { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            DetectorKind::Cascade.build(Some(&empty)),
            Err(DetectorError::ModelLoad { .. })
        ));

        assert_eq!(DetectorKind::Contrast.build(None).unwrap().name(), "contrast");
        assert_eq!(DetectorKind::FullFrame.build(None).unwrap().name(), "full-frame");
    }

    #[test]
    fn test_detector_kind_parse() {
        assert_eq!("contrast".parse::<DetectorKind>().unwrap(), DetectorKind::Contrast);
        assert_eq!("full-frame".parse::<DetectorKind>().unwrap(), DetectorKind::FullFrame);
        assert_eq!("cascade".parse::<DetectorKind>().unwrap(), DetectorKind::Cascade);
        assert_eq!(DetectorKind::Cascade.to_string(), "cascade");
        assert!("haar".parse::<DetectorKind>().is_err());
    }
}
