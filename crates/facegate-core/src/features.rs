//! Feature extraction: canonical resize, intensity and LBP texture
//! histograms, intensity statistics and fixed patch samples.

use crate::raster;
use crate::types::{FaceRegion, FeatureRecord};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_CANONICAL_SIZE: u32 = 100;
pub const DEFAULT_HISTOGRAM_BINS: usize = 256;
const MIN_CANONICAL_SIZE: u32 = 20;
const LBP_BINS: usize = 256;

/// Neighbor offsets (dx, dy) in bit order: starting top-left, clockwise.
const LBP_NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("degenerate face region: {width}x{height}")]
    Degenerate { width: u32, height: u32 },
    #[error("invalid extractor parameters: {0}")]
    InvalidParams(String),
}

/// Extraction layout. Must be identical at registration and recognition
/// time for records to be comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Side of the square every face is resampled to.
    pub canonical_size: u32,
    /// Intensity histogram bins over [0, 256).
    pub histogram_bins: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            canonical_size: DEFAULT_CANONICAL_SIZE,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.canonical_size < MIN_CANONICAL_SIZE {
            return Err(ExtractError::InvalidParams(format!(
                "canonical size {} is below the minimum of {MIN_CANONICAL_SIZE}",
                self.canonical_size
            )));
        }
        if self.histogram_bins == 0 || self.histogram_bins > 256 {
            return Err(ExtractError::InvalidParams(format!(
                "histogram bins must be in 1..=256, got {}",
                self.histogram_bins
            )));
        }
        Ok(())
    }
}

/// Turns a located face region into a [`FeatureRecord`].
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract features from a face region.
    ///
    /// Only a zero-area region fails; low-quality input still yields a
    /// record and is left to the matcher to score poorly.
    pub fn extract(&self, region: &FaceRegion) -> Result<FeatureRecord, ExtractError> {
        let (width, height) = region.pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractError::Degenerate { width, height });
        }

        let size = self.config.canonical_size;
        let normalized = imageops::resize(&region.pixels, size, size, FilterType::Lanczos3);

        let (mean_intensity, std_intensity) = raster::mean_std(normalized.as_raw());

        Ok(FeatureRecord {
            intensity_histogram: intensity_histogram(&normalized, self.config.histogram_bins),
            texture_histogram: lbp_histogram(&normalized),
            mean_intensity,
            std_intensity,
            corner_patch: corner_patch(&normalized),
            center_patch: center_patch(&normalized),
            dimensions: (width, height),
            canonical_size: size,
            digest: digest_hex(normalized.as_raw()),
        })
    }
}

/// Histogram of intensities with `bins` equal-width bins over [0, 256).
pub fn intensity_histogram(gray: &GrayImage, bins: usize) -> Vec<u32> {
    let mut hist = vec![0u32; bins];
    for p in gray.pixels() {
        hist[p[0] as usize * bins / 256] += 1;
    }
    hist
}

/// 8-bit local binary pattern of the interior pixel at (x, y).
///
/// Bit k is set when neighbor k (clockwise from top-left) is at least as
/// bright as the center.
fn lbp_code(raw: &[u8], width: usize, x: usize, y: usize) -> u8 {
    let center = raw[y * width + x];
    let mut code = 0u8;
    for (bit, &(dx, dy)) in LBP_NEIGHBORS.iter().enumerate() {
        let nx = (x as i64 + dx) as usize;
        let ny = (y as i64 + dy) as usize;
        if raw[ny * width + nx] >= center {
            code |= 1 << bit;
        }
    }
    code
}

/// Histogram of LBP codes over every pixel with a full 8-neighborhood.
pub fn lbp_histogram(gray: &GrayImage) -> Vec<u32> {
    let mut hist = vec![0u32; LBP_BINS];
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w < 3 || h < 3 {
        return hist;
    }
    let raw = gray.as_raw();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            hist[lbp_code(raw, w, x, y) as usize] += 1;
        }
    }
    hist
}

fn patch(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            out.push(gray.get_pixel(x, y)[0]);
        }
    }
    out
}

/// Top-left square with side one tenth of the canonical size.
fn corner_patch(gray: &GrayImage) -> Vec<u8> {
    let side = gray.width() / 10;
    patch(gray, 0, 0, side, side)
}

/// Central square spanning 40% to 60% of the canonical size on each axis.
fn center_patch(gray: &GrayImage) -> Vec<u8> {
    let size = gray.width();
    let lo = size * 2 / 5;
    let hi = size * 3 / 5;
    patch(gray, lo, lo, hi, hi)
}

fn digest_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    let mut out = String::with_capacity(hash.len() * 2);
    for b in hash.iter() {
        let _ = write!(out, "{b:02x}");
    }
    out
}
