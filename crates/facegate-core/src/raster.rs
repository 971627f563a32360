//! Grayscale raster helpers shared by the locator and the extractor.

use crate::types::Rect;
use image::{DynamicImage, GrayImage};

/// Convert a decoded RGB(A) or grayscale image to 8-bit luma.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Copy the pixels under `rect` (clamped to the image) into a new buffer.
pub fn crop(gray: &GrayImage, rect: &Rect) -> GrayImage {
    let r = rect.clamp_to(gray.width(), gray.height());
    image::imageops::crop_imm(gray, r.x, r.y, r.width, r.height).to_image()
}

/// Population mean and standard deviation of 8-bit samples.
pub fn mean_std(samples: &[u8]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Median intensity of the one-pixel image border.
///
/// Used as the background estimate: the subject of a portrait rarely
/// touches every edge of the frame.
pub fn border_median(gray: &GrayImage) -> u8 {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return 0;
    }
    let mut hist = [0u32; 256];
    let mut total = 0u32;
    for x in 0..w {
        hist[gray.get_pixel(x, 0)[0] as usize] += 1;
        hist[gray.get_pixel(x, h - 1)[0] as usize] += 1;
        total += 2;
    }
    for y in 1..h.saturating_sub(1) {
        hist[gray.get_pixel(0, y)[0] as usize] += 1;
        hist[gray.get_pixel(w - 1, y)[0] as usize] += 1;
        total += 2;
    }
    let half = total.div_ceil(2);
    let mut seen = 0u32;
    for (value, &count) in hist.iter().enumerate() {
        seen += count;
        if seen >= half {
            return value as u8;
        }
    }
    255
}

/// Global histogram equalization in place.
///
/// Spreads the cumulative distribution over 0..=255. A single-valued image
/// has no distribution to spread and is left untouched.
pub fn equalize_histogram(gray: &mut GrayImage) {
    let total = (gray.width() as u64) * (gray.height() as u64);
    if total == 0 {
        return;
    }

    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = total - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let v = cdf[i].saturating_sub(cdf_min) as f64 * 255.0 / denom as f64;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.pixels_mut() {
        p[0] = lut[p[0] as usize];
    }
}
