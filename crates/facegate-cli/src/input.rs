//! Image inputs: file paths or `data:image/...;base64,` URLs.

use anyhow::{bail, Context, Result};
use base64::Engine;
use image::DynamicImage;
use std::path::Path;

/// Decode `source` as a data URL when it starts with `data:`, otherwise
/// read it as an image file.
pub fn load_image(source: &str) -> Result<DynamicImage> {
    if source.starts_with("data:") {
        return decode_data_url(source);
    }
    let path = Path::new(source);
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    image::load_from_memory(&bytes).with_context(|| format!("failed to decode {}", path.display()))
}

pub fn decode_data_url(url: &str) -> Result<DynamicImage> {
    let Some((header, payload)) = url.split_once(',') else {
        bail!("malformed data URL: missing ','");
    };
    let Some(media) = header
        .strip_prefix("data:")
        .and_then(|h| h.strip_suffix(";base64"))
    else {
        bail!("unsupported data URL header {header:?}: expected data:image/<type>;base64");
    };
    if !media.starts_with("image/") {
        bail!("data URL does not carry an image: {media}");
    }

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::prelude::BASE64_STANDARD
        .decode(compact.as_bytes())
        .context("failed to decode base64 image")?;
    image::load_from_memory(&bytes).context("failed to load image")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(12, 7, |x, y| Luma([(x * 20 + y) as u8])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_data_url() {
        let encoded = base64::prelude::BASE64_STANDARD.encode(png_bytes());
        let img = decode_data_url(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!((img.width(), img.height()), (12, 7));
        assert_eq!(img.to_luma8().get_pixel(3, 2)[0], 62);
    }

    #[test]
    fn test_data_url_with_line_breaks() {
        let encoded = base64::prelude::BASE64_STANDARD.encode(png_bytes());
        let (a, b) = encoded.split_at(encoded.len() / 2);
        let img = load_image(&format!("data:image/png;base64,{a}\n{b}")).unwrap();
        assert_eq!(img.width(), 12);
    }

    #[test]
    fn test_data_url_rejections() {
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:image/png,abcd").is_err());
        assert!(decode_data_url("data:text/plain;base64,aGVsbG8=").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
        assert!(decode_data_url("data:image/png;base64,aGVsbG8=").is_err());
    }

    #[test]
    fn test_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let img = load_image(path.to_str().unwrap()).unwrap();
        assert_eq!((img.width(), img.height()), (12, 7));
        assert!(load_image(dir.path().join("missing.png").to_str().unwrap()).is_err());
    }
}
