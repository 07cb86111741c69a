//! Illustration prompts and image post-processing.
//!
//! Every chapter's illustration shares one engraving style so the book looks
//! consistent. Generated images are resized to a fixed square, reduced to a
//! few grey levels (lossy) and re-encoded as a compact PNG.

use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;

use crate::annotate::error::{AnnotateError, AnnotateResult};

/// Appended to every illustration description.
pub const STYLE_SUFFIX: &str = "Simple black and white engraving scanned from an old book with \
simple, clear lines. Crosshatching into white around the edges.";

/// Image prompt for a description.
pub fn image_prompt(description: &str) -> String {
    format!("{}. {STYLE_SUFFIX}", description.trim().trim_end_matches('.'))
}

/// Cache key of the processed image for `prompt`. Changes with the processing
/// parameters so a different size or depth never reuses an old result.
pub fn processed_key(prompt: &str, size: u32, levels: u8) -> String {
    format!("{prompt}|png-grey-{size}x{size}-{levels}")
}

/// File name of a chapter's illustration.
pub fn file_name(slug: &str) -> String {
    format!("illustration_{slug}.png")
}

/// Resize to `size`×`size`, posterize to `levels` grey levels, encode as PNG.
pub fn postprocess(raw: &[u8], size: u32, levels: u8) -> AnnotateResult<Vec<u8>> {
    let img = image::load_from_memory(raw).map_err(|e| AnnotateError::Image {
        message: format!("decode: {e}"),
    })?;
    let resized = img.resize_exact(size, size, FilterType::Lanczos3);
    let mut grey = resized.to_luma8();

    let step = 255.0 / f32::from(levels.max(2) - 1);
    for pixel in grey.pixels_mut() {
        let quantized = (f32::from(pixel.0[0]) / step).round() * step;
        pixel.0[0] = quantized.round().clamp(0.0, 255.0) as u8;
    }

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive)
        .write_image(
            grey.as_raw(),
            grey.width(),
            grey.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(|e| AnnotateError::Image {
            message: format!("encode: {e}"),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn prompt_has_style_suffix() {
        let prompt = image_prompt("Dorothea at the window.");
        assert_eq!(
            prompt,
            format!("Dorothea at the window. {STYLE_SUFFIX}")
        );
    }

    #[test]
    fn postprocess_resizes_and_posterizes() {
        let out = postprocess(&sample_png(40, 30), 64, 4).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (64, 64));
        let allowed = [0u8, 85, 170, 255];
        assert!(decoded.pixels().all(|p| allowed.contains(&p.0[0])));
    }

    #[test]
    fn postprocess_is_deterministic() {
        let raw = sample_png(20, 20);
        assert_eq!(postprocess(&raw, 32, 16).unwrap(), postprocess(&raw, 32, 16).unwrap());
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            postprocess(b"definitely not a png", 32, 16),
            Err(AnnotateError::Image { .. })
        ));
    }

    #[test]
    fn names_and_keys() {
        assert_eq!(file_name("chapter-2"), "illustration_chapter-2.png");
        assert_eq!(processed_key("p", 768, 16), "p|png-grey-768x768-16");
    }
}
