//! Image encoder: bitmap + format + quality -> encoded bytes

use crate::params::Format;
use crate::Result;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder as _, ImageFormat, RgbImage};
use log::debug;

/// Encode `bitmap` into the format named by `format`.
///
/// The format name is matched case-insensitively. A name that matches none of
/// PNG, JPEG/JPG or WEBP is not an error: nothing is encoded and the returned
/// buffer is empty. `quality` is forwarded to the codec unchanged:
///
/// - PNG ignores it entirely, so output is byte-identical for any quality.
/// - JPEG uses it as the 1-100 quality scale (the codec clamps).
/// - WebP uses it as the lossy float quality, lossless always off.
pub fn encode(bitmap: &DynamicImage, format: &str, quality: i32) -> Result<Vec<u8>> {
    let Some(fmt) = Format::parse(format) else {
        debug!("unsupported output format {:?}, producing empty output", format);
        return Ok(Vec::new());
    };

    match fmt {
        Format::Png => encode_png(bitmap),
        Format::Jpeg => encode_jpeg(bitmap, quality),
        Format::WebP => encode_webp(bitmap, quality),
    }
}

fn encode_png(bitmap: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    bitmap.write_with_encoder(PngEncoder::new(&mut buf))?;
    Ok(buf)
}

fn encode_jpeg(bitmap: &DynamicImage, quality: i32) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(bitmap.to_rgb8());
    let quality = quality.clamp(1, 100) as u8;
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

fn encode_webp(bitmap: &DynamicImage, quality: i32) -> Result<Vec<u8>> {
    let rgb = bitmap.to_rgb8();
    let encoder = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height());
    let memory = encoder
        .encode_simple(false, quality as f32)
        .map_err(|e| crate::Error::Encode(format!("WebP encoding failed: {:?}", e)))?;
    Ok(memory.to_vec())
}

/// Serialize a captured frame into the lossless PNG intermediate.
pub fn to_intermediate(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Decode the PNG intermediate back into a bitmap for the final encode.
pub fn from_intermediate(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(img)
}
