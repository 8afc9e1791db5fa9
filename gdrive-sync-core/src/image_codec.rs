//! AVIF recompression of embedded raster images.

use image::codecs::avif::AvifEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use tracing::debug;

use crate::config::ImageConfig;
use crate::contract::{EncodedImage, ImageCodec, ImageError};

pub const AVIF_MIME_TYPE: &str = "image/avif";

/// [`ImageCodec`] that flattens, downscales to a maximum width, and encodes
/// as AVIF.
#[derive(Debug, Clone, Copy)]
pub struct AvifCodec {
    max_width: u32,
    quality: u8,
    speed: u8,
}

impl AvifCodec {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            max_width: config.max_width.max(1),
            quality: config.quality.clamp(1, 100),
            speed: config.speed.clamp(1, 10),
        }
    }
}

impl Default for AvifCodec {
    fn default() -> Self {
        Self::new(&ImageConfig::default())
    }
}

/// Composite any alpha channel onto white and drop it.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = u32::from(src[3]);
        let blend = |channel: u8| -> u8 {
            ((u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
    }
    rgb
}

/// Downscale proportionally so the width does not exceed `max_width`.
pub fn fit_width(image: RgbImage, max_width: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width <= max_width {
        return image;
    }
    let new_height = ((f64::from(height) * f64::from(max_width) / f64::from(width)).round() as u32).max(1);
    image::imageops::resize(&image, max_width, new_height, FilterType::Lanczos3)
}

impl ImageCodec for AvifCodec {
    fn recompress(&self, raw: &[u8]) -> Result<EncodedImage, ImageError> {
        let format =
            image::guess_format(raw).map_err(|e| ImageError::Unidentified(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(raw, format)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        let original = (decoded.width(), decoded.height());

        let rgb = fit_width(flatten_to_rgb(&decoded), self.max_width);
        let (width, height) = rgb.dimensions();

        let mut bytes = Vec::new();
        AvifEncoder::new_with_speed_quality(&mut bytes, self.speed, self.quality)
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| ImageError::Encode(e.to_string()))?;

        debug!(
            ?format,
            from = ?original,
            to = ?(width, height),
            input_bytes = raw.len(),
            output_bytes = bytes.len(),
            "[IMAGE] Recompressed"
        );
        Ok(EncodedImage {
            bytes,
            mime_type: AVIF_MIME_TYPE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(image: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let rgb = flatten_to_rgb(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn wide_images_are_downscaled_proportionally() {
        let resized = fit_width(RgbImage::new(1600, 900), 800);
        assert_eq!(resized.dimensions(), (800, 450));

        let narrow = fit_width(RgbImage::new(640, 480), 800);
        assert_eq!(narrow.dimensions(), (640, 480));
    }

    #[test]
    fn encodes_avif() {
        let codec = AvifCodec::new(&ImageConfig {
            speed: 10,
            ..ImageConfig::default()
        });
        let raw = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            16,
            16,
            Rgb([200, 10, 10]),
        )));
        let encoded = codec.recompress(&raw).unwrap();
        assert_eq!(encoded.mime_type, "image/avif");
        assert_eq!(&encoded.bytes[4..8], b"ftyp");
    }

    #[test]
    fn garbage_is_unidentified() {
        let err = AvifCodec::default().recompress(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageError::Unidentified(_)));
    }
}
