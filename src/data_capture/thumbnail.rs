use super::types::FileType;
use crate::error_handling::types::CaptureError;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;

/// Decodes a stored thumbnail and re-encodes it as `target`, scaled down so its longer edge is
/// at most `max_edge`. `max_edge == 0` keeps the stored size; images are never scaled up.
pub fn transcode(stored: &[u8], target: FileType, max_edge: u32) -> Result<Vec<u8>, CaptureError> {
    let mut img = image::load_from_memory(stored)?;

    if max_edge > 0 && img.width().max(img.height()) > max_edge {
        // `resize` keeps the aspect ratio and fits within the bounds.
        img = img.resize(max_edge, max_edge, FilterType::Triangle);
    }

    encode(&img, target)
}

/// Width and height of an encoded image, read from its header without decoding the pixels.
pub fn dimensions(stored: &[u8]) -> Result<(u32, u32), CaptureError> {
    let reader = image::ImageReader::new(Cursor::new(stored))
        .with_guessed_format()
        .map_err(|e| CaptureError::ImageError(e.to_string()))?;
    Ok(reader.into_dimensions()?)
}

/// Encodes `img` as `target`. Alpha is dropped for JPEG.
///
/// # Errors
///
/// - `CaptureError::ImageError` if the encoder rejects the image
pub fn encode(img: &DynamicImage, target: FileType) -> Result<Vec<u8>, CaptureError> {
    // JPEG has no alpha channel.
    let img = match target {
        FileType::Jpg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => DynamicImage::ImageRgba8(img.to_rgba8()),
    };

    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), target.image_format())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
        encode(&DynamicImage::ImageRgba8(img), FileType::Png).unwrap()
    }

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        let out = transcode(&png(64, 32), FileType::Png, 16).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[test]
    fn test_zero_or_large_edge_keeps_size() {
        for max_edge in [0, 64, 1000] {
            let out = transcode(&png(40, 20), FileType::Png, max_edge).unwrap();
            let img = image::load_from_memory(&out).unwrap();
            assert_eq!((img.width(), img.height()), (40, 20));
        }
    }

    #[test]
    fn test_every_target_format_decodes() {
        for (target, format) in [
            (FileType::Png, image::ImageFormat::Png),
            (FileType::Jpg, image::ImageFormat::Jpeg),
            (FileType::Bmp, image::ImageFormat::Bmp),
            (FileType::Tga, image::ImageFormat::Tga),
        ] {
            let out = transcode(&png(8, 8), target, 4).unwrap();
            let img = image::load_from_memory_with_format(&out, format).unwrap();
            assert_eq!((img.width(), img.height()), (4, 4));
        }
    }

    #[test]
    fn test_dimensions_read_from_encoded_bytes() {
        assert_eq!(dimensions(&png(24, 10)).unwrap(), (24, 10));
        assert!(dimensions(b"not an image").is_err());
    }

    #[test]
    fn test_garbage_is_an_image_error() {
        assert!(matches!(
            transcode(b"not an image", FileType::Png, 0),
            Err(CaptureError::ImageError(_))
        ));
    }
}
