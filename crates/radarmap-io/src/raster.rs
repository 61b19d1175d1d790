//! RGBA decoding and PNG encoding.

use std::path::Path;

use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use radarmap_pipeline::{Dimensions, RgbaImage};

use crate::IoError;

/// Decode image bytes (PNG, JPEG, BMP, WebP) into RGBA.
///
/// Images without an alpha channel become fully opaque.
///
/// # Errors
///
/// Returns [`IoError::ImageDecode`] if the format is unrecognized or the
/// data is corrupt.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, IoError> {
    let image = image::load_from_memory(bytes).map_err(IoError::ImageDecode)?;
    Ok(image.to_rgba8())
}

/// Read and decode an image file into RGBA.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be read,
/// [`IoError::EmptyInput`] if it is empty, and [`IoError::ImageDecode`]
/// if it cannot be decoded.
pub fn load_rgba(path: &Path) -> Result<RgbaImage, IoError> {
    let bytes = std::fs::read(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(IoError::EmptyInput(path.to_path_buf()));
    }
    let image = decode_rgba(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        bytes = bytes.len(),
        dimensions = %Dimensions::of(&image),
        "decoded image",
    );
    Ok(image)
}

/// Encode an RGBA raster as PNG with maximum compression and adaptive
/// filtering.
///
/// # Errors
///
/// Returns [`IoError::PngEncode`] if encoding fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, IoError> {
    let mut png_bytes = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut png_bytes, CompressionType::Best, FilterType::Adaptive);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(IoError::PngEncode)?;
    Ok(png_bytes)
}

/// Encode `image` as PNG and write it to `path`.
///
/// # Errors
///
/// Returns [`IoError::PngEncode`] if encoding fails or [`IoError::Write`]
/// if the file cannot be written.
pub fn save_png(path: &Path, image: &RgbaImage) -> Result<(), IoError> {
    let png_bytes = encode_png(image)?;
    std::fs::write(path, &png_bytes).map_err(|source| IoError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), bytes = png_bytes.len(), "wrote PNG");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;

    use super::*;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(5, 3, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([0, 152, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn png_bytes_decode_to_same_pixels() {
        let png = encode_png(&sample()).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(decode_rgba(&png).unwrap(), sample());
    }

    #[test]
    fn corrupt_bytes_fail_to_decode() {
        let result = decode_rgba(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(IoError::ImageDecode(_))));
    }

    #[test]
    fn rgb_input_becomes_opaque() {
        let rgb = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(rgb.as_raw(), 2, 2, image::ExtendedColorType::Rgb8)
            .unwrap();
        let decoded = decode_rgba(&buf).unwrap();
        assert_eq!(*decoded.get_pixel(1, 1), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_png(&path, &sample()).unwrap();
        assert_eq!(load_rgba(&path).unwrap(), sample());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_rgba(&dir.path().join("absent.png"));
        assert!(matches!(result, Err(IoError::Read { .. })));
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(load_rgba(&path), Err(IoError::EmptyInput(_))));
    }

    #[test]
    fn unwritable_path_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.png");
        assert!(matches!(
            save_png(&path, &sample()),
            Err(IoError::Write { .. })
        ));
    }
}
