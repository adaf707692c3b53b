//! JPEG encoding helpers for camera frames.

use bytes::Bytes;
use image::{GrayImage, ImageBuffer};
use ndarray::Array2;

/// Start-of-image marker every JPEG stream begins with.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Encode row-major u8 grayscale pixels as JPEG.
///
/// Returns `None` if `data` does not hold exactly `width * height` pixels or the
/// encoder fails.
pub fn encode_gray_jpeg(data: &[u8], width: u32, height: u32, quality: u8) -> Option<Bytes> {
    let img: GrayImage = ImageBuffer::from_raw(width, height, data.to_vec())?;

    let mut jpeg_bytes = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, quality.clamp(1, 100));

    encoder.encode_image(&img).ok()?;

    Some(Bytes::from(jpeg_bytes))
}

/// Encode an ndarray frame (rows x cols) as JPEG.
pub fn encode_ndarray_jpeg(frame: &Array2<u8>, quality: u8) -> Option<Bytes> {
    let height = frame.nrows() as u32;
    let width = frame.ncols() as u32;

    // iter() walks in logical row-major order regardless of memory layout
    let data: Vec<u8> = frame.iter().copied().collect();

    encode_gray_jpeg(&data, width, height, quality)
}

/// True if `data` starts with a JPEG start-of-image marker.
pub fn looks_like_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == JPEG_SOI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_gray_jpeg() {
        let data = vec![0u8, 64, 128, 255];
        let jpeg = encode_gray_jpeg(&data, 2, 2, 80).unwrap();
        assert!(looks_like_jpeg(&jpeg));
    }

    #[test]
    fn test_encode_rejects_wrong_size() {
        let data = vec![0u8; 3];
        assert!(encode_gray_jpeg(&data, 2, 2, 80).is_none());
    }

    #[test]
    fn test_encode_ndarray_jpeg() {
        let frame = Array2::from_shape_fn((16, 24), |(r, c)| ((r * 24 + c) % 256) as u8);
        let jpeg = encode_ndarray_jpeg(&frame, 90).unwrap();
        assert!(looks_like_jpeg(&jpeg));

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 24);
        assert_eq!(decoded.height(), 16);
    }

    #[test]
    fn test_quality_changes_size() {
        let frame = Array2::from_shape_fn((64, 64), |(r, c)| ((r * 7 + c * 13) % 256) as u8);
        let low = encode_ndarray_jpeg(&frame, 10).unwrap();
        let high = encode_ndarray_jpeg(&frame, 95).unwrap();
        assert!(high.len() > low.len());
    }
}
