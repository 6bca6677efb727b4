//! Decode/encode boundary.
//!
//! LDR sources (`.png`, `.jpg`, `.jpeg`, `.bmp`) decode to RGBA8 texels that
//! upload into an sRGB image; `.exr` sources decode to linear RGBA32F. All
//! inputs are normalized to four channels here, but the original channel
//! count is preserved so the transform pass knows whether the file actually
//! carried alpha.

use std::path::Path;

use crate::error::{Error, Result};

/// A decoded source image, normalized to four channels.
#[derive(Debug)]
pub struct DecodedImage {
    /// Raw texel bytes: RGBA8 for LDR sources, RGBA32F for HDR sources.
    pub texels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Channel count of the file before normalization (1-4).
    pub channels: u32,
    pub hdr: bool,
}

impl DecodedImage {
    pub fn bytes_per_texel(&self) -> usize {
        if self.hdr {
            16
        } else {
            4
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

pub fn is_hdr(path: &Path) -> bool {
    extension(path).as_deref() == Some("exr")
}

pub fn recognized(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") | Some("exr")
    )
}

pub fn decode(path: &Path) -> Result<DecodedImage> {
    if !recognized(path) {
        return Err(Error::UnrecognizedExtension);
    }

    let decoded = image::open(path).map_err(Error::Decode)?;
    let channels = u32::from(decoded.color().channel_count());

    if is_hdr(path) {
        let rgba = decoded.to_rgba32f();
        let (width, height) = rgba.dimensions();
        let mut texels = Vec::with_capacity(rgba.len() * 4);
        for value in rgba.into_raw() {
            texels.extend_from_slice(&value.to_ne_bytes());
        }
        Ok(DecodedImage {
            texels,
            width,
            height,
            channels,
            hdr: true,
        })
    } else {
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage {
            texels: rgba.into_raw(),
            width,
            height,
            channels,
            hdr: false,
        })
    }
}

/// Encodes RGBA8 rows laid out at `row_pitch` bytes into a PNG. The pitch
/// comes from the device's linear-tiling layout, so rows are repacked before
/// they reach the encoder.
pub fn encode_png(
    path: &Path,
    width: u32,
    height: u32,
    row_pitch: usize,
    texels: &[u8],
) -> Result<()> {
    let tight_pitch = width as usize * 4;
    let mut packed = Vec::with_capacity(tight_pitch * height as usize);
    for row in 0..height as usize {
        let offset = row * row_pitch;
        packed.extend_from_slice(&texels[offset..offset + tight_pitch]);
    }

    image::save_buffer_with_format(
        path,
        &packed,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(Error::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_supported_extensions() {
        assert!(recognized(Path::new("a.png")));
        assert!(recognized(Path::new("a.JPG")));
        assert!(recognized(Path::new("a.jpeg")));
        assert!(recognized(Path::new("a.bmp")));
        assert!(recognized(Path::new("a.exr")));
        assert!(!recognized(Path::new("a.tiff")));
        assert!(!recognized(Path::new("a")));
    }

    #[test]
    fn exr_is_the_only_hdr_source() {
        assert!(is_hdr(Path::new("scene.exr")));
        assert!(!is_hdr(Path::new("scene.png")));
    }

    #[test]
    fn unknown_extension_is_an_input_failure() {
        let err = decode(Path::new("a.gif")).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedExtension));
    }

    #[test]
    fn decode_normalizes_to_four_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        image::save_buffer(&path, &[128u8; 16], 4, 4, image::ColorType::L8).unwrap();

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.texels.len(), 4 * 4 * 4);
        assert!(!decoded.hdr);
    }

    #[test]
    fn encode_png_destrides_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");

        // 2x2 image with an 12-byte row pitch (4 bytes of tail padding).
        let mut texels = vec![0u8; 2 * 12];
        for (i, texel) in [[255, 0, 0, 255], [0, 255, 0, 255]].iter().enumerate() {
            texels[i * 4..i * 4 + 4].copy_from_slice(texel);
        }
        for (i, texel) in [[0, 0, 255, 255], [255, 255, 255, 255]].iter().enumerate() {
            texels[12 + i * 4..12 + i * 4 + 4].copy_from_slice(texel);
        }

        encode_png(&path, 2, 2, 12, &texels).unwrap();

        let round_trip = image::open(&path).unwrap().to_rgba8();
        assert_eq!(round_trip.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(round_trip.get_pixel(1, 0).0, [0, 255, 0, 255]);
        assert_eq!(round_trip.get_pixel(0, 1).0, [0, 0, 255, 255]);
        assert_eq!(round_trip.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }
}
