use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tgstyle_contracts::storage::history::TRUNCATION_MARKER;
use tracing::debug;

/// 1.5 MB, the upload budget for photos sent to `/api/analyze`.
pub const TRANSMISSION_BUDGET_BYTES: usize = 1_572_864;
/// Base64 characters allowed for one photo kept in history.
pub const STORAGE_BUDGET_CHARS: usize = 100_000;

/// Knobs of one compression loop. Qualities are JPEG percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionProfile {
    /// Applied once, before the quality loop.
    pub max_width: Option<u32>,
    pub start_quality: u8,
    pub quality_step: u8,
    pub quality_floor: u8,
    /// Width factor applied per iteration after the quality floor is hit.
    pub width_shrink: Option<f32>,
    pub min_width: u32,
    /// Cut the encoded payload to the budget when every floor is reached.
    pub truncate_overflow: bool,
}

impl CompressionProfile {
    pub const TRANSMISSION: CompressionProfile = CompressionProfile {
        max_width: Some(1280),
        start_quality: 90,
        quality_step: 5,
        quality_floor: 10,
        width_shrink: None,
        min_width: 1,
        truncate_overflow: false,
    };

    pub const STORAGE: CompressionProfile = CompressionProfile {
        max_width: None,
        start_quality: 80,
        quality_step: 10,
        quality_floor: 40,
        width_shrink: Some(0.8),
        min_width: 200,
        truncate_overflow: true,
    };
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompressError {
    #[error("image decode failed: {0}")]
    ImageDecode(String),
    #[error("jpeg encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    /// `None` when the input was returned untouched.
    pub dimensions: Option<(u32, u32)>,
    pub quality: Option<u8>,
    pub within_budget: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageCompressor {
    profile: CompressionProfile,
}

impl ImageCompressor {
    pub fn new(profile: CompressionProfile) -> Self {
        Self { profile }
    }

    pub fn transmission() -> Self {
        Self::new(CompressionProfile::TRANSMISSION)
    }

    pub fn storage() -> Self {
        Self::new(CompressionProfile::STORAGE)
    }

    /// Width cap for re-encoded output. Input that already fits the byte
    /// budget is never decoded, so the cap does not apply to it.
    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.profile.max_width = Some(max_width.max(1));
        self
    }

    /// Re-encodes `source` as JPEG until it fits `max_bytes` or the profile's
    /// floors are reached. Input already within budget is returned as is.
    pub fn compress(&self, source: &[u8], max_bytes: usize) -> Result<CompressedImage, CompressError> {
        if source.len() <= max_bytes {
            return Ok(CompressedImage {
                bytes: source.to_vec(),
                dimensions: None,
                quality: None,
                within_budget: true,
            });
        }

        let decoded = image::load_from_memory(source)
            .map_err(|err| CompressError::ImageDecode(err.to_string()))?;
        let mut base = flatten_to_rgb(&decoded);
        if let Some(cap) = self.profile.max_width {
            if base.width() > cap {
                base = resize_to_width(&base, cap);
            }
        }

        let mut quality = self.profile.start_quality;
        let mut current = base.clone();
        let mut bytes = encode_jpeg(&current, quality)?;
        while bytes.len() > max_bytes && quality > self.profile.quality_floor {
            quality = quality
                .saturating_sub(self.profile.quality_step)
                .max(self.profile.quality_floor);
            bytes = encode_jpeg(&current, quality)?;
            debug!(quality, size = bytes.len(), "compression step");
        }

        if let Some(factor) = self.profile.width_shrink {
            while bytes.len() > max_bytes && current.width() > self.profile.min_width {
                let next = ((current.width() as f32) * factor) as u32;
                current = resize_to_width(&base, next.max(self.profile.min_width));
                bytes = encode_jpeg(&current, quality)?;
                debug!(
                    width = current.width(),
                    height = current.height(),
                    size = bytes.len(),
                    "compression shrink step"
                );
            }
        }

        Ok(CompressedImage {
            within_budget: bytes.len() <= max_bytes,
            dimensions: Some(current.dimensions()),
            quality: Some(quality),
            bytes,
        })
    }

    /// Same loop over a base64 payload, budgeted in encoded characters. A
    /// profile that truncates cuts an oversized result and appends the marker.
    pub fn compress_base64(&self, encoded: &str, max_chars: usize) -> Result<String, CompressError> {
        if encoded.len() <= max_chars {
            return Ok(encoded.to_string());
        }
        let source = BASE64
            .decode(encoded.trim())
            .map_err(|err| CompressError::ImageDecode(err.to_string()))?;
        let compressed = self.compress(&source, max_chars / 4 * 3)?;
        let output = BASE64.encode(&compressed.bytes);
        if output.len() > max_chars && self.profile.truncate_overflow {
            return Ok(truncate_for_storage(&output, max_chars));
        }
        Ok(output)
    }
}

/// Decoded size estimate for a base64 payload of `encoded_len` characters.
pub fn estimated_decoded_len(encoded_len: usize) -> usize {
    (encoded_len * 3).div_ceil(4)
}

/// Keeps the first `max_chars` characters and marks the cut.
pub fn truncate_for_storage(encoded: &str, max_chars: usize) -> String {
    if encoded.len() <= max_chars {
        return encoded.to_string();
    }
    let mut cut = max_chars;
    while !encoded.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &encoded[..cut])
}

/// Drops transparency by blending onto white.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn resize_to_width(image: &RgbImage, width: u32) -> RgbImage {
    let width = width.max(1);
    let ratio = f64::from(width) / f64::from(image.width().max(1));
    let height = ((f64::from(image.height()) * ratio).floor() as u32).max(1);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .map_err(|err| CompressError::Encode(err.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn noise_png(width: u32, height: u32, seed: u64) -> anyhow::Result<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let img = RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    #[test]
    fn large_photo_fits_transmission_budget_and_width_cap() -> anyhow::Result<()> {
        // Incompressible noise keeps the PNG above 5 MB.
        let source = noise_png(1600, 1200, 11)?;
        assert!(source.len() > 5_000_000);

        let out = ImageCompressor::transmission().compress(&source, TRANSMISSION_BUDGET_BYTES)?;
        assert!(out.within_budget);
        assert!(out.bytes.len() <= TRANSMISSION_BUDGET_BYTES);
        let (width, height) = out.dimensions.ok_or_else(|| anyhow::anyhow!("no dimensions"))?;
        assert_eq!(width, 1280);
        assert_eq!(height, 960);
        let quality = out.quality.ok_or_else(|| anyhow::anyhow!("no quality"))?;
        assert!((10..=90).contains(&quality));
        assert!(image::load_from_memory(&out.bytes).is_ok());
        Ok(())
    }

    #[test]
    fn input_within_budget_is_returned_unchanged() -> anyhow::Result<()> {
        let source = noise_png(16, 16, 1)?;
        let out = ImageCompressor::transmission().compress(&source, source.len())?;
        assert_eq!(out.bytes, source);
        assert!(out.dimensions.is_none());

        let encoded = BASE64.encode(&source);
        let again = ImageCompressor::storage().compress_base64(&encoded, encoded.len())?;
        assert_eq!(again, encoded);
        Ok(())
    }

    #[test]
    fn width_cap_only_applies_to_oversized_input() -> anyhow::Result<()> {
        let wide = noise_png(900, 20, 4)?;
        let compressor = ImageCompressor::transmission().with_max_width(300);

        let untouched = compressor.compress(&wide, wide.len())?;
        assert_eq!(untouched.bytes, wide);
        assert!(untouched.dimensions.is_none());

        let capped = compressor.compress(&wide, wide.len() - 1)?;
        assert_eq!(capped.dimensions, Some((300, 6)));
        Ok(())
    }

    #[test]
    fn undecodable_source_reports_decode_error() {
        let garbage = vec![0x42u8; 4096];
        let err = ImageCompressor::transmission().compress(&garbage, 100).err();
        assert!(matches!(err, Some(CompressError::ImageDecode(_))));

        let err = ImageCompressor::storage()
            .compress_base64(&"!".repeat(200), 100)
            .err();
        assert!(matches!(err, Some(CompressError::ImageDecode(_))));
    }

    #[test]
    fn transmission_returns_best_effort_when_floor_is_reached() -> anyhow::Result<()> {
        let source = noise_png(300, 300, 5)?;
        let out = ImageCompressor::transmission().compress(&source, 500)?;
        assert!(!out.within_budget);
        assert_eq!(out.quality, Some(10));
        assert_eq!(out.dimensions, Some((300, 300)));
        Ok(())
    }

    #[test]
    fn storage_shrinks_width_to_floor_then_truncates() -> anyhow::Result<()> {
        let encoded = BASE64.encode(noise_png(600, 300, 3)?);
        let out = ImageCompressor::storage().compress_base64(&encoded, 2_000)?;
        assert_eq!(out.len(), 2_000 + TRUNCATION_MARKER.len());
        assert!(out.ends_with(TRUNCATION_MARKER));

        let raw = BASE64.decode(&encoded)?;
        let shrunk = ImageCompressor::storage().compress(&raw, 1_500)?;
        assert_eq!(shrunk.quality, Some(40));
        assert_eq!(shrunk.dimensions, Some((200, 100)));
        Ok(())
    }

    #[test]
    fn storage_fits_moderate_photo_without_truncation() -> anyhow::Result<()> {
        let encoded = BASE64.encode(noise_png(640, 480, 8)?);
        assert!(encoded.len() > STORAGE_BUDGET_CHARS);
        let out = ImageCompressor::storage().compress_base64(&encoded, STORAGE_BUDGET_CHARS)?;
        assert!(out.len() <= STORAGE_BUDGET_CHARS);
        assert!(image::load_from_memory(&BASE64.decode(&out)?).is_ok());
        Ok(())
    }

    #[test]
    fn transparent_pixels_flatten_to_white() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let flat = flatten_to_rgb(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn decoded_size_estimate_rounds_up() {
        assert_eq!(estimated_decoded_len(0), 0);
        assert_eq!(estimated_decoded_len(4), 3);
        assert_eq!(estimated_decoded_len(5), 4);
        assert_eq!(truncate_for_storage("abcdef", 4), "abcd...");
        assert_eq!(truncate_for_storage("abc", 4), "abc");
    }
}
