//! Image normalization: uploaded bytes to the recognizer's input geometry.
//!
//! Decode once, convert to grayscale, scale to fit the fixed input box while
//! keeping the aspect ratio, then pad the remainder with the background tone.
//! Padding instead of stretching keeps character shapes undistorted.

use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, Luma, Rgba, RgbaImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::InvalidImageError;

/// Below this luminance standard deviation an image carries no strokes.
const UNIFORM_STDDEV: f64 = 3.0;

/// The recognizer's declared input: `channels x height x width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputGeometry {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl Default for InputGeometry {
    fn default() -> Self {
        Self {
            height: 32,
            width: 320,
            channels: 1,
        }
    }
}

impl InputGeometry {
    /// NCHW shape of a single-image batch.
    pub fn tensor_shape(&self) -> [usize; 4] {
        [
            1,
            self.channels as usize,
            self.height as usize,
            self.width as usize,
        ]
    }
}

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }

    /// Map a file extension (`png`, `jpg`, `jpeg`) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageKind::Png),
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            _ => None,
        }
    }

    fn format(&self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Detect the format from magic bytes. Only PNG and JPEG are accepted.
pub fn sniff_kind(bytes: &[u8]) -> Result<ImageKind, InvalidImageError> {
    if bytes.is_empty() {
        return Err(InvalidImageError::Empty);
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok(ImageKind::Png),
        Ok(ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
        _ => Err(InvalidImageError::Unsupported),
    }
}

/// A decoded image at exactly the recognizer's input geometry.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pixels: GrayImage,
    content_width: u32,
    source_kind: ImageKind,
    source_size: (u32, u32),
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    /// Columns (from the left) holding scaled image content; the rest is padding.
    pub fn content_width(&self) -> u32 {
        self.content_width
    }

    pub fn source_kind(&self) -> ImageKind {
        self.source_kind
    }

    /// Dimensions of the upload before scaling.
    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// True when the image is a flat tone (blank page, solid fill).
    pub fn is_uniform(&self) -> bool {
        let n = (self.pixels.width() as f64) * (self.pixels.height() as f64);
        if n == 0.0 {
            return true;
        }
        let (sum, sum_sq) = self.pixels.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
            let v = p.0[0] as f64;
            (s + v, sq + v * v)
        });
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        variance.sqrt() < UNIFORM_STDDEV
    }

    /// NCHW float tensor scaled to [-1, 1]. Gray is replicated for 3 channels.
    pub fn to_tensor(&self, channels: u32) -> Array4<f32> {
        let (w, h) = self.pixels.dimensions();
        let c = channels.max(1) as usize;
        let mut tensor = Array4::<f32>::zeros((1, c, h as usize, w as usize));
        for (x, y, pixel) in self.pixels.enumerate_pixels() {
            let v = (pixel.0[0] as f32 / 255.0 - 0.5) / 0.5;
            for ch in 0..c {
                tensor[[0, ch, y as usize, x as usize]] = v;
            }
        }
        tensor
    }
}

/// Validate, decode and normalize an uploaded image.
///
/// `declared` is the format the caller claims (e.g. from the file name);
/// when given it must agree with the content.
pub fn normalize(
    bytes: &[u8],
    declared: Option<ImageKind>,
    geometry: InputGeometry,
    max_pixels: u64,
) -> Result<NormalizedImage, InvalidImageError> {
    let kind = sniff_kind(bytes)?;
    if let Some(declared) = declared {
        if declared != kind {
            return Err(InvalidImageError::FormatMismatch {
                declared: declared.as_str(),
                actual: kind.as_str(),
            });
        }
    }

    // Header-only pass so oversized uploads are rejected before allocation.
    let mut decoder = image::ImageReader::with_format(Cursor::new(bytes), kind.format())
        .into_decoder()
        .map_err(map_decode_error)?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err(InvalidImageError::ZeroDimension { width, height });
    }
    if (width as u64) * (height as u64) > max_pixels {
        return Err(InvalidImageError::TooLarge { max_pixels });
    }

    // Phone photos carry their rotation in EXIF rather than in the pixels.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut decoded = DynamicImage::from_decoder(decoder).map_err(map_decode_error)?;
    decoded.apply_orientation(orientation);
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(InvalidImageError::ZeroDimension {
            width: decoded.width(),
            height: decoded.height(),
        });
    }

    let gray = flatten_to_gray(&decoded);
    let (pixels, content_width) = fit_and_pad(&gray, geometry.width, geometry.height);

    log::debug!(
        "[NORMALIZE] {} {}x{} -> {}x{} (content width {})",
        kind.as_str(),
        width,
        height,
        pixels.width(),
        pixels.height(),
        content_width
    );

    Ok(NormalizedImage {
        pixels,
        content_width,
        source_kind: kind,
        source_size: (width, height),
    })
}

/// Grayscale, with transparency composited onto white first. Ink drawn on
/// a transparent canvas usually has black RGB under zero alpha.
fn flatten_to_gray(img: &DynamicImage) -> GrayImage {
    if !img.color().has_alpha() {
        return img.to_luma8();
    }
    let mut canvas = RgbaImage::from_pixel(img.width(), img.height(), Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas).to_luma8()
}

/// Scale `gray` to fit `target_w x target_h`, anchor it left and centre it
/// vertically on a canvas filled with the border tone.
fn fit_and_pad(gray: &GrayImage, target_w: u32, target_h: u32) -> (GrayImage, u32) {
    let (w, h) = gray.dimensions();
    let scale = f64::min(target_w as f64 / w as f64, target_h as f64 / h as f64);
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, target_w);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, target_h);

    let resized = if (new_w, new_h) == (w, h) {
        gray.clone()
    } else {
        imageops::resize(gray, new_w, new_h, FilterType::Triangle)
    };

    let background = border_mean(&resized);
    let mut canvas = GrayImage::from_pixel(target_w, target_h, Luma([background]));
    let y_offset = (target_h - new_h) / 2;
    imageops::replace(&mut canvas, &resized, 0, y_offset as i64);
    (canvas, new_w)
}

/// Mean luminance of the outermost rows and columns.
fn border_mean(img: &GrayImage) -> u8 {
    let (w, h) = img.dimensions();
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for (x, y, p) in img.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
            sum += p.0[0] as u64;
            count += 1;
        }
    }
    if count == 0 {
        255
    } else {
        (sum / count) as u8
    }
}

fn map_decode_error(e: image::ImageError) -> InvalidImageError {
    match e {
        image::ImageError::Unsupported(_) => InvalidImageError::Unsupported,
        other => InvalidImageError::Decode(other.to_string()),
    }
}
