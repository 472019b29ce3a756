//! Image preprocessing: decode, resize to the network input, normalize
//!
//! The resize follows PIL's anti-aliased bilinear filter: triangle taps that
//! widen when downscaling, two separable passes, and an 8-bit image between
//! them. PIL accumulates in fixed point, so individual pixels can still land
//! one level away from a PIL-resized image.

use image::{DynamicImage, Rgb, RgbImage};

use crate::utils::error::{DetectorError, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode raw bytes into an RGB image, whatever the source format and channel count
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// Contributing source pixels for one output pixel along one axis
struct Taps {
    start: usize,
    weights: Vec<f32>,
}

/// Triangle filter taps; the support widens with the scale factor when downscaling
fn axis_taps(src_len: usize, dst_len: usize) -> Vec<Taps> {
    let scale = src_len as f32 / dst_len as f32;
    let support = scale.max(1.0);

    (0..dst_len)
        .map(|dst| {
            let center = (dst as f32 + 0.5) * scale;
            let start = (center - support).floor().max(0.0) as usize;
            let end = ((center + support).ceil() as usize).min(src_len);

            let mut weights: Vec<f32> = (start..end)
                .map(|src| {
                    let distance = ((src as f32 + 0.5) - center).abs() / support;
                    (1.0 - distance).max(0.0)
                })
                .collect();

            let total: f32 = weights.iter().sum();
            if total > 0.0 {
                weights.iter_mut().for_each(|w| *w /= total);
            }

            Taps { start, weights }
        })
        .collect()
}

/// PIL-compatible bilinear resize with anti-aliasing, done as two separable passes
pub fn resize_bilinear(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = (src.width() as usize, src.height() as usize);

    let columns = axis_taps(src_width, width as usize);
    let rows = axis_taps(src_height, height as usize);

    // Horizontal pass: src_height x dst_width, rounded to 8 bits like PIL's intermediate image
    let horizontal = RgbImage::from_fn(width, src_height as u32, |x, y| {
        let taps = &columns[x as usize];
        let mut sum = [0.0f32; 3];
        for (offset, weight) in taps.weights.iter().enumerate() {
            let pixel = src.get_pixel((taps.start + offset) as u32, y);
            for channel in 0..3 {
                sum[channel] += pixel[channel] as f32 * weight;
            }
        }
        Rgb(sum.map(to_u8))
    });

    RgbImage::from_fn(width, height, |x, y| {
        let taps = &rows[y as usize];
        let mut sum = [0.0f32; 3];
        for (offset, weight) in taps.weights.iter().enumerate() {
            let pixel = horizontal.get_pixel(x, (taps.start + offset) as u32);
            for channel in 0..3 {
                sum[channel] += pixel[channel] as f32 * weight;
            }
        }
        Rgb(sum.map(to_u8))
    })
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Scale to [0, 1] and normalize per channel
///
/// Returns CHW layout: all R values, then all G values, then all B values
pub fn normalize_chw(image: &RgbImage) -> Vec<f32> {
    let num_pixels = (image.width() * image.height()) as usize;
    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            normalized[channel * num_pixels + i] =
                (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
        }
    }

    normalized
}

/// Full pipeline for one image: RGB, resize to `size` x `size`, normalize
pub fn preprocess_image(image: &DynamicImage, size: u32) -> Result<Vec<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DetectorError::Inference(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }

    let rgb = image.to_rgb8();
    let resized = if rgb.dimensions() == (size, size) {
        rgb
    } else {
        resize_bilinear(&rgb, size, size)
    };

    Ok(normalize_chw(&resized))
}
