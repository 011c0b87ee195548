//! Image preprocessing for inference
//!
//! Resize to the training resolution, local contrast enhancement (CLAHE on
//! the L channel of CIE L*a*b*) and backbone-specific normalization into a
//! CHW float buffer.

use std::fmt;
use std::str::FromStr;

use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::utils::error::DiagnosisError;

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize to `size`x`size` RGB with nearest-neighbour sampling
///
/// Nearest sampling matches the loader the weights were trained with.
pub fn resize_to_square(image: &DynamicImage, size: u32) -> RgbImage {
    image.resize_exact(size, size, FilterType::Nearest).to_rgb8()
}

/// Pixel value normalization expected by a backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Raw 0..255 values; the backbone rescales internally
    EfficientNet,
    /// Scaled to [-1, 1]
    MobileNet,
    /// Scaled to [0, 1] then standardized with ImageNet statistics
    ImageNet,
}

impl Normalization {
    fn scale(&self, value: u8, channel: usize) -> f32 {
        let v = value as f32;
        match self {
            Normalization::EfficientNet => v,
            Normalization::MobileNet => v / 127.5 - 1.0,
            Normalization::ImageNet => (v / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
        }
    }

    /// Normalize an image into a flat CHW buffer: all R, then all G, then all B
    pub fn apply(&self, image: &RgbImage) -> Vec<f32> {
        let (width, height) = image.dimensions();
        let num_pixels = (width * height) as usize;

        let mut normalized = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in image.pixels().enumerate() {
            normalized[i] = self.scale(pixel[0], 0);
            normalized[num_pixels + i] = self.scale(pixel[1], 1);
            normalized[2 * num_pixels + i] = self.scale(pixel[2], 2);
        }

        normalized
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::EfficientNet => write!(f, "efficientnet"),
            Normalization::MobileNet => write!(f, "mobilenet"),
            Normalization::ImageNet => write!(f, "imagenet"),
        }
    }
}

impl FromStr for Normalization {
    type Err = DiagnosisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "efficientnet" => Ok(Normalization::EfficientNet),
            "mobilenet" | "mobilenetv2" => Ok(Normalization::MobileNet),
            "imagenet" => Ok(Normalization::ImageNet),
            other => Err(DiagnosisError::Config(format!(
                "unknown normalization '{}'",
                other
            ))),
        }
    }
}

/// CLAHE parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClaheConfig {
    /// Histogram clip limit relative to a uniform distribution
    pub clip_limit: f32,
    /// Number of tiles along x and y
    pub grid: (u32, u32),
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            grid: (8, 8),
        }
    }
}

/// An RGB image split into 8-bit L*a*b* planes, as OpenCV's 8-bit `RGB2LAB`
///
/// L uses the 0..=255 scale (L* x 255/100); a and b are offset by 128.
#[derive(Debug, Clone)]
pub struct LabImage {
    pub lightness: GrayImage,
    pub a: GrayImage,
    pub b: GrayImage,
}

/// Chroma offset of the 8-bit a and b planes
const CHROMA_OFFSET: f32 = 128.0;

fn quantize(value: f32) -> Luma<u8> {
    Luma([value.round().clamp(0.0, 255.0) as u8])
}

const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;

fn srgb_to_linear(c: u8) -> f32 {
    let c = c as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (c * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

impl LabImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut lightness = GrayImage::new(width, height);
        let mut a = GrayImage::new(width, height);
        let mut b = GrayImage::new(width, height);

        for (x, y, pixel) in image.enumerate_pixels() {
            let r = srgb_to_linear(pixel[0]);
            let g = srgb_to_linear(pixel[1]);
            let bl = srgb_to_linear(pixel[2]);

            let xx = (0.412_453 * r + 0.357_580 * g + 0.180_423 * bl) / WHITE_X;
            let yy = 0.212_671 * r + 0.715_160 * g + 0.072_169 * bl;
            let zz = (0.019_334 * r + 0.119_193 * g + 0.950_227 * bl) / WHITE_Z;

            let (fx, fy, fz) = (lab_f(xx), lab_f(yy), lab_f(zz));
            let l = if yy > LAB_EPSILON {
                116.0 * yy.cbrt() - 16.0
            } else {
                903.3 * yy
            };

            lightness.put_pixel(x, y, quantize(l * 255.0 / 100.0));
            a.put_pixel(x, y, quantize(500.0 * (fx - fy) + CHROMA_OFFSET));
            b.put_pixel(x, y, quantize(200.0 * (fy - fz) + CHROMA_OFFSET));
        }

        Self { lightness, a, b }
    }

    /// Convert back to RGB
    pub fn to_rgb(&self) -> RgbImage {
        let (width, height) = self.lightness.dimensions();
        let mut out = RgbImage::new(width, height);

        for (x, y, luma) in self.lightness.enumerate_pixels() {
            let l = luma[0] as f32 * 100.0 / 255.0;
            let a = self.a.get_pixel(x, y)[0] as f32 - CHROMA_OFFSET;
            let b = self.b.get_pixel(x, y)[0] as f32 - CHROMA_OFFSET;
            let fy = (l + 16.0) / 116.0;
            let fx = fy + a / 500.0;
            let fz = fy - b / 200.0;

            let xx = lab_f_inv(fx) * WHITE_X;
            let yy = lab_f_inv(fy);
            let zz = lab_f_inv(fz) * WHITE_Z;

            let r = 3.240_479 * xx - 1.537_150 * yy - 0.498_535 * zz;
            let g = -0.969_256 * xx + 1.875_991 * yy + 0.041_556 * zz;
            let b = 0.055_648 * xx - 0.204_043 * yy + 1.057_311 * zz;

            out.put_pixel(
                x,
                y,
                Rgb([
                    linear_to_srgb(r.max(0.0)),
                    linear_to_srgb(g.max(0.0)),
                    linear_to_srgb(b.max(0.0)),
                ]),
            );
        }

        out
    }
}

/// Contrast-limited adaptive histogram equalization of a grayscale image
pub fn clahe(image: &GrayImage, config: &ClaheConfig) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = config.grid.0.clamp(1, width);
    let tiles_y = config.grid.1.clamp(1, height);

    // One 256-entry LUT per tile
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];

    for ty in 0..tiles_y {
        let y0 = ty * height / tiles_y;
        let y1 = (ty + 1) * height / tiles_y;
        for tx in 0..tiles_x {
            let x0 = tx * width / tiles_x;
            let x1 = (tx + 1) * width / tiles_x;

            let mut hist = [0usize; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let area = ((x1 - x0) * (y1 - y0)) as usize;
            clip_histogram(&mut hist, clip_threshold(config.clip_limit, area));

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let scale = 255.0 / area as f32;
            let mut sum = 0usize;
            for (value, count) in hist.iter().enumerate() {
                sum += count;
                lut[value] = (sum as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;
    let lut_at = |ty: u32, tx: u32, v: u8| luts[(ty * tiles_x + tx) as usize][v as usize] as f32;

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let (ty1, ty2, ya) = neighbour_tiles(y, tile_h, tiles_y);
        for x in 0..width {
            let (tx1, tx2, xa) = neighbour_tiles(x, tile_w, tiles_x);
            let v = image.get_pixel(x, y)[0];

            let top = lut_at(ty1, tx1, v) * (1.0 - xa) + lut_at(ty1, tx2, v) * xa;
            let bottom = lut_at(ty2, tx1, v) * (1.0 - xa) + lut_at(ty2, tx2, v) * xa;
            let res = top * (1.0 - ya) + bottom * ya;

            out.put_pixel(x, y, Luma([res.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

fn clip_threshold(clip_limit: f32, area: usize) -> usize {
    if clip_limit > 0.0 {
        ((clip_limit * area as f32 / 256.0) as usize).max(1)
    } else {
        usize::MAX
    }
}

/// Clip bins at `limit` and spread the excess evenly over all bins
fn clip_histogram(hist: &mut [usize; 256], limit: usize) {
    let mut excess = 0usize;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let batch = excess / 256;
    let residual = excess % 256;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for i in (0..256).step_by(step).take(residual) {
            hist[i] += 1;
        }
    }
}

/// Tiles bracketing `pos` and the interpolation weight of the second one
fn neighbour_tiles(pos: u32, tile_size: f32, tiles: u32) -> (u32, u32, f32) {
    let f = pos as f32 / tile_size - 0.5;
    let first = f.floor();
    let weight = f - first;
    let last = tiles as i64 - 1;
    let t1 = (first as i64).clamp(0, last) as u32;
    let t2 = (first as i64 + 1).clamp(0, last) as u32;
    (t1, t2, weight)
}

/// Apply CLAHE to the lightness channel of an RGB image
pub fn enhance_contrast(image: &RgbImage, config: &ClaheConfig) -> RgbImage {
    let mut lab = LabImage::from_rgb(image);
    lab.lightness = clahe(&lab.lightness, config);
    lab.to_rgb()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, lo: u8, hi: u8) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| {
            let t = x as f32 / (width - 1) as f32;
            Luma([(lo as f32 + t * (hi - lo) as f32).round() as u8])
        })
    }

    fn spread(image: &GrayImage) -> u8 {
        let min = image.pixels().map(|p| p[0]).min().unwrap_or(0);
        let max = image.pixels().map(|p| p[0]).max().unwrap_or(0);
        max - min
    }

    #[test]
    fn test_resize_to_square() {
        let img = DynamicImage::new_rgb8(100, 60);
        let resized = resize_to_square(&img, 224);
        assert_eq!(resized.dimensions(), (224, 224));
    }

    #[test]
    fn test_normalization_layout_and_ranges() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 0, 127]));

        let eff = Normalization::EfficientNet.apply(&img);
        assert_eq!(eff.len(), 3 * 16);
        assert_eq!(eff[0], 255.0);
        assert_eq!(eff[16], 0.0);
        assert_eq!(eff[32], 127.0);

        let mob = Normalization::MobileNet.apply(&img);
        approx::assert_abs_diff_eq!(mob[0], 1.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(mob[16], -1.0, epsilon = 1e-6);

        let imnet = Normalization::ImageNet.apply(&img);
        approx::assert_abs_diff_eq!(imnet[0], (1.0 - 0.485) / 0.229, epsilon = 1e-5);
    }

    #[test]
    fn test_normalization_parse() {
        assert_eq!("EfficientNet".parse::<Normalization>().unwrap(), Normalization::EfficientNet);
        assert_eq!("mobilenetv2".parse::<Normalization>().unwrap(), Normalization::MobileNet);
        assert!("vgg".parse::<Normalization>().is_err());
    }

    #[test]
    fn test_lab_round_trip_is_close() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 90]));
        let back = LabImage::from_rgb(&img).to_rgb();

        for (a, b) in img.pixels().zip(back.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i16 - b[c] as i16).abs() <= 4, "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_lab_lightness_extremes() {
        let black = LabImage::from_rgb(&RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])));
        let white = LabImage::from_rgb(&RgbImage::from_pixel(2, 2, Rgb([255, 255, 255])));
        assert_eq!(black.lightness.get_pixel(0, 0)[0], 0);
        assert_eq!(white.lightness.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_lab_chroma_is_quantized_around_128() {
        // cv2.cvtColor(..., COLOR_RGB2LAB): gray has a = b = 128,
        // pure green [0, 255, 0] maps to [224, 42, 211]
        let gray = LabImage::from_rgb(&RgbImage::from_pixel(1, 1, Rgb([128, 128, 128])));
        assert_eq!(gray.a.get_pixel(0, 0)[0], 128);
        assert_eq!(gray.b.get_pixel(0, 0)[0], 128);

        let green = LabImage::from_rgb(&RgbImage::from_pixel(1, 1, Rgb([0, 255, 0])));
        let lab = [
            green.lightness.get_pixel(0, 0)[0] as i16,
            green.a.get_pixel(0, 0)[0] as i16,
            green.b.get_pixel(0, 0)[0] as i16,
        ];
        for (got, want) in lab.iter().zip([224i16, 42, 211]) {
            assert!((got - want).abs() <= 1, "{:?}", lab);
        }
    }

    #[test]
    fn test_clahe_uniform_image_stays_uniform() {
        let flat = GrayImage::from_pixel(64, 64, Luma([120]));
        let out = clahe(&flat, &ClaheConfig::default());
        assert_eq!(spread(&out), 0);
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let dull = gradient(64, 64, 100, 130);
        let out = clahe(&dull, &ClaheConfig::default());
        assert!(spread(&out) > spread(&dull));
    }

    #[test]
    fn test_clahe_handles_tiny_images() {
        let tiny = gradient(3, 2, 0, 200);
        let out = clahe(&tiny, &ClaheConfig::default());
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn test_clip_histogram_preserves_mass() {
        let mut hist = [0usize; 256];
        hist[10] = 1000;
        hist[20] = 24;
        clip_histogram(&mut hist, 8);
        assert_eq!(hist.iter().sum::<usize>(), 1024);
        assert!(hist.iter().all(|&c| c <= 8 + 4 + 1));
    }

    #[test]
    fn test_enhance_contrast_keeps_dimensions() {
        let img = RgbImage::from_fn(32, 24, |x, _| Rgb([40, 100 + x as u8, 40]));
        let out = enhance_contrast(&img, &ClaheConfig::default());
        assert_eq!(out.dimensions(), (32, 24));
    }
}
