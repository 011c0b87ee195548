//! Healthy-leaf override heuristic
//!
//! Low-confidence disease predictions on leaves that are mostly green and
//! visually smooth are flipped back to the healthy class, provided the model
//! itself still rates the healthy class highly.

use image::{GrayImage, Luma, RgbImage};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};

use crate::model::ModelKind;

/// Label of the healthy class in the shipped class index
pub const DEFAULT_HEALTHY_LABEL: &str = "Banana_Healthy";

/// OpenCV's fixed-point RGB to gray weights (they sum to 1 << 14)
const GRAY_WEIGHTS: [u32; 3] = [4899, 9617, 1868];

/// Taps of OpenCV's 5x5 Gaussian with sigma 0 (each pass sums to 16)
const BINOMIAL_5: [u32; 5] = [1, 4, 6, 4, 1];

/// Inclusive OpenCV-scaled HSV bounds for "green" (H in 0..180)
const GREEN_LOWER: [u8; 3] = [35, 50, 50];
const GREEN_UPPER: [u8; 3] = [85, 255, 255];

/// Thresholds for the healthy override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverridePolicy {
    pub healthy_label: String,
    /// Only predictions below this confidence are reconsidered
    pub confidence_threshold: f32,
    /// Green pixel fraction must exceed this
    pub min_green_ratio: f32,
    /// Mean edge magnitude must stay below this
    pub max_edge_intensity: f32,
    /// Healthy probability must exceed this
    pub healthy_floor: f32,
    /// Healthy must rank within the top `top_k` classes
    pub top_k: usize,
}

impl OverridePolicy {
    /// Thresholds tuned for a single backbone
    pub fn single() -> Self {
        Self {
            healthy_label: DEFAULT_HEALTHY_LABEL.to_string(),
            confidence_threshold: 0.60,
            min_green_ratio: 0.60,
            max_edge_intensity: 20.0,
            healthy_floor: 0.25,
            top_k: 3,
        }
    }

    /// Stricter thresholds for the averaged dual-branch model
    pub fn ensemble() -> Self {
        Self {
            confidence_threshold: 0.65,
            max_edge_intensity: 18.0,
            ..Self::single()
        }
    }

    pub fn for_kind(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Single => Self::single(),
            ModelKind::Ensemble => Self::ensemble(),
        }
    }

    /// Whether a prediction is eligible for the visual check at all
    pub fn applies_to(&self, top_label: &str, confidence: f32) -> bool {
        top_label != self.healthy_label && confidence < self.confidence_threshold
    }

    /// Decide the override given the measured cues
    ///
    /// `ranked` holds class indices sorted by descending probability.
    pub fn decide(
        &self,
        cues: &VisualCues,
        healthy_index: Option<usize>,
        ranked: &[usize],
        probabilities: &[f32],
    ) -> Option<f32> {
        let healthy = healthy_index?;
        let healthy_prob = *probabilities.get(healthy)?;

        let in_top_k = ranked.iter().take(self.top_k).any(|&i| i == healthy);

        (cues.green_ratio > self.min_green_ratio
            && cues.edge_intensity < self.max_edge_intensity
            && in_top_k
            && healthy_prob > self.healthy_floor)
            .then_some(healthy_prob)
    }
}

impl Default for OverridePolicy {
    fn default() -> Self {
        Self::single()
    }
}

/// Visual measurements taken on the un-enhanced image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualCues {
    pub green_ratio: f32,
    pub edge_intensity: f32,
}

impl VisualCues {
    pub fn measure(image: &RgbImage) -> Self {
        Self {
            green_ratio: green_ratio(image),
            edge_intensity: edge_intensity(image),
        }
    }
}

/// RGB to HSV on OpenCV's 8-bit scale (H 0..180, S and V 0..255)
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = (v - min) as f32;
    let vf = v as f32;

    let s = if v == 0 { 0.0 } else { 255.0 * diff / vf };

    let h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (gf - bf) / diff
    } else if v == g {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().min(255.0) as u8,
        v,
    ]
}

/// Fraction of pixels whose hue, saturation and value fall in the green band
pub fn green_ratio(image: &RgbImage) -> f32 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 0.0;
    }

    let green = image
        .pixels()
        .filter(|p| {
            let hsv = rgb_to_hsv(p[0], p[1], p[2]);
            (0..3).all(|c| hsv[c] >= GREEN_LOWER[c] && hsv[c] <= GREEN_UPPER[c])
        })
        .count();

    green as f32 / total as f32
}

/// BT.601 luma, rounded the way OpenCV's 8-bit `RGB2GRAY` rounds
fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let weighted: u32 = (0..3).map(|c| p[c] as u32 * GRAY_WEIGHTS[c]).sum();
        Luma([((weighted + (1 << 13)) >> 14) as u8])
    })
}

/// Mirror an out-of-range coordinate without repeating the edge (`cb|abcd|cb`)
fn reflect_101(pos: i64, len: u32) -> u32 {
    let last = len as i64 - 1;
    if last <= 0 {
        return 0;
    }
    let mut pos = pos;
    while pos < 0 || pos > last {
        pos = if pos < 0 { -pos } else { 2 * last - pos };
    }
    pos as u32
}

/// Grow an image by `border` pixels on every side with reflect-101 edges
fn pad_reflect_101(image: &GrayImage, border: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let offset = border as i64;
    GrayImage::from_fn(width + 2 * border, height + 2 * border, |x, y| {
        *image.get_pixel(
            reflect_101(x as i64 - offset, width),
            reflect_101(y as i64 - offset, height),
        )
    })
}

/// 5x5 binomial blur with reflect-101 borders, rounded back to 8 bits
///
/// Bit-exact with `cv2.GaussianBlur(gray, (5, 5), 0)`.
fn binomial_blur(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let padded = pad_reflect_101(image, 2);

    // horizontal pass over every padded row, kept unscaled
    let mut rows = Vec::with_capacity(((height + 4) * width) as usize);
    for y in 0..height + 4 {
        for x in 0..width {
            let sum: u32 = BINOMIAL_5
                .iter()
                .enumerate()
                .map(|(k, &w)| w * padded.get_pixel(x + k as u32, y)[0] as u32)
                .sum();
            rows.push(sum);
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let sum: u32 = BINOMIAL_5
            .iter()
            .enumerate()
            .map(|(k, &w)| w * rows[((y + k as u32) * width + x) as usize])
            .sum();
        Luma([((sum + 128) >> 8) as u8])
    })
}

/// Mean Sobel gradient magnitude of the blurred gray image
///
/// Gray conversion, blur and 3x3 Sobel (reflect-101 borders) follow OpenCV,
/// which the override thresholds were tuned against.
pub fn edge_intensity(image: &RgbImage) -> f32 {
    let (width, height) = image.dimensions();
    let total = width as usize * height as usize;
    if total == 0 {
        return 0.0;
    }

    let padded = pad_reflect_101(&binomial_blur(&to_gray(image)), 1);
    let gx = horizontal_sobel(&padded);
    let gy = vertical_sobel(&padded);

    let mut sum = 0.0f64;
    for y in 1..=height {
        for x in 1..=width {
            let dx = gx.get_pixel(x, y)[0] as f64;
            let dy = gy.get_pixel(x, y)[0] as f64;
            sum += (dx * dx + dy * dy).sqrt();
        }
    }

    (sum / total as f64) as f32
}

/// Class indices ordered by descending probability, earliest index first on ties
pub fn rank_classes(probabilities: &[f32]) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..probabilities.len()).collect();
    ranked.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn leaf_green(size: u32) -> RgbImage {
        RgbImage::from_pixel(size, size, Rgb([40, 160, 40]))
    }

    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn test_hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(40, 160, 40), [60, 191, 160]);
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_green_ratio() {
        assert_eq!(green_ratio(&leaf_green(16)), 1.0);
        assert_eq!(green_ratio(&RgbImage::from_pixel(8, 8, Rgb([200, 30, 30]))), 0.0);

        // left half green, right half brown
        let half = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([40, 160, 40])
            } else {
                Rgb([120, 80, 30])
            }
        });
        approx::assert_abs_diff_eq!(green_ratio(&half), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_edge_intensity_flat_vs_textured() {
        approx::assert_abs_diff_eq!(edge_intensity(&leaf_green(32)), 0.0, epsilon = 1e-6);
        assert!(edge_intensity(&checkerboard(32)) > 20.0);
        assert_eq!(edge_intensity(&RgbImage::new(0, 0)), 0.0);
        approx::assert_abs_diff_eq!(edge_intensity(&leaf_green(1)), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gray_matches_opencv_rounding() {
        let gray = to_gray(&RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([40, 160, 40]),
            1 => Rgb([255, 255, 255]),
            _ => Rgb([160, 160, 160]),
        }));
        assert_eq!(gray.get_pixel(0, 0)[0], 110);
        assert_eq!(gray.get_pixel(1, 0)[0], 255);
        assert_eq!(gray.get_pixel(2, 0)[0], 160);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 8), 1);
        assert_eq!(reflect_101(-2, 8), 2);
        assert_eq!(reflect_101(8, 8), 6);
        assert_eq!(reflect_101(9, 8), 5);
        assert_eq!(reflect_101(3, 8), 3);
        assert_eq!(reflect_101(-2, 2), 0);
        assert_eq!(reflect_101(-1, 1), 0);
    }

    /// A vertical step from 0 to 160 at column 4 of an 8x8 image
    fn step_edge() -> RgbImage {
        RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([0, 0, 0])
            } else {
                Rgb([160, 160, 160])
            }
        })
    }

    #[test]
    fn test_binomial_blur_matches_opencv() {
        // cv2.GaussianBlur(step, (5, 5), 0) row: [0, 0, 10, 50, 110, 150, 160, 160]
        let blurred = binomial_blur(&to_gray(&step_edge()));
        let expected = [0u8, 0, 10, 50, 110, 150, 160, 160];
        for y in 0..8 {
            let row: Vec<u8> = (0..8).map(|x| blurred.get_pixel(x, y)[0]).collect();
            assert_eq!(row, expected);
        }
    }

    #[test]
    fn test_edge_intensity_matches_opencv_reference() {
        // Sobel dx per row with reflect-101 ends: [0, 40, 200, 400, 400, 200, 40, 0],
        // dy is zero, so the mean magnitude is 1280 / 8
        approx::assert_abs_diff_eq!(edge_intensity(&step_edge()), 160.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rank_classes() {
        assert_eq!(rank_classes(&[0.1, 0.6, 0.3]), vec![1, 2, 0]);
        assert_eq!(rank_classes(&[0.5, 0.5, 0.0]), vec![0, 1, 2]);
        assert!(rank_classes(&[]).is_empty());
    }

    #[test]
    fn test_presets() {
        let single = OverridePolicy::single();
        let ensemble = OverridePolicy::for_kind(ModelKind::Ensemble);
        assert_eq!(single.confidence_threshold, 0.60);
        assert_eq!(single.max_edge_intensity, 20.0);
        assert_eq!(ensemble.confidence_threshold, 0.65);
        assert_eq!(ensemble.max_edge_intensity, 18.0);
        assert_eq!(ensemble.min_green_ratio, 0.60);
        assert_eq!(ensemble.healthy_floor, 0.25);
    }

    #[test]
    fn test_applies_only_to_uncertain_disease() {
        let policy = OverridePolicy::single();
        assert!(policy.applies_to("Banana_Black_Sigatoka", 0.5));
        assert!(!policy.applies_to("Banana_Black_Sigatoka", 0.6));
        assert!(!policy.applies_to("Banana_Healthy", 0.3));
    }

    #[test]
    fn test_decide() {
        let policy = OverridePolicy::single();
        let calm = VisualCues {
            green_ratio: 0.9,
            edge_intensity: 5.0,
        };
        let probs = [0.45, 0.15, 0.40];
        let ranked = rank_classes(&probs);

        assert_eq!(policy.decide(&calm, Some(2), &ranked, &probs), Some(0.40));

        // no healthy class known
        assert_eq!(policy.decide(&calm, None, &ranked, &probs), None);

        // too busy
        let busy = VisualCues {
            edge_intensity: 25.0,
            ..calm
        };
        assert_eq!(policy.decide(&busy, Some(2), &ranked, &probs), None);

        // not green enough
        let brown = VisualCues {
            green_ratio: 0.3,
            ..calm
        };
        assert_eq!(policy.decide(&brown, Some(2), &ranked, &probs), None);

        // healthy below the floor
        let probs = [0.55, 0.25, 0.20];
        let ranked = rank_classes(&probs);
        assert_eq!(policy.decide(&calm, Some(2), &ranked, &probs), None);
    }

    #[test]
    fn test_decide_requires_top_k() {
        let policy = OverridePolicy {
            top_k: 1,
            ..OverridePolicy::single()
        };
        let calm = VisualCues {
            green_ratio: 0.9,
            edge_intensity: 5.0,
        };
        let probs = [0.45, 0.15, 0.40];
        assert_eq!(policy.decide(&calm, Some(2), &rank_classes(&probs), &probs), None);
    }
}
