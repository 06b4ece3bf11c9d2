pub mod preprocessing;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use log::debug;

use crate::error::{Error, Result};
use crate::models::{Region, RegionSet};
use crate::workspace::Workspace;

/// Default match-score threshold below which the greedy search stops, on
/// the zero-mean correlation scale where a featureless window scores 0.
/// Low on purpose: local contrast varies a lot across a well plate.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.15;

/// Block radius for adaptive binarization (25x25 neighborhood).
const BINARIZE_BLOCK_RADIUS: u32 = 12;
/// Offset subtracted from the local mean during binarization.
const BINARIZE_OFFSET: i16 = 10;

/// Greedy template-matching detector for repeated well patterns.
///
/// Stateless beyond its inputs: holds the binarized template and nothing
/// else, so repeated `detect` calls on the same image are deterministic.
pub struct WellDetector {
    template: GrayImage,
}

impl WellDetector {
    /// Build a detector from an already-loaded grayscale template.
    /// The template is binarized once, with the same parameters later
    /// applied to each searched image.
    pub fn new(template: GrayImage) -> Result<Self> {
        if template.width() == 0 || template.height() == 0 {
            return Err(Error::Configuration("template image is empty".into()));
        }
        let template =
            preprocessing::binarize_adaptive(&template, BINARIZE_BLOCK_RADIUS, BINARIZE_OFFSET);
        Ok(Self { template })
    }

    /// Build a detector from the workspace template, failing fast when the
    /// template is missing or undecodable.
    pub fn from_workspace(workspace: &Workspace) -> Result<Self> {
        Self::new(workspace.load_template()?)
    }

    pub fn template_size(&self) -> (u32, u32) {
        self.template.dimensions()
    }

    /// Enumerate all template-sized regions matching above `threshold`.
    ///
    /// Zero-mean normalized cross-correlation between the binarized image
    /// and the binarized template, then a greedy loop: take the global
    /// maximum, record a region there, suppress every window overlapping it
    /// and repeat until the best remaining score drops below `threshold`.
    /// Regions come out in descending-score discovery order, all labeled
    /// unclassified, and never overlap one another.
    pub fn detect(&self, image: &DynamicImage, threshold: f32) -> Result<RegionSet> {
        let (tw, th) = self.template.dimensions();
        if image.width() < tw || image.height() < th {
            return Err(Error::Configuration(format!(
                "image {}x{} is smaller than the {}x{} template",
                image.width(),
                image.height(),
                tw,
                th
            )));
        }

        let gray = preprocessing::to_grayscale(image);
        let binary =
            preprocessing::binarize_adaptive(&gray, BINARIZE_BLOCK_RADIUS, BINARIZE_OFFSET);
        let mut response = match_coefficient(&binary, &self.template);
        let (rw, rh) = response.dimensions();

        let mut regions = Vec::new();
        loop {
            // Global maximum of the remaining response surface. Ties break
            // on scan order, which keeps repeated runs identical.
            let mut best = f32::MIN;
            let mut best_pos = (0u32, 0u32);
            for (x, y, pixel) in response.enumerate_pixels() {
                if pixel[0] > best {
                    best = pixel[0];
                    best_pos = (x, y);
                }
            }
            if best < threshold {
                break;
            }

            let (mx, my) = best_pos;
            regions.push(Region::new(mx as i32, my as i32, tw, th));

            // Suppress every window that would overlap the match, so the
            // same well is never reported twice and no two regions intersect.
            let x0 = mx.saturating_sub(tw - 1);
            let y0 = my.saturating_sub(th - 1);
            let x1 = (mx + tw - 1).min(rw - 1);
            let y1 = (my + th - 1).min(rh - 1);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    response.put_pixel(x, y, Luma([f32::MIN]));
                }
            }
        }

        debug!(
            "detected {} wells at threshold {threshold} ({}x{} template)",
            regions.len(),
            tw,
            th
        );
        Ok(regions)
    }
}

type ResponseMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Zero-mean normalized cross-correlation response in [-1, 1].
///
/// Plain normalized cross-correlation of a mostly-white binarized field
/// never drops far below 1, which would let every window past a low
/// threshold. Subtracting the window and template means makes a featureless
/// window score exactly 0 instead.
fn match_coefficient(image: &GrayImage, template: &GrayImage) -> ResponseMap {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    let n = (tw * th) as f32;

    let values: Vec<f32> = template.pixels().map(|p| p[0] as f32 / 255.0).collect();
    let mean = values.iter().sum::<f32>() / n;
    let centered: Vec<f32> = values.iter().map(|t| t - mean).collect();
    let template_var: f32 = centered.iter().map(|t| t * t).sum();

    let mut response = ResponseMap::new(iw - tw + 1, ih - th + 1);
    // A constant template matches everything equally; leave the response
    // flat zero and let the threshold reject it.
    if template_var <= f32::EPSILON {
        return response;
    }

    for (rx, ry, pixel) in response.enumerate_pixels_mut() {
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        let mut dot = 0.0f32;
        for ty in 0..th {
            for tx in 0..tw {
                let v = image.get_pixel(rx + tx, ry + ty)[0] as f32 / 255.0;
                sum += v;
                sum_sq += v * v;
                // The centered template sums to zero, so this dot product
                // already equals the zero-mean numerator.
                dot += v * centered[(ty * tw + tx) as usize];
            }
        }
        let window_var = sum_sq - sum * sum / n;
        pixel[0] = if window_var > f32::EPSILON {
            dot / (window_var * template_var).sqrt()
        } else {
            0.0
        };
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNCLASSIFIED;
    use image::Luma;

    /// 2px-period checkerboard: binarizes to a stable texture that the flat
    /// background cannot reproduce.
    fn checkerboard(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x + y) % 2 == 0 { 255 } else { 0 }])
        })
    }

    fn stamp(canvas: &mut GrayImage, pattern: &GrayImage, ox: u32, oy: u32) {
        for (x, y, p) in pattern.enumerate_pixels() {
            canvas.put_pixel(ox + x, oy + y, *p);
        }
    }

    fn fixture() -> (WellDetector, DynamicImage, Vec<(u32, u32)>) {
        let template = checkerboard(8);
        let mut canvas = GrayImage::from_pixel(96, 96, Luma([128]));
        let spots = vec![(10, 10), (60, 12), (14, 60)];
        for &(x, y) in &spots {
            stamp(&mut canvas, &template, x, y);
        }
        let detector = WellDetector::new(template).unwrap();
        (detector, DynamicImage::ImageLuma8(canvas), spots)
    }

    #[test]
    fn finds_each_stamped_well_exactly_once_at_the_default_threshold() {
        let (detector, image, spots) = fixture();
        let regions = detector.detect(&image, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert_eq!(regions.len(), spots.len());
        for r in &regions {
            assert_eq!((r.w, r.h), (8, 8));
            assert_eq!(r.label, UNCLASSIFIED);
            assert!(spots.contains(&(r.x as u32, r.y as u32)), "unexpected match at {r:?}");
        }
    }

    #[test]
    fn featureless_field_produces_no_detections() {
        // Every window of a flat field scores 0 on the zero-mean scale, so
        // even the permissive default threshold rejects all of them.
        let detector = WellDetector::new(checkerboard(8)).unwrap();
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
        let regions = detector.detect(&flat, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert!(regions.is_empty(), "false matches on a flat field: {regions:?}");
    }

    #[test]
    fn detect_is_deterministic() {
        let (detector, image, _) = fixture();
        let a = detector.detect(&image, 0.5).unwrap();
        let b = detector.detect(&image, 0.5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn raising_the_threshold_never_adds_detections() {
        let (detector, image, _) = fixture();
        let mut previous = usize::MAX;
        for threshold in [0.15, 0.3, 0.5, 0.7, 0.9, 0.99] {
            let count = detector.detect(&image, threshold).unwrap().len();
            assert!(count <= previous, "count rose from {previous} to {count} at {threshold}");
            previous = count;
        }
    }

    #[test]
    fn reported_regions_never_overlap() {
        let (detector, image, _) = fixture();
        let regions = detector.detect(&image, DEFAULT_MATCH_THRESHOLD).unwrap();
        for (i, a) in regions.iter().enumerate() {
            for b in regions.iter().skip(i + 1) {
                assert!(!a.intersects(b), "overlapping matches: {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn image_smaller_than_template_is_a_configuration_error() {
        let detector = WellDetector::new(checkerboard(8)).unwrap();
        let tiny = DynamicImage::new_luma8(4, 4);
        assert!(matches!(
            detector.detect(&tiny, 0.5),
            Err(Error::Configuration(_))
        ));
    }
}
