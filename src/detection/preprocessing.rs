use image::{DynamicImage, GrayImage};
use imageproc::filter::box_filter;

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Mean-based local adaptive binarization.
///
/// A pixel becomes white when it exceeds the mean of its
/// `(2*block_radius+1)²` neighborhood minus `offset`, which suppresses the
/// slow illumination gradients typical of microscopy fields. Matches the
/// classic adaptive-mean threshold with block size 25 and offset 10 at the
/// default parameters.
pub fn binarize_adaptive(gray: &GrayImage, block_radius: u32, offset: i16) -> GrayImage {
    // The window shrinks for rasters smaller than the block (templates).
    let rx = block_radius.min(gray.width().saturating_sub(1) / 2);
    let ry = block_radius.min(gray.height().saturating_sub(1) / 2);
    let means = box_filter(gray, rx, ry);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = gray.get_pixel(x, y)[0] as i16;
        let threshold = means.get_pixel(x, y)[0] as i16 - offset;
        pixel[0] = if value > threshold { 255 } else { 0 };
    }
    out
}
