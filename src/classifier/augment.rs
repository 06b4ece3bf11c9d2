use image::{Rgb, RgbImage, imageops};
use imageproc::geometric_transformations::{Interpolation, Projection, rotate_about_center, warp};
use rand::Rng;

/// Stochastic augmentation applied to each training crop: random horizontal
/// and vertical flips, a full-circle rotation and a mild affine shear/scale.
/// Geometry only: the class label is untouched by construction.
pub fn augment(crop: &RgbImage, rng: &mut impl Rng) -> RgbImage {
    let mut out = crop.clone();

    if rng.random_bool(0.5) {
        out = imageops::flip_horizontal(&out);
    }
    if rng.random_bool(0.5) {
        out = imageops::flip_vertical(&out);
    }

    let angle = rng.random_range(-std::f32::consts::PI..std::f32::consts::PI);
    out = rotate_about_center(&out, angle, Interpolation::Bilinear, Rgb([0, 0, 0]));

    let shear = rng.random_range(-0.18..0.18f32);
    let scale = rng.random_range(0.8..1.2f32);
    let cx = out.width() as f32 / 2.0;
    let cy = out.height() as f32 / 2.0;
    let affine = Projection::from_matrix([1.0, shear, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    if let Some(affine) = affine {
        let projection = Projection::translate(cx, cy)
            * Projection::scale(scale, scale)
            * affine
            * Projection::translate(-cx, -cy);
        out = warp(&out, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]));
    }

    out
}
