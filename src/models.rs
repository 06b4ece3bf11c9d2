use std::collections::BTreeMap;

use image::DynamicImage;

/// Label value for a region that has not been classified or edited yet.
pub const UNCLASSIFIED: i32 = -1;

/// Pipeline stage a region set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Detector output (template-sized rectangles, unclassified).
    Extraction,
    /// Model output.
    Classification,
    /// Operator-corrected ground truth.
    Edit,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Extraction, Stage::Classification, Stage::Edit];

    /// Workspace subdirectory holding this stage's sidecar files.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Classification => "classification",
            Stage::Edit => "edit",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A labeled axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    pub label: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            label: UNCLASSIFIED,
        }
    }

    pub fn with_label(mut self, label: i32) -> Self {
        self.label = label;
        self
    }

    /// Rectangle intersection test (ignores labels).
    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.x + other.w as i32
            && other.x < self.x + self.w as i32
            && self.y < other.y + other.h as i32
            && other.y < self.y + self.h as i32
    }

    /// Crop this region out of `img`, clamped to the image bounds.
    ///
    /// Manual edits may poke over the border; the crop shrinks rather than
    /// panicking. Returns `None` when nothing of the rectangle lies inside
    /// the image.
    pub fn crop_from(&self, img: &DynamicImage) -> Option<DynamicImage> {
        let (iw, ih) = (img.width() as i64, img.height() as i64);
        let x0 = (self.x as i64).clamp(0, iw);
        let y0 = (self.y as i64).clamp(0, ih);
        let x1 = (self.x as i64 + self.w as i64).clamp(0, iw);
        let y1 = (self.y as i64 + self.h as i64).clamp(0, ih);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(img.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Ordered sequence of regions for one (image, stage) pair.
pub type RegionSet = Vec<Region>;

/// Count regions per label value, in ascending label order.
pub fn label_histogram(regions: &[Region]) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for region in regions {
        *counts.entry(region.label).or_insert(0) += 1;
    }
    counts
}

/// Which sidecar stages exist for one image. Always derived from the
/// filesystem, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStatus {
    pub extracted: bool,
    pub classified: bool,
    pub edited: bool,
}

impl ImageStatus {
    pub fn as_triple(self) -> (bool, bool, bool) {
        (self.extracted, self.classified, self.edited)
    }
}
