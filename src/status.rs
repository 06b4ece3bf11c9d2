use crate::error::Result;
use crate::models::{ImageStatus, Stage};
use crate::store::RegionStore;
use crate::workspace::Workspace;

/// Permission set over a single boolean status dimension.
///
/// `any()` admits both values, `only(v)` admits one, `none()` admits neither
/// (a filter with an empty dimension matches no image at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolSet {
    pub allow_true: bool,
    pub allow_false: bool,
}

impl BoolSet {
    pub fn any() -> Self {
        Self { allow_true: true, allow_false: true }
    }

    pub fn only(value: bool) -> Self {
        Self { allow_true: value, allow_false: !value }
    }

    pub fn none() -> Self {
        Self { allow_true: false, allow_false: false }
    }

    pub fn contains(self, value: bool) -> bool {
        if value { self.allow_true } else { self.allow_false }
    }
}

/// Elementwise permission sets over the (extracted, classified, edited)
/// status triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter {
    pub extracted: BoolSet,
    pub classified: BoolSet,
    pub edited: BoolSet,
}

impl StatusFilter {
    /// Matches every image.
    pub fn any() -> Self {
        Self {
            extracted: BoolSet::any(),
            classified: BoolSet::any(),
            edited: BoolSet::any(),
        }
    }

    pub fn matches(&self, status: ImageStatus) -> bool {
        self.extracted.contains(status.extracted)
            && self.classified.contains(status.classified)
            && self.edited.contains(status.edited)
    }
}

/// Answers "which stages has this image completed" and filtered queries over
/// the image set.
///
/// Status is recomputed from sidecar presence on every query; nothing is
/// cached, so it can never go stale across a store write.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    workspace: Workspace,
    store: RegionStore,
}

impl StatusTracker {
    pub fn new(workspace: Workspace) -> Self {
        let store = RegionStore::new(workspace.clone());
        Self { workspace, store }
    }

    pub fn status_of(&self, image: &str) -> ImageStatus {
        ImageStatus {
            extracted: self.store.exists(image, Stage::Extraction),
            classified: self.store.exists(image, Stage::Classification),
            edited: self.store.exists(image, Stage::Edit),
        }
    }

    /// Images whose status triple is elementwise admitted by `filter`,
    /// in stable lexicographic order.
    pub fn filter(&self, filter: StatusFilter) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for image in self.workspace.list_images()? {
            if filter.matches(self.status_of(&image)) {
                result.push(image);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;

    fn fixture() -> (tempfile::TempDir, StatusTracker, RegionStore) {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            image::DynamicImage::new_rgb8(4, 4)
                .save(dir.path().join(name))
                .unwrap();
        }
        let ws = Workspace::open(dir.path()).unwrap();
        let store = RegionStore::new(ws.clone());
        (dir, StatusTracker::new(ws), store)
    }

    #[test]
    fn status_follows_sidecar_writes_and_removals() {
        let (_dir, tracker, store) = fixture();
        assert_eq!(tracker.status_of("a.png").as_triple(), (false, false, false));

        store.write("a.png", Stage::Extraction, &[Region::new(0, 0, 2, 2)]).unwrap();
        store.write("a.png", Stage::Edit, &[]).unwrap();
        assert_eq!(tracker.status_of("a.png").as_triple(), (true, false, true));

        store.remove("a.png", Stage::Edit).unwrap();
        assert_eq!(tracker.status_of("a.png").as_triple(), (true, false, false));
    }

    #[test]
    fn permissive_filter_returns_the_whole_image_set_in_order() {
        let (_dir, tracker, _store) = fixture();
        assert_eq!(tracker.filter(StatusFilter::any()).unwrap(), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn empty_dimension_matches_nothing() {
        let (_dir, tracker, store) = fixture();
        store.write("a.png", Stage::Extraction, &[]).unwrap();
        let filter = StatusFilter {
            extracted: BoolSet::only(true),
            classified: BoolSet::none(),
            edited: BoolSet::any(),
        };
        assert!(tracker.filter(filter).unwrap().is_empty());
    }

    #[test]
    fn filter_selects_by_each_dimension() {
        let (_dir, tracker, store) = fixture();
        store.write("a.png", Stage::Extraction, &[]).unwrap();
        store.write("b.png", Stage::Extraction, &[]).unwrap();
        store.write("b.png", Stage::Classification, &[]).unwrap();

        // Unclassified-but-extracted, the "Unprocessed" classification scope.
        let filter = StatusFilter {
            extracted: BoolSet::only(true),
            classified: BoolSet::only(false),
            edited: BoolSet::any(),
        };
        assert_eq!(tracker.filter(filter).unwrap(), vec!["a.png"]);

        let filter = StatusFilter {
            extracted: BoolSet::only(false),
            classified: BoolSet::any(),
            edited: BoolSet::any(),
        };
        assert_eq!(tracker.filter(filter).unwrap(), vec!["c.png"]);
    }
}
