use crate::error::{Error, Result};
use crate::models::Stage;
use crate::store::RegionStore;
use crate::workspace::Workspace;

/// Outcome of comparing model predictions against operator edits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Fraction of label-equal pairs, as a percentage.
    pub accuracy: f32,
    pub correct: usize,
    pub total: usize,
    /// Images that contributed pairs.
    pub images: usize,
}

/// Compare Classification records against Edit ground truth over `images`.
///
/// Only images carrying both sidecars participate. Within an image the two
/// region lists are paired positionally (file order), truncating to the
/// shorter list; rectangles are not matched, so edits that insert or remove
/// rows shift every pair after them. Yields `AccuracyUndefined` when no
/// pairs exist, never a division by zero.
pub fn evaluate(workspace: &Workspace, images: &[String]) -> Result<Evaluation> {
    let store = RegionStore::new(workspace.clone());
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut contributing = 0usize;

    for image in images {
        if !store.exists(image, Stage::Classification) || !store.exists(image, Stage::Edit) {
            continue;
        }
        let classified = store.read(image, Stage::Classification)?;
        let edited = store.read(image, Stage::Edit)?;
        let pairs = classified.len().min(edited.len());
        if pairs > 0 {
            contributing += 1;
        }
        for (predicted, truth) in classified.iter().zip(edited.iter()) {
            total += 1;
            if predicted.label == truth.label {
                correct += 1;
            }
        }
    }

    if total == 0 {
        return Err(Error::AccuracyUndefined);
    }
    Ok(Evaluation {
        accuracy: correct as f32 / total as f32 * 100.0,
        correct,
        total,
        images: contributing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;

    fn fixture() -> (tempfile::TempDir, Workspace, RegionStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let store = RegionStore::new(ws.clone());
        (dir, ws, store)
    }

    fn labeled(labels: &[i32]) -> Vec<Region> {
        labels
            .iter()
            .map(|&l| Region::new(0, 0, 4, 4).with_label(l))
            .collect()
    }

    #[test]
    fn accuracy_counts_label_equal_pairs_across_images() {
        let (_dir, ws, store) = fixture();
        store.write("a.png", Stage::Classification, &labeled(&[0, 1, 2])).unwrap();
        store.write("a.png", Stage::Edit, &labeled(&[0, 1, 1])).unwrap();
        store.write("b.png", Stage::Classification, &labeled(&[2, 2])).unwrap();
        store.write("b.png", Stage::Edit, &labeled(&[2, 2])).unwrap();

        let result = evaluate(&ws, &["a.png".into(), "b.png".into()]).unwrap();
        assert_eq!(result.total, 5);
        assert_eq!(result.correct, 4);
        assert_eq!(result.images, 2);
        assert!((result.accuracy - 80.0).abs() < 1e-4);
    }

    #[test]
    fn images_missing_either_stage_are_ignored() {
        let (_dir, ws, store) = fixture();
        store.write("a.png", Stage::Classification, &labeled(&[0])).unwrap();
        store.write("b.png", Stage::Classification, &labeled(&[1])).unwrap();
        store.write("b.png", Stage::Edit, &labeled(&[1])).unwrap();

        let result = evaluate(&ws, &["a.png".into(), "b.png".into()]).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.images, 1);
    }

    #[test]
    fn pairing_is_positional_and_truncates_to_the_shorter_list() {
        let (_dir, ws, store) = fixture();
        store.write("a.png", Stage::Classification, &labeled(&[0, 1, 2, 0])).unwrap();
        store.write("a.png", Stage::Edit, &labeled(&[0, 1])).unwrap();

        let result = evaluate(&ws, &["a.png".into()]).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.correct, 2);
    }

    #[test]
    fn no_eligible_pairs_is_undefined_not_zero() {
        let (_dir, ws, _store) = fixture();
        assert!(matches!(evaluate(&ws, &[]), Err(Error::AccuracyUndefined)));
        assert!(matches!(
            evaluate(&ws, &["a.png".into()]),
            Err(Error::AccuracyUndefined)
        ));
    }
}
