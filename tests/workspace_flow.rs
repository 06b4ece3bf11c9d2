use image::{DynamicImage, GrayImage, Luma};

use wellscan::{App, BoolSet, Error, JobOutcome, ModelKind, Region, Scope, StatusFilter};

/// 2px-period checkerboard texture, distinct from a flat background after
/// adaptive binarization.
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

const WELL_SPOTS: [(u32, u32); 3] = [(10, 10), (60, 12), (14, 60)];

fn build_workspace(dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir(dir)?;
    let template = checkerboard(8);
    for name in ["a.png", "b.png"] {
        let mut canvas = GrayImage::from_pixel(96, 96, Luma([128]));
        for &(x, y) in &WELL_SPOTS {
            stamp(&mut canvas, &template, x, y);
        }
        DynamicImage::ImageLuma8(canvas).save(dir.join(name))?;
    }
    Ok(())
}

fn edits() -> Vec<Region> {
    WELL_SPOTS
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| Region::new(x as i32, y as i32, 8, 8).with_label((i % 2) as i32))
        .collect()
}

#[test]
fn extract_edit_train_classify_evaluate() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("plates");
    build_workspace(&root)?;

    let mut app = App::open(&root, dir.path().join("settings.json"))?;
    app.workspace().reset_classes(&["empty".into(), "full".into()])?;
    app.choose_template(&DynamicImage::ImageLuma8(checkerboard(8)))?;

    // Extraction covers both images and finds exactly the stamped wells;
    // the flat background never clears the match threshold.
    let summary = app.start_extraction(Scope::All)?;
    assert_eq!(summary.processed.len(), 2);
    assert!(summary.skipped.is_empty());
    for (image, wells) in &summary.processed {
        assert_eq!(*wells, WELL_SPOTS.len(), "{image} found {wells} wells");
        assert!(app.query_status(image).extracted);
    }

    // Operator corrections become the ground truth for both images.
    for name in ["a.png", "b.png"] {
        app.record_edits(name, &edits())?;
    }
    let edited = app.query_filtered_images(StatusFilter {
        extracted: BoolSet::any(),
        classified: BoolSet::any(),
        edited: BoolSet::only(true),
    })?;
    assert_eq!(edited, vec!["a.png", "b.png"]);

    // Train a small run; the first batch always checkpoints.
    app.start_training(ModelKind::MobileNet, 2, 4, None)?;
    let (report, _) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    let checkpoint = std::fs::read_dir(app.workspace().model_dir())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with("MobileNet_")))
        .expect("training wrote a checkpoint");

    // Classification writes a sidecar per extracted image with progress.
    app.start_classification(Scope::All, &checkpoint)?;
    let (report, progress) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert!(!progress.is_empty());
    for name in ["a.png", "b.png"] {
        let status = app.query_status(name);
        assert!(status.classified, "{name} not classified");
    }

    // Positional evaluation over both images; labels come from the model so
    // only the denominator is predictable.
    let result = app.evaluate_accuracy()?;
    assert_eq!(result.images, 2);
    assert_eq!(result.total, 2 * edits().len());
    assert!((0.0..=100.0).contains(&result.accuracy));

    Ok(())
}

#[test]
fn jobs_are_mutually_exclusive_and_cancellable() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("plates");
    build_workspace(&root)?;

    let mut app = App::open(&root, dir.path().join("settings.json"))?;
    app.workspace().reset_classes(&["empty".into(), "full".into()])?;
    for name in ["a.png", "b.png"] {
        app.record_edits(name, &edits())?;
    }

    // A long training run occupies the single worker slot.
    app.start_training(ModelKind::MobileNet, 100_000, 2, None)?;
    assert!(matches!(
        app.start_training(ModelKind::ResNet18, 1, 2, None),
        Err(Error::Busy)
    ));

    app.cancel_active_job();
    let (report, _) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Cancelled);

    // The slot frees up once the finished event has been observed.
    app.start_training(ModelKind::MobileNet, 1, 4, None)?;
    let (report, _) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);

    Ok(())
}

#[test]
fn skipped_images_still_report_progress() -> anyhow::Result<()> {
    use wellscan::Progress;
    use wellscan::classifier::{InferBackend, WellNet, default_device};

    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("plates");
    build_workspace(&root)?;

    let mut app = App::open(&root, dir.path().join("settings.json"))?;
    app.workspace().reset_classes(&["empty".into(), "full".into()])?;
    app.choose_template(&DynamicImage::ImageLuma8(checkerboard(8)))?;
    app.start_extraction(Scope::All)?;

    let checkpoint = app.workspace().model_dir().join("MobileNet_1.mpk");
    WellNet::<InferBackend>::new(ModelKind::MobileNet, 2, &default_device())
        .save_checkpoint(&checkpoint)?;

    // Corrupting one image after extraction makes it unreadable mid-job.
    std::fs::write(root.join("b.png"), b"not an image")?;

    app.start_classification(Scope::All, &checkpoint)?;
    let (report, progress) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].image, "b.png");

    // Every image boundary reports, skipped ones included.
    let done: Vec<usize> = progress
        .iter()
        .map(|p| match p {
            Progress::Classification { done, .. } => *done,
            other => panic!("unexpected progress event {other:?}"),
        })
        .collect();
    assert_eq!(done, vec![1, 2]);

    Ok(())
}

#[test]
fn classification_requires_prior_extraction() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let root = dir.path().join("plates");
    build_workspace(&root)?;

    let mut app = App::open(&root, dir.path().join("settings.json"))?;
    app.workspace().reset_classes(&["empty".into(), "full".into()])?;

    // Build a tiny checkpoint without touching extraction.
    for name in ["a.png", "b.png"] {
        app.record_edits(name, &edits())?;
    }
    app.start_training(ModelKind::ResNet18, 1, 4, None)?;
    let (report, _) = app.wait_for_finish().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);
    let checkpoint = std::fs::read_dir(app.workspace().model_dir())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .next()
        .expect("checkpoint written");

    // No image has extraction results, so every classification scope is
    // empty and rejected up front.
    assert!(matches!(
        app.start_classification(Scope::All, &checkpoint),
        Err(Error::Configuration(_))
    ));

    app.select_image("a.png")?;
    assert!(matches!(
        app.start_classification(Scope::Current, &checkpoint),
        Err(Error::Configuration(_))
    ));

    Ok(())
}
