use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::info;

use crate::classifier::{ModelKind, using_fallback_device};
use crate::detection::{DEFAULT_MATCH_THRESHOLD, WellDetector};
use crate::error::{Error, Result};
use crate::evaluate::{Evaluation, evaluate};
use crate::models::{ImageStatus, Region, Stage, label_histogram};
use crate::settings::Settings;
use crate::status::{BoolSet, StatusFilter, StatusTracker};
use crate::store::RegionStore;
use crate::worker::classify::ClassifyJob;
use crate::worker::train::{TrainJob, TrainParams};
use crate::worker::{JobController, JobEvent, JobKind, JobReport, Progress, SkippedImage};
use crate::workspace::Workspace;

/// Which images a batch operation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The currently selected image only.
    Current,
    /// Images that have not completed the stage being started.
    Unprocessed,
    /// Every eligible image.
    All,
}

/// Result of a synchronous extraction pass.
#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    /// (image, wells found) per successfully processed image.
    pub processed: Vec<(String, usize)>,
    pub skipped: Vec<SkippedImage>,
}

/// Facade consumed by UI collaborators: workspace queries, template capture,
/// synchronous extraction and the mutually exclusive background jobs.
pub struct App {
    workspace: Workspace,
    store: RegionStore,
    tracker: StatusTracker,
    jobs: JobController,
    settings: Settings,
    settings_path: PathBuf,
    current_image: Option<String>,
}

impl App {
    pub fn open(root: impl Into<PathBuf>, settings_path: impl Into<PathBuf>) -> Result<Self> {
        let settings_path = settings_path.into();
        let mut settings = Settings::load(&settings_path)?;
        let workspace = Workspace::open(root)?;
        settings.last_workspace = Some(workspace.root().to_path_buf());
        settings.save(&settings_path)?;

        let store = RegionStore::new(workspace.clone());
        let tracker = StatusTracker::new(workspace.clone());
        let current_image = settings.last_image.clone();
        Ok(Self {
            workspace,
            store,
            tracker,
            jobs: JobController::new(),
            settings,
            settings_path,
            current_image,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Persist an operator-cropped raster as the workspace template.
    pub fn choose_template(&self, cropped: &DynamicImage) -> Result<()> {
        self.workspace.save_template(cropped)
    }

    /// Select the image that `Scope::Current` operations act on.
    pub fn select_image(&mut self, image: &str) -> Result<()> {
        self.current_image = Some(image.to_owned());
        self.settings.last_image = Some(image.to_owned());
        self.settings.save(&self.settings_path)
    }

    pub fn current_image(&self) -> Option<&str> {
        self.current_image.as_deref()
    }

    pub fn query_status(&self, image: &str) -> ImageStatus {
        self.tracker.status_of(image)
    }

    pub fn query_filtered_images(&self, filter: StatusFilter) -> Result<Vec<String>> {
        self.tracker.filter(filter)
    }

    /// Store operator-corrected regions as the image's Edit sidecar.
    pub fn record_edits(&self, image: &str, regions: &[Region]) -> Result<()> {
        self.store.write(image, Stage::Edit, regions)
    }

    /// Wells per class for one image, preferring edits over classifications
    /// over raw extractions.
    pub fn label_counts(&self, image: &str) -> Result<BTreeMap<i32, usize>> {
        for stage in [Stage::Edit, Stage::Classification, Stage::Extraction] {
            if self.store.exists(image, stage) {
                return Ok(label_histogram(&self.store.read(image, stage)?));
            }
        }
        Ok(BTreeMap::new())
    }

    /// True when batch jobs would run on the CPU fallback backend; callers
    /// should warn the operator before starting a long job.
    pub fn using_fallback_device(&self) -> bool {
        using_fallback_device()
    }

    /// Run the template detector over the scoped images on the calling
    /// thread, writing Extraction sidecars. Unreadable images are skipped
    /// and reported.
    pub fn start_extraction(&mut self, scope: Scope) -> Result<ExtractionSummary> {
        let detector = WellDetector::from_workspace(&self.workspace)?;
        let images = match scope {
            Scope::Current => vec![self.require_current()?],
            Scope::Unprocessed => self.tracker.filter(StatusFilter {
                extracted: BoolSet::only(false),
                classified: BoolSet::any(),
                edited: BoolSet::any(),
            })?,
            Scope::All => self.workspace.list_images()?,
        };
        if images.is_empty() {
            return Err(Error::Configuration("no images to extract".into()));
        }

        let mut summary = ExtractionSummary { processed: Vec::new(), skipped: Vec::new() };
        for image_name in images {
            let image = match self.workspace.load_image(&image_name) {
                Ok(image) => image,
                Err(e) => {
                    summary.skipped.push(SkippedImage {
                        image: image_name,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let regions = match detector.detect(&image, DEFAULT_MATCH_THRESHOLD) {
                Ok(regions) => regions,
                Err(e) => {
                    summary.skipped.push(SkippedImage {
                        image: image_name,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            self.store.write(&image_name, Stage::Extraction, &regions)?;
            info!("extracted {} wells from {image_name}", regions.len());
            summary.processed.push((image_name, regions.len()));
        }
        Ok(summary)
    }

    /// Start the background inference job over the scoped images.
    ///
    /// Validates synchronously (model present, class catalog non-empty,
    /// images in scope, no job running) before spawning; mid-run problems
    /// arrive in the Finished event instead.
    pub fn start_classification(&mut self, scope: Scope, model_path: &Path) -> Result<()> {
        if self.jobs.is_busy() {
            return Err(Error::Busy);
        }
        if !model_path.exists() {
            return Err(Error::Configuration(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }
        ModelKind::from_checkpoint_path(model_path)?;
        let num_classes = self.num_classes()?;

        let images = match scope {
            Scope::Current => {
                let current = self.require_current()?;
                if !self.store.exists(&current, Stage::Extraction) {
                    return Err(Error::Configuration(format!(
                        "{current} has no extraction results yet"
                    )));
                }
                vec![current]
            }
            Scope::Unprocessed => self.tracker.filter(StatusFilter {
                extracted: BoolSet::only(true),
                classified: BoolSet::only(false),
                edited: BoolSet::any(),
            })?,
            Scope::All => self.tracker.filter(StatusFilter {
                extracted: BoolSet::only(true),
                classified: BoolSet::any(),
                edited: BoolSet::any(),
            })?,
        };
        if images.is_empty() {
            return Err(Error::Configuration("no images to classify".into()));
        }

        self.settings.classification_model = Some(model_path.to_path_buf());
        self.settings.save(&self.settings_path)?;

        let job = ClassifyJob {
            workspace: self.workspace.clone(),
            model_path: model_path.to_path_buf(),
            images,
            num_classes,
        };
        self.jobs
            .spawn(JobKind::Classification, move |tx, cancel| job.run(tx, cancel))
    }

    /// Start the background training job over every edited image.
    ///
    /// When `prior_checkpoint` is given, the architecture is taken from its
    /// file name and `kind` is ignored.
    pub fn start_training(
        &mut self,
        kind: ModelKind,
        max_epochs: usize,
        batch_size: usize,
        prior_checkpoint: Option<PathBuf>,
    ) -> Result<()> {
        if self.jobs.is_busy() {
            return Err(Error::Busy);
        }
        let num_classes = self.num_classes()?;
        let kind = match &prior_checkpoint {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Configuration(format!(
                        "model file not found: {}",
                        path.display()
                    )));
                }
                ModelKind::from_checkpoint_path(path)?
            }
            None => kind,
        };

        let images = self.tracker.filter(StatusFilter {
            extracted: BoolSet::any(),
            classified: BoolSet::any(),
            edited: BoolSet::only(true),
        })?;
        if images.is_empty() {
            return Err(Error::Configuration(
                "no data to train on: no edited images".into(),
            ));
        }

        if let Some(path) = &prior_checkpoint {
            self.settings.train_model = Some(path.clone());
            self.settings.save(&self.settings_path)?;
        }

        let job = TrainJob {
            workspace: self.workspace.clone(),
            params: TrainParams { kind, max_epochs, batch_size, prior_checkpoint },
            images,
            num_classes,
        };
        self.jobs
            .spawn(JobKind::Training, move |tx, cancel| job.run(tx, cancel))
    }

    /// Request cooperative cancellation of the active job, if any.
    pub fn cancel_active_job(&self) {
        self.jobs.cancel();
    }

    pub fn active_job(&self) -> Option<JobKind> {
        self.jobs.active_kind()
    }

    /// Drain pending progress/finished events from the active job.
    pub fn poll_events(&mut self) -> Vec<JobEvent> {
        self.jobs.poll()
    }

    /// Block until the active job finishes. `None` when no job is active.
    pub fn wait_for_finish(&mut self) -> Option<(JobReport, Vec<Progress>)> {
        self.jobs.wait_for_finish()
    }

    /// Accuracy of stored classifications against stored edits.
    pub fn evaluate_accuracy(&self) -> Result<Evaluation> {
        let images = self.tracker.filter(StatusFilter {
            extracted: BoolSet::any(),
            classified: BoolSet::only(true),
            edited: BoolSet::only(true),
        })?;
        evaluate(&self.workspace, &images)
    }

    fn require_current(&self) -> Result<String> {
        self.current_image
            .clone()
            .ok_or_else(|| Error::Configuration("no image selected".into()))
    }

    fn num_classes(&self) -> Result<usize> {
        let classes = self.workspace.load_classes()?;
        if classes.is_empty() {
            return Err(Error::Configuration(
                "class catalog is empty; define class names first".into(),
            ));
        }
        Ok(classes.len())
    }
}
