use std::path::PathBuf;
use std::sync::mpsc::Sender;

use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{ElementConversion, Int, Tensor};
use image::RgbImage;
use log::{info, warn};
use rand::seq::SliceRandom;
use time::OffsetDateTime;

use crate::classifier::augment::augment;
use crate::classifier::{ModelKind, TrainBackend, WellNet, batch_to_tensor, default_device, prepare_crop};
use crate::models::Stage;
use crate::store::RegionStore;
use crate::worker::{CancelToken, JobEvent, JobReport, Progress, SkippedImage, send_progress};
use crate::workspace::Workspace;

const LEARNING_RATE: f64 = 1e-3;
/// Progress events are emitted every this many batches, not every batch.
const PROGRESS_STRIDE: usize = 10;

/// Parameters of one training run.
pub struct TrainParams {
    pub kind: ModelKind,
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Resume from these weights instead of a fresh initialization. The
    /// architecture must match `kind` (callers derive `kind` from the file
    /// name when resuming).
    pub prior_checkpoint: Option<PathBuf>,
}

pub struct TrainJob {
    pub workspace: Workspace,
    pub params: TrainParams,
    /// Images whose Edit sidecars supply the ground-truth labels.
    pub images: Vec<String>,
    pub num_classes: usize,
}

impl TrainJob {
    /// Train on every edited region of the supplied images, checkpointing
    /// whenever the batch loss improves on the running best.
    ///
    /// Checkpoints are keyed by (model kind, run-start timestamp), so
    /// repeated runs never collide. Cancellation is honored at batch
    /// boundaries; the in-flight batch completes first.
    pub fn run(self, tx: &Sender<JobEvent>, cancel: &CancelToken) -> JobReport {
        if self.params.batch_size == 0 {
            return JobReport::failed("batch size must be at least 1");
        }
        let device = default_device();
        let kind = self.params.kind;

        let mut skipped = Vec::new();
        let dataset = match self.collect_dataset(&mut skipped) {
            Ok(dataset) => dataset,
            Err(report) => return *report,
        };
        if dataset.is_empty() {
            return JobReport::failed("no data to train on: no labeled edit regions found");
        }
        info!(
            "training {kind} on {} crops from {} images for up to {} epochs",
            dataset.len(),
            self.images.len(),
            self.params.max_epochs
        );

        let mut model = match &self.params.prior_checkpoint {
            Some(path) => {
                match WellNet::<TrainBackend>::load_checkpoint(kind, self.num_classes, path, &device)
                {
                    Ok(model) => model,
                    Err(e) => return JobReport::failed(e.to_string()),
                }
            }
            None => WellNet::new(kind, self.num_classes, &device),
        };

        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let checkpoint = self.workspace.checkpoint_path(kind.name(), timestamp);
        let loss_fn = CrossEntropyLossConfig::new().init(&device);
        let mut optim = AdamConfig::new().init();
        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        // Initialized so the first observed loss always checkpoints.
        let mut best_loss = f32::INFINITY;

        for epoch in 0..self.params.max_epochs {
            indices.shuffle(&mut rng);
            for (batch_index, chunk) in indices.chunks(self.params.batch_size).enumerate() {
                if cancel.is_cancelled() {
                    info!("training cancelled in epoch {epoch}");
                    return JobReport::cancelled(skipped);
                }

                let crops: Vec<RgbImage> = chunk
                    .iter()
                    .map(|&i| augment(&dataset[i].0, &mut rng))
                    .collect();
                let labels: Vec<i32> = chunk.iter().map(|&i| dataset[i].1).collect();

                let input = batch_to_tensor::<TrainBackend>(&crops, &device);
                let targets =
                    Tensor::<TrainBackend, 1, Int>::from_ints(labels.as_slice(), &device);
                let logits = model.forward(input);
                let loss = loss_fn.forward(logits, targets);
                let loss_value = loss.clone().into_scalar().elem::<f32>();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(LEARNING_RATE, model, grads);

                if loss_value < best_loss {
                    best_loss = loss_value;
                    if let Err(e) = model.save_checkpoint(&checkpoint) {
                        return JobReport::failed(e.to_string());
                    }
                }

                if batch_index % PROGRESS_STRIDE == 0 {
                    send_progress(
                        tx,
                        Progress::Training { epoch, batch: batch_index, loss: loss_value },
                    );
                }
            }
        }

        info!("training finished, best loss {best_loss}, checkpoint {}", checkpoint.display());
        JobReport::completed(skipped)
    }

    /// Gather (crop, label) pairs from the Edit sidecars. Unreadable images
    /// are skipped and accumulated; unlabeled or out-of-range rows are
    /// ignored.
    fn collect_dataset(
        &self,
        skipped: &mut Vec<SkippedImage>,
    ) -> Result<Vec<(RgbImage, i32)>, Box<JobReport>> {
        let store = RegionStore::new(self.workspace.clone());
        let mut dataset = Vec::new();
        for image_name in &self.images {
            let regions = match store.read(image_name, Stage::Edit) {
                Ok(regions) => regions,
                Err(e) => {
                    return Err(Box::new(JobReport::failed(format!(
                        "cannot train on {image_name}: {e}"
                    ))));
                }
            };
            let image = match self.workspace.load_image(image_name) {
                Ok(image) => image,
                Err(e) => {
                    warn!("skipping {image_name}: {e}");
                    skipped.push(SkippedImage {
                        image: image_name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for region in &regions {
                if region.label < 0 || region.label as usize >= self.num_classes {
                    continue;
                }
                if let Some(crop) = prepare_crop(&image, region) {
                    dataset.push((crop, region.label));
                }
            }
        }
        Ok(dataset)
    }
}
