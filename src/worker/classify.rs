use std::path::PathBuf;
use std::sync::mpsc::Sender;

use log::{info, warn};

use crate::classifier::{
    InferBackend, ModelKind, WellNet, batch_to_tensor, default_device, predicted_labels,
    prepare_crop,
};
use crate::models::Stage;
use crate::store::RegionStore;
use crate::worker::{CancelToken, JobEvent, JobReport, Progress, SkippedImage, send_progress};
use crate::workspace::Workspace;

/// Parameters of one classification run, fixed at spawn time.
pub struct ClassifyJob {
    pub workspace: Workspace,
    pub model_path: PathBuf,
    pub images: Vec<String>,
    pub num_classes: usize,
}

impl ClassifyJob {
    /// Run inference over the batch, writing one Classification sidecar per
    /// image and reporting `(done, total)` after each, skipped images
    /// included.
    ///
    /// Cancellation is honored at image boundaries: an in-flight forward
    /// pass completes, the next image is skipped. Unreadable images are
    /// skipped and accumulated; a missing extraction sidecar fails the run,
    /// since inference without prior extraction is a configuration error.
    pub fn run(self, tx: &Sender<JobEvent>, cancel: &CancelToken) -> JobReport {
        let device = default_device();
        let kind = match ModelKind::from_checkpoint_path(&self.model_path) {
            Ok(kind) => kind,
            Err(e) => return JobReport::failed(e.to_string()),
        };
        let net = match WellNet::<InferBackend>::load_checkpoint(
            kind,
            self.num_classes,
            &self.model_path,
            &device,
        ) {
            Ok(net) => net,
            Err(e) => return JobReport::failed(e.to_string()),
        };
        info!(
            "classifying {} images with {kind} checkpoint {}",
            self.images.len(),
            self.model_path.display()
        );

        let store = RegionStore::new(self.workspace.clone());
        let total = self.images.len();
        let mut skipped = Vec::new();
        let progress = |done: usize| send_progress(tx, Progress::Classification { done, total });

        for (index, image_name) in self.images.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("classification cancelled after {index}/{total} images");
                return JobReport::cancelled(skipped);
            }

            let regions = match store.read(image_name, Stage::Extraction) {
                Ok(regions) => regions,
                Err(e) => {
                    return JobReport::failed(format!(
                        "cannot classify {image_name}: {e}"
                    ));
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
                    progress(index + 1);
                    continue;
                }
            };

            let mut crops = Vec::with_capacity(regions.len());
            let mut kept = Vec::with_capacity(regions.len());
            for region in &regions {
                if let Some(crop) = prepare_crop(&image, region) {
                    crops.push(crop);
                    kept.push(*region);
                }
            }

            // One forward pass for all of an image's crops; rectangles are
            // preserved, the label column is overwritten with predictions.
            let mut classified = Vec::with_capacity(kept.len());
            if !crops.is_empty() {
                let logits = net.forward(batch_to_tensor(&crops, &device));
                let labels = match predicted_labels(logits) {
                    Ok(labels) => labels,
                    Err(e) => return JobReport::failed(e.to_string()),
                };
                classified = kept
                    .into_iter()
                    .zip(labels)
                    .map(|(region, label)| region.with_label(label))
                    .collect();
            }

            if let Err(e) = store.write(image_name, Stage::Classification, &classified) {
                warn!("skipping {image_name}: {e}");
                skipped.push(SkippedImage {
                    image: image_name.clone(),
                    reason: e.to_string(),
                });
            }

            progress(index + 1);
        }

        JobReport::completed(skipped)
    }
}
