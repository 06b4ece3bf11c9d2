use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use wellscan::{
    App, JobEvent, JobOutcome, ModelKind, Progress, Scope, StatusFilter, using_fallback_device,
};

#[derive(Parser)]
#[command(name = "wellscan")]
#[command(about = "Detect, classify and label microwells in microscopy images")]
struct Cli {
    /// Workspace root directory containing the images
    #[arg(short, long, value_name = "DIR")]
    workspace: PathBuf,

    /// Path of the persisted settings file
    #[arg(long, value_name = "FILE", default_value = "wellscan-settings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run template extraction over images
    Extract {
        /// Only images without extraction results
        #[arg(long, conflicts_with = "image")]
        unprocessed: bool,
        /// A single image by name
        #[arg(long, value_name = "NAME")]
        image: Option<String>,
    },
    /// Classify extracted wells with a trained model
    Classify {
        /// Model checkpoint path (file name encodes the architecture)
        #[arg(short, long, value_name = "FILE")]
        model: PathBuf,
        #[arg(long, conflicts_with = "image")]
        unprocessed: bool,
        #[arg(long, value_name = "NAME")]
        image: Option<String>,
    },
    /// Train a classifier on the edited ground truth
    Train {
        /// Architecture: MobileNet, ResNet18 or ResNet50
        #[arg(long, default_value = "MobileNet")]
        kind: String,
        #[arg(long, default_value_t = 1000)]
        epochs: usize,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        /// Resume from a prior checkpoint
        #[arg(long, value_name = "FILE")]
        resume: Option<PathBuf>,
    },
    /// Compare classifications against edits
    Evaluate,
    /// Show per-image pipeline status
    Status,
    /// Replace the class catalog
    Classes {
        /// Class names in label-index order
        names: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .context("bad log filter")?
        .start()?;
    let cli = Cli::parse();
    let mut app = App::open(&cli.workspace, &cli.settings)?;

    match cli.command {
        Command::Extract { unprocessed, image } => {
            let scope = select_scope(&mut app, unprocessed, image)?;
            let summary = app.start_extraction(scope)?;
            for (image, wells) in &summary.processed {
                println!("{image}: {wells} wells");
            }
            for skip in &summary.skipped {
                log::warn!("skipped {}: {}", skip.image, skip.reason);
            }
        }
        Command::Classify { model, unprocessed, image } => {
            let scope = select_scope(&mut app, unprocessed, image)?;
            if using_fallback_device() {
                log::warn!("no accelerator available, classification will run on the CPU");
            }
            app.start_classification(scope, &model)?;
            drain_job(&mut app)?;
        }
        Command::Train { kind, epochs, batch_size, resume } => {
            let kind = ModelKind::from_name(&kind)
                .with_context(|| format!("unknown model kind {kind:?}"))?;
            if using_fallback_device() {
                log::warn!("no accelerator available, training will run on the CPU");
            }
            app.start_training(kind, epochs, batch_size, resume)?;
            drain_job(&mut app)?;
        }
        Command::Evaluate => {
            let result = app.evaluate_accuracy()?;
            println!(
                "Accuracy: {:.2}% ({}/{} wells over {} images)",
                result.accuracy, result.correct, result.total, result.images
            );
        }
        Command::Status => {
            for image in app.query_filtered_images(StatusFilter::any())? {
                let status = app.query_status(&image);
                println!(
                    "{image}  extracted={} classified={} edited={}",
                    status.extracted, status.classified, status.edited
                );
            }
        }
        Command::Classes { names } => {
            if names.is_empty() {
                bail!("at least one class name is required");
            }
            app.workspace().reset_classes(&names)?;
            println!("class catalog: {}", names.join(", "));
        }
    }

    Ok(())
}

fn select_scope(app: &mut App, unprocessed: bool, image: Option<String>) -> anyhow::Result<Scope> {
    if let Some(image) = image {
        app.select_image(&image)?;
        Ok(Scope::Current)
    } else if unprocessed {
        Ok(Scope::Unprocessed)
    } else {
        Ok(Scope::All)
    }
}

/// Print progress from the active job until its Finished event arrives.
fn drain_job(app: &mut App) -> anyhow::Result<()> {
    loop {
        let mut finished = None;
        for event in app.poll_events() {
            match event {
                JobEvent::Progress(Progress::Classification { done, total }) => {
                    println!("classified {done}/{total} images");
                }
                JobEvent::Progress(Progress::Training { epoch, batch, loss }) => {
                    println!("epoch {epoch} batch {batch}: loss {loss:.4}");
                }
                JobEvent::Finished(report) => finished = Some(report),
            }
        }
        if let Some(report) = finished {
            for skip in &report.skipped {
                log::warn!("skipped {}: {}", skip.image, skip.reason);
            }
            return match report.outcome {
                JobOutcome::Completed => Ok(()),
                JobOutcome::Cancelled => {
                    println!("cancelled");
                    Ok(())
                }
                JobOutcome::Failed(reason) => bail!("job failed: {reason}"),
            };
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
