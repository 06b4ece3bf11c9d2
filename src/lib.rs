pub mod app;
pub mod classifier;
pub mod detection;
pub mod error;
pub mod evaluate;
pub mod models;
pub mod settings;
pub mod status;
pub mod store;
pub mod worker;
pub mod workspace;

pub use app::{App, ExtractionSummary, Scope};
pub use classifier::{ModelKind, using_fallback_device};
pub use detection::{DEFAULT_MATCH_THRESHOLD, WellDetector};
pub use error::{Error, Result};
pub use evaluate::{Evaluation, evaluate};
pub use models::{ImageStatus, Region, RegionSet, Stage, UNCLASSIFIED, label_histogram};
pub use settings::Settings;
pub use status::{BoolSet, StatusFilter, StatusTracker};
pub use store::RegionStore;
pub use worker::{
    CancelToken, JobController, JobEvent, JobKind, JobOutcome, JobReport, Progress, SkippedImage,
};
pub use workspace::{WORKDIR, Workspace};
