use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the wellscan core.
///
/// Configuration problems abort the requested operation before (or while) it
/// runs; per-image I/O problems are not represented here, workers skip the
/// image and accumulate it in the job report instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation cannot start or continue: missing template, missing
    /// model, empty training set, no images in scope, and similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A classification or training job is already running.
    #[error("a classification or training job is already running")]
    Busy,

    /// A sidecar record line failed to parse as `x,y,w,h,label`.
    #[error("malformed region record in {} (line {line}): {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// An image file could not be opened or decoded.
    #[error("failed to read image {}: {source}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// No image has both a classification and an edit sidecar, so accuracy
    /// has no denominator. Distinct from an accuracy of zero.
    #[error("no paired classification/edit records to evaluate")]
    AccuracyUndefined,

    /// Model (de)serialization or tensor plumbing failure.
    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
