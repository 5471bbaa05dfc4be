//! Run-fatal error taxonomy.
//!
//! Only conditions that abort a whole run before any batch starts live here;
//! per-file and per-batch failures are accumulated in batch outcomes instead
//! of being raised as errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("conversion engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("failed to enumerate input directory {path}: {source}")]
    InputScan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RunError>;
