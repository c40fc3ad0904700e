//! Error types for a whole conversion run

use crate::exporter::ExporterError;
use crate::loader::LoaderError;
use crate::optimizer::OptimizerError;
use crate::verifier::VerifierError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to load graph: {0}")]
    Loader(#[from] LoaderError),

    #[error("Canonicalization failed: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Export failed: {0}")]
    Exporter(#[from] ExporterError),

    #[error("Output verification failed: {0}")]
    Verifier(#[from] VerifierError),
}
