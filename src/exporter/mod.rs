pub mod layers;
pub mod native;
pub mod operand;
pub mod ops;
pub mod writer;

use crate::ir::{Graph, IrError, NodeName};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("{node} requires {missing}, which is not in the graph")]
    MissingOperand { node: NodeName, missing: String },
    #[error("Unsupported pattern at {node}: {reason}")]
    UnsupportedPattern { node: NodeName, reason: String },
    #[error(transparent)]
    Attribute(#[from] IrError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait ModelExporter {
    fn export(&self, graph: &Graph, path: &std::path::Path) -> Result<ExportSummary, ExporterError>;
}

/// Counts reported after a successful export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub layers: u32,
    pub operands: u32,
    pub bytes: usize,
}
