//! Converts TensorFlow `GraphDef` models into the native DNN model format:
//! a flat little-endian file of layer records and an operand table that a
//! small inference runtime can execute without any framework.

pub mod converter;
pub mod error;
pub mod exporter;
pub mod ir;
pub mod loader;
pub mod optimizer;
pub mod verifier;

#[cfg(test)]
mod testutil;

pub use converter::{Converter, ConverterOptions};
pub use error::{ConvertError, Result};
pub use exporter::native::{FormatVersion, NativeExporter};
pub use exporter::ExportSummary;
pub use ir::Graph;
pub use loader::{GraphLoader, TensorflowLoader};
pub use verifier::NativeModel;
