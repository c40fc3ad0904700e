use std::path::Path;
use crate::ir::Graph;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed graph definition: {0}")]
    Malformed(#[from] prost::DecodeError),
}

pub trait GraphLoader {
    fn from_bytes(bytes: &[u8]) -> Result<Graph, LoaderError>;

    fn load<P: AsRef<Path>>(path: P) -> Result<Graph, LoaderError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

pub mod proto;
pub mod tensorflow;

pub use tensorflow::TensorflowLoader;
