//! Native model file writer.
//!
//! ```text
//! magic "FFMPEGDNNNATIVE"           15 bytes, no terminator
//! major, minor                      u32 each
//! layer records                     op code first, operand indices last
//! operand records                   ascending index
//! layer_count, operand_count        u32 each
//! ```
//!
//! Every integer is a little-endian u32 and every float an f32.

use crate::exporter::layers::LayerEmitter;
use crate::exporter::writer::ByteWriter;
use crate::exporter::{ExportSummary, ExporterError, ModelExporter};
use crate::ir::Graph;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

pub const MAGIC: &[u8; 15] = b"FFMPEGDNNNATIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self { major: 1, minor: 23 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeExporter {
    version: FormatVersion,
}

impl NativeExporter {
    pub fn new(version: FormatVersion) -> Self {
        Self { version }
    }

    /// Serializes a canonical graph into native-format bytes.
    pub fn to_bytes(&self, graph: &Graph) -> Result<(Vec<u8>, ExportSummary), ExporterError> {
        let mut w = ByteWriter::new();
        w.write_bytes(MAGIC);
        w.write_u32(self.version.major);
        w.write_u32(self.version.minor);

        let emitted = LayerEmitter::new(graph, w).emit_all()?;
        let mut w = emitted.writer;
        emitted.operands.write_table(&mut w);

        let operand_count = emitted.operands.len() as u32;
        w.write_u32(emitted.layer_count);
        w.write_u32(operand_count);

        let bytes = w.into_inner();
        let summary = ExportSummary {
            layers: emitted.layer_count,
            operands: operand_count,
            bytes: bytes.len(),
        };
        Ok((bytes, summary))
    }
}

impl ModelExporter for NativeExporter {
    fn export(&self, graph: &Graph, path: &Path) -> Result<ExportSummary, ExporterError> {
        let (bytes, summary) = self.to_bytes(graph)?;
        write_atomically(path, &bytes)?;
        info!(
            "wrote {} layers and {} operands ({} bytes) to {}",
            summary.layers,
            summary.operands,
            summary.bytes,
            path.display()
        );
        Ok(summary)
    }
}

/// Writes next to `path` and renames into place, so readers never see a partial file.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), ExporterError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
