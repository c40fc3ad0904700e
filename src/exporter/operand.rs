use crate::exporter::ExporterError;
use crate::exporter::writer::ByteWriter;
use crate::ir::{DataType, Graph, NodeName};
use std::collections::HashMap;
use tracing::warn;

pub const IOTYPE_INPUT: u32 = 1;
pub const IOTYPE_OUTPUT: u32 = 2;
pub const IOTYPE_INTERMEDIATE: u32 = IOTYPE_INPUT | IOTYPE_OUTPUT;

/// A named tensor value flowing between emitted layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub index: u32,
    pub name: NodeName,
    pub data_type: DataType,
    pub dims: [i32; 4],
    pub iotype: u32,
    pub used_count: u32,
}

impl Operand {
    fn write(&self, w: &mut ByteWriter) {
        let name = self.name.as_str().as_bytes();
        w.write_u32(self.index);
        w.write_u32(name.len() as u32);
        w.write_bytes(name);
        w.write_u32(self.iotype);
        w.write_u32(self.data_type.code() as u32);
        for &d in &self.dims {
            w.write_i32_as_u32(d);
        }
    }
}

/// Assigns indices to operands on first reference.
#[derive(Debug, Default)]
pub struct OperandRegistry {
    operands: Vec<Operand>,
    by_name: HashMap<NodeName, usize>,
}

impl OperandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `name`, creating the operand on first use.
    pub fn register(
        &mut self,
        graph: &Graph,
        name: &NodeName,
        iotype: u32,
    ) -> Result<u32, ExporterError> {
        let slot = match self.by_name.get(name) {
            Some(&slot) => slot,
            None => {
                let operand = Self::describe(graph, name, self.operands.len() as u32)?;
                self.operands.push(operand);
                self.by_name.insert(name.clone(), self.operands.len() - 1);
                self.operands.len() - 1
            }
        };

        let operand = &mut self.operands[slot];
        operand.iotype |= iotype;
        if iotype & IOTYPE_INPUT != 0 {
            operand.used_count += 1;
        }
        Ok(operand.index)
    }

    fn describe(graph: &Graph, name: &NodeName, index: u32) -> Result<Operand, ExporterError> {
        let node = graph
            .node(name.as_str())
            .ok_or_else(|| ExporterError::MissingOperand {
                node: name.clone(),
                missing: format!("a producer named {}", name),
            })?;

        let data_type = match node
            .type_attr("dtype")
            .filter(|t| *t != DataType::Invalid)
            .or_else(|| node.type_attr("T"))
        {
            Some(t) => t,
            None => {
                warn!("operand {} declares no dtype", name);
                DataType::Invalid
            }
        };

        let mut dims = [-1i32; 4];
        if let Some(shape) = node.shape_attr("shape") {
            if !shape.unknown_rank {
                for (slot, &d) in dims.iter_mut().zip(shape.dims.iter()) {
                    *slot = i32::try_from(d).map_err(|_| ExporterError::UnsupportedPattern {
                        node: name.clone(),
                        reason: format!("dimension {} does not fit the operand table", d),
                    })?;
                }
            }
        }

        Ok(Operand {
            index,
            name: name.clone(),
            data_type,
            dims,
            iotype: 0,
            used_count: 0,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Operand> {
        self.by_name.get(name).map(|&slot| &self.operands[slot])
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn write_table(&self, w: &mut ByteWriter) {
        for operand in &self.operands {
            operand.write(w);
        }
    }
}
