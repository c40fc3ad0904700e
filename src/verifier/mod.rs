//! Reader for native model files, used to check what the exporter produced.

use crate::exporter::native::{FormatVersion, MAGIC};
use crate::exporter::ops::{OpCode, MIRROR_PAD_BYTES};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum VerifierError {
    #[error("truncated file: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("weight count of the record at offset {offset} overflows")]
    Overflow { offset: usize },
    #[error("bad magic")]
    BadMagic,
    #[error("unknown op code {code} at offset {offset}")]
    UnknownOpCode { code: u32, offset: usize },
    #[error("{what}: trailer says {declared}, file holds {found}")]
    CountMismatch {
        what: &'static str,
        declared: u32,
        found: u32,
    },
    #[error("{0} unexpected bytes after the trailer")]
    TrailingBytes(usize),
    #[error("layer {layer} references operand {index}, which is not in the operand table")]
    DanglingOperand { layer: usize, index: u32 },
    #[error("invalid operand name: {0}")]
    InvalidName(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub op: OpCode,
    /// Scalar parameters in file order, excluding weights and operand indices.
    pub params: Vec<u32>,
    pub weights: Vec<f32>,
    /// Operand indices referenced by the record, inputs before the output.
    pub operands: Vec<u32>,
    /// Literal scalars of broadcast math operands and maximum thresholds.
    pub scalars: Vec<f32>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperandRecord {
    pub index: u32,
    pub name: String,
    pub iotype: u32,
    pub dtype: u32,
    pub dims: [i32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeModel {
    pub version: FormatVersion,
    pub layers: Vec<LayerRecord>,
    pub operands: Vec<OperandRecord>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], VerifierError> {
        if self.data.len() - self.pos < n {
            return Err(VerifierError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, VerifierError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, VerifierError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_f32_vec(&mut self, n: usize) -> Result<Vec<f32>, VerifierError> {
        let len = n
            .checked_mul(4)
            .ok_or(VerifierError::Overflow { offset: self.pos })?;
        Ok(self
            .read_bytes(len)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

/// Product of record fields sizing a weight block.
fn weight_count(offset: usize, factors: &[u32]) -> Result<usize, VerifierError> {
    factors
        .iter()
        .try_fold(1usize, |acc, &f| acc.checked_mul(f as usize))
        .ok_or(VerifierError::Overflow { offset })
}

impl NativeModel {
    /// Parses a whole file. The layer count comes from the trailer, so the
    /// operand table starts where the declared number of records ends.
    pub fn parse(data: &[u8]) -> Result<Self, VerifierError> {
        let mut r = Reader { data, pos: 0 };
        if r.read_bytes(MAGIC.len())? != MAGIC {
            return Err(VerifierError::BadMagic);
        }
        let version = FormatVersion {
            major: r.read_u32()?,
            minor: r.read_u32()?,
        };

        if data.len() < r.pos + 8 {
            return Err(VerifierError::Truncated {
                offset: r.pos,
                needed: 8,
            });
        }
        let mut trailer = Reader {
            data,
            pos: data.len() - 8,
        };
        let layer_count = trailer.read_u32()?;
        let operand_count = trailer.read_u32()?;
        let body_end = data.len() - 8;

        let mut layers = Vec::new();
        for _ in 0..layer_count {
            layers.push(Self::read_layer(&mut r)?);
        }

        let mut operands = Vec::new();
        while r.pos < body_end && operands.len() < operand_count as usize {
            operands.push(Self::read_operand(&mut r)?);
        }
        if r.pos > body_end {
            return Err(VerifierError::Truncated {
                offset: body_end,
                needed: r.pos - body_end,
            });
        }
        if operands.len() != operand_count as usize {
            return Err(VerifierError::CountMismatch {
                what: "operands",
                declared: operand_count,
                found: operands.len() as u32,
            });
        }
        if r.pos != body_end {
            return Err(VerifierError::TrailingBytes(body_end - r.pos));
        }

        Ok(Self {
            version,
            layers,
            operands,
        })
    }

    fn read_layer(r: &mut Reader<'_>) -> Result<LayerRecord, VerifierError> {
        let offset = r.pos;
        let code = r.read_u32()?;
        let op = OpCode::from_u32(code).ok_or(VerifierError::UnknownOpCode { code, offset })?;
        let mut record = LayerRecord {
            op,
            params: Vec::new(),
            weights: Vec::new(),
            operands: Vec::new(),
            scalars: Vec::new(),
            raw: Vec::new(),
        };

        match op {
            OpCode::Conv2d => {
                for _ in 0..7 {
                    record.params.push(r.read_u32()?);
                }
                let (cin, cout, size, has_bias) = (
                    record.params[3],
                    record.params[4],
                    record.params[5],
                    record.params[6],
                );
                record.weights = r.read_f32_vec(weight_count(offset, &[cout, size, size, cin])?)?;
                if has_bias == 1 {
                    record.weights.extend(r.read_f32_vec(cout as usize)?);
                }
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::Dense => {
                for _ in 0..4 {
                    record.params.push(r.read_u32()?);
                }
                let (cin, cout, has_bias) = (record.params[1], record.params[2], record.params[3]);
                record.weights = r.read_f32_vec(weight_count(offset, &[cout, cin])?)?;
                if has_bias == 1 {
                    record.weights.extend(r.read_f32_vec(cout as usize)?);
                }
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::DepthToSpace => {
                record.params.push(r.read_u32()?);
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::MirrorPad => {
                record.params.push(r.read_u32()?);
                record.raw = r.read_bytes(MIRROR_PAD_BYTES)?.to_vec();
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::Maximum => {
                record.scalars.push(r.read_f32()?);
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::MathBinary => {
                record.params.push(r.read_u32()?);
                for _ in 0..2 {
                    let broadcast = r.read_u32()?;
                    record.params.push(broadcast);
                    if broadcast == 1 {
                        record.scalars.push(r.read_f32()?);
                    } else {
                        record.operands.push(r.read_u32()?);
                    }
                }
                record.operands.push(r.read_u32()?);
            }
            OpCode::MathUnary => {
                record.params.push(r.read_u32()?);
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
            OpCode::AvgPool => {
                for _ in 0..3 {
                    record.params.push(r.read_u32()?);
                }
                record.operands = vec![r.read_u32()?, r.read_u32()?];
            }
        }
        Ok(record)
    }

    fn read_operand(r: &mut Reader<'_>) -> Result<OperandRecord, VerifierError> {
        let index = r.read_u32()?;
        let name_len = r.read_u32()? as usize;
        let name = String::from_utf8(r.read_bytes(name_len)?.to_vec())?;
        let iotype = r.read_u32()?;
        let dtype = r.read_u32()?;
        let mut dims = [0i32; 4];
        for d in &mut dims {
            *d = r.read_u32()? as i32;
        }
        Ok(OperandRecord {
            index,
            name,
            iotype,
            dtype,
            dims,
        })
    }

    pub fn operand(&self, index: u32) -> Option<&OperandRecord> {
        self.operands.iter().find(|o| o.index == index)
    }

    /// Every index used by a layer must name an entry of the operand table.
    pub fn check_operand_references(&self) -> Result<(), VerifierError> {
        let known: HashSet<u32> = self.operands.iter().map(|o| o.index).collect();
        for (layer, record) in self.layers.iter().enumerate() {
            for &index in &record.operands {
                if !known.contains(&index) {
                    return Err(VerifierError::DanglingOperand { layer, index });
                }
            }
        }
        Ok(())
    }
}
