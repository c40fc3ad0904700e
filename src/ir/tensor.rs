use crate::ir::IrError;

/// Element type, numbered the way the source graph format numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Invalid,
    F32,
    F64,
    I32,
    U8,
    I64,
    Other(i32),
}

impl DataType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DataType::Invalid,
            1 => DataType::F32,
            2 => DataType::F64,
            3 => DataType::I32,
            4 => DataType::U8,
            9 => DataType::I64,
            other => DataType::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DataType::Invalid => 0,
            DataType::F32 => 1,
            DataType::F64 => 2,
            DataType::I32 => 3,
            DataType::U8 => 4,
            DataType::I64 => 9,
            DataType::Other(code) => code,
        }
    }
}

/// A constant tensor embedded in a node attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data_type: DataType,
    /// Declared dimensions; `-1` marks an unknown size.
    pub shape: Vec<i64>,
    /// Row-major raw bytes. Empty when the values are carried as literals.
    pub content: Vec<u8>,
    pub float_val: Vec<f32>,
    pub int_val: Vec<i32>,
}

impl Tensor {
    pub fn from_f32(shape: Vec<i64>, values: &[f32]) -> Self {
        Self {
            data_type: DataType::F32,
            shape,
            content: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            float_val: Vec::new(),
            int_val: Vec::new(),
        }
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self {
            data_type: DataType::F32,
            shape: Vec::new(),
            content: Vec::new(),
            float_val: vec![value],
            int_val: Vec::new(),
        }
    }

    /// Size of dimension `axis`, or an error if it is absent or unknown.
    pub fn dim(&self, axis: usize) -> Result<usize, IrError> {
        match self.shape.get(axis) {
            Some(&d) if d >= 0 => Ok(d as usize),
            _ => Err(IrError::InvalidTensor(format!(
                "dimension {} of shape {:?} is not known",
                axis, self.shape
            ))),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Values as f32, broadcasting a single literal over the whole shape.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, IrError> {
        let numel = self.numel();
        if !self.content.is_empty() {
            if self.content.len() != numel * 4 {
                return Err(IrError::InvalidTensor(format!(
                    "expected {} bytes for shape {:?}, found {}",
                    numel * 4,
                    self.shape,
                    self.content.len()
                )));
            }
            return Ok(self
                .content
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect());
        }
        match self.float_val.len() {
            n if n == numel => Ok(self.float_val.clone()),
            1 => Ok(vec![self.float_val[0]; numel]),
            n => Err(IrError::InvalidTensor(format!(
                "{} float values cannot fill shape {:?}",
                n, self.shape
            ))),
        }
    }

    /// The first element as f32.
    pub fn first_f32(&self) -> Result<f32, IrError> {
        if let Some(&v) = self.float_val.first() {
            return Ok(v);
        }
        match self.content.get(..4) {
            Some(b) => Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            None => Err(IrError::InvalidTensor("tensor holds no float value".to_string())),
        }
    }

    /// The first element as a 32-bit integer read from the raw bytes.
    pub fn first_i32(&self) -> Result<i32, IrError> {
        match self.content.get(..4) {
            Some(b) => Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            None => self
                .int_val
                .first()
                .copied()
                .ok_or_else(|| IrError::InvalidTensor("tensor holds no integer value".to_string())),
        }
    }

    /// Raw bytes, re-encoding literal int32 values when no raw buffer exists.
    pub fn raw_bytes(&self) -> Vec<u8> {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        if !self.int_val.is_empty() {
            return self.int_val.iter().flat_map(|v| v.to_le_bytes()).collect();
        }
        self.float_val.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Reorders an `[h, w, cin, cout]` kernel into `[cout, h, w, cin]`.
pub fn transpose_hwio_to_ohwi(
    values: &[f32],
    height: usize,
    width: usize,
    in_channels: usize,
    out_channels: usize,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len());
    for o in 0..out_channels {
        for y in 0..height {
            for x in 0..width {
                for i in 0..in_channels {
                    let src = ((y * width + x) * in_channels + i) * out_channels + o;
                    out.push(values[src]);
                }
            }
        }
    }
    out
}
