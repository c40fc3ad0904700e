//! Numeric codes understood by the native runtime.

/// Mirror-pad paddings are read as a fixed `[4, 2]` int32 block.
pub const MIRROR_PAD_SHAPE: [i64; 2] = [4, 2];
pub const MIRROR_PAD_BYTES: usize = 4 * 2 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    Conv2d = 1,
    DepthToSpace = 2,
    MirrorPad = 3,
    Maximum = 4,
    MathBinary = 5,
    MathUnary = 6,
    AvgPool = 7,
    Dense = 8,
}

impl OpCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        Some(match code {
            1 => OpCode::Conv2d,
            2 => OpCode::DepthToSpace,
            3 => OpCode::MirrorPad,
            4 => OpCode::Maximum,
            5 => OpCode::MathBinary,
            6 => OpCode::MathUnary,
            7 => OpCode::AvgPool,
            8 => OpCode::Dense,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Activation {
    Relu = 0,
    Tanh = 1,
    Sigmoid = 2,
    None = 3,
    LeakyRelu = 4,
}

impl Activation {
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "Relu" => Some(Activation::Relu),
            "Tanh" => Some(Activation::Tanh),
            "Sigmoid" => Some(Activation::Sigmoid),
            "LeakyRelu" => Some(Activation::LeakyRelu),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Padding {
    Valid = 0,
    Same = 1,
}

impl Padding {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "VALID" => Some(Padding::Valid),
            "SAME" => Some(Padding::Same),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MirrorPadMode {
    Constant = 0,
    Reflect = 1,
    Symmetric = 2,
}

impl MirrorPadMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "CONSTANT" => Some(MirrorPadMode::Constant),
            "REFLECT" => Some(MirrorPadMode::Reflect),
            "SYMMETRIC" => Some(MirrorPadMode::Symmetric),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MathBinaryOp {
    Sub = 0,
    Add = 1,
    Mul = 2,
    RealDiv = 3,
    Minimum = 4,
    FloorMod = 5,
}

impl MathBinaryOp {
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "Sub" => Some(MathBinaryOp::Sub),
            "Add" => Some(MathBinaryOp::Add),
            "Mul" => Some(MathBinaryOp::Mul),
            "RealDiv" => Some(MathBinaryOp::RealDiv),
            "Minimum" => Some(MathBinaryOp::Minimum),
            "FloorMod" => Some(MathBinaryOp::FloorMod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MathUnaryOp {
    Abs = 0,
    Sin = 1,
    Cos = 2,
    Tan = 3,
    Asin = 4,
    Acos = 5,
    Atan = 6,
    Sinh = 7,
    Cosh = 8,
    Tanh = 9,
    Asinh = 10,
    Acosh = 11,
    Atanh = 12,
    Ceil = 13,
    Floor = 14,
    Round = 15,
    Exp = 16,
}

impl MathUnaryOp {
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "Abs" => Some(MathUnaryOp::Abs),
            "Sin" => Some(MathUnaryOp::Sin),
            "Cos" => Some(MathUnaryOp::Cos),
            "Tan" => Some(MathUnaryOp::Tan),
            "Asin" => Some(MathUnaryOp::Asin),
            "Acos" => Some(MathUnaryOp::Acos),
            "Atan" => Some(MathUnaryOp::Atan),
            "Sinh" => Some(MathUnaryOp::Sinh),
            "Cosh" => Some(MathUnaryOp::Cosh),
            "Tanh" => Some(MathUnaryOp::Tanh),
            "Asinh" => Some(MathUnaryOp::Asinh),
            "Acosh" => Some(MathUnaryOp::Acosh),
            "Atanh" => Some(MathUnaryOp::Atanh),
            "Ceil" => Some(MathUnaryOp::Ceil),
            "Floor" => Some(MathUnaryOp::Floor),
            "Round" => Some(MathUnaryOp::Round),
            "Exp" => Some(MathUnaryOp::Exp),
            _ => None,
        }
    }
}
