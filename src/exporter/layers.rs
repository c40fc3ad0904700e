use crate::exporter::operand::{OperandRegistry, IOTYPE_INPUT, IOTYPE_OUTPUT};
use crate::exporter::ops::{
    Activation, MathBinaryOp, MathUnaryOp, MirrorPadMode, OpCode, Padding, MIRROR_PAD_BYTES,
    MIRROR_PAD_SHAPE,
};
use crate::exporter::writer::ByteWriter;
use crate::exporter::ExporterError;
use crate::ir::{
    transpose_hwio_to_ohwi, BlockKind, DataType, FusedScope, Graph, Node, NodeName, OP_CONST,
};
use crate::optimizer::fusion::{OP_CONV2D, OP_MATMUL};
use std::collections::HashSet;
use std::fmt::Display;
use tracing::debug;

/// Names of the nodes already folded into an emitted record.
#[derive(Debug, Default)]
pub struct ConvertedSet {
    names: HashSet<NodeName>,
}

impl ConvertedSet {
    pub fn mark(&mut self, name: &NodeName) -> bool {
        self.names.insert(name.clone())
    }

    pub fn contains(&self, name: &NodeName) -> bool {
        self.names.contains(name)
    }
}

/// Kernel weights already reordered to `[cout, h, w, cin]`.
struct Kernel {
    values: Vec<f32>,
    size: u32,
    in_channels: u32,
    out_channels: u32,
}

struct ConvParams {
    dilation: u32,
    padding: Padding,
    activation: Activation,
    kernel: Kernel,
    bias: Option<Vec<f32>>,
}

/// Everything the serializer needs once the emission pass is over.
pub struct EmittedLayers {
    pub writer: ByteWriter,
    pub operands: OperandRegistry,
    pub layer_count: u32,
    pub converted: ConvertedSet,
}

/// Walks a canonical graph once and writes one record per recognized pattern.
pub struct LayerEmitter<'g> {
    graph: &'g Graph,
    out: ByteWriter,
    operands: OperandRegistry,
    converted: ConvertedSet,
    layer_count: u32,
}

impl<'g> LayerEmitter<'g> {
    /// Records are appended to `out`, after whatever it already holds.
    pub fn new(graph: &'g Graph, out: ByteWriter) -> Self {
        Self {
            graph,
            out,
            operands: OperandRegistry::new(),
            converted: ConvertedSet::default(),
            layer_count: 0,
        }
    }

    pub fn emit_all(mut self) -> Result<EmittedLayers, ExporterError> {
        let graph = self.graph;
        for node in &graph.nodes {
            if self.converted.contains(&node.name) {
                continue;
            }

            if let Some(block) = graph.fused_scope_of(&node.name) {
                match (block.kind, node.op_type.as_str()) {
                    (BlockKind::Conv, OP_CONV2D) => self.emit_fused_conv(node, block)?,
                    (BlockKind::Dense, OP_MATMUL) => self.emit_dense(node, block)?,
                    _ => {}
                }
                continue;
            }

            let op = node.op_type.as_str();
            match op {
                OP_CONV2D => self.emit_conv(node)?,
                "DepthToSpace" => self.emit_depth_to_space(node)?,
                "MirrorPad" => self.emit_mirror_pad(node)?,
                "Maximum" => self.emit_maximum(node)?,
                "AvgPool" => self.emit_avg_pool(node)?,
                _ => {
                    if let Some(sub) = MathBinaryOp::from_op(op) {
                        self.emit_math_binary(node, sub)?;
                    } else if let Some(sub) = MathUnaryOp::from_op(op) {
                        self.emit_math_unary(node, sub)?;
                    }
                }
            }
        }

        Ok(EmittedLayers {
            writer: self.out,
            operands: self.operands,
            layer_count: self.layer_count,
            converted: self.converted,
        })
    }

    fn begin(&mut self, node: &Node, op: OpCode) {
        self.layer_count += 1;
        self.converted.mark(&node.name);
        debug!("layer {}: {:?} from {}", self.layer_count, op, node.name);
        self.out.write_u32(op as u32);
    }

    fn producer(&self, node: &Node, index: usize) -> Result<&'g Node, ExporterError> {
        let name = node.input(index)?;
        self.graph
            .node(name.as_str())
            .ok_or_else(|| ExporterError::MissingOperand {
                node: node.name.clone(),
                missing: name.to_string(),
            })
    }

    fn sibling(&self, anchor: &Node, block: &FusedScope, leaf: &str) -> Result<&'g Node, ExporterError> {
        let name = block.scope.child(leaf);
        self.graph
            .node(name.as_str())
            .ok_or_else(|| ExporterError::MissingOperand {
                node: anchor.name.clone(),
                missing: name.to_string(),
            })
    }

    fn unsupported(node: &Node, reason: impl Into<String>) -> ExporterError {
        ExporterError::UnsupportedPattern {
            node: node.name.clone(),
            reason: reason.into(),
        }
    }

    /// A record field, rejected when it does not fit in a u32.
    fn field<T>(node: &Node, what: &str, value: T) -> Result<u32, ExporterError>
    where
        T: TryInto<u32> + Display + Copy,
    {
        value
            .try_into()
            .map_err(|_| Self::unsupported(node, format!("{} {} out of range", what, value)))
    }

    /// Marks every node owned by `block`, plus the activation folded into it.
    fn mark_block(&mut self, block: &FusedScope, activation: Option<&Node>) {
        let graph = self.graph;
        for member in &graph.nodes {
            let in_block = graph
                .fused_scope_of(&member.name)
                .map_or(false, |b| b.scope == block.scope);
            if in_block {
                self.converted.mark(&member.name);
            }
        }
        if let Some(anode) = activation {
            self.converted.mark(&anode.name);
        }
    }

    /// The first consumer of `node`, when it is an activation the runtime can fold.
    fn folded_activation(&self, node: &Node) -> (Option<&'g Node>, Activation) {
        let graph = self.graph;
        match graph.first_consumer(node.name.as_str()) {
            Some(next) => match Activation::from_op(&next.op_type) {
                Some(activation) => (Some(next), activation),
                None => (None, Activation::None),
            },
            None => (None, Activation::None),
        }
    }

    fn block_input<'b>(node: &Node, block: &'b FusedScope) -> Result<&'b NodeName, ExporterError> {
        block.input.as_ref().ok_or_else(|| ExporterError::MissingOperand {
            node: node.name.clone(),
            missing: format!("an input from outside scope {}", block.scope),
        })
    }

    fn register_input(&mut self, name: &NodeName) -> Result<(), ExporterError> {
        let index = self.operands.register(self.graph, name, IOTYPE_INPUT)?;
        self.out.write_u32(index);
        Ok(())
    }

    fn register_output(&mut self, name: &NodeName) -> Result<(), ExporterError> {
        let index = self.operands.register(self.graph, name, IOTYPE_OUTPUT)?;
        self.out.write_u32(index);
        Ok(())
    }

    fn padding(node: &Node) -> Result<Padding, ExporterError> {
        let mode = node.string_attr("padding")?;
        Padding::parse(&mode).ok_or_else(|| Self::unsupported(node, format!("padding {}", mode)))
    }

    fn kernel(anchor: &Node, kernel: &Node) -> Result<Kernel, ExporterError> {
        let tensor = kernel.value()?;
        if tensor.shape.len() != 4 {
            return Err(Self::unsupported(
                anchor,
                format!("kernel shape {:?} is not [h, w, cin, cout]", tensor.shape),
            ));
        }
        let (height, width) = (tensor.dim(0)?, tensor.dim(1)?);
        let (in_channels, out_channels) = (tensor.dim(2)?, tensor.dim(3)?);
        if height != width {
            return Err(Self::unsupported(
                anchor,
                format!("non-square {}x{} kernel", height, width),
            ));
        }

        let values = tensor.to_f32_vec()?;
        Ok(Kernel {
            values: transpose_hwio_to_ohwi(&values, height, width, in_channels, out_channels),
            size: Self::field(anchor, "kernel size", height)?,
            in_channels: Self::field(anchor, "input channels", in_channels)?,
            out_channels: Self::field(anchor, "output channels", out_channels)?,
        })
    }

    fn write_conv(&mut self, params: &ConvParams) {
        let kernel = &params.kernel;
        self.out.write_u32(params.dilation);
        self.out.write_u32(params.padding as u32);
        self.out.write_u32(params.activation as u32);
        self.out.write_u32(kernel.in_channels);
        self.out.write_u32(kernel.out_channels);
        self.out.write_u32(kernel.size);
        self.out.write_u32(params.bias.is_some() as u32);
        self.out.write_f32_slice(&kernel.values);
        if let Some(bias) = &params.bias {
            self.out.write_f32_slice(bias);
        }
    }

    fn emit_fused_conv(&mut self, node: &'g Node, block: &'g FusedScope) -> Result<(), ExporterError> {
        let graph = self.graph;
        let knode = self.sibling(node, block, "kernel")?;
        let bnode = self.sibling(node, block, "bias")?;

        let dilation = match graph.node(block.scope.child("dilation_rate").as_str()) {
            Some(dnode) => Self::field(node, "dilation rate", dnode.value()?.first_i32()?)?,
            None => 1,
        };

        let bias_add = graph
            .first_consumer(bnode.name.as_str())
            .ok_or_else(|| ExporterError::MissingOperand {
                node: node.name.clone(),
                missing: format!("a consumer of {}", bnode.name),
            })?;
        let (activation_node, activation) = self.folded_activation(bias_add);

        let mut padding = Self::padding(node)?;
        // dilation expansion rewrites the padding of the inner conv
        if dilation > 1 {
            if let Some(stack) = graph.node(block.scope.child("stack").as_str()) {
                if stack.op_type == OP_CONST {
                    padding = Padding::Same;
                }
            }
        }

        let kernel = Self::kernel(node, knode)?;
        let bias = bnode.value()?.to_f32_vec()?;
        if bias.len() != kernel.out_channels as usize {
            return Err(Self::unsupported(
                node,
                format!("{} bias values for {} output channels", bias.len(), kernel.out_channels),
            ));
        }
        let input = Self::block_input(node, block)?;

        self.begin(node, OpCode::Conv2d);
        self.mark_block(block, activation_node);

        self.write_conv(&ConvParams {
            dilation,
            padding,
            activation,
            kernel,
            bias: Some(bias),
        });
        self.register_input(input)?;
        self.register_output(&activation_node.unwrap_or(bias_add).name)
    }

    fn emit_dense(&mut self, node: &'g Node, block: &'g FusedScope) -> Result<(), ExporterError> {
        let graph = self.graph;
        let knode = self.sibling(node, block, "kernel")?;
        let tensor = knode.value()?;
        if tensor.shape.len() != 2 {
            return Err(Self::unsupported(
                node,
                format!("dense kernel shape {:?} is not [cin, cout]", tensor.shape),
            ));
        }
        let (in_channels, out_channels) = (tensor.dim(0)?, tensor.dim(1)?);
        let kernel = transpose_hwio_to_ohwi(&tensor.to_f32_vec()?, 1, 1, in_channels, out_channels);

        let mut bias = None;
        let mut linear = node;
        if let Some(bnode) = graph.node(block.scope.child("bias").as_str()) {
            let values = bnode.value()?.to_f32_vec()?;
            if values.len() != out_channels {
                return Err(Self::unsupported(
                    node,
                    format!("{} bias values for {} output channels", values.len(), out_channels),
                ));
            }
            linear = graph
                .first_consumer(bnode.name.as_str())
                .ok_or_else(|| ExporterError::MissingOperand {
                    node: node.name.clone(),
                    missing: format!("a consumer of {}", bnode.name),
                })?;
            bias = Some(values);
        } else {
            // a higher-rank matmul is reshaped back by the consumer of the target shape
            let target = NodeName::new(format!("{}/Tensordot/concat_1", block.scope));
            if let Some(reshape) = graph.first_consumer(target.as_str()) {
                linear = reshape;
            }
        }
        let (activation_node, activation) = self.folded_activation(linear);
        let input = Self::block_input(node, block)?;
        let in_channels = Self::field(node, "input channels", in_channels)?;
        let out_channels = Self::field(node, "output channels", out_channels)?;

        self.begin(node, OpCode::Dense);
        self.mark_block(block, activation_node);
        self.out.write_u32(activation as u32);
        self.out.write_u32(in_channels);
        self.out.write_u32(out_channels);
        self.out.write_u32(bias.is_some() as u32);
        self.out.write_f32_slice(&kernel);
        if let Some(bias) = &bias {
            self.out.write_f32_slice(bias);
        }
        self.register_input(input)?;
        self.register_output(&activation_node.unwrap_or(linear).name)
    }

    fn emit_conv(&mut self, node: &'g Node) -> Result<(), ExporterError> {
        let first = self.producer(node, 0)?;
        let second = self.producer(node, 1)?;
        let (knode, input) = if first.is_const() {
            (first, node.input(1)?)
        } else if second.is_const() {
            (second, node.input(0)?)
        } else {
            return Err(Self::unsupported(node, "no constant kernel input"));
        };

        let padding = Self::padding(node)?;
        let kernel = Self::kernel(node, knode)?;

        self.begin(node, OpCode::Conv2d);
        self.converted.mark(&knode.name);
        self.write_conv(&ConvParams {
            dilation: 1,
            padding,
            activation: Activation::None,
            kernel,
            bias: None,
        });
        self.register_input(input)?;
        self.register_output(&node.name)
    }

    fn emit_depth_to_space(&mut self, node: &'g Node) -> Result<(), ExporterError> {
        let block_size = Self::field(node, "block size", node.int_attr("block_size")?)?;
        let input = node.input(0)?;

        self.begin(node, OpCode::DepthToSpace);
        self.out.write_u32(block_size);
        self.register_input(input)?;
        self.register_output(&node.name)
    }

    fn emit_mirror_pad(&mut self, node: &'g Node) -> Result<(), ExporterError> {
        let mode = node.string_attr("mode")?;
        let mode = MirrorPadMode::parse(&mode)
            .ok_or_else(|| Self::unsupported(node, format!("mirror pad mode {}", mode)))?;
        let input = node.input(0)?;
        let pnode = self.producer(node, 1)?;
        let tensor = pnode.value()?;
        if tensor.data_type != DataType::I32 || tensor.shape != MIRROR_PAD_SHAPE {
            return Err(Self::unsupported(
                node,
                format!(
                    "paddings {} are {:?} {:?}, expected int32 {:?}",
                    pnode.name, tensor.data_type, tensor.shape, MIRROR_PAD_SHAPE
                ),
            ));
        }
        let paddings = tensor.raw_bytes();
        if paddings.len() != MIRROR_PAD_BYTES {
            return Err(Self::unsupported(
                node,
                format!("paddings {} hold {} bytes", pnode.name, paddings.len()),
            ));
        }

        self.begin(node, OpCode::MirrorPad);
        self.converted.mark(&pnode.name);
        self.out.write_u32(mode as u32);
        self.out.write_bytes(&paddings);
        self.register_input(input)?;
        self.register_output(&node.name)
    }

    fn emit_maximum(&mut self, node: &'g Node) -> Result<(), ExporterError> {
        let input = node.input(0)?;
        let ynode = self.producer(node, 1)?;
        if !ynode.is_const() {
            return Err(Self::unsupported(node, "threshold is not a constant"));
        }
        let y = ynode.value()?.first_f32()?;

        self.begin(node, OpCode::Maximum);
        self.out.write_f32(y);
        self.register_input(input)?;
        self.register_output(&node.name)
    }

    fn emit_math_binary(&mut self, node: &'g Node, sub: MathBinaryOp) -> Result<(), ExporterError> {
        let lhs = self.producer(node, 0)?;
        let rhs = self.producer(node, 1)?;
        if lhs.is_const() && rhs.is_const() {
            return Err(Self::unsupported(node, "both operands are constant"));
        }
        let lhs_scalar = if lhs.is_const() { Some(lhs.value()?.first_f32()?) } else { None };
        let rhs_scalar = if rhs.is_const() { Some(rhs.value()?.first_f32()?) } else { None };

        self.begin(node, OpCode::MathBinary);
        self.out.write_u32(sub as u32);
        for (scalar, operand) in [(lhs_scalar, node.input(0)?), (rhs_scalar, node.input(1)?)] {
            match scalar {
                Some(value) => {
                    self.out.write_u32(1);
                    self.out.write_f32(value);
                }
                None => {
                    self.out.write_u32(0);
                    self.register_input(operand)?;
                }
            }
        }
        self.register_output(&node.name)
    }

    fn emit_math_unary(&mut self, node: &'g Node, sub: MathUnaryOp) -> Result<(), ExporterError> {
        let input = node.input(0)?;

        self.begin(node, OpCode::MathUnary);
        self.out.write_u32(sub as u32);
        self.register_input(input)?;
        self.register_output(&node.name)
    }

    fn emit_avg_pool(&mut self, node: &'g Node) -> Result<(), ExporterError> {
        let strides = node.int_list_attr("strides")?;
        let ksize = node.int_list_attr("ksize")?;
        let stride = match strides {
            [1, h, w, 1] if h == w => Self::field(node, "pooling stride", *h)?,
            _ => return Err(Self::unsupported(node, format!("pooling strides {:?}", strides))),
        };
        let kernel_size = match ksize {
            [1, h, w, 1] if h == w => Self::field(node, "pooling window", *h)?,
            _ => return Err(Self::unsupported(node, format!("pooling window {:?}", ksize))),
        };
        let padding = Self::padding(node)?;
        let input = node.input(0)?;

        self.begin(node, OpCode::AvgPool);
        self.out.write_u32(stride);
        self.out.write_u32(padding as u32);
        self.out.write_u32(kernel_size);
        self.register_input(input)?;
        self.register_output(&node.name)
    }
}
