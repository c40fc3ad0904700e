//! One-shot GraphDef to native model conversion.
//!
//! ```text
//! GraphDef bytes
//!     ↓  TensorflowLoader        decode into a Graph
//!     ↓  Optimizer::canonical    outputs, identity elision, edges, fused scopes
//!     ↓  NativeExporter          layer records, operand table, trailer
//!     ↓  NativeModel (optional)  parse the result back and check operand indices
//! native model bytes
//! ```
//!
//! ```no_run
//! use tfnative::Converter;
//!
//! let summary = Converter::new().convert_file("model.pb", "model.model")?;
//! println!("{} layers", summary.layers);
//! # Ok::<(), tfnative::ConvertError>(())
//! ```

use crate::error::Result;
use crate::exporter::native::{write_atomically, FormatVersion, NativeExporter};
use crate::exporter::ExportSummary;
use crate::ir::Graph;
use crate::loader::{GraphLoader, TensorflowLoader};
use crate::optimizer::Optimizer;
use crate::verifier::NativeModel;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ConverterOptions {
    /// Version written into the file header.
    pub version: FormatVersion,
    /// Parse the produced bytes back before handing them out.
    pub verify: bool,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            version: FormatVersion::default(),
            verify: true,
        }
    }
}

impl ConverterOptions {
    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = FormatVersion { major, minor };
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConverterOptions,
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConverterOptions) -> Self {
        Self { options }
    }

    /// Decodes and canonicalizes a GraphDef without emitting anything.
    pub fn canonicalize(&self, input: &[u8]) -> Result<Graph> {
        let mut graph = TensorflowLoader::from_bytes(input)?;
        Optimizer::canonical().optimize(&mut graph)?;
        Ok(graph)
    }

    pub fn convert_bytes(&self, input: &[u8]) -> Result<Vec<u8>> {
        let graph = self.canonicalize(input)?;
        let (bytes, _) = self.emit(&graph)?;
        Ok(bytes)
    }

    /// Converts `input` into `output`. Nothing is written unless the whole run succeeds.
    pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<ExportSummary> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let mut graph = TensorflowLoader::load(input)?;
        Optimizer::canonical().optimize(&mut graph)?;

        let (bytes, summary) = self.emit(&graph)?;
        write_atomically(output, &bytes)?;
        info!(
            "converted {} into {} ({} layers, {} operands)",
            input.display(),
            output.display(),
            summary.layers,
            summary.operands
        );
        Ok(summary)
    }

    fn emit(&self, graph: &Graph) -> Result<(Vec<u8>, ExportSummary)> {
        let (bytes, summary) = NativeExporter::new(self.options.version).to_bytes(graph)?;
        if self.options.verify {
            let model = NativeModel::parse(&bytes)?;
            model.check_operand_references()?;
            debug!("verified {} layer records", model.layers.len());
        }
        Ok((bytes, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::exporter::layers::LayerEmitter;
    use crate::exporter::operand::{IOTYPE_INPUT, IOTYPE_INTERMEDIATE, IOTYPE_OUTPUT};
    use crate::exporter::ops::OpCode;
    use crate::exporter::writer::ByteWriter;
    use crate::exporter::ExporterError;
    use crate::ir::NodeName;
    use crate::loader::proto::attr_value::{ListValue, Value};
    use crate::loader::proto::NodeDef;
    use crate::loader::LoaderError;
    use crate::testutil::*;
    use tempfile::tempdir;

    const HEADER_LEN: usize = 15 + 8;

    fn convert(nodes: Vec<NodeDef>) -> (Vec<u8>, NativeModel) {
        let bytes = Converter::new().convert_bytes(&encode(nodes)).unwrap();
        let model = NativeModel::parse(&bytes).unwrap();
        model.check_operand_references().unwrap();
        (bytes, model)
    }

    fn scoped_block(with_relu: bool) -> Vec<NodeDef> {
        let mut nodes = vec![
            placeholder("x", &[1, 4, 4, 2]),
            const_f32("block/kernel", &[1, 1, 2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            const_f32("block/bias", &[3], &[0.1, 0.2, 0.3]),
            padded(float_op("block/Conv2D", "Conv2D", &["x", "block/kernel"]), "SAME"),
            float_op("block/BiasAdd", "BiasAdd", &["block/Conv2D", "block/bias"]),
        ];
        if with_relu {
            nodes.push(float_op("block/Relu", "Relu", &["block/BiasAdd"]));
        }
        nodes
    }

    #[test]
    fn test_no_recognized_ops_yields_empty_model() {
        let (bytes, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            float_op("y", "Softmax", &["x"]),
        ]);

        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(u32s(&bytes[HEADER_LEN..]), vec![0, 0]);
        assert!(model.layers.is_empty());
    }

    #[test]
    fn test_empty_input_is_a_valid_empty_graph() {
        let bytes = Converter::new().convert_bytes(&[]).unwrap();
        assert_eq!(&bytes[..15], b"FFMPEGDNNNATIVE");
        assert_eq!(u32s(&bytes[15..]), vec![1, 23, 0, 0]);
    }

    #[test]
    fn test_malformed_input() {
        let result = Converter::new().convert_bytes(&[0x0a, 0x05, 0x01]);
        assert!(matches!(result, Err(ConvertError::Loader(LoaderError::Malformed(_)))));
    }

    #[test]
    fn test_standalone_conv() {
        let (bytes, model) = convert(vec![
            placeholder("x", &[1, -1, -1, 1]),
            const_f32("k", &[1, 1, 1, 1], &[0.5]),
            padded(float_op("conv", "Conv2D", &["x", "k"]), "VALID"),
        ]);

        let words = u32s(&bytes[HEADER_LEN..HEADER_LEN + 44]);
        assert_eq!(words[..8], [1, 1, 0, 3, 1, 1, 1, 0]);
        assert_eq!(f32::from_bits(words[8]), 0.5);
        assert_eq!(words[9..], [0, 1]);

        assert_eq!(model.layers.len(), 1);
        assert_eq!(model.operands.len(), 2);
        let input = model.operand(0).unwrap();
        assert_eq!(input.name, "x");
        assert_eq!(input.iotype, IOTYPE_INPUT);
        assert_eq!(input.dims, [1, -1, -1, 1]);
        let output = model.operand(1).unwrap();
        assert_eq!(output.name, "conv");
        assert_eq!(output.iotype, IOTYPE_OUTPUT);
        assert_eq!(output.dtype, 1);
    }

    #[test]
    fn test_standalone_conv_with_kernel_first() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 3, 3, 1]),
            const_f32("k", &[1, 1, 1, 1], &[2.0]),
            padded(float_op("conv", "Conv2D", &["k", "x"]), "SAME"),
        ]);

        let record = &model.layers[0];
        assert_eq!(record.params[1], 1);
        assert_eq!(record.weights, vec![2.0]);
        assert_eq!(model.operand(record.operands[0]).unwrap().name, "x");
    }

    #[test]
    fn test_scoped_conv_block_is_one_fused_layer() {
        let (_, model) = convert(scoped_block(true));

        assert_eq!(model.layers.len(), 1);
        let record = &model.layers[0];
        assert_eq!(record.op, OpCode::Conv2d);
        assert_eq!(record.params, vec![1, 1, 0, 2, 3, 1, 1]);
        assert_eq!(
            record.weights,
            vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0, 0.1, 0.2, 0.3]
        );
        assert_eq!(model.operand(record.operands[0]).unwrap().name, "x");
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "block/Relu");
        assert_eq!(model.operands.len(), 2);
    }

    #[test]
    fn test_scoped_conv_block_marks_members_converted() {
        let graph = Converter::new().canonicalize(&encode(scoped_block(true))).unwrap();
        let emitted = LayerEmitter::new(&graph, ByteWriter::new()).emit_all().unwrap();

        assert_eq!(emitted.layer_count, 1);
        for name in ["block/kernel", "block/bias", "block/Conv2D", "block/BiasAdd", "block/Relu"] {
            assert!(emitted.converted.contains(&NodeName::from(name)), "{} not converted", name);
        }
        assert!(!emitted.converted.contains(&NodeName::from("x")));
    }

    #[test]
    fn test_scoped_conv_without_activation_outputs_bias_add() {
        let (_, model) = convert(scoped_block(false));

        let record = &model.layers[0];
        assert_eq!(record.params[2], 3);
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "block/BiasAdd");
    }

    #[test]
    fn test_output_identity_renames_activation() {
        let mut nodes = scoped_block(true);
        nodes.push(float_op("output", "Identity", &["block/Relu"]));
        let (_, model) = convert(nodes);

        let record = &model.layers[0];
        assert_eq!(record.params[2], 0);
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "output");
    }

    #[test]
    fn test_dilated_conv_forces_same_padding() {
        let kernel: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let (_, model) = convert(vec![
            placeholder("x", &[1, 8, 8, 1]),
            const_f32("d/kernel", &[3, 3, 1, 1], &kernel),
            const_f32("d/bias", &[1], &[0.25]),
            const_i32("d/dilation_rate", &[2], &[2, 2]),
            const_i32("d/stack", &[2, 2], &[0, 0, 0, 0]),
            node("d/Shape", "Shape", &["x"]),
            node("d/SpaceToBatchND", "SpaceToBatchND", &["x", "d/dilation_rate", "d/stack"]),
            padded(float_op("d/Conv2D", "Conv2D", &["d/SpaceToBatchND", "d/kernel"]), "VALID"),
            node("d/BatchToSpaceND", "BatchToSpaceND", &["d/Conv2D", "d/dilation_rate", "d/stack"]),
            float_op("d/BiasAdd", "BiasAdd", &["d/BatchToSpaceND", "d/bias"]),
        ]);

        assert_eq!(model.layers.len(), 1);
        let record = &model.layers[0];
        assert_eq!(record.params, vec![2, 1, 3, 1, 1, 3, 1]);
        assert_eq!(record.weights.len(), 10);
        assert_eq!(model.operand(record.operands[0]).unwrap().name, "x");
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "d/BiasAdd");
    }

    #[test]
    fn test_missing_bias_names_the_sibling() {
        let nodes = vec![
            placeholder("x", &[1, 4, 4, 2]),
            const_f32("block/kernel", &[1, 1, 2, 3], &[0.0; 6]),
            padded(float_op("block/Conv2D", "Conv2D", &["x", "block/kernel"]), "SAME"),
        ];
        let result = Converter::new().convert_bytes(&encode(nodes));

        match result {
            Err(ConvertError::Exporter(ExporterError::MissingOperand { missing, .. })) => {
                assert_eq!(missing, "block/bias");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_add_with_constant_rhs() {
        let (bytes, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            const_f32("c", &[], &[2.5]),
            float_op("sum", "Add", &["x", "c"]),
        ]);

        let words = u32s(&bytes[HEADER_LEN..HEADER_LEN + 28]);
        assert_eq!(words[..5], [5, 1, 0, 0, 1]);
        assert_eq!(f32::from_bits(words[5]), 2.5);
        assert_eq!(words[6], 1);
        assert_eq!(model.operand(1).unwrap().name, "sum");
    }

    #[test]
    fn test_sub_with_constant_lhs() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            const_f32("one", &[], &[1.0]),
            float_op("diff", "Sub", &["one", "x"]),
        ]);

        let record = &model.layers[0];
        assert_eq!(record.params, vec![0, 1, 0]);
        assert_eq!(record.scalars, vec![1.0]);
        assert_eq!(record.operands, vec![0, 1]);
    }

    #[test]
    fn test_mul_of_two_tensors() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            float_op("a", "Abs", &["x"]),
            float_op("sq", "Mul", &["a", "a"]),
        ]);

        let record = &model.layers[1];
        assert_eq!(record.params, vec![2, 0, 0]);
        assert_eq!(record.operands, vec![1, 1, 2]);
        let a = model.operand(1).unwrap();
        assert_eq!(a.iotype, IOTYPE_INTERMEDIATE);
    }

    #[test]
    fn test_both_constant_operands_are_rejected() {
        let nodes = vec![
            const_f32("a", &[], &[1.0]),
            const_f32("b", &[], &[2.0]),
            float_op("sum", "Add", &["a", "b"]),
        ];
        let result = Converter::new().convert_bytes(&encode(nodes));
        assert!(matches!(
            result,
            Err(ConvertError::Exporter(ExporterError::UnsupportedPattern { .. }))
        ));
    }

    #[test]
    fn test_unary_chain_assigns_increasing_indices() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            float_op("a", "Abs", &["x"]),
            float_op("s", "Sin", &["a"]),
            float_op("c", "Cos", &["s"]),
            float_op("e", "Exp", &["c"]),
        ]);

        let subs: Vec<u32> = model.layers.iter().map(|l| l.params[0]).collect();
        assert_eq!(subs, vec![0, 1, 2, 16]);
        let names: Vec<&str> = model.operands.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["x", "a", "s", "c", "e"]);
        let indices: Vec<u32> = model.operands.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_depth_to_space_mirror_pad_and_maximum() {
        let pads = [0, 0, 1, 1, 1, 1, 0, 0];
        let (_, model) = convert(vec![
            placeholder("x", &[1, 4, 4, 4]),
            const_i32("pads", &[4, 2], &pads),
            with_attr(
                float_op("pad", "MirrorPad", &["x", "pads"]),
                "mode",
                Value::S(b"SYMMETRIC".to_vec()),
            ),
            with_attr(float_op("d2s", "DepthToSpace", &["pad"]), "block_size", Value::I(2)),
            const_f32("zero", &[], &[0.0]),
            float_op("clamp", "Maximum", &["d2s", "zero"]),
        ]);

        assert_eq!(model.layers.len(), 3);

        let pad = &model.layers[0];
        assert_eq!(pad.op, OpCode::MirrorPad);
        assert_eq!(pad.params, vec![2]);
        let raw: Vec<u8> = pads.iter().flat_map(|v: &i32| v.to_le_bytes()).collect();
        assert_eq!(pad.raw, raw);

        let d2s = &model.layers[1];
        assert_eq!(d2s.op, OpCode::DepthToSpace);
        assert_eq!(d2s.params, vec![2]);
        assert_eq!(d2s.operands, vec![1, 2]);

        let clamp = &model.layers[2];
        assert_eq!(clamp.op, OpCode::Maximum);
        assert_eq!(clamp.scalars, vec![0.0]);
        assert_eq!(clamp.operands, vec![2, 3]);
    }

    fn mirror_pad_with(paddings: NodeDef) -> Vec<NodeDef> {
        vec![
            placeholder("x", &[1, 4, 4, 4]),
            paddings,
            with_attr(
                float_op("pad", "MirrorPad", &["x", "pads"]),
                "mode",
                Value::S(b"REFLECT".to_vec()),
            ),
        ]
    }

    #[test]
    fn test_mirror_pad_with_int64_paddings_is_unsupported() {
        let nodes = mirror_pad_with(const_i64("pads", &[4, 2], &[0, 0, 1, 1, 1, 1, 0, 0]));
        match Converter::new().convert_bytes(&encode(nodes)) {
            Err(ConvertError::Exporter(ExporterError::UnsupportedPattern { node, .. })) => {
                assert_eq!(node, "pad");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mirror_pad_with_rank3_paddings_is_unsupported() {
        let nodes = mirror_pad_with(const_i32("pads", &[3, 2], &[1, 1, 1, 1, 0, 0]));
        let result = Converter::new().convert_bytes(&encode(nodes));
        assert!(matches!(
            result,
            Err(ConvertError::Exporter(ExporterError::UnsupportedPattern { .. }))
        ));
    }

    #[test]
    fn test_negative_block_size_is_unsupported() {
        let nodes = vec![
            placeholder("x", &[1, 2, 2, 4]),
            with_attr(float_op("d2s", "DepthToSpace", &["x"]), "block_size", Value::I(-2)),
        ];
        let result = Converter::new().convert_bytes(&encode(nodes));
        assert!(matches!(
            result,
            Err(ConvertError::Exporter(ExporterError::UnsupportedPattern { .. }))
        ));
    }

    #[test]
    fn test_dense_block_is_one_layer() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 2]),
            const_f32("fc/kernel", &[2, 3], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            const_f32("fc/bias", &[3], &[0.1, 0.2, 0.3]),
            float_op("fc/MatMul", "MatMul", &["x", "fc/kernel"]),
            float_op("fc/BiasAdd", "BiasAdd", &["fc/MatMul", "fc/bias"]),
            float_op("fc/Sigmoid", "Sigmoid", &["fc/BiasAdd"]),
        ]);

        assert_eq!(model.layers.len(), 1);
        let record = &model.layers[0];
        assert_eq!(record.op, OpCode::Dense);
        assert_eq!(record.params, vec![2, 2, 3, 1]);
        assert_eq!(
            record.weights,
            vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0, 0.1, 0.2, 0.3]
        );
        assert_eq!(model.operand(record.operands[0]).unwrap().name, "x");
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "fc/Sigmoid");
        assert_eq!(model.operands.len(), 2);
    }

    #[test]
    fn test_tensordot_dense_without_bias() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 4, 4, 2]),
            const_f32("fc/kernel", &[2, 1], &[0.5, -1.0]),
            node("fc/Tensordot/Shape", "Shape", &["x"]),
            const_i32("fc/Tensordot/perm", &[4], &[0, 1, 2, 3]),
            float_op("fc/Tensordot/transpose", "Transpose", &["x", "fc/Tensordot/perm"]),
            const_i32("fc/Tensordot/stack", &[2], &[16, 2]),
            float_op("fc/Tensordot/Reshape", "Reshape", &["fc/Tensordot/transpose", "fc/Tensordot/stack"]),
            float_op("fc/Tensordot/MatMul", "MatMul", &["fc/Tensordot/Reshape", "fc/kernel"]),
            const_i32("fc/Tensordot/concat_1", &[4], &[1, 4, 4, 1]),
            float_op("fc/Tensordot", "Reshape", &["fc/Tensordot/MatMul", "fc/Tensordot/concat_1"]),
        ]);

        assert_eq!(model.layers.len(), 1);
        let record = &model.layers[0];
        assert_eq!(record.params, vec![3, 2, 1, 0]);
        assert_eq!(record.weights, vec![0.5, -1.0]);
        assert_eq!(model.operand(record.operands[0]).unwrap().name, "x");
        assert_eq!(model.operand(record.operands[1]).unwrap().name, "fc/Tensordot");
    }

    #[test]
    fn test_avg_pool() {
        let pool = with_attr(
            padded(float_op("pool", "AvgPool", &["x"]), "SAME"),
            "strides",
            Value::List(ListValue {
                i: vec![1, 2, 2, 1],
                ..Default::default()
            }),
        );
        let pool = with_attr(
            pool,
            "ksize",
            Value::List(ListValue {
                i: vec![1, 3, 3, 1],
                ..Default::default()
            }),
        );
        let (_, model) = convert(vec![placeholder("x", &[1, 8, 8, 1]), pool]);

        let record = &model.layers[0];
        assert_eq!(record.op, OpCode::AvgPool);
        assert_eq!(record.params, vec![2, 1, 3]);
    }

    #[test]
    fn test_identity_between_ops_is_elided() {
        let (_, model) = convert(vec![
            placeholder("x", &[1, 2, 2, 1]),
            float_op("a", "Abs", &["x"]),
            float_op("id", "Identity", &["a"]),
            float_op("b", "Sin", &["id"]),
        ]);

        assert_eq!(model.layers.len(), 2);
        assert_eq!(model.layers[1].operands, vec![1, 2]);
        assert!(model.operands.iter().all(|o| o.name != "id"));
    }

    #[test]
    fn test_convert_file_round_trip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("model.pb");
        let output = dir.path().join("model.model");
        std::fs::write(&input, encode(scoped_block(true))).unwrap();

        let options = ConverterOptions::default().with_version(1, 5).with_verify(false);
        let summary = Converter::with_options(options).convert_file(&input, &output).unwrap();

        assert_eq!(summary.layers, 1);
        assert_eq!(summary.operands, 2);
        let model = NativeModel::parse(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(model.version, FormatVersion { major: 1, minor: 5 });
    }

    #[test]
    fn test_convert_file_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("model.pb");
        let output = dir.path().join("model.model");
        std::fs::write(&input, [0xff, 0xff]).unwrap();

        assert!(Converter::new().convert_file(&input, &output).is_err());
        assert!(!output.exists());
    }
}
