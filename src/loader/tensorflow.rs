use crate::ir::{AttrList, Attribute, DataType, Graph, Node, NodeName, Shape, Tensor};
use crate::loader::proto::{attr_value, AttrValue, GraphDef, NodeDef, TensorProto, TensorShapeProto};
use crate::loader::{GraphLoader, LoaderError};
use prost::Message;
use tracing::debug;

/// Reads a binary-serialized TensorFlow `GraphDef`.
pub struct TensorflowLoader;

impl GraphLoader for TensorflowLoader {
    fn from_bytes(bytes: &[u8]) -> Result<Graph, LoaderError> {
        let graph_def = GraphDef::decode(bytes)?;
        debug!("decoded graph with {} nodes", graph_def.node.len());
        let nodes = graph_def.node.into_iter().map(convert_node).collect();
        Ok(Graph::new(nodes))
    }
}

fn convert_node(def: NodeDef) -> Node {
    let attributes = def
        .attr
        .into_iter()
        .filter_map(|(key, value)| convert_attr(value).map(|attr| (key, attr)))
        .collect();

    Node {
        name: NodeName::from(def.name),
        op_type: def.op,
        inputs: def.input.into_iter().map(NodeName::from).collect(),
        attributes,
    }
}

fn convert_attr(value: AttrValue) -> Option<Attribute> {
    let attr = match value.value? {
        attr_value::Value::List(list) => Attribute::List(AttrList {
            ints: list.i,
            floats: list.f,
            bytes: list.s,
        }),
        attr_value::Value::S(s) => Attribute::Bytes(s),
        attr_value::Value::I(i) => Attribute::Int(i),
        attr_value::Value::F(f) => Attribute::Float(f),
        attr_value::Value::B(b) => Attribute::Bool(b),
        attr_value::Value::Type(t) => Attribute::Type(DataType::from_code(t)),
        attr_value::Value::Shape(shape) => Attribute::Shape(convert_shape(&shape)),
        attr_value::Value::Tensor(tensor) => Attribute::Tensor(convert_tensor(tensor)),
    };
    Some(attr)
}

fn convert_shape(shape: &TensorShapeProto) -> Shape {
    Shape {
        dims: shape.dim.iter().map(|d| d.size).collect(),
        unknown_rank: shape.unknown_rank,
    }
}

fn convert_tensor(tensor: TensorProto) -> Tensor {
    Tensor {
        data_type: DataType::from_code(tensor.dtype),
        shape: tensor
            .tensor_shape
            .as_ref()
            .map(|s| convert_shape(s).dims)
            .unwrap_or_default(),
        content: tensor.tensor_content,
        float_val: tensor.float_val,
        int_val: tensor.int_val,
    }
}
