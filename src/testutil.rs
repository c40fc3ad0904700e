//! GraphDef builders shared by the unit tests.

use crate::loader::proto::tensor_shape_proto::Dim;
use crate::loader::proto::{attr_value, AttrValue, GraphDef, NodeDef, TensorProto, TensorShapeProto};
use prost::Message;

pub const DT_FLOAT: i32 = 1;
pub const DT_INT32: i32 = 3;
pub const DT_INT64: i32 = 9;

pub fn shape(dims: &[i64]) -> TensorShapeProto {
    TensorShapeProto {
        dim: dims
            .iter()
            .map(|&size| Dim {
                size,
                name: String::new(),
            })
            .collect(),
        unknown_rank: false,
    }
}

pub fn node(name: &str, op: &str, inputs: &[&str]) -> NodeDef {
    NodeDef {
        name: name.to_string(),
        op: op.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn with_attr(mut def: NodeDef, key: &str, value: attr_value::Value) -> NodeDef {
    def.attr.insert(key.to_string(), AttrValue { value: Some(value) });
    def
}

pub fn placeholder(name: &str, dims: &[i64]) -> NodeDef {
    let def = with_attr(node(name, "Placeholder", &[]), "dtype", attr_value::Value::Type(DT_FLOAT));
    with_attr(def, "shape", attr_value::Value::Shape(shape(dims)))
}

/// Float constant stored as raw content, or as a literal when it has one element.
pub fn const_f32(name: &str, dims: &[i64], values: &[f32]) -> NodeDef {
    let mut tensor = TensorProto {
        dtype: DT_FLOAT,
        tensor_shape: Some(shape(dims)),
        ..Default::default()
    };
    if values.len() == 1 {
        tensor.float_val = values.to_vec();
    } else {
        tensor.tensor_content = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    }
    let def = with_attr(node(name, "Const", &[]), "dtype", attr_value::Value::Type(DT_FLOAT));
    with_attr(def, "value", attr_value::Value::Tensor(tensor))
}

pub fn const_i32(name: &str, dims: &[i64], values: &[i32]) -> NodeDef {
    let tensor = TensorProto {
        dtype: DT_INT32,
        tensor_shape: Some(shape(dims)),
        tensor_content: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    };
    let def = with_attr(node(name, "Const", &[]), "dtype", attr_value::Value::Type(DT_INT32));
    with_attr(def, "value", attr_value::Value::Tensor(tensor))
}

pub fn const_i64(name: &str, dims: &[i64], values: &[i64]) -> NodeDef {
    let tensor = TensorProto {
        dtype: DT_INT64,
        tensor_shape: Some(shape(dims)),
        tensor_content: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    };
    let def = with_attr(node(name, "Const", &[]), "dtype", attr_value::Value::Type(DT_INT64));
    with_attr(def, "value", attr_value::Value::Tensor(tensor))
}

pub fn float_op(name: &str, op: &str, inputs: &[&str]) -> NodeDef {
    with_attr(node(name, op, inputs), "T", attr_value::Value::Type(DT_FLOAT))
}

pub fn padded(def: NodeDef, mode: &str) -> NodeDef {
    with_attr(def, "padding", attr_value::Value::S(mode.as_bytes().to_vec()))
}

pub fn encode(nodes: Vec<NodeDef>) -> Vec<u8> {
    GraphDef { node: nodes }.encode_to_vec()
}

pub fn u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
