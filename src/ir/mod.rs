use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::warn;

mod names;
mod tensor;

pub use names::{NodeName, ScopeId};
pub use tensor::{transpose_hwio_to_ohwi, DataType, Tensor};

pub const OP_CONST: &str = "Const";
pub const OP_IDENTITY: &str = "Identity";

#[derive(Error, Debug)]
pub enum IrError {
    #[error("node {node} has no attribute '{attr}'")]
    MissingAttribute { node: NodeName, attr: String },
    #[error("attribute '{attr}' of node {node} is not {expected}")]
    AttributeType {
        node: NodeName,
        attr: String,
        expected: &'static str,
    },
    #[error("node {node} has no input #{index}")]
    MissingInput { node: NodeName, index: usize },
    #[error("Invalid tensor: {0}")]
    InvalidTensor(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub dims: Vec<i64>,
    pub unknown_rank: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrList {
    pub ints: Vec<i64>,
    pub floats: Vec<f32>,
    pub bytes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f32),
    Bool(bool),
    Bytes(Vec<u8>),
    Type(DataType),
    Shape(Shape),
    Tensor(Tensor),
    List(AttrList),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: NodeName,
    pub op_type: String,
    pub inputs: Vec<NodeName>,
    pub attributes: HashMap<String, Attribute>,
}

impl Node {
    pub fn new(name: impl Into<NodeName>, op_type: &str, inputs: &[&str]) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|&i| NodeName::from(i)).collect(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: Attribute) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn is_const(&self) -> bool {
        self.op_type == OP_CONST
    }

    pub fn input(&self, index: usize) -> Result<&NodeName, IrError> {
        self.inputs.get(index).ok_or_else(|| IrError::MissingInput {
            node: self.name.clone(),
            index,
        })
    }

    pub fn attr(&self, key: &str) -> Result<&Attribute, IrError> {
        self.attributes.get(key).ok_or_else(|| IrError::MissingAttribute {
            node: self.name.clone(),
            attr: key.to_string(),
        })
    }

    fn type_error(&self, key: &str, expected: &'static str) -> IrError {
        IrError::AttributeType {
            node: self.name.clone(),
            attr: key.to_string(),
            expected,
        }
    }

    pub fn int_attr(&self, key: &str) -> Result<i64, IrError> {
        match self.attr(key)? {
            Attribute::Int(v) => Ok(*v),
            _ => Err(self.type_error(key, "an integer")),
        }
    }

    /// Byte-string attribute decoded as text, e.g. a padding mode.
    pub fn string_attr(&self, key: &str) -> Result<String, IrError> {
        match self.attr(key)? {
            Attribute::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            _ => Err(self.type_error(key, "a byte string")),
        }
    }

    pub fn tensor_attr(&self, key: &str) -> Result<&Tensor, IrError> {
        match self.attr(key)? {
            Attribute::Tensor(t) => Ok(t),
            _ => Err(self.type_error(key, "a tensor")),
        }
    }

    pub fn int_list_attr(&self, key: &str) -> Result<&[i64], IrError> {
        match self.attr(key)? {
            Attribute::List(list) => Ok(&list.ints),
            _ => Err(self.type_error(key, "a list")),
        }
    }

    /// The constant carried by a `Const` node.
    pub fn value(&self) -> Result<&Tensor, IrError> {
        self.tensor_attr("value")
    }

    pub fn type_attr(&self, key: &str) -> Option<DataType> {
        match self.attributes.get(key) {
            Some(Attribute::Type(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn shape_attr(&self, key: &str) -> Option<&Shape> {
        match self.attributes.get(key) {
            Some(Attribute::Shape(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Conv,
    Dense,
}

/// A scope collapsed into a single layer, and the tensor feeding it from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScope {
    pub kind: BlockKind,
    pub scope: ScopeId,
    pub input: Option<NodeName>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub outputs: Vec<NodeName>,
    /// Producer name to the indices of its consumers, in use order.
    pub edges: HashMap<NodeName, Vec<usize>>,
    pub fused_scopes: BTreeMap<ScopeId, FusedScope>,
    index: HashMap<NodeName, usize>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut graph = Self::default();
        graph.replace_nodes(nodes);
        graph
    }

    /// Installs a new node table and rebuilds the name index. Derived edges are dropped.
    pub fn replace_nodes(&mut self, nodes: Vec<Node>) {
        self.index.clear();
        self.edges.clear();
        for (i, node) in nodes.iter().enumerate() {
            if self.index.insert(node.name.clone(), i).is_some() {
                warn!("duplicate node name {}, keeping the last definition", node.name);
            }
        }
        self.nodes = nodes;
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn consumers<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Node> + 'a {
        self.edges
            .get(name)
            .into_iter()
            .flatten()
            .map(move |&i| &self.nodes[i])
    }

    pub fn first_consumer(&self, name: &str) -> Option<&Node> {
        self.consumers(name).next()
    }

    /// The innermost fused block enclosing `name`.
    pub fn fused_scope_of(&self, name: &NodeName) -> Option<&FusedScope> {
        let scope = name.scope();
        self.fused_scopes
            .values()
            .filter(|block| block.scope.contains(&scope))
            .max_by_key(|block| block.scope.as_str().len())
    }
}
