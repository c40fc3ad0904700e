use crate::ir::{Graph, NodeName};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("{name} is still referenced by {node} after identity elision")]
    DanglingReference { name: NodeName, node: NodeName },
    #[error("outputs {first} and {second} both alias {producer}")]
    ConflictingOutput {
        producer: NodeName,
        first: NodeName,
        second: NodeName,
    },
}

pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError>;
}

pub mod edges;
pub mod fusion;
pub mod identity;
pub mod outputs;

pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The fixed canonicalization sequence run before emission.
    pub fn canonical() -> Self {
        let mut optimizer = Self::new();
        optimizer.add_pass(Box::new(outputs::OutputDetection));
        optimizer.add_pass(Box::new(identity::IdentityElision));
        optimizer.add_pass(Box::new(edges::EdgeConstruction));
        optimizer.add_pass(Box::new(fusion::ConvScopeFusion));
        optimizer.add_pass(Box::new(fusion::DenseScopeFusion));
        optimizer
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn optimize(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        for pass in &self.passes {
            pass.apply(graph)?;
            debug!("pass {} done, {} nodes", pass.name(), graph.nodes.len());
        }
        Ok(())
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::canonical()
    }
}
