use crate::ir::Graph;
use crate::optimizer::{OptimizationPass, OptimizerError};

/// Builds the producer-to-consumers index. Repeated uses are kept.
pub struct EdgeConstruction;

impl OptimizationPass for EdgeConstruction {
    fn name(&self) -> &'static str {
        "edge-construction"
    }

    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        graph.edges.clear();
        for (i, node) in graph.nodes.iter().enumerate() {
            for input in &node.inputs {
                graph.edges.entry(input.clone()).or_default().push(i);
            }
        }
        Ok(())
    }
}
