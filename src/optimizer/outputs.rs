use crate::ir::Graph;
use crate::optimizer::{OptimizationPass, OptimizerError};
use std::collections::HashSet;

/// Marks every node whose name is never used as an input.
pub struct OutputDetection;

impl OptimizationPass for OutputDetection {
    fn name(&self) -> &'static str {
        "output-detection"
    }

    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        let used: HashSet<&str> = graph
            .nodes
            .iter()
            .flat_map(|node| node.inputs.iter().map(|i| i.as_str()))
            .collect();

        graph.outputs = graph
            .nodes
            .iter()
            .filter(|node| !used.contains(node.name.as_str()))
            .map(|node| node.name.clone())
            .collect();
        Ok(())
    }
}
