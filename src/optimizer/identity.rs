use crate::ir::{Graph, Node, NodeName, OP_IDENTITY};
use crate::optimizer::{OptimizationPass, OptimizerError};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Removes `Identity` nodes, keeping graph output names visible.
///
/// An identity that is a graph output hands its name to the node producing
/// its value. Every other identity is bypassed: its consumers read directly
/// from its (transitively resolved) input. The node table is rebuilt from
/// the old one plus the rename and substitution maps.
pub struct IdentityElision;

impl OptimizationPass for IdentityElision {
    fn name(&self) -> &'static str {
        "identity-elision"
    }

    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        let outputs: HashSet<&NodeName> = graph.outputs.iter().collect();

        let mut substitutions: HashMap<NodeName, NodeName> = HashMap::new();
        let mut output_identities: Vec<(&NodeName, &NodeName)> = Vec::new();
        for node in &graph.nodes {
            if node.op_type != OP_IDENTITY {
                continue;
            }
            let Some(input) = node.inputs.first() else {
                warn!("identity {} has no input, leaving it in place", node.name);
                continue;
            };
            if outputs.contains(&node.name) {
                output_identities.push((&node.name, input));
            } else {
                substitutions.insert(node.name.clone(), input.clone());
            }
        }

        let mut renames: HashMap<NodeName, NodeName> = HashMap::new();
        let mut removed: HashSet<NodeName> = substitutions.keys().cloned().collect();
        for &(output, input) in &output_identities {
            let producer = resolve(input, &substitutions, output)?.clone();
            removed.insert(output.clone());
            if !graph.contains(producer.as_str()) {
                warn!("output {} reads unknown node {}, dropping the alias", output, producer);
                substitutions.insert(output.clone(), producer);
                continue;
            }
            if let Some(first) = renames.get(&producer) {
                return Err(OptimizerError::ConflictingOutput {
                    producer,
                    first: first.clone(),
                    second: output.clone(),
                });
            }
            renames.insert(producer, output.clone());
        }

        if removed.is_empty() {
            return Ok(());
        }

        let mut nodes = Vec::with_capacity(graph.nodes.len() - removed.len());
        for node in &graph.nodes {
            if node.op_type == OP_IDENTITY && removed.contains(&node.name) {
                continue;
            }
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                let resolved = resolve(input, &substitutions, &node.name)?;
                let target = renames.get(resolved).unwrap_or(resolved);
                inputs.push(target.clone());
            }
            nodes.push(Node {
                name: renames.get(&node.name).unwrap_or(&node.name).clone(),
                op_type: node.op_type.clone(),
                inputs,
                attributes: node.attributes.clone(),
            });
        }

        for node in &nodes {
            for input in &node.inputs {
                let stale = removed.contains(input) || renames.contains_key(input);
                if stale && !nodes.iter().any(|n| &n.name == input) {
                    return Err(OptimizerError::DanglingReference {
                        name: input.clone(),
                        node: node.name.clone(),
                    });
                }
            }
        }

        debug!(
            "elided {} identity nodes, renamed {} producers",
            removed.len(),
            renames.len()
        );
        graph.replace_nodes(nodes);
        Ok(())
    }
}

/// Follows the substitution chain from `name` to a node that is not elided.
fn resolve<'a>(
    name: &'a NodeName,
    substitutions: &'a HashMap<NodeName, NodeName>,
    consumer: &NodeName,
) -> Result<&'a NodeName, OptimizerError> {
    let mut current = name;
    let mut hops = 0;
    while let Some(next) = substitutions.get(current) {
        hops += 1;
        if hops > substitutions.len() {
            return Err(OptimizerError::DanglingReference {
                name: name.clone(),
                node: consumer.clone(),
            });
        }
        current = next;
    }
    Ok(current)
}
