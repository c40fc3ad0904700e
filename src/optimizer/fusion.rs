use crate::ir::{BlockKind, FusedScope, Graph, ScopeId};
use crate::optimizer::{OptimizationPass, OptimizerError};
use std::collections::BTreeMap;
use tracing::debug;

pub const OP_CONV2D: &str = "Conv2D";
pub const OP_MATMUL: &str = "MatMul";
const OP_SHAPE: &str = "Shape";
const OP_TRANSPOSE: &str = "Transpose";

/// Higher-rank dense layers route their matmul through this sub-scope.
const TENSORDOT: &str = "/Tensordot";

/// Finds scopes holding a whole convolution layer (kernel, bias, dilation
/// plumbing) so that the exporter can collapse them into one record.
pub struct ConvScopeFusion;

/// Finds scopes holding a whole dense layer, including the reshapes a
/// higher-rank input goes through.
pub struct DenseScopeFusion;

fn install(graph: &mut Graph, kind: BlockKind, scopes: BTreeMap<ScopeId, FusedScope>) {
    graph.fused_scopes.retain(|_, block| block.kind != kind);
    for block in scopes.values() {
        debug!("fused {:?} scope {} fed by {:?}", kind, block.scope, block.input);
    }
    graph.fused_scopes.extend(scopes);
}

impl OptimizationPass for ConvScopeFusion {
    fn name(&self) -> &'static str {
        "conv-scope-fusion"
    }

    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        let mut scopes: BTreeMap<ScopeId, FusedScope> = BTreeMap::new();
        for node in &graph.nodes {
            if node.op_type != OP_CONV2D {
                continue;
            }
            let scope = node.name.scope();
            // a bare conv call, or a scope that only shares a prefix
            if scope.is_empty() || !graph.contains(scope.child("kernel").as_str()) {
                continue;
            }
            scopes.entry(scope.clone()).or_insert(FusedScope {
                kind: BlockKind::Conv,
                scope,
                input: None,
            });
        }

        for node in &graph.nodes {
            if node.op_type != OP_CONV2D && node.op_type != OP_SHAPE {
                continue;
            }
            let scope = node.name.scope();
            let Some(block) = scopes.get_mut(&scope) else {
                continue;
            };
            for input in &node.inputs {
                if input.scope() != scope {
                    block.input = Some(input.clone());
                }
            }
        }

        install(graph, BlockKind::Conv, scopes);
        Ok(())
    }
}

/// `dense/Tensordot` belongs to the `dense` block.
fn dense_block_of(scope: &ScopeId) -> ScopeId {
    match scope.as_str().find(TENSORDOT) {
        Some(idx) => ScopeId::new(&scope.as_str()[..idx]),
        None => scope.clone(),
    }
}

impl OptimizationPass for DenseScopeFusion {
    fn name(&self) -> &'static str {
        "dense-scope-fusion"
    }

    fn apply(&self, graph: &mut Graph) -> Result<(), OptimizerError> {
        let mut scopes: BTreeMap<ScopeId, FusedScope> = BTreeMap::new();
        for node in &graph.nodes {
            if node.op_type != OP_MATMUL {
                continue;
            }
            let scope = dense_block_of(&node.name.scope());
            if scope.is_empty() || !graph.contains(scope.child("kernel").as_str()) {
                continue;
            }
            scopes.entry(scope.clone()).or_insert(FusedScope {
                kind: BlockKind::Dense,
                scope,
                input: None,
            });
        }

        for node in &graph.nodes {
            if !matches!(node.op_type.as_str(), OP_MATMUL | OP_SHAPE | OP_TRANSPOSE) {
                continue;
            }
            let Some(block) = scopes.get_mut(&dense_block_of(&node.name.scope())) else {
                continue;
            };
            for input in &node.inputs {
                if !block.scope.contains(&input.scope()) {
                    block.input = Some(input.clone());
                }
            }
        }

        install(graph, BlockKind::Dense, scopes);
        Ok(())
    }
}
