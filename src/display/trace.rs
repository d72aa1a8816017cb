use crate::compute::{ComputationError, ExecutionResult};
use crate::graph::DependencyGraph;
use crate::store::NodeId;
use std::collections::HashMap;
use std::fmt::Write;

/// Renders `target` and everything upstream of it as a tree, each node annotated with
/// its outcome, so the node behind an upstream-failure marker can be found.
pub fn format_failure_trace(graph: &DependencyGraph, result: &ExecutionResult, target: NodeId) -> String {
    let mut tracer = Tracer { graph, result, visited_at_level: HashMap::new(), output: String::new() };

    match graph.node(target) {
        Some(node) => {
            let _ = writeln!(tracer.output, "FAILURE TRACE for node '{}':", node.name);
            let _ = writeln!(tracer.output, "--------------------------------------------------");
            tracer.trace_node(target, 1, "");
            if let Some(root) = tracer.root_cause(target) {
                let _ = writeln!(tracer.output, "--------------------------------------------------");
                let _ = writeln!(tracer.output, "Root cause: '{}'", graph.nodes()[root.index()].name);
            }
        }
        None => {
            let _ = writeln!(tracer.output, "Error: Invalid Node ID {target}");
        }
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a DependencyGraph,
    result: &'a ExecutionResult,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str) {
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{prefix}-> (Ref to L{first_seen})");
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let node = &self.graph.nodes()[node_id.index()];
        let _ = writeln!(
            self.output,
            "{prefix}[L{level}] {} ({}) {}",
            node.name,
            node.function.name(),
            self.format_outcome(node_id)
        );

        let parents = self.graph.parents(node_id);
        let stem = build_child_stem(prefix);
        for (i, &parent) in parents.iter().enumerate() {
            let connector = if i == parents.len() - 1 { "`--" } else { "|--" };
            self.trace_node(parent, level + 1, &format!("{stem}{connector}"));
        }
    }

    fn format_outcome(&self, id: NodeId) -> String {
        match self.result.node_result(id) {
            Some(Ok(values)) => {
                let mut rendered: Vec<String> = values
                    .iter()
                    .map(|(spec, value)| format!("{}={value}", spec.name))
                    .collect();
                rendered.sort();
                format!("[OK {}]", rendered.join(", "))
            }
            Some(Err(ComputationError::UpstreamFailure { upstream, .. })) => format!("[BLOCKED by '{upstream}']"),
            Some(Err(ComputationError::Cancelled { .. })) => "[CANCELLED]".to_string(),
            Some(Err(err)) => format!("[FAILED: {err}]"),
            None => "[NOT RUN]".to_string(),
        }
    }

    /// Follows upstream-failure markers back to the node that actually failed.
    fn root_cause(&self, mut id: NodeId) -> Option<NodeId> {
        loop {
            match self.result.node_result(id)? {
                Ok(_) => return None,
                Err(ComputationError::UpstreamFailure { upstream, .. }) => {
                    id = self.graph.node_by_name(upstream)?.id;
                }
                Err(_) => return Some(id),
            }
        }
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`--", "   ").replace("|--", "|  ")
}
