// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 seqflow contributors

//! Stage-level dependency graph
//!
//! Resolves the string references between stages (`input` and `run_after`)
//! into edges, rejects unknown names and cycles, and yields the order in
//! which stages are instantiated.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::SeqflowError;
use crate::pipeline::StageRegistry;

/// Why one stage must precede another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Upstream outputs feed this stage
    Data,
    /// Ordering only (`run_after`)
    Order,
}

/// Builder for the stage dependency DAG
pub struct StageDag {
    graph: DiGraph<usize, EdgeKind>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
}

impl StageDag {
    /// Create an empty DAG
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            index_to_name: HashMap::new(),
        }
    }

    /// Build the DAG from a registry
    pub fn build(registry: &StageRegistry) -> Result<Self, SeqflowError> {
        let mut dag = Self::new();

        for (idx, stage) in registry.stages().iter().enumerate() {
            let node = dag.graph.add_node(idx);
            dag.name_to_index.insert(stage.name.clone(), node);
            dag.index_to_name.insert(node, stage.name.clone());
        }

        for stage in registry.stages() {
            let stage_node = dag.name_to_index[&stage.name];

            let data = stage.input.referenced_stages().iter().map(|n| (n, EdgeKind::Data));
            let order = stage.run_after.iter().map(|n| (n, EdgeKind::Order));

            for (reference, kind) in data.chain(order) {
                let dep_node = dag.name_to_index.get(reference).ok_or_else(|| {
                    SeqflowError::UnknownStageReference {
                        stage: stage.name.clone(),
                        reference: reference.clone(),
                    }
                })?;

                // A data edge subsumes an ordering edge between the same pair
                match dag.graph.find_edge(*dep_node, stage_node) {
                    Some(edge) if kind == EdgeKind::Data => dag.graph[edge] = EdgeKind::Data,
                    Some(_) => {}
                    None => {
                        dag.graph.add_edge(*dep_node, stage_node, kind);
                    }
                }
            }
        }

        dag.validate_acyclic()?;

        Ok(dag)
    }

    /// Validate that the graph is acyclic
    fn validate_acyclic(&self) -> Result<(), SeqflowError> {
        match self.find_cycle() {
            Some(stages) => Err(SeqflowError::CircularDependency { stages }),
            None => Ok(()),
        }
    }

    /// Members of the first cycle found, in declaration order
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .collect();

        for scc in &mut cycles {
            scc.sort_by_key(|n| self.graph[*n]);
        }
        cycles.sort_by_key(|scc| self.graph[scc[0]]);

        cycles.first().map(|scc| {
            scc.iter()
                .map(|n| self.index_to_name[n].clone())
                .collect()
        })
    }

    /// Topological order of stage positions; ties broken by declaration order
    pub fn topological_order(&self) -> Result<Vec<usize>, SeqflowError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let count = self.graph.neighbors_directed(n, Direction::Incoming).count();
                (n, count)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| Reverse((self.graph[n], n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((position, node))) = ready.pop() {
            order.push(position);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[next], next)));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let stages = self.find_cycle().unwrap_or_default();
            return Err(SeqflowError::CircularDependency { stages });
        }

        Ok(order)
    }

    /// Stages that must run before `stage_name`, with the edge kind
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<(String, EdgeKind)>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<(usize, String, EdgeKind)> = self
            .graph
            .edges_directed(*node, Direction::Incoming)
            .map(|e| {
                let src = e.source();
                (self.graph[src], self.index_to_name[&src].clone(), *e.weight())
            })
            .collect();
        deps.sort_by_key(|(p, _, _)| *p);
        Some(deps.into_iter().map(|(_, n, k)| (n, k)).collect())
    }

    fn sorted_edges(&self) -> Vec<(usize, usize, &str, &str, EdgeKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((
                    self.graph[from],
                    self.graph[to],
                    self.index_to_name[&from].as_str(),
                    self.index_to_name[&to].as_str(),
                    self.graph[e],
                ))
            })
            .collect();
        edges.sort_by_key(|(f, t, ..)| (*f, *t));
        edges
    }

    fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<(usize, &str)> = self
            .index_to_name
            .iter()
            .map(|(n, name)| (self.graph[*n], name.as_str()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, n)| n).collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for name in self.sorted_names() {
            out.push_str(&format!("    {}[{}]\n", name, name));
        }

        for (_, _, from, to, kind) in self.sorted_edges() {
            let arrow = match kind {
                EdgeKind::Data => "-->",
                EdgeKind::Order => "-.->",
            };
            out.push_str(&format!("    {} {} {}\n", from, arrow, to));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (_, _, from, to, kind) in self.sorted_edges() {
            match kind {
                EdgeKind::Data => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
                EdgeKind::Order => out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [style=dashed];\n",
                    from, to
                )),
            }
        }

        for name in self.sorted_names() {
            let node = self.name_to_index[name];
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of instantiation order
    pub fn to_text(&self, registry: &StageRegistry) -> Result<String, SeqflowError> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, idx) in order.iter().enumerate() {
            let stage = &registry.stages()[*idx];
            let deps = self.dependencies(&stage.name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, stage.name, stage.kind));

            let data: Vec<&str> = deps
                .iter()
                .filter(|(_, k)| *k == EdgeKind::Data)
                .map(|(n, _)| n.as_str())
                .collect();
            let order: Vec<&str> = deps
                .iter()
                .filter(|(_, k)| *k == EdgeKind::Order)
                .map(|(n, _)| n.as_str())
                .collect();

            if !data.is_empty() {
                out.push_str(&format!(" [from: {}]", data.join(", ")));
            }
            if !order.is_empty() {
                out.push_str(&format!(" [after: {}]", order.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

impl Default for StageDag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FnAction;
    use crate::pipeline::{InputSource, MatchRule, Pipeline, StageOptions};
    use std::sync::Arc;

    /// Each entry is (name, upstream stages, run_after stages); no upstream means origin
    fn make_test_pipeline(stages: Vec<(&str, Vec<&str>, Vec<&str>)>) -> Pipeline {
        let mut pipeline = Pipeline::new("test");
        for (name, upstream, after) in stages {
            if upstream.is_empty() {
                pipeline.declare_origin(name, [format!("{name}.txt")]).unwrap();
                continue;
            }
            let mut options = StageOptions::new();
            for a in after {
                options = options.run_after(a);
            }
            pipeline
                .declare_transform(
                    name,
                    InputSource::Stages(upstream.into_iter().map(String::from).collect()),
                    MatchRule::suffix(".txt"),
                    [format!(".{name}.txt")],
                    Arc::new(FnAction::noop(name)),
                    options,
                )
                .unwrap();
        }
        pipeline
    }

    #[test]
    fn test_linear_dag() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![], vec![]),
            ("b", vec!["a"], vec![]),
            ("c", vec!["b"], vec![]),
        ]);

        let dag = StageDag::build(pipeline.registry()).unwrap();

        assert_eq!(dag.topological_order().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // Declared out of dependency order on purpose
        let pipeline = make_test_pipeline(vec![
            ("d", vec!["b", "c"], vec![]),
            ("c", vec!["a"], vec![]),
            ("b", vec!["a"], vec![]),
            ("a", vec![], vec![]),
        ]);

        let dag = StageDag::build(pipeline.registry()).unwrap();
        let order: Vec<&str> = dag
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|p| pipeline.registry().stages()[p].name.as_str())
            .collect();

        assert_eq!(order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let pipeline = make_test_pipeline(vec![
            ("seed", vec![], vec![]),
            ("a", vec!["b"], vec![]),
            ("b", vec!["a"], vec![]),
        ]);

        let result = StageDag::build(pipeline.registry());
        match result {
            Err(SeqflowError::CircularDependency { stages }) => {
                assert_eq!(stages, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let pipeline = make_test_pipeline(vec![("a", vec!["a"], vec![])]);

        let result = StageDag::build(pipeline.registry());
        assert!(matches!(result, Err(SeqflowError::CircularDependency { stages }) if stages == vec!["a"]));
    }

    #[test]
    fn test_run_after_cycle_detected() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![], vec![]),
            ("b", vec!["a"], vec!["c"]),
            ("c", vec!["b"], vec![]),
        ]);

        let result = StageDag::build(pipeline.registry());
        assert!(matches!(result, Err(SeqflowError::CircularDependency { .. })));
    }

    #[test]
    fn test_unknown_reference() {
        let pipeline = make_test_pipeline(vec![("a", vec!["nonexistent"], vec![])]);

        let result = StageDag::build(pipeline.registry());
        assert!(matches!(
            result,
            Err(SeqflowError::UnknownStageReference { reference, .. }) if reference == "nonexistent"
        ));
    }

    #[test]
    fn test_unknown_run_after() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![], vec![]),
            ("b", vec!["a"], vec!["ghost"]),
        ]);

        let result = StageDag::build(pipeline.registry());
        assert!(matches!(result, Err(SeqflowError::UnknownStageReference { .. })));
    }

    #[test]
    fn test_dependencies_carry_edge_kind() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![], vec![]),
            ("b", vec!["a"], vec![]),
            ("c", vec!["b"], vec!["a", "b"]),
        ]);

        let dag = StageDag::build(pipeline.registry()).unwrap();

        assert_eq!(dag.dependencies("a").unwrap(), vec![]);
        // The data edge from b absorbs its run_after duplicate
        assert_eq!(
            dag.dependencies("c").unwrap(),
            vec![
                ("a".to_string(), EdgeKind::Order),
                ("b".to_string(), EdgeKind::Data),
            ]
        );
        assert!(dag.dependencies("ghost").is_none());
    }

    #[test]
    fn test_edge_kinds_in_renderings() {
        let pipeline = make_test_pipeline(vec![
            ("a", vec![], vec![]),
            ("b", vec!["a"], vec![]),
            ("c", vec!["a"], vec!["b"]),
        ]);

        let dag = StageDag::build(pipeline.registry()).unwrap();

        let mermaid = dag.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("a --> b"));
        assert!(mermaid.contains("b -.-> c"));

        let dot = dag.to_dot();
        assert!(dot.contains("\"b\" -> \"c\" [style=dashed];"));

        let text = dag.to_text(pipeline.registry()).unwrap();
        assert_eq!(
            text,
            "1. a (origin)\n2. b (transform) [from: a]\n3. c (transform) [from: a] [after: b]\n"
        );
    }
}
