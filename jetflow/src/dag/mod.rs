//! client-facing DAG model: named vertices, directed edges, validation.
//! a validated DAG is immutable and acyclic; the execution graph expands it
//! into per-task form.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::runtime::VertexId;
use crate::runtime::task::{Processor, TaskContext};

pub mod execution_graph;

pub type ProcessorFactory = Arc<dyn Fn(&TaskContext) -> Box<dyn Processor> + Send + Sync>;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("vertex `{0}` already exists")]
    VertexNameConflict(String),

    #[error("edge references unknown vertex `{0}`")]
    VertexNotFound(String),

    #[error("cycle detected when adding edge `{from}` -> `{target}`")]
    CycleDetected { from: String, target: String },

    #[error("dag has no vertices")]
    EmptyDag,

    #[error("forward edge `{from}` -> `{target}` requires equal parallelism ({source_parallelism} != {target_parallelism})")]
    ForwardParallelismMismatch {
        from: String,
        target: String,
        source_parallelism: u16,
        target_parallelism: u16,
    },
}

/// how records travel along an edge
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum ShufflePolicy {
    /// task i feeds task i of the target vertex, locally
    Forward,
    /// records are hash-partitioned across every target task in the cluster
    Hash,
}

#[derive(Clone)]
pub struct Vertex {
    name: String,
    parallelism: u16,
    factory: ProcessorFactory,
}

impl Vertex {
    pub fn new(name: &str, parallelism: u16, factory: ProcessorFactory) -> Self {
        Vertex {
            name: name.to_string(),
            parallelism,
            factory,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn parallelism(&self) -> u16 {
        self.parallelism
    }

    pub fn factory(&self) -> &ProcessorFactory {
        &self.factory
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vertex({}, parallelism={})", self.name, self.parallelism)
    }
}

#[derive(Clone, Debug)]
pub struct Edge {
    source: String,
    target: String,
    shuffle_policy: ShufflePolicy,
}

impl Edge {
    pub fn new(source: &str, target: &str, shuffle_policy: ShufflePolicy) -> Self {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
            shuffle_policy,
        }
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    pub fn target(&self) -> &str {
        self.target.as_str()
    }

    pub fn shuffle_policy(&self) -> ShufflePolicy {
        self.shuffle_policy
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dag {
    vertices: Vec<Vertex>,
    vertex_ids: HashMap<String, VertexId>,
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Dag {
            vertices: Vec::new(),
            vertex_ids: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), DagError> {
        if self.vertex_ids.contains_key(vertex.name()) {
            return Err(DagError::VertexNameConflict(vertex.name().to_string()));
        }
        let vertex_id = VertexId(self.vertices.len() as u32);
        self.vertex_ids.insert(vertex.name().to_string(), vertex_id);
        self.vertices.push(vertex);
        Ok(())
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), DagError> {
        for name in [edge.source(), edge.target()] {
            if !self.vertex_ids.contains_key(name) {
                return Err(DagError::VertexNotFound(name.to_string()));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex_id(&self, name: &str) -> Result<VertexId, DagError> {
        self.vertex_ids
            .get(name)
            .copied()
            .ok_or_else(|| DagError::VertexNotFound(name.to_string()))
    }

    pub fn vertex(&self, vertex_id: VertexId) -> &Vertex {
        &self.vertices[vertex_id.0 as usize]
    }

    /// structural validation: non-empty, no dangling edges, acyclic,
    /// forward edges with matching parallelism
    pub fn validate(&self) -> Result<(), DagError> {
        if self.vertices.is_empty() {
            return Err(DagError::EmptyDag);
        }

        let mut check_dag: daggy::Dag<(), ()> = daggy::Dag::new();
        let node_indies: Vec<daggy::NodeIndex> =
            self.vertices.iter().map(|_| check_dag.add_node(())).collect();

        for edge in &self.edges {
            let source_id = self.vertex_id(edge.source())?;
            let target_id = self.vertex_id(edge.target())?;

            check_dag
                .add_edge(
                    node_indies[source_id.0 as usize],
                    node_indies[target_id.0 as usize],
                    (),
                )
                .map_err(|_would_cycle| DagError::CycleDetected {
                    from: edge.source().to_string(),
                    target: edge.target().to_string(),
                })?;

            if edge.shuffle_policy() == ShufflePolicy::Forward {
                let source_parallelism = self.vertex(source_id).parallelism();
                let target_parallelism = self.vertex(target_id).parallelism();
                if source_parallelism != target_parallelism {
                    return Err(DagError::ForwardParallelismMismatch {
                        from: edge.source().to_string(),
                        target: edge.target().to_string(),
                        source_parallelism,
                        target_parallelism,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::dag::{Dag, DagError, Edge, ShufflePolicy, Vertex};
    use crate::runtime::task::test_support::NoopProcessor;

    fn vertex(name: &str, parallelism: u16) -> Vertex {
        Vertex::new(name, parallelism, Arc::new(|_| Box::new(NoopProcessor)))
    }

    #[test]
    pub fn validate_ok_test() {
        let mut dag = Dag::new();
        dag.add_vertex(vertex("source", 4)).unwrap();
        dag.add_vertex(vertex("sink", 2)).unwrap();
        dag.add_edge(Edge::new("source", "sink", ShufflePolicy::Hash))
            .unwrap();

        dag.validate().unwrap();
    }

    #[test]
    pub fn name_conflict_test() {
        let mut dag = Dag::new();
        dag.add_vertex(vertex("v", 1)).unwrap();
        match dag.add_vertex(vertex("v", 1)) {
            Err(DagError::VertexNameConflict(name)) => assert_eq!(name, "v"),
            other => panic!("expected VertexNameConflict, got {:?}", other),
        }
    }

    #[test]
    pub fn dangling_edge_test() {
        let mut dag = Dag::new();
        dag.add_vertex(vertex("v", 1)).unwrap();
        assert!(matches!(
            dag.add_edge(Edge::new("v", "missing", ShufflePolicy::Hash)),
            Err(DagError::VertexNotFound(_))
        ));
    }

    #[test]
    pub fn cycle_test() {
        let mut dag = Dag::new();
        dag.add_vertex(vertex("a", 1)).unwrap();
        dag.add_vertex(vertex("b", 1)).unwrap();
        dag.add_edge(Edge::new("a", "b", ShufflePolicy::Hash)).unwrap();
        dag.add_edge(Edge::new("b", "a", ShufflePolicy::Hash)).unwrap();

        assert!(matches!(
            dag.validate(),
            Err(DagError::CycleDetected { .. })
        ));
    }

    #[test]
    pub fn forward_parallelism_test() {
        let mut dag = Dag::new();
        dag.add_vertex(vertex("a", 2)).unwrap();
        dag.add_vertex(vertex("b", 3)).unwrap();
        dag.add_edge(Edge::new("a", "b", ShufflePolicy::Forward))
            .unwrap();

        assert!(matches!(
            dag.validate(),
            Err(DagError::ForwardParallelismMismatch { .. })
        ));
    }
}
