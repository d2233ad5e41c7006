use std::collections::HashMap;
use std::ops::Index;

use daggy::{NodeIndex, Walker};

use crate::core::runtime::{MemberIndex, TaskId, VertexId};
use crate::dag::{Dag, DagError, ShufflePolicy};

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub enum ExecutionEdge {
    /// same-member hand-off through a local channel
    Forward = 1,
    /// hash-partitioned, possibly crossing members
    Hash = 2,
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct ExecutionNode {
    pub task_id: TaskId,
    pub member: MemberIndex,
}

/// the execution plan: every vertex expanded into `parallelism` tasks with a
/// deterministic member assignment, every dag edge expanded into task-level
/// edges. built identically on every member.
#[derive(Clone, Debug)]
pub struct ExecutionGraph {
    dag: daggy::Dag<ExecutionNode, ExecutionEdge>,
    task_indies: HashMap<TaskId, NodeIndex>,
    member_count: u32,
}

impl ExecutionGraph {
    pub fn build(dag: &Dag, member_count: u32) -> Result<Self, DagError> {
        dag.validate()?;

        let mut execution_dag = daggy::Dag::new();
        let mut task_indies = HashMap::new();

        for (vertex_index, vertex) in dag.vertices().iter().enumerate() {
            let vertex_id = VertexId(vertex_index as u32);
            let num_tasks = vertex.parallelism();
            for task_number in 0..num_tasks {
                let task_id = TaskId::new(vertex_id, task_number, num_tasks);
                let node = ExecutionNode {
                    task_id,
                    member: MemberIndex(task_number as u32 % member_count),
                };
                let node_index = execution_dag.add_node(node);
                task_indies.insert(task_id, node_index);
            }
        }

        let mut graph = ExecutionGraph {
            dag: execution_dag,
            task_indies,
            member_count,
        };
        graph.build_task_edges(dag)?;
        Ok(graph)
    }

    fn build_task_edges(&mut self, dag: &Dag) -> Result<(), DagError> {
        for edge in dag.edges() {
            let source_id = dag.vertex_id(edge.source())?;
            let target_id = dag.vertex_id(edge.target())?;
            let source_tasks = self.vertex_tasks(source_id);
            let target_tasks = self.vertex_tasks(target_id);

            match edge.shuffle_policy() {
                ShufflePolicy::Forward => {
                    for (source_task, target_task) in
                        source_tasks.iter().zip(target_tasks.iter())
                    {
                        self.add_task_edge(source_task, target_task, ExecutionEdge::Forward)?;
                    }
                }
                ShufflePolicy::Hash => {
                    for source_task in &source_tasks {
                        for target_task in &target_tasks {
                            self.add_task_edge(source_task, target_task, ExecutionEdge::Hash)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn add_task_edge(
        &mut self,
        source_task: &TaskId,
        target_task: &TaskId,
        execution_edge: ExecutionEdge,
    ) -> Result<(), DagError> {
        let source_index = self.task_indies[source_task];
        let target_index = self.task_indies[target_task];
        self.dag
            .add_edge(source_index, target_index, execution_edge)
            .map(|_| ())
            .map_err(|_would_cycle| DagError::CycleDetected {
                from: source_task.to_string(),
                target: target_task.to_string(),
            })
    }

    pub fn member_count(&self) -> u32 {
        self.member_count
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.dag
            .raw_nodes()
            .iter()
            .map(|node| node.weight.task_id)
            .collect()
    }

    pub fn vertex_tasks(&self, vertex_id: VertexId) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self
            .dag
            .raw_nodes()
            .iter()
            .map(|node| node.weight.task_id)
            .filter(|task_id| task_id.vertex_id() == vertex_id)
            .collect();
        tasks.sort_by_key(|task_id| task_id.task_number());
        tasks
    }

    pub fn member_of(&self, task_id: &TaskId) -> MemberIndex {
        let node_index = self.task_indies[task_id];
        self.dag.index(node_index).member
    }

    pub fn tasks_on_member(&self, member: MemberIndex) -> Vec<TaskId> {
        self.dag
            .raw_nodes()
            .iter()
            .filter(|node| node.weight.member == member)
            .map(|node| node.weight.task_id)
            .collect()
    }

    /// producer tasks feeding `task_id`
    pub fn upstream_of(&self, task_id: &TaskId) -> Vec<TaskId> {
        let node_index = self.task_indies[task_id];
        self.dag
            .parents(node_index)
            .iter(&self.dag)
            .map(|(_edge, parent_index)| self.dag.index(parent_index).task_id)
            .collect()
    }

    /// (edge kind, consumer tasks) per outgoing task-level edge group,
    /// grouped by target vertex
    pub fn downstream_of(&self, task_id: &TaskId) -> Vec<(ExecutionEdge, Vec<TaskId>)> {
        let node_index = self.task_indies[task_id];
        let mut grouped: HashMap<(VertexId, ExecutionEdge), Vec<TaskId>> = HashMap::new();
        for (edge_index, child_index) in self.dag.children(node_index).iter(&self.dag) {
            let edge = *self.dag.index(edge_index);
            let child = self.dag.index(child_index).task_id;
            grouped
                .entry((child.vertex_id(), edge))
                .or_insert_with(Vec::new)
                .push(child);
        }

        let mut groups: Vec<((VertexId, ExecutionEdge), Vec<TaskId>)> =
            grouped.into_iter().collect();
        groups.sort_by_key(|((vertex_id, _), _)| *vertex_id);
        groups
            .into_iter()
            .map(|((_, edge), mut tasks)| {
                tasks.sort_by_key(|task_id| task_id.task_number());
                (edge, tasks)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::runtime::{MemberIndex, TaskId, VertexId};
    use crate::dag::execution_graph::{ExecutionEdge, ExecutionGraph};
    use crate::dag::{Dag, Edge, ShufflePolicy, Vertex};
    use crate::runtime::task::test_support::NoopProcessor;

    fn two_vertex_dag(source_parallelism: u16, sink_parallelism: u16) -> Dag {
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new(
            "source",
            source_parallelism,
            Arc::new(|_| Box::new(NoopProcessor)),
        ))
        .unwrap();
        dag.add_vertex(Vertex::new(
            "sink",
            sink_parallelism,
            Arc::new(|_| Box::new(NoopProcessor)),
        ))
        .unwrap();
        dag.add_edge(Edge::new("source", "sink", ShufflePolicy::Hash))
            .unwrap();
        dag
    }

    #[test]
    pub fn member_assignment_test() {
        let dag = two_vertex_dag(4, 4);
        let graph = ExecutionGraph::build(&dag, 2).unwrap();

        assert_eq!(graph.task_ids().len(), 8);
        assert_eq!(graph.tasks_on_member(MemberIndex(0)).len(), 4);
        assert_eq!(graph.tasks_on_member(MemberIndex(1)).len(), 4);

        // deterministic: task_number % member_count
        let task = TaskId::new(VertexId(0), 3, 4);
        assert_eq!(graph.member_of(&task), MemberIndex(1));
    }

    #[test]
    pub fn hash_edge_expansion_test() {
        let dag = two_vertex_dag(2, 3);
        let graph = ExecutionGraph::build(&dag, 2).unwrap();

        let source_task = TaskId::new(VertexId(0), 0, 2);
        let downstream = graph.downstream_of(&source_task);
        assert_eq!(downstream.len(), 1);
        let (edge, consumers) = &downstream[0];
        assert_eq!(*edge, ExecutionEdge::Hash);
        assert_eq!(consumers.len(), 3);

        let sink_task = TaskId::new(VertexId(1), 1, 3);
        assert_eq!(graph.upstream_of(&sink_task).len(), 2);
    }

    #[test]
    pub fn forward_edge_expansion_test() {
        let mut dag = Dag::new();
        dag.add_vertex(Vertex::new("a", 2, Arc::new(|_| Box::new(NoopProcessor))))
            .unwrap();
        dag.add_vertex(Vertex::new("b", 2, Arc::new(|_| Box::new(NoopProcessor))))
            .unwrap();
        dag.add_edge(Edge::new("a", "b", ShufflePolicy::Forward))
            .unwrap();

        let graph = ExecutionGraph::build(&dag, 1).unwrap();
        let task = TaskId::new(VertexId(0), 1, 2);
        let downstream = graph.downstream_of(&task);
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].1, vec![TaskId::new(VertexId(1), 1, 2)]);
    }
}
