use std::ops::Deref;

use bytes::{Buf, BufMut, BytesMut};

use crate::core::element::Serde;

#[derive(
    Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Default, Ord, PartialOrd,
)]
pub struct VertexId(pub u32);

impl Deref for VertexId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// index of a member within the cluster view, dense from zero
#[derive(
    Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Default, Ord, PartialOrd,
)]
pub struct MemberIndex(pub u32);

impl Deref for MemberIndex {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// one cluster member as seen by the excluded membership layer
#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash)]
pub struct Member {
    pub index: MemberIndex,
    /// cluster-level address, opaque to this core
    pub address: String,
}

impl Member {
    pub fn new(index: u32, address: impl Into<String>) -> Self {
        Member {
            index: MemberIndex(index),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member-{}({})", self.index.0, self.address)
    }
}

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Hash, Default)]
pub struct TaskId {
    pub(crate) vertex_id: VertexId,
    /// ordinal of this task within the vertex
    pub(crate) task_number: u16,
    /// total number of tasks of the vertex. same as `parallelism`
    pub(crate) num_tasks: u16,
}

impl TaskId {
    pub fn new(vertex_id: VertexId, task_number: u16, num_tasks: u16) -> Self {
        TaskId {
            vertex_id,
            task_number,
            num_tasks,
        }
    }

    pub fn vertex_id(&self) -> VertexId {
        self.vertex_id
    }

    pub fn task_number(&self) -> u16 {
        self.task_number
    }

    pub fn num_tasks(&self) -> u16 {
        self.num_tasks
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vertex:{}({}/{})",
            self.vertex_id.0, self.task_number, self.num_tasks
        )
    }
}

impl Serde for TaskId {
    fn capacity(&self) -> usize {
        4 + 2 + 2
    }

    fn serialize(&self, bytes: &mut BytesMut) {
        bytes.put_u32(self.vertex_id.0);
        bytes.put_u16(self.task_number);
        bytes.put_u16(self.num_tasks);
    }

    fn deserialize(bytes: &mut BytesMut) -> Self {
        let vertex_id = bytes.get_u32();
        let task_number = bytes.get_u16();
        let num_tasks = bytes.get_u16();
        TaskId {
            vertex_id: VertexId(vertex_id),
            task_number,
            num_tasks,
        }
    }
}

/// lifecycle of one job as driven by the job manager
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum JobState {
    Created = 0,
    BuildingExecutionPlan = 1,
    ExecutionPlanReady = 2,
    Executing = 3,
    Completed = 4,
    Failed = 5,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        match self {
            JobState::Completed | JobState::Failed => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Created => write!(f, "Created"),
            JobState::BuildingExecutionPlan => write!(f, "BuildingExecutionPlan"),
            JobState::ExecutionPlanReady => write!(f, "ExecutionPlanReady"),
            JobState::Executing => write!(f, "Executing"),
            JobState::Completed => write!(f, "Completed"),
            JobState::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::core::element::Serde;
    use crate::core::runtime::{JobState, TaskId, VertexId};

    #[test]
    pub fn task_id_serde_test() {
        let task_id = TaskId::new(VertexId(7), 3, 8);

        let mut bytes = BytesMut::with_capacity(task_id.capacity());
        task_id.serialize(&mut bytes);
        assert_eq!(bytes.len(), task_id.capacity());

        let de = TaskId::deserialize(&mut bytes);
        assert_eq!(de, task_id);
    }

    #[test]
    pub fn terminal_state_test() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Executing.is_terminal());
    }
}
