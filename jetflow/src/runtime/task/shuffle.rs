use std::sync::Arc;

use crate::channel::{ElementSender, TrySendError};
use crate::core::element::{Element, Record};
use crate::core::runtime::TaskId;
use crate::net::{Packet, WriterControl};
use crate::runtime::task::{Consumer, IoBuffer};
use crate::strategy::CalculationStrategy;

/// where one target task of an edge lives
pub enum TargetRoute {
    /// same member, delivered through the task's input channel
    Local {
        task_id: TaskId,
        sender: ElementSender,
    },
    /// remote member, delivered through that member's socket writer
    Remote {
        task_id: TaskId,
        writer: Arc<WriterControl>,
    },
}

impl TargetRoute {
    fn try_deliver(&self, element: Element) -> Result<(), ()> {
        match self {
            TargetRoute::Local { sender, .. } => {
                sender.try_send(element).map_err(|_full| ())
            }
            TargetRoute::Remote { task_id, writer } => writer
                .try_send_element(Packet::Element {
                    target_task_id: *task_id,
                    element,
                })
                .map_err(|_full| ()),
        }
    }
}

/// hash-partitioning consumer of a shuffle edge: every record is routed to
/// exactly one target task, local or remote, chosen by the calculation
/// strategy. consumption resumes where the previous attempt stopped.
pub struct ShuffleConsumer {
    routes: Vec<TargetRoute>,
    strategy: CalculationStrategy,
    cursor: usize,
    flushed: bool,
    stream_end_cursor: usize,
}

impl ShuffleConsumer {
    pub fn new(routes: Vec<TargetRoute>, strategy: CalculationStrategy) -> Self {
        ShuffleConsumer {
            routes,
            strategy,
            cursor: 0,
            flushed: true,
            stream_end_cursor: 0,
        }
    }

    fn route_of(&self, record: &Record) -> (usize, u32) {
        let hash = self.strategy.hash(record);
        (hash as usize % self.routes.len(), hash)
    }
}

impl Consumer for ShuffleConsumer {
    fn open(&mut self) {
        self.cursor = 0;
        self.stream_end_cursor = 0;
        self.flushed = true;
    }

    fn consume(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<usize> {
        let start = self.cursor;
        while self.cursor < chunk.size() {
            let record = chunk.get(self.cursor);
            let (route_index, hash) = self.route_of(record);

            let mut outgoing = record.clone();
            outgoing.set_partition_hash(hash);

            match self.routes[route_index].try_deliver(Element::new_record(outgoing)) {
                Ok(()) => self.cursor += 1,
                Err(()) => break,
            }
        }

        self.flushed = self.cursor == chunk.size();
        let consumed = self.cursor - start;
        if self.flushed {
            self.cursor = 0;
        }
        Ok(consumed)
    }

    fn is_flushed(&self) -> bool {
        self.flushed
    }

    fn send_stream_end(&mut self, source_task_id: TaskId) -> anyhow::Result<bool> {
        while self.stream_end_cursor < self.routes.len() {
            let route = &self.routes[self.stream_end_cursor];
            match route.try_deliver(Element::new_stream_end(source_task_id)) {
                Ok(()) => self.stream_end_cursor += 1,
                Err(()) => return Ok(false),
            }
        }
        Ok(true)
    }

    fn is_shuffled(&self) -> bool {
        true
    }

    fn close(&mut self) {
        // shuffled consumers are closed by the owning shuffle component
    }
}

/// local forward consumer: task i feeds task i of the target vertex on the
/// same member
pub struct ForwardConsumer {
    target: TargetRoute,
    cursor: usize,
    flushed: bool,
    stream_end_sent: bool,
}

impl ForwardConsumer {
    pub fn new(task_id: TaskId, sender: ElementSender) -> Self {
        ForwardConsumer {
            target: TargetRoute::Local { task_id, sender },
            cursor: 0,
            flushed: true,
            stream_end_sent: false,
        }
    }
}

impl Consumer for ForwardConsumer {
    fn open(&mut self) {
        self.cursor = 0;
        self.flushed = true;
        self.stream_end_sent = false;
    }

    fn consume(&mut self, chunk: &IoBuffer<Record>) -> anyhow::Result<usize> {
        let start = self.cursor;
        while self.cursor < chunk.size() {
            let record = chunk.get(self.cursor).clone();
            match self.target.try_deliver(Element::new_record(record)) {
                Ok(()) => self.cursor += 1,
                Err(()) => break,
            }
        }

        self.flushed = self.cursor == chunk.size();
        let consumed = self.cursor - start;
        if self.flushed {
            self.cursor = 0;
        }
        Ok(consumed)
    }

    fn is_flushed(&self) -> bool {
        self.flushed
    }

    fn send_stream_end(&mut self, source_task_id: TaskId) -> anyhow::Result<bool> {
        if self.stream_end_sent {
            return Ok(true);
        }
        match self
            .target
            .try_deliver(Element::new_stream_end(source_task_id))
        {
            Ok(()) => {
                self.stream_end_sent = true;
                Ok(true)
            }
            Err(()) => Ok(false),
        }
    }

    fn is_shuffled(&self) -> bool {
        false
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::channel::named_channel;
    use crate::core::element::Record;
    use crate::core::properties::Properties;
    use crate::core::runtime::{TaskId, VertexId};
    use crate::runtime::job::context::JobContext;
    use crate::runtime::task::shuffle::{ShuffleConsumer, TargetRoute};
    use crate::runtime::task::{Consumer, IoBuffer};
    use crate::strategy::{
        CalculationStrategy, DefaultPartitioningStrategy, SerializedHashingStrategy,
    };

    fn strategy() -> CalculationStrategy {
        CalculationStrategy::new(
            Arc::new(SerializedHashingStrategy),
            Arc::new(DefaultPartitioningStrategy),
            Arc::new(JobContext::new("shuffle-test", Properties::new())),
        )
    }

    #[test]
    pub fn partial_consume_resume_test() {
        // a single local target with capacity 2 forces partial consumption
        let (sender, receiver) = named_channel("shuffle", 2);
        let routes = vec![TargetRoute::Local {
            task_id: TaskId::new(VertexId(1), 0, 1),
            sender,
        }];
        let mut consumer = ShuffleConsumer::new(routes, strategy());

        let mut chunk = IoBuffer::new(4);
        for i in 0..4i64 {
            chunk.append(Record::from_i64(i)).unwrap();
        }

        assert_eq!(consumer.consume(&chunk).unwrap(), 2);
        assert!(!consumer.is_flushed());

        // drain and resume the same chunk
        receiver.try_recv().unwrap();
        receiver.try_recv().unwrap();
        assert_eq!(consumer.consume(&chunk).unwrap(), 2);
        assert!(consumer.is_flushed());
    }

    #[test]
    pub fn routing_is_hash_stable_test() {
        let (sender_a, receiver_a) = named_channel("a", 64);
        let (sender_b, receiver_b) = named_channel("b", 64);
        let routes = vec![
            TargetRoute::Local {
                task_id: TaskId::new(VertexId(1), 0, 2),
                sender: sender_a,
            },
            TargetRoute::Local {
                task_id: TaskId::new(VertexId(1), 1, 2),
                sender: sender_b,
            },
        ];
        let mut consumer = ShuffleConsumer::new(routes, strategy());

        let mut chunk = IoBuffer::new(32);
        for i in 0..16i64 {
            // same value twice: both copies must land on the same target
            chunk.append(Record::from_i64(i % 8)).unwrap();
            chunk.append(Record::from_i64(i % 8)).unwrap();
        }
        consumer.consume(&chunk).unwrap();
        assert!(consumer.is_flushed());

        let mut drained = 0;
        let mut target_of = std::collections::HashMap::new();
        for (route_index, receiver) in [&receiver_a, &receiver_b].iter().enumerate() {
            while let Ok(element) = receiver.try_recv() {
                drained += 1;
                let value = element.as_record().as_i64();
                // a value never splits across targets
                if let Some(previous) = target_of.insert(value, route_index) {
                    assert_eq!(previous, route_index);
                }
            }
        }
        assert_eq!(drained, 32);
    }
}
