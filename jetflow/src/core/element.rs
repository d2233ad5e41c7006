use std::cmp::Ordering;

use bytes::{Buf, BufMut, BytesMut};

use crate::core::runtime::TaskId;

/// binary layout owned by this crate. all multi-byte fields are big-endian
/// on the wire regardless of the memory byte-order configured for blocks.
pub trait Serde: Sized {
    fn capacity(&self) -> usize;
    fn serialize(&self, bytes: &mut BytesMut);
    fn deserialize(bytes: &mut BytesMut) -> Self;
}

/// a serialized row flowing through the pipeline.
///
/// `partition_hash` is carried when the record arrived in pre-serialized wire
/// form; the hashing strategy reuses it instead of re-hashing the key.
#[derive(Clone, Debug, Default)]
pub struct Record {
    pub(crate) partition_hash: Option<u32>,
    pub(crate) values: BytesMut,
}

impl Record {
    pub fn new() -> Self {
        Record {
            partition_hash: None,
            values: BytesMut::new(),
        }
    }

    pub fn from_slice(values: &[u8]) -> Self {
        Record {
            partition_hash: None,
            values: BytesMut::from(values),
        }
    }

    pub fn from_i64(v: i64) -> Self {
        let mut values = BytesMut::with_capacity(8);
        values.put_i64(v);
        Record {
            partition_hash: None,
            values,
        }
    }

    pub fn as_i64(&self) -> i64 {
        let mut buf = self.values.clone();
        buf.get_i64()
    }

    pub fn values(&self) -> &[u8] {
        self.values.as_ref()
    }

    pub fn partition_hash(&self) -> Option<u32> {
        self.partition_hash
    }

    pub fn set_partition_hash(&mut self, hash: u32) {
        self.partition_hash = Some(hash);
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values.as_ref().cmp(other.values.as_ref())
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Record {}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.values.as_ref().eq(other.values.as_ref())
    }
}

impl Serde for Record {
    fn capacity(&self) -> usize {
        1 + 4 + 4 + self.values.len()
    }

    fn serialize(&self, bytes: &mut BytesMut) {
        match self.partition_hash {
            Some(hash) => {
                bytes.put_u8(1);
                bytes.put_u32(hash);
            }
            None => {
                bytes.put_u8(0);
                bytes.put_u32(0);
            }
        }
        bytes.put_u32(self.values.len() as u32);
        bytes.put_slice(self.values.as_ref());
    }

    fn deserialize(bytes: &mut BytesMut) -> Self {
        let hash_flag = bytes.get_u8();
        let hash = bytes.get_u32();
        let len = bytes.get_u32() as usize;
        let values = bytes.split_to(len);
        Record {
            partition_hash: if hash_flag == 1 { Some(hash) } else { None },
            values,
        }
    }
}

/// end-of-stream marker emitted by a finalized producer task
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StreamEnd {
    pub(crate) source_task_id: TaskId,
}

impl StreamEnd {
    pub fn new(source_task_id: TaskId) -> Self {
        StreamEnd { source_task_id }
    }
}

/// unit moved through channels and the shuffle wire
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Element {
    Record(Record),
    StreamEnd(StreamEnd),
}

impl Element {
    pub fn new_record(record: Record) -> Self {
        Element::Record(record)
    }

    pub fn new_stream_end(source_task_id: TaskId) -> Self {
        Element::StreamEnd(StreamEnd::new(source_task_id))
    }

    pub fn is_record(&self) -> bool {
        match self {
            Element::Record(_) => true,
            _ => false,
        }
    }

    pub fn is_stream_end(&self) -> bool {
        match self {
            Element::StreamEnd(_) => true,
            _ => false,
        }
    }

    pub fn as_record(&self) -> &Record {
        match self {
            Element::Record(record) => record,
            _ => panic!("not a Record element"),
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Element::Record(record) => record,
            _ => panic!("not a Record element"),
        }
    }

    pub fn as_stream_end(&self) -> &StreamEnd {
        match self {
            Element::StreamEnd(stream_end) => stream_end,
            _ => panic!("not a StreamEnd element"),
        }
    }
}

const TAG_RECORD: u8 = 1;
const TAG_STREAM_END: u8 = 2;

impl Serde for Element {
    fn capacity(&self) -> usize {
        match self {
            Element::Record(record) => 1 + record.capacity(),
            Element::StreamEnd(stream_end) => 1 + stream_end.source_task_id.capacity(),
        }
    }

    fn serialize(&self, bytes: &mut BytesMut) {
        match self {
            Element::Record(record) => {
                bytes.put_u8(TAG_RECORD);
                record.serialize(bytes);
            }
            Element::StreamEnd(stream_end) => {
                bytes.put_u8(TAG_STREAM_END);
                stream_end.source_task_id.serialize(bytes);
            }
        }
    }

    fn deserialize(bytes: &mut BytesMut) -> Self {
        let tag = bytes.get_u8();
        match tag {
            TAG_RECORD => Element::Record(Record::deserialize(bytes)),
            TAG_STREAM_END => Element::StreamEnd(StreamEnd {
                source_task_id: TaskId::deserialize(bytes),
            }),
            _ => panic!("unrecognized element tag {}", tag),
        }
    }
}
