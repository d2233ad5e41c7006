//! chunked transfer of job resources: a resource is uploaded as a sequence
//! of bounded chunks and reassembled in sequence order once deployment
//! finishes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use bytes::{Buf, BufMut, BytesMut};

use crate::core::element::Serde;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    Data = 1,
    Archive = 2,
}

impl ResourceKind {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ResourceKind::Data,
            2 => ResourceKind::Archive,
            _ => panic!("unrecognized resource kind {}", v),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct ResourceDescriptor {
    name: String,
    kind: ResourceKind,
}

impl ResourceDescriptor {
    pub fn new(name: &str, kind: ResourceKind) -> Self {
        ResourceDescriptor {
            name: name.to_string(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Serde for ResourceDescriptor {
    fn capacity(&self) -> usize {
        2 + self.name.len() + 1
    }

    fn serialize(&self, bytes: &mut BytesMut) {
        bytes.put_u16(self.name.len() as u16);
        bytes.put_slice(self.name.as_bytes());
        bytes.put_u8(self.kind as u8);
    }

    fn deserialize(bytes: &mut BytesMut) -> Self {
        let name_len = bytes.get_u16() as usize;
        let name_bytes = bytes.split_to(name_len);
        let name = String::from_utf8(name_bytes.to_vec()).expect("utf8 resource name");
        let kind = ResourceKind::from_u8(bytes.get_u8());
        ResourceDescriptor { name, kind }
    }
}

/// one deployment-resource transfer unit. wire field order:
/// bytes, descriptor, length, chunk_size, sequence
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    bytes: Vec<u8>,
    descriptor: ResourceDescriptor,
    length: i32,
    chunk_size: i32,
    sequence: i32,
}

impl Chunk {
    pub fn new(
        bytes: Vec<u8>,
        descriptor: ResourceDescriptor,
        chunk_size: i32,
        sequence: i32,
    ) -> Self {
        let length = bytes.len() as i32;
        Chunk {
            bytes,
            descriptor,
            length,
            chunk_size,
            sequence,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    pub fn chunk_size(&self) -> i32 {
        self.chunk_size
    }

    pub fn sequence(&self) -> i32 {
        self.sequence
    }
}

impl Serde for Chunk {
    fn capacity(&self) -> usize {
        4 + self.bytes.len() + self.descriptor.capacity() + 4 + 4 + 4
    }

    fn serialize(&self, bytes: &mut BytesMut) {
        bytes.put_u32(self.bytes.len() as u32);
        bytes.put_slice(&self.bytes);
        self.descriptor.serialize(bytes);
        bytes.put_i32(self.length);
        bytes.put_i32(self.chunk_size);
        bytes.put_i32(self.sequence);
    }

    fn deserialize(bytes: &mut BytesMut) -> Self {
        let payload_len = bytes.get_u32() as usize;
        let payload = bytes.split_to(payload_len).to_vec();
        let descriptor = ResourceDescriptor::deserialize(bytes);
        let length = bytes.get_i32();
        let chunk_size = bytes.get_i32();
        let sequence = bytes.get_i32();
        Chunk {
            bytes: payload,
            descriptor,
            length,
            chunk_size,
            sequence,
        }
    }
}

struct ResourceAssembly {
    kind: ResourceKind,
    chunks: BTreeMap<i32, Vec<u8>>,
    finished: bool,
}

/// per-job store reassembling deployed resources from their chunks
pub struct DeploymentStore {
    assemblies: Mutex<HashMap<String, ResourceAssembly>>,
}

impl DeploymentStore {
    pub fn new() -> Self {
        DeploymentStore {
            assemblies: Mutex::new(HashMap::new()),
        }
    }

    pub fn apply_chunk(&self, chunk: Chunk) -> anyhow::Result<()> {
        let mut assemblies = self.assemblies.lock().unwrap();
        let assembly = assemblies
            .entry(chunk.descriptor.name.clone())
            .or_insert_with(|| ResourceAssembly {
                kind: chunk.descriptor.kind,
                chunks: BTreeMap::new(),
                finished: false,
            });
        if assembly.finished {
            return Err(anyhow!(
                "resource `{}` deployment already finished",
                chunk.descriptor.name
            ));
        }
        let valid = chunk.length.max(0) as usize;
        let mut payload = chunk.bytes;
        payload.truncate(valid);
        assembly.chunks.insert(chunk.sequence, payload);
        Ok(())
    }

    pub fn finish(&self) -> anyhow::Result<()> {
        let mut assemblies = self.assemblies.lock().unwrap();
        for (name, assembly) in assemblies.iter_mut() {
            assembly.finished = true;
            debug!(
                "resource `{}` ({:?}) finished with {} chunks",
                name,
                assembly.kind,
                assembly.chunks.len()
            );
        }
        Ok(())
    }

    /// reassembled resource bytes, available after finish
    pub fn resource(&self, name: &str) -> Option<Vec<u8>> {
        let assemblies = self.assemblies.lock().unwrap();
        let assembly = assemblies.get(name)?;
        if !assembly.finished {
            return None;
        }
        let mut out = Vec::new();
        for payload in assembly.chunks.values() {
            out.extend_from_slice(payload);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::core::element::Serde;
    use crate::runtime::job::deployment::{
        Chunk, DeploymentStore, ResourceDescriptor, ResourceKind,
    };

    #[test]
    pub fn chunk_wire_round_trip_test() {
        let chunk = Chunk::new(
            vec![1, 2, 3, 4, 5],
            ResourceDescriptor::new("libworld", ResourceKind::Archive),
            1024,
            7,
        );

        let mut bytes = BytesMut::with_capacity(chunk.capacity());
        chunk.serialize(&mut bytes);
        assert_eq!(bytes.len(), chunk.capacity());

        let de = Chunk::deserialize(&mut bytes);
        assert_eq!(de, chunk);
        assert_eq!(de.length(), 5);
        assert_eq!(de.chunk_size(), 1024);
        assert_eq!(de.sequence(), 7);
    }

    #[test]
    pub fn store_reassembles_in_sequence_order_test() {
        let store = DeploymentStore::new();
        let descriptor = ResourceDescriptor::new("data", ResourceKind::Data);

        // out-of-order upload
        store
            .apply_chunk(Chunk::new(b"world".to_vec(), descriptor.clone(), 5, 1))
            .unwrap();
        store
            .apply_chunk(Chunk::new(b"hello ".to_vec(), descriptor.clone(), 6, 0))
            .unwrap();

        assert_eq!(store.resource("data"), None);
        store.finish().unwrap();
        assert_eq!(store.resource("data").unwrap(), b"hello world".to_vec());

        // further chunks after finish are rejected
        assert!(store
            .apply_chunk(Chunk::new(b"!".to_vec(), descriptor, 1, 2))
            .is_err());
    }
}
