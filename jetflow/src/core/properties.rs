use std::collections::HashMap;
use std::str::FromStr;

use crate::memory::ByteOrder;

pub const CHUNK_SIZE: &'static str = "chunk.size";
pub const CHANNEL_SIZE: &'static str = "channel.size";
pub const MEMORY_BLOCK_SIZE: &'static str = "memory.block.size";
pub const MEMORY_CAPACITY_BLOCKS: &'static str = "memory.capacity.blocks";
pub const MEMORY_BYTE_ORDER: &'static str = "memory.byte.order";

const DEFAULT_CHUNK_SIZE: usize = 256;
const DEFAULT_CHANNEL_SIZE: usize = 4096;
const DEFAULT_MEMORY_BLOCK_SIZE: usize = 8 * 1024;
const DEFAULT_MEMORY_CAPACITY_BLOCKS: usize = 1024;

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Properties {
    name: String,
    properties: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties {
            name: "".to_string(),
            properties: HashMap::new(),
        }
    }

    pub fn named(name: &str) -> Self {
        Properties {
            name: name.to_string(),
            properties: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    pub fn set_string(&mut self, key: String, value: String) {
        self.properties.insert(key, value);
    }

    pub fn get_string(&self, key: &str) -> anyhow::Result<String> {
        match self.properties.get(key) {
            Some(v) => Ok(v.clone()),
            None => Err(anyhow!("`{}` field not found", key)),
        }
    }

    pub fn set_usize(&mut self, key: &str, value: usize) {
        self.set_string(key.to_string(), value.to_string());
    }

    pub fn get_usize(&self, key: &str) -> anyhow::Result<usize> {
        match self.properties.get(key) {
            Some(v) => usize::from_str(v).map_err(|e| anyhow!(e)),
            None => Err(anyhow!("`{}` field not found", key)),
        }
    }

    pub fn set_u32(&mut self, key: &str, value: u32) {
        self.set_string(key.to_string(), value.to_string());
    }

    pub fn get_u32(&self, key: &str) -> anyhow::Result<u32> {
        match self.properties.get(key) {
            Some(v) => u32::from_str(v).map_err(|e| anyhow!(e)),
            None => Err(anyhow!("`{}` field not found", key)),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!(e))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| anyhow!(e))
    }

    pub fn chunk_size(&self) -> usize {
        self.get_usize(CHUNK_SIZE).unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn channel_size(&self) -> usize {
        self.get_usize(CHANNEL_SIZE).unwrap_or(DEFAULT_CHANNEL_SIZE)
    }

    pub fn memory_block_size(&self) -> usize {
        self.get_usize(MEMORY_BLOCK_SIZE)
            .unwrap_or(DEFAULT_MEMORY_BLOCK_SIZE)
    }

    pub fn memory_capacity_blocks(&self) -> usize {
        self.get_usize(MEMORY_CAPACITY_BLOCKS)
            .unwrap_or(DEFAULT_MEMORY_CAPACITY_BLOCKS)
    }

    pub fn memory_byte_order(&self) -> anyhow::Result<ByteOrder> {
        match self.get_string(MEMORY_BYTE_ORDER) {
            Ok(v) => match v.to_ascii_lowercase().as_str() {
                "big" => Ok(ByteOrder::BigEndian),
                "little" => Ok(ByteOrder::LittleEndian),
                _ => Err(anyhow!("unsupported byte order `{}`", v)),
            },
            Err(_) => Ok(ByteOrder::BigEndian),
        }
    }
}
