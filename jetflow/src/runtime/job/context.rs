use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::core::counter::{Accumulator, LongCounter};
use crate::core::properties::Properties;
use crate::memory::{ByteOrder, MemoryBlockPool, MemoryPool, MemoryType};
use crate::runtime::job::deployment::DeploymentStore;

/// per-job process-wide state on one member: configuration, the discovered
/// address mapping, the accumulator registry, the job's memory pools and the
/// deployment store. created at job init, destroyed with the job.
pub struct JobContext {
    job_name: String,
    properties: Properties,
    accumulators: DashMap<String, Arc<dyn Accumulator>>,
    memory_pool: Arc<MemoryPool>,
    block_pool: MemoryBlockPool,
    /// cluster-address -> job-local socket address. populated once during
    /// discovery, read-only afterwards
    address_map: RwLock<HashMap<String, SocketAddr>>,
    deployment_store: DeploymentStore,
}

impl JobContext {
    pub fn new(job_name: &str, properties: Properties) -> Self {
        let byte_order = properties.memory_byte_order().unwrap_or_else(|e| {
            warn!("job {}: {}. falling back to big endian", job_name, e);
            ByteOrder::BigEndian
        });
        let block_size = properties.memory_block_size();
        let capacity = block_size * properties.memory_capacity_blocks();

        let memory_pool = Arc::new(MemoryPool::new(capacity));
        let block_pool = MemoryBlockPool::new(
            block_size,
            byte_order,
            MemoryType::Heap,
            memory_pool.clone(),
        );

        JobContext {
            job_name: job_name.to_string(),
            properties,
            accumulators: DashMap::new(),
            memory_pool,
            block_pool,
            address_map: RwLock::new(HashMap::new()),
            deployment_store: DeploymentStore::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        self.job_name.as_str()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// get or register the job-scoped counter under `key`
    pub fn accumulator(&self, key: &str) -> Arc<dyn Accumulator> {
        self.accumulators
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(LongCounter::new()))
            .value()
            .clone()
    }

    /// read back a counter after job completion
    pub fn accumulator_value(&self, key: &str) -> Option<i64> {
        self.accumulators.get(key).map(|entry| entry.value().get())
    }

    pub fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.memory_pool
    }

    pub fn block_pool(&self) -> &MemoryBlockPool {
        &self.block_pool
    }

    /// record one member's job-local address. discovery only
    pub fn record_job_address(&self, cluster_address: String, job_address: SocketAddr) {
        self.address_map
            .write()
            .unwrap()
            .insert(cluster_address, job_address);
    }

    pub fn job_address(&self, cluster_address: &str) -> Option<SocketAddr> {
        self.address_map
            .read()
            .unwrap()
            .get(cluster_address)
            .copied()
    }

    pub fn deployment_store(&self) -> &DeploymentStore {
        &self.deployment_store
    }
}

#[cfg(test)]
mod tests {
    use crate::core::properties::Properties;
    use crate::runtime::job::context::JobContext;

    #[test]
    pub fn accumulator_registry_test() {
        let context = JobContext::new("registry-test", Properties::new());

        context.accumulator("records").add(3);
        context.accumulator("records").add(4);

        assert_eq!(context.accumulator_value("records"), Some(7));
        assert_eq!(context.accumulator_value("missing"), None);
    }

    #[test]
    pub fn block_pool_from_properties_test() {
        let mut properties = Properties::new();
        properties.set_usize(crate::core::properties::MEMORY_BLOCK_SIZE, 128);
        properties.set_usize(crate::core::properties::MEMORY_CAPACITY_BLOCKS, 2);

        let context = JobContext::new("pool-test", properties);
        let a = context.block_pool().acquire().unwrap();
        let _b = context.block_pool().acquire().unwrap();
        assert!(context.block_pool().acquire().is_err());
        context.block_pool().release(a);
        assert!(context.block_pool().acquire().is_ok());
    }
}
