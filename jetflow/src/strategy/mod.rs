//! record routing: a partitioning strategy extracts the partition key, a
//! hashing strategy turns the key into an integer, and the calculation
//! strategy composes both for one job.

use std::borrow::Cow;
use std::sync::Arc;

use crate::core::element::Record;
use crate::runtime::job::context::JobContext;
use crate::utils::hash::hash_code;

pub trait PartitioningStrategy: Send + Sync {
    /// serialized partition key of the record
    fn partition_key<'a>(&self, record: &'a Record) -> Cow<'a, [u8]>;

    fn name(&self) -> &'static str;
}

pub trait HashingStrategy: Send + Sync {
    fn hash(&self, record: &Record, partition_key: &[u8]) -> u32;

    fn name(&self) -> &'static str;
}

/// the whole serialized row is the partition key
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultPartitioningStrategy;

impl PartitioningStrategy for DefaultPartitioningStrategy {
    fn partition_key<'a>(&self, record: &'a Record) -> Cow<'a, [u8]> {
        Cow::Borrowed(record.values())
    }

    fn name(&self) -> &'static str {
        "DefaultPartitioningStrategy"
    }
}

/// hashes the serialized key bytes. a record that arrived in pre-serialized
/// wire form carries its hash already, which is reused instead of re-hashing
#[derive(Copy, Clone, Debug, Default)]
pub struct SerializedHashingStrategy;

impl HashingStrategy for SerializedHashingStrategy {
    fn hash(&self, record: &Record, partition_key: &[u8]) -> u32 {
        match record.partition_hash() {
            Some(hash) => hash,
            None => hash_code(partition_key).expect("hash of in-memory bytes"),
        }
    }

    fn name(&self) -> &'static str {
        "SerializedHashingStrategy"
    }
}

/// joins a partitioning strategy and a hashing strategy for one job.
///
/// strategies are injected values, never process-wide singletons.
#[derive(Clone)]
pub struct CalculationStrategy {
    hashing_strategy: Arc<dyn HashingStrategy>,
    partitioning_strategy: Arc<dyn PartitioningStrategy>,
    job_context: Arc<JobContext>,
}

impl CalculationStrategy {
    pub fn new(
        hashing_strategy: Arc<dyn HashingStrategy>,
        partitioning_strategy: Arc<dyn PartitioningStrategy>,
        job_context: Arc<JobContext>,
    ) -> Self {
        CalculationStrategy {
            hashing_strategy,
            partitioning_strategy,
            job_context,
        }
    }

    pub fn hashing_strategy(&self) -> &Arc<dyn HashingStrategy> {
        &self.hashing_strategy
    }

    pub fn partitioning_strategy(&self) -> &Arc<dyn PartitioningStrategy> {
        &self.partitioning_strategy
    }

    pub fn hash(&self, record: &Record) -> u32 {
        let partition_key = self.partitioning_strategy.partition_key(record);
        self.hashing_strategy.hash(record, partition_key.as_ref())
    }

    /// destination partition in `[0, partition_count)`
    pub fn partition(&self, record: &Record, partition_count: usize) -> usize {
        self.hash(record) as usize % partition_count
    }
}

impl PartialEq for CalculationStrategy {
    fn eq(&self, other: &Self) -> bool {
        self.hashing_strategy.name() == other.hashing_strategy.name()
            && self.partitioning_strategy.name() == other.partitioning_strategy.name()
            && Arc::ptr_eq(&self.job_context, &other.job_context)
    }
}

impl Eq for CalculationStrategy {}

impl std::fmt::Debug for CalculationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CalculationStrategy({}, {}, job={})",
            self.hashing_strategy.name(),
            self.partitioning_strategy.name(),
            self.job_context.job_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::element::Record;
    use crate::core::properties::Properties;
    use crate::runtime::job::context::JobContext;
    use crate::strategy::{
        CalculationStrategy, DefaultPartitioningStrategy, HashingStrategy,
        SerializedHashingStrategy,
    };
    use crate::utils::hash::hash_code;

    fn calculation_strategy(job_context: Arc<JobContext>) -> CalculationStrategy {
        CalculationStrategy::new(
            Arc::new(SerializedHashingStrategy),
            Arc::new(DefaultPartitioningStrategy),
            job_context,
        )
    }

    #[test]
    pub fn precomputed_hash_reuse_test() {
        let mut record = Record::from_i64(7);
        assert_eq!(
            SerializedHashingStrategy.hash(&record, record.values()),
            hash_code(record.values()).unwrap()
        );

        record.set_partition_hash(12345);
        assert_eq!(SerializedHashingStrategy.hash(&record, record.values()), 12345);
    }

    #[test]
    pub fn equality_test() {
        let context_a = Arc::new(JobContext::new("job-a", Properties::new()));
        let context_b = Arc::new(JobContext::new("job-b", Properties::new()));

        assert_eq!(
            calculation_strategy(context_a.clone()),
            calculation_strategy(context_a.clone())
        );
        assert_ne!(
            calculation_strategy(context_a),
            calculation_strategy(context_b)
        );
    }

    #[test]
    pub fn partition_range_test() {
        let context = Arc::new(JobContext::new("job", Properties::new()));
        let strategy = calculation_strategy(context);

        for i in 0..1000i64 {
            let record = Record::from_i64(i);
            let partition = strategy.partition(&record, 16);
            assert!(partition < 16);
        }
    }
}
