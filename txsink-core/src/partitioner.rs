//! Destination partition selection.
//!
//! The partitioner is built once from configuration and passed to the serializer; it holds no
//! process-wide state and every call is a pure function of its inputs.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Partitioner {
    /// Leave the record without an explicit partition. The broker hashes the key, or spreads
    /// unkeyed records.
    BrokerDefault,
    /// Every record goes to the same partition.
    Fixed(i32),
    /// Partitions `0..assign_partitions.len()` are reserved for records whose value contains
    /// the marker at the same position. Everything else is hashed onto the remaining partitions.
    ContentBased {
        assign_partitions: Vec<String>,
        partition_count: i32,
    },
}

impl Partitioner {
    pub fn fixed(partition: i32) -> Result<Self> {
        if partition < 0 {
            return Err(Error::Config(format!(
                "partition must not be negative, got {partition}"
            )));
        }
        Ok(Partitioner::Fixed(partition))
    }

    pub fn content_based(assign_partitions: Vec<String>, partition_count: i32) -> Result<Self> {
        let reserved = assign_partitions.len();
        if reserved == 0 {
            return Err(Error::Config(
                "assign_partitions must name at least one marker".to_string(),
            ));
        }
        // at least one partition must remain for records matching no marker
        if i64::try_from(reserved).unwrap_or(i64::MAX) >= i64::from(partition_count) {
            return Err(Error::Config(format!(
                "assign_partitions reserves {reserved} partitions but the topic only has {partition_count}"
            )));
        }
        Ok(Partitioner::ContentBased {
            assign_partitions,
            partition_count,
        })
    }

    /// Returns the explicit partition for a record with the given value bytes, or `None` to defer
    /// to the broker.
    pub fn partition(&self, value: &[u8]) -> Option<i32> {
        match self {
            Partitioner::BrokerDefault => None,
            Partitioner::Fixed(partition) => Some(*partition),
            Partitioner::ContentBased {
                assign_partitions,
                partition_count,
            } => {
                let message = String::from_utf8_lossy(value);
                if let Some(idx) = assign_partitions
                    .iter()
                    .position(|marker| message.contains(marker.as_str()))
                {
                    return i32::try_from(idx).ok();
                }
                // validated at construction: reserved < partition_count
                let reserved = assign_partitions.len() as i32;
                let remaining = partition_count - reserved;
                Some(to_positive(murmur2(value)) % remaining + reserved)
            }
        }
    }
}

/// Default broker partitioning: murmur2 of the key for keyed records, round robin over
/// `unkeyed_sequence` otherwise. Exposed for broker implementations that must pick a partition
/// themselves.
pub fn default_partition(key: Option<&[u8]>, partition_count: i32, unkeyed_sequence: u64) -> i32 {
    if partition_count <= 0 {
        return 0;
    }
    match key {
        Some(key) => to_positive(murmur2(key)) % partition_count,
        None => (unkeyed_sequence % partition_count as u64) as i32,
    }
}

fn to_positive(n: i32) -> i32 {
    n & 0x7fff_ffff
}

/// 32-bit murmur2, bit compatible with the hash Kafka's default partitioner uses.
pub fn murmur2(data: &[u8]) -> i32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h: u32 = SEED ^ (data.len() as u32);
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let mut k = chunk
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    match *tail {
        [a, b, c] => {
            h ^= u32::from(c) << 16;
            h ^= u32::from(b) << 8;
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        [a, b] => {
            h ^= u32::from(b) << 8;
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        [a] => {
            h ^= u32::from(a);
            h = h.wrapping_mul(M);
        }
        _ => {}
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_matches_kafka() {
        assert_eq!(murmur2(b"21"), -973932308);
        assert_eq!(murmur2(b"foobar"), -790332482);
        assert_eq!(murmur2(b"a-little-bit-long-string"), -985981536);
        assert_eq!(murmur2(b"a-little-bit-longer-string"), -1486304829);
        assert_eq!(
            murmur2(b"lkjh234lh9fiuh90y23oiuhsafujhadof229phr9h19h89h8"),
            -58897971
        );
        assert_eq!(murmur2(b"abc"), 479470107);
    }

    #[test]
    fn test_fixed_partitioner() {
        let partitioner = Partitioner::fixed(3).unwrap();
        assert_eq!(partitioner.partition(b"anything"), Some(3));
        assert!(Partitioner::fixed(-1).is_err());
    }

    #[test]
    fn test_broker_default_defers() {
        assert_eq!(Partitioner::BrokerDefault.partition(b"value"), None);
    }

    #[test]
    fn test_content_based_markers_take_reserved_partitions() {
        let partitioner =
            Partitioner::content_based(vec!["shoe".to_string(), "clothing".to_string()], 6)
                .unwrap();
        assert_eq!(partitioner.partition(b"red shoe,42"), Some(0));
        assert_eq!(partitioner.partition(b"blue clothing,7"), Some(1));
        // first matching marker wins
        assert_eq!(partitioner.partition(b"shoe clothing"), Some(0));

        for value in [&b"hat"[..], b"scarf", b"glove", b""] {
            let partition = partitioner.partition(value).unwrap();
            assert!((2..6).contains(&partition), "{partition} out of range");
            // same input, same partition
            assert_eq!(partitioner.partition(value), Some(partition));
        }
    }

    #[test]
    fn test_content_based_needs_a_free_partition() {
        assert!(Partitioner::content_based(vec!["a".to_string(), "b".to_string()], 2).is_err());
        assert!(Partitioner::content_based(vec![], 2).is_err());
    }

    #[test]
    fn test_default_partition() {
        let keyed = default_partition(Some(b"foobar"), 4, 0);
        assert_eq!(keyed, to_positive(-790332482) % 4);
        assert_eq!(default_partition(Some(b"foobar"), 4, 99), keyed);
        assert_eq!(default_partition(None, 4, 0), 0);
        assert_eq!(default_partition(None, 4, 5), 1);
    }
}
