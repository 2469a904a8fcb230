//! Percentage rollout evaluation.
use rand::{thread_rng, RngCore};

use crate::FlagMetadata;

/// Number of buckets targets are spread across. One percent of rollout covers 100 buckets.
pub(crate) const TOTAL_BUCKETS: u64 = 10_000;

pub(crate) trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
pub(crate) struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as u64) % total_shards
    }
}

impl FlagMetadata {
    /// Evaluate the flag for `target_id` locally.
    ///
    /// A disabled flag is always `false`. A flag without rollout configuration (either the
    /// percentage or the seed is missing) is simply `is_enabled`. Otherwise the target is hashed
    /// together with the flag key and seed into one of 10,000 buckets and is enabled if the bucket
    /// falls under the rollout percentage.
    ///
    /// The same target always gets the same answer for the same flag and seed. Without a target,
    /// a random identifier is used, so the result is not sticky.
    pub fn evaluate(&self, target_id: Option<&str>) -> bool {
        self.evaluate_with_sharder(target_id, &Md5Sharder)
    }

    pub(crate) fn evaluate_with_sharder(
        &self,
        target_id: Option<&str>,
        sharder: &impl Sharder,
    ) -> bool {
        if !self.is_enabled {
            return false;
        }

        let (Some(percentage), Some(seed)) = (self.rollout_percentage, &self.rollout_seed) else {
            return self.is_enabled;
        };

        let target = match target_id {
            Some(target_id) => target_id.to_owned(),
            None => random_target(),
        };

        let bucket = sharder.get_shard(
            format!("{}-{}-{}", target, self.key, seed),
            TOTAL_BUCKETS,
        );
        let threshold = (percentage.clamp(0.0, 100.0) * (TOTAL_BUCKETS / 100) as f64) as u64;

        bucket < threshold
    }
}

fn random_target() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
pub(crate) struct DeterministicSharder(pub std::collections::HashMap<String, u64>);

#[cfg(test)]
impl Sharder for DeterministicSharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let input = String::from_utf8_lossy(input.as_ref());
        self.0.get(&*input).copied().unwrap_or(0) % total_shards
    }
}
