//! Engine configuration.

use strata_codec::{CompressorConfig, MIN_PATTERN_SCORE};

/// Names of the domains a node keeps by default.
pub const DEFAULT_DOMAINS: [&str; 4] = ["accounts", "storage", "code", "commitment"];

/// Per-domain settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfig {
    /// Domain name, also used in file and table names.
    pub name: String,
    /// B-tree branching factor: one separator every `btree_m` keys.
    pub btree_m: u32,
    /// Whether `prune` may delete this domain's old segments.
    pub prunable: bool,
}

impl DomainConfig {
    /// Creates a non-prunable domain with the default branching factor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            btree_m: 256,
            prunable: false,
        }
    }

    /// Sets the B-tree branching factor.
    #[must_use]
    pub fn btree_m(mut self, m: u32) -> Self {
        self.btree_m = m.max(1);
        self
    }

    /// Sets whether the domain has bounded retention.
    #[must_use]
    pub fn prunable(mut self, value: bool) -> Self {
        self.prunable = value;
        self
    }
}

/// Configuration for an [`Aggregator`](crate::Aggregator).
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// TxNums per step.
    pub step_size: u64,
    /// Threads for compression (per file and across domains).
    pub compress_workers: usize,
    /// Threads for index builds.
    pub index_workers: usize,
    /// Number of adjacent same-span segments merged into one.
    pub merge_fanout: u64,
    /// Largest span, in steps, a merge may produce.
    pub max_merge_steps: u64,
    /// Files (and hot-row batches of the same size × 1024) removed per
    /// `prune` call per domain.
    pub prune_batch: usize,
    /// Never prune past the step holding the last persisted commitment.
    pub require_commitment_before_prune: bool,
    /// Build the `vi`/`efi` indices as part of freeze and merge.
    pub build_optional_indices: bool,
    /// Codec tuning for every segment file.
    pub codec: CompressorConfig,
    /// Domains managed by the aggregator.
    pub domains: Vec<DomainConfig>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            step_size: 1_562_500,
            compress_workers: 1,
            index_workers: 2,
            merge_fanout: 2,
            max_merge_steps: 64,
            prune_batch: 8,
            require_commitment_before_prune: true,
            build_optional_indices: true,
            codec: CompressorConfig::default().min_pattern_score(MIN_PATTERN_SCORE),
            domains: DEFAULT_DOMAINS.iter().map(|&n| DomainConfig::new(n)).collect(),
        }
    }
}

impl AggregatorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of TxNums per step.
    #[must_use]
    pub const fn step_size(mut self, size: u64) -> Self {
        self.step_size = size;
        self
    }

    /// Sets the compression worker count.
    #[must_use]
    pub fn compress_workers(mut self, workers: usize) -> Self {
        self.compress_workers = workers.max(1);
        self.codec = self.codec.workers(self.compress_workers);
        self
    }

    /// Sets the index build worker count.
    #[must_use]
    pub const fn index_workers(mut self, workers: usize) -> Self {
        self.index_workers = workers;
        self
    }

    /// Sets the merge fanout.
    #[must_use]
    pub const fn merge_fanout(mut self, k: u64) -> Self {
        self.merge_fanout = k;
        self
    }

    /// Sets the largest merged span in steps.
    #[must_use]
    pub const fn max_merge_steps(mut self, steps: u64) -> Self {
        self.max_merge_steps = steps;
        self
    }

    /// Sets how many files one `prune` call may remove per domain.
    #[must_use]
    pub const fn prune_batch(mut self, n: usize) -> Self {
        self.prune_batch = n;
        self
    }

    /// Sets whether pruning waits for a persisted commitment.
    #[must_use]
    pub const fn require_commitment_before_prune(mut self, value: bool) -> Self {
        self.require_commitment_before_prune = value;
        self
    }

    /// Sets whether freeze and merge build the optional indices.
    #[must_use]
    pub const fn build_optional_indices(mut self, value: bool) -> Self {
        self.build_optional_indices = value;
        self
    }

    /// Sets the minimum dictionary pattern score.
    #[must_use]
    pub fn min_pattern_score(mut self, score: u64) -> Self {
        self.codec = self.codec.min_pattern_score(score);
        self
    }

    /// Replaces the domain list.
    #[must_use]
    pub fn domains(mut self, domains: Vec<DomainConfig>) -> Self {
        self.domains = domains;
        self
    }

    /// Applies `f` to the named domain's settings, if present.
    #[must_use]
    pub fn with_domain(mut self, name: &str, f: impl FnOnce(DomainConfig) -> DomainConfig) -> Self {
        if let Some(d) = self.domains.iter_mut().find(|d| d.name == name) {
            *d = f(d.clone());
        }
        self
    }
}

/// Configuration for [`RetireScheduler`](crate::RetireScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireConfig {
    /// Blocks per retirement batch; ranges are aligned to it.
    pub min_batch: u64,
    /// Blocks behind the execution head that may still be reorganized.
    pub immutability_threshold: u64,
    /// Retention in steps for prunable domains; `None` keeps everything.
    pub retention_steps: Option<u64>,
}

impl Default for RetireConfig {
    fn default() -> Self {
        Self {
            min_batch: 1_000,
            immutability_threshold: 90_000,
            retention_steps: None,
        }
    }
}

impl RetireConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn min_batch(mut self, blocks: u64) -> Self {
        self.min_batch = blocks;
        self
    }

    /// Sets the immutability threshold.
    #[must_use]
    pub const fn immutability_threshold(mut self, blocks: u64) -> Self {
        self.immutability_threshold = blocks;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn retention_steps(mut self, steps: Option<u64>) -> Self {
        self.retention_steps = steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AggregatorConfig::default();
        assert_eq!(config.merge_fanout, 2);
        assert_eq!(config.max_merge_steps, 64);
        assert!(config.require_commitment_before_prune);
        let names: Vec<_> = config.domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, DEFAULT_DOMAINS);
    }

    #[test]
    fn builder_pattern() {
        let config = AggregatorConfig::new()
            .step_size(16)
            .compress_workers(4)
            .merge_fanout(4)
            .with_domain("storage", |d| d.prunable(true).btree_m(0));

        assert_eq!(config.step_size, 16);
        assert_eq!(config.codec.workers, 4);
        assert_eq!(config.merge_fanout, 4);
        let storage = config.domains.iter().find(|d| d.name == "storage").unwrap();
        assert!(storage.prunable);
        assert_eq!(storage.btree_m, 1);
    }

    #[test]
    fn retire_defaults() {
        let config = RetireConfig::default().min_batch(10).immutability_threshold(0);
        assert_eq!(config.min_batch, 10);
        assert_eq!(config.immutability_threshold, 0);
        assert_eq!(config.retention_steps, None);
    }
}
