/// Repository configuration
///
/// Passed once at construction; engines only ever read it.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Page size used when a request carries no `limit`
    pub default_limit: usize,

    /// Largest accepted `limit`
    pub max_limit: usize,

    /// Conditional-write attempts before an update is abandoned
    pub max_update_attempts: u32,

    /// Parallel scan segments per available core
    pub scan_fan_out_factor: usize,

    /// Capacity of the single-object cache
    pub object_cache_capacity: usize,

    /// Capacity of the item-list cache
    pub item_list_cache_capacity: usize,

    /// Capacity of the aggregation cache
    pub aggregation_cache_capacity: usize,

    /// Use strongly consistent reads for list queries
    pub consistent_reads: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            max_update_attempts: 100,
            scan_fan_out_factor: 2,
            object_cache_capacity: 10_000,
            item_list_cache_capacity: 1_000,
            aggregation_cache_capacity: 1_000,
            consistent_reads: false,
        }
    }
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default page size
    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Set the maximum page size
    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// Set the optimistic-lock attempt bound
    pub fn max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts;
        self
    }

    /// Set the parallel scan fan-out factor
    pub fn scan_fan_out_factor(mut self, factor: usize) -> Self {
        self.scan_fan_out_factor = factor;
        self
    }

    pub fn object_cache_capacity(mut self, capacity: usize) -> Self {
        self.object_cache_capacity = capacity;
        self
    }

    pub fn item_list_cache_capacity(mut self, capacity: usize) -> Self {
        self.item_list_cache_capacity = capacity;
        self
    }

    pub fn aggregation_cache_capacity(mut self, capacity: usize) -> Self {
        self.aggregation_cache_capacity = capacity;
        self
    }

    pub fn consistent_reads(mut self, consistent: bool) -> Self {
        self.consistent_reads = consistent;
        self
    }

    /// Number of parallel scan segments for this process.
    pub fn scan_segments(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (self.scan_fan_out_factor * cores).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::default();
        assert_eq!(config.default_limit, 20);
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.max_update_attempts, 100);
        assert!(config.scan_segments() >= 2);
    }

    #[test]
    fn test_builder_overrides() {
        let config = RepositoryConfig::new()
            .default_limit(5)
            .max_update_attempts(3)
            .scan_fan_out_factor(0);
        assert_eq!(config.default_limit, 5);
        assert_eq!(config.max_update_attempts, 3);
        assert_eq!(config.scan_segments(), 1);
    }
}
