//! # Allocator Geometry and Limits
//!
//! Compile-time constants describing the huge page geometry, and the
//! runtime [`HpaConfig`] that an embedder may tune.

/// Base page shift of the platform page allocator (4 KiB pages).
pub const PAGE_SHIFT: u32 = 12;

/// Base page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Shift of a single huge page (2 MiB).
pub const HPA_PAGE_SHIFT: u32 = 21;

/// Size of a single huge page in bytes.
pub const HPA_PAGE_SIZE: u64 = 1 << HPA_PAGE_SHIFT;

/// Allocation order of a huge page in base pages.
pub const HPA_ORDER: u32 = HPA_PAGE_SHIFT - PAGE_SHIFT;

/// Number of base page frames making up one huge page.
pub const PFNS_PER_HPA_PAGE: u64 = 1 << HPA_ORDER;

/// Order of the platform's migration pageblock.
pub const PAGEBLOCK_ORDER: u32 = 9;

/// Alignment that configured regions are clipped to.
///
/// A region must start and end on a pageblock boundary so its migrate type
/// can be managed as a whole.
pub const HPA_ALIGN: u64 = if PAGEBLOCK_ORDER > HPA_ORDER {
    1 << (PAGEBLOCK_ORDER + PAGE_SHIFT)
} else {
    HPA_PAGE_SIZE
};

/// Largest span covered by a single block (1 GiB).
pub const HPA_BLOCK_MAX: u64 = 1024 * 1024 * 1024;

/// Number of huge pages in a full block.
#[allow(clippy::cast_possible_truncation)]
pub const HPA_BLOCK_PAGES: u32 = (HPA_BLOCK_MAX / HPA_PAGE_SIZE) as u32;

/// Capacity of the region registry.
pub const MAX_REGIONS: usize = 8;

/// Number of memory controllers the allocator serves.
pub const MAX_CONTROLLERS: u32 = 3;

/// Transient reservation failures tolerated per block on the fast path.
pub const FAST_PATH_RETRIES: u32 = 10;

/// Most pages reserved with a single contiguous request on the slow path.
pub const SLOW_PATH_BATCH: u32 = 8;

/// How many halvings below [`HPA_ORDER`] the fast path probes (down to 1/8).
pub const FAST_PATH_ORDER_STEPS: u32 = 3;

const _: () = {
    assert!(HPA_PAGE_SHIFT > PAGE_SHIFT);
    assert!(HPA_ALIGN.is_multiple_of(HPA_PAGE_SIZE));
    assert!(HPA_BLOCK_MAX.is_multiple_of(HPA_PAGE_SIZE));
    assert!(FAST_PATH_ORDER_STEPS <= HPA_ORDER);
    assert!(SLOW_PATH_BATCH > 0);
};

/// Runtime tunables of an [`Allocator`](crate::Allocator).
///
/// The defaults mirror the constants in this module.
///
/// ```rust
/// # use kernel_hpa::HpaConfig;
/// let cfg = HpaConfig::default().with_max_block_pages(16);
/// assert_eq!(cfg.max_block_pages(), 16);
/// assert_eq!(cfg.max_controllers(), kernel_hpa::config::MAX_CONTROLLERS);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HpaConfig {
    max_controllers: u32,
    max_block_pages: u32,
    fast_path_retries: u32,
    slow_path_batch: u32,
}

impl Default for HpaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HpaConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_controllers: MAX_CONTROLLERS,
            max_block_pages: HPA_BLOCK_PAGES,
            fast_path_retries: FAST_PATH_RETRIES,
            slow_path_batch: SLOW_PATH_BATCH,
        }
    }

    #[must_use]
    pub const fn with_max_controllers(mut self, n: u32) -> Self {
        self.max_controllers = n;
        self
    }

    /// Zero is treated as one page per block.
    #[must_use]
    pub const fn with_max_block_pages(mut self, n: u32) -> Self {
        self.max_block_pages = if n == 0 { 1 } else { n };
        self
    }

    #[must_use]
    pub const fn with_fast_path_retries(mut self, n: u32) -> Self {
        self.fast_path_retries = n;
        self
    }

    /// Zero is treated as a batch of one page.
    #[must_use]
    pub const fn with_slow_path_batch(mut self, n: u32) -> Self {
        self.slow_path_batch = if n == 0 { 1 } else { n };
        self
    }

    #[must_use]
    pub const fn max_controllers(&self) -> u32 {
        self.max_controllers
    }

    #[must_use]
    pub const fn max_block_pages(&self) -> u32 {
        self.max_block_pages
    }

    #[must_use]
    pub const fn fast_path_retries(&self) -> u32 {
        self.fast_path_retries
    }

    #[must_use]
    pub const fn slow_path_batch(&self) -> u32 {
        self.slow_path_batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry() {
        assert_eq!(HPA_PAGE_SIZE, 2 * 1024 * 1024);
        assert_eq!(HPA_ORDER, 9);
        assert_eq!(PFNS_PER_HPA_PAGE, 512);
        assert_eq!(HPA_BLOCK_PAGES, 512);
        assert_eq!(HPA_ALIGN, HPA_PAGE_SIZE);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let cfg = HpaConfig::new().with_max_block_pages(0).with_slow_path_batch(0);
        assert_eq!(cfg.max_block_pages(), 1);
        assert_eq!(cfg.slow_path_batch(), 1);
    }
}
