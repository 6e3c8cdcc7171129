//! # Movable Zone Interface
//!
//! The allocator never touches the platform page allocator directly. It
//! drives it through [`MovableZone`], which an embedder implements on top of
//! its buddy allocator / contiguous range migration machinery.

use crate::addr::{PhysAddr, Pfn, PfnRange};

/// Migrate type of the free lists searched by
/// [`MovableZone::find_free_candidate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MigrateType {
    Unmovable,
    Movable,
    Reclaimable,
}

/// Failure reported by the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    /// The range is temporarily unavailable (pinned, under migration, ...).
    ///
    /// Callers treat this as "try elsewhere"; it never aborts an allocation.
    #[error("range is busy")]
    Busy,
    /// The caller's context is being torn down; abort the whole request.
    #[error("interrupted")]
    Interrupted,
    /// The platform cannot satisfy this or any further request.
    #[error("reservation failed")]
    Fatal,
}

/// Platform page allocator capabilities consumed by the huge page allocator.
///
/// All calls are made with the allocator lock held and may block.
pub trait MovableZone {
    /// Make `range` exclusively owned, migrating movable pages out of it.
    ///
    /// # Errors
    /// See [`ZoneError`].
    fn try_reserve_contiguous(&mut self, range: PfnRange) -> Result<(), ZoneError>;

    /// Return `count` frames starting at `start` to general circulation.
    fn release_contiguous(&mut self, start: Pfn, count: u64);

    /// Find a currently free chunk of at least `order` on the `migrate` free
    /// lists that lies entirely inside `window`.
    fn find_free_candidate(&self, window: PfnRange, migrate: MigrateType, order: u32)
    -> Option<Pfn>;

    /// Permanently withdraw `[base, base + size)` from the general allocator.
    ///
    /// # Errors
    /// The range conflicts with an existing reservation.
    fn reserve_physical_range(&mut self, base: PhysAddr, size: u64) -> Result<(), ZoneError>;
}
