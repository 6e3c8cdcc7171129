//! # Region Registry
//!
//! Boot-time list of physical ranges handed to the allocator.
//!
//! Ranges are added while parsing the boot configuration, then narrowed in
//! two steps:
//!
//! 1. [`assign_controller`](RegionRegistry::assign_controller), once per memory
//!    controller decode window, ascending, tags every region (or slice of a
//!    region) inside the window with the controller;
//! 2. [`intersect_with_platform_ranges`](RegionRegistry::intersect_with_platform_ranges)
//!    clips regions to the memory that is actually usable.
//!
//! Both steps clip to [`HPA_ALIGN`], drop regions that end up unusable and
//! split regions that straddle a boundary into a head and a tail, with the
//! tail inserted right after the head. The list stays sorted by address.
//!
//! ```rust
//! # use kernel_hpa::{AddrRange, PhysAddr, RegionRegistry};
//! # use kernel_hpa::region::ControllerWindow;
//! const MIB: u64 = 1024 * 1024;
//! let mut reg = RegionRegistry::new();
//! reg.add_region(PhysAddr::new(64 * MIB), 64 * MIB).unwrap();
//!
//! let memc0 = ControllerWindow::new(0, AddrRange::new(PhysAddr::new(0), 96 * MIB));
//! let memc1 = ControllerWindow::new(1, AddrRange::new(PhysAddr::new(96 * MIB), 96 * MIB));
//! let usable = [AddrRange::new(PhysAddr::new(0), 192 * MIB)];
//! reg.configure(&[memc0, memc1], &usable);
//!
//! assert_eq!(reg.len(), 2);
//! assert_eq!(reg.regions()[0].controller, Some(0));
//! assert_eq!(reg.regions()[1].base.as_u64(), 96 * MIB);
//! ```

use crate::addr::{AddrRange, PhysAddr, Pfn, align_down, align_up};
use crate::config::{HPA_ALIGN, HPA_PAGE_SIZE, MAX_REGIONS};
use crate::error::{HpaError, HpaResult};
use alloc::vec::Vec;
use log::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub base: PhysAddr,
    pub size: u64,
    /// Owning memory controller, once known.
    pub controller: Option<u32>,
}

impl Region {
    #[must_use]
    pub const fn new(base: PhysAddr, size: u64) -> Self {
        Self {
            base,
            size,
            controller: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr::new(self.base.as_u64() + self.size)
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> AddrRange {
        AddrRange::new(self.base, self.size)
    }

    /// Whether `[addr, addr + size)` lies entirely inside this region.
    #[inline]
    #[must_use]
    pub fn contains_range(&self, addr: PhysAddr, size: u64) -> bool {
        addr >= self.base
            && addr
                .as_u64()
                .checked_add(size)
                .is_some_and(|end| end <= self.end().as_u64())
    }
}

/// Address decode window of one memory controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ControllerWindow {
    pub controller: u32,
    pub range: AddrRange,
}

impl ControllerWindow {
    #[must_use]
    pub const fn new(controller: u32, range: AddrRange) -> Self {
        Self { controller, range }
    }
}

#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<Region>,
    capacity: usize,
    movable_start: Option<Pfn>,
    /// First region not yet claimed by [`assign_controller`](Self::assign_controller).
    cursor: usize,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_capacity(MAX_REGIONS)
    }

    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            regions: Vec::new(),
            capacity,
            movable_start: None,
            cursor: 0,
        }
    }

    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Lowest non-zero frame any configured region starts at.
    #[must_use]
    pub const fn movable_start(&self) -> Option<Pfn> {
        self.movable_start
    }

    /// Record where the platform's movable zone begins.
    pub fn set_movable_start(&mut self, pfn: Pfn) {
        if pfn.as_u64() != 0 && self.movable_start.is_none_or(|cur| cur > pfn) {
            self.movable_start = Some(pfn);
        }
    }

    /// Add `[addr, addr + size)`, merging it with every region it overlaps or touches.
    ///
    /// # Errors
    /// - [`HpaError::InvalidArgument`] for an empty or overflowing range.
    /// - [`HpaError::TooManyRegions`] once the registry is full.
    pub fn add_region(&mut self, addr: PhysAddr, size: u64) -> HpaResult<()> {
        let mut start = addr.as_u64();
        let Some(mut end) = start.checked_add(size).filter(|_| size > 0) else {
            return Err(HpaError::InvalidArgument);
        };

        self.regions.retain(|r| {
            if start > r.end().as_u64() || end < r.base.as_u64() {
                return true;
            }
            start = start.min(r.base.as_u64());
            end = end.max(r.end().as_u64());
            false
        });

        if self.regions.len() >= self.capacity {
            let ignored = AddrRange::from_bounds(start.into(), end.into());
            warn!("too many regions, ignoring {ignored}");
            return Err(HpaError::TooManyRegions);
        }

        let region = Region::new(PhysAddr::new(start), end - start);
        let at = self.regions.partition_point(|r| r.base < region.base);
        self.regions.insert(at, region);
        self.set_movable_start(region.base.pfn());
        Ok(())
    }

    /// Fall back to everything from the movable zone start to `dram_end`
    /// when nothing was configured explicitly.
    pub fn use_default_region(&mut self, dram_end: PhysAddr) {
        if !self.regions.is_empty() {
            return;
        }
        let Some(start) = self.movable_start.map(Pfn::addr) else {
            return;
        };
        if start < dram_end {
            self.regions.push(Region::new(start, dram_end - start));
        }
    }

    /// Tag the regions inside the decode window `[addr, addr + size)` with `controller`.
    ///
    /// Windows must be supplied in ascending address order. Regions lying
    /// entirely below the window, in the hole after the previous one, are
    /// dropped.
    pub fn assign_controller(&mut self, addr: PhysAddr, size: u64, controller: u32) {
        let first = self.cursor;
        let mut cursor = self.cursor;
        self.intersect_range(AddrRange::new(addr, size), &mut cursor);
        for region in &mut self.regions[first..cursor] {
            region.controller = Some(controller);
        }
        self.cursor = cursor;
    }

    /// Drop every region that [`assign_controller`](Self::assign_controller) did not claim.
    pub fn drop_unassigned(&mut self) {
        self.regions.truncate(self.cursor.min(self.regions.len()));
        self.retain_logged(|r| r.controller.is_some());
        self.cursor = 0;
    }

    /// Clip the regions to `ranges`, the usable memory map in ascending order.
    pub fn intersect_with_platform_ranges(&mut self, ranges: &[AddrRange]) {
        let mut cursor = 0;
        for &range in ranges {
            if cursor >= self.regions.len() {
                break;
            }
            self.intersect_range(range, &mut cursor);
        }
        self.drop_tail(cursor);
    }

    /// Run the complete narrowing sequence: controller assignment, then the
    /// usable memory map.
    pub fn configure(&mut self, controllers: &[ControllerWindow], usable: &[AddrRange]) {
        for r in &mut self.regions {
            r.controller = None;
        }
        self.cursor = 0;

        for window in controllers {
            self.assign_controller(window.range.base, window.range.size, window.controller);
        }
        self.drop_tail(self.cursor);
        self.drop_unassigned();

        if !self.regions.is_empty() {
            self.intersect_with_platform_ranges(usable);
        }
        for r in &self.regions {
            debug!("region: {} memc:{:?}", r.range(), r.controller);
        }
    }

    /// Index of the region fully containing `[addr, addr + size)`.
    #[must_use]
    pub fn find_region(&self, addr: PhysAddr, size: u64) -> Option<usize> {
        find_region(&self.regions, addr, size)
    }

    /// Base and size of region `index`.
    #[must_use]
    pub fn region_info(&self, index: usize) -> Option<(PhysAddr, u64)> {
        self.regions.get(index).map(|r| (r.base, r.size))
    }

    #[must_use]
    pub fn into_regions(self) -> Vec<Region> {
        self.regions
    }

    fn drop_tail(&mut self, from: usize) {
        while self.regions.len() > from {
            if let Some(r) = self.regions.pop() {
                warn!("drop region: {}", r.range());
            }
        }
    }

    fn retain_logged(&mut self, mut keep: impl FnMut(&Region) -> bool) {
        self.regions.retain(|r| {
            let k = keep(r);
            if !k {
                warn!("drop region: {}", r.range());
            }
            k
        });
    }

    /// Clip the regions from `cursor` on against `range`, advancing `cursor`
    /// past every region that received a usable slice.
    ///
    /// A region needs more than one alignment unit of overlap to be clipped;
    /// otherwise it is left for the next range and the cursor stays on it.
    fn intersect_range(&mut self, range: AddrRange, cursor: &mut usize) {
        let mut start = range.base.as_u64();
        let end = range.end().as_u64();
        debug!("range: {range}");

        while let Some(r) = self.regions.get(*cursor)
            && r.end().as_u64() <= start
        {
            warn!("unmapped region {}", r.range());
            self.regions.remove(*cursor);
        }

        while let Some(&r) = self.regions.get(*cursor)
            && r.base.as_u64() < end
        {
            let Some(aligned) = align_up(start.max(r.base.as_u64()), HPA_ALIGN) else {
                return;
            };
            start = aligned;
            let last = align_down(end.min(r.end().as_u64()), HPA_ALIGN);
            if start.saturating_add(HPA_ALIGN) >= last {
                return;
            }

            debug!("intersection: {}", AddrRange::from_bounds(start.into(), last.into()));
            let region = &mut self.regions[*cursor];
            region.size -= start - region.base.as_u64();
            region.base = PhysAddr::new(start);
            self.split_region(*cursor, PhysAddr::new(last));
            *cursor += 1;
        }
    }

    /// Cut region `index` at `at`, keeping the tail as a new region right after it.
    ///
    /// A tail of a single huge page or less is discarded, as is any tail that
    /// does not fit into the registry.
    fn split_region(&mut self, index: usize, at: PhysAddr) {
        let region = self.regions[index];
        if region.end().as_u64() > at.as_u64().saturating_add(HPA_PAGE_SIZE) {
            if self.regions.len() < self.capacity {
                let tail = Region {
                    base: at,
                    size: region.end() - at,
                    controller: region.controller,
                };
                debug!("region split: {}", tail.range());
                self.regions.insert(index + 1, tail);
            } else {
                warn!("region {} truncated at {at}, registry full", region.range());
            }
        }
        self.regions[index].size = at - region.base;
        debug!("region added: {}", self.regions[index].range());
    }
}

/// Index of the region in the sorted `regions` fully containing `[addr, addr + size)`.
pub(crate) fn find_region(regions: &[Region], addr: PhysAddr, size: u64) -> Option<usize> {
    for (i, r) in regions.iter().enumerate() {
        if addr < r.base {
            return None;
        }
        if r.contains_range(addr, size) {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn pa(mib: u64) -> PhysAddr {
        PhysAddr::new(mib * MIB)
    }

    fn spans(reg: &RegionRegistry) -> Vec<(u64, u64)> {
        reg.regions()
            .iter()
            .map(|r| (r.base.as_u64() / MIB, r.end().as_u64() / MIB))
            .collect()
    }

    #[test]
    fn add_keeps_sorted_and_merges() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(100), 20 * MIB).unwrap();
        reg.add_region(pa(10), 10 * MIB).unwrap();
        reg.add_region(pa(50), 10 * MIB).unwrap();
        assert_eq!(spans(&reg), [(10, 20), (50, 60), (100, 120)]);

        // bridges the first two, touching counts as overlap
        reg.add_region(pa(20), 30 * MIB).unwrap();
        assert_eq!(spans(&reg), [(10, 60), (100, 120)]);

        // swallowed entirely
        reg.add_region(pa(105), 5 * MIB).unwrap();
        assert_eq!(spans(&reg), [(10, 60), (100, 120)]);
    }

    #[test]
    fn add_rejects_empty_and_overflowing() {
        let mut reg = RegionRegistry::new();
        assert_eq!(reg.add_region(pa(1), 0), Err(HpaError::InvalidArgument));
        assert_eq!(
            reg.add_region(PhysAddr::new(u64::MAX), 2),
            Err(HpaError::InvalidArgument)
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn capacity_is_enforced_after_merging() {
        let mut reg = RegionRegistry::with_capacity(2);
        reg.add_region(pa(0), MIB).unwrap();
        reg.add_region(pa(10), MIB).unwrap();
        assert_eq!(reg.add_region(pa(20), MIB), Err(HpaError::TooManyRegions));
        // merging frees a slot
        reg.add_region(pa(1), 9 * MIB).unwrap();
        assert_eq!(spans(&reg), [(0, 11)]);
        reg.add_region(pa(20), MIB).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn movable_start_tracks_lowest_nonzero() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 2 * MIB).unwrap();
        assert_eq!(reg.movable_start(), None);
        reg.add_region(pa(512), 2 * MIB).unwrap();
        reg.add_region(pa(256), 2 * MIB).unwrap();
        assert_eq!(reg.movable_start(), Some(pa(256).pfn()));
    }

    #[test]
    fn default_region_only_when_unconfigured() {
        let mut reg = RegionRegistry::new();
        reg.use_default_region(pa(1024));
        assert!(reg.is_empty(), "no movable zone, nothing to grab");

        reg.set_movable_start(pa(512).pfn());
        reg.use_default_region(pa(1024));
        assert_eq!(spans(&reg), [(512, 1024)]);
    }

    #[test]
    fn assign_splits_across_controllers() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(64), 128 * MIB).unwrap();
        reg.assign_controller(pa(0), 128 * MIB, 0);
        reg.assign_controller(pa(128), 128 * MIB, 1);
        reg.drop_unassigned();

        assert_eq!(spans(&reg), [(64, 128), (128, 192)]);
        assert_eq!(reg.regions()[0].controller, Some(0));
        assert_eq!(reg.regions()[1].controller, Some(1));
    }

    #[test]
    fn region_in_hole_between_windows_is_dropped() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 32 * MIB).unwrap();
        reg.add_region(pa(200), 32 * MIB).unwrap();
        reg.add_region(pa(600), 32 * MIB).unwrap();

        reg.assign_controller(pa(0), 128 * MIB, 0);
        reg.assign_controller(pa(512), 512 * MIB, 1);
        reg.drop_unassigned();

        assert_eq!(spans(&reg), [(0, 32), (600, 632)]);
        assert_eq!(reg.regions()[1].controller, Some(1));
    }

    #[test]
    fn unassigned_regions_are_dropped() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 32 * MIB).unwrap();
        reg.add_region(pa(900), 32 * MIB).unwrap();
        reg.assign_controller(pa(0), 512 * MIB, 0);
        reg.drop_unassigned();
        assert_eq!(spans(&reg), [(0, 32)]);
    }

    #[test]
    fn intersect_clips_and_splits_around_holes() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 256 * MIB).unwrap();
        reg.assign_controller(pa(0), 1024 * MIB, 0);
        reg.drop_unassigned();

        // firmware carved out [63, 97) MiB
        reg.intersect_with_platform_ranges(&[
            AddrRange::from_bounds(pa(0), pa(63)),
            AddrRange::from_bounds(pa(97), pa(1024)),
        ]);
        assert_eq!(spans(&reg), [(0, 62), (98, 256)]);
        assert!(reg.regions().iter().all(|r| r.controller == Some(0)));
    }

    #[test]
    fn tiny_intersections_are_not_used() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 64 * MIB).unwrap();
        reg.assign_controller(pa(0), 64 * MIB, 0);
        reg.drop_unassigned();

        // a single aligned unit of overlap is not enough
        reg.intersect_with_platform_ranges(&[AddrRange::from_bounds(pa(0), pa(2))]);
        assert!(reg.is_empty());
    }

    #[test]
    fn region_at_top_of_address_space_is_dropped() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 64 * MIB).unwrap();
        reg.add_region(PhysAddr::new(u64::MAX - 0x10_0000), 0x1000).unwrap();

        let everything = AddrRange::new(PhysAddr::new(0), u64::MAX);
        reg.configure(&[ControllerWindow::new(0, everything)], &[everything]);
        assert_eq!(spans(&reg), [(0, 64)]);
    }

    #[test]
    fn split_beyond_capacity_truncates() {
        let mut reg = RegionRegistry::with_capacity(1);
        reg.add_region(pa(0), 64 * MIB).unwrap();
        reg.assign_controller(pa(0), 32 * MIB, 0);
        reg.drop_unassigned();
        assert_eq!(spans(&reg), [(0, 32)]);
    }

    #[test]
    fn find_and_info() {
        let mut reg = RegionRegistry::new();
        reg.add_region(pa(0), 32 * MIB).unwrap();
        reg.add_region(pa(64), 32 * MIB).unwrap();

        assert_eq!(reg.find_region(pa(2), 4 * MIB), Some(0));
        assert_eq!(reg.find_region(pa(64), 32 * MIB), Some(1));
        assert_eq!(reg.find_region(pa(30), 4 * MIB), None);
        assert_eq!(reg.find_region(pa(40), MIB), None);
        assert_eq!(reg.region_info(1), Some((pa(64), 32 * MIB)));
        assert_eq!(reg.region_info(2), None);
    }
}
