//! # Huge Page Block
//!
//! A [`Block`] tracks up to [`HpaConfig::max_block_pages`](crate::HpaConfig::max_block_pages)
//! consecutive huge pages with two bitmaps:
//!
//! * **busy**: the page is allocated *or* a reservation attempt for it failed
//!   during the current pass, so it should not be tried again;
//! * **allocated**: the page is owned by a caller.
//!
//! ```text
//! busy  allocated   state
//!  0      0         free
//!  1      0         tried and failed, cleared by `clear_busy`
//!  1      1         allocated
//!  0      1         never happens
//! ```
//!
//! # Invariants
//! - `allocated ⊆ busy`
//! - `free_count + popcount(busy) == page_count`

use crate::addr::{AddrRange, PfnRange, PhysAddr};
use crate::bitmap::Bitmap;
use crate::config::{HPA_PAGE_SIZE, PFNS_PER_HPA_PAGE};
use crate::error::{HpaError, HpaResult};
use crate::zone::{MigrateType, MovableZone, ZoneError};
use alloc::vec::Vec;
use core::ops::Range;
use log::{debug, error, trace, warn};

/// Occupancy of a single page as shown in reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageState {
    Free,
    /// Busy but not allocated.
    Busy,
    /// Allocated but not busy; indicates a corrupted block.
    Stray,
    Allocated,
}

impl PageState {
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Free => '.',
            Self::Busy => 'B',
            Self::Stray => 'X',
            Self::Allocated => 'A',
        }
    }
}

/// Point-in-time copy of a block's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub base: PhysAddr,
    pub page_count: u32,
    pub free_count: u32,
    /// Indices of allocated pages.
    pub allocated: Vec<u32>,
    /// Indices of busy pages (allocated ones included).
    pub busy: Vec<u32>,
}

impl BlockSnapshot {
    /// Address of page `index` of the block.
    #[must_use]
    pub fn page_addr(&self, index: u32) -> PhysAddr {
        self.base + u64::from(index) * HPA_PAGE_SIZE
    }
}

#[derive(Debug)]
pub struct Block {
    base: PhysAddr,
    count: u32,
    free: u32,
    busy: Bitmap,
    allocated: Bitmap,
}

impl Block {
    /// Create a block of `count` free pages starting at the huge-page aligned `base`.
    ///
    /// # Errors
    /// [`HpaError::OutOfMemory`] if the bitmaps cannot be allocated.
    pub fn try_new(base: PhysAddr, count: u32) -> HpaResult<Self> {
        debug_assert!(base.is_aligned(HPA_PAGE_SIZE));
        Ok(Self {
            base,
            count,
            free: count,
            busy: Bitmap::try_new(count)?,
            allocated: Bitmap::try_new(count)?,
        })
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.count
    }

    /// Number of pages that are not busy.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.free
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> PhysAddr {
        self.page_addr(self.count)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    #[inline]
    fn page_addr(&self, index: u32) -> PhysAddr {
        self.base + u64::from(index) * HPA_PAGE_SIZE
    }

    /// Page index of `addr`, if it lies inside the block.
    #[allow(clippy::cast_possible_truncation)]
    fn page_index(&self, addr: PhysAddr) -> Option<u32> {
        if addr < self.base {
            return None;
        }
        let index = (addr - self.base) / HPA_PAGE_SIZE;
        (index < u64::from(self.count)).then_some(index as u32)
    }

    #[must_use]
    pub fn page_state(&self, index: u32) -> PageState {
        match (self.busy.test(index), self.allocated.test(index)) {
            (false, false) => PageState::Free,
            (true, false) => PageState::Busy,
            (false, true) => PageState::Stray,
            (true, true) => PageState::Allocated,
        }
    }

    #[must_use]
    pub fn allocated_count(&self) -> u32 {
        self.allocated.count_ones()
    }

    /// Whether the bookkeeping invariants hold.
    #[must_use]
    pub fn check(&self) -> bool {
        self.allocated.is_subset_of(&self.busy) && self.free + self.busy.count_ones() == self.count
    }

    #[must_use]
    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            base: self.base,
            page_count: self.count,
            free_count: self.free,
            allocated: self.allocated.ones().collect(),
            busy: self.busy.ones().collect(),
        }
    }

    /// Page indices eligible for allocation, clipped to `range`.
    ///
    /// Only whole huge pages inside `range` qualify. A block without free
    /// pages yields an empty window.
    #[allow(clippy::cast_possible_truncation)]
    fn page_window(&self, range: Option<&AddrRange>) -> Range<u32> {
        if self.free == 0 {
            return 0..0;
        }
        let Some(range) = range else {
            return 0..self.count;
        };

        let mut start = self.base;
        let mut end = self.end();
        if range.base > start {
            let Some(aligned) = range.base.align_up(HPA_PAGE_SIZE) else {
                return 0..0;
            };
            start = aligned;
        }
        if range.end() < end {
            end = range.end().align_down(HPA_PAGE_SIZE);
        }
        if start >= end {
            return 0..0;
        }
        let first = (start - self.base) / HPA_PAGE_SIZE;
        let last = (end - self.base) / HPA_PAGE_SIZE;
        first as u32..last as u32
    }

    fn mark_allocated(&mut self, index: u32) {
        if !self.busy.test_and_set(index) {
            if self.free == 0 {
                error!("block {}: free count underflow at page {index}", self.base);
            } else {
                self.free -= 1;
            }
        }
        self.allocated.set(index);
    }

    /// Take pages the platform already reports as free, without forcing migration.
    ///
    /// Candidates are looked up with `find_free_candidate` at `order` inside
    /// the window and reserved one huge page at a time. Transient failures are
    /// retried up to `retries` times. Running out of candidates or retries, or
    /// a [`ZoneError::Fatal`] reservation, simply ends the scan and leaves the
    /// remaining pages to the slow path.
    ///
    /// Allocated pages are appended to `out`; the number appended is returned.
    ///
    /// # Errors
    /// [`HpaError::Interrupted`]. Pages appended before the failure stay in
    /// `out` so the caller can roll them back.
    pub fn alloc_fast<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        out: &mut Vec<PhysAddr>,
        count: u32,
        range: Option<&AddrRange>,
        order: u32,
        retries: u32,
    ) -> HpaResult<u32> {
        let window = self.page_window(range);
        if window.is_empty() {
            return Ok(0);
        }

        let mut remaining = count.min(window.end - window.start);
        let pfns = PfnRange::new(
            self.page_addr(window.start).pfn(),
            self.page_addr(window.end).pfn(),
        );
        let mut prev_failed = None;
        let mut tries = 0;
        let mut allocated = 0;

        while remaining > 0 {
            let Some(pfn) = zone.find_free_candidate(pfns, MigrateType::Movable, order) else {
                debug!(
                    "block {}: no free candidates, order:{order} remaining:{remaining}",
                    self.base
                );
                break;
            };
            let Some(index) = self.page_index(pfn.addr()) else {
                warn!("block {}: candidate {pfn} outside of block", self.base);
                break;
            };
            if !window.contains(&index) || self.allocated.test(index) {
                warn!("block {}: bad candidate {pfn} (page {index})", self.base);
                break;
            }

            let start = self.page_addr(index);
            match zone.try_reserve_contiguous(PfnRange::huge_pages(start, 1)) {
                Ok(()) => {}
                Err(ZoneError::Busy) => {
                    // The same candidate again means nothing else is free here.
                    if prev_failed == Some(index) {
                        break;
                    }
                    prev_failed = Some(index);
                    tries += 1;
                    if tries > retries {
                        break;
                    }
                    continue;
                }
                Err(ZoneError::Fatal) => {
                    warn!("block {}: fast reservation of page {index} failed", self.base);
                    break;
                }
                Err(ZoneError::Interrupted) => return Err(HpaError::Interrupted),
            }

            debug!("block {}: fast allocated page {index} at {start}", self.base);
            self.mark_allocated(index);
            out.push(start);
            allocated += 1;
            remaining -= 1;
        }
        Ok(allocated)
    }

    /// Reserve pages by forcing migration, scanning the busy bitmap in order.
    ///
    /// Runs of up to `batch` free pages are reserved with one request; when a
    /// multi-page request fails, the first page is retried on its own. Every
    /// attempted page becomes busy whether or not it could be reserved, so a
    /// later scan does not try it again until [`clear_busy`](Self::clear_busy).
    ///
    /// # Errors
    /// Hard platform failures, see [`alloc_fast`](Self::alloc_fast).
    pub fn alloc_slow<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        out: &mut Vec<PhysAddr>,
        count: u32,
        range: Option<&AddrRange>,
        batch: u32,
    ) -> HpaResult<u32> {
        let window = self.page_window(range);
        if window.is_empty() {
            return Ok(0);
        }

        let mut remaining = count.min(window.end - window.start);
        let mut first = window.start;
        let mut allocated = 0;

        while remaining > 0 {
            let Some(index) = self.busy.next_zero(first).filter(|&i| i < window.end) else {
                break;
            };
            trace!("block {}: scan from {first} -> {index}", self.base);

            let mut run = 1;
            while run < remaining
                && run < batch
                && index + run < window.end
                && !self.busy.test(index + run)
            {
                run += 1;
            }

            let start = self.page_addr(index);
            let mut rc = zone.try_reserve_contiguous(PfnRange::huge_pages(start, run));
            if rc == Err(ZoneError::Busy) && run != 1 {
                run = 1;
                rc = zone.try_reserve_contiguous(PfnRange::huge_pages(start, 1));
            }
            if let Err(e @ (ZoneError::Interrupted | ZoneError::Fatal)) = rc {
                return Err(e.into());
            }

            self.busy.set_range(index, run);
            self.free -= run;
            first = index + run;

            if rc.is_ok() {
                debug!("block {}: allocated {run} pages at {start}", self.base);
                for i in index..index + run {
                    self.allocated.set(i);
                    out.push(self.page_addr(i));
                }
                remaining -= run;
                allocated += run;
            } else {
                debug!("block {}: page {index} at {start} can't be allocated", self.base);
            }
        }
        Ok(allocated)
    }

    /// Forget failed attempts: clear busy on every page that is not allocated.
    pub fn clear_busy(&mut self) {
        trace!("block {}: clear busy", self.base);
        for index in 0..self.count {
            if self.allocated.test(index) || !self.busy.test_and_clear(index) {
                continue;
            }
            if self.free >= self.count {
                error!("block {}: free count overflow at page {index}", self.base);
            } else {
                self.free += 1;
            }
        }
    }

    /// Release one allocated page back to the platform.
    ///
    /// # Errors
    /// [`HpaError::InvalidArgument`] if `addr` is not the start of a page of
    /// this block that is currently allocated; nothing is changed then.
    pub fn free_one<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        addr: PhysAddr,
    ) -> HpaResult<()> {
        if !addr.is_aligned(HPA_PAGE_SIZE) {
            warn!("block {}: misaligned page {addr}", self.base);
            return Err(HpaError::InvalidArgument);
        }
        let Some(index) = self.page_index(addr) else {
            warn!("block {}: page {addr} outside of block", self.base);
            return Err(HpaError::InvalidArgument);
        };
        if !self.allocated.test(index) || !self.busy.test(index) || self.free >= self.count {
            warn!(
                "block {}: page {addr} is not allocated ({:?}, free {}/{})",
                self.base,
                self.page_state(index),
                self.free,
                self.count
            );
            return Err(HpaError::InvalidArgument);
        }

        trace!("block {}: free page {index} at {addr}", self.base);
        self.busy.clear(index);
        self.allocated.clear(index);
        self.free += 1;
        zone.release_contiguous(addr.pfn(), PFNS_PER_HPA_PAGE);
        Ok(())
    }
}
