//! Simulated platform page allocator for the integration tests.

#![allow(dead_code)]

use kernel_hpa::config::{HPA_PAGE_SIZE, PFNS_PER_HPA_PAGE};
use kernel_hpa::{
    AddrRange, ControllerWindow, MigrateType, MovableZone, Pfn, PfnRange, PhysAddr,
    RegionRegistry, ZoneError,
};
use std::collections::{BTreeMap, BTreeSet};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Start of the test region of controller `c`.
pub const fn base(c: u32) -> u64 {
    (4 * c as u64 + 1) * GIB
}

/// Address of huge page `i` of controller `c`'s test region.
pub fn page(c: u32, i: u64) -> PhysAddr {
    PhysAddr::new(base(c) + i * HPA_PAGE_SIZE)
}

/// Occupancy of a huge page as seen by the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    /// On the free lists, offered to the fast path.
    Free,
    /// In use by movable allocations; reservable by migration.
    Movable,
    /// Never reservable.
    Pinned,
}

#[derive(Debug, Default)]
pub struct SimZone {
    /// Pages not listed are [`Kind::Movable`].
    kinds: BTreeMap<u64, Kind>,
    /// Pages that fail this many more reservation attempts with `Busy`.
    flaky: BTreeMap<u64, u32>,
    /// Fail the n-th `try_reserve_contiguous` call (1-based) with the given error.
    fail_at: Option<(usize, ZoneError)>,
    /// Region bases `reserve_physical_range` refuses.
    refused: BTreeSet<u64>,

    pub reserved: BTreeSet<u64>,
    pub released: Vec<u64>,
    pub withdrawn: Vec<(u64, u64)>,
    pub reserve_calls: usize,
}

impl SimZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, addr: PhysAddr, kind: Kind) -> Self {
        self.kinds.insert(addr.as_u64(), kind);
        self
    }

    pub fn flaky(mut self, addr: PhysAddr, failures: u32) -> Self {
        self.flaky.insert(addr.as_u64(), failures);
        self
    }

    pub fn fail_at(mut self, call: usize, err: ZoneError) -> Self {
        self.fail_at = Some((call, err));
        self
    }

    pub fn refuse(mut self, base: PhysAddr) -> Self {
        self.refused.insert(base.as_u64());
        self
    }

    fn kind(&self, addr: u64) -> Kind {
        self.kinds.get(&addr).copied().unwrap_or(Kind::Movable)
    }

    fn pages(range: PfnRange) -> impl Iterator<Item = u64> {
        (range.start.as_u64()..range.end.as_u64())
            .step_by(PFNS_PER_HPA_PAGE as usize)
            .map(|pfn| Pfn::new(pfn).addr().as_u64())
    }
}

impl MovableZone for SimZone {
    fn try_reserve_contiguous(&mut self, range: PfnRange) -> Result<(), ZoneError> {
        self.reserve_calls += 1;
        if let Some((n, err)) = self.fail_at
            && n == self.reserve_calls
        {
            return Err(err);
        }

        let mut busy = false;
        for p in Self::pages(range) {
            if let Some(left) = self.flaky.get_mut(&p)
                && *left > 0
            {
                *left -= 1;
                busy = true;
            }
            busy |= self.reserved.contains(&p) || self.kind(p) == Kind::Pinned;
        }
        if busy {
            return Err(ZoneError::Busy);
        }

        for p in Self::pages(range) {
            self.reserved.insert(p);
        }
        Ok(())
    }

    fn release_contiguous(&mut self, start: Pfn, count: u64) {
        assert_eq!(count, PFNS_PER_HPA_PAGE, "pages are released one at a time");
        let p = start.addr().as_u64();
        assert!(self.reserved.remove(&p), "release of unreserved page {p:#x}");
        self.released.push(p);
        self.kinds.insert(p, Kind::Free);
    }

    fn find_free_candidate(&self, window: PfnRange, _: MigrateType, _: u32) -> Option<Pfn> {
        let start = window.start.addr().as_u64();
        let end = window.end.addr().as_u64();
        self.kinds
            .range(start..end)
            .find(|&(p, k)| *k == Kind::Free && !self.reserved.contains(p))
            .map(|(&p, _)| PhysAddr::new(p).pfn())
    }

    fn reserve_physical_range(&mut self, base: PhysAddr, size: u64) -> Result<(), ZoneError> {
        if self.refused.contains(&base.as_u64()) {
            return Err(ZoneError::Fatal);
        }
        self.withdrawn.push((base.as_u64(), size));
        Ok(())
    }
}

/// Registry holding `pages` huge pages for each listed controller, at [`base`].
pub fn registry(regions: &[(u32, u64)]) -> RegionRegistry {
    let mut reg = RegionRegistry::new();
    for &(c, pages) in regions {
        reg.add_region(PhysAddr::new(base(c)), pages * HPA_PAGE_SIZE)
            .unwrap();
    }
    let windows: Vec<_> = (0..3)
        .map(|c| {
            let window = AddrRange::new(PhysAddr::new(4 * GIB * u64::from(c)), 4 * GIB);
            ControllerWindow::new(c, window)
        })
        .collect();
    reg.configure(&windows, &[AddrRange::new(PhysAddr::new(0), 12 * GIB)]);
    reg
}
