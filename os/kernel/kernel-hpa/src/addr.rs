//! # Physical Address Types
//!
//! Thin newtypes that keep byte addresses ([`PhysAddr`]) and base page frame
//! numbers ([`Pfn`]) apart, plus the half-open ranges built from them.

use crate::config::{HPA_PAGE_SIZE, PAGE_SHIFT, PFNS_PER_HPA_PAGE};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Align `x` upwards to `a` (must be a power of two).
///
/// `None` if the aligned value does not fit into the address space.
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

/// Align `x` downwards to `a` (must be a power of two).
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u64);

impl PhysAddr {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Frame number of the base page containing this address.
    #[inline]
    #[must_use]
    pub const fn pfn(self) -> Pfn {
        Pfn(self.0 >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, a: u64) -> Option<Self> {
        match align_up(self.0, a) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, a: u64) -> Self {
        Self(align_down(self.0, a))
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, a: u64) -> bool {
        self.0 & (a - 1) == 0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PhysAddr {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysAddr {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysAddr {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Byte distance between two addresses.
impl Sub for PhysAddr {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}

/// Base page frame number (address >> [`PAGE_SHIFT`]).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u64);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SHIFT)
    }
}

impl Add<u64> for Pfn {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn:{:#x}", self.0)
    }
}

/// Half-open range of base page frames `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PfnRange {
    pub start: Pfn,
    pub end: Pfn,
}

impl PfnRange {
    #[inline]
    #[must_use]
    pub const fn new(start: Pfn, end: Pfn) -> Self {
        Self { start, end }
    }

    /// The frames backing `pages` consecutive huge pages starting at `base`.
    #[inline]
    #[must_use]
    pub const fn huge_pages(base: PhysAddr, pages: u32) -> Self {
        let start = base.pfn();
        Self {
            start,
            end: Pfn(start.0 + pages as u64 * PFNS_PER_HPA_PAGE),
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.0 <= self.start.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, pfn: Pfn) -> bool {
        pfn.0 >= self.start.0 && pfn.0 < self.end.0
    }
}

impl fmt::Display for PfnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start.0, self.end.0)
    }
}

/// Physical address range `[base, base + size)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddrRange {
    pub base: PhysAddr,
    pub size: u64,
}

impl AddrRange {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysAddr, size: u64) -> Self {
        Self { base, size }
    }

    /// Build a range from its bounds; `end < base` yields an empty range.
    #[inline]
    #[must_use]
    pub const fn from_bounds(base: PhysAddr, end: PhysAddr) -> Self {
        Self {
            base,
            size: end.0.saturating_sub(base.0),
        }
    }

    /// Exclusive end, saturating at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr(self.base.0.saturating_add(self.size))
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysAddr) -> bool {
        addr.0 >= self.base.0 && addr.0 < self.end().0
    }

    /// Whether a whole huge page starting at `page` lies inside the range.
    #[inline]
    #[must_use]
    pub const fn contains_huge_page(&self, page: PhysAddr) -> bool {
        page.0 >= self.base.0 && page.0.saturating_add(HPA_PAGE_SIZE) <= self.end().0
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.end())
    }
}
