//! # Huge Page Allocator
//!
//! The top level object: one [`Memc`] per memory controller, the platform
//! collaborator, and the lock serializing every operation on them.

use crate::addr::{AddrRange, PhysAddr};
use crate::block::{Block, BlockSnapshot};
use crate::config::HpaConfig;
use crate::error::{HpaError, HpaResult};
use crate::memc::Memc;
use crate::region::{self, Region, RegionRegistry};
use crate::report;
use crate::zone::MovableZone;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::{Interrupt, MutexGuard, RawSpin, SpinMutex};
use log::{debug, info, warn};

struct State<Z> {
    zone: Z,
    memcs: Vec<Memc>,
}

/// Huge page allocator over the regions of a [`RegionRegistry`].
pub struct Allocator<Z> {
    config: HpaConfig,
    /// Regions that were successfully reserved and carved, in address order.
    regions: Vec<Region>,
    state: SpinMutex<State<Z>>,
}

impl<Z: MovableZone> Allocator<Z> {
    /// Reserve every region of `registry` and carve it into blocks.
    ///
    /// A region that cannot be reserved, belongs to no known controller, or
    /// whose block metadata cannot be allocated is logged and skipped.
    #[must_use]
    pub fn new(config: HpaConfig, mut zone: Z, registry: RegionRegistry) -> Self {
        let mut memcs = Vec::new();
        memcs.resize_with(config.max_controllers() as usize, Memc::new);

        let mut regions = registry.into_regions();
        regions.retain(|r| {
            let Some(memc) = r.controller.and_then(|c| memcs.get_mut(c as usize)) else {
                warn!("region {} has no valid controller ({:?})", r.range(), r.controller);
                return false;
            };
            if let Err(e) = zone.reserve_physical_range(r.base, r.size) {
                warn!("reservation failed for region {}: {e}", r.range());
                return false;
            }
            match memc.add_memory(r.base, r.end(), config.max_block_pages()) {
                Ok(pages) => {
                    info!(
                        "Alloc: MEMC{}: {} ({pages} pages)",
                        r.controller.unwrap_or_default(),
                        r.range()
                    );
                    true
                }
                Err(e) => {
                    warn!("unable to add region {}: {e}", r.range());
                    false
                }
            }
        });

        Self {
            config,
            regions,
            state: SpinMutex::new(State { zone, memcs }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HpaConfig {
        &self.config
    }

    /// Regions the allocator manages.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Allocate up to `count` huge pages from `controller`, optionally only
    /// inside `range`.
    ///
    /// Returns the page addresses obtained; fewer than `count` (even none) is
    /// not an error.
    ///
    /// Waits for the allocator lock without a way to give up; callers that
    /// must stay cancellable use [`alloc_interruptible`](Self::alloc_interruptible).
    ///
    /// # Errors
    /// - [`HpaError::InvalidArgument`] for an unknown controller or `count == 0`.
    /// - [`HpaError::OutOfMemory`] if the result vector cannot be allocated. It
    ///   is sized to what the controller can hold at most, not to `count`.
    /// - [`HpaError::Interrupted`] / [`HpaError::ReservationFailed`] for hard
    ///   platform failures; nothing stays allocated then.
    pub fn alloc(
        &self,
        controller: u32,
        count: u32,
        range: Option<AddrRange>,
    ) -> HpaResult<Vec<PhysAddr>> {
        self.validate(controller, count)?;
        let state = self.state.lock();
        self.alloc_locked(state, controller, count, range)
    }

    /// Like [`alloc`](Self::alloc), but give up waiting for the allocator
    /// lock once `interrupt` is raised.
    ///
    /// # Errors
    /// As [`alloc`](Self::alloc), plus [`HpaError::Interrupted`] when the
    /// wait was abandoned.
    pub fn alloc_interruptible(
        &self,
        controller: u32,
        count: u32,
        range: Option<AddrRange>,
        interrupt: &Interrupt,
    ) -> HpaResult<Vec<PhysAddr>> {
        self.validate(controller, count)?;
        let state = self.state.lock_interruptible(interrupt)?;
        self.alloc_locked(state, controller, count, range)
    }

    const fn validate(&self, controller: u32, count: u32) -> HpaResult<()> {
        if controller >= self.config.max_controllers() || count == 0 {
            return Err(HpaError::InvalidArgument);
        }
        Ok(())
    }

    fn alloc_locked(
        &self,
        mut state: MutexGuard<'_, State<Z>, RawSpin>,
        controller: u32,
        count: u32,
        range: Option<AddrRange>,
    ) -> HpaResult<Vec<PhysAddr>> {
        let State { zone, memcs } = &mut *state;
        let memc = memcs
            .get_mut(controller as usize)
            .ok_or(HpaError::InvalidArgument)?;

        let mut out = Vec::new();
        out.try_reserve_exact(count.min(memc.page_count()) as usize)
            .map_err(|_| HpaError::OutOfMemory)?;
        memc.alloc(zone, &mut out, count, range.as_ref(), &self.config)?;
        debug!("MEMC{controller}: allocated {}/{count} pages", out.len());
        Ok(out)
    }

    /// Return `pages` to `controller`.
    ///
    /// Failures are logged and otherwise ignored; every page is attempted.
    pub fn free(&self, controller: u32, pages: &[PhysAddr]) {
        if pages.is_empty() {
            warn!("MEMC{controller}: nothing to free");
            return;
        }
        let mut state = self.state.lock();
        let State { zone, memcs } = &mut *state;
        let Some(memc) = memcs.get_mut(controller as usize) else {
            warn!("free: invalid controller {controller}");
            return;
        };
        if let Err(e) = memc.free(zone, pages) {
            warn!("MEMC{controller}: free of {} pages incomplete: {e}", pages.len());
        }
    }

    /// Index of the managed region fully containing `[addr, addr + size)`.
    #[must_use]
    pub fn find_region(&self, addr: PhysAddr, size: u64) -> Option<usize> {
        region::find_region(&self.regions, addr, size)
    }

    /// Base and size of managed region `index`.
    #[must_use]
    pub fn region_info(&self, index: usize) -> Option<(PhysAddr, u64)> {
        self.regions.get(index).map(|r| (r.base, r.size))
    }

    /// Bookkeeping of every block of `controller`; empty for unknown controllers.
    #[must_use]
    pub fn blocks(&self, controller: u32) -> Vec<BlockSnapshot> {
        self.state
            .lock()
            .memcs
            .get(controller as usize)
            .map(|m| m.blocks().iter().map(Block::snapshot).collect())
            .unwrap_or_default()
    }

    /// Whether every block still satisfies its bookkeeping invariants.
    #[must_use]
    pub fn check(&self) -> bool {
        self.state
            .lock()
            .memcs
            .iter()
            .flat_map(Memc::blocks)
            .all(Block::check)
    }

    /// Pages currently handed out, over all controllers.
    #[must_use]
    pub fn allocated_pages(&self) -> u32 {
        self.state.lock().memcs.iter().map(Memc::allocated_pages).sum()
    }

    /// Write the occupancy report of every block to `w`.
    ///
    /// # Errors
    /// Whatever `w` reports.
    pub fn dump<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        let state = self.state.lock();
        for (controller, memc) in (0_u32..).zip(&state.memcs) {
            for (index, block) in memc.blocks().iter().enumerate() {
                report::write_block(w, controller, index, block)?;
            }
        }
        Ok(())
    }

    /// Emit the occupancy report through the logger.
    pub fn log_report(&self) {
        let mut s = String::new();
        if self.dump(&mut s).is_err() {
            warn!("report truncated");
        }
        for line in s.lines() {
            info!("{line}");
        }
    }

    /// Tear the allocator down and hand back the platform collaborator.
    ///
    /// # Errors
    /// [`HpaError::InUse`] with the number of pages still allocated; the
    /// allocator is dropped without releasing them.
    pub fn shutdown(self) -> Result<Z, HpaError> {
        let State { zone, memcs } = self.state.into_inner();
        let in_use: u32 = memcs.iter().map(Memc::allocated_pages).sum();
        if in_use != 0 {
            warn!("shutdown with {in_use} pages still allocated");
            return Err(HpaError::InUse(in_use));
        }
        Ok(zone)
    }
}

impl<Z> fmt::Debug for Allocator<Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("config", &self.config)
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}
