//! # Per-Controller Block List
//!
//! Allocation strategy for one memory controller:
//!
//! 1. **Fast path**: for orders from a full huge page down to 1/8 of one,
//!    ask every block to take pages that are already free.
//! 2. **Slow path**: two compacting scans over every block. Before the second
//!    scan the "tried and failed" busy bits are cleared so transiently
//!    unavailable pages get another chance.
//!
//! A request stops as soon as enough pages were collected. A hard error
//! anywhere releases every page collected for the request.

use crate::addr::{AddrRange, PhysAddr};
use crate::block::Block;
use crate::config::{FAST_PATH_ORDER_STEPS, HPA_ORDER, HPA_PAGE_SIZE, HpaConfig};
use crate::error::{HpaError, HpaResult};
use crate::zone::MovableZone;
use alloc::vec::Vec;
use log::{debug, error, warn};

#[derive(Debug, Default)]
pub struct Memc {
    blocks: Vec<Block>,
}

impl Memc {
    #[must_use]
    pub const fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Pages managed by this controller, allocated or not.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.blocks.iter().map(Block::page_count).sum()
    }

    /// Pages currently handed out from this controller.
    #[must_use]
    pub fn allocated_pages(&self) -> u32 {
        self.blocks.iter().map(Block::allocated_count).sum()
    }

    /// Carve `[base, end)` into blocks of at most `max_block_pages` pages.
    ///
    /// `base` is rounded up to a huge page; a trailing partial page is
    /// ignored. Returns the number of pages added.
    ///
    /// # Errors
    /// [`HpaError::OutOfMemory`] if block metadata cannot be allocated. Blocks
    /// created by this call are removed again in that case.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_memory(
        &mut self,
        base: PhysAddr,
        end: PhysAddr,
        max_block_pages: u32,
    ) -> HpaResult<u64> {
        let Some(mut base) = base.align_up(HPA_PAGE_SIZE).filter(|b| *b < end) else {
            return Ok(0);
        };
        let total = (end - base) / HPA_PAGE_SIZE;
        let mut remaining = total;
        let first_new = self.blocks.len();

        while remaining > 0 {
            let pages = remaining.min(u64::from(max_block_pages)) as u32;
            let block = self
                .blocks
                .try_reserve(1)
                .map_err(|_| HpaError::OutOfMemory)
                .and_then(|()| Block::try_new(base, pages));
            match block {
                Ok(block) => {
                    debug!("adding block {base} with {pages} pages");
                    self.blocks.push(block);
                }
                Err(e) => {
                    self.blocks.truncate(first_new);
                    return Err(e);
                }
            }
            remaining -= u64::from(pages);
            base += u64::from(pages) * HPA_PAGE_SIZE;
        }
        Ok(total)
    }

    /// Collect up to `count` pages into `out`.
    ///
    /// Fewer than `count` pages is not an error. On error `out` is left as it
    /// was on entry and every page taken by this call has been released.
    ///
    /// # Errors
    /// Hard platform failures ([`HpaError::Interrupted`],
    /// [`HpaError::ReservationFailed`]).
    pub fn alloc<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        out: &mut Vec<PhysAddr>,
        count: u32,
        range: Option<&AddrRange>,
        config: &HpaConfig,
    ) -> HpaResult<()> {
        let first_new = out.len();
        let result = self.alloc_pages(zone, out, count, range, config);
        if let Err(e) = result {
            debug!(
                "allocation failed with {e}, releasing {} pages",
                out.len() - first_new
            );
            if self.free(zone, &out[first_new..]).is_err() {
                error!("rollback left pages behind");
            }
            out.truncate(first_new);
            return Err(e);
        }
        Ok(())
    }

    fn alloc_pages<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        out: &mut Vec<PhysAddr>,
        count: u32,
        range: Option<&AddrRange>,
        config: &HpaConfig,
    ) -> HpaResult<()> {
        let mut remaining = count;

        for order in (HPA_ORDER - FAST_PATH_ORDER_STEPS..=HPA_ORDER).rev() {
            for block in &mut self.blocks {
                let n = block.alloc_fast(
                    zone,
                    out,
                    remaining,
                    range,
                    order,
                    config.fast_path_retries(),
                )?;
                remaining -= n;
                if remaining == 0 {
                    return Ok(());
                }
            }
        }

        for pass in 0..2 {
            if pass == 1 {
                // retry pages that failed transiently during the first pass
                self.blocks.iter_mut().for_each(Block::clear_busy);
            }
            for block in &mut self.blocks {
                let n = block.alloc_slow(zone, out, remaining, range, config.slow_path_batch())?;
                debug!(
                    "block {}: {n}/{remaining} pages in pass {pass}",
                    block.base()
                );
                remaining -= n;
                if remaining == 0 {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Release `pages`, each to the block that owns it.
    ///
    /// Every page is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// The last failure seen: [`HpaError::NotFound`] for a page outside every
    /// block, or the block's rejection of the page.
    pub fn free<Z: MovableZone + ?Sized>(
        &mut self,
        zone: &mut Z,
        pages: &[PhysAddr],
    ) -> HpaResult<()> {
        let mut result = Ok(());
        for &page in pages {
            let Some(block) = self.blocks.iter_mut().find(|b| b.contains(page)) else {
                error!("page {page} does not belong to any block");
                result = Err(HpaError::NotFound(page));
                continue;
            };
            if let Err(e) = block.free_one(zone, page) {
                warn!("failed to free page {page}: {e}");
                result = Err(e);
            }
        }
        result
    }
}
