//! # Huge Page Allocator
//!
//! Hands out 2 MiB physically contiguous, 2 MiB aligned pages from large
//! regions of *movable* memory that the platform page allocator keeps lending
//! to ordinary movable allocations in the meantime. Pages are reclaimed on
//! demand by asking the platform to migrate whatever currently occupies them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Allocator                           │
//! │    • Global (interruptible) lock                    │
//! │    • Argument validation, reports, shutdown         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ one per memory controller
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Memc                                │
//! │    • Fast path: take pages that are already free    │
//! │    • Slow path: force migration, two passes         │
//! │    • Rollback on hard errors                        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ up to 1 GiB each
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Block                               │
//! │    • busy / allocated bitmaps per huge page         │
//! │    • Talks to the platform through MovableZone      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Before the allocator exists, the boot configuration is collected in a
//! [`RegionRegistry`]: ranges are merged, assigned to the controller whose
//! decode window holds them, and clipped to usable memory.
//!
//! ## Core Components
//!
//! ### Regions ([`region`])
//! * **Merging**: overlapping and touching ranges become one region
//! * **Controller assignment**: regions straddling a window are split
//! * **Capacity**: at most [`config::MAX_REGIONS`] regions
//!
//! ### Blocks ([`block`])
//! Each page is in one of four states, see [`PageState`]. A page that failed
//! to reserve is marked busy so later scans of the same request skip it;
//! [`Block::clear_busy`](block::Block::clear_busy) forgets those failures.
//!
//! ### Platform ([`zone`])
//! The allocator never touches page tables or free lists itself. An embedder
//! implements [`MovableZone`] on top of its page allocator.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_hpa::{AddrRange, Allocator, HpaConfig, MigrateType, MovableZone, PhysAddr};
//! use kernel_hpa::{Pfn, PfnRange, RegionRegistry, ZoneError};
//! use kernel_hpa::region::ControllerWindow;
//!
//! /// Platform where every reservation succeeds.
//! struct Idle;
//!
//! impl MovableZone for Idle {
//!     fn try_reserve_contiguous(&mut self, _: PfnRange) -> Result<(), ZoneError> { Ok(()) }
//!     fn release_contiguous(&mut self, _: Pfn, _: u64) {}
//!     fn find_free_candidate(&self, _: PfnRange, _: MigrateType, _: u32) -> Option<Pfn> { None }
//!     fn reserve_physical_range(&mut self, _: PhysAddr, _: u64) -> Result<(), ZoneError> {
//!         Ok(())
//!     }
//! }
//!
//! const MIB: u64 = 1024 * 1024;
//! let mut registry = RegionRegistry::new();
//! registry.add_region(PhysAddr::new(256 * MIB), 64 * MIB).unwrap();
//! registry.configure(
//!     &[ControllerWindow::new(0, AddrRange::new(PhysAddr::new(0), 1024 * MIB))],
//!     &[AddrRange::new(PhysAddr::new(0), 1024 * MIB)],
//! );
//!
//! let hpa = Allocator::new(HpaConfig::default(), Idle, registry);
//! let pages = hpa.alloc(0, 4, None).unwrap();
//! assert_eq!(pages.len(), 4);
//! assert_eq!(pages[0], PhysAddr::new(256 * MIB));
//!
//! hpa.free(0, &pages);
//! assert!(hpa.shutdown().is_ok());
//! ```
//!
//! ## Concurrency
//!
//! Every operation runs under a single [`kernel_sync::SpinMutex`].
//! [`Allocator::alloc_interruptible`] waits for it with an
//! [`Interrupt`](kernel_sync::Interrupt) token so a caller that is being torn
//! down can stop waiting. Once the lock is held, a request runs to completion
//! unless the platform itself reports [`ZoneError::Interrupted`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod addr;
pub mod allocator;
mod bitmap;
pub mod block;
pub mod config;
pub mod error;
pub mod memc;
pub mod region;
pub mod report;
pub mod zone;

pub use addr::{AddrRange, Pfn, PfnRange, PhysAddr};
pub use allocator::Allocator;
pub use block::{BlockSnapshot, PageState};
pub use config::HpaConfig;
pub use error::{HpaError, HpaResult};
pub use region::{ControllerWindow, Region, RegionRegistry};
pub use zone::{MigrateType, MovableZone, ZoneError};
