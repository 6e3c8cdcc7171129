//! # Occupancy Report
//!
//! Renders a block as a header line followed by one character per page:
//!
//! ```text
//! MEMC0 BLOCK:0 13/16 pages 0x40000000..0x42000000
//!  0x40000000: AA.B............
//! ```
//!
//! See [`PageState::as_char`](crate::PageState::as_char) for the legend.
//! Page lines are wrapped so no line exceeds [`LINE_WIDTH`] columns.

use crate::block::Block;
use crate::config::HPA_PAGE_SIZE;
use core::fmt::{self, Write};

/// Widest line a report produces, excluding the newline.
pub const LINE_WIDTH: usize = 79;

/// Tracks the column of the line being written.
struct Columns<'a, W> {
    inner: &'a mut W,
    col: usize,
}

impl<W: Write> Write for Columns<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.col += s.len();
        self.inner.write_str(s)
    }
}

/// Write the report of block `index` of controller `controller`.
///
/// # Errors
/// Whatever `w` reports.
pub fn write_block<W: Write>(
    w: &mut W,
    controller: u32,
    index: usize,
    block: &Block,
) -> fmt::Result {
    writeln!(
        w,
        "MEMC{controller} BLOCK:{index} {}/{} pages {}..{}",
        block.free_count(),
        block.page_count(),
        block.base(),
        block.end()
    )?;

    let mut out = Columns { inner: w, col: 0 };
    let mut page = 0;
    while page < block.page_count() {
        write!(out, " {}: ", block.base() + u64::from(page) * HPA_PAGE_SIZE)?;
        while out.col < LINE_WIDTH && page < block.page_count() {
            out.write_char(block.page_state(page).as_char())?;
            page += 1;
        }
        out.write_char('\n')?;
        out.col = 0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{PfnRange, PhysAddr, Pfn};
    use crate::zone::{MigrateType, MovableZone, ZoneError};

    struct Always;

    impl MovableZone for Always {
        fn try_reserve_contiguous(&mut self, _: PfnRange) -> Result<(), ZoneError> {
            Ok(())
        }
        fn release_contiguous(&mut self, _: Pfn, _: u64) {}
        fn find_free_candidate(&self, _: PfnRange, _: MigrateType, _: u32) -> Option<Pfn> {
            None
        }
        fn reserve_physical_range(&mut self, _: PhysAddr, _: u64) -> Result<(), ZoneError> {
            Ok(())
        }
    }

    #[test]
    fn small_block() {
        let mut block = Block::try_new(PhysAddr::new(0x4000_0000), 16).unwrap();
        let mut out = Vec::new();
        block.alloc_slow(&mut Always, &mut out, 2, None, 8).unwrap();

        let mut s = String::new();
        write_block(&mut s, 0, 3, &block).unwrap();
        assert_eq!(
            s,
            "MEMC0 BLOCK:3 14/16 pages 0x40000000..0x42000000\n 0x40000000: AA..............\n"
        );
    }

    #[test]
    fn lines_are_wrapped() {
        let block = Block::try_new(PhysAddr::new(0x8000_0000), 512).unwrap();
        let mut s = String::new();
        write_block(&mut s, 1, 0, &block).unwrap();

        let mut lines = s.lines();
        assert_eq!(
            lines.next(),
            Some("MEMC1 BLOCK:0 512/512 pages 0x80000000..0xc0000000")
        );
        let mut pages = 0;
        for line in lines {
            assert!(line.len() <= LINE_WIDTH, "{line}");
            let (prefix, cells) = line.rsplit_once(": ").unwrap();
            assert!(prefix.starts_with(" 0x"));
            assert!(cells.chars().all(|c| c == '.'));
            pages += cells.len();
        }
        assert_eq!(pages, 512);
    }
}
