//! Data cache maintenance by virtual address.
//!
//! Buffers shared with DMA engines, the secure monitor or the next boot
//! stage are cleaned or invalidated line by line to the point of coherency.

use crate::on_target;

/// Cache line size of the T186 CPU clusters.
pub const CACHE_LINE_SIZE: usize = 64;

fn line_range(start: usize, len: usize) -> impl Iterator<Item = usize> {
    let first = start & !(CACHE_LINE_SIZE - 1);
    let end = start.saturating_add(len);
    (first..end).step_by(CACHE_LINE_SIZE)
}

/// Write back dirty lines covering `[start, start + len)`.
pub fn clean_dcache_range(start: usize, len: usize) {
    for _line in line_range(start, len) {
        on_target!("dc cvac, {}", in(reg) _line, options(nostack));
    }
    crate::dsb();
}

/// Discard lines covering `[start, start + len)`.
pub fn invalidate_dcache_range(start: usize, len: usize) {
    for _line in line_range(start, len) {
        on_target!("dc ivac, {}", in(reg) _line, options(nostack));
    }
    crate::dsb();
}

/// Write back and discard lines covering `[start, start + len)`.
pub fn clean_invalidate_dcache_range(start: usize, len: usize) {
    for _line in line_range(start, len) {
        on_target!("dc civac, {}", in(reg) _line, options(nostack));
    }
    crate::dsb();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_partial_lines() {
        let lines: Vec<usize> = line_range(0x1030, 0x50).collect();
        assert_eq!(lines, vec![0x1000, 0x1040]);
        assert_eq!(line_range(0x1000, 0).count(), 0);
    }
}
