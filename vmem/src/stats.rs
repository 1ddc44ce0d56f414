use std::fmt;

/// Paging counters, aggregated by [`Kernel::statistics`](crate::kernel::Kernel::statistics).
///
/// Each counter is owned by the component that increments it (address
/// spaces count their own loads and swaps, the frame directory counts
/// evictions, the kernel counts translation misses); this struct is only
/// the reporting view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub translation_misses: u64,
    pub demand_loads: u64,
    pub swaps_in: u64,
    pub swaps_out: u64,
    pub evictions: u64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Paging: translation misses {}", self.translation_misses)?;
        writeln!(f, "Paging: demand loads {}", self.demand_loads)?;
        writeln!(f, "Paging: swaps in {}", self.swaps_in)?;
        writeln!(f, "Paging: swaps out {}", self.swaps_out)?;
        write!(f, "Paging: evictions {}", self.evictions)
    }
}
