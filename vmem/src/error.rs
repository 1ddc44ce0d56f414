use std::fmt;

/// A user-program error raised on the fault path.
///
/// These unwind to "terminate the offending process" in the fault
/// dispatcher; they never halt the kernel itself. Kernel-invariant
/// violations (double frame release, short page I/O, victim selection on a
/// non-full pool) are asserted instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The faulting virtual address falls outside the process page table.
    AddressOutOfBounds { vaddr: usize, num_pages: usize },
    /// A store hit a page mapped read-only.
    ReadOnlyWrite { vaddr: usize },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::AddressOutOfBounds { vaddr, num_pages } => write!(
                f,
                "virtual address {:#x} is beyond the address space ({} pages)",
                vaddr, num_pages
            ),
            Fault::ReadOnlyWrite { vaddr } => {
                write!(f, "write to read-only page at virtual address {:#x}", vaddr)
            }
        }
    }
}

impl std::error::Error for Fault {}

/// A malformed executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The magic word does not identify a known binary format.
    BadMagic(u32),
    /// The image is shorter than its header claims.
    Truncated { expected: usize, actual: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::BadMagic(magic) => {
                write!(f, "bad magic word {:#010x} in executable header", magic)
            }
            LoadError::Truncated { expected, actual } => write!(
                f,
                "truncated executable image: header declares {} bytes, image has {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for LoadError {}
