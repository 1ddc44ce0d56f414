/// One virtual page's translation state.
///
/// `frame == None` is the "not resident" sentinel: together with
/// `valid == true` it means the page lives in the swap file. `valid ==
/// false` means the page has never been loaded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: usize,
    pub frame: Option<usize>,
    pub valid: bool,
    pub dirty: bool,
    pub referenced: bool,
    pub read_only: bool,
}

impl TranslationEntry {
    /// Demand-loading initial state. The dirty bit starts set so the first
    /// eviction always writes the page out: until then the swap file holds
    /// zeros, not this page's content.
    pub fn never_loaded(vpn: usize) -> TranslationEntry {
        TranslationEntry {
            vpn,
            frame: None,
            valid: false,
            dirty: true,
            referenced: false,
            read_only: false,
        }
    }
}

/// Linear per-process page table, indexed by virtual page number.
#[derive(Debug)]
pub struct PageTable {
    table: Vec<TranslationEntry>,
}

impl PageTable {
    pub fn new(num_pages: usize) -> PageTable {
        PageTable {
            table: (0..num_pages).map(TranslationEntry::never_loaded).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, vpn: usize) -> &TranslationEntry {
        let entry = &self.table[vpn];
        assert_eq!(entry.vpn, vpn, "page table entry does not match its index");
        entry
    }

    pub fn get_mut(&mut self, vpn: usize) -> &mut TranslationEntry {
        let entry = &mut self.table[vpn];
        assert_eq!(entry.vpn, vpn, "page table entry does not match its index");
        entry
    }

    /// Mirrors a translation-cache copy back into the table. The cache copy
    /// carries the live dirty/referenced bits and replaces the entry
    /// wholesale, so a table-side change made while the line was cached
    /// (e.g. flipping `read_only`) is lost; change protection bits only
    /// while no line caches the page.
    pub fn write_back(&mut self, entry: TranslationEntry) {
        assert!(entry.vpn < self.table.len(), "write-back outside page table");
        self.table[entry.vpn] = entry;
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.table.iter()
    }
}
