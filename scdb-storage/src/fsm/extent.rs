//! L2 free-extent list: runs of `>= COALESCE_THRESHOLD` contiguous free
//! pages, tracked separately from the L1 bitmap so that a large allocation
//! request can be satisfied without scanning the whole bitmap bit by bit.

/// Minimum run length, in pages, before a free span is promoted from the L1
/// bitmap into the L2 extent list.
pub const COALESCE_THRESHOLD: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start_page: u64,
    pub page_count: u64,
}

impl Extent {
    pub fn end_page(&self) -> u64 {
        self.start_page + self.page_count
    }
}

/// Sorted-by-start list of free extents, each at least [`COALESCE_THRESHOLD`]
/// pages long.
#[derive(Debug, Clone, Default)]
pub struct ExtentList {
    extents: Vec<Extent>,
}

impl ExtentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_extents(mut extents: Vec<Extent>) -> Self {
        extents.sort_by_key(|e| e.start_page);
        Self { extents }
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.extents
    }

    pub fn total_free_pages(&self) -> u64 {
        self.extents.iter().map(|e| e.page_count).sum()
    }

    pub fn largest_extent(&self) -> u64 {
        self.extents.iter().map(|e| e.page_count).max().unwrap_or(0)
    }

    /// Inserts a free span, coalescing it with adjacent extents, keeping
    /// the list sorted. Spans shorter than [`COALESCE_THRESHOLD`] are
    /// dropped by the caller before reaching this list (they stay
    /// represented only in the L1 bitmap).
    pub fn insert(&mut self, extent: Extent) {
        self.extents.push(extent);
        self.extents.sort_by_key(|e| e.start_page);

        let mut merged = Vec::with_capacity(self.extents.len());
        for e in self.extents.drain(..) {
            if let Some(last) = merged.last_mut() {
                let last: &mut Extent = last;
                if last.end_page() == e.start_page {
                    last.page_count += e.page_count;
                    continue;
                }
            }
            merged.push(e);
        }
        self.extents = merged;
    }

    /// Best-fit allocation: the smallest extent that can satisfy `count`
    /// pages, to minimize fragmentation growth from over-splitting large
    /// extents for small requests.
    pub fn allocate_best_fit(&mut self, count: u64) -> Option<Extent> {
        let (idx, candidate) = self
            .extents
            .iter()
            .enumerate()
            .filter(|(_, e)| e.page_count >= count)
            .min_by_key(|(_, e)| e.page_count)
            .map(|(idx, e)| (idx, *e))?;

        if candidate.page_count == count {
            self.extents.remove(idx);
        } else {
            self.extents[idx] = Extent {
                start_page: candidate.start_page + count,
                page_count: candidate.page_count - count,
            };
        }

        Some(Extent {
            start_page: candidate.start_page,
            page_count: count,
        })
    }

    pub fn remove(&mut self, start_page: u64) -> Option<Extent> {
        let idx = self.extents.iter().position(|e| e.start_page == start_page)?;
        Some(self.extents.remove(idx))
    }
}
