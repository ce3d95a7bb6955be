//! Paged bump allocator.
//!
//! Owns an ordered list of memory pages and serves fixed-size and oversize
//! object requests by bumping a frontier, exactly as the donor's
//! `heap.rs` `Segment` does for its size-classed pages — except here a
//! page holds objects of any size up to [`PagedAllocator::regular_page_size`]
//! rather than a single size class, matching spec §4.1.

use std::collections::{HashMap, HashSet};

use sys_alloc::MmapOptions;

use crate::layout::{outline_of, WordPtr};

/// Default byte size of a regular page (spec §6.3).
pub const DEFAULT_REGULAR_PAGE_SIZE: usize = 4096;

/// Whether a page holds many small objects or exactly one oversize object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Fixed-size page holding many small objects.
    Regular,
    /// Page sized to hold exactly one object larger than a regular page.
    Oversize,
}

/// A contiguous allocation owned by the [`PagedAllocator`].
///
/// Backed by a real OS mapping ([`sys_alloc::Mmap`]) rather than a second
/// trip through the global Rust allocator, mirroring how the donor's
/// `Segment` backs its pages.
pub struct Page {
    mmap: sys_alloc::Mmap,
    kind: PageKind,
    /// Bytes in use, always a multiple of 8 (spec §3 invariant 4).
    occupied: usize,
}

impl Page {
    fn new(size_bytes: usize, kind: PageKind) -> Self {
        assert!(size_bytes % 8 == 0, "page size must be a word multiple");
        // SAFETY: anonymous mapping, no aliasing concerns at creation time.
        let mmap = unsafe { MmapOptions::new().len(size_bytes).map_anon() }.unwrap_or_else(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(size_bytes, %err, "page allocation failed");
            std::process::abort();
        });
        Self { mmap, kind, occupied: 0 }
    }

    /// Base address of this page's storage.
    #[must_use]
    pub fn base(&self) -> *mut u64 {
        self.mmap.ptr().cast()
    }

    /// Total byte size of this page.
    #[must_use]
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Bytes currently in use.
    #[must_use]
    pub const fn occupied(&self) -> usize {
        self.occupied
    }

    /// Bytes still free for bump allocation.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.size() - self.occupied
    }

    /// Kind of page (regular or oversize).
    #[must_use]
    pub const fn kind(&self) -> PageKind {
        self.kind
    }

    /// Reset this page to empty so it can be reused as a bump target for
    /// different objects than whatever it previously held (spec §4.3: a
    /// scratch page is held across cleanup steps and its old `occupied`
    /// count must not leak into what gets copied onto it next).
    fn clear(&mut self) {
        self.occupied = 0;
    }

    fn try_bump(&mut self, size_bytes: usize) -> Option<*mut u64> {
        if self.free_space() < size_bytes {
            return None;
        }
        // SAFETY: `occupied` bytes are always within `[0, size())`.
        let ptr = unsafe { self.base().byte_add(self.occupied) };
        self.occupied += size_bytes;
        Some(ptr)
    }

    /// Iterate the objects placed on this page, in layout order, by
    /// walking each object's own size as read from its outline (the
    /// "ordered range scan" of spec §4.3, grounded in
    /// `original_source/lib_cacophony/gc/gc.cpp::cleanup`'s
    /// `traverse_pages` helper).
    #[must_use]
    pub fn objects(&self) -> PageObjects<'_> {
        PageObjects { page: self, cursor_words: 0 }
    }
}

/// Iterator over the objects placed on a [`Page`], derived purely from
/// each object's own outline (no side table is kept).
pub struct PageObjects<'a> {
    page: &'a Page,
    cursor_words: usize,
}

impl Iterator for PageObjects<'_> {
    type Item = WordPtr;

    fn next(&mut self) -> Option<Self::Item> {
        let occupied_words = self.page.occupied / 8;
        if self.cursor_words >= occupied_words {
            return None;
        }
        // SAFETY: objects are packed contiguously within `occupied`.
        let storage = unsafe { self.page.base().add(self.cursor_words) };
        // SAFETY: `storage` holds a live object's outline-pointer slot.
        let data_ptr = unsafe { WordPtr::new(storage.add(1)).expect("null data pointer on page") };
        // SAFETY: forwarded to `outline_of`'s contract.
        let outline = unsafe { outline_of(data_ptr, false) };
        self.cursor_words += 1 + outline.n_words();
        Some(data_ptr)
    }
}

/// Owns every page backing the heap and services bump allocations for
/// compiled code (spec §4.1).
pub struct PagedAllocator {
    pages: Vec<Page>,
    regular_page_size: usize,
}

impl PagedAllocator {
    /// Create an allocator with the default regular page size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_regular_page_size(DEFAULT_REGULAR_PAGE_SIZE)
    }

    /// Create an allocator with a custom regular page size (a
    /// [`crate::runtime::RuntimeConfig`] knob, not a Rust-level
    /// constant, so tests can exercise page boundaries without allocating
    /// thousands of objects).
    #[must_use]
    pub fn with_regular_page_size(regular_page_size: usize) -> Self {
        assert!(regular_page_size % 8 == 0, "regular page size must be a word multiple");
        Self { pages: Vec::new(), regular_page_size }
    }

    /// Byte size used for regular pages.
    #[must_use]
    pub const fn regular_page_size(&self) -> usize {
        self.regular_page_size
    }

    /// All pages currently owned, tail last.
    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Total occupied bytes across every owned page (testable property P3).
    #[must_use]
    pub fn total_occupied(&self) -> usize {
        self.pages.iter().map(Page::occupied).sum()
    }

    /// Total number of live object placements across every owned page.
    #[must_use]
    pub fn total_object_count(&self) -> usize {
        self.pages.iter().map(|p| p.objects().count()).sum()
    }

    /// Allocate `size_bytes` of storage for a new object (spec §4.4
    /// step 3's caller). Returns the address of the storage's first word
    /// (the outline slot), not the data pointer.
    pub fn allocate(&mut self, size_bytes: usize) -> *mut u64 {
        assert!(size_bytes > 0 && size_bytes % 8 == 0, "size_bytes must be a positive word multiple");

        if size_bytes > self.regular_page_size {
            let mut page = Page::new(size_bytes, PageKind::Oversize);
            let ptr = page.try_bump(size_bytes).expect("a fresh oversize page always fits its one object");
            self.pages.push(page);
            return ptr;
        }

        if self.pages.last().is_none_or(|tail| tail.free_space() < size_bytes) {
            self.pages.push(Page::new(self.regular_page_size, PageKind::Regular));
        }
        let tail = self.pages.len() - 1;
        let ptr = self.pages[tail].try_bump(size_bytes).expect("freshly grown tail must fit the request");

        // Keep the most free-space page as the tail (spec §4.1, testable
        // property P4).
        if self.pages.len() >= 2 {
            let last = self.pages.len() - 1;
            if self.pages[last].free_space() < self.pages[last - 1].free_space() {
                self.pages.swap(last, last - 1);
            }
        }
        ptr
    }

    fn ensure_evacuation_tail_fits(&mut self, size_bytes: usize, scratch: &mut Option<Page>) {
        if self.pages.last().is_none_or(|tail| tail.free_space() < size_bytes) {
            let page = scratch.take().unwrap_or_else(|| Page::new(self.regular_page_size, PageKind::Regular));
            self.pages.push(page);
        }
    }

    /// Compact the heap, evacuating survivors into fresh pages and
    /// returning the old-&gt;new address map (spec §4.3).
    ///
    /// `alive` is the set of data pointers the [`crate::walker::ObjectGraphWalker`]
    /// marked reachable.
    pub fn cleanup(&mut self, alive: &HashSet<WordPtr>) -> HashMap<WordPtr, WordPtr> {
        let mut relocation = HashMap::new();
        let pages_to_process = std::mem::take(&mut self.pages);

        // Step 2: pages every one of whose objects survived are
        // re-attached unchanged, with no relocation entries.
        let mut remaining = Vec::new();
        for page in pages_to_process {
            let untouched = page.objects().all(|obj| alive.contains(&obj));
            if untouched {
                self.pages.push(page);
            } else {
                remaining.push(page);
            }
        }

        // Step 3: evacuate survivors out of the rest, reusing at most one
        // detached scratch page to avoid thrashing the OS allocator.
        let mut scratch: Option<Page> = None;
        for page in remaining {
            let survivors: Vec<WordPtr> = page.objects().filter(|obj| alive.contains(obj)).collect();
            if survivors.is_empty() {
                if scratch.is_none() {
                    let mut page = page;
                    page.clear();
                    scratch = Some(page);
                }
                // else: `page` is dropped here, unmapping it.
                continue;
            }

            for old_data in survivors {
                // SAFETY: `old_data` came from `page.objects()`.
                let outline = unsafe { outline_of(old_data, false) };
                let total_bytes = outline.total_size_bytes();
                self.ensure_evacuation_tail_fits(total_bytes, &mut scratch);

                let dest_storage = self.pages.last_mut().expect("a tail page was just ensured").try_bump(total_bytes).expect("grown tail must fit the survivor");
                let old_storage = old_data.as_ptr().wrapping_sub(1);
                // SAFETY: `old_storage` is `1 + N` live words; `dest_storage`
                // was just reserved for exactly that many words.
                unsafe {
                    std::ptr::copy_nonoverlapping(old_storage, dest_storage, total_bytes / 8);
                }
                // SAFETY: `dest_storage` was just written with a full object.
                let new_data = unsafe { WordPtr::new(dest_storage.add(1)).expect("non-null destination") };
                relocation.insert(old_data, new_data);
            }

            if scratch.is_none() {
                let mut page = page;
                page.clear();
                scratch = Some(page);
            }
            // else: `page` is dropped here, unmapping it.
        }

        // Any still-held scratch page is returned to the OS; the
        // allocator's own tail already serves as next cycle's frontier.
        drop(scratch);

        relocation
    }

    /// Snapshot metrics-relevant counters before a collection begins.
    pub(crate) fn metrics_snapshot(&self) -> (usize, usize) {
        (self.total_object_count(), self.total_occupied())
    }
}

impl Default for PagedAllocator {
    fn default() -> Self {
        Self::new()
    }
}
