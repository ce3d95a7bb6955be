//! Outline decoding.
//!
//! An outline is a compiler-emitted, read-only descriptor co-located with
//! the program text: it is never moved and never reclaimed by the
//! collector. Word 0 holds the number of data words the described object
//! or frame carries; the following `ceil(n / 64)` words are a bitmap
//! whose bit `i` is set exactly when word `i` is a reference.

use std::slice;

/// Bits per bitmap chunk (one machine word).
const BITS_PER_CHUNK: usize = 64;

/// A borrowed view of a compiler-emitted outline.
///
/// `Outline` is a dynamically-sized type over its own backing words, so a
/// `&Outline` is exactly as wide as a raw pointer — it carries no length
/// field of its own beyond what's encoded in word 0.
#[repr(transparent)]
pub struct Outline {
    words: [u64],
}

impl Outline {
    /// Reinterpret a raw outline pointer as an `Outline`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point at a live outline: word 0 must be
    /// followed by at least `ceil(word0 / 64)` more readable words.
    #[must_use]
    pub unsafe fn from_raw<'a>(ptr: *const u64) -> &'a Self {
        assert!(!ptr.is_null(), "null outline pointer");
        // SAFETY: caller guarantees `ptr` is live for word 0.
        let n_words = unsafe { *ptr } as usize;
        let chunks = n_words.div_ceil(BITS_PER_CHUNK);
        // SAFETY: caller guarantees the bitmap words following word 0 are live.
        let raw = unsafe { slice::from_raw_parts(ptr, 1 + chunks) };
        // SAFETY: `Outline` is `repr(transparent)` over `[u64]`.
        unsafe { &*(std::ptr::from_ref::<[u64]>(raw) as *const Self) }
    }

    /// Build a `'static` outline from its word count and the offsets of
    /// its reference slots, leaking the backing storage.
    ///
    /// This stands in for a compiler that would place the outline in a
    /// read-only data section; real outlines are never constructed this
    /// way at runtime.
    #[must_use]
    pub fn leaked(n_words: usize, reference_offsets: impl IntoIterator<Item = usize>) -> &'static Self {
        let chunks = n_words.div_ceil(BITS_PER_CHUNK);
        let mut words = vec![0u64; 1 + chunks];
        words[0] = n_words as u64;
        for offset in reference_offsets {
            assert!(offset < n_words, "reference offset {offset} out of bounds for {n_words} words");
            words[1 + offset / BITS_PER_CHUNK] |= 1u64 << (offset % BITS_PER_CHUNK);
        }
        let leaked: &'static [u64] = Box::leak(words.into_boxed_slice());
        // SAFETY: `leaked` was just built as a well-formed outline.
        unsafe { Self::from_raw(leaked.as_ptr()) }
    }

    /// Number of data words this outline describes.
    #[must_use]
    pub fn n_words(&self) -> usize {
        self.words[0] as usize
    }

    /// Total size in bytes of an object described by this outline,
    /// including the leading outline-pointer slot (spec §4.4 step 2).
    #[must_use]
    pub fn total_size_bytes(&self) -> usize {
        8 * (1 + self.n_words())
    }

    /// Raw pointer to this outline's word 0 — the value stored into an
    /// object's or frame's outline slot.
    #[must_use]
    pub fn as_ptr(&self) -> *const u64 {
        self.words.as_ptr()
    }

    fn bitmap_chunks(&self) -> &[u64] {
        &self.words[1..]
    }

    /// Offsets of reference-bearing words, ascending.
    pub fn reference_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let n = self.n_words();
        self.bitmap_chunks().iter().enumerate().flat_map(move |(chunk_idx, &chunk)| {
            (0..BITS_PER_CHUNK).filter(move |bit| chunk & (1u64 << bit) != 0).filter_map(move |bit| {
                let offset = chunk_idx * BITS_PER_CHUNK + bit;
                (offset < n).then_some(offset)
            })
        })
    }
}
