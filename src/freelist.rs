use std::mem;

/// Size of the conceptual block header in bytes.
///
/// Every block, free or taken, is budgeted a header in front of its payload,
/// exactly like the two-word (size + next) header the classic embedded
/// free-list design writes into the region itself:
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        | -> Header (bookkeeping budget)
/// |        next         |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        | -> Bytes handed to the caller
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// We keep the bookkeeping in a typed side table instead of writing it into
/// the region (see [`FreeList`]), but the *budget* stays: splitting,
/// adjacency and arena sizing all account for this overhead, so the memory
/// layout is identical to the embedded variant.
pub(crate) const BLOCK_HEADER_SIZE: usize = 2 * mem::size_of::<usize>();

/// One free byte range inside an arena.
///
/// `offset` addresses the block header; the usable payload starts at
/// `offset + BLOCK_HEADER_SIZE` and holds `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeSpan {
    /// Offset of the block header, relative to the arena payload start.
    pub offset: usize,
    /// Usable bytes in this span, excluding the header.
    pub size: usize,
}

impl FreeSpan {
    /// Offset one past the span, i.e. where the header of a physically
    /// adjacent block would start.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + BLOCK_HEADER_SIZE + self.size
    }
}

/// Outcome of a best-fit search: which span to carve and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fit {
    /// The span at this table index matches the request exactly; taking it
    /// unlinks it whole.
    Exact(usize),
    /// The span at this table index is large enough to be split, leaving a
    /// valid remainder span behind.
    Split(usize),
}

/// The free-block bookkeeping of one arena.
///
/// This list only stores *where* the free ranges are. We don't need to keep
/// anything inside a free block itself; its payload is simply unused bytes
/// of the region:
///
/// ```text
///                     Free span table (sorted by offset)
///
///                 +--------+--------+--------+
///                 | {0,a}  | {x,b}  | {y,c}  |
///                 +---|----+---|----+---|----+
///                     |        |        |
/// +-------------------v--------v--------v------------------+
/// |        | +------+   +-------+  +------+   +-------+    |
/// | Region | | Free |   | Taken |  | Free |   | Taken |... |
/// |        | +------+   +-------+  +------+   +-------+    |
/// +---------------------------------------------------------+
/// ```
///
/// The classic design threads a linked list through the free payloads
/// instead. Offsets in a contiguous, sorted table give the same
/// address-ordered structure without any pointer arithmetic: neighbours in
/// the table are neighbours in address order, and physical adjacency is a
/// plain comparison on offsets.
///
/// Invariants:
/// - spans are sorted by `offset`, strictly ascending;
/// - spans never overlap;
/// - no two spans are physically adjacent once a [`FreeList::release`]
///   call has completed.
pub(crate) struct FreeList {
    spans: Vec<FreeSpan>,
}

impl FreeList {
    /// A list holding one initial span, as used for a freshly created arena.
    pub fn with_span(span: FreeSpan) -> Self {
        Self { spans: vec![span] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The lowest-addressed free span, if any.
    #[inline]
    pub fn first(&self) -> Option<FreeSpan> {
        self.spans.first().copied()
    }

    /// Total free payload bytes tracked by this list.
    pub fn free_bytes(&self) -> usize {
        self.spans.iter().map(|span| span.size).sum()
    }

    /// Best-fit search for `size` payload bytes.
    ///
    /// An exact-size span short-circuits the scan immediately. Otherwise the
    /// smallest span that still leaves room for a valid remainder header
    /// wins; ties keep the first span found (strict `<` comparison). A span
    /// in the dead zone `(size, size + BLOCK_HEADER_SIZE]` can never be
    /// carved: too big for an exact match, too small to leave a remainder.
    pub fn best_fit(&self, size: usize) -> Option<Fit> {
        let mut best: Option<usize> = None;

        for (index, span) in self.spans.iter().enumerate() {
            if span.size == size {
                return Some(Fit::Exact(index));
            }

            if span.size > size.saturating_add(BLOCK_HEADER_SIZE)
                && best.is_none_or(|current| span.size < self.spans[current].size)
            {
                best = Some(index);
            }
        }

        best.map(Fit::Split)
    }

    /// Carves `size` payload bytes out of the span selected by `fit` and
    /// returns the header offset of the taken block.
    ///
    /// An exact fit unlinks the span entirely. A split keeps the remainder
    /// in place in the table: the tail of the span becomes the new free
    /// span, so the ascending-offset order is untouched.
    pub fn take(&mut self, fit: Fit, size: usize) -> usize {
        match fit {
            Fit::Exact(index) => self.spans.remove(index).offset,
            Fit::Split(index) => {
                let span = &mut self.spans[index];
                debug_assert!(span.size > size + BLOCK_HEADER_SIZE);

                let offset = span.offset;
                span.offset += BLOCK_HEADER_SIZE + size;
                span.size -= BLOCK_HEADER_SIZE + size;

                offset
            }
        }
    }

    /// Returns the block with header offset `offset` and `size` payload
    /// bytes to the list, keeping the table sorted and merging with the
    /// physically adjacent neighbour on each side (at most one merge per
    /// direction).
    ///
    /// # Panics
    ///
    /// Panics if the block overlaps a span already in the list. That can
    /// only happen through a double free or a corrupted block, and
    /// continuing would corrupt memory further.
    pub fn release(&mut self, offset: usize, size: usize) {
        let index = match self.spans.binary_search_by_key(&offset, |span| span.offset) {
            Ok(_) => panic!("double free: span at offset {offset:#x} is already free"),
            Err(index) => index,
        };

        let span = FreeSpan { offset, size };

        if index > 0 {
            let prev = self.spans[index - 1];
            assert!(
                prev.end() <= offset,
                "free list corruption: block at {offset:#x} overlaps free span at {:#x}",
                prev.offset,
            );
        }
        if let Some(next) = self.spans.get(index) {
            assert!(
                span.end() <= next.offset,
                "free list corruption: block at {offset:#x} overlaps free span at {:#x}",
                next.offset,
            );
        }

        self.spans.insert(index, span);

        // Merge with the physically adjacent successor.
        if index + 1 < self.spans.len() && self.spans[index].end() == self.spans[index + 1].offset {
            let next = self.spans.remove(index + 1);
            self.spans[index].size += BLOCK_HEADER_SIZE + next.size;
        }

        // Merge with the physically adjacent predecessor.
        if index > 0 && self.spans[index - 1].end() == self.spans[index].offset {
            let merged = self.spans.remove(index);
            self.spans[index - 1].size += BLOCK_HEADER_SIZE + merged.size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A list with spans of the given sizes, separated by gaps as if a
    /// taken block sat between them, so they can never coalesce.
    fn spaced_list(sizes: &[usize]) -> FreeList {
        let mut spans = Vec::new();
        let mut offset = 0;

        for &size in sizes {
            spans.push(FreeSpan { offset, size });
            offset += 2 * (BLOCK_HEADER_SIZE + size);
        }

        FreeList { spans }
    }

    #[test]
    fn best_fit_selects_smallest_sufficient_span() {
        let list = spaced_list(&[16, 256, 64]);

        // 40 fits in 64 and 256; 64 is the better fit.
        assert_eq!(list.best_fit(40), Some(Fit::Split(2)));
    }

    #[test]
    fn exact_match_short_circuits() {
        let list = spaced_list(&[256, 64, 16]);

        // 64 is an exact match even though 256 was seen first.
        assert_eq!(list.best_fit(64), Some(Fit::Exact(1)));
    }

    #[test]
    fn dead_zone_span_is_not_a_split_candidate() {
        let list = spaced_list(&[40 + BLOCK_HEADER_SIZE]);

        // Too big for exact, too small to leave a remainder header.
        assert_eq!(list.best_fit(40), None);
        // As an exact match it is usable.
        assert_eq!(list.best_fit(40 + BLOCK_HEADER_SIZE), Some(Fit::Exact(0)));
    }

    #[test]
    fn tie_break_keeps_first_found() {
        let list = spaced_list(&[128, 128]);

        assert_eq!(list.best_fit(32), Some(Fit::Split(0)));
    }

    #[test]
    fn take_exact_unlinks_span() {
        let mut list = spaced_list(&[64, 32]);

        let offset = list.take(Fit::Exact(0), 64);

        assert_eq!(offset, 0);
        assert_eq!(list.len(), 1);
        assert_eq!(list.first().unwrap().size, 32);
    }

    #[test]
    fn take_split_keeps_remainder_in_address_order() {
        let mut list = FreeList::with_span(FreeSpan { offset: 0, size: 512 });

        let offset = list.take(Fit::Split(0), 100);

        assert_eq!(offset, 0);
        assert_eq!(
            list.first(),
            Some(FreeSpan {
                offset: 100 + BLOCK_HEADER_SIZE,
                size: 512 - 100 - BLOCK_HEADER_SIZE,
            })
        );
    }

    #[test]
    fn release_merges_with_both_neighbours() {
        let full = 3 * 64 + 2 * BLOCK_HEADER_SIZE;
        let mut list = FreeList::with_span(FreeSpan { offset: 0, size: full });

        // Carve three adjacent 64-byte blocks a, b, c.
        let a = list.take(list.best_fit(64).unwrap(), 64);
        let b = list.take(list.best_fit(64).unwrap(), 64);
        let c = list.take(list.best_fit(64).unwrap(), 64);
        assert!(list.is_empty());

        // Free in non-adjacent order: a, c, then b bridges them.
        list.release(a, 64);
        list.release(c, 64);
        assert_eq!(list.len(), 2);

        list.release(b, 64);

        assert_eq!(list.len(), 1);
        assert_eq!(list.first(), Some(FreeSpan { offset: 0, size: full }));
    }

    #[test]
    fn release_without_adjacency_keeps_spans_apart() {
        let mut list = FreeList::with_span(FreeSpan { offset: 0, size: 1024 });

        let a = list.take(list.best_fit(64).unwrap(), 64);
        let b = list.take(list.best_fit(64).unwrap(), 64);
        let _keep = list.take(list.best_fit(64).unwrap(), 64);

        // a and b are adjacent; freeing both merges exactly once. The tail
        // span stays separate because `_keep` sits in between.
        list.release(a, 64);
        list.release(b, 64);

        assert_eq!(list.len(), 2);
        assert_eq!(
            list.first(),
            Some(FreeSpan { offset: 0, size: 2 * 64 + BLOCK_HEADER_SIZE })
        );
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_release_panics() {
        let mut list = FreeList::with_span(FreeSpan { offset: 0, size: 1024 });

        let a = list.take(list.best_fit(64).unwrap(), 64);
        let _b = list.take(list.best_fit(64).unwrap(), 64);

        list.release(a, 64);
        list.release(a, 64);
    }
}
