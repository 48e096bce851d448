use crate::error::Error;
use smallvec::SmallVec;

// The double array looks like this:
//
//        BASE                 CHECK
// -+--------------------+--------------------
// 0| free list pointer  | free list pointer     <- anchor, never a state
// 1| 2                  | 1                     <- root
// 2| ...                | ...                   <- first claimable cell
//
// An occupied cell's `check` names its parent state, and its `base`
// positions its children at `base + label` (or, negated, points at a tail
// block). A vacant cell negates both fields into links of a circular
// doubly-linked free list anchored at cell 0 and kept in ascending index
// order.

/// Index of the free-list anchor cell.
pub(crate) const ANCHOR: usize = 0;
/// Index of the root state. Its `check` is its own index, so the vacancy
/// test can never claim it.
pub(crate) const ROOT: usize = 1;
/// Smallest index that may be claimed as a transition target, and the
/// smallest admissible base. Keeps every computed child clear of the
/// anchor and the root.
pub(crate) const FIRST_TARGET: usize = 2;

/// Label reserved for the end-of-string transition.
pub(crate) const END_LABEL: u16 = 0;
/// Number of distinct labels: the end-of-string marker plus 256 byte values.
pub(crate) const LABEL_COUNT: usize = 257;

/// Cell indices are stored in `i32` fields, which caps the array length.
const IDX_LIMIT: usize = std::i32::MAX as usize;

/// A freshly claimed state starts with a base that cannot produce a
/// verified child until a real one is installed.
const EMPTY_BASE: i32 = FIRST_TARGET as i32;

/// Translate a raw input byte to a transition label. Label 0 is reserved
/// for the end-of-string transition, so the 0x00 byte wraps to 256 and
/// every other byte maps to itself.
#[inline]
pub(crate) fn label_of(byte: u8) -> u16 {
    if byte == 0 {
        256
    } else {
        u16::from(byte)
    }
}

/// The inverse of `label_of`. The end-of-string label has no byte.
#[inline]
pub(crate) fn byte_of(label: u16) -> u8 {
    debug_assert_ne!(label, END_LABEL);
    if label == 256 {
        0
    } else {
        label as u8
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Cell {
    base: i32,  // >= 0: children at base + label; < 0: tail reference
    check: i32, // >= 1: parent state; <= 0: negated free-list link
}

/// One step of a walk along a trie edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A verified transition to another array state.
    To(usize),
    /// The state's remainder lives in a tail block; the walked label was
    /// not consumed and must be checked against the suffix by the caller.
    IntoTail(usize),
}

/// The `(base, check)` cell arena and the transition logic built on it.
#[derive(Debug, Clone)]
pub(crate) struct DoubleArray {
    cells: Vec<Cell>,
}

impl DoubleArray {
    pub(crate) fn new() -> Self {
        let cells = vec![
            // the free list is empty, so the anchor points at itself
            Cell { base: 0, check: 0 },
            Cell {
                base: EMPTY_BASE,
                check: ROOT as i32,
            },
        ];
        DoubleArray { cells }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// The parent of an occupied state.
    #[inline]
    pub(crate) fn parent(&self, s: usize) -> usize {
        debug_assert!(self.cells[s].check >= 1);
        self.cells[s].check as usize
    }

    /// The tail block a state defers to, if any.
    #[inline]
    pub(crate) fn tail_ref(&self, s: usize) -> Option<usize> {
        let base = self.cells[s].base;
        if base < 0 {
            Some((-base - 1) as usize)
        } else {
            None
        }
    }

    /// Point a state at a tail block. Blocks are zero-indexed, so the
    /// stored form is `-(block + 1)`.
    #[inline]
    pub(crate) fn set_tail_ref(&mut self, s: usize, block: usize) {
        debug_assert!(block < IDX_LIMIT);
        self.cells[s].base = -(block as i32) - 1;
    }

    #[inline]
    fn vacant(&self, i: usize) -> bool {
        i >= FIRST_TARGET && i < self.cells.len() && self.cells[i].check <= 0
    }

    // Free-list links are the negated neighbor indices; the accessors
    // below are the only code that reads or writes the sign trick.

    #[inline]
    fn next_free(&self, s: usize) -> usize {
        (-self.cells[s].check) as usize
    }

    #[inline]
    fn prev_free(&self, s: usize) -> usize {
        (-self.cells[s].base) as usize
    }

    #[inline]
    fn set_next(&mut self, s: usize, t: usize) {
        self.cells[s].check = -(t as i32);
    }

    #[inline]
    fn set_prev(&mut self, s: usize, t: usize) {
        self.cells[s].base = -(t as i32);
    }

    /// Detach a vacant cell from the free list and install it as a state
    /// claimed by `parent`.
    fn claim(&mut self, t: usize, parent: usize) {
        debug_assert!(self.vacant(t));
        let prev = self.prev_free(t);
        let next = self.next_free(t);
        self.set_next(prev, next);
        self.set_prev(next, prev);
        self.cells[t] = Cell {
            base: EMPTY_BASE,
            check: parent as i32,
        };
    }

    /// Return every occupied cell in `[lo, hi)` to the free list at its
    /// sorted position. The caller must own every occupied cell in the
    /// range.
    pub(crate) fn free_range(&mut self, lo: usize, hi: usize) {
        debug_assert!(lo >= FIRST_TARGET && hi <= self.cells.len());
        // walk to the nearest free cell preceding the range
        let mut prev = ANCHOR;
        loop {
            let next = self.next_free(prev);
            if next == ANCHOR || next >= lo {
                break;
            }
            prev = next;
        }
        for i in lo..hi {
            if self.cells[i].check <= 0 {
                // already free, and by the ascending-order invariant it is
                // the next list entry
                debug_assert_eq!(self.next_free(prev), i);
                prev = i;
            } else {
                let next = self.next_free(prev);
                self.set_next(prev, i);
                self.set_prev(i, prev);
                self.set_next(i, next);
                self.set_prev(next, i);
                prev = i;
            }
        }
    }

    /// Return a single occupied cell to the free list.
    #[inline]
    pub(crate) fn release(&mut self, i: usize) {
        self.free_range(i, i + 1);
    }

    /// Grow the backing storage to at least `min_len` cells (amortized
    /// doubling) and thread every new cell onto the free list in ascending
    /// order. Existing cells are never moved or renumbered.
    fn grow(&mut self, min_len: usize) -> Result<(), Error> {
        let old = self.cells.len();
        if min_len <= old {
            return Ok(());
        }
        if min_len > IDX_LIMIT {
            return Err(Error::AllocationFailure { requested: min_len });
        }
        let new_len = min_len.max(old * 2).min(IDX_LIMIT);
        self.cells.resize(new_len, Cell::default());

        let mut prev = self.prev_free(ANCHOR); // the last free cell, or the anchor
        for i in old..new_len {
            self.set_next(prev, i);
            self.set_prev(i, prev);
            prev = i;
        }
        // fix the wrap-around
        self.set_next(prev, ANCHOR);
        self.set_prev(ANCHOR, prev);
        Ok(())
    }

    /// Walk along the edge `label` from state `s`. Tail-holding states
    /// defer to their block regardless of the label; otherwise the slot at
    /// `base + label` must be checked back to `s`.
    pub(crate) fn walk(&self, s: usize, label: u16) -> Option<Step> {
        if s < ROOT || s >= self.cells.len() {
            return None;
        }
        let base = self.cells[s].base;
        if base < 0 {
            return Some(Step::IntoTail((-base - 1) as usize));
        }
        let next = base as usize + label as usize;
        if next < self.cells.len() && self.cells[next].check == s as i32 {
            Some(Step::To(next))
        } else {
            None
        }
    }

    /// Collect the labels of a state's children in ascending order, by
    /// scanning the slot window its base addresses.
    pub(crate) fn children(&self, s: usize) -> SmallVec<[u16; 256]> {
        let mut kids = SmallVec::new();
        let base = self.cells[s].base;
        if base < 0 {
            return kids; // tail holders have no array children
        }
        for label in 0..LABEL_COUNT as u16 {
            let t = base as usize + label as usize;
            if t >= self.cells.len() {
                break;
            }
            if self.cells[t].check == s as i32 {
                kids.push(label);
            }
        }
        kids
    }

    /// Install a fresh base for a childless state and claim its first
    /// child cell. The base search happens before any mutation, so a
    /// failure leaves the array untouched.
    pub(crate) fn branch(&mut self, s: usize, label: u16) -> Result<usize, Error> {
        let b = self.find_base(&[label])?;
        self.cells[s].base = b as i32;
        let t = b + label as usize;
        self.claim(t, s);
        Ok(t)
    }

    /// Install a fresh base addressing two children at once and claim both
    /// cells; used when a tail splits into two diverging remainders.
    /// Returns the cells in argument order.
    pub(crate) fn branch_pair(&mut self, s: usize, a: u16, b: u16) -> Result<(usize, usize), Error> {
        debug_assert_ne!(a, b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let base = self.find_base(&[lo, hi])?;
        self.cells[s].base = base as i32;
        self.claim(base + lo as usize, s);
        self.claim(base + hi as usize, s);
        Ok((base + a as usize, base + b as usize))
    }

    /// Create the transition `label` out of state `s`, relocating a child
    /// set when two states' children collide in address space. `s` must
    /// not be holding a tail (split it first). Returns the child cell,
    /// which starts out childless.
    pub(crate) fn add_edge(&mut self, mut s: usize, label: u16) -> Result<usize, Error> {
        debug_assert!(self.cells[s].base >= 0);
        // a collision is resolved by relocating one of the two sides, and
        // afterwards the slot is necessarily claimable: two passes suffice
        for _ in 0..2 {
            let kids = self.children(s);
            if kids.is_empty() {
                return self.branch(s, label);
            }
            let t = self.cells[s].base as usize + label as usize;
            if t >= self.cells.len() {
                self.grow(t + 1)?;
            }
            if self.cells[t].check == s as i32 {
                return Ok(t); // the transition already exists
            }
            if self.vacant(t) {
                self.claim(t, s);
                return Ok(t);
            }
            // the slot belongs to another parent's child: move whichever
            // family is smaller, ties moving the inserting side
            let p = self.cells[t].check as usize;
            s = if kids.len() <= self.children(p).len() {
                self.relocate(s, Some(label), s)?
            } else {
                self.relocate(p, None, s)?
            };
        }
        unreachable!("edge claim must succeed after one relocation");
    }

    /// Move the whole child set of `x` to a new base, chosen so that every
    /// existing child plus `extra` (when moving the inserting side) fits
    /// simultaneously. `track` is an index the caller needs to keep valid
    /// across the move; its updated value is returned.
    fn relocate(&mut self, x: usize, extra: Option<u16>, mut track: usize) -> Result<usize, Error> {
        let old_base = self.cells[x].base as usize;
        let kids = self.children(x);
        debug_assert!(!kids.is_empty());

        let mut wanted = kids.clone();
        if let Some(label) = extra {
            if let Err(at) = wanted.binary_search(&label) {
                wanted.insert(at, label);
            }
        }
        // find a destination that takes every slot before touching anything
        let b = self.find_base(&wanted)?;
        self.cells[x].base = b as i32;

        for &label in &kids {
            let old = old_base + label as usize;
            let new = b + label as usize;
            self.claim(new, x);
            self.cells[new].base = self.cells[old].base;

            // grandchildren still check against the old index
            let gbase = self.cells[old].base;
            if gbase >= 0 {
                for glabel in 0..LABEL_COUNT {
                    let g = gbase as usize + glabel;
                    if g >= self.cells.len() {
                        break;
                    }
                    if self.cells[g].check == old as i32 {
                        self.cells[g].check = new as i32;
                    }
                }
            }

            self.release(old);
            if track == old {
                track = new;
            }
        }
        Ok(track)
    }

    /// Scan the free list for a base that puts every label of `labels`
    /// (ascending) on a vacant cell; grow past the end when nothing fits.
    fn find_base(&mut self, labels: &[u16]) -> Result<usize, Error> {
        debug_assert!(!labels.is_empty());
        debug_assert!(labels.windows(2).all(|w| w[0] < w[1]));
        let first = labels[0] as usize;

        let mut f = self.next_free(ANCHOR);
        while f != ANCHOR {
            if f >= FIRST_TARGET + first {
                let b = f - first;
                if self.fits(b, labels) {
                    return Ok(b);
                }
            }
            f = self.next_free(f);
        }

        // nothing among the vacant cells can host the set; take a base
        // whose slots all land in the fresh region past the current end
        let end = self.cells.len();
        let b = end.max(FIRST_TARGET + first) - first;
        let last = *labels.last().unwrap() as usize;
        self.grow(b + last + 1)?;
        Ok(b)
    }

    #[inline]
    fn fits(&self, b: usize, labels: &[u16]) -> bool {
        labels.iter().all(|&label| {
            let t = b + label as usize;
            t < self.cells.len() && self.vacant(t)
        })
    }

    /// Append a human-readable cell table to `out`.
    pub(crate) fn dump_into(&self, out: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(out, "double array ({} cells):", self.cells.len());
        let _ = writeln!(out, " index |        base |       check | kind");
        for (i, cell) in self.cells.iter().enumerate() {
            let kind = if i == ANCHOR {
                "anchor"
            } else if cell.check <= 0 {
                "free"
            } else if cell.base < 0 {
                "tail"
            } else {
                "state"
            };
            let _ = writeln!(
                out,
                "{:>6} | {:>11} | {:>11} | {}",
                i, cell.base, cell.check, kind
            );
        }
    }
}
