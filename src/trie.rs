use crate::darray::{byte_of, label_of, DoubleArray, Step, END_LABEL, LABEL_COUNT, ROOT};
use crate::error::Error;
use crate::tail::TailStore;
use std::fmt;

/// A dynamically-updatable set of byte strings, stored as a double-array
/// trie with single-child chains compressed into a side tail store.
///
/// A key ends either at a cell whose end-of-string child holds an empty
/// tail, or inside a tail block at its last byte. The empty key is legal
/// and stored through the root's end-of-string edge.
#[derive(Clone)]
pub struct Trie {
    da: DoubleArray,
    tail: TailStore,
    len: usize,
}

impl fmt::Debug for Trie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Trie(len={}, cells={}, tails={})",
            self.len,
            self.da.len(),
            self.tail.len()
        )
    }
}

/// A traversal position: either an array state, or `offset` consumed
/// bytes into a tail block. Once a walk enters a tail it never returns to
/// the array.
#[derive(Debug, Clone, Copy)]
enum Pos {
    Array(usize),
    Tail { block: usize, offset: usize },
}

/// A cheap, copyable position over the logical trie, spanning array
/// states and tail blocks transparently. Borrows the trie, so the
/// structure cannot be mutated while a cursor is live.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    trie: &'a Trie,
    pos: Pos,
}

impl<'a> Cursor<'a> {
    /// Follow the transition for one input byte. Returns whether it
    /// exists; a failed walk leaves the position unchanged.
    pub fn walk(&mut self, byte: u8) -> bool {
        self.walk_label(label_of(byte))
    }

    fn walk_label(&mut self, label: u16) -> bool {
        match self.pos {
            Pos::Array(s) => match self.trie.da.walk(s, label) {
                Some(Step::To(t)) => {
                    self.pos = Pos::Array(t);
                    true
                }
                // entering a tail starts at offset 0; the walked label
                // still has to match the first stored byte
                Some(Step::IntoTail(block)) => self.advance_tail(block, 0, label),
                None => false,
            },
            Pos::Tail { block, offset } => self.advance_tail(block, offset, label),
        }
    }

    fn advance_tail(&mut self, block: usize, offset: usize, label: u16) -> bool {
        if label == END_LABEL || self.trie.tail.terminal(block, offset) {
            return false;
        }
        match self.trie.tail.byte_at(block, offset) {
            Ok(byte) if byte == byte_of(label) => {
                self.pos = Pos::Tail {
                    block,
                    offset: offset + 1,
                };
                true
            }
            _ => false,
        }
    }

    /// Whether the current position ends a stored key.
    pub fn terminal(&self) -> bool {
        match self.pos {
            Pos::Tail { block, offset } => self.trie.tail.terminal(block, offset),
            Pos::Array(s) => match self.trie.da.walk(s, END_LABEL) {
                // the state's whole remainder is its tail: terminal iff
                // nothing is left of it
                Some(Step::IntoTail(block)) => self.trie.tail.suffix(block).is_empty(),
                // otherwise the end-of-string edge must lead to an empty tail
                Some(Step::To(t)) => self
                    .trie
                    .da
                    .tail_ref(t)
                    .map_or(false, |block| self.trie.tail.suffix(block).is_empty()),
                None => false,
            },
        }
    }

    /// Whether the current position is a terminal with nothing below it.
    pub fn leaf(&self) -> bool {
        if !self.terminal() {
            return false;
        }
        match self.pos {
            Pos::Tail { .. } => true, // nothing branches inside a tail
            Pos::Array(s) => self.trie.da.children(s).iter().all(|&l| l == END_LABEL),
        }
    }
}

impl Trie {
    /// An empty trie: the cell array holds only the anchor and the root,
    /// and the tail store holds nothing.
    pub fn new() -> Self {
        Trie {
            da: DoubleArray::new(),
            tail: TailStore::new(),
            len: 0,
        }
    }

    /// Number of stored keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A cursor positioned at the root, for manual traversal.
    pub fn root(&self) -> Cursor<'_> {
        Cursor {
            trie: self,
            pos: Pos::Array(ROOT),
        }
    }

    /// Test whether `key` is stored.
    pub fn contains(&self, key: &[u8]) -> bool {
        let mut cursor = self.root();
        for &byte in key {
            if !cursor.walk(byte) {
                return false;
            }
        }
        cursor.terminal()
    }

    /// Store `key`. Returns `Ok(false)` if it was already present. On
    /// `Err(AllocationFailure)` the stored key set is unchanged.
    pub fn add(&mut self, key: &[u8]) -> Result<bool, Error> {
        let mut s = ROOT;
        let mut pos = 0;
        while pos < key.len() {
            match self.da.walk(s, label_of(key[pos])) {
                Some(Step::To(t)) => {
                    s = t;
                    pos += 1;
                }
                Some(Step::IntoTail(block)) => {
                    return self.add_in_tail(s, block, key, pos);
                }
                None => {
                    // no such child: hang the whole remainder off one new
                    // edge, the rest of the bytes become the tail
                    let rest = &key[pos..];
                    let t = self.da.add_edge(s, label_of(rest[0]))?;
                    let block = self.tail.alloc(rest[1..].to_vec());
                    self.da.set_tail_ref(t, block);
                    self.len += 1;
                    return Ok(true);
                }
            }
        }
        // the key was exhausted on an array state
        if let Some(block) = self.da.tail_ref(s) {
            return self.add_in_tail(s, block, key, pos);
        }
        if self.da.walk(s, END_LABEL).is_some() {
            return Ok(false); // already stored
        }
        let t = self.da.add_edge(s, END_LABEL)?;
        let block = self.tail.alloc(Vec::new());
        self.da.set_tail_ref(t, block);
        self.len += 1;
        Ok(true)
    }

    // The walk ran into the tail held by state `s`: match the key's
    // remainder against the suffix and split the tail where they part.
    fn add_in_tail(
        &mut self,
        s: usize,
        block: usize,
        key: &[u8],
        mut pos: usize,
    ) -> Result<bool, Error> {
        let mut matched = 0;
        while pos < key.len() && self.tail.suffix(block).get(matched) == Some(&key[pos]) {
            matched += 1;
            pos += 1;
        }
        if pos == key.len() && matched == self.tail.suffix(block).len() {
            return Ok(false); // the key is already stored here
        }

        // promote the shared prefix into explicit array states one byte at
        // a time; the base search precedes each mutation, so the stored
        // key survives an allocation failure at any step
        let mut branch = s;
        for _ in 0..matched {
            let first = self.tail.suffix(block)[0];
            let t = self.da.branch(branch, label_of(first))?;
            self.tail.pop_front(block);
            self.da.set_tail_ref(t, block);
            branch = t;
        }

        // two siblings under the branch point: the suffix remainder and
        // the key remainder, either of which may be the bare end-of-string
        let old_first = self.tail.suffix(block).first().copied();
        let new_rest = &key[pos..];
        let old_label = old_first.map_or(END_LABEL, label_of);
        let new_label = new_rest.first().map_or(END_LABEL, |&b| label_of(b));
        debug_assert_ne!(old_label, new_label);

        let (t_old, t_new) = self.da.branch_pair(branch, old_label, new_label)?;
        if old_first.is_some() {
            self.tail.pop_front(block);
        }
        self.da.set_tail_ref(t_old, block);
        let new_block = self.tail.alloc(if new_rest.is_empty() {
            Vec::new()
        } else {
            new_rest[1..].to_vec()
        });
        self.da.set_tail_ref(t_new, new_block);
        self.len += 1;
        Ok(true)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let mut s = ROOT;
        let mut pos = 0;
        while pos < key.len() {
            match self.da.walk(s, label_of(key[pos])) {
                Some(Step::To(t)) => {
                    s = t;
                    pos += 1;
                }
                Some(Step::IntoTail(block)) => {
                    // the key ends here only if its remainder is the
                    // entire suffix
                    if self.tail.suffix(block) != &key[pos..] {
                        return false;
                    }
                    self.remove_leaf(s, block);
                    return true;
                }
                None => return false,
            }
        }
        if let Some(block) = self.da.tail_ref(s) {
            if !self.tail.suffix(block).is_empty() {
                return false; // the key is a proper prefix of a stored key
            }
            self.remove_leaf(s, block);
            return true;
        }
        match self.da.walk(s, END_LABEL) {
            Some(Step::To(t)) => match self.da.tail_ref(t) {
                Some(block) if self.tail.suffix(block).is_empty() => {
                    self.remove_leaf(t, block);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    // Free the tail block and its holding cell, then prune every ancestor
    // left without children, stopping at the root.
    fn remove_leaf(&mut self, cell: usize, block: usize) {
        self.tail.free(block);
        let mut s = cell;
        loop {
            let parent = self.da.parent(s);
            self.da.release(s);
            if parent == ROOT || !self.da.children(parent).is_empty() {
                break;
            }
            s = parent;
        }
        self.len -= 1;
    }

    /// All stored keys, fully materialized, in ascending label order
    /// (`0x00` continuations sort last at each depth).
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.children_with_prefix(&[])
    }

    /// All stored keys beginning with `prefix`, fully materialized, in
    /// ascending label order.
    pub fn children_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut cursor = self.root();
        for &byte in prefix {
            if !cursor.walk(byte) {
                return Vec::new();
            }
        }
        let mut acc = prefix.to_vec();
        let mut out = Vec::new();
        self.collect(cursor.pos, &mut acc, &mut out);
        out
    }

    // Depth-first enumeration. The end-of-string edge is tested first but
    // never emitted; a tail position continues into exactly one key.
    fn collect(&self, pos: Pos, acc: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
        match pos {
            Pos::Tail { block, offset } => {
                let mut key = acc.clone();
                key.extend_from_slice(&self.tail.suffix(block)[offset..]);
                out.push(key);
            }
            Pos::Array(s) => {
                if let Some(block) = self.da.tail_ref(s) {
                    let mut key = acc.clone();
                    key.extend_from_slice(self.tail.suffix(block));
                    out.push(key);
                    return;
                }
                if let Some(Step::To(t)) = self.da.walk(s, END_LABEL) {
                    if self
                        .da
                        .tail_ref(t)
                        .map_or(false, |block| self.tail.suffix(block).is_empty())
                    {
                        out.push(acc.clone());
                    }
                }
                for label in 1..LABEL_COUNT as u16 {
                    if let Some(Step::To(t)) = self.da.walk(s, label) {
                        acc.push(byte_of(label));
                        self.collect(Pos::Array(t), acc, out);
                        acc.pop();
                    }
                }
            }
        }
    }

    /// Render the cell and tail tables in a human-readable form.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        self.da.dump_into(&mut out);
        let _ = writeln!(out, "tail blocks ({}):", self.tail.len());
        for block in 0..self.tail.len() {
            let _ = writeln!(
                out,
                "{:>6} | {:?}",
                block,
                String::from_utf8_lossy(self.tail.suffix(block))
            );
        }
        out
    }
}

impl Default for Trie {
    fn default() -> Self {
        Trie::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};
    use std::collections::BTreeSet;
    use std::iter;

    fn byte_keys(keys: &[&str]) -> Vec<Vec<u8>> {
        keys.iter().map(|k| k.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_empty_trie() {
        let trie = Trie::new();
        assert!(trie.is_empty());
        assert_eq!(trie.keys(), Vec::<Vec<u8>>::new());
        assert!(!trie.contains(b""));
        assert!(!trie.contains(b"a"));
    }

    #[test]
    fn test_add_and_contains() {
        let mut trie = Trie::new();
        assert!(trie.add(b"bar").unwrap());
        assert!(!trie.add(b"bar").unwrap());
        assert!(trie.contains(b"bar"));
        assert!(!trie.contains(b"ba"));
        assert!(!trie.contains(b"barn"));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_add_idempotent() {
        let mut trie = Trie::new();
        assert!(trie.add(b"bar").unwrap());
        let before = trie.keys();
        assert!(!trie.add(b"bar").unwrap());
        assert_eq!(trie.keys(), before);
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_shared_prefix_branching() {
        let mut trie = Trie::new();
        assert!(trie.add(b"bar").unwrap());
        assert!(trie.add(b"barn").unwrap());
        assert!(trie.add(b"barter").unwrap());

        assert!(trie.contains(b"bar"));
        assert!(trie.contains(b"barn"));
        assert!(trie.contains(b"barter"));
        assert!(!trie.contains(b"b"));
        assert!(!trie.contains(b"bart"));

        assert_eq!(trie.keys(), byte_keys(&["bar", "barn", "barter"]));
        assert_eq!(
            trie.children_with_prefix(b"bar"),
            byte_keys(&["bar", "barn", "barter"])
        );
        assert_eq!(trie.children_with_prefix(b"barn"), byte_keys(&["barn"]));
        assert_eq!(trie.children_with_prefix(b"barx"), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_delete_branch_key() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        trie.add(b"barn").unwrap();
        trie.add(b"barter").unwrap();

        assert!(trie.delete(b"bar"));
        assert!(!trie.contains(b"bar"));
        assert!(trie.contains(b"barn"));
        assert!(trie.contains(b"barter"));
        assert_eq!(trie.keys(), byte_keys(&["barn", "barter"]));
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn test_delete_absent_leaves_trie_unchanged() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        let before = trie.keys();

        assert!(!trie.delete(b"barn"));
        assert!(!trie.delete(b"ba"));
        assert!(!trie.delete(b"x"));
        assert!(!trie.delete(b""));
        assert_eq!(trie.keys(), before);
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_delete_then_readd() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        trie.add(b"baz").unwrap();
        assert!(trie.delete(b"bar"));
        assert!(trie.add(b"bar").unwrap());
        assert!(trie.contains(b"bar"));
        assert!(trie.contains(b"baz"));
        assert_eq!(trie.keys(), byte_keys(&["bar", "baz"]));
    }

    #[test]
    fn test_delete_to_empty() {
        let mut trie = Trie::new();
        trie.add(b"a").unwrap();
        trie.add(b"ab").unwrap();
        trie.add(b"abc").unwrap();
        assert!(trie.delete(b"abc"));
        assert!(trie.delete(b"a"));
        assert!(trie.delete(b"ab"));
        assert!(trie.is_empty());
        assert_eq!(trie.keys(), Vec::<Vec<u8>>::new());
        // the freed cells are reusable
        assert!(trie.add(b"xyz").unwrap());
        assert!(trie.contains(b"xyz"));
    }

    #[test]
    fn test_prefix_of_existing_key() {
        let mut trie = Trie::new();
        assert!(trie.add(b"barter").unwrap());
        assert!(trie.add(b"bar").unwrap());
        assert!(trie.add(b"b").unwrap());

        assert!(trie.contains(b"b"));
        assert!(trie.contains(b"bar"));
        assert!(trie.contains(b"barter"));
        assert!(!trie.contains(b"ba"));
        assert!(!trie.contains(b"bart"));
        assert_eq!(trie.keys(), byte_keys(&["b", "bar", "barter"]));
    }

    #[test]
    fn test_extend_existing_key() {
        let mut trie = Trie::new();
        assert!(trie.add(b"ba").unwrap());
        assert!(trie.add(b"bar").unwrap());
        assert!(trie.add(b"barter").unwrap());

        assert!(trie.contains(b"ba"));
        assert!(trie.contains(b"bar"));
        assert!(trie.contains(b"barter"));
        assert_eq!(trie.keys(), byte_keys(&["ba", "bar", "barter"]));
    }

    #[test]
    fn test_empty_key_policy() {
        let mut trie = Trie::new();
        assert!(!trie.contains(b""));
        assert!(trie.add(b"").unwrap());
        assert!(trie.contains(b""));
        assert!(!trie.add(b"").unwrap());
        assert_eq!(trie.keys(), vec![Vec::<u8>::new()]);

        assert!(trie.add(b"a").unwrap());
        assert_eq!(trie.keys(), byte_keys(&["", "a"]));
        assert!(trie.delete(b""));
        assert!(!trie.contains(b""));
        assert!(trie.contains(b"a"));
    }

    #[test]
    fn test_nul_byte_transparency() {
        let mut trie = Trie::new();
        let with_nul = b"fo\x00o".to_vec();
        let without_nul = b"foo".to_vec();

        assert!(trie.add(&with_nul).unwrap());
        assert!(trie.contains(&with_nul));
        assert!(!trie.contains(&without_nul));

        assert!(trie.add(&without_nul).unwrap());
        assert!(trie.contains(&with_nul));
        assert!(trie.contains(&without_nul));

        assert!(trie.delete(&with_nul));
        assert!(!trie.contains(&with_nul));
        assert!(trie.contains(&without_nul));
    }

    #[test]
    fn test_nul_continuations_sort_last() {
        let mut trie = Trie::new();
        trie.add(b"a\x00").unwrap();
        trie.add(b"ab").unwrap();
        trie.add(b"a").unwrap();
        // 0x00 walks label 256, past every other byte
        assert_eq!(
            trie.keys(),
            vec![b"a".to_vec(), b"ab".to_vec(), b"a\x00".to_vec()]
        );
    }

    #[test]
    fn test_keys_are_sorted() {
        let mut trie = Trie::new();
        for key in &["jar", "bachelor", "badge", "baby", "bad"] {
            trie.add(key.as_bytes()).unwrap();
        }
        assert_eq!(
            trie.keys(),
            byte_keys(&["baby", "bachelor", "bad", "badge", "jar"])
        );
        assert_eq!(
            trie.children_with_prefix(b"ba"),
            byte_keys(&["baby", "bachelor", "bad", "badge"])
        );
    }

    #[test]
    fn test_cjk_keys() {
        let dict = ["中", "中华", "中华人民", "中华人民共和国", "网球", "网球拍"];
        let mut trie = Trie::new();
        for key in &dict {
            assert!(trie.add(key.as_bytes()).unwrap());
        }
        for key in &dict {
            assert!(trie.contains(key.as_bytes()));
        }
        assert!(!trie.contains("中华人".as_bytes()));
        assert_eq!(trie.children_with_prefix("网".as_bytes()).len(), 2);

        assert!(trie.delete("中华".as_bytes()));
        assert!(!trie.contains("中华".as_bytes()));
        assert!(trie.contains("中华人民".as_bytes()));
    }

    #[test]
    fn test_cursor_walk_terminal_leaf() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        trie.add(b"barn").unwrap();

        let mut cursor = trie.root();
        assert!(!cursor.terminal());
        assert!(cursor.walk(b'b'));
        assert!(cursor.walk(b'a'));
        assert!(!cursor.walk(b'x'));

        // a failed walk leaves the position unchanged
        let mut probe = cursor;
        assert!(probe.walk(b'r'));
        assert!(probe.terminal());
        assert!(!probe.leaf()); // "barn" still hangs below

        assert!(probe.walk(b'n'));
        assert!(probe.terminal());
        assert!(probe.leaf());

        // the copy held at "ba" was not disturbed
        assert!(!cursor.terminal());
        assert!(cursor.walk(b'r'));
    }

    #[test]
    fn test_cursor_leaf_inside_tail() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        let mut cursor = trie.root();
        for &b in b"bar" {
            assert!(cursor.walk(b));
        }
        assert!(cursor.terminal());
        assert!(cursor.leaf());
    }

    #[test]
    fn test_deep_chain() {
        // every prefix of a long string, added longest-first so each add
        // splits the surviving tail
        let text: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8 + 1).collect();
        let mut trie = Trie::new();
        for end in (1..=text.len()).rev() {
            assert!(trie.add(&text[..end]).unwrap());
        }
        for end in 1..=text.len() {
            assert!(trie.contains(&text[..end]));
        }
        assert_eq!(trie.len(), text.len());
        assert_eq!(trie.keys().len(), text.len());
    }

    #[test]
    fn test_mass_random_against_reference() {
        let mut rng = thread_rng();
        let mut reference: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut trie = Trie::new();

        let mut dict: Vec<Vec<u8>> = Vec::with_capacity(800);
        for _ in 0..800 {
            let len = rng.gen_range(1..=24);
            let key: Vec<u8> = iter::repeat(())
                .map(|()| rng.sample(Alphanumeric))
                .take(len)
                .collect();
            dict.push(key);
        }

        for key in &dict {
            assert_eq!(trie.add(key).unwrap(), reference.insert(key.clone()));
        }
        assert_eq!(trie.len(), reference.len());
        for key in &dict {
            assert!(trie.contains(key));
        }
        // alphanumeric keys carry no 0x00, so label order is byte order
        let expected: Vec<Vec<u8>> = reference.iter().cloned().collect();
        assert_eq!(trie.keys(), expected);

        // delete every other key and compare again
        for key in dict.iter().step_by(2) {
            assert_eq!(trie.delete(key), reference.remove(key));
        }
        assert_eq!(trie.len(), reference.len());
        for key in &dict {
            assert_eq!(trie.contains(key), reference.contains(key));
        }
        let expected: Vec<Vec<u8>> = reference.iter().cloned().collect();
        assert_eq!(trie.keys(), expected);
    }

    #[test]
    fn test_mass_erase() {
        let mut rng = thread_rng();
        let mut dict: Vec<Vec<u8>> = Vec::with_capacity(500);
        for _ in 0..500 {
            let key: Vec<u8> = iter::repeat(())
                .map(|()| rng.sample(Alphanumeric))
                .take(30)
                .collect();
            dict.push(key);
        }

        let mut trie = Trie::new();
        for key in &dict {
            trie.add(key).unwrap();
        }
        dict.sort();
        dict.dedup();
        for key in &dict {
            assert!(trie.delete(key));
            assert!(!trie.contains(key));
        }
        assert!(trie.is_empty());
    }

    #[test]
    fn test_prefix_query_matches_filter() {
        let mut trie = Trie::new();
        let dict = [
            "a", "ab", "abc", "abd", "b", "ba", "bad", "badge", "bat", "cat",
        ];
        for key in &dict {
            trie.add(key.as_bytes()).unwrap();
        }
        for prefix in &["", "a", "ab", "b", "ba", "bad", "c", "z"] {
            let got = trie.children_with_prefix(prefix.as_bytes());
            let want: Vec<Vec<u8>> = trie
                .keys()
                .into_iter()
                .filter(|k| k.starts_with(prefix.as_bytes()))
                .collect();
            assert_eq!(got, want, "prefix {:?}", prefix);
        }
    }

    #[test]
    fn test_debug_and_dump() {
        let mut trie = Trie::new();
        trie.add(b"bar").unwrap();
        assert!(format!("{:?}", trie).starts_with("Trie(len=1"));
        let dump = trie.dump();
        assert!(dump.contains("double array"));
        assert!(dump.contains("tail blocks"));
    }
}
