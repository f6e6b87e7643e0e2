//! Hash tables
//!
//! Buckets of chained entries over a power-of-two index space, with the
//! equality predicate chosen at construction: `eq?` (word identity),
//! `equal?` (structural) or string comparison.
//!
//! A table may also carry user-supplied comparator and hash *values*
//! (language-level functions).  Invoking those requires the VM, so the
//! runtime's hash primitives divert through `Machine::call` when they are
//! set; the core operations here only implement the built-in predicates.

use crate::equal;
use crate::heap::{Heap, Object};
use crate::strings;
use crate::word::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqKind {
    /// word identity
    Eq,
    /// structural equality
    Equal,
    /// string comparison (the string-key default)
    Strings,
}

#[derive(Debug, Clone)]
pub struct HashTable {
    pub eq_kind: EqKind,
    /// user comparator function, consulted by the runtime when set
    pub comparator: Word,
    /// user hash function, consulted by the runtime when set
    pub hasher: Word,
    buckets: Vec<Vec<(Word, Word)>>,
    count: usize,
}

const INITIAL_BUCKETS: usize = 8;

impl HashTable {
    pub fn new(eq_kind: EqKind) -> HashTable {
        HashTable {
            eq_kind,
            comparator: Word::NIL,
            hasher: Word::NIL,
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn keys(&self) -> Vec<Word> {
        self.buckets
            .iter()
            .flat_map(|b| b.iter().map(|&(k, _)| k))
            .collect()
    }

    pub fn entries(&self) -> Vec<(Word, Word)> {
        self.buckets.iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub(crate) fn trace(&self, out: &mut Vec<Word>) {
        out.push(self.comparator);
        out.push(self.hasher);
        for bucket in &self.buckets {
            for &(k, v) in bucket {
                out.push(k);
                out.push(v);
            }
        }
    }

    fn key_hash(&self, heap: &Heap, key: Word) -> u64 {
        match self.eq_kind {
            EqKind::Eq => key.raw().wrapping_mul(0x9e37_79b9_7f4a_7c15),
            EqKind::Equal => equal::equal_hash(heap, key),
            EqKind::Strings => {
                let text = strings::text(heap, key).unwrap_or("");
                equal::equal_hash(heap, key).wrapping_add(text.len() as u64)
            }
        }
    }

    fn keys_match(&self, heap: &Heap, a: Word, b: Word) -> bool {
        match self.eq_kind {
            EqKind::Eq => a == b,
            EqKind::Equal => equal::equal(heap, a, b),
            EqKind::Strings => match (strings::text(heap, a), strings::text(heap, b)) {
                (Some(sa), Some(sb)) => sa == sb,
                _ => a == b,
            },
        }
    }

    fn bucket_of(&self, heap: &Heap, key: Word) -> usize {
        (self.key_hash(heap, key) as usize) & (self.buckets.len() - 1)
    }

    pub fn get(&self, heap: &Heap, key: Word) -> Option<Word> {
        let b = self.bucket_of(heap, key);
        self.buckets[b]
            .iter()
            .find(|&&(k, _)| self.keys_match(heap, k, key))
            .map(|&(_, v)| v)
    }

    pub fn contains(&self, heap: &Heap, key: Word) -> bool {
        self.get(heap, key).is_some()
    }

    fn insert_prehashed(&mut self, bucket: usize, key: Word, value: Word) {
        self.buckets[bucket].push((key, value));
        self.count += 1;
    }

    /// Insert or update.  Returns the previous value, if any.
    pub fn set(&mut self, heap: &Heap, key: Word, value: Word) -> Option<Word> {
        let b = self.bucket_of(heap, key);
        for i in 0..self.buckets[b].len() {
            if self.keys_match(heap, self.buckets[b][i].0, key) {
                return Some(std::mem::replace(&mut self.buckets[b][i].1, value));
            }
        }
        if self.count >= self.buckets.len() * 2 {
            self.grow(heap);
            let b = self.bucket_of(heap, key);
            self.insert_prehashed(b, key, value);
        } else {
            self.insert_prehashed(b, key, value);
        }
        None
    }

    pub fn delete(&mut self, heap: &Heap, key: Word) -> Option<Word> {
        let b = self.bucket_of(heap, key);
        let mut pos = None;
        for i in 0..self.buckets[b].len() {
            if self.keys_match(heap, self.buckets[b][i].0, key) {
                pos = Some(i);
                break;
            }
        }
        let pos = pos?;
        self.count -= 1;
        Some(self.buckets[b].swap_remove(pos).1)
    }

    fn grow(&mut self, heap: &Heap) {
        let entries: Vec<(Word, Word)> = self.entries();
        self.buckets = vec![Vec::new(); self.buckets.len() * 2];
        self.count = 0;
        for (k, v) in entries {
            let b = self.bucket_of(heap, k);
            self.insert_prehashed(b, k, v);
        }
    }
}

/// Allocate an empty table on the heap.
pub fn alloc(heap: &mut Heap, eq_kind: EqKind) -> Word {
    heap.alloc(Object::Hash(HashTable::new(eq_kind)))
}

/// Read through a table word.
pub fn get(heap: &Heap, hw: Word, key: Word) -> Option<Word> {
    match heap.try_get(hw)? {
        Object::Hash(h) => h.get(heap, key),
        _ => None,
    }
}

/// Write through a table word.  The table is lifted out of its slot while
/// the key is hashed against the rest of the heap, then put back.
pub fn set(heap: &mut Heap, hw: Word, key: Word, value: Word) -> Option<Word> {
    let mut table = match heap.get_mut(hw) {
        Object::Hash(h) => std::mem::replace(h, HashTable::new(EqKind::Eq)),
        other => panic!("hash-set: not a hash: {}", other.type_name()),
    };
    let prev = table.set(heap, key, value);
    match heap.get_mut(hw) {
        Object::Hash(h) => *h = table,
        _ => unreachable!(),
    }
    prev
}

pub fn delete(heap: &mut Heap, hw: Word, key: Word) -> Option<Word> {
    let mut table = match heap.get_mut(hw) {
        Object::Hash(h) => std::mem::replace(h, HashTable::new(EqKind::Eq)),
        other => panic!("hash-delete: not a hash: {}", other.type_name()),
    };
    let prev = table.delete(heap, key);
    match heap.get_mut(hw) {
        Object::Hash(h) => *h = table,
        _ => unreachable!(),
    }
    prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair;

    #[test]
    fn test_eq_keys() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Eq);
        set(&mut heap, hw, Word::fixnum(1), Word::TRUE);
        assert_eq!(get(&heap, hw, Word::fixnum(1)), Some(Word::TRUE));
        assert_eq!(get(&heap, hw, Word::fixnum(2)), None);
    }

    #[test]
    fn test_equal_keys() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Equal);
        let k1 = pair::list(&mut heap, &[Word::fixnum(1), Word::fixnum(2)]);
        let k2 = pair::list(&mut heap, &[Word::fixnum(1), Word::fixnum(2)]);
        set(&mut heap, hw, k1, Word::TRUE);
        assert_eq!(get(&heap, hw, k2), Some(Word::TRUE));
    }

    #[test]
    fn test_string_keys() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Strings);
        let k1 = crate::strings::alloc(&mut heap, "PATH");
        let k2 = crate::strings::alloc(&mut heap, "PATH");
        set(&mut heap, hw, k1, Word::fixnum(42));
        assert_eq!(get(&heap, hw, k2), Some(Word::fixnum(42)));
    }

    #[test]
    fn test_update_returns_previous() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Eq);
        assert_eq!(set(&mut heap, hw, Word::fixnum(1), Word::TRUE), None);
        assert_eq!(
            set(&mut heap, hw, Word::fixnum(1), Word::FALSE),
            Some(Word::TRUE)
        );
    }

    #[test]
    fn test_delete() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Eq);
        set(&mut heap, hw, Word::fixnum(1), Word::TRUE);
        assert_eq!(delete(&mut heap, hw, Word::fixnum(1)), Some(Word::TRUE));
        assert_eq!(get(&heap, hw, Word::fixnum(1)), None);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut heap = Heap::new();
        let hw = alloc(&mut heap, EqKind::Eq);
        for i in 0..100 {
            set(&mut heap, hw, Word::fixnum(i), Word::fixnum(i * 2));
        }
        for i in 0..100 {
            assert_eq!(get(&heap, hw, Word::fixnum(i)), Some(Word::fixnum(i * 2)));
        }
    }
}
