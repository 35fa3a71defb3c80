// String Pool
// Deduplicates string literals and hands out stable integer IDs in
// insertion order. Shared-mutable across the pipeline behind one mutex;
// each operation takes the lock once.

use crate::ast::SourceLocation;
use indexmap::IndexMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct StringInfo {
    pub id: usize,
    pub content: String,
    pub reference_count: usize,
    pub locations: Vec<SourceLocation>,
    /// Filled in by the downstream ZSCII pool; the compiler core only
    /// records whether compression has happened and what it saved.
    pub compressed: bool,
    pub savings: usize,
}

#[derive(Default)]
struct PoolState {
    by_content: IndexMap<String, usize>,
    entries: Vec<StringInfo>,
}

pub struct StringPool {
    state: Mutex<PoolState>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        StringPool {
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Intern a string, returning its stable ID. Repeated content gets the
    /// original ID with a bumped reference count.
    pub fn add_string(&self, content: &str, location: SourceLocation) -> usize {
        let mut state = self.state.lock().unwrap();
        if let Some(&id) = state.by_content.get(content) {
            let entry = &mut state.entries[id];
            entry.reference_count += 1;
            entry.locations.push(location);
            return id;
        }

        let id = state.entries.len();
        state.by_content.insert(content.to_string(), id);
        state.entries.push(StringInfo {
            id,
            content: content.to_string(),
            reference_count: 1,
            locations: vec![location],
            compressed: false,
            savings: 0,
        });
        id
    }

    pub fn lookup(&self, content: &str) -> Option<usize> {
        self.state.lock().unwrap().by_content.get(content).copied()
    }

    pub fn get(&self, id: usize) -> Option<StringInfo> {
        self.state.lock().unwrap().entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry in ID order.
    pub fn entries(&self) -> Vec<StringInfo> {
        self.state.lock().unwrap().entries.clone()
    }

    /// Total references across all entries minus unique strings: the
    /// number of duplicate uses the pool absorbed.
    pub fn duplicate_references(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .entries
            .iter()
            .map(|e| e.reference_count - 1)
            .sum()
    }

    /// Mark an entry compressed with the byte savings reported by the
    /// ZSCII pool.
    pub fn mark_compressed(&self, id: usize, savings: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.entries.get_mut(id) {
            Some(entry) => {
                entry.compressed = true;
                entry.savings = savings;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn loc(line: usize) -> SourceLocation {
        SourceLocation::new("test.zil", line, 1)
    }

    #[test]
    fn test_ids_are_stable_and_insertion_ordered() {
        let pool = StringPool::new();
        assert_eq!(pool.add_string("first", loc(1)), 0);
        assert_eq!(pool.add_string("second", loc(2)), 1);
        assert_eq!(pool.add_string("first", loc(3)), 0);
        assert_eq!(pool.add_string("third", loc(4)), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_dedup_counts_references() {
        let pool = StringPool::new();
        pool.add_string("hello", loc(1));
        pool.add_string("hello", loc(2));
        pool.add_string("hello", loc(3));
        let info = pool.get(0).unwrap();
        assert_eq!(info.reference_count, 3);
        assert_eq!(info.locations.len(), 3);
        assert_eq!(pool.duplicate_references(), 2);
    }

    #[test]
    fn test_lookup_by_content() {
        let pool = StringPool::new();
        pool.add_string("needle", loc(1));
        assert_eq!(pool.lookup("needle"), Some(0));
        assert_eq!(pool.lookup("haystack"), None);
    }

    #[test]
    fn test_mark_compressed() {
        let pool = StringPool::new();
        pool.add_string("squeeze me", loc(1));
        assert!(pool.mark_compressed(0, 4));
        let info = pool.get(0).unwrap();
        assert!(info.compressed);
        assert_eq!(info.savings, 4);
        assert!(!pool.mark_compressed(9, 0));
    }
}
