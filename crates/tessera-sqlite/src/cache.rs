//! Read cache in front of the `blocks` table
//!
//! A cost-bounded LRU of block rows keyed by block ID plus a small cache of
//! reference rows keyed by definition block ID. The cache is never the system
//! of record: reads fill it on a miss, writes overwrite it and deletions remove
//! entries. Bulk batches switch it off with [`BlockCache::set_enabled`].

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_config::CacheConfig;
use tracing::debug;

use crate::row::{BlockRow, RefRow};

const REF_CAPACITY: usize = 1024;

struct BlockEntries {
    rows: LruCache<String, Arc<BlockRow>>,
    cost: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub cost: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct BlockCache {
    blocks: Mutex<BlockEntries>,
    refs: Mutex<LruCache<String, Arc<Vec<RefRow>>>>,
    max_cost: usize,
    enabled: AtomicBool,
    /// Bumped before committed writes reach the cache
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        let ref_capacity = NonZeroUsize::new(REF_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            blocks: Mutex::new(BlockEntries {
                rows: LruCache::new(capacity),
                cost: 0,
            }),
            refs: Mutex::new(LruCache::new(ref_capacity)),
            max_cost: config.max_cost,
            enabled: AtomicBool::new(config.enabled),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn the cache on or off; turning it off drops every entry
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was && !enabled {
            self.clear();
        }
        if was != enabled {
            debug!(enabled, "Block cache toggled");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<BlockRow>> {
        if !self.is_enabled() {
            return None;
        }
        let found = self.blocks.lock().rows.get(id).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Write generation to take before reading rows meant for [`fill`](Self::fill)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Insert or overwrite a row, evicting least recently used rows over budget
    pub fn put(&self, row: BlockRow) {
        if !self.is_enabled() {
            return;
        }
        if row.cost() > self.max_cost {
            self.remove(&row.id);
            return;
        }
        let mut entries = self.blocks.lock();
        self.insert(&mut entries, row);
    }

    /// Cache a row read from the database at `generation`
    ///
    /// Returns `false` without caching when a write was applied since, as the
    /// row may be older than that write.
    pub fn fill(&self, row: BlockRow, generation: u64) -> bool {
        if !self.is_enabled() || row.cost() > self.max_cost {
            return false;
        }
        let mut entries = self.blocks.lock();
        if self.generation() != generation {
            return false;
        }
        self.insert(&mut entries, row);
        true
    }

    fn insert(&self, entries: &mut BlockEntries, row: BlockRow) {
        let cost = row.cost();
        if let Some((_, evicted)) = entries.rows.push(row.id.clone(), Arc::new(row)) {
            entries.cost = entries.cost.saturating_sub(evicted.cost());
        }
        entries.cost += cost;
        while entries.cost > self.max_cost {
            match entries.rows.pop_lru() {
                Some((_, evicted)) => entries.cost = entries.cost.saturating_sub(evicted.cost()),
                None => break,
            }
        }
    }

    /// Drop a row and any reference data keyed by the same ID
    pub fn remove(&self, id: &str) {
        {
            let mut entries = self.blocks.lock();
            if let Some(old) = entries.rows.pop(id) {
                entries.cost = entries.cost.saturating_sub(old.cost());
            }
        }
        self.refs.lock().pop(id);
    }

    pub fn remove_many<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.remove(id);
        }
    }

    pub fn clear(&self) {
        self.bump_generation();
        let mut entries = self.blocks.lock();
        entries.rows.clear();
        entries.cost = 0;
        drop(entries);
        self.refs.lock().clear();
    }

    pub fn get_refs(&self, def_id: &str) -> Option<Arc<Vec<RefRow>>> {
        if !self.is_enabled() {
            return None;
        }
        self.refs.lock().get(def_id).cloned()
    }

    /// Cache reference rows read at `generation`, like [`fill`](Self::fill)
    pub fn fill_refs(&self, def_id: &str, refs: Vec<RefRow>, generation: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut cached = self.refs.lock();
        if self.generation() != generation {
            return false;
        }
        cached.put(def_id.to_string(), Arc::new(refs));
        true
    }

    /// Forget all reference data
    pub fn clear_refs(&self) {
        self.refs.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.blocks.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.rows.len(),
            cost: entries.cost,
        }
    }
}

/// Cache changes made inside a transaction, applied once it commits
#[derive(Debug, Default)]
pub(crate) struct CacheEffects {
    pub(crate) put: Vec<BlockRow>,
    pub(crate) remove: Vec<String>,
    pub(crate) clear: bool,
    pub(crate) clear_refs: bool,
}

impl CacheEffects {
    pub(crate) fn apply(self, cache: &BlockCache) {
        cache.bump_generation();
        if self.clear {
            cache.clear();
            return;
        }
        // Removals first: a row deleted and reinserted in one transaction ends up cached.
        cache.remove_many(self.remove.iter().map(String::as_str));
        if self.clear_refs {
            cache.clear_refs();
        }
        for row in self.put {
            cache.put(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, content: &str) -> BlockRow {
        BlockRow {
            id: id.to_string(),
            parent_id: String::new(),
            root_id: id.to_string(),
            hash: "h".to_string(),
            container: "box".to_string(),
            path: "/p.sy".to_string(),
            display_path: "/P".to_string(),
            name: String::new(),
            alias: String::new(),
            memo: String::new(),
            tag: String::new(),
            content: content.to_string(),
            fcontent: String::new(),
            markdown: content.to_string(),
            length: content.len() as i64,
            node_type: "p".to_string(),
            subtype: String::new(),
            ial: String::new(),
            sort: 10,
            created: String::new(),
            updated: String::new(),
        }
    }

    fn config(max_cost: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_cost,
            max_entries: 100,
        }
    }

    #[test]
    fn test_put_get_remove() {
        let cache = BlockCache::new(&config(1 << 20));
        cache.put(row("a", "hello"));
        assert_eq!(cache.get("a").unwrap().content, "hello");

        cache.put(row("a", "changed"));
        assert_eq!(cache.get("a").unwrap().content, "changed");

        cache.remove("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().cost, 0);
    }

    #[test]
    fn test_cost_budget_evicts_lru() {
        let one = row("a", "x").cost();
        let cache = BlockCache::new(&config(one * 2 + one / 2));
        cache.put(row("a", "x"));
        cache.put(row("b", "x"));
        cache.get("a");
        cache.put(row("c", "x"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert!(cache.stats().cost <= one * 2 + one / 2);
    }

    #[test]
    fn test_disabled_cache_is_bypassed_and_emptied() {
        let cache = BlockCache::new(&config(1 << 20));
        cache.put(row("a", "x"));
        cache.set_enabled(false);
        assert!(cache.get("a").is_none());
        cache.put(row("b", "x"));

        cache.set_enabled(true);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_remove_cascades_to_refs() {
        let cache = BlockCache::new(&config(1 << 20));
        cache.fill_refs("def", Vec::new(), cache.generation());
        assert!(cache.get_refs("def").is_some());
        cache.remove("def");
        assert!(cache.get_refs("def").is_none());
    }

    #[test]
    fn test_fill_skips_rows_read_before_a_write() {
        let cache = BlockCache::new(&config(1 << 20));
        let before = cache.generation();
        let effects = CacheEffects {
            remove: vec!["a".to_string()],
            ..Default::default()
        };
        effects.apply(&cache);

        assert!(!cache.fill(row("a", "stale"), before));
        assert!(cache.get("a").is_none());
        assert!(!cache.fill_refs("a", Vec::new(), before));

        assert!(cache.fill(row("a", "fresh"), cache.generation()));
        assert_eq!(cache.get("a").unwrap().content, "fresh");
    }

    #[test]
    fn test_effects_apply_removals_before_puts() {
        let cache = BlockCache::new(&config(1 << 20));
        cache.put(row("a", "old"));
        let effects = CacheEffects {
            put: vec![row("a", "new")],
            remove: vec!["a".to_string()],
            ..Default::default()
        };
        effects.apply(&cache);
        assert_eq!(cache.get("a").unwrap().content, "new");
    }
}
