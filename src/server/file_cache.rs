//! 静态文件内存缓存
//!
//! 以请求路径为键，以字节数为开销。总开销超出预算时按最近最少使用顺序淘汰，
//! 命中会刷新使用顺序。锁只保护缓存结构本身，调用方不得在持锁期间做 IO。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::utils::logger::debug;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub document: Bytes,
    /// 实际文件名，用于推断 Content-Type
    pub filename: String,
    pub created: Instant,
}

impl CacheEntry {
    pub fn new(document: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            filename: filename.into(),
            created: Instant::now(),
        }
    }

    pub fn cost(&self) -> usize {
        self.document.len()
    }
}

struct Slot {
    entry: CacheEntry,
    stamp: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Slot>,
    /// 使用戳 → 键，最小的戳最久未使用
    order: BTreeMap<u64, String>,
    total_cost: usize,
    clock: u64,
}

impl CacheInner {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.stamp);
        self.total_cost -= slot.entry.cost();
        Some(slot.entry)
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self.order.iter().next().map(|(_, key)| key.clone());
        match oldest {
            Some(key) => {
                debug!("🧹 [FileCache] 淘汰缓存: {}", key);
                self.remove(&key).is_some()
            }
            None => false,
        }
    }
}

/// 带有效期与总开销上限的文件缓存
pub struct StaticFileCache {
    inner: Mutex<CacheInner>,
    max_cost: usize,
    ttl: Option<Duration>,
}

impl StaticFileCache {
    /// `cache_time` 为 0 表示条目永不过期
    pub fn new(max_cost: usize, cache_time: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_cost,
            ttl: if cache_time.is_zero() { None } else { Some(cache_time) },
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => entry.created.elapsed() < ttl,
        }
    }

    /// 查找未过期的条目；过期条目在查找时移除
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();
        let fresh = match inner.entries.get(key) {
            Some(slot) => self.is_fresh(&slot.entry),
            None => return None,
        };
        if !fresh {
            inner.remove(key);
            return None;
        }

        let stamp = inner.next_stamp();
        let slot = inner.entries.get_mut(key)?;
        let old_stamp = std::mem::replace(&mut slot.stamp, stamp);
        let entry = slot.entry.clone();
        inner.order.remove(&old_stamp);
        inner.order.insert(stamp, key.to_string());
        Some(entry)
    }

    /// 插入条目，必要时淘汰最久未使用的条目；单个条目超出总预算时不缓存
    pub fn insert(&self, key: &str, entry: CacheEntry) -> bool {
        let cost = entry.cost();
        if cost > self.max_cost {
            return false;
        }

        let mut inner = self.lock();
        inner.remove(key);
        while inner.total_cost + cost > self.max_cost {
            if !inner.evict_oldest() {
                break;
            }
        }

        let stamp = inner.next_stamp();
        inner.order.insert(stamp, key.to_string());
        inner.entries.insert(key.to_string(), Slot { entry, stamp });
        inner.total_cost += cost;
        true
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> usize {
        self.lock().total_cost
    }

    pub fn max_cost(&self) -> usize {
        self.max_cost
    }

    pub fn clear(&self) {
        *self.lock() = CacheInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: usize) -> CacheEntry {
        CacheEntry::new(vec![b'x'; size], "f.txt")
    }

    #[test]
    fn test_insert_and_lookup() {
        let cache = StaticFileCache::new(100, Duration::ZERO);
        assert!(cache.insert("/a", entry(10)));
        let hit = cache.lookup("/a").unwrap();
        assert_eq!(hit.document.len(), 10);
        assert_eq!(cache.total_cost(), 10);
        assert!(cache.lookup("/b").is_none());
    }

    #[test]
    fn test_replacing_key_updates_cost() {
        let cache = StaticFileCache::new(100, Duration::ZERO);
        cache.insert("/a", entry(10));
        cache.insert("/a", entry(30));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 30);
    }

    #[test]
    fn test_lru_eviction_by_cost() {
        let cache = StaticFileCache::new(100, Duration::ZERO);
        cache.insert("/a", entry(40));
        cache.insert("/b", entry(40));
        // 命中 /a，使 /b 成为最久未使用
        assert!(cache.lookup("/a").is_some());
        cache.insert("/c", entry(40));

        assert!(cache.contains("/a"));
        assert!(!cache.contains("/b"));
        assert!(cache.contains("/c"));
        assert_eq!(cache.total_cost(), 80);
    }

    #[test]
    fn test_eviction_of_several_entries() {
        let cache = StaticFileCache::new(100, Duration::ZERO);
        for i in 0..5 {
            cache.insert(&format!("/{}", i), entry(20));
        }
        cache.insert("/big", entry(70));
        assert!(cache.total_cost() <= 100);
        assert!(cache.contains("/big"));
        assert!(cache.contains("/4"));
        assert!(!cache.contains("/0"));
        assert!(!cache.contains("/2"));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = StaticFileCache::new(50, Duration::ZERO);
        cache.insert("/a", entry(10));
        assert!(!cache.insert("/huge", entry(51)));
        assert!(cache.contains("/a"));
        assert!(!cache.contains("/huge"));
    }

    #[test]
    fn test_expiry() {
        let cache = StaticFileCache::new(100, Duration::from_millis(20));
        cache.insert("/a", entry(10));
        assert!(cache.lookup("/a").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.lookup("/a").is_none());
        assert_eq!(cache.total_cost(), 0);
        assert!(cache.is_empty());
    }
}
