//! Bounded LRU cache for node pages with write-back on eviction.
//!
//! Recency is tracked in an explicit queue so eviction order is
//! deterministic for a given access sequence; I/O-counter tests rely on
//! that.

use std::collections::{HashMap, VecDeque};

use crate::distance::Distance;
use crate::node::Node;
use crate::page::PageId;

struct CachedPage<D: Distance> {
    node: Node<D>,
    dirty: bool,
}

/// An LRU cache holding at most `cache_size` pages.
pub struct LruCache<D: Distance> {
    pages: HashMap<PageId, CachedPage<D>>,
    /// Recency order: front is oldest, back is newest.
    lru_order: VecDeque<PageId>,
    cache_size: usize,
}

impl<D: Distance> LruCache<D> {
    pub fn new(cache_size: usize) -> Self {
        Self {
            pages: HashMap::new(),
            lru_order: VecDeque::new(),
            cache_size,
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    fn touch(&mut self, id: PageId) {
        self.lru_order.retain(|&cached| cached != id);
        self.lru_order.push_back(id);
    }

    /// Look a page up, refreshing its recency. `None` signals a miss.
    pub fn lookup(&mut self, id: PageId) -> Option<&Node<D>> {
        if !self.pages.contains_key(&id) {
            return None;
        }
        self.touch(id);
        self.pages.get(&id).map(|cached| &cached.node)
    }

    /// Install a page, evicting the least recently used one when full.
    /// Returns an evicted dirty page that must be written back; clean
    /// victims are dropped silently. Installing over an existing entry
    /// keeps it dirty once it ever was.
    pub fn install(&mut self, id: PageId, node: Node<D>, dirty: bool) -> Option<(PageId, Node<D>)> {
        if let Some(cached) = self.pages.get_mut(&id) {
            cached.node = node;
            cached.dirty |= dirty;
            self.touch(id);
            return None;
        }

        let mut victim = None;
        if self.pages.len() >= self.cache_size {
            if let Some(oldest) = self.lru_order.pop_front() {
                if let Some(cached) = self.pages.remove(&oldest) {
                    if cached.dirty {
                        victim = Some((oldest, cached.node));
                    }
                }
            }
        }

        self.lru_order.push_back(id);
        self.pages.insert(id, CachedPage { node, dirty });
        victim
    }

    /// Drop a page without write-back.
    pub fn remove(&mut self, id: PageId) -> Option<Node<D>> {
        self.lru_order.retain(|&cached| cached != id);
        self.pages.remove(&id).map(|cached| cached.node)
    }

    /// Empty the cache, returning every page with its dirty flag in recency
    /// order (oldest first).
    pub fn clear(&mut self) -> Vec<(PageId, Node<D>, bool)> {
        let mut drained = Vec::with_capacity(self.pages.len());
        while let Some(id) = self.lru_order.pop_front() {
            if let Some(cached) = self.pages.remove(&id) {
                drained.push((id, cached.node, cached.dirty));
            }
        }
        self.pages.clear();
        drained
    }
}
