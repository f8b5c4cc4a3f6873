//! Memory-backed page store.

use std::collections::HashMap;

use crate::distance::Distance;
use crate::error::{MTreeError, Result};
use crate::node::Node;
use crate::page::{PageId, PageStore};

/// A page store keeping nodes in a map; nothing is serialized.
pub struct MemoryStore<D: Distance> {
    pages: HashMap<PageId, Node<D>>,
    next_page_id: PageId,
    free_ids: Vec<PageId>,
}

impl<D: Distance> MemoryStore<D> {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_page_id: 0,
            free_ids: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl<D: Distance> Default for MemoryStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Distance> PageStore<D> for MemoryStore<D> {
    fn load(&mut self, id: PageId) -> Result<Node<D>> {
        self.pages
            .get(&id)
            .cloned()
            .ok_or_else(|| MTreeError::Corrupted(format!("page {} does not exist", id)))
    }

    fn store(&mut self, id: PageId, node: &Node<D>) -> Result<()> {
        self.pages.insert(id, node.clone());
        Ok(())
    }

    fn allocate(&mut self) -> Result<PageId> {
        if let Some(id) = self.free_ids.pop() {
            return Ok(id);
        }
        let id = self.next_page_id;
        self.next_page_id += 1;
        Ok(id)
    }

    fn free(&mut self, id: PageId) -> Result<()> {
        self.pages.remove(&id);
        self.free_ids.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageFile;

    fn leaf(id: Option<PageId>) -> Node<f32> {
        let mut node = Node::new_leaf(4);
        node.node_id = id;
        node
    }

    #[test]
    fn test_store_and_load() {
        let mut store: MemoryStore<f32> = MemoryStore::new();
        store.store(3, &leaf(Some(3))).unwrap();
        assert_eq!(store.load(3).unwrap().node_id(), Some(3));
        assert!(matches!(
            store.load(9),
            Err(MTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_allocate_reuses_freed_ids() {
        let mut store: MemoryStore<f32> = MemoryStore::new();
        assert_eq!(store.allocate().unwrap(), 0);
        assert_eq!(store.allocate().unwrap(), 1);
        store.free(0).unwrap();
        assert_eq!(store.allocate().unwrap(), 0);
        assert_eq!(store.allocate().unwrap(), 2);
    }

    #[test]
    fn test_page_file_assigns_ids_on_first_write() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 8);
        let mut node = leaf(None);
        let id = file.write(&mut node).unwrap();
        assert_eq!(id, 0);
        assert_eq!(node.node_id(), Some(0));

        let mut other = leaf(None);
        assert_eq!(file.write(&mut other).unwrap(), 1);
    }

    #[test]
    fn test_cache_hits_do_not_count_io() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 8);
        let mut node = leaf(None);
        let id = file.write(&mut node).unwrap();
        // the write is cached; nothing physical happened yet
        assert_eq!(file.io_access_count(), 0);

        file.read(id).unwrap();
        file.read(id).unwrap();
        assert_eq!(file.io_access_count(), 0);

        file.close().unwrap();
        assert_eq!(file.io_access_count(), 1);
    }

    #[test]
    fn test_misses_count_io() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 1);
        let mut a = leaf(None);
        let mut b = leaf(None);
        let id_a = file.write(&mut a).unwrap();
        let id_b = file.write(&mut b).unwrap(); // evicts dirty a: one store
        assert_eq!(file.io_access_count(), 1);

        file.read(id_a).unwrap(); // miss: one load, evicts dirty b: one store
        assert_eq!(file.io_access_count(), 3);

        file.read(id_b).unwrap(); // miss: one load, evicts clean a
        assert_eq!(file.io_access_count(), 4);
        file.read(id_b).unwrap(); // hit
        assert_eq!(file.io_access_count(), 4);
    }

    #[test]
    fn test_reset_io_access_count() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 0);
        let mut node = leaf(None);
        file.write(&mut node).unwrap();
        assert!(file.io_access_count() > 0);
        file.reset_io_access_count();
        assert_eq!(file.io_access_count(), 0);
    }

    #[test]
    fn test_free_page_recycles_ids() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 8);
        let mut node = leaf(None);
        let id = file.write(&mut node).unwrap();

        file.free_page(id).unwrap();
        assert!(file.read(id).is_err());

        assert_eq!(file.allocate().unwrap(), id);
    }

    #[test]
    fn test_uncached_file_stays_consistent() {
        let mut file: PageFile<f32> = PageFile::new(Box::new(MemoryStore::new()), 0);
        let mut node = leaf(None);
        let id = file.write(&mut node).unwrap();
        assert_eq!(file.read(id).unwrap().node_id(), Some(id));
    }
}
