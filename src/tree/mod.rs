//! The metric tree: a paginated, balanced index over an arbitrary metric
//! space.
//!
//! The tree stores object ids only and asks its [`Metric`] for distances on
//! demand. Directory entries carry a routing object and a covering radius;
//! leaf entries carry stored objects. Both keep a precomputed distance to
//! the parent's routing object, which the queries use to prune subtrees by
//! the triangle inequality before computing any distance at all.

pub mod query;
pub mod queue;
mod split;

use std::collections::VecDeque;
use std::path::Path;

use tracing::debug;

use crate::distance::{Distance, Metric, ObjectId};
use crate::entry::Entry;
use crate::error::{MTreeError, Result};
use crate::node::Node;
use crate::page::{FileStore, MemoryStore, PageFile, PageId, PageLayout, PageStore, ROOT_PAGE_ID};

/// One step of a root-to-node path: the node's page id and its entry index
/// within its parent (`None` for the root).
#[derive(Debug, Clone, Copy)]
struct PathStep {
    node_id: PageId,
    index_in_parent: Option<usize>,
}

/// Structural summary of a tree, as reported by [`MTree::tree_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Directory levels above the leaves; 0 while the root is a leaf.
    pub height: usize,
    pub directory_nodes: usize,
    pub leaf_nodes: usize,
    pub objects: usize,
    /// Smallest entry count over nodes below the root (the root's own count
    /// when it is the only node).
    pub min_node_entries: usize,
    /// Largest entry count over nodes below the root.
    pub max_node_entries: usize,
}

/// A paginated metric index answering range and k-nearest-neighbor queries.
pub struct MTree<M: Metric> {
    pub(crate) file: PageFile<M::D>,
    pub(crate) metric: M,
    leaf_capacity: usize,
    dir_capacity: usize,
    closed: bool,
}

impl<M: Metric> MTree<M> {
    /// Create a memory-backed tree; node capacities are derived from
    /// `page_size`.
    pub fn init_in_memory(metric: M, page_size: usize, cache_size: usize) -> Result<Self> {
        let layout = PageLayout::derive::<M::D>(page_size)?;
        Self::bootstrap(metric, Box::new(MemoryStore::new()), layout, cache_size)
    }

    /// Create a memory-backed tree with explicit node capacities instead of
    /// a page size.
    pub fn with_capacities(
        metric: M,
        leaf_capacity: usize,
        dir_capacity: usize,
        cache_size: usize,
    ) -> Result<Self> {
        let layout = PageLayout::with_capacities(leaf_capacity, dir_capacity)?;
        Self::bootstrap(metric, Box::new(MemoryStore::new()), layout, cache_size)
    }

    /// Create a fresh file-backed tree at `path`.
    pub fn create_in_file(
        metric: M,
        path: impl AsRef<Path>,
        page_size: usize,
        cache_size: usize,
    ) -> Result<Self> {
        let layout = PageLayout::derive::<M::D>(page_size)?;
        let store = FileStore::create(path, layout)?;
        Self::bootstrap(metric, Box::new(store), layout, cache_size)
    }

    /// Open an existing file-backed tree; capacities come from the file
    /// header.
    pub fn init_from_file(metric: M, path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let store = FileStore::<M::D>::open(path)?;
        let layout = store.layout();
        Ok(Self {
            file: PageFile::new(Box::new(store), cache_size),
            metric,
            leaf_capacity: layout.leaf_capacity,
            dir_capacity: layout.dir_capacity,
            closed: false,
        })
    }

    fn bootstrap(
        metric: M,
        store: Box<dyn PageStore<M::D>>,
        layout: PageLayout,
        cache_size: usize,
    ) -> Result<Self> {
        let mut file = PageFile::new(store, cache_size);
        let mut root = Node::new_leaf(layout.leaf_capacity);
        let root_id = file.write(&mut root)?;
        debug_assert_eq!(root_id, ROOT_PAGE_ID);
        debug!(
            leaf_capacity = layout.leaf_capacity,
            dir_capacity = layout.dir_capacity,
            "created empty tree"
        );
        Ok(Self {
            file,
            metric,
            leaf_capacity: layout.leaf_capacity,
            dir_capacity: layout.dir_capacity,
            closed: false,
        })
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(MTreeError::NotInitialized)
        } else {
            Ok(())
        }
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    pub fn dir_capacity(&self) -> usize {
        self.dir_capacity
    }

    /// A reference to the tree's metric.
    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// Insert an object into the tree.
    pub fn insert(&mut self, object_id: ObjectId) -> Result<()> {
        self.ensure_open()?;
        let mut path = self.find_insertion_path(object_id)?;
        let leaf_step = path[path.len() - 1];
        let mut node = self.file.read(leaf_step.node_id)?;

        let parent_distance = match leaf_step.index_in_parent {
            Some(index) => {
                let parent = self.file.read(path[path.len() - 2].node_id)?;
                Some(self.metric.distance(object_id, parent.entry(index).object_id()))
            }
            None => None,
        };
        debug!(object_id, leaf = leaf_step.node_id, "inserting object");
        node.add_leaf_entry(Entry::Leaf {
            object_id,
            parent_distance,
        });

        // split upwards until every node along the path is below capacity;
        // the overflowing node itself never reaches a page
        loop {
            if !node.is_overflowing() {
                self.file.write(&mut node)?;
                return Ok(());
            }
            node = self.split_node(node, &path)?;
            if path.len() > 1 {
                path.pop();
            }
        }
    }

    /// Insert a batch of objects sequentially.
    pub fn insert_many(&mut self, object_ids: &[ObjectId]) -> Result<()> {
        for &object_id in object_ids {
            self.insert(object_id)?;
        }
        Ok(())
    }

    /// Deletion is not supported by the metric tree.
    pub fn delete(&mut self, _object_id: ObjectId) -> Result<bool> {
        Err(MTreeError::Unsupported(
            "deletion of objects is not supported by the metric tree",
        ))
    }

    /// Descend from the root, choosing at every directory level the entry
    /// that needs the least (ideally no) covering-radius enlargement. An
    /// enlargement is applied and written back immediately.
    fn find_insertion_path(&mut self, object_id: ObjectId) -> Result<Vec<PathStep>> {
        let mut path = vec![PathStep {
            node_id: ROOT_PAGE_ID,
            index_in_parent: None,
        }];
        loop {
            let current_id = path[path.len() - 1].node_id;
            let mut node = self.file.read(current_id)?;
            if node.is_leaf() {
                return Ok(path);
            }

            // (distance, index) of the closest covering entry
            let mut best_fit: Option<(M::D, usize)> = None;
            // (enlargement, distance, index) of the cheapest extension
            let mut best_enlargement: Option<(M::D, M::D, usize)> = None;
            for (index, entry) in node.entries().iter().enumerate() {
                let Entry::Directory {
                    routing_object_id,
                    covering_radius,
                    ..
                } = *entry
                else {
                    continue;
                };
                let d = self.metric.distance(object_id, routing_object_id);
                if d <= covering_radius {
                    if best_fit.map_or(true, |(best, _)| d < best) {
                        best_fit = Some((d, index));
                    }
                } else {
                    let enlargement = d.minus(covering_radius);
                    if best_enlargement.map_or(true, |(best, _, _)| enlargement < best) {
                        best_enlargement = Some((enlargement, d, index));
                    }
                }
            }

            let chosen = if let Some((_, index)) = best_fit {
                index
            } else if let Some((_, d, index)) = best_enlargement {
                if let Entry::Directory {
                    covering_radius, ..
                } = node.entry_mut(index)
                {
                    *covering_radius = d;
                }
                self.file.write(&mut node)?;
                index
            } else {
                return Err(MTreeError::Invariant(format!(
                    "directory node {} has no entries",
                    current_id
                )));
            };

            match *node.entry(chosen) {
                Entry::Directory { child_node_id, .. } => path.push(PathStep {
                    node_id: child_node_id,
                    index_in_parent: Some(chosen),
                }),
                Entry::Leaf { .. } => {
                    return Err(MTreeError::Invariant(format!(
                        "directory node {} holds a leaf entry",
                        current_id
                    )))
                }
            }
        }
    }

    /// Split the overflowing `node` (the last element of `path`, passed in
    /// memory) and return its parent with the split registered, or the new
    /// root if the root itself was split. The returned node has not been
    /// written yet; the caller decides whether it overflows in turn.
    fn split_node(&mut self, mut node: Node<M::D>, path: &[PathStep]) -> Result<Node<M::D>> {
        let step = path[path.len() - 1];

        let parent_routing = match step.index_in_parent {
            Some(index) => {
                let parent = self.file.read(path[path.len() - 2].node_id)?;
                Some(parent.entry(index).object_id())
            }
            None => None,
        };

        let assignments = split::promote_and_partition(&node, parent_routing, &self.metric);
        let mut sibling = node.split_entries(
            assignments.first_entries.clone(),
            assignments.second_entries.clone(),
        );

        match step.index_in_parent {
            None => {
                // root split: the old root moves to a fresh page and a new
                // directory root takes over the root id
                let relocated = self.file.allocate()?;
                node.node_id = Some(relocated);
                self.file.write(&mut node)?;
                let sibling_id = self.file.write(&mut sibling)?;

                let mut new_root = Node::new_directory(self.dir_capacity);
                new_root.node_id = Some(ROOT_PAGE_ID);
                new_root.add_directory_entry(Entry::Directory {
                    routing_object_id: assignments.first_routing_object,
                    parent_distance: None,
                    child_node_id: relocated,
                    covering_radius: assignments.first_covering_radius,
                });
                new_root.add_directory_entry(Entry::Directory {
                    routing_object_id: assignments.second_routing_object,
                    parent_distance: None,
                    child_node_id: sibling_id,
                    covering_radius: assignments.second_covering_radius,
                });
                debug!(
                    old_root = relocated,
                    sibling = sibling_id,
                    first = assignments.first_routing_object,
                    second = assignments.second_routing_object,
                    "split root, created new root"
                );
                Ok(new_root)
            }
            Some(node_index) => {
                let parent_step = path[path.len() - 2];
                let mut parent = self.file.read(parent_step.node_id)?;

                let node_id = self.file.write(&mut node)?;
                let sibling_id = self.file.write(&mut sibling)?;

                let (first_parent_distance, second_parent_distance) =
                    match parent_step.index_in_parent {
                        None => (None, None),
                        Some(parent_index) => {
                            let grandparent = self.file.read(path[path.len() - 3].node_id)?;
                            let grand_routing = grandparent.entry(parent_index).object_id();
                            (
                                Some(self
                                    .metric
                                    .distance(assignments.first_routing_object, grand_routing)),
                                Some(self
                                    .metric
                                    .distance(assignments.second_routing_object, grand_routing)),
                            )
                        }
                    };

                parent.add_directory_entry(Entry::Directory {
                    routing_object_id: assignments.second_routing_object,
                    parent_distance: second_parent_distance,
                    child_node_id: sibling_id,
                    covering_radius: assignments.second_covering_radius,
                });
                *parent.entry_mut(node_index) = Entry::Directory {
                    routing_object_id: assignments.first_routing_object,
                    parent_distance: first_parent_distance,
                    child_node_id: node_id,
                    covering_radius: assignments.first_covering_radius,
                };
                debug!(
                    node = node_id,
                    sibling = sibling_id,
                    first = assignments.first_routing_object,
                    second = assignments.second_routing_object,
                    "split node"
                );
                Ok(parent)
            }
        }
    }

    /// Number of directory levels above the leaves.
    pub fn height(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let mut levels = 0;
        let mut node = self.file.read(ROOT_PAGE_ID)?;
        while !node.is_leaf() {
            if node.num_entries() == 0 {
                return Err(MTreeError::Invariant(
                    "directory node has no entries".to_string(),
                ));
            }
            match *node.entry(0) {
                Entry::Directory { child_node_id, .. } => {
                    node = self.file.read(child_node_id)?;
                    levels += 1;
                }
                Entry::Leaf { .. } => {
                    return Err(MTreeError::Invariant(
                        "directory node holds a leaf entry".to_string(),
                    ))
                }
            }
        }
        Ok(levels)
    }

    /// Walk the whole tree and summarize its structure.
    pub fn tree_stats(&mut self) -> Result<TreeStats> {
        self.ensure_open()?;
        let mut stats = TreeStats {
            height: 0,
            directory_nodes: 0,
            leaf_nodes: 0,
            objects: 0,
            min_node_entries: usize::MAX,
            max_node_entries: 0,
        };
        let mut root_entries = 0;
        let mut queue = VecDeque::from([(ROOT_PAGE_ID, 0usize)]);
        while let Some((node_id, depth)) = queue.pop_front() {
            let node = self.file.read(node_id)?;
            if node_id == ROOT_PAGE_ID {
                root_entries = node.num_entries();
            } else {
                stats.min_node_entries = stats.min_node_entries.min(node.num_entries());
                stats.max_node_entries = stats.max_node_entries.max(node.num_entries());
            }
            if node.is_leaf() {
                stats.leaf_nodes += 1;
                stats.objects += node.num_entries();
                stats.height = stats.height.max(depth);
            } else {
                stats.directory_nodes += 1;
                for entry in node.entries() {
                    if let Entry::Directory { child_node_id, .. } = *entry {
                        queue.push_back((child_node_id, depth + 1));
                    }
                }
            }
        }
        if stats.min_node_entries == usize::MAX {
            stats.min_node_entries = root_entries;
            stats.max_node_entries = root_entries;
        }
        Ok(stats)
    }

    /// Structural self-test: balance, covering radii, parent distances and
    /// minimum fill. Diagnostic only; public operations never run it.
    pub fn check_invariants(&mut self) -> Result<()> {
        self.ensure_open()?;
        let root = self.file.read(ROOT_PAGE_ID)?;
        let mut leaf_depth = None;
        self.check_node(&root, None, 0, &mut leaf_depth)
    }

    fn check_node(
        &mut self,
        node: &Node<M::D>,
        routing: Option<ObjectId>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        let is_root = node.node_id() == Some(ROOT_PAGE_ID);
        if !is_root && node.num_entries() == 0 {
            return Err(MTreeError::Invariant(format!(
                "non-root node {:?} is empty",
                node.node_id()
            )));
        }

        for entry in node.entries() {
            match routing {
                Some(parent_object) => {
                    let expected = self.metric.distance(entry.object_id(), parent_object);
                    if entry.parent_distance() != Some(expected) {
                        return Err(MTreeError::Invariant(format!(
                            "entry {} in node {:?} has parent distance {:?}, expected {:?}",
                            entry.object_id(),
                            node.node_id(),
                            entry.parent_distance(),
                            expected
                        )));
                    }
                }
                None => {
                    if entry.parent_distance().is_some() {
                        return Err(MTreeError::Invariant(format!(
                            "root entry {} carries a parent distance",
                            entry.object_id()
                        )));
                    }
                }
            }
        }

        if node.is_leaf() {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(MTreeError::Invariant(format!(
                        "leaves at depths {} and {}",
                        expected, depth
                    )))
                }
                Some(_) => {}
            }
            return Ok(());
        }

        for entry in node.entries() {
            let Entry::Directory {
                routing_object_id,
                child_node_id,
                covering_radius,
                ..
            } = *entry
            else {
                return Err(MTreeError::Invariant(format!(
                    "directory node {:?} holds a leaf entry",
                    node.node_id()
                )));
            };
            let child = self.file.read(child_node_id)?;
            self.check_node(&child, Some(routing_object_id), depth + 1, leaf_depth)?;

            let mut objects = Vec::new();
            self.collect_objects(&child, &mut objects)?;
            for object in objects {
                let d = self.metric.distance(routing_object_id, object);
                if d > covering_radius {
                    return Err(MTreeError::Invariant(format!(
                        "object {} lies {:?} from routing object {}, beyond covering radius {:?}",
                        object, d, routing_object_id, covering_radius
                    )));
                }
            }
        }
        Ok(())
    }

    fn collect_objects(&mut self, node: &Node<M::D>, out: &mut Vec<ObjectId>) -> Result<()> {
        if node.is_leaf() {
            out.extend(node.entries().iter().map(|entry| entry.object_id()));
            return Ok(());
        }
        for entry in node.entries() {
            if let Entry::Directory { child_node_id, .. } = *entry {
                let child = self.file.read(child_node_id)?;
                self.collect_objects(&child, out)?;
            }
        }
        Ok(())
    }

    /// Physical page accesses since construction or the last reset.
    pub fn io_access_count(&self) -> u64 {
        self.file.io_access_count()
    }

    pub fn reset_io_access_count(&mut self) {
        self.file.reset_io_access_count();
    }

    /// Flush all cached pages and close the tree. Further operations fail
    /// with [`MTreeError::NotInitialized`].
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.file.close()?;
            self.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::ManhattanMetric;

    fn small_tree() -> MTree<ManhattanMetric> {
        let metric = ManhattanMetric::new((0..32).collect());
        MTree::with_capacities(metric, 4, 4, 16).unwrap()
    }

    #[test]
    fn test_insert_into_root_leaf() {
        let mut tree = small_tree();
        tree.insert(0).unwrap();
        tree.insert(1).unwrap();
        assert_eq!(tree.height().unwrap(), 0);
        let stats = tree.tree_stats().unwrap();
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.leaf_nodes, 1);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_root_leaf_split_grows_height() {
        let mut tree = small_tree();
        tree.insert_many(&[0, 1, 2, 3]).unwrap();
        assert_eq!(tree.height().unwrap(), 1);
        let stats = tree.tree_stats().unwrap();
        assert_eq!(stats.objects, 4);
        assert_eq!(stats.directory_nodes, 1);
        assert_eq!(stats.leaf_nodes, 2);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_many_inserts_stay_balanced() {
        let mut tree = small_tree();
        tree.insert_many(&(0..32).collect::<Vec<_>>()).unwrap();
        let stats = tree.tree_stats().unwrap();
        assert_eq!(stats.objects, 32);
        assert!(stats.min_node_entries >= 1);
        assert!(stats.max_node_entries <= 3);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_delete_is_unsupported() {
        let mut tree = small_tree();
        tree.insert(0).unwrap();
        assert!(matches!(tree.delete(0), Err(MTreeError::Unsupported(_))));
    }

    #[test]
    fn test_operations_after_close_fail() {
        let mut tree = small_tree();
        tree.insert(0).unwrap();
        tree.close().unwrap();
        assert!(matches!(tree.insert(1), Err(MTreeError::NotInitialized)));
        assert!(matches!(
            tree.height(),
            Err(MTreeError::NotInitialized)
        ));
        // closing twice is fine
        tree.close().unwrap();
    }

    #[test]
    fn test_capacity_validation() {
        let metric = ManhattanMetric::new(vec![0]);
        assert!(matches!(
            MTree::with_capacities(metric, 1, 4, 8),
            Err(MTreeError::InvalidCapacity(_))
        ));
    }
}
